//! Backend registry — the fixed table of logical backends.
//!
//! Built once at startup. Lookups are pure: resolving a name never spawns a
//! process, and the table never changes afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use futures::future::join_all;

use super::client::BridgeClient;
use super::errors::BridgeError;
use super::types::{CallOutcome, ToolListing};
use crate::config::BridgeConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Backends shipped with the service, one MCP server each.
pub const KNOWN_BACKENDS: &[&str] = &["fortinet", "meraki"];

/// Conventional build output of a backend server under the servers root.
///
/// E.g. `network-mcp-servers/fortinet-server/build/index.js`.
pub fn standard_entry_point(servers_root: &Path, backend: &str) -> PathBuf {
    servers_root
        .join(format!("{backend}-server"))
        .join("build")
        .join("index.js")
}

// ─── BackendRegistry ─────────────────────────────────────────────────────────

/// Name → client table.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    clients: HashMap<String, BridgeClient>,
}

impl BackendRegistry {
    /// Build the standard registry (`fortinet`, `meraki`) from configuration.
    ///
    /// Fails with `RuntimeUnavailable` if the runtime cannot be found.
    pub fn standard(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let servers_root = config.servers_root();
        let timeouts = config.session_timeouts();

        let clients = KNOWN_BACKENDS
            .iter()
            .map(|name| {
                BridgeClient::new(
                    name,
                    standard_entry_point(&servers_root, name),
                    &config.runtime,
                    timeouts,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            servers_root = %servers_root.display(),
            runtime = %config.runtime,
            backends = ?KNOWN_BACKENDS,
            "backend registry initialized"
        );

        Self::from_clients(clients)
    }

    /// Build a registry from explicit clients. Names must be unique.
    pub fn from_clients(clients: Vec<BridgeClient>) -> Result<Self, BridgeError> {
        let mut table = HashMap::with_capacity(clients.len());
        for client in clients {
            let name = client.name().to_string();
            if table.insert(name.clone(), client).is_some() {
                return Err(BridgeError::ConfigError {
                    reason: format!("backend '{name}' registered twice"),
                });
            }
        }
        Ok(Self { clients: table })
    }

    /// Look up the client for a backend.
    pub fn resolve(&self, name: &str) -> Result<&BridgeClient, BridgeError> {
        self.clients.get(name).ok_or_else(|| BridgeError::BackendNotFound {
            name: name.to_string(),
        })
    }

    /// Registered backend names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.clients.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    // ─── Upward interface ────────────────────────────────────────────────

    /// List a backend's tools. Only an unknown name is an error.
    pub async fn list_tools(&self, backend: &str) -> Result<ToolListing, BridgeError> {
        Ok(self.resolve(backend)?.list_tools().await)
    }

    /// Call a tool on a backend. Only an unknown name is an error.
    pub async fn call_tool(
        &self,
        backend: &str,
        tool_name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<CallOutcome, BridgeError> {
        Ok(self.resolve(backend)?.call_tool(tool_name, arguments).await)
    }

    /// List tools from every backend concurrently, sorted by backend name.
    pub async fn list_all_tools(&self) -> Vec<(String, ToolListing)> {
        let names = self.names();
        let listings = join_all(names.iter().map(|name| self.clients[*name].list_tools())).await;
        names
            .into_iter()
            .map(str::to_string)
            .zip(listings)
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_bridge::launcher::SessionTimeouts;

    #[test]
    fn test_standard_entry_point_layout() {
        let path = standard_entry_point(Path::new("/srv/network-mcp-servers"), "meraki");
        assert_eq!(
            path,
            PathBuf::from("/srv/network-mcp-servers/meraki-server/build/index.js")
        );
    }

    #[test]
    fn test_standard_registry_requires_runtime() {
        let config = BridgeConfig {
            runtime: "definitely-not-a-runtime-4f1c".into(),
            ..BridgeConfig::default()
        };
        let err = BackendRegistry::standard(&config).unwrap_err();
        assert!(matches!(err, BridgeError::RuntimeUnavailable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_standard_registry_names() {
        let config = BridgeConfig {
            runtime: "sh".into(),
            servers_root: Some("/nonexistent/network-mcp-servers".into()),
            ..BridgeConfig::default()
        };
        let registry = BackendRegistry::standard(&config).unwrap();
        assert_eq!(registry.names(), vec!["fortinet", "meraki"]);
        assert_eq!(
            registry.resolve("fortinet").unwrap().backend().entry_point(),
            Path::new("/nonexistent/network-mcp-servers/fortinet-server/build/index.js")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_duplicate_backend_rejected() {
        let make = || {
            BridgeClient::new("alpha", "/tmp/a.js", "sh", SessionTimeouts::default()).unwrap()
        };
        let err = BackendRegistry::from_clients(vec![make(), make()]).unwrap_err();
        assert!(matches!(err, BridgeError::ConfigError { .. }));
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use crate::mcp_bridge::launcher::SessionTimeouts;
        use crate::mcp_bridge::test_support::{recorded_pids, write_script, FAKE_SERVER};
        use tempfile::TempDir;

        fn alpha_registry(tmp: &TempDir) -> BackendRegistry {
            let entry = write_script(tmp.path(), "server.sh", FAKE_SERVER);
            let alpha =
                BridgeClient::new("alpha", entry, "sh", SessionTimeouts::default()).unwrap();
            BackendRegistry::from_clients(vec![alpha]).unwrap()
        }

        #[tokio::test]
        async fn test_alpha_scenario() {
            let tmp = TempDir::new().unwrap();
            let registry = alpha_registry(&tmp);

            let listing = registry.list_tools("alpha").await.unwrap();
            let tools = listing.tools().unwrap();
            assert!(!tools.is_empty());
            let ping = tools.iter().find(|t| t.name == "ping").unwrap();
            assert_eq!(ping.input_schema["type"], "object");

            let outcome = registry.call_tool("alpha", "ping", Some(serde_json::Map::new())).await.unwrap();
            assert!(!outcome.is_error());
        }

        #[tokio::test]
        async fn test_unknown_backend_never_spawns() {
            let tmp = TempDir::new().unwrap();
            let registry = alpha_registry(&tmp);

            let err = registry.resolve("beta").unwrap_err();
            assert!(matches!(err, BridgeError::BackendNotFound { ref name } if name == "beta"));

            let err = registry.call_tool("beta", "ping", None).await.unwrap_err();
            assert!(matches!(err, BridgeError::BackendNotFound { .. }));
            let err = registry.list_tools("beta").await.unwrap_err();
            assert!(err.is_configuration());

            assert!(recorded_pids(tmp.path()).is_empty());
        }

        #[tokio::test]
        async fn test_list_all_tools_reports_each_backend() {
            let tmp = TempDir::new().unwrap();
            let entry = write_script(tmp.path(), "server.sh", FAKE_SERVER);
            let alpha =
                BridgeClient::new("alpha", entry, "sh", SessionTimeouts::default()).unwrap();
            let broken = BridgeClient::new(
                "broken",
                tmp.path().join("missing.js"),
                "sh",
                SessionTimeouts::default(),
            )
            .unwrap();
            let registry = BackendRegistry::from_clients(vec![broken, alpha]).unwrap();

            let all = registry.list_all_tools().await;
            assert_eq!(all.len(), 2);
            assert_eq!(all[0].0, "alpha");
            assert!(!all[0].1.is_error());
            assert_eq!(all[1].0, "broken");
            assert!(all[1].1.is_error());
        }
    }
}
