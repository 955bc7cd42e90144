//! Bridge configuration loading.
//!
//! Reads an optional `netdiag-bridge.yaml` and resolves environment variables.
//! Every field has a default, so running without a file is normal.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::mcp_bridge::{BridgeError, SessionTimeouts};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Config file name searched for upward from the working directory.
pub const CONFIG_FILE_NAME: &str = "netdiag-bridge.yaml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "NETDIAG_BRIDGE_CONFIG";

/// Directory holding the backend servers, relative to the project root.
pub const SERVERS_DIR_NAME: &str = "network-mcp-servers";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level bridge configuration (mirrors `netdiag-bridge.yaml`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Directory containing `<backend>-server/build/index.js`. When absent,
    /// `network-mcp-servers/` under the detected project root is used.
    pub servers_root: Option<String>,
    /// Runtime used to execute backend entry points.
    pub runtime: String,
    pub handshake_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub shutdown_grace_ms: u64,
    /// When set, logs go to `<log_dir>/bridge.log` instead of stderr.
    pub log_dir: Option<String>,
    pub log_json: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let timeouts = SessionTimeouts::default();
        Self {
            servers_root: None,
            runtime: "node".to_string(),
            handshake_timeout_secs: timeouts.handshake.as_secs(),
            request_timeout_secs: timeouts.request.as_secs(),
            shutdown_grace_ms: timeouts.shutdown_grace.as_millis() as u64,
            log_dir: None,
            log_json: false,
        }
    }
}

/// Where and how to write logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub dir: Option<PathBuf>,
    pub json: bool,
}

impl BridgeConfig {
    /// Load configuration.
    ///
    /// Resolution order:
    /// 1. `explicit` (must exist).
    /// 2. `$NETDIAG_BRIDGE_CONFIG` (must exist).
    /// 3. `netdiag-bridge.yaml` found walking upward from the working directory.
    /// 4. Defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, BridgeError> {
        if let Some(path) = explicit {
            return load_config(path);
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return load_config(Path::new(&path));
        }

        let cwd = std::env::current_dir().unwrap_or_default();
        match find_config_path(&cwd) {
            Some(path) => load_config(&path),
            None => Ok(Self::default()),
        }
    }

    /// Absolute servers root.
    pub fn servers_root(&self) -> PathBuf {
        match &self.servers_root {
            Some(root) if Path::new(root).is_absolute() => PathBuf::from(root),
            Some(root) => resolve_project_root().join(root),
            None => resolve_project_root().join(SERVERS_DIR_NAME),
        }
    }

    pub fn session_timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            handshake: Duration::from_secs(self.handshake_timeout_secs),
            request: Duration::from_secs(self.request_timeout_secs),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        }
    }

    pub fn log_settings(&self) -> LogSettings {
        LogSettings {
            dir: self.log_dir.as_ref().map(PathBuf::from),
            json: self.log_json,
        }
    }

    fn validate(&self) -> Result<(), BridgeError> {
        if self.runtime.trim().is_empty() {
            return Err(BridgeError::ConfigError {
                reason: "runtime must not be empty".into(),
            });
        }
        if self.handshake_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(BridgeError::ConfigError {
                reason: "timeouts must be at least one second".into(),
            });
        }
        Ok(())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Search upward from `start` for `netdiag-bridge.yaml`.
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

/// Load and parse a configuration file.
///
/// String values may reference `${VAR}` or `${VAR:-default}`.
pub fn load_config(path: &Path) -> Result<BridgeConfig, BridgeError> {
    let raw = std::fs::read_to_string(path).map_err(|e| BridgeError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let config = parse_config(&raw).map_err(|e| match e {
        BridgeError::ConfigError { reason } => BridgeError::ConfigError {
            reason: format!("{}: {reason}", path.display()),
        },
        other => other,
    })?;

    tracing::debug!(path = %path.display(), "loaded bridge config");
    Ok(config)
}

fn parse_config(raw: &str) -> Result<BridgeConfig, BridgeError> {
    let interpolated = interpolate_env_vars(raw);

    // An empty file parses as YAML null; treat it as all defaults.
    if interpolated.trim().is_empty() {
        return Ok(BridgeConfig::default());
    }

    let config: BridgeConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| BridgeError::ConfigError {
            reason: format!("failed to parse config: {e}"),
        })?;
    config.validate()?;
    Ok(config)
}

/// Determine the project root directory.
///
/// Resolution order:
/// 1. The working directory, if it contains `network-mcp-servers/`.
/// 2. Its parent, if that does.
/// 3. The executable's directory, if that does.
/// 4. Fallback: the working directory.
pub fn resolve_project_root() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_default();

    if cwd.join(SERVERS_DIR_NAME).is_dir() {
        return cwd;
    }

    if let Some(parent) = cwd.parent() {
        if parent.join(SERVERS_DIR_NAME).is_dir() {
            return parent.to_path_buf();
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            if exe_dir.join(SERVERS_DIR_NAME).is_dir() {
                return exe_dir.to_path_buf();
            }
        }
    }

    cwd
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string. An unterminated
/// `${` is kept literally.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                result.push_str(&resolve_var_expr(&after[..end]));
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    result.push_str(rest);
    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name)
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
