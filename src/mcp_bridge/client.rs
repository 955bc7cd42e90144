//! Bridge client — the public entry point for one backend.
//!
//! Every call runs a complete cycle: spawn the server, handshake, perform one
//! operation, tear the server down. Nothing is shared between calls, so a
//! `BridgeClient` can be used from many tasks at once.

use std::path::PathBuf;
use std::time::Instant;

use super::errors::BridgeError;
use super::launcher::{Backend, LaunchDescriptor, SessionTimeouts};
use super::session::Session;
use super::types::{CallOutcome, Capability, ErrorRecord, ToolListing};

// ─── BridgeClient ────────────────────────────────────────────────────────────

/// Client bound to one logical backend.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    backend: Backend,
}

impl BridgeClient {
    /// Create a client, failing with `RuntimeUnavailable` if `runtime_program`
    /// cannot be found. The entry point is only checked when a call is made.
    pub fn new(
        name: &str,
        entry_point: impl Into<PathBuf>,
        runtime_program: &str,
        timeouts: SessionTimeouts,
    ) -> Result<Self, BridgeError> {
        let backend = Backend::new(name, entry_point, runtime_program, timeouts)?;
        if !backend.entry_point().exists() {
            tracing::warn!(
                backend = name,
                entry_point = %backend.entry_point().display(),
                "entry point does not exist yet; calls will fail until it is built"
            );
        }
        Ok(Self { backend })
    }

    pub fn from_backend(backend: Backend) -> Self {
        Self { backend }
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    // ─── Data-level API ──────────────────────────────────────────────────

    /// List the backend's tools. Failures come back as `ToolListing::Failed`.
    pub async fn list_tools(&self) -> ToolListing {
        let start = Instant::now();
        match self.try_list_tools().await {
            Ok(tools) => {
                tracing::info!(
                    backend = self.name(),
                    op = "list_tools",
                    tool_count = tools.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "bridge call complete"
                );
                ToolListing::Tools(tools)
            }
            Err(e) => {
                self.log_failure("list_tools", None, &e, start);
                ToolListing::Failed(ErrorRecord::new(e.to_string()))
            }
        }
    }

    /// Call one tool. Failures come back as `CallOutcome::Failed`.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> CallOutcome {
        let start = Instant::now();
        match self.try_call_tool(tool_name, arguments).await {
            Ok(payload) => {
                tracing::info!(
                    backend = self.name(),
                    op = "call_tool",
                    tool = tool_name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "bridge call complete"
                );
                CallOutcome::Success(payload)
            }
            Err(e) => {
                self.log_failure("call_tool", Some(tool_name), &e, start);
                CallOutcome::Failed(ErrorRecord::new(e.to_string()))
            }
        }
    }

    // ─── Typed API ───────────────────────────────────────────────────────

    /// `list_tools` with typed errors. The server is torn down either way.
    pub async fn try_list_tools(&self) -> Result<Vec<Capability>, BridgeError> {
        let mut session = self.open_session()?;
        let result = async {
            session.initialize().await?;
            session.list_capabilities().await
        }
        .await;
        session.close().await;
        result
    }

    /// `call_tool` with typed errors. The server is torn down either way.
    pub async fn try_call_tool(
        &self,
        tool_name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<serde_json::Value, BridgeError> {
        let mut session = self.open_session()?;
        let result = async {
            session.initialize().await?;
            session.invoke(tool_name, arguments).await
        }
        .await;
        session.close().await;
        result
    }

    fn open_session(&self) -> Result<Session, BridgeError> {
        let descriptor = LaunchDescriptor::for_backend(&self.backend)?;
        Session::open(&descriptor, self.backend.timeouts())
    }

    fn log_failure(&self, op: &str, tool: Option<&str>, error: &BridgeError, start: Instant) {
        tracing::warn!(
            backend = self.name(),
            op,
            tool = ?tool,
            error = %error,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "bridge call failed"
        );
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
