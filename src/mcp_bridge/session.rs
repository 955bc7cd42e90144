//! One MCP session: a spawned server process and its stdio channel.
//!
//! A `Session` lives for exactly one bridge operation. It is opened right
//! before the first message and closed unconditionally afterwards; the child
//! is also spawned with `kill_on_drop`, so dropping an unclosed session (for
//! example when the caller's future is cancelled) still terminates it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::errors::BridgeError;
use super::launcher::{LaunchDescriptor, SessionTimeouts};
use super::transport::{extract_result, StdioTransport};
use super::types::{
    Capability, InitializeResult, ListToolsPage, PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Name the bridge reports in `clientInfo`.
const CLIENT_NAME: &str = "netdiag-bridge";

/// Upper bound on `tools/list` pages followed for one listing.
const MAX_LIST_PAGES: usize = 100;

/// Characters of stderr kept for error context.
const STDERR_TAIL_LIMIT: usize = 2000;

/// How long to wait for the stderr drain to catch up before reporting.
const STDERR_SETTLE: Duration = Duration::from_millis(500);

// ─── Session ─────────────────────────────────────────────────────────────────

/// A live connection to one spawned MCP server.
pub struct Session {
    id: Uuid,
    server_name: String,
    child: Child,
    transport: StdioTransport,
    timeouts: SessionTimeouts,
    stderr_tail: Arc<Mutex<String>>,
    stderr_task: Option<JoinHandle<()>>,
    initialized: bool,
    closed: bool,
}

impl Session {
    /// Spawn the child described by `descriptor` and bind its stdio.
    pub fn open(
        descriptor: &LaunchDescriptor,
        timeouts: SessionTimeouts,
    ) -> Result<Self, BridgeError> {
        let name = descriptor.server_name.as_str();
        let mut child = descriptor
            .command()
            .spawn()
            .map_err(|e| BridgeError::SpawnFailed {
                name: name.to_string(),
                reason: format!("{e}"),
            })?;

        let stdin = child.stdin.take().ok_or(BridgeError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;

        let stdout = child.stdout.take().ok_or(BridgeError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;

        let stderr_tail = Arc::new(Mutex::new(String::new()));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| drain_stderr(name.to_string(), stderr, Arc::clone(&stderr_tail)));

        let id = Uuid::new_v4();
        tracing::debug!(
            server = name,
            session = %id,
            pid = ?child.id(),
            program = %descriptor.program.display(),
            "spawned server process"
        );

        Ok(Self {
            id,
            server_name: name.to_string(),
            child,
            transport: StdioTransport::new(name, stdin, stdout),
            timeouts,
            stderr_tail,
            stderr_task,
            initialized: false,
            closed: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// OS process id of the child, if it has not been reaped yet.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Perform the MCP initialization handshake.
    ///
    /// Every failure, including a timeout, is reported as `HandshakeFailed`
    /// with whatever the child wrote to stderr appended.
    pub async fn initialize(&mut self) -> Result<(), BridgeError> {
        match self.handshake().await {
            Ok(()) => {
                self.initialized = true;
                Ok(())
            }
            Err(e) => {
                let stderr_ctx = self.stderr_context().await;
                if !stderr_ctx.is_empty() {
                    tracing::warn!(
                        server = %self.server_name,
                        session = %self.id,
                        stderr = %stderr_ctx,
                        "server stderr captured on failure"
                    );
                }
                Err(BridgeError::HandshakeFailed {
                    name: self.server_name.clone(),
                    reason: format!("{e}{}", format_stderr_suffix(&stderr_ctx)),
                })
            }
        }
    }

    async fn handshake(&mut self) -> Result<(), BridgeError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let response = self
            .transport
            .request("initialize", Some(params), self.timeouts.handshake)
            .await?;
        let result = extract_result(response)?;

        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| BridgeError::ProtocolError {
                server: self.server_name.clone(),
                reason: format!("failed to parse initialize response: {e}"),
            })?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&init.protocol_version.as_str()) {
            return Err(BridgeError::ProtocolError {
                server: self.server_name.clone(),
                reason: format!("unsupported protocol version '{}'", init.protocol_version),
            });
        }

        self.transport
            .notify("notifications/initialized", None)
            .await?;

        let (info_name, info_version) = init
            .server_info
            .map(|info| (info.name, info.version))
            .unwrap_or_default();
        tracing::debug!(
            server = %self.server_name,
            session = %self.id,
            protocol_version = %init.protocol_version,
            server_info_name = ?info_name,
            server_info_version = ?info_version,
            has_tools = init.capabilities.get("tools").is_some(),
            "handshake complete"
        );
        Ok(())
    }

    /// Discover the server's tools, following pagination to the end.
    pub async fn list_capabilities(&mut self) -> Result<Vec<Capability>, BridgeError> {
        self.ensure_initialized()?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let response = self
                .transport
                .request("tools/list", params, self.timeouts.request)
                .await?;
            let result = extract_result(response)?;

            let page: ListToolsPage =
                serde_json::from_value(result).map_err(|e| BridgeError::ProtocolError {
                    server: self.server_name.clone(),
                    reason: format!("malformed tools/list result: {e}"),
                })?;

            tools.extend(page.tools.into_iter().map(Capability::from));

            match page.next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        Err(BridgeError::ProtocolError {
            server: self.server_name.clone(),
            reason: format!("tools/list pagination exceeded {MAX_LIST_PAGES} pages"),
        })
    }

    /// Call one tool. Absent arguments are sent as an empty object.
    ///
    /// The server's `result` is returned as-is; a result flagged with
    /// `isError` is still a payload, not a bridge failure.
    pub async fn invoke(
        &mut self,
        tool_name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<serde_json::Value, BridgeError> {
        self.ensure_initialized()?;

        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments.unwrap_or_default(),
        });
        let response = self
            .transport
            .request("tools/call", Some(params), self.timeouts.request)
            .await?;
        extract_result(response)
    }

    /// Terminate the child and release its streams. Safe to call repeatedly.
    ///
    /// Closes stdin first and gives the server the shutdown grace period to
    /// exit on its own, then kills it. Failures here are only logged.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.transport.close_stdin();

        match tokio::time::timeout(self.timeouts.shutdown_grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.server_name, session = %self.id, %status, "server exited");
            }
            Ok(Err(e)) => {
                tracing::debug!(server = %self.server_name, session = %self.id, error = %e, "wait on server failed");
                let _ = self.child.kill().await;
            }
            Err(_) => {
                tracing::debug!(server = %self.server_name, session = %self.id, "server still running, killing");
                if let Err(e) = self.child.kill().await {
                    tracing::debug!(server = %self.server_name, session = %self.id, error = %e, "kill failed");
                }
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }

    fn ensure_initialized(&self) -> Result<(), BridgeError> {
        if self.closed {
            return Err(BridgeError::TransportError {
                server: self.server_name.clone(),
                reason: "session already closed".into(),
            });
        }
        if !self.initialized {
            return Err(BridgeError::ProtocolError {
                server: self.server_name.clone(),
                reason: "session used before initialize".into(),
            });
        }
        Ok(())
    }

    /// Stderr collected so far, after giving the drain a moment to finish.
    ///
    /// A drain still running after the settle time stays owned by the
    /// session so `close()` can abort it.
    async fn stderr_context(&mut self) -> String {
        if let Some(task) = self.stderr_task.as_mut() {
            if tokio::time::timeout(STDERR_SETTLE, task).await.is_ok() {
                self.stderr_task = None;
            }
        }
        self.stderr_tail
            .lock()
            .map(|tail| tail.trim().to_string())
            .unwrap_or_default()
    }
}

// ─── Stderr Capture ──────────────────────────────────────────────────────────

/// Forward the child's stderr to the log and keep a bounded tail of it.
fn drain_stderr(
    server: String,
    stderr: ChildStderr,
    tail: Arc<Mutex<String>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, line = %line, "server stderr");
            if let Ok(mut buf) = tail.lock() {
                push_tail(&mut buf, &line);
            }
        }
    })
}

/// Append a line, dropping the oldest text beyond `STDERR_TAIL_LIMIT`.
fn push_tail(buf: &mut String, line: &str) {
    buf.push_str(line);
    buf.push('\n');
    if buf.len() > STDERR_TAIL_LIMIT {
        let mut cut = buf.len() - STDERR_TAIL_LIMIT;
        while !buf.is_char_boundary(cut) {
            cut += 1;
        }
        buf.drain(..cut);
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {stderr}")
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
