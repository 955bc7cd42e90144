//! Bridge error types.

use thiserror::Error;

/// Errors that can occur while bridging to an MCP tool server.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The runtime binary needed to start a backend is not on the search path.
    #[error("runtime '{program}' not found in PATH")]
    RuntimeUnavailable {
        program: String,
    },

    /// No backend is registered under this logical name.
    #[error("unknown backend: '{name}'")]
    BackendNotFound {
        name: String,
    },

    /// The backend's entry point could not be resolved to an absolute path.
    #[error("entry point for '{backend}' not found at {path}: {reason}")]
    EntryPointNotFound {
        backend: String,
        path: String,
        reason: String,
    },

    /// The OS refused to start the child process.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake did not complete.
    #[error("server '{name}' initialization failed: {reason}")]
    HandshakeFailed {
        name: String,
        reason: String,
    },

    /// Reading or writing the child's stdio failed, or the child exited.
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// The child answered with a malformed or unexpected message shape.
    #[error("protocol error from server '{server}': {reason}")]
    ProtocolError {
        server: String,
        reason: String,
    },

    /// The child answered with a JSON-RPC error object.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A bounded wait on the child expired.
    #[error("server '{server}' did not answer '{method}' within {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// Configuration error (bad config file, duplicate backend).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl BridgeError {
    /// Whether this is a configuration-level failure that callers must see as
    /// a hard error rather than an error record.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BridgeError::RuntimeUnavailable { .. }
                | BridgeError::BackendNotFound { .. }
                | BridgeError::ConfigError { .. }
        )
    }
}
