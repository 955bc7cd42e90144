//! MCP Bridge — per-call stdio sessions with external tool servers.
//!
//! This module handles:
//! - Resolving the runtime and entry point for each backend
//! - Spawning one server child process per operation
//! - JSON-RPC 2.0 communication over process stdio
//! - The initialize handshake, tool discovery and tool calls
//! - Unconditional teardown of the child after every operation
//!
//! Callers go through the `BackendRegistry`, which maps logical backend
//! names to `BridgeClient`s.

pub mod client;
pub mod errors;
pub mod launcher;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(all(test, unix))]
pub(crate) mod test_support;

// Re-exports for convenience
pub use client::BridgeClient;
pub use errors::BridgeError;
pub use launcher::{Backend, LaunchDescriptor, SessionTimeouts};
pub use registry::{BackendRegistry, KNOWN_BACKENDS};
pub use session::Session;
pub use types::{CallOutcome, Capability, ErrorRecord, ToolListing};
