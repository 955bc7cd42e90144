//! JSON-RPC over stdio transport.
//!
//! Handles low-level communication with an MCP server child process:
//! - Writing JSON-RPC requests and notifications to stdin
//! - Reading JSON-RPC responses from stdout
//! - Line-delimited JSON protocol (one JSON object per line)
//!
//! Every operation takes `&mut self`, so there is never more than one request
//! in flight on a transport.

use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};

use super::errors::BridgeError;
use super::types::{
    error_codes, Incoming, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcReply,
    JsonRpcRequest, JsonRpcResponse,
};

// ─── Transport ───────────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC transport over a child process's stdio.
pub struct StdioTransport {
    server_name: String,
    writer: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl StdioTransport {
    /// Create a new transport from a child process's stdin/stdout.
    pub fn new(server_name: &str, stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self {
            server_name: server_name.to_string(),
            writer: Some(stdin),
            reader: BufReader::new(stdout),
            next_id: 1,
        }
    }

    /// Send a JSON-RPC request and wait up to `wait` for the matching response.
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
        wait: Duration,
    ) -> Result<JsonRpcResponse, BridgeError> {
        let id = self.next_id;
        self.next_id += 1;

        let req = JsonRpcRequest::new(id, method, params);
        self.write_line(&req).await?;

        tokio::time::timeout(wait, self.read_response(id))
            .await
            .map_err(|_| BridgeError::Timeout {
                server: self.server_name.clone(),
                method: method.to_string(),
                timeout_ms: wait.as_millis() as u64,
            })?
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), BridgeError> {
        let notification = JsonRpcNotification::new(method, params);
        self.write_line(&notification).await
    }

    /// Close the child's stdin. A well-behaved server exits on EOF.
    pub fn close_stdin(&mut self) {
        self.writer = None;
    }

    async fn write_line<T: Serialize>(&mut self, message: &T) -> Result<(), BridgeError> {
        let mut json = serde_json::to_string(message).map_err(|e| BridgeError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to serialize message: {e}"),
        })?;
        json.push('\n');

        let writer = self.writer.as_mut().ok_or_else(|| BridgeError::TransportError {
            server: self.server_name.clone(),
            reason: "stdin already closed".into(),
        })?;
        writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| BridgeError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        writer
            .flush()
            .await
            .map_err(|e| BridgeError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to flush stdin: {e}"),
            })
    }

    /// Read lines until the response for `id` arrives.
    ///
    /// Log output (including lines that are not valid UTF-8), notifications
    /// and responses for other ids are skipped. Requests from the server are
    /// answered inline. An error reply with a null id is attributed to `id`,
    /// since it is the only request in flight.
    async fn read_response(&mut self, id: u64) -> Result<JsonRpcResponse, BridgeError> {
        let mut line_buf = Vec::new();

        loop {
            line_buf.clear();
            let bytes_read = self
                .reader
                .read_until(b'\n', &mut line_buf)
                .await
                .map_err(|e| BridgeError::TransportError {
                    server: self.server_name.clone(),
                    reason: format!("failed to read from stdout: {e}"),
                })?;

            if bytes_read == 0 {
                return Err(BridgeError::TransportError {
                    server: self.server_name.clone(),
                    reason: "server stdout closed (process may have exited)".into(),
                });
            }

            if line_buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let message = match serde_json::from_slice::<JsonRpcMessage>(&line_buf) {
                Ok(message) => message,
                Err(_) => {
                    tracing::trace!(
                        server = %self.server_name,
                        line = %String::from_utf8_lossy(&line_buf).trim_end(),
                        "skipping non-JSON-RPC line"
                    );
                    continue;
                }
            };

            match message.classify() {
                Some(Incoming::Response(resp)) if resp.id == id => return Ok(resp),
                Some(Incoming::Response(resp)) => {
                    tracing::debug!(
                        server = %self.server_name,
                        expected = id,
                        got = resp.id,
                        "skipping response for another request"
                    );
                }
                Some(Incoming::Request { id: req_id, method }) => {
                    self.answer_server_request(req_id, &method).await?;
                }
                Some(Incoming::Notification { method }) => {
                    tracing::trace!(server = %self.server_name, method = %method, "ignoring server notification");
                }
                Some(Incoming::UnaddressedError(error)) => {
                    tracing::debug!(
                        server = %self.server_name,
                        expected = id,
                        code = error.code,
                        error_message = %error.message,
                        "error reply without id"
                    );
                    return Ok(JsonRpcResponse {
                        id,
                        result: None,
                        error: Some(error),
                    });
                }
                None => {}
            }
        }
    }

    /// Reply to a request the server sent us. Only `ping` is supported.
    async fn answer_server_request(
        &mut self,
        id: serde_json::Value,
        method: &str,
    ) -> Result<(), BridgeError> {
        let reply = if method == "ping" {
            JsonRpcReply {
                jsonrpc: "2.0",
                id,
                result: Some(serde_json::json!({})),
                error: None,
            }
        } else {
            tracing::debug!(server = %self.server_name, method, "rejecting server request");
            JsonRpcReply {
                jsonrpc: "2.0",
                id,
                result: None,
                error: Some(JsonRpcError {
                    code: error_codes::METHOD_NOT_FOUND,
                    message: format!("method not supported by client: {method}"),
                    data: None,
                }),
            }
        };
        self.write_line(&reply).await
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `BridgeError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, BridgeError> {
    if let Some(err) = response.error {
        return Err(BridgeError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(BridgeError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_result_success() {
        let resp = JsonRpcResponse {
            id: 1,
            result: Some(serde_json::json!({"text": "hello"})),
            error: None,
        };
        let result = extract_result(resp).unwrap();
        assert_eq!(result["text"], "hello");
    }

    #[test]
    fn test_extract_result_error() {
        let resp = JsonRpcResponse {
            id: 1,
            result: None,
            error: Some(JsonRpcError {
                code: -32601,
                message: "Method not found".into(),
                data: None,
            }),
        };
        let err = extract_result(resp).unwrap_err();
        match err {
            BridgeError::ServerError { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            _ => panic!("expected ServerError"),
        }
    }

    #[test]
    fn test_extract_result_missing_both() {
        let resp = JsonRpcResponse {
            id: 1,
            result: None,
            error: None,
        };
        let err = extract_result(resp).unwrap_err();
        assert!(matches!(err, BridgeError::ServerError { .. }));
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use std::process::Stdio;
        use tokio::process::{Child, Command};

        fn spawn_script(script: &str) -> (Child, StdioTransport) {
            let mut child = Command::new("sh")
                .arg("-c")
                .arg(script)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .unwrap();
            let stdin = child.stdin.take().unwrap();
            let stdout = child.stdout.take().unwrap();
            (child, StdioTransport::new("test", stdin, stdout))
        }

        #[tokio::test]
        async fn test_skips_noise_until_matching_id() {
            let (mut child, mut transport) = spawn_script(
                r#"read line
echo "server starting on stdio"
echo '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}'
echo '{"jsonrpc":"2.0","id":999,"result":{}}'
echo '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'"#,
            );

            let resp = transport
                .request("tools/list", None, Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(resp.id, 1);
            assert_eq!(resp.result.unwrap()["ok"], true);

            transport.close_stdin();
            let _ = child.wait().await;
        }

        #[tokio::test]
        async fn test_skips_invalid_utf8_line() {
            let (mut child, mut transport) = spawn_script(
                r#"read line
printf 'log \377\376 bytes\n'
echo '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'"#,
            );

            let resp = transport
                .request("initialize", None, Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(resp.result.unwrap()["ok"], true);

            transport.close_stdin();
            let _ = child.wait().await;
        }

        #[tokio::test]
        async fn test_null_id_error_answers_pending_request() {
            let (mut child, mut transport) = spawn_script(
                r#"read line
echo '{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}'
sleep 10"#,
            );

            let resp = transport
                .request("tools/list", None, Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(resp.id, 1);
            match extract_result(resp).unwrap_err() {
                BridgeError::ServerError { code, message, .. } => {
                    assert_eq!(code, -32700);
                    assert_eq!(message, "Parse error");
                }
                other => panic!("expected ServerError, got {other:?}"),
            }

            let _ = child.kill().await;
        }

        #[tokio::test]
        async fn test_eof_is_transport_error() {
            let (mut child, mut transport) = spawn_script("read line; exit 0");
            let err = transport
                .request("initialize", None, Duration::from_secs(5))
                .await
                .unwrap_err();
            assert!(matches!(err, BridgeError::TransportError { .. }), "got {err:?}");
            let _ = child.wait().await;
        }

        #[tokio::test]
        async fn test_silent_server_times_out() {
            let (mut child, mut transport) = spawn_script("read line; sleep 10");
            let err = transport
                .request("initialize", None, Duration::from_millis(200))
                .await
                .unwrap_err();
            match err {
                BridgeError::Timeout {
                    method, timeout_ms, ..
                } => {
                    assert_eq!(method, "initialize");
                    assert_eq!(timeout_ms, 200);
                }
                other => panic!("expected Timeout, got {other:?}"),
            }
            let _ = child.kill().await;
        }

        #[tokio::test]
        async fn test_answers_server_ping() {
            let (mut child, mut transport) = spawn_script(
                r#"read req
echo '{"jsonrpc":"2.0","id":"p1","method":"ping"}'
read reply
case "$reply" in
  *'"id":"p1"'*'"result":{}'*) echo '{"jsonrpc":"2.0","id":1,"result":{"pinged":true}}' ;;
  *) echo '{"jsonrpc":"2.0","id":1,"result":{"pinged":false}}' ;;
esac"#,
            );

            let resp = transport
                .request("tools/list", None, Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(resp.result.unwrap()["pinged"], true);

            transport.close_stdin();
            let _ = child.wait().await;
        }

        #[tokio::test]
        async fn test_write_after_close_fails() {
            let (mut child, mut transport) = spawn_script("cat > /dev/null");
            transport.close_stdin();
            let err = transport.notify("notifications/initialized", None).await.unwrap_err();
            assert!(matches!(err, BridgeError::TransportError { .. }));
            let _ = child.wait().await;
        }
    }
}
