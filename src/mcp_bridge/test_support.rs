//! Fake MCP server used by the process-level tests.
//!
//! The server is a POSIX shell script run with `sh`. It appends its pid to
//! `pids` and every line it receives to `requests.log`, both next to the
//! script, so tests can check process cleanup and what was sent.

use std::path::{Path, PathBuf};

/// A minimal stdio MCP server with tools `ping`, `fail`, `whoami` on the
/// first `tools/list` page and `page_two` on the second.
pub const FAKE_SERVER: &str = r#"dir=$(dirname "$0")
echo $$ >> "$dir/pids"
while IFS= read -r line; do
  printf '%s\n' "$line" >> "$dir/requests.log"
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-06-18","capabilities":{"tools":{}},"serverInfo":{"name":"fake-server","version":"0.1.0"}}}\n' "$id" ;;
    *'"method":"tools/list"'*'"cursor":"p2"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"page_two","description":"Second page","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      echo "fake-server: listing tools" >&2
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"ping","description":"Reply with pong","inputSchema":{"type":"object","properties":{},"required":[]}},{"name":"fail","description":"Always fails","inputSchema":{"type":"object"}},{"name":"whoami","description":"Report the server pid","inputSchema":{"type":"object"}}],"nextCursor":"p2"}}\n' "$id" ;;
    *'"method":"tools/call"'*'"name":"ping"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id" ;;
    *'"method":"tools/call"'*'"name":"fail"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32603,"message":"tool failed"}}\n' "$id" ;;
    *'"method":"tools/call"'*'"name":"whoami"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"%s"}]}}\n' "$id" "$$" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"Unknown tool"}}\n' "$id" ;;
  esac
done
"#;

/// Write a script into `dir` and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

/// Pids recorded by fake servers started from `dir`.
pub fn recorded_pids(dir: &Path) -> Vec<u32> {
    std::fs::read_to_string(dir.join("pids"))
        .unwrap_or_default()
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

/// Lines received by fake servers started from `dir`.
pub fn recorded_requests(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("requests.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Whether a process with this pid still exists (zombies included).
pub fn process_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}
