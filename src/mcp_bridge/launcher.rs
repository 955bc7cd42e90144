//! Transport launcher — resolves what to run for a backend.
//!
//! Locates the runtime binary (e.g. `node`) on the search path, resolves the
//! backend's entry point to an absolute path, and builds the invocation
//! descriptor used to spawn one child process per operation.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::errors::BridgeError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake.
///
/// Node servers that load large SDKs can take several seconds to print their
/// first line.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for `tools/list` and `tools/call`.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for the child to exit after stdin is closed before it is killed.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ─── SessionTimeouts ─────────────────────────────────────────────────────────

/// Bounded waits applied to every session of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Wait for the `initialize` response.
    pub handshake: Duration,
    /// Wait for a `tools/list` or `tools/call` response.
    pub request: Duration,
    /// Wait for the child to exit on its own during teardown.
    pub shutdown_grace: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            handshake: DEFAULT_HANDSHAKE_TIMEOUT,
            request: DEFAULT_REQUEST_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

// ─── Backend ─────────────────────────────────────────────────────────────────

/// Immutable description of one logical backend.
#[derive(Clone)]
pub struct Backend {
    name: String,
    entry_point: PathBuf,
    runtime: PathBuf,
    env: Vec<(OsString, OsString)>,
    timeouts: SessionTimeouts,
}

impl Backend {
    /// Describe a backend, resolving `runtime_program` on the search path now.
    ///
    /// The environment is snapshotted here so that credentials the child
    /// needs (API tokens, hosts) are propagated to every spawn.
    pub fn new(
        name: &str,
        entry_point: impl Into<PathBuf>,
        runtime_program: &str,
        timeouts: SessionTimeouts,
    ) -> Result<Self, BridgeError> {
        let runtime = resolve_runtime(runtime_program)?;
        Ok(Self {
            name: name.to_string(),
            entry_point: entry_point.into(),
            runtime,
            env: std::env::vars_os().collect(),
            timeouts,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_point(&self) -> &Path {
        &self.entry_point
    }

    /// Absolute path of the resolved runtime binary.
    pub fn runtime(&self) -> &Path {
        &self.runtime
    }

    pub fn timeouts(&self) -> SessionTimeouts {
        self.timeouts
    }
}

// The environment snapshot carries API tokens; only its size is printed.
impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("entry_point", &self.entry_point)
            .field("runtime", &self.runtime)
            .field("env_vars", &self.env.len())
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// Locate a runtime binary.
///
/// A program containing a path separator must name an executable file
/// directly; a bare name is searched for in every `PATH` directory.
pub fn resolve_runtime(program: &str) -> Result<PathBuf, BridgeError> {
    let unavailable = || BridgeError::RuntimeUnavailable {
        program: program.to_string(),
    };

    if program.is_empty() {
        return Err(unavailable());
    }

    let candidate = Path::new(program);
    if candidate.is_absolute() || candidate.components().count() > 1 {
        let full = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            std::env::current_dir().map_err(|_| unavailable())?.join(candidate)
        };
        return if is_executable(&full) {
            Ok(full)
        } else {
            Err(unavailable())
        };
    }

    let path_var = std::env::var_os("PATH").ok_or_else(unavailable)?;
    for dir in std::env::split_paths(&path_var) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        for name in executable_names(program) {
            let full = dir.join(&name);
            if is_executable(&full) {
                return Ok(full);
            }
        }
    }

    Err(unavailable())
}

/// Resolve an entry point to an absolute, existing file.
///
/// A missing file and any other resolution failure are reported the same way.
pub fn resolve_entry_point(backend: &str, path: &Path) -> Result<PathBuf, BridgeError> {
    let not_found = |reason: String| BridgeError::EntryPointNotFound {
        backend: backend.to_string(),
        path: path.display().to_string(),
        reason,
    };

    let resolved = path.canonicalize().map_err(|e| not_found(e.to_string()))?;
    if !resolved.is_file() {
        return Err(not_found("not a regular file".into()));
    }
    Ok(resolved)
}

/// File names to try for `program` in a search directory.
///
/// Windows also tries each `PATHEXT` extension (`node` → `node.exe`).
fn executable_names(program: &str) -> Vec<OsString> {
    let mut names = vec![OsString::from(program)];
    if cfg!(target_os = "windows") && Path::new(program).extension().is_none() {
        let pathext = std::env::var("PATHEXT").unwrap_or_else(|_| ".EXE;.CMD;.BAT".into());
        for ext in pathext.split(';').filter(|e| !e.is_empty()) {
            names.push(OsString::from(format!("{program}{}", ext.to_ascii_lowercase())));
        }
    }
    names
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ─── LaunchDescriptor ────────────────────────────────────────────────────────

/// Everything needed to spawn one backend child process.
#[derive(Clone)]
pub struct LaunchDescriptor {
    /// Backend name, for diagnostics.
    pub server_name: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
}

impl std::fmt::Debug for LaunchDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchDescriptor")
            .field("server_name", &self.server_name)
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env_vars", &self.env.len())
            .finish()
    }
}

impl LaunchDescriptor {
    /// Build the descriptor for `<runtime> <absolute-entry-point>`.
    pub fn for_backend(backend: &Backend) -> Result<Self, BridgeError> {
        let entry = resolve_entry_point(backend.name(), backend.entry_point())?;
        Ok(Self {
            server_name: backend.name.clone(),
            program: backend.runtime.clone(),
            args: vec![entry.into_os_string()],
            env: backend.env.clone(),
        })
    }

    /// Build the process command with stdio wired for JSON-RPC.
    ///
    /// The child is killed if its handle is dropped, so an abandoned
    /// operation never leaves a process behind.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.env_clear();
        cmd.envs(self.env.iter().map(|(k, v)| (k, v)));

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_runtime_missing() {
        let err = resolve_runtime("definitely-not-a-runtime-4f1c").unwrap_err();
        assert!(matches!(err, BridgeError::RuntimeUnavailable { .. }));
    }

    #[test]
    fn test_resolve_runtime_empty() {
        assert!(resolve_runtime("").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_runtime_on_path() {
        let sh = resolve_runtime("sh").unwrap();
        assert!(sh.is_absolute());
        assert!(sh.ends_with("sh"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_runtime_explicit_path_requires_exec_bit() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fake-node");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(resolve_runtime(path.to_str().unwrap()).is_err());

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(resolve_runtime(path.to_str().unwrap()).unwrap(), path);
    }

    #[test]
    fn test_resolve_entry_point_missing() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("build").join("index.js");
        let err = resolve_entry_point("fortinet", &missing).unwrap_err();
        match err {
            BridgeError::EntryPointNotFound { backend, path, .. } => {
                assert_eq!(backend, "fortinet");
                assert!(path.ends_with("index.js"));
            }
            other => panic!("expected EntryPointNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_entry_point_rejects_directory() {
        let tmp = TempDir::new().unwrap();
        assert!(resolve_entry_point("meraki", tmp.path()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_descriptor_uses_absolute_entry_point() {
        let tmp = TempDir::new().unwrap();
        let entry = tmp.path().join("index.js");
        std::fs::write(&entry, "").unwrap();

        let backend = Backend::new(
            "alpha",
            tmp.path().join(".").join("index.js"),
            "sh",
            SessionTimeouts::default(),
        )
        .unwrap();
        let desc = LaunchDescriptor::for_backend(&backend).unwrap();

        assert_eq!(desc.server_name, "alpha");
        assert_eq!(desc.program, backend.runtime());
        assert_eq!(desc.args.len(), 1);
        let arg = PathBuf::from(&desc.args[0]);
        assert!(arg.is_absolute());
        assert_eq!(arg, entry.canonicalize().unwrap());
        // Inherited environment travels with the descriptor
        assert!(desc.env.iter().any(|(k, _)| k == "PATH"));
    }
}
