pub mod config;
pub mod mcp_bridge;

use std::path::Path;

use crate::config::LogSettings;

/// Log file name inside the configured log directory.
const LOG_FILE_NAME: &str = "bridge.log";

/// Rotated log files kept next to the current one.
const LOG_FILES_KEPT: u32 = 3;

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "netdiag_bridge=info,warn";

/// Initialize the tracing subscriber.
///
/// Without a log directory, logs go to stderr (stdout carries command
/// output). With one, existing logs are rotated (bridge.log → bridge.log.1 →
/// .2 → .3) and a fresh bridge.log is opened with a line-flushing writer.
pub fn init_tracing(settings: &LogSettings) -> std::io::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let log_path = match &settings.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let path = dir.join(LOG_FILE_NAME);
            rotate_log_file(&path, LOG_FILES_KEPT);
            Some(path)
        }
        None => None,
    };

    let installed = match &log_path {
        Some(path) => {
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let builder = fmt::fmt()
                .with_env_filter(filter)
                .with_writer(FlushingWriter::new(log_file))
                .with_ansi(false)
                .with_target(true);
            if settings.json {
                builder.json().try_init()
            } else {
                builder.try_init()
            }
        }
        None => {
            let builder = fmt::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true);
            if settings.json {
                builder.json().try_init()
            } else {
                builder.try_init()
            }
        }
    };
    installed.map_err(|e| std::io::Error::other(e.to_string()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?log_path.as_ref().map(|p| p.display().to_string()),
        pid = std::process::id(),
        "=== netdiag-bridge starting ==="
    );
    Ok(())
}

/// Rotate log files: `bridge.log` → `bridge.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let numbered = |i: u32| format!("{}.{i}", base_path.display());

    let _ = std::fs::remove_file(numbered(keep));

    for i in (1..keep).rev() {
        let _ = std::fs::rename(numbered(i), numbered(i + 1));
    }

    if base_path.exists() {
        let _ = std::fs::rename(base_path, numbered(1));
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// Each log line is on disk as soon as it is emitted, so a killed bridge
/// still leaves a complete log.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
