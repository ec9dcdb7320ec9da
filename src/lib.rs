pub mod agent_core;
pub mod inference;
pub mod mcp_client;

use std::path::{Path, PathBuf};

use anyhow::Context;

use inference::config::{find_config_path, load_config};

pub use agent_core::{AgentError, ChatSession, TurnReport};
pub use inference::ChorusConfig;

/// File name of the conversation database inside the data directory.
pub const DB_FILE_NAME: &str = "chorus.db";

/// File name of the active log inside the log directory.
pub const LOG_FILE_NAME: &str = "chorus.log";

/// Return the platform-standard data directory for Chorus.
///
/// - macOS: `~/Library/Application Support/chorus/`
/// - Windows: `{FOLDERID_RoamingAppData}\chorus\`
/// - Linux: `$XDG_DATA_HOME/chorus/` (fallback `~/.local/share/chorus/`)
///
/// Falls back to `~/.chorus/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("chorus");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chorus")
}

/// Initialize the tracing subscriber, writing to `<log_dir>/chorus.log`.
///
/// On each startup:
/// 1. Rotates existing logs (chorus.log → chorus.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh chorus.log with a line-flushing writer.
/// 3. Logs a startup banner with the log path.
///
/// `RUST_LOG` overrides the default `chorus=info,warn` filter. Returns the
/// path of the active log file.
pub fn init_tracing(log_dir: &Path) -> anyhow::Result<PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let log_path = log_dir.join(LOG_FILE_NAME);
    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chorus=info,warn"));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== Chorus starting ==="
    );

    Ok(log_path)
}

/// Rotate log files: `chorus.log` → `chorus.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so each
/// log line is on disk immediately.
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

/// Path of the conversation database inside `dir` (created if needed).
pub fn resolve_db_path(dir: &Path) -> anyhow::Result<String> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create data directory {}", dir.display()))?;
    Ok(dir.join(DB_FILE_NAME).to_string_lossy().into_owned())
}

/// Locate and load `chorus.yaml`, open the database in the platform data
/// directory, and fetch the tool catalog.
///
/// A tool server that cannot be reached is not fatal: the session starts
/// without tools and the failure sits in `last_error()`.
pub async fn open_session(start_dir: &Path) -> anyhow::Result<ChatSession> {
    let config_path = find_config_path(start_dir).context("no chorus.yaml found")?;
    let config = load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let db_path = resolve_db_path(&data_dir())?;

    let session = ChatSession::from_config(&config, &db_path)
        .with_context(|| format!("failed to open session at {db_path}"))?;

    if config.tool_server.is_some() {
        if let Err(e) = session.load_tools().await {
            tracing::warn!(error = %e, "starting without tools");
        }
    }

    tracing::info!(
        config = %config_path.display(),
        db_path = %db_path,
        "session ready"
    );
    Ok(session)
}
