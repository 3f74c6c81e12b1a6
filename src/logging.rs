use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use std::path::Path;
use std::sync::OnceLock;

const LOG_FILE_BASENAME: &str = "campusd";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

static LOGGER: OnceLock<LoggerHandle> = OnceLock::new();

/// Starts rolling file logs under `<workspace>/logs`. Called on workspace
/// selection; later calls are no-ops so the first workspace of a process
/// keeps the log target. Logging failures never fail the caller.
pub fn init(workspace: &Path) -> Result<(), String> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let log_dir = workspace.join("logs");
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| format!("failed to create log directory {}: {e}", log_dir.display()))?;

    let handle = Logger::try_with_env_or_str("info")
        .map_err(|e| format!("bad log spec: {e}"))?
        .log_to_file(
            FileSpec::default()
                .directory(&log_dir)
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(MAX_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|e| format!("failed to start logger: {e}"))?;

    let _ = LOGGER.set(handle);
    log::info!(
        "event=daemon_start version={} workspace={}",
        env!("CARGO_PKG_VERSION"),
        workspace.display()
    );
    Ok(())
}
