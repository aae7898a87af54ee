use std::path::PathBuf;

use anyhow::Context;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, Naming};

use crate::config;

/// Start file logging with rotation. The hosting process calls this once,
/// before the first core operation; calling it is optional (the core only
/// uses the `log` facade).
pub fn init_logging() -> anyhow::Result<()> {
    let log_dir = resolve_log_dir()?;

    // File logs at debug for postmortems; stderr only carries warnings so the
    // hosting process's own output stays readable.
    Logger::try_with_str("debug")?
        .log_to_file(
            FileSpec::default()
                .directory(log_dir)
                .basename(config::logging::LOG_FILE_NAME),
        )
        .rotate(
            Criterion::Size(config::logging::LOG_ROTATE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(config::logging::LOG_ROTATE_KEEP_FILES),
        )
        .duplicate_to_stderr(Duplicate::Warn)
        .format(flexi_logger::detailed_format)
        .start()
        .context("failed to start logger")?;

    log::info!("{}", "=".repeat(60));
    log::info!("Decormate search core starting");
    log::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    log::info!("Platform: {}", std::env::consts::OS);
    log::info!("{}", "=".repeat(60));

    Ok(())
}

/// Log directory: the deployment override if set, else ~/.decormate/logs.
fn resolve_log_dir() -> anyhow::Result<PathBuf> {
    if let Ok(dir) = std::env::var(config::logging::LOG_DIR_ENV) {
        if !dir.is_empty() {
            let dir = PathBuf::from(dir);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed creating log dir {}", dir.display()))?;
            return Ok(dir);
        }
    }

    let home = home_dir().context("cannot determine home directory for logs")?;
    let dir = home.join(config::logging::LOG_DIR_REL);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed creating log dir {}", dir.display()))?;
    Ok(dir)
}

fn home_dir() -> Option<PathBuf> {
    if let Ok(v) = std::env::var("HOME") {
        if !v.is_empty() {
            return Some(PathBuf::from(v));
        }
    }
    // Windows fallback
    if let Ok(v) = std::env::var("USERPROFILE") {
        if !v.is_empty() {
            return Some(PathBuf::from(v));
        }
    }
    None
}
