//! Logging setup for the pipeline's worker threads.
//!
//! Every stage runs on a named `faceflow-*` thread, so the log format
//! records thread names: that is the only way to attribute a message to a
//! stage once several pipelines run in one process. On Linux the journald
//! backend is preferred; elsewhere, or when the journal socket is missing,
//! logs roll into a daily file.

use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Install the global subscriber. The level comes from `FACEFLOW_LOG`
/// (standard `EnvFilter` syntax, e.g. `faceflow=debug`), defaulting to
/// `info`.
pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env("FACEFLOW_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer)
                .init();

            tracing::info!("logging to journald");
            return Ok(());
        }
    }

    let log_dir = log_dir.unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("faceflow")
            .join("logs")
    });
    std::fs::create_dir_all(&log_dir)?;

    let appender = tracing_appender::rolling::daily(&log_dir, "faceflow.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    // The guard flushes the writer thread on drop; park it for the process
    // lifetime.
    let _ = FILE_GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_thread_names(true)
                .with_ansi(false),
        )
        .init();

    tracing::info!(dir = %log_dir.display(), "logging to file");
    Ok(())
}
