use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::fmt::{format::Writer, time::FormatTime};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths::get_data_dir;

const LOG_PREFIX: &str = "gateway";

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().to_rfc3339())
    }
}

/// Daily `gateway.YYYY-MM-DD.log` files under `dir`
fn file_appender(dir: &Path) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .build(dir)
}

/// Install the global subscriber: console always, `<data dir>/logs` when it can be
/// opened. `RUST_LOG` overrides `level`.
///
/// The returned guard flushes the file writer on drop; keep it for the process
/// lifetime.
pub fn init_logger(level: &str) -> Option<WorkerGuard> {
    let _ = tracing_log::LogTracer::init();

    let appender = get_data_dir()
        .map(|dir| dir.join("logs"))
        .and_then(|dir| file_appender(&dir).map_err(|e| e.to_string()));

    let (file_layer, guard) = match appender {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!("file logging disabled: {}", e);
            (None, None)
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_timer(LocalTimer))
        .with(file_layer)
        .try_init();

    tracing::info!(
        "logging at {} (file: {})",
        level,
        if guard.is_some() { "on" } else { "off" }
    );
    guard
}
