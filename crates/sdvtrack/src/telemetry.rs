//! Logging initialization.
//!
//! Library code logs through the `log` facade and opens `tracing` spans in
//! the job runner. [`init_logging`] routes both into one `tracing-subscriber`
//! pipeline.

use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

static INIT: Once = Once::new();

/// Installs the global subscriber described by `config`.
///
/// `RUST_LOG` overrides `config.filter`. Safe to call multiple times;
/// subsequent calls are no-ops. An embedding application that already
/// installed its own logger keeps it.
pub fn init_logging(config: &LoggingConfig) {
    INIT.call_once(|| {
        if let Err(e) = tracing_log::LogTracer::init() {
            log::debug!("log records are already routed elsewhere: {}", e);
        }

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.filter));

        let installed = match config.format {
            LogFormat::Json => tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json()),
            ),
            LogFormat::Pretty => tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty()),
            ),
        };
        if installed.is_err() {
            log::debug!("A global tracing subscriber is already installed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        let config = LoggingConfig {
            format: LogFormat::Json,
            filter: "sdvtrack=debug".to_string(),
        };
        init_logging(&config);
        init_logging(&LoggingConfig::default());
        log::info!("logging initialized");
        tracing::info!("tracing initialized");
    }
}
