//! Logging setup.
//!
//! Installs a `tracing-subscriber` registry from a [`LoggingConfig`]: an
//! `EnvFilter` (honouring `RUST_LOG` when set, otherwise the configured
//! level), plus a console layer and/or a file layer, each plain or JSON.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

/// Initialize the global subscriber.
///
/// Fails if a global subscriber is already installed or the log file cannot
/// be opened.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.log_to_console {
        let layer = fmt::layer().with_target(true).with_thread_ids(true);
        if config.json_format {
            layers.push(layer.json().boxed());
        } else {
            layers.push(layer.boxed());
        }
    }

    if config.log_to_file {
        let path = config.log_file_path.as_deref().ok_or_else(|| {
            ProtocolError::ConfigError(
                "log_file_path must be specified when log_to_file is true".to_string(),
            )
        })?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open log file: {e}")))?;
        let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
        if config.json_format {
            layers.push(layer.json().boxed());
        } else {
            layers.push(layer.boxed());
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| ProtocolError::ConfigError(format!("Failed to install subscriber: {e}")))?;

    info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}
