// s3-db-backup/src/logging.rs
use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LogConfig;
use crate::errors::{AppError, Result};

/// Installs the global subscriber: stdout always, plus an appending plain-text
/// file when `LOG_FILE` is set. `RUST_LOG` wins over `LOG_LEVEL`.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            AppError::Config(format!("LOG_LEVEL '{}' is not a valid filter: {}", config.level, e))
        })?,
    };

    let file_layer = match &config.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::Config(format!("logging already initialised: {}", e)))
}
