//! Top-level error for running the binary.

use thiserror::Error;

use crate::config::ConfigError;
use crate::http::ClientError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("client call failed: {0}")]
    Client(#[from] ClientError),

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("failed to initialize logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
}
