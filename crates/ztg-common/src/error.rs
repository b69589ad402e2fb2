//! Error types shared across ZTG crates

use thiserror::Error;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
