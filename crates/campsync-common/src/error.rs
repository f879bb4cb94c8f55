//! Error types shared across campsync crates

use thiserror::Error;

/// Result type alias for campsync operations
pub type Result<T> = std::result::Result<T, CampsyncError>;

/// Errors that are not specific to one subsystem
#[derive(Error, Debug)]
pub enum CampsyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidSetting { key: String, value: String },
}

impl CampsyncError {
    pub fn config(message: impl Into<String>) -> Self {
        CampsyncError::Config(message.into())
    }
}

/// Read an environment variable and parse it, falling back to `default` when unset.
///
/// A set-but-unparseable value is an error rather than a silent fallback.
pub fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|_| CampsyncError::InvalidSetting {
                    key: key.to_string(),
                    value: raw,
                })
        },
        _ => Ok(default),
    }
}
