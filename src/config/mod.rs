pub mod settings;

pub use settings::{AppSettings, SerialSettings};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid settings: {0}")]
    Invalid(String),

    #[error("Settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
