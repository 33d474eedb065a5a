use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubqueueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Queue state error: {0}")]
    Store(String),

    #[error("Translation engine error: {0}")]
    Engine(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unknown language code: {0}")]
    UnknownLanguage(String),
}

pub type Result<T> = std::result::Result<T, SubqueueError>;
