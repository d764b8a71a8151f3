use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Domain value errors
    #[error("Invalid card identifier: {0}")]
    InvalidCardId(String),

    #[error("Invalid direction: {0}")]
    InvalidDirection(String),

    #[error("Invalid device type: {0}")]
    InvalidDeviceKind(String),

    #[error("Invalid environment: {0}")]
    InvalidEnvironment(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing configuration key: {0}")]
    MissingConfig(String),

    #[error("Failed to parse configuration file {path}: {message}")]
    ConfigParse { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
