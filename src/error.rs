use thiserror::Error;

/// Track beacon error types
#[derive(Error, Debug)]
pub enum BeaconError {
    #[error("Tracking already running")]
    AlreadyRunning,

    #[error("Tracking not running")]
    NotRunning,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Messaging backend rejected request: {0}")]
    Backend(String),

    #[error("Position source error: {0}")]
    PositionSource(String),
}

/// Result type for engine operations
pub type BeaconResult<T> = Result<T, BeaconError>;

impl BeaconError {
    /// Operator-facing wording, used when a command reply carries the error.
    pub fn user_message(&self) -> String {
        match self {
            BeaconError::AlreadyRunning => "Location tracking is already running".to_string(),
            BeaconError::NotRunning => "Location tracking is not running".to_string(),
            BeaconError::InvalidArgument(msg) => msg.clone(),
            other => format!("Error: {}", other),
        }
    }
}
