// Error types for the rotation chair controller link

/// Everything that can go wrong between a motion request and the controller
#[derive(Debug, thiserror::Error)]
pub enum ChairError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transport write failed: {0}")]
    TransportWrite(#[source] std::io::Error),

    #[error("Transport read failed: {0}")]
    TransportRead(#[source] std::io::Error),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Recording sink error: {0}")]
    Recording(#[source] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChairError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ChairError::InvalidArgument(reason.into())
    }

    pub(crate) fn precondition(reason: impl Into<String>) -> Self {
        ChairError::PreconditionFailed(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, ChairError>;
