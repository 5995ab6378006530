use thiserror::Error;

/// Pipeline error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Binary envelope failed type or shape expectations
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Text frame is not a recognizable control message
    #[error("Unparseable control message: {0}")]
    UnparseableControlMessage(String),

    /// Underlying connection failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Structured filter could not be evaluated (bad regex)
    #[error("Filter evaluation error: {0}")]
    FilterEvaluation(String),

    /// Configuration rejected at startup
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error from I/O operations
    #[error("I/O error: {0}")]
    Io(String),

    /// Error from JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(String),

    /// The pipeline task has stopped and no longer accepts commands
    #[error("Pipeline is closed")]
    PipelineClosed,
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Json(e.to_string())
    }
}

impl From<prost::DecodeError> for PipelineError {
    fn from(e: prost::DecodeError) -> Self {
        PipelineError::MalformedFrame(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for PipelineError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        PipelineError::Transport(e.to_string())
    }
}

/// Result type for the pipeline
pub type PipelineResult<T> = Result<T, PipelineError>;
