use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Unexpected processor faults.
///
/// Expected domain outcomes (no usable samples, unsupported type) are not
/// errors; they are `ProcessingResult`s with `success = false`.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Invalid processor configuration: {0}")]
    Config(String),

    #[error("Processor {processor} failed to initialize: {reason}")]
    Initialization { processor: String, reason: String },

    #[error("Processor {processor} was used before initialize()")]
    NotInitialized { processor: String },

    #[error("Internal processor fault: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProcessorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
