use runlog_abstraction::{SummaryError, TrackingError};
use thiserror::Error;

pub type WriterResult<T> = std::result::Result<T, WriterError>;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("missing required configuration key '{key}'")]
    MissingConfiguration { key: String },

    #[error("tracking service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("env config conversion failed: {0}")]
    ConversionFailure(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Remote(#[from] TrackingError),

    #[error(transparent)]
    Summary(#[from] SummaryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl WriterError {
    pub(crate) fn missing(key: &str) -> Self {
        Self::MissingConfiguration { key: key.to_string() }
    }
}
