use thiserror::Error;

/// Failures of a model-backed extraction. Never reach the caller of
/// [`crate::Extractor::extract`]; they trigger the fallback instead.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The model answered with something that is not the expected JSON.
    #[error("Unparseable model output: {0}")]
    Parse(String),

    #[error("Model returned no candidates")]
    Empty,
}

pub type Result<T> = std::result::Result<T, ExtractError>;
