use thiserror::Error;

#[derive(Debug, Error)]
pub enum WhisprError {
    /// The config file or environment could not be read into [`crate::config::WhisprConfig`].
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, WhisprError>;
