use thiserror::Error;

/// Error kinds surfaced by the crate's fallible entry points.
///
/// Search itself never returns an error (see [`crate::search::job`]): an underfilled
/// result pool is a diagnostic, not a failure. Everything that touches configuration,
/// I/O, or a one-shot bulk operation (`fit`, `save`, `load`, `update_batch_data`,
/// `refine`) returns `Result<_, EngineError>`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt or incompatible snapshot: {0}")]
    Format(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, EngineError>;
