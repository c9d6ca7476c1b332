use thiserror::Error;

/// Failures reported by a price source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// A context or session could not be provisioned
    #[error("Acquisition failed: {0}")]
    Acquisition(String),

    /// The source exposes no price signal for this symbol
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// A single read failed; the next one may succeed
    #[error("Transient read failure: {0}")]
    Transient(String),

    /// The source is permanently gone for this session
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    /// Whether the session that produced this error can keep polling
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;
