//! Error types for Sortie.

use thiserror::Error;

/// Primary error type for all Sortie operations.
#[derive(Error, Debug)]
pub enum SortieError {
    #[error("Malformed instruction source: {0}")]
    DataFormat(String),

    #[error("Checkpoint identifier {identifier:?} is not in the instruction list")]
    CheckpointMismatch { identifier: String },

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        retry_after_secs: Option<u64>,
        message: String,
    },

    #[error("Protocol invariant violated: {0}")]
    ProtocolInvariant(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SortieError {
    /// Short variant name, used as the title when an error is rendered.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataFormat(_) => "DataFormatError",
            Self::CheckpointMismatch { .. } => "CheckpointMismatchError",
            Self::Driver(_) => "DriverError",
            Self::RateLimited { .. } => "RateLimitError",
            Self::ProtocolInvariant(_) => "ProtocolInvariantViolation",
            Self::Configuration(_) => "ConfigurationError",
            Self::Authentication(_) => "AuthenticationError",
            Self::Render(_) => "RenderError",
            Self::InvalidState(_) => "InvalidStateError",
            Self::Io(_) => "IoError",
            Self::Serialization(_) => "SerializationError",
        }
    }
}

impl From<toml::de::Error> for SortieError {
    fn from(error: toml::de::Error) -> Self {
        Self::Configuration(error.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SortieError>;
