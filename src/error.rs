//! Error handling for the traffic controller

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A specific camera source exhausted its retry budget
    #[error("camera {camera} failed after {attempts} attempts")]
    SourceFailed { camera: usize, attempts: u32 },

    /// Every configured camera source exhausted its retry budget
    #[error("all camera sources exhausted ({tried} tried)")]
    AllSourcesExhausted { tried: usize },

    /// Detector service unreachable or returned a failure
    #[error("detector unavailable: {0}")]
    DetectionUnavailable(String),

    /// Detector call exceeded its bounded wait
    #[error("detector timed out after {0}ms")]
    DetectionTimeout(u64),

    /// Malformed counts (negative or missing) from the detector
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Bad timing or capture configuration
    #[error("config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

