//! Error types for the sigma-delta modulator

use thiserror::Error;

/// Result type alias using `SdmError`
pub type Result<T> = std::result::Result<T, SdmError>;

/// Broad classification of an [`SdmError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Construction parameters were rejected; no modulator was built
    Configuration,
    /// A streaming call received unusable buffers; instance state is untouched
    InvalidArgument,
    /// A streaming call was made in the wrong lifecycle phase
    InvalidState,
}

/// Sigma-delta modulator errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SdmError {
    /// No noise-shaping filter is registered under this name
    #[error("Unknown noise-shaping filter: {0}")]
    UnknownFilter(String),

    /// The filter cannot be realised at this sample rate
    #[error("Unsupported sample rate for filter {filter}: {freq} Hz")]
    UnsupportedRate { filter: String, freq: u32 },

    /// Trellis order out of range
    #[error("Invalid trellis order: {0} (must be 1-{max})", max = crate::SDM_TRELLIS_MAX_ORDER)]
    InvalidTrellisOrder(u32),

    /// Trellis width out of range
    #[error("Invalid trellis width: {0} (must be 1-{max})", max = crate::SDM_TRELLIS_MAX_NUM)]
    InvalidTrellisNum(u32),

    /// Trellis latency out of range
    #[error("Invalid trellis latency: {0} (must be 0-{max})", max = crate::SDM_TRELLIS_MAX_LAT)]
    InvalidTrellisLatency(u32),

    /// Output buffer has no room although there is data to write
    #[error("Output buffer is empty")]
    EmptyOutput,

    /// Output buffer cannot hold the bytes a packet call may produce
    #[error("Output buffer too small: need {required} bytes, got {actual}")]
    BufferTooSmall { required: usize, actual: usize },

    /// The instance is bound to the other streaming API
    #[error("Modulator is streaming through the {0} API")]
    SurfaceMismatch(&'static str),

    /// Input was fed after draining started
    #[error("Modulator is draining; no further input is accepted")]
    AlreadyDraining,
}

impl SdmError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownFilter(_)
            | Self::UnsupportedRate { .. }
            | Self::InvalidTrellisOrder(_)
            | Self::InvalidTrellisNum(_)
            | Self::InvalidTrellisLatency(_) => ErrorKind::Configuration,
            Self::EmptyOutput | Self::BufferTooSmall { .. } => ErrorKind::InvalidArgument,
            Self::SurfaceMismatch(_) | Self::AlreadyDraining => ErrorKind::InvalidState,
        }
    }

    /// Whether this error was raised while building a modulator
    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}
