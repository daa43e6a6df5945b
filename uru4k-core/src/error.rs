//! Error types for uru4k-core

use crate::mode::Mode;

/// Result type alias for uru4k-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Frame is shorter than its metadata or its declared payload
    #[error("Frame too small: expected at least {expected} bytes, got {actual} bytes")]
    FrameTooSmall {
        expected: usize,
        actual: usize,
    },

    /// Declared line count outside 1..=max
    #[error("Invalid line count: {lines} (expected 1..={max})")]
    InvalidLineCount {
        lines: u16,
        max: u16,
    },

    /// Unknown register address
    #[error("Unknown register address: 0x{0:02X}")]
    UnknownRegister(u16),

    /// Unknown mode value
    #[error("Unknown mode value: 0x{0:02X}")]
    UnknownMode(u8),

    /// Mode write not allowed from the current state
    #[error("Invalid mode transition: {from:?} -> {to}")]
    InvalidTransition {
        from: Option<Mode>,
        to: Mode,
    },
}

impl Error {
    /// Check if error came from frame decoding
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::FrameTooSmall { .. } | Self::InvalidLineCount { .. }
        )
    }
}
