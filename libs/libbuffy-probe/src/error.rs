//! Error types for observer operations

use libbuffy::{Direction, LayoutError};
use thiserror::Error;

/// Observer error types
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Target memory backend failed
    #[error("Memory access failed: {0}")]
    Memory(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Descriptor header did not decode
    #[error("Invalid descriptor: {0}")]
    Layout(#[from] LayoutError),

    /// A ring index was out of range; the observer never repairs indices
    #[error("{ring} ring index out of range: head {head}, tail {tail}, capacity {capacity}")]
    IndexOutOfRange {
        /// Ring concerned
        ring: Direction,
        /// Head read
        head: u32,
        /// Tail read
        tail: u32,
        /// Ring size
        capacity: u32,
    },

    /// Configuration file did not parse
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for observer operations
pub type Result<T> = std::result::Result<T, ProbeError>;

impl ProbeError {
    /// Wrap a memory backend error
    pub fn memory<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self::Memory(Box::new(error))
    }

    /// Whether retrying after the target settles can succeed
    ///
    /// Uninitialized descriptors and transiently inconsistent indices are
    /// expected while the target boots or resets.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::IndexOutOfRange { .. } | Self::Layout(LayoutError::Uninitialized(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable() {
        let err = ProbeError::IndexOutOfRange {
            ring: Direction::Outbound,
            head: 99,
            tail: 0,
            capacity: 16,
        };
        assert!(err.is_recoverable());
        assert!(ProbeError::from(LayoutError::Uninitialized(Direction::Inbound)).is_recoverable());
        assert!(!ProbeError::from(LayoutError::UnknownSignature(0)).is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = ProbeError::IndexOutOfRange {
            ring: Direction::Inbound,
            head: 8,
            tail: 1,
            capacity: 8,
        };
        assert_eq!(
            err.to_string(),
            "inbound ring index out of range: head 8, tail 1, capacity 8"
        );
    }
}
