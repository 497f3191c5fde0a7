//! Error types for raid5vol
//!
//! This module defines the common error types used throughout the system.

use crate::types::VolumeStatus;
use thiserror::Error;

/// Common result type for raid5vol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for raid5vol
#[derive(Debug, Error)]
pub enum Error {
    // Host errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    // Configuration errors
    #[error("invalid device count {count}: must be between {min} and {max}")]
    InvalidDeviceCount { count: usize, min: usize, max: usize },

    #[error("metadata footer of {footer} bytes does not fit in a {sector} byte sector")]
    FooterTooLarge { footer: usize, sector: usize },

    #[error("device too small: {sectors} sectors, need at least {required}")]
    DeviceTooSmall { sectors: u64, required: u64 },

    #[error("configuration error: {0}")]
    Configuration(String),

    // Metadata errors
    #[error("invalid metadata footer: {0}")]
    InvalidFooter(String),

    #[error("failed to write metadata to devices {failed:?}")]
    MetadataWrite { failed: Vec<usize> },

    // Volume errors
    #[error("volume is not operational: {status}")]
    NotOperational { status: VolumeStatus },

    #[error("sector range {start}+{count} exceeds volume size {size}")]
    OutOfRange { start: u64, count: u64, size: u64 },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("device {device} fault at sector {sector}")]
    DeviceFault { device: usize, sector: u64 },

    #[error("parity error: {0}")]
    Parity(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this error was caused by a misbehaving device
    #[must_use]
    pub const fn is_device_fault(&self) -> bool {
        matches!(
            self,
            Self::DeviceFault { .. } | Self::DiskIo(_) | Self::MetadataWrite { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_device_fault() {
        assert!(Error::DeviceFault { device: 1, sector: 7 }.is_device_fault());
        assert!(Error::MetadataWrite { failed: vec![0] }.is_device_fault());
        assert!(!Error::storage("x").is_device_fault());
    }

    #[test]
    fn test_error_display() {
        let err = Error::OutOfRange {
            start: 10,
            count: 4,
            size: 12,
        };
        assert_eq!(err.to_string(), "sector range 10+4 exceeds volume size 12");

        let err = Error::NotOperational {
            status: VolumeStatus::Failed,
        };
        assert_eq!(err.to_string(), "volume is not operational: FAILED");
    }
}
