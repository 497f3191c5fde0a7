//! Core type definitions for raid5vol
//!
//! Volume-wide limits and the operational status shared by the storage
//! engine and the binaries.

use derive_more::Display;

/// Default sector size in bytes
pub const SECTOR_SIZE: usize = 512;

/// Minimum number of devices in a single-parity volume
pub const MIN_DEVICES: usize = 3;

/// Maximum number of devices (one liveness bit per device in a `u16`)
pub const MAX_DEVICES: usize = 16;

/// Sectors reserved at the end of every device for the metadata footer
pub const FOOTER_SECTORS: u64 = 1;

/// Operational status of a volume
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display)]
pub enum VolumeStatus {
    /// Not started, or cleanly stopped
    #[default]
    #[display("STOPPED")]
    Stopped,
    /// All devices live
    #[display("OK")]
    Ok,
    /// Exactly one device not live, data served through parity
    #[display("DEGRADED")]
    Degraded,
    /// More than one device unusable
    #[display("FAILED")]
    Failed,
}

impl VolumeStatus {
    /// Whether reads and writes are permitted in this status
    #[must_use]
    pub const fn is_operational(self) -> bool {
        matches!(self, Self::Ok | Self::Degraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_operational() {
        assert!(VolumeStatus::Ok.is_operational());
        assert!(VolumeStatus::Degraded.is_operational());
        assert!(!VolumeStatus::Failed.is_operational());
        assert!(!VolumeStatus::Stopped.is_operational());
        assert_eq!(VolumeStatus::Degraded.to_string(), "DEGRADED");
    }
}
