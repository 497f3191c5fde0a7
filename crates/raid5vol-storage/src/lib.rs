//! raid5vol Storage Engine - Single-parity volume driver
//!
//! This crate implements the storage engine for raid5vol including:
//! - Sector I/O adapters (in-memory with failure injection, file-backed)
//! - Metadata footer codec and liveness bitmap
//! - Volume state machine (STOPPED / OK / DEGRADED / FAILED)
//! - Parity engine for reconstruction and parity updates
//! - Volume driver with degraded reads and writes
//! - Rebuild and parity scrubbing

pub mod device;
pub mod layout;
pub mod liveness;
mod parity;
pub mod raw_io;
pub mod repair;
pub mod state;
pub mod volume;

// Re-exports
pub use device::{DeviceSet, MemoryDeviceSet};
pub use layout::{FOOTER_SIZE, FORMAT_VERSION, Footer, MAGIC};
pub use liveness::LivenessMap;
pub use raw_io::{FileDeviceSet, RawFile};
pub use repair::ScrubReport;
pub use state::{StateEvent, VolumeState, transition};
pub use volume::{RaidVolume, VolumeStats};
