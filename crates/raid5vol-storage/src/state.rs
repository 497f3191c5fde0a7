//! Volume state machine
//!
//! ```text
//!            start (N live)            device lost
//!   STOPPED ───────────────▶ OK ─────────────────▶ DEGRADED
//!      │  start (N-1 live)            ◀────────────   │
//!      ├──────────────────────────────  resync        │ device lost
//!      │  start (<= N-2 live)                         ▼
//!      └────────────────────────────────────────▶  FAILED
//!
//!   any state ── stop ──▶ STOPPED
//! ```
//!
//! All status changes go through [`transition`]. [`VolumeState`] pairs the
//! status with the metadata version and liveness bitmap so that a device
//! can only be marked lost through one path.

use crate::liveness::LivenessMap;
use raid5vol_common::{MIN_DEVICES, VolumeStatus};
use tracing::{error, info, warn};

/// Event that may change the volume status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateEvent {
    /// `start` finished reconciling metadata with `live` of `devices` devices
    ///
    /// A device set that cannot form a volume reports zero devices.
    Started { live: usize, devices: usize },
    /// A previously live device was marked not live
    DeviceLost,
    /// `resync` rebuilt the missing device
    Rebuilt,
    /// `stop` flushed metadata
    Stopped,
}

/// The transition function of the volume status
///
/// # Panics
///
/// Panics on [`StateEvent::Rebuilt`] outside `DEGRADED`, which means the
/// rebuild logic lost track of the status.
#[must_use]
pub fn transition(current: VolumeStatus, event: StateEvent) -> VolumeStatus {
    use VolumeStatus::{Degraded, Failed, Ok, Stopped};

    match (current, event) {
        (Stopped, StateEvent::Started { live, devices }) => {
            if devices < MIN_DEVICES {
                Failed
            } else if live >= devices {
                Ok
            } else if live + 1 == devices {
                Degraded
            } else {
                Failed
            }
        }
        (status, StateEvent::Started { .. }) => status,

        // Stopped only while start or stop is persisting metadata
        (Stopped, StateEvent::DeviceLost) => Stopped,
        (Ok, StateEvent::DeviceLost) => Degraded,
        (Degraded | Failed, StateEvent::DeviceLost) => Failed,

        (Degraded, StateEvent::Rebuilt) => Ok,
        (status, StateEvent::Rebuilt) => {
            panic!("rebuild completed while volume is {status}")
        }

        (_, StateEvent::Stopped) => Stopped,
    }
}

/// In-memory state owned by a volume between `start` and `stop`
#[derive(Clone, Copy, Debug)]
pub struct VolumeState {
    status: VolumeStatus,
    version: u64,
    liveness: LivenessMap,
}

impl Default for VolumeState {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeState {
    /// Stopped state with no devices
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: VolumeStatus::Stopped,
            version: 0,
            liveness: LivenessMap::all_live(0),
        }
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> VolumeStatus {
        self.status
    }

    /// Current metadata version
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Current liveness bitmap
    #[must_use]
    pub const fn liveness(&self) -> LivenessMap {
        self.liveness
    }

    /// Whether a device is live
    #[must_use]
    pub const fn is_live(&self, device: usize) -> bool {
        self.liveness.is_live(device)
    }

    /// Apply an event and return the new status
    pub fn apply(&mut self, event: StateEvent) -> VolumeStatus {
        let next = transition(self.status, event);
        if next != self.status {
            match next {
                VolumeStatus::Failed => error!("volume {} -> {}", self.status, next),
                VolumeStatus::Degraded => warn!("volume {} -> {}", self.status, next),
                _ => info!("volume {} -> {}", self.status, next),
            }
        }
        self.status = next;
        next
    }

    /// Replace version and bitmap with reconciled metadata (start only)
    pub(crate) fn load(&mut self, version: u64, liveness: LivenessMap) {
        self.version = version;
        self.liveness = liveness;
    }

    /// Increment the metadata version and return the new value
    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// Mark a device not live
    ///
    /// Marking a device that is already not live changes nothing. Marking a
    /// live device always advances the status one step towards `FAILED`.
    pub fn mark_failed(&mut self, device: usize) -> VolumeStatus {
        if self.liveness.set_dead(device) {
            warn!(
                "device {} marked failed (liveness {})",
                device, self.liveness
            );
            self.apply(StateEvent::DeviceLost)
        } else {
            self.status
        }
    }

    /// The single not-live device of a degraded volume
    ///
    /// # Panics
    ///
    /// Panics if the bitmap does not hold exactly one not-live device.
    #[must_use]
    pub fn degraded_device(&self) -> usize {
        assert_eq!(
            self.liveness.dead_count(),
            1,
            "{} volume with liveness {}",
            self.status,
            self.liveness
        );
        self.liveness
            .first_dead()
            .unwrap_or_else(|| unreachable!("dead count is one"))
    }

    /// Put the rebuild target back in service before its rows are written
    pub(crate) fn begin_rebuild(&mut self, device: usize) {
        self.liveness.set_live(device);
    }

    /// Take the rebuild target out of service again without a status change
    pub(crate) fn abort_rebuild(&mut self, device: usize) {
        self.liveness.set_dead(device);
    }

    /// Every row of the rebuild target has been written
    pub(crate) fn finish_rebuild(&mut self) -> VolumeStatus {
        self.apply(StateEvent::Rebuilt)
    }
}
