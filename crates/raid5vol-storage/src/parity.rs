//! Parity engine
//!
//! Row-level I/O for a started volume. Every transfer goes through the
//! [`DeviceSet`]; a short transfer marks the device failed in the
//! [`VolumeState`] before the fault is returned, so callers only decide
//! whether to retry through parity or give up.

use crate::device::DeviceSet;
use crate::state::VolumeState;
use crate::volume::VolumeStats;
use raid5vol_common::{Error, Result};
use raid5vol_parity::ParityAccumulator;
use tracing::debug;

/// Borrowed view of a started volume used for one operation
pub(crate) struct RowIo<'a> {
    pub(crate) devices: &'a dyn DeviceSet,
    pub(crate) state: &'a mut VolumeState,
    pub(crate) stats: &'a mut VolumeStats,
}

impl RowIo<'_> {
    pub(crate) fn sector_size(&self) -> usize {
        self.devices.sector_size()
    }

    pub(crate) fn device_count(&self) -> usize {
        self.devices.device_count()
    }

    /// Read one sector without reporting a fault to the state machine
    pub(crate) fn read_raw(&self, device: usize, sector: u64, buf: &mut [u8]) -> bool {
        self.devices.read_sectors(device, sector, buf, 1) == 1
    }

    /// Write one sector without reporting a fault to the state machine
    pub(crate) fn write_raw(&self, device: usize, sector: u64, buf: &[u8]) -> bool {
        self.devices.write_sectors(device, sector, buf, 1) == 1
    }

    fn fault(&mut self, device: usize, sector: u64) -> Error {
        self.stats.device_faults += 1;
        self.state.mark_failed(device);
        Error::DeviceFault { device, sector }
    }

    /// Read one sector, marking the device failed on a short transfer
    pub(crate) fn read_sector(&mut self, device: usize, sector: u64, buf: &mut [u8]) -> Result<()> {
        if self.read_raw(device, sector, buf) {
            Ok(())
        } else {
            Err(self.fault(device, sector))
        }
    }

    /// Write one sector, marking the device failed on a short transfer
    pub(crate) fn write_sector(&mut self, device: usize, sector: u64, buf: &[u8]) -> Result<()> {
        if self.write_raw(device, sector, buf) {
            Ok(())
        } else {
            Err(self.fault(device, sector))
        }
    }

    /// XOR the row sector of every device not in `exclude`
    ///
    /// With `seed`, the accumulator starts from that sector instead of
    /// zeros. Every device that takes part must be live; a device that is
    /// already not live fails the call without a new fault, a failed read
    /// marks the device failed.
    pub(crate) fn compute_parity(
        &mut self,
        row: u64,
        exclude: &[usize],
        seed: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let acc = seed.map_or_else(
            || ParityAccumulator::new(self.sector_size()),
            ParityAccumulator::seeded,
        );
        self.fold_row(row, exclude, acc).map(ParityAccumulator::finish)
    }

    /// Fold the row sector of every device not in `exclude` into `acc`
    pub(crate) fn fold_row(
        &mut self,
        row: u64,
        exclude: &[usize],
        mut acc: ParityAccumulator,
    ) -> Result<ParityAccumulator> {
        let mut buf = vec![0u8; self.sector_size()];

        for device in 0..self.device_count() {
            if exclude.contains(&device) {
                continue;
            }
            if !self.state.is_live(device) {
                debug!("row {} needs device {} which is not live", row, device);
                return Err(Error::DeviceFault {
                    device,
                    sector: row,
                });
            }
            self.read_sector(device, row, &mut buf)?;
            acc.fold(&buf)?;
        }

        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDeviceSet;
    use crate::liveness::LivenessMap;
    use crate::state::StateEvent;
    use raid5vol_common::VolumeStatus;

    fn started_state(devices: usize) -> VolumeState {
        let mut state = VolumeState::new();
        state.load(2, LivenessMap::all_live(devices));
        state.apply(StateEvent::Started {
            live: devices,
            devices,
        });
        state
    }

    #[test]
    fn test_compute_parity_and_reconstruct() {
        let set = MemoryDeviceSet::new(4, 8, 16);
        for device in 0..3 {
            set.put_raw_sector(device, 0, &[device as u8 + 1; 16]);
        }
        let mut state = started_state(4);
        let mut stats = VolumeStats::default();
        let mut io = RowIo {
            devices: &set,
            state: &mut state,
            stats: &mut stats,
        };

        let parity = io.compute_parity(0, &[3], None).unwrap();
        assert_eq!(parity, vec![1 ^ 2 ^ 3; 16]);
        set.put_raw_sector(3, 0, &parity);

        // Recover device 1 from the others, parity included
        let recovered = io.compute_parity(0, &[1], None).unwrap();
        assert_eq!(recovered, vec![2u8; 16]);

        // Fold replacement data for device 0 into fresh parity
        let folded = io.compute_parity(0, &[0, 3], Some(&[9u8; 16])).unwrap();
        assert_eq!(folded, vec![9 ^ 2 ^ 3; 16]);
    }

    #[test]
    fn test_fold_row_syndrome() {
        let set = MemoryDeviceSet::new(3, 8, 16);
        set.put_raw_sector(0, 1, &[0x5A; 16]);
        set.put_raw_sector(1, 1, &[0x0F; 16]);
        set.put_raw_sector(2, 1, &[0x5A ^ 0x0F; 16]);
        let mut state = started_state(3);
        let mut stats = VolumeStats::default();
        let mut io = RowIo {
            devices: &set,
            state: &mut state,
            stats: &mut stats,
        };

        let syndrome = io.fold_row(1, &[], ParityAccumulator::new(16)).unwrap();
        assert!(syndrome.is_zero());

        set.put_raw_sector(1, 1, &[0xF0; 16]);
        let syndrome = io.fold_row(1, &[], ParityAccumulator::new(16)).unwrap();
        assert!(!syndrome.is_zero());
        assert_eq!(syndrome.as_slice(), &[0x0F ^ 0xF0; 16]);
    }

    #[test]
    fn test_compute_parity_reports_fault() {
        let set = MemoryDeviceSet::new(3, 8, 16);
        let mut state = started_state(3);
        let mut stats = VolumeStats::default();
        set.fail_device(1);

        let mut io = RowIo {
            devices: &set,
            state: &mut state,
            stats: &mut stats,
        };
        let err = io.compute_parity(0, &[2], None).unwrap_err();
        assert!(matches!(err, Error::DeviceFault { device: 1, sector: 0 }));
        assert_eq!(io.state.status(), VolumeStatus::Degraded);
        assert_eq!(io.stats.device_faults, 1);

        // The dead device is not re-marked and not read again
        let err = io.compute_parity(0, &[0], None).unwrap_err();
        assert!(matches!(err, Error::DeviceFault { device: 1, .. }));
        assert_eq!(io.state.status(), VolumeStatus::Degraded);
        assert_eq!(io.stats.device_faults, 1);
    }
}
