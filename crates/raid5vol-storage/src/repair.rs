//! Rebuild and parity scrub
//!
//! `resync` rebuilds the single not-live device of a degraded volume row by
//! row from the remaining devices. `scrub` walks a healthy volume and checks
//! that every row XORs to zero, optionally rewriting bad parity.

use crate::volume::RaidVolume;
use raid5vol_common::{Error, Result, VolumeStatus};
use raid5vol_parity::ParityAccumulator;
use tracing::{info, warn};

/// Outcome of a parity scrub
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScrubReport {
    /// Rows whose sectors were all read
    pub rows_checked: u64,
    /// Rows whose data does not XOR to their parity
    pub mismatched_rows: u64,
    /// Mismatched rows whose parity was rewritten
    pub repaired_rows: u64,
    /// A device fault ended the scrub early
    pub interrupted: bool,
}

impl ScrubReport {
    /// Whether every row was checked and none mismatched
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        !self.interrupted && self.mismatched_rows == 0
    }
}

impl RaidVolume {
    /// Rebuild the not-live device of a degraded volume
    ///
    /// The device is put back in service, every row is recomputed from the
    /// other devices and written to it, then the all-live record is
    /// persisted. A read fault on another device during the rebuild fails
    /// the volume. A write fault on the rebuild target leaves the volume
    /// degraded with the target still not live.
    ///
    /// Returns the current status unchanged unless the volume is degraded.
    pub fn resync(&mut self) -> VolumeStatus {
        let status = self.state.status();
        let Some(geometry) = self.geometry else {
            return status;
        };
        if status != VolumeStatus::Degraded {
            return status;
        }

        let target = self.state.degraded_device();
        info!(
            "rebuilding device {} ({} rows)",
            target,
            geometry.rows()
        );

        {
            let Ok(mut io) = self.row_io() else {
                return status;
            };
            io.state.begin_rebuild(target);

            for row in 0..geometry.rows() {
                let sector = match io.compute_parity(row, &[target], None) {
                    Ok(sector) => sector,
                    Err(e) => {
                        io.state.abort_rebuild(target);
                        warn!("rebuild of device {} stopped at row {}: {}", target, row, e);
                        return io.state.status();
                    }
                };

                if !io.write_raw(target, row, &sector) {
                    io.state.abort_rebuild(target);
                    io.stats.device_faults += 1;
                    warn!("rebuild target {} rejected row {}", target, row);
                    return io.state.status();
                }
                io.stats.rows_rebuilt += 1;
            }
        }

        self.state.finish_rebuild();
        self.state.bump_version();
        self.persist_metadata();

        info!(
            "device {} rebuilt, volume {} at version {}",
            target,
            self.state.status(),
            self.state.version()
        );
        self.state.status()
    }

    /// Verify the parity of every row
    ///
    /// Only valid while the volume is OK. With `repair`, a mismatched row
    /// gets its parity recomputed from its data sectors. A device fault is
    /// reported like any other and ends the scrub with the rows checked so
    /// far.
    pub fn scrub(&mut self, repair: bool) -> Result<ScrubReport> {
        let status = self.state.status();
        let Some(geometry) = self.geometry else {
            return Err(Error::NotOperational { status });
        };
        if status != VolumeStatus::Ok {
            return Err(Error::NotOperational { status });
        }

        let mut io = self.row_io()?;
        let sector_size = io.sector_size();
        let mut report = ScrubReport::default();

        for row in 0..geometry.rows() {
            let syndrome = match io.fold_row(row, &[], ParityAccumulator::new(sector_size)) {
                Ok(syndrome) => syndrome,
                Err(e) => {
                    warn!("scrub stopped at row {}: {}", row, e);
                    report.interrupted = true;
                    break;
                }
            };
            report.rows_checked += 1;

            if syndrome.is_zero() {
                continue;
            }
            report.mismatched_rows += 1;
            warn!("row {} parity mismatch", row);

            if repair {
                let parity_device = geometry.parity_device(row);
                let repaired = io
                    .compute_parity(row, &[parity_device], None)
                    .and_then(|parity| io.write_sector(parity_device, row, &parity));
                if let Err(e) = repaired {
                    warn!("scrub repair stopped at row {}: {}", row, e);
                    report.interrupted = true;
                    break;
                }
                report.repaired_rows += 1;
            }
        }

        info!(
            "scrub checked {} rows: {} mismatched, {} repaired{}",
            report.rows_checked,
            report.mismatched_rows,
            report.repaired_rows,
            if report.interrupted { " (interrupted)" } else { "" }
        );
        Ok(report)
    }
}
