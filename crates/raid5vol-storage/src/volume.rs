//! Single-parity volume driver
//!
//! [`RaidVolume`] presents N devices as one logical disk of
//! `(S - 1) * (N - 1)` sectors. Its lifecycle is:
//!
//! 1. [`RaidVolume::create`] writes a version 1, all-live footer to every
//!    device (no volume object needed).
//! 2. [`RaidVolume::start`] reconciles the footers, persists the merged
//!    record and moves to OK, DEGRADED or FAILED.
//! 3. [`RaidVolume::read`] and [`RaidVolume::write`] serve logical sectors,
//!    falling back to parity when a device is not live.
//! 4. [`RaidVolume::stop`] flushes the footer and returns to STOPPED.
//!
//! Dropping a started volume without `stop` leaves the footers as they were,
//! the same as a crash.

use crate::device::DeviceSet;
use crate::layout::Footer;
use crate::liveness::LivenessMap;
use crate::parity::RowIo;
use crate::state::{StateEvent, VolumeState};
use raid5vol_common::{Error, FOOTER_SECTORS, MAX_DEVICES, MIN_DEVICES, Result, VolumeStatus};
use raid5vol_parity::{Geometry, ParityAccumulator};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Volume statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VolumeStats {
    /// Logical sectors returned to callers
    pub sectors_read: u64,
    /// Logical sectors accepted from callers
    pub sectors_written: u64,
    /// Reads served by XOR of the rest of the row
    pub reconstructed_reads: u64,
    /// Writes that skipped a not-live data or parity device
    pub degraded_writes: u64,
    /// Short transfers reported by the device set
    pub device_faults: u64,
    /// Rows written to a rebuild target
    pub rows_rebuilt: u64,
    /// Footer sectors written
    pub metadata_writes: u64,
}

/// A single-parity volume over a [`DeviceSet`]
pub struct RaidVolume {
    pub(crate) devices: Option<Arc<dyn DeviceSet>>,
    pub(crate) geometry: Option<Geometry>,
    pub(crate) state: VolumeState,
    pub(crate) stats: VolumeStats,
}

impl Default for RaidVolume {
    fn default() -> Self {
        Self::new()
    }
}

impl RaidVolume {
    /// Create a stopped volume with no devices attached
    #[must_use]
    pub fn new() -> Self {
        Self {
            devices: None,
            geometry: None,
            state: VolumeState::new(),
            stats: VolumeStats::default(),
        }
    }

    /// Initialize a device set as a new volume
    ///
    /// Every device gets a version 1 footer with all devices live. Data
    /// sectors are left as they are; parity is consistent only if the
    /// devices start zeroed. A device whose footer write fails is reported
    /// in the error, the others stay initialized.
    pub fn create(devices: &dyn DeviceSet) -> Result<()> {
        let count = devices.device_count();
        if !(MIN_DEVICES..=MAX_DEVICES).contains(&count) {
            return Err(Error::InvalidDeviceCount {
                count,
                min: MIN_DEVICES,
                max: MAX_DEVICES,
            });
        }

        let sectors = devices.sectors_per_device();
        if sectors <= FOOTER_SECTORS {
            return Err(Error::DeviceTooSmall {
                sectors,
                required: FOOTER_SECTORS + 1,
            });
        }

        let geometry = Geometry::new(count, sectors)?;
        let footer = Footer::initial(count, sectors).to_sector(devices.sector_size())?;

        let failed: Vec<usize> = (0..count)
            .filter(|&device| {
                devices.write_sectors(device, geometry.footer_sector(), &footer, 1) != 1
            })
            .collect();

        if failed.is_empty() {
            info!(
                "created volume: {} devices, {} sectors each, capacity {} sectors",
                count,
                sectors,
                geometry.capacity()
            );
            Ok(())
        } else {
            error!("create failed to write footer to devices {:?}", failed);
            Err(Error::MetadataWrite { failed })
        }
    }

    /// Attach a device set and bring the volume up
    ///
    /// Returns the current status unchanged if the volume is not stopped.
    pub fn start(&mut self, devices: Arc<dyn DeviceSet>) -> VolumeStatus {
        if self.state.status() != VolumeStatus::Stopped {
            return self.state.status();
        }

        let count = devices.device_count();
        let geometry = match Geometry::new(count, devices.sectors_per_device()) {
            Ok(geometry) if Footer::SIZE <= devices.sector_size() => geometry,
            Ok(_) => {
                error!(
                    "cannot start: footer does not fit in {} byte sectors",
                    devices.sector_size()
                );
                return self.state.apply(StateEvent::Started { live: 0, devices: 0 });
            }
            Err(e) => {
                error!("cannot start: {}", e);
                return self.state.apply(StateEvent::Started { live: 0, devices: 0 });
            }
        };

        // Scan footers in device order. A device the reference record already
        // marks dead stays dead whatever its own footer says. Otherwise a
        // strictly newer footer becomes the reference and every device
        // scanned before it is untrusted.
        let mut version = 0;
        let mut liveness = LivenessMap::all_live(count);
        for device in 0..count {
            match Self::read_footer(devices.as_ref(), &geometry, device) {
                Some(footer) if !liveness.is_live(device) => {
                    debug!(
                        "device {} (footer version {}) is not live at version {}",
                        device, footer.version, version
                    );
                }
                Some(footer) if footer.version > version => {
                    version = footer.version;
                    liveness = footer.liveness;
                    for earlier in 0..device {
                        liveness.set_dead(earlier);
                    }
                }
                Some(footer) if footer.version == version => {}
                Some(footer) => {
                    debug!(
                        "device {} footer version {} is stale (reference {})",
                        device, footer.version, version
                    );
                    liveness.set_dead(device);
                }
                None => {
                    liveness.set_dead(device);
                }
            }
        }

        self.state.load(version, liveness);
        self.devices = Some(devices);
        self.geometry = Some(geometry);

        self.state.bump_version();
        self.persist_metadata();

        let live = self.state.liveness().live_count();
        let status = self.state.apply(StateEvent::Started {
            live,
            devices: count,
        });
        info!(
            "volume started: {} with {}/{} devices live [{}], version {}",
            status,
            live,
            count,
            self.state.liveness(),
            self.state.version()
        );
        status
    }

    /// Flush metadata and detach the device set
    pub fn stop(&mut self) -> VolumeStatus {
        if self.state.status() == VolumeStatus::Stopped {
            return VolumeStatus::Stopped;
        }

        if self.devices.is_some() {
            self.state.bump_version();
            self.persist_metadata();
        }
        let status = self.state.apply(StateEvent::Stopped);
        info!("volume stopped at version {}", self.state.version());

        self.devices = None;
        self.geometry = None;
        status
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> VolumeStatus {
        self.state.status()
    }

    /// Logical size in sectors, 0 unless OK or DEGRADED
    #[must_use]
    pub fn size(&self) -> u64 {
        match self.geometry {
            Some(geometry) if self.state.status().is_operational() => geometry.capacity(),
            _ => 0,
        }
    }

    /// Current metadata version
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.state.version()
    }

    /// Liveness bitmap of the attached devices
    #[must_use]
    pub const fn live_devices(&self) -> LivenessMap {
        self.state.liveness()
    }

    /// Lowest-numbered device that is not live, if any
    #[must_use]
    pub fn failed_device(&self) -> Option<usize> {
        self.geometry.and_then(|_| self.state.liveness().first_dead())
    }

    /// Geometry of the attached device set
    #[must_use]
    pub const fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    /// Statistics since this volume object was created
    #[must_use]
    pub const fn stats(&self) -> VolumeStats {
        self.stats
    }

    /// Read `buf.len() / sector_size` logical sectors starting at `start`
    pub fn read(&mut self, start: u64, buf: &mut [u8]) -> Result<()> {
        let geometry = self.check_request(start, buf.len())?;
        let mut io = self.row_io()?;
        let sector_size = io.sector_size();

        for (lba, chunk) in (start..).zip(buf.chunks_exact_mut(sector_size)) {
            Self::read_sector(&mut io, &geometry, lba, chunk)?;
        }
        Ok(())
    }

    /// Write `data.len() / sector_size` logical sectors starting at `start`
    pub fn write(&mut self, start: u64, data: &[u8]) -> Result<()> {
        let geometry = self.check_request(start, data.len())?;
        let mut io = self.row_io()?;
        let sector_size = io.sector_size();

        for (lba, chunk) in (start..).zip(data.chunks_exact(sector_size)) {
            Self::write_sector(&mut io, &geometry, lba, chunk)?;
        }
        Ok(())
    }

    fn read_sector(io: &mut RowIo<'_>, geometry: &Geometry, lba: u64, buf: &mut [u8]) -> Result<()> {
        let loc = geometry.locate(lba);

        if io.state.is_live(loc.data_device) {
            match io.read_sector(loc.data_device, loc.row, buf) {
                Ok(()) => {
                    io.stats.sectors_read += 1;
                    return Ok(());
                }
                Err(e) if !io.state.status().is_operational() => return Err(e),
                Err(_) => {
                    debug!("sector {} falls back to reconstruction", lba);
                }
            }
        }

        let sector = io.compute_parity(loc.row, &[loc.data_device], None)?;
        buf.copy_from_slice(&sector);
        io.stats.sectors_read += 1;
        io.stats.reconstructed_reads += 1;
        Ok(())
    }

    fn write_sector(io: &mut RowIo<'_>, geometry: &Geometry, lba: u64, data: &[u8]) -> Result<()> {
        let loc = geometry.locate(lba);
        let (row, data_device, parity_device) = (loc.row, loc.data_device, loc.parity_device);

        match (io.state.is_live(data_device), io.state.is_live(parity_device)) {
            (true, true) => {
                let mut old = vec![0u8; data.len()];
                io.read_sector(data_device, row, &mut old)?;
                let mut parity = vec![0u8; data.len()];
                io.read_sector(parity_device, row, &mut parity)?;

                let mut acc = ParityAccumulator::seeded(&parity);
                acc.fold_delta(&old, data)?;

                io.write_sector(data_device, row, data)?;
                io.write_sector(parity_device, row, acc.as_slice())?;
            }
            (false, true) => {
                let parity = io.compute_parity(row, &[parity_device, data_device], Some(data))?;
                io.write_sector(parity_device, row, &parity)?;
                io.stats.degraded_writes += 1;
            }
            (true, false) => {
                io.write_sector(data_device, row, data)?;
                io.stats.degraded_writes += 1;
            }
            (false, false) => {
                return Err(Error::NotOperational {
                    status: io.state.status(),
                });
            }
        }

        io.stats.sectors_written += 1;
        Ok(())
    }

    /// Validate a request and return the geometry to map it with
    fn check_request(&self, start: u64, len: usize) -> Result<Geometry> {
        let status = self.state.status();
        let (Some(geometry), Some(devices)) = (self.geometry, self.devices.as_deref()) else {
            return Err(Error::NotOperational { status });
        };
        if !status.is_operational() {
            return Err(Error::NotOperational { status });
        }

        let sector_size = devices.sector_size();
        if len % sector_size != 0 {
            return Err(Error::BufferSize {
                expected: len.next_multiple_of(sector_size),
                actual: len,
            });
        }

        let count = (len / sector_size) as u64;
        let size = geometry.capacity();
        match start.checked_add(count) {
            Some(end) if end <= size => Ok(geometry),
            _ => Err(Error::OutOfRange { start, count, size }),
        }
    }

    /// Row I/O over the attached device set
    pub(crate) fn row_io(&mut self) -> Result<RowIo<'_>> {
        let status = self.state.status();
        let devices = self
            .devices
            .as_deref()
            .ok_or(Error::NotOperational { status })?;
        Ok(RowIo {
            devices,
            state: &mut self.state,
            stats: &mut self.stats,
        })
    }

    /// Read and validate one device's footer
    fn read_footer(devices: &dyn DeviceSet, geometry: &Geometry, device: usize) -> Option<Footer> {
        let mut sector = vec![0u8; devices.sector_size()];
        if devices.read_sectors(device, geometry.footer_sector(), &mut sector, 1) != 1 {
            warn!("device {} footer is unreadable", device);
            return None;
        }

        match Footer::from_bytes(&sector) {
            Ok(footer) if footer.matches(geometry) => Some(footer),
            Ok(footer) => {
                warn!(
                    "device {} footer is for {} devices of {} sectors",
                    device,
                    footer.liveness.devices(),
                    footer.sectors_per_device
                );
                None
            }
            Err(e) => {
                warn!("device {}: {}", device, e);
                None
            }
        }
    }

    /// Write the in-memory record to every live device
    ///
    /// A failed write marks that device not live, bumps the version and
    /// restarts the pass. Each restart removes one live device, so there
    /// are at most N + 1 passes.
    pub(crate) fn persist_metadata(&mut self) {
        let Some(geometry) = self.geometry else {
            return;
        };
        let Ok(mut io) = self.row_io() else {
            return;
        };

        for _ in 0..=geometry.devices() {
            let footer = Footer::new(
                io.state.version(),
                geometry.sectors_per_device(),
                io.state.liveness(),
            );
            let sector = match footer.to_sector(io.sector_size()) {
                Ok(sector) => sector,
                Err(e) => {
                    error!("cannot encode footer: {}", e);
                    return;
                }
            };

            let mut failed = None;
            for device in footer.liveness.iter_live() {
                if io
                    .write_sector(device, geometry.footer_sector(), &sector)
                    .is_err()
                {
                    failed = Some(device);
                    break;
                }
                io.stats.metadata_writes += 1;
            }

            match failed {
                None => {
                    debug!(
                        "persisted metadata version {} [{}]",
                        footer.version, footer.liveness
                    );
                    return;
                }
                Some(device) => {
                    let version = io.state.bump_version();
                    warn!(
                        "footer write to device {} failed, retrying at version {}",
                        device, version
                    );
                }
            }
        }
    }
}
