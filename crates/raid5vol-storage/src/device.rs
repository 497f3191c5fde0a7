//! Sector I/O adapter abstraction
//!
//! The volume never touches storage directly. It talks to a [`DeviceSet`],
//! which exposes N equally sized devices addressed by sector. A transfer
//! that moves fewer sectors than requested is a device fault; the adapter
//! does not report errors any other way.
//!
//! # Adapters
//!
//! - [`MemoryDeviceSet`]: RAM-backed devices with failure injection
//! - [`FileDeviceSet`](crate::raw_io::FileDeviceSet): one file or block
//!   device per slot

use parking_lot::RwLock;
use raid5vol_common::SECTOR_SIZE;

/// A fixed set of equally sized sector-addressed devices
pub trait DeviceSet: Send + Sync {
    /// Number of devices (N)
    fn device_count(&self) -> usize;

    /// Sectors on every device (S)
    fn sectors_per_device(&self) -> u64;

    /// Sector size in bytes
    fn sector_size(&self) -> usize {
        SECTOR_SIZE
    }

    /// Read `count` sectors starting at `sector` of `device` into `buf`
    ///
    /// Returns the number of sectors transferred.
    fn read_sectors(&self, device: usize, sector: u64, buf: &mut [u8], count: usize) -> usize;

    /// Write `count` sectors from `buf` starting at `sector` of `device`
    ///
    /// Returns the number of sectors transferred.
    fn write_sectors(&self, device: usize, sector: u64, buf: &[u8], count: usize) -> usize;
}

/// One in-memory device
#[derive(Debug)]
struct MemoryDisk {
    data: Vec<u8>,
    online: bool,
    fail_writes: bool,
}

/// RAM-backed device set
///
/// Devices can be taken offline (every transfer returns 0), made to reject
/// writes only, or swapped for a blank replacement. Used to exercise
/// degraded and failed paths.
#[derive(Debug)]
pub struct MemoryDeviceSet {
    disks: Vec<RwLock<MemoryDisk>>,
    sectors_per_device: u64,
    sector_size: usize,
}

impl MemoryDeviceSet {
    /// Create `devices` zeroed devices of `sectors_per_device` sectors
    #[must_use]
    pub fn new(devices: usize, sectors_per_device: u64, sector_size: usize) -> Self {
        let bytes = sectors_per_device as usize * sector_size;
        let disks = (0..devices)
            .map(|_| {
                RwLock::new(MemoryDisk {
                    data: vec![0u8; bytes],
                    online: true,
                    fail_writes: false,
                })
            })
            .collect();
        Self {
            disks,
            sectors_per_device,
            sector_size,
        }
    }

    /// Take a device offline: reads and writes transfer nothing
    pub fn fail_device(&self, device: usize) {
        if let Some(disk) = self.disks.get(device) {
            disk.write().online = false;
        }
    }

    /// Bring a device back online with its contents intact
    pub fn restore_device(&self, device: usize) {
        if let Some(disk) = self.disks.get(device) {
            disk.write().online = true;
        }
    }

    /// Make writes to a device fail while reads keep working
    pub fn set_fail_writes(&self, device: usize, fail: bool) {
        if let Some(disk) = self.disks.get(device) {
            disk.write().fail_writes = fail;
        }
    }

    /// Swap a device for a blank, healthy one
    pub fn replace_device(&self, device: usize) {
        if let Some(disk) = self.disks.get(device) {
            let mut disk = disk.write();
            disk.data.fill(0);
            disk.online = true;
            disk.fail_writes = false;
        }
    }

    /// Copy of one raw sector, bypassing failure injection
    #[must_use]
    pub fn raw_sector(&self, device: usize, sector: u64) -> Vec<u8> {
        let disk = self.disks[device].read();
        let start = sector as usize * self.sector_size;
        disk.data[start..start + self.sector_size].to_vec()
    }

    /// Overwrite one raw sector, bypassing failure injection
    pub fn put_raw_sector(&self, device: usize, sector: u64, data: &[u8]) {
        let mut disk = self.disks[device].write();
        let start = sector as usize * self.sector_size;
        disk.data[start..start + self.sector_size].copy_from_slice(data);
    }

    /// Byte range of a transfer, or None if it falls outside the device
    fn span(&self, sector: u64, count: usize, buf_len: usize) -> Option<(usize, usize)> {
        let end_sector = sector.checked_add(count as u64)?;
        if count == 0 || end_sector > self.sectors_per_device {
            return None;
        }
        let len = count * self.sector_size;
        if buf_len < len {
            return None;
        }
        let start = sector as usize * self.sector_size;
        Some((start, len))
    }
}

impl DeviceSet for MemoryDeviceSet {
    fn device_count(&self) -> usize {
        self.disks.len()
    }

    fn sectors_per_device(&self) -> u64 {
        self.sectors_per_device
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn read_sectors(&self, device: usize, sector: u64, buf: &mut [u8], count: usize) -> usize {
        let Some(disk) = self.disks.get(device) else {
            return 0;
        };
        let Some((start, len)) = self.span(sector, count, buf.len()) else {
            return 0;
        };
        let disk = disk.read();
        if !disk.online {
            return 0;
        }
        buf[..len].copy_from_slice(&disk.data[start..start + len]);
        count
    }

    fn write_sectors(&self, device: usize, sector: u64, buf: &[u8], count: usize) -> usize {
        let Some(disk) = self.disks.get(device) else {
            return 0;
        };
        let Some((start, len)) = self.span(sector, count, buf.len()) else {
            return 0;
        };
        let mut disk = disk.write();
        if !disk.online || disk.fail_writes {
            return 0;
        }
        disk.data[start..start + len].copy_from_slice(&buf[..len]);
        count
    }
}
