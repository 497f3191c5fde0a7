//! File-backed device sets
//!
//! Each device slot is a regular file or a block device node. A slot whose
//! backing file is missing or too small stays empty, and every transfer to
//! it moves zero sectors, which the volume treats as a failed device.

use crate::device::DeviceSet;
use raid5vol_common::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Raw file handle for one device slot
pub struct RawFile {
    file: File,
    path: String,
    size: u64,
}

impl RawFile {
    /// Open an existing file or block device for read/write
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::storage(format!("failed to open {path_str}: {e}")))?;

        // Seeking to the end works for both regular files and block devices
        let mut handle = &file;
        let size = handle
            .seek(SeekFrom::End(0))
            .map_err(|e| Error::storage(format!("failed to get size of {path_str}: {e}")))?;

        Ok(Self {
            file,
            path: path_str,
            size,
        })
    }

    /// Create (or truncate) a regular file of `size` zero bytes
    pub fn create(path: impl AsRef<Path>, size: u64) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::storage(format!("failed to create {path_str}: {e}")))?;

        file.set_len(size)
            .map_err(|e| Error::storage(format!("failed to set size for {path_str}: {e}")))?;

        Ok(Self {
            file,
            path: path_str,
            size,
        })
    }

    /// Get the file size
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Get the file path
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read exactly `buf.len()` bytes at `offset`
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::storage(format!("seek failed on {}: {}", self.path, e)))?;
        file.read_exact(buf)
            .map_err(|e| Error::storage(format!("read failed on {}: {}", self.path, e)))
    }

    /// Write all of `buf` at `offset`
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::storage(format!("seek failed on {}: {}", self.path, e)))?;
        file.write_all(buf)
            .map_err(|e| Error::storage(format!("write failed on {}: {}", self.path, e)))
    }

    /// Sync data to disk
    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| Error::storage(format!("sync failed on {}: {}", self.path, e)))
    }
}

/// Device set backed by one file per device
pub struct FileDeviceSet {
    slots: Vec<Option<RawFile>>,
    sectors_per_device: u64,
    sector_size: usize,
}

impl FileDeviceSet {
    /// Create zero-filled backing files for a new volume
    pub fn create<P: AsRef<Path>>(
        paths: &[P],
        sectors_per_device: u64,
        sector_size: usize,
    ) -> Result<Self> {
        let size = sectors_per_device * sector_size as u64;
        let slots = paths
            .iter()
            .map(|path| RawFile::create(path, size).map(Some))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            slots,
            sectors_per_device,
            sector_size,
        })
    }

    /// Open existing backing files
    ///
    /// Files that cannot be opened or are too small leave their slot empty
    /// rather than failing the whole set.
    #[must_use]
    pub fn open<P: AsRef<Path>>(paths: &[P], sectors_per_device: u64, sector_size: usize) -> Self {
        let required = sectors_per_device * sector_size as u64;
        let slots = paths
            .iter()
            .enumerate()
            .map(|(device, path)| match RawFile::open(path) {
                Ok(file) if file.size() >= required => Some(file),
                Ok(file) => {
                    warn!(
                        "device {} ({}) is {} bytes, need {}; treating as failed",
                        device,
                        file.path(),
                        file.size(),
                        required
                    );
                    None
                }
                Err(e) => {
                    warn!("device {} unavailable: {}", device, e);
                    None
                }
            })
            .collect();

        Self {
            slots,
            sectors_per_device,
            sector_size,
        }
    }

    /// Replace one slot with a fresh zero-filled file
    pub fn replace(&mut self, device: usize, path: impl AsRef<Path>) -> Result<()> {
        let size = self.sectors_per_device * self.sector_size as u64;
        let slot = self.slots.get_mut(device).ok_or_else(|| {
            Error::configuration(format!("device index {device} out of range"))
        })?;
        *slot = Some(RawFile::create(path, size)?);
        Ok(())
    }

    /// Whether a slot has an open backing file
    #[must_use]
    pub fn is_present(&self, device: usize) -> bool {
        self.slots.get(device).is_some_and(Option::is_some)
    }

    /// Sync every present backing file
    pub fn sync(&self) -> Result<()> {
        for file in self.slots.iter().flatten() {
            file.sync()?;
        }
        Ok(())
    }

    fn slot(&self, device: usize, sector: u64, count: usize, buf_len: usize) -> Option<(&RawFile, u64, usize)> {
        let file = self.slots.get(device)?.as_ref()?;
        let end = sector.checked_add(count as u64)?;
        let len = count * self.sector_size;
        if count == 0 || end > self.sectors_per_device || buf_len < len {
            return None;
        }
        Some((file, sector * self.sector_size as u64, len))
    }
}

impl DeviceSet for FileDeviceSet {
    fn device_count(&self) -> usize {
        self.slots.len()
    }

    fn sectors_per_device(&self) -> u64 {
        self.sectors_per_device
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn read_sectors(&self, device: usize, sector: u64, buf: &mut [u8], count: usize) -> usize {
        let Some((file, offset, len)) = self.slot(device, sector, count, buf.len()) else {
            return 0;
        };
        match file.read_at(offset, &mut buf[..len]) {
            Ok(()) => count,
            Err(e) => {
                debug!("device {} read at sector {} failed: {}", device, sector, e);
                0
            }
        }
    }

    fn write_sectors(&self, device: usize, sector: u64, buf: &[u8], count: usize) -> usize {
        let Some((file, offset, len)) = self.slot(device, sector, count, buf.len()) else {
            return 0;
        };
        match file.write_at(offset, &buf[..len]) {
            Ok(()) => count,
            Err(e) => {
                debug!("device {} write at sector {} failed: {}", device, sector, e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, tempdir};

    #[test]
    fn test_raw_file_create_and_read() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path();

        {
            let file = RawFile::create(path, 8192).unwrap();
            assert_eq!(file.size(), 8192);
            file.write_at(512, b"test data pattern").unwrap();
            file.sync().unwrap();
        }

        {
            let file = RawFile::open(path).unwrap();
            assert_eq!(file.size(), 8192);
            let mut buf = [0u8; 17];
            file.read_at(512, &mut buf).unwrap();
            assert_eq!(&buf, b"test data pattern");
        }
    }

    #[test]
    fn test_file_device_set_roundtrip() {
        let dir = tempdir().unwrap();
        let paths: Vec<_> = (0..3).map(|i| dir.path().join(format!("disk{i}"))).collect();

        {
            let set = FileDeviceSet::create(&paths, 32, 512).unwrap();
            assert_eq!(set.device_count(), 3);
            let data = vec![0xC3u8; 1024];
            assert_eq!(set.write_sectors(2, 30, &data, 2), 2);
            assert_eq!(set.write_sectors(2, 31, &data, 2), 0);
            set.sync().unwrap();
        }

        let set = FileDeviceSet::open(&paths, 32, 512);
        let mut buf = vec![0u8; 1024];
        assert_eq!(set.read_sectors(2, 30, &mut buf, 2), 2);
        assert_eq!(buf, vec![0xC3u8; 1024]);
    }

    #[test]
    fn test_file_device_set_missing_device() {
        let dir = tempdir().unwrap();
        let paths: Vec<_> = (0..3).map(|i| dir.path().join(format!("disk{i}"))).collect();
        FileDeviceSet::create(&paths, 32, 512).unwrap();
        std::fs::remove_file(&paths[1]).unwrap();

        let mut set = FileDeviceSet::open(&paths, 32, 512);
        assert!(set.is_present(0));
        assert!(!set.is_present(1));

        let mut buf = vec![0u8; 512];
        assert_eq!(set.read_sectors(1, 0, &mut buf, 1), 0);
        assert_eq!(set.write_sectors(1, 0, &buf, 1), 0);

        set.replace(1, &paths[1]).unwrap();
        assert!(set.is_present(1));
        assert_eq!(set.read_sectors(1, 0, &mut buf, 1), 1);
    }

    #[test]
    fn test_file_device_set_short_device() {
        let dir = tempdir().unwrap();
        let paths: Vec<_> = (0..3).map(|i| dir.path().join(format!("disk{i}"))).collect();
        FileDeviceSet::create(&paths, 32, 512).unwrap();
        RawFile::create(&paths[0], 512).unwrap();

        let set = FileDeviceSet::open(&paths, 32, 512);
        assert!(!set.is_present(0));
        assert!(set.is_present(2));
    }
}
