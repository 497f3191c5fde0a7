//! Rotating-parity striping geometry
//!
//! Layout of a 4-device volume with `S` sectors per device:
//! ```text
//!            dev0    dev1    dev2    dev3
//! row 0      P       L0      L1      L2
//! row 1      L3      P       L4      L5
//! row 2      L6      L7      P       L8
//! row 3      L9      L10     L11     P
//! row 4      P       L12     L13     L14
//! ...
//! row S-1    footer  footer  footer  footer
//! ```
//!
//! Parity rotates by one device per row; data sectors fill the remaining
//! devices left to right, skipping the parity device.

use crate::codec::ParityError;
use raid5vol_common::{FOOTER_SECTORS, MAX_DEVICES, MIN_DEVICES};

/// Physical placement of one logical sector
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectorLocation {
    /// Sector offset within every device of the row
    pub row: u64,
    /// Device holding the data sector
    pub data_device: usize,
    /// Device holding the row's parity
    pub parity_device: usize,
}

/// Striping geometry of a volume
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    devices: usize,
    sectors_per_device: u64,
}

impl Geometry {
    /// Create a geometry for `devices` devices of `sectors_per_device` sectors each
    pub fn new(devices: usize, sectors_per_device: u64) -> Result<Self, ParityError> {
        if !(MIN_DEVICES..=MAX_DEVICES).contains(&devices) {
            return Err(ParityError::InvalidGeometry(format!(
                "device count {devices} outside {MIN_DEVICES}..={MAX_DEVICES}"
            )));
        }
        if sectors_per_device <= FOOTER_SECTORS {
            return Err(ParityError::InvalidGeometry(format!(
                "{sectors_per_device} sectors per device leaves no data rows"
            )));
        }
        Ok(Self {
            devices,
            sectors_per_device,
        })
    }

    /// Number of devices (N)
    #[must_use]
    pub const fn devices(&self) -> usize {
        self.devices
    }

    /// Number of data devices per row (N - 1)
    #[must_use]
    pub const fn data_devices(&self) -> usize {
        self.devices - 1
    }

    /// Sectors per device, footer included (S)
    #[must_use]
    pub const fn sectors_per_device(&self) -> u64 {
        self.sectors_per_device
    }

    /// Number of data rows (S - 1)
    #[must_use]
    pub const fn rows(&self) -> u64 {
        self.sectors_per_device - FOOTER_SECTORS
    }

    /// Sector index of the metadata footer on every device
    #[must_use]
    pub const fn footer_sector(&self) -> u64 {
        self.sectors_per_device - FOOTER_SECTORS
    }

    /// Logical capacity in sectors: (S - 1) * (N - 1)
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.rows() * self.data_devices() as u64
    }

    /// Row holding logical sector `lba`
    #[must_use]
    pub const fn row(&self, lba: u64) -> u64 {
        lba / self.data_devices() as u64
    }

    /// Parity device of `row`
    #[must_use]
    pub const fn parity_device(&self, row: u64) -> usize {
        (row % self.devices as u64) as usize
    }

    /// Device holding logical sector `lba`
    #[must_use]
    pub const fn data_device(&self, lba: u64) -> usize {
        let slot = (lba % self.data_devices() as u64) as usize;
        if slot >= self.parity_device(self.row(lba)) {
            slot + 1
        } else {
            slot
        }
    }

    /// Resolve a logical sector to its physical placement
    ///
    /// The caller checks `lba < capacity()`.
    #[must_use]
    pub const fn locate(&self, lba: u64) -> SectorLocation {
        let row = self.row(lba);
        SectorLocation {
            row,
            data_device: self.data_device(lba),
            parity_device: self.parity_device(row),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_geometry_limits() {
        assert!(Geometry::new(2, 100).is_err());
        assert!(Geometry::new(17, 100).is_err());
        assert!(Geometry::new(3, 1).is_err());
        assert!(Geometry::new(3, 2).is_ok());
        assert!(Geometry::new(16, 100).is_ok());
    }

    #[test]
    fn test_capacity() {
        let g = Geometry::new(4, 8192).unwrap();
        assert_eq!(g.capacity(), 24573);
        assert_eq!(g.rows(), 8191);
        assert_eq!(g.footer_sector(), 8191);
    }

    #[test]
    fn test_layout_matches_diagram() {
        let g = Geometry::new(4, 64).unwrap();
        let expected = [
            (0, 1, 0),
            (0, 2, 0),
            (0, 3, 0),
            (1, 0, 1),
            (1, 2, 1),
            (1, 3, 1),
            (2, 0, 2),
            (2, 1, 2),
            (2, 3, 2),
            (3, 0, 3),
            (3, 1, 3),
            (3, 2, 3),
            (4, 1, 0),
        ];
        for (lba, &(row, data, parity)) in expected.iter().enumerate() {
            let loc = g.locate(lba as u64);
            assert_eq!(
                (loc.row, loc.data_device, loc.parity_device),
                (row, data, parity),
                "lba {lba}"
            );
        }
    }

    #[test]
    fn test_mapping_is_bijective() {
        for devices in MIN_DEVICES..=MAX_DEVICES {
            let g = Geometry::new(devices, 40).unwrap();
            let mut seen = HashSet::new();
            for lba in 0..g.capacity() {
                let loc = g.locate(lba);
                assert!(loc.row < g.rows());
                assert!(loc.data_device < devices);
                assert_ne!(loc.data_device, loc.parity_device);
                assert!(seen.insert((loc.row, loc.data_device)), "duplicate placement");
            }
            // Every non-parity slot of every data row is used exactly once
            assert_eq!(seen.len() as u64, g.rows() * (devices as u64 - 1));
        }
    }

    #[test]
    fn test_parity_rotation_is_even() {
        let g = Geometry::new(5, 101).unwrap();
        let mut counts = [0u64; 5];
        for row in 0..g.rows() {
            counts[g.parity_device(row)] += 1;
        }
        assert!(counts.iter().all(|&c| c == g.rows() / 5));
    }
}
