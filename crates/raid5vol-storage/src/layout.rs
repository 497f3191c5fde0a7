//! On-disk layout definitions
//!
//! Device Layout:
//! ```text
//! +------------------+  Sector 0
//! |   Data / Parity  |  Rows 0..S-1, parity rotating per row
//! |                  |
//! +------------------+  Sector S-1
//! |   Footer         |  Magic, metadata version, liveness bitmap
//! +------------------+
//! ```
//!
//! Every device carries an identical footer when the volume is clean. The
//! footer is little-endian, checksummed with CRC32C and zero-padded to a
//! full sector.

use crate::liveness::LivenessMap;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use raid5vol_common::{Error, MAX_DEVICES, MIN_DEVICES, Result};
use raid5vol_parity::Geometry;

/// Magic number for the footer format
pub const MAGIC: [u8; 8] = *b"RAID5VOL";

/// Current footer format version
pub const FORMAT_VERSION: u32 = 1;

/// Encoded footer size in bytes
pub const FOOTER_SIZE: usize = Footer::SIZE;

/// Metadata record stored in the last sector of every device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Footer {
    /// Metadata version, bumped on every stop and metadata repair
    pub version: u64,
    /// Sectors per device the volume was created with
    pub sectors_per_device: u64,
    /// Devices trusted when this footer was written
    pub liveness: LivenessMap,
}

impl Footer {
    /// Footer size in bytes
    pub const SIZE: usize = 36;

    /// Offset of the checksum field: magic(8) + format(4) + version(8) +
    /// devices(1) + reserved(1) + liveness(2) + sectors(8) = 32
    const CHECKSUM_OFFSET: usize = 32;

    /// Create a footer
    #[must_use]
    pub const fn new(version: u64, sectors_per_device: u64, liveness: LivenessMap) -> Self {
        Self {
            version,
            sectors_per_device,
            liveness,
        }
    }

    /// Footer written by `create`: version 1, every device live
    #[must_use]
    pub fn initial(devices: usize, sectors_per_device: u64) -> Self {
        Self::new(1, sectors_per_device, LivenessMap::all_live(devices))
    }

    /// Serialize to exactly [`Footer::SIZE`] bytes
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);

        buf.put_slice(&MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u64_le(self.version);
        buf.put_u8(self.liveness.devices() as u8);
        buf.put_u8(0);
        buf.put_u16_le(self.liveness.bits());
        buf.put_u64_le(self.sectors_per_device);

        let checksum = crc32c::crc32c(&buf[..Self::CHECKSUM_OFFSET]);
        buf.put_u32_le(checksum);

        buf.freeze()
    }

    /// Serialize and zero-pad to one sector
    pub fn to_sector(&self, sector_size: usize) -> Result<Bytes> {
        if Self::SIZE > sector_size {
            return Err(Error::FooterTooLarge {
                footer: Self::SIZE,
                sector: sector_size,
            });
        }
        let mut buf = BytesMut::with_capacity(sector_size);
        buf.put_slice(&self.to_bytes());
        buf.resize(sector_size, 0);
        Ok(buf.freeze())
    }

    /// Parse from bytes (a full sector or just the footer)
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::InvalidFooter(format!(
                "{} bytes is smaller than a footer",
                data.len()
            )));
        }

        let stored = u32::from_le_bytes([
            data[Self::CHECKSUM_OFFSET],
            data[Self::CHECKSUM_OFFSET + 1],
            data[Self::CHECKSUM_OFFSET + 2],
            data[Self::CHECKSUM_OFFSET + 3],
        ]);

        let mut buf = &data[..Self::CHECKSUM_OFFSET];

        let mut magic = [0u8; 8];
        buf.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(Error::InvalidFooter("bad magic".into()));
        }

        let format = buf.get_u32_le();
        if format != FORMAT_VERSION {
            return Err(Error::InvalidFooter(format!(
                "unsupported format version: {format}"
            )));
        }

        let computed = crc32c::crc32c(&data[..Self::CHECKSUM_OFFSET]);
        if computed != stored {
            return Err(Error::InvalidFooter(format!(
                "checksum mismatch: computed={computed:08x}, stored={stored:08x}"
            )));
        }

        let version = buf.get_u64_le();
        let devices = usize::from(buf.get_u8());
        let _reserved = buf.get_u8();
        let bits = buf.get_u16_le();
        let sectors_per_device = buf.get_u64_le();

        if version == 0 {
            return Err(Error::InvalidFooter("zero metadata version".into()));
        }
        if !(MIN_DEVICES..=MAX_DEVICES).contains(&devices) {
            return Err(Error::InvalidFooter(format!(
                "device count {devices} out of range"
            )));
        }

        Ok(Self {
            version,
            sectors_per_device,
            liveness: LivenessMap::from_bits(bits, devices),
        })
    }

    /// Whether this footer was written for a volume of this geometry
    #[must_use]
    pub fn matches(&self, geometry: &Geometry) -> bool {
        self.liveness.devices() == geometry.devices()
            && self.sectors_per_device == geometry.sectors_per_device()
    }
}
