//! raid5vol Parity - Striping geometry and XOR parity
//!
//! This crate provides the two pure building blocks of a single-parity
//! volume:
//! - **Geometry**: maps a logical sector to its row, data device and
//!   rotating parity device
//! - **Codec**: XOR accumulation used both to compute parity and to
//!   reconstruct a missing sector from the rest of its row
//!
//! # Example
//!
//! ```
//! use raid5vol_parity::{Geometry, ParityAccumulator};
//!
//! let geometry = Geometry::new(4, 8192).unwrap();
//! assert_eq!(geometry.capacity(), 24573);
//!
//! let loc = geometry.locate(0);
//! assert_eq!((loc.row, loc.parity_device, loc.data_device), (0, 0, 1));
//!
//! let mut acc = ParityAccumulator::new(4);
//! acc.fold(&[1, 2, 3, 4]).unwrap();
//! acc.fold(&[1, 2, 3, 4]).unwrap();
//! assert!(acc.is_zero());
//! ```

pub mod codec;
pub mod geometry;

pub use codec::{ParityAccumulator, ParityError, xor_into};
pub use geometry::{Geometry, SectorLocation};
