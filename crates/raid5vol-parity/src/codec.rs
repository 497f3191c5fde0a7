//! XOR parity codec
//!
//! Single parity is the XOR of every data sector in a row. XOR is its own
//! inverse, so the same accumulation computes parity from data, recovers a
//! missing data sector from the rest of the row, and folds a changed sector
//! into existing parity.

use raid5vol_common::Error as CommonError;
use thiserror::Error;

/// Errors specific to parity operations
#[derive(Debug, Error)]
pub enum ParityError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("sector size mismatch: expected {expected} bytes, got {actual}")]
    SectorSizeMismatch { expected: usize, actual: usize },
}

impl From<ParityError> for CommonError {
    fn from(e: ParityError) -> Self {
        Self::Parity(e.to_string())
    }
}

/// XOR `src` into `dst` byte by byte
pub fn xor_into(dst: &mut [u8], src: &[u8]) -> Result<(), ParityError> {
    if dst.len() != src.len() {
        return Err(ParityError::SectorSizeMismatch {
            expected: dst.len(),
            actual: src.len(),
        });
    }
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
    Ok(())
}

/// Running XOR over the sectors of one row
#[derive(Clone, Debug)]
pub struct ParityAccumulator {
    acc: Vec<u8>,
}

impl ParityAccumulator {
    /// Start from an all-zero sector
    #[must_use]
    pub fn new(sector_size: usize) -> Self {
        Self {
            acc: vec![0u8; sector_size],
        }
    }

    /// Start from a sector the caller already holds
    #[must_use]
    pub fn seeded(seed: &[u8]) -> Self {
        Self { acc: seed.to_vec() }
    }

    /// Fold one more sector into the accumulator
    pub fn fold(&mut self, sector: &[u8]) -> Result<(), ParityError> {
        xor_into(&mut self.acc, sector)
    }

    /// Replace `old` with `new` in the accumulated parity
    pub fn fold_delta(&mut self, old: &[u8], new: &[u8]) -> Result<(), ParityError> {
        self.fold(old)?;
        self.fold(new)
    }

    /// Whether the accumulated XOR is all zeros (a consistent full row)
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.acc.iter().all(|&b| b == 0)
    }

    /// View the accumulated sector
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.acc
    }

    /// Take the accumulated sector
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn random_sector(len: usize) -> Vec<u8> {
        let mut sector = vec![0u8; len];
        rand::thread_rng().fill(&mut sector[..]);
        sector
    }

    #[test]
    fn test_xor_into_size_mismatch() {
        let mut dst = vec![0u8; 8];
        let err = xor_into(&mut dst, &[1u8; 4]).unwrap_err();
        assert!(matches!(
            err,
            ParityError::SectorSizeMismatch {
                expected: 8,
                actual: 4
            }
        ));
    }

    #[test]
    fn test_reconstruct_missing_sector() {
        let data: Vec<Vec<u8>> = (0..5).map(|_| random_sector(512)).collect();

        let mut parity = ParityAccumulator::new(512);
        for sector in &data {
            parity.fold(sector).unwrap();
        }
        let parity = parity.finish();

        for missing in 0..data.len() {
            let mut acc = ParityAccumulator::seeded(&parity);
            for (i, sector) in data.iter().enumerate() {
                if i != missing {
                    acc.fold(sector).unwrap();
                }
            }
            assert_eq!(acc.finish(), data[missing]);
        }
    }

    #[test]
    fn test_fold_delta_matches_recompute() {
        let mut data: Vec<Vec<u8>> = (0..3).map(|_| random_sector(64)).collect();

        let mut parity = ParityAccumulator::new(64);
        for sector in &data {
            parity.fold(sector).unwrap();
        }

        let new = random_sector(64);
        parity.fold_delta(&data[1], &new).unwrap();
        data[1] = new;

        let mut full = ParityAccumulator::new(64);
        for sector in &data {
            full.fold(sector).unwrap();
        }
        assert_eq!(parity.as_slice(), full.as_slice());

        // A full row including parity XORs to zero
        full.fold(parity.as_slice()).unwrap();
        assert!(full.is_zero());
    }
}
