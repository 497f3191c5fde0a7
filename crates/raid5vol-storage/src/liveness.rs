//! Device liveness bitmap
//!
//! One bit per device: 1 = live (trusted for reads and writes), 0 = not
//! live. At most [`MAX_DEVICES`] devices, so the whole map fits in a `u16`
//! and persists as two bytes of the metadata footer.

use raid5vol_common::MAX_DEVICES;
use std::fmt;

/// Bitset of live devices for a volume of `devices` devices
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LivenessMap {
    bits: u16,
    devices: u8,
}

impl LivenessMap {
    /// Map with every device live
    ///
    /// # Panics
    ///
    /// Panics if `devices` exceeds [`MAX_DEVICES`].
    #[must_use]
    pub fn all_live(devices: usize) -> Self {
        assert!(devices <= MAX_DEVICES, "{devices} devices exceed bitmap width");
        Self {
            bits: Self::mask(devices),
            devices: devices as u8,
        }
    }

    /// Load from persisted bits, ignoring bits beyond `devices`
    ///
    /// # Panics
    ///
    /// Panics if `devices` exceeds [`MAX_DEVICES`].
    #[must_use]
    pub fn from_bits(bits: u16, devices: usize) -> Self {
        assert!(devices <= MAX_DEVICES, "{devices} devices exceed bitmap width");
        Self {
            bits: bits & Self::mask(devices),
            devices: devices as u8,
        }
    }

    const fn mask(devices: usize) -> u16 {
        if devices >= 16 {
            u16::MAX
        } else {
            (1u16 << devices) - 1
        }
    }

    /// Persisted representation
    #[must_use]
    pub const fn bits(&self) -> u16 {
        self.bits
    }

    /// Number of devices covered by the map
    #[must_use]
    pub const fn devices(&self) -> usize {
        self.devices as usize
    }

    /// Check if a device is live (out-of-range devices are never live)
    #[must_use]
    pub const fn is_live(&self, device: usize) -> bool {
        device < self.devices as usize && self.bits & (1 << device) != 0
    }

    /// Mark a device live, returns true if it was not live before
    pub fn set_live(&mut self, device: usize) -> bool {
        if device >= self.devices() || self.is_live(device) {
            return false;
        }
        self.bits |= 1 << device;
        true
    }

    /// Mark a device not live, returns true if it was live before
    pub fn set_dead(&mut self, device: usize) -> bool {
        if !self.is_live(device) {
            return false;
        }
        self.bits &= !(1 << device);
        true
    }

    /// Number of live devices
    #[must_use]
    pub const fn live_count(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Number of devices not live
    #[must_use]
    pub const fn dead_count(&self) -> usize {
        self.devices() - self.live_count()
    }

    /// Lowest-numbered device that is not live
    #[must_use]
    pub fn first_dead(&self) -> Option<usize> {
        (0..self.devices()).find(|&d| !self.is_live(d))
    }

    /// Iterate over live device indices in ascending order
    pub fn iter_live(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.devices()).filter(|&d| self.is_live(d))
    }
}

impl fmt::Debug for LivenessMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LivenessMap({self})")
    }
}

/// Renders one character per device, `U` for live and `_` for not live
impl fmt::Display for LivenessMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for device in 0..self.devices() {
            f.write_str(if self.is_live(device) { "U" } else { "_" })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_live() {
        let map = LivenessMap::all_live(4);
        assert_eq!(map.bits(), 0b1111);
        assert_eq!(map.live_count(), 4);
        assert_eq!(map.dead_count(), 0);
        assert_eq!(map.first_dead(), None);
        assert!(!map.is_live(4));

        let full = LivenessMap::all_live(16);
        assert_eq!(full.bits(), u16::MAX);
        assert_eq!(full.live_count(), 16);
    }

    #[test]
    fn test_mark_is_idempotent() {
        let mut map = LivenessMap::all_live(5);
        assert!(map.set_dead(2));
        assert!(!map.set_dead(2));
        assert_eq!(map.dead_count(), 1);
        assert_eq!(map.first_dead(), Some(2));

        assert!(map.set_live(2));
        assert!(!map.set_live(2));
        assert!(!map.set_live(9));
        assert_eq!(map.dead_count(), 0);
    }

    #[test]
    fn test_from_bits_masks_extra_devices() {
        let map = LivenessMap::from_bits(0xFFFF, 3);
        assert_eq!(map.bits(), 0b111);
        assert_eq!(map.live_count(), 3);
    }

    #[test]
    fn test_iter_and_display() {
        let mut map = LivenessMap::all_live(4);
        map.set_dead(1);
        assert_eq!(map.iter_live().collect::<Vec<_>>(), vec![0, 2, 3]);
        assert_eq!(map.to_string(), "U_UU");
    }
}
