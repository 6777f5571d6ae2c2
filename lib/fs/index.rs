//! Composite 64-bit keys derived from an [`ObjectId`].
//!
//! [`VolumeKey`] indexes the volume registry and [`ObjectKey`] indexes the
//! per-volume node tree. Each packs two 32-bit halves, so each is injective
//! over the pair it is built from.

use crate::fs::ObjectId;

/// Identifies a volume: `cell << 32 | volume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeKey(pub u64);

/// Identifies an object within its volume: `vnode << 32 | unique`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(pub u64);

fn pack(high: u32, low: u32) -> u64 {
    (u64::from(high) << 32) | u64::from(low)
}

impl ObjectId {
    /// The key of the volume holding this object.
    #[must_use]
    pub fn high_key(&self) -> VolumeKey {
        VolumeKey(pack(self.cell, self.volume))
    }

    /// The key of this object within its volume.
    #[must_use]
    pub fn low_key(&self) -> ObjectKey {
        ObjectKey(pack(self.vnode, self.unique))
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "each half of a packed key is exactly 32 bits"
)]
impl VolumeKey {
    /// The cell half of the key.
    #[must_use]
    pub const fn cell(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The volume half of the key.
    #[must_use]
    pub const fn volume(self) -> u32 {
        self.0 as u32
    }
}
