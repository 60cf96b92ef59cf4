//! Deterministic checksums for saved snapshots.
//!
//! Every Save update reports a checksum of the snapshot it produced, and peers
//! compare those checksums to spot desynchronization. The hash therefore has to
//! agree across processes and platforms, which rules out the randomly seeded
//! `std` hasher. FNV-1a is used instead.
//!
//! ```
//! use netplay_rollback::hash::snapshot_checksum;
//!
//! let snapshot = [0x10, 0x20, 0x30];
//! assert_eq!(snapshot_checksum(&snapshot), snapshot_checksum(&snapshot));
//! assert_ne!(snapshot_checksum(&snapshot), snapshot_checksum(&[0x10, 0x20]));
//! ```
//!
//! FNV-1a is NOT cryptographically secure. It only has to tell two honest peers
//! apart when their states drift.

use std::hash::Hasher;

/// FNV-1a 64-bit offset basis constant.
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a 64-bit prime constant.
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// A deterministic hasher using the FNV-1a algorithm.
#[derive(Debug, Clone)]
pub struct DeterministicHasher {
    state: u64,
}

impl DeterministicHasher {
    /// Creates a new `DeterministicHasher` with the standard FNV-1a offset basis.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: FNV_OFFSET_BASIS,
        }
    }
}

impl Default for DeterministicHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for DeterministicHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.state
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }
}

/// Checksums the raw bytes of a serialized snapshot.
///
/// No length prefix is mixed in, so the result is the textbook FNV-1a digest
/// of `snapshot`.
#[inline]
#[must_use]
pub fn snapshot_checksum(snapshot: &[u8]) -> u64 {
    let mut hasher = DeterministicHasher::new();
    hasher.write(snapshot);
    hasher.finish()
}
