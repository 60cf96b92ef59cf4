//! Ring buffer of serialized emulator snapshots used during rollback.
//!
//! The transport never asks to load a frame older than its prediction window, so
//! the store keeps `rollback_window + 2` snapshots and overwrites them in place,
//! indexed by `frame % capacity`. Slot buffers grow to the largest snapshot seen
//! and are never shrunk while the session runs, so steady-state saves do not
//! allocate. An optional per-slot limit caps how far a slot may grow.

use std::collections::TryReserveError;

use crate::error::NetplayError;
use crate::Frame;

/// One snapshot and the frame it was taken at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveStateSlot {
    frame: Frame,
    data: Vec<u8>,
}

impl Default for SaveStateSlot {
    fn default() -> Self {
        Self {
            frame: Frame::NULL,
            data: Vec::new(),
        }
    }
}

impl SaveStateSlot {
    /// Frame of the stored snapshot, or [`Frame::NULL`] if the slot was never written.
    #[must_use]
    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// The stored snapshot bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes the slot can hold without reallocating.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Returns `true` if the slot was never written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frame.is_null()
    }

    // The old snapshot stays intact until the slot is known to fit the new one.
    fn store(&mut self, frame: Frame, bytes: &[u8]) -> Result<(), TryReserveError> {
        self.data
            .try_reserve(bytes.len().saturating_sub(self.data.len()))?;
        self.data.clear();
        self.data.extend_from_slice(bytes);
        self.frame = frame;
        Ok(())
    }
}

/// Fixed-size ring of [`SaveStateSlot`]s.
///
/// Only the tick loop touches the store, so it carries no locking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveStateStore {
    slots: Vec<SaveStateSlot>,
    slot_limit: Option<usize>,
}

impl SaveStateStore {
    /// Creates an empty store. Call [`SaveStateStore::resize`] before use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with `capacity` empty slots.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut store = Self::new();
        store.resize(capacity);
        store
    }

    /// Caps every slot at `bytes`. Larger snapshots are refused with
    /// [`NetplayError::StateBufferExhausted`].
    #[must_use]
    pub fn with_slot_limit(mut self, bytes: usize) -> Self {
        self.slot_limit = Some(bytes);
        self
    }

    /// The per-slot byte limit, if any.
    #[must_use]
    pub fn slot_limit(&self) -> Option<usize> {
        self.slot_limit
    }

    fn fits(&self, bytes: usize) -> bool {
        self.slot_limit.is_none_or(|limit| bytes <= limit)
    }

    /// Sets the number of slots. Existing snapshots are discarded.
    pub fn resize(&mut self, capacity: usize) {
        self.slots.clear();
        self.slots.resize_with(capacity, SaveStateSlot::default);
    }

    /// Pre-sizes every slot for snapshots of `bytes` bytes.
    pub fn reserve_each(&mut self, bytes: usize) -> Result<(), NetplayError> {
        if !self.fits(bytes) {
            return Err(NetplayError::StateBufferExhausted {
                frame: Frame::NULL,
                requested: bytes,
            });
        }
        for slot in &mut self.slots {
            let additional = bytes.saturating_sub(slot.data.len());
            slot.data
                .try_reserve(additional)
                .map_err(|_| NetplayError::StateBufferExhausted {
                    frame: Frame::NULL,
                    requested: bytes,
                })?;
        }
        Ok(())
    }

    /// Stores the snapshot for `frame`, overwriting whatever shared its slot.
    ///
    /// # Errors
    ///
    /// - [`NetplayError::InvalidFrame`] if `frame` is negative.
    /// - [`NetplayError::StateBufferExhausted`] if the slot cannot grow to hold
    ///   `bytes`, `bytes` exceeds the slot limit, or the store has no slots at
    ///   all. The slot keeps its previous snapshot in that case.
    pub fn set(&mut self, frame: Frame, bytes: &[u8]) -> Result<(), NetplayError> {
        if !frame.is_valid() {
            return Err(NetplayError::InvalidFrame { frame });
        }
        let exhausted = NetplayError::StateBufferExhausted {
            frame,
            requested: bytes.len(),
        };
        if !self.fits(bytes.len()) {
            return Err(exhausted);
        }
        let Some(index) = frame.slot_in(self.slots.len()) else {
            return Err(exhausted);
        };
        let Some(slot) = self.slots.get_mut(index) else {
            return Err(exhausted);
        };
        slot.store(frame, bytes).map_err(|_| exhausted)
    }

    /// Returns the snapshot saved for `frame`.
    ///
    /// `None` if the frame is negative, or its slot is empty or has since been
    /// overwritten by a later frame.
    #[must_use]
    pub fn get(&self, frame: Frame) -> Option<&[u8]> {
        self.slot(frame)
            .filter(|slot| slot.frame == frame)
            .map(SaveStateSlot::data)
    }

    /// Returns the slot `frame` maps to, whatever frame it currently holds.
    #[must_use]
    pub fn slot(&self, frame: Frame) -> Option<&SaveStateSlot> {
        self.slots.get(frame.slot_in(self.slots.len())?)
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the store has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterates over the slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = &SaveStateSlot> {
        self.slots.iter()
    }

    /// Drops every slot and its buffer.
    pub fn clear(&mut self) {
        self.slots = Vec::new();
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn snapshot(frame: i32) -> Vec<u8> {
        frame.to_le_bytes().repeat(8)
    }

    // ========================================================================
    // Sizing
    // ========================================================================

    #[test]
    fn resize_creates_empty_slots() {
        let store = SaveStateStore::with_capacity(9);
        assert_eq!(store.capacity(), 9);
        assert!(store.iter().all(SaveStateSlot::is_empty));
    }

    #[test]
    fn reserve_each_presizes_slots() {
        let mut store = SaveStateStore::with_capacity(3);
        store.reserve_each(1024).unwrap();
        assert!(store.iter().all(|slot| slot.capacity() >= 1024));
    }

    #[test]
    fn clear_releases_everything() {
        let mut store = SaveStateStore::with_capacity(4);
        store.set(Frame::new(1), &snapshot(1)).unwrap();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.get(Frame::new(1)), None);
    }

    // ========================================================================
    // set / get
    // ========================================================================

    #[test]
    fn save_then_load_round_trips() {
        let mut store = SaveStateStore::with_capacity(4);
        store.set(Frame::new(2), &snapshot(2)).unwrap();
        assert_eq!(store.get(Frame::new(2)), Some(snapshot(2).as_slice()));
        assert_eq!(store.slot(Frame::new(6)).unwrap().frame(), Frame::new(2));
    }

    #[test]
    fn later_frame_overwrites_slot() {
        let mut store = SaveStateStore::with_capacity(4);
        store.set(Frame::new(1), &snapshot(1)).unwrap();
        store.set(Frame::new(5), &snapshot(5)).unwrap();
        assert_eq!(store.get(Frame::new(1)), None);
        assert_eq!(store.get(Frame::new(5)), Some(snapshot(5).as_slice()));
    }

    #[test]
    fn ring_keeps_most_recent_capacity_frames() {
        let capacity = 7;
        let mut store = SaveStateStore::with_capacity(capacity);
        for frame in 0..(capacity as i32 + 5) {
            store.set(Frame::new(frame), &snapshot(frame)).unwrap();
        }
        for frame in 0..5 {
            assert_eq!(store.get(Frame::new(frame)), None, "frame {frame}");
        }
        for frame in 5..12 {
            assert_eq!(
                store.get(Frame::new(frame)),
                Some(snapshot(frame).as_slice()),
                "frame {frame}"
            );
        }
    }

    #[test]
    fn slot_capacity_never_shrinks() {
        let mut store = SaveStateStore::with_capacity(1);
        store.set(Frame::new(0), &[7u8; 4096]).unwrap();
        let grown = store.slot(Frame::new(0)).unwrap().capacity();
        store.set(Frame::new(1), &[1u8; 16]).unwrap();
        let slot = store.slot(Frame::new(1)).unwrap();
        assert_eq!(slot.data(), &[1u8; 16]);
        assert!(slot.capacity() >= grown);
    }

    #[test]
    fn negative_frame_is_rejected() {
        let mut store = SaveStateStore::with_capacity(4);
        let err = store.set(Frame::NULL, &[1]).unwrap_err();
        assert_eq!(err, NetplayError::InvalidFrame { frame: Frame::NULL });
        assert_eq!(store.get(Frame::new(-3)), None);
    }

    #[test]
    fn store_without_slots_reports_exhaustion() {
        let mut store = SaveStateStore::new();
        let err = store.set(Frame::new(0), &[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            NetplayError::StateBufferExhausted {
                frame: Frame::new(0),
                requested: 3
            }
        );
    }

    #[test]
    fn oversized_snapshot_leaves_slot_untouched() {
        let mut store = SaveStateStore::with_capacity(2).with_slot_limit(32);
        store.set(Frame::new(0), &snapshot(0)).unwrap();

        let err = store.set(Frame::new(2), &[9u8; 33]).unwrap_err();

        assert_eq!(
            err,
            NetplayError::StateBufferExhausted {
                frame: Frame::new(2),
                requested: 33
            }
        );
        assert_eq!(store.get(Frame::new(0)), Some(snapshot(0).as_slice()));
        assert_eq!(store.get(Frame::new(2)), None);
    }

    #[test]
    fn reserve_each_respects_slot_limit() {
        let mut store = SaveStateStore::with_capacity(3).with_slot_limit(64);
        assert_eq!(store.slot_limit(), Some(64));
        store.reserve_each(64).unwrap();
        assert!(matches!(
            store.reserve_each(65),
            Err(NetplayError::StateBufferExhausted { requested: 65, .. })
        ));
        store.set(Frame::new(1), &[1u8; 64]).unwrap();
        assert_eq!(store.get(Frame::new(1)), Some(&[1u8; 64][..]));
    }

    #[test]
    fn empty_snapshot_is_still_a_save() {
        let mut store = SaveStateStore::with_capacity(2);
        store.set(Frame::new(0), &[]).unwrap();
        assert_eq!(store.get(Frame::new(0)), Some(&[][..]));
    }
}
