//! Configuration types for rollback sessions.
//!
//! | Config Type | Purpose | Key Presets |
//! |-------------|---------|-------------|
//! | `SessionConfig` | What the transport is created with | derived from a validated [`StartRequest`] |
//! | `TuningConfig` | Heuristic thresholds of the tick loop | `lan()`, `high_latency()` |
//! | `RiftSyncConfig` | Drift correction cadence and strength | `responsive()`, `disabled()` |
//! | `SavePayload` | What a Save hands back to the transport | `FrameMarker`, `FullSnapshot` |
//!
//! # Example
//!
//! ```
//! use netplay_rollback::{RiftSyncConfig, TuningConfig};
//!
//! let tuning = TuningConfig {
//!     rift: RiftSyncConfig::responsive(),
//!     ..TuningConfig::lan()
//! };
//! assert_eq!(tuning.rift.check_interval, 60);
//! ```
//!
//! [`StartRequest`]: crate::StartRequest

use web_time::Duration;

use crate::codec::INPUT_SIZE;
use crate::Frame;

/// What the tick loop reports back to the transport for each Save update.
///
/// The snapshot itself always stays in the local [`SaveStateStore`]. A transport
/// that only compares checksums needs nothing more than the frame number; one
/// that ships state to late joiners wants the full snapshot.
///
/// [`SaveStateStore`]: crate::SaveStateStore
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SavePayload {
    /// A 4-byte little-endian frame number.
    #[default]
    FrameMarker,
    /// The complete serialized snapshot.
    FullSnapshot,
}

impl SavePayload {
    /// Size of the [`SavePayload::FrameMarker`] payload.
    pub const FRAME_MARKER_SIZE: usize = std::mem::size_of::<i32>();

    /// State size announced to the transport for snapshots of `snapshot_len` bytes.
    #[must_use]
    pub const fn state_size(self, snapshot_len: usize) -> usize {
        match self {
            SavePayload::FrameMarker => Self::FRAME_MARKER_SIZE,
            SavePayload::FullSnapshot => snapshot_len,
        }
    }

    /// Builds the payload reported for `frame`.
    #[must_use]
    pub fn payload(self, frame: Frame, snapshot: &[u8]) -> Vec<u8> {
        match self {
            SavePayload::FrameMarker => frame.as_i32().to_le_bytes().to_vec(),
            SavePayload::FullSnapshot => snapshot.to_vec(),
        }
    }
}

/// The parameters a transport is created with.
///
/// Built once by [`RollbackSession::start`] from the validated topology and the
/// probed snapshot size. It does not change while the session runs.
///
/// [`RollbackSession::start`]: crate::RollbackSession::start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Number of players, local and remote. Always at least 1.
    pub num_players: usize,
    /// Bytes per encoded player input.
    pub input_size: usize,
    /// Bytes per reported save, per [`SavePayload::state_size`].
    pub state_size: usize,
    /// Spectator slots the transport reserves.
    pub max_spectators: usize,
    /// Rollback depth: how many frames may be predicted ahead of confirmed input.
    pub input_prediction_window: usize,
    /// Frames a spectator trails the host by.
    pub spectator_delay: usize,
    /// Input delay of the local player, in frames.
    pub local_delay: u32,
    /// What Save updates report back.
    pub save_payload: SavePayload,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            num_players: 1,
            input_size: INPUT_SIZE,
            state_size: SavePayload::FRAME_MARKER_SIZE,
            max_spectators: 0,
            input_prediction_window: 7,
            spectator_delay: 90,
            local_delay: 0,
            save_payload: SavePayload::FrameMarker,
        }
    }
}

impl SessionConfig {
    /// Bytes in one advance input block.
    #[must_use]
    pub const fn input_block_size(&self) -> usize {
        self.num_players * self.input_size
    }
}

/// Drift ("rift") correction settings.
///
/// When this peer runs ahead of the confirmed timeline by more than its own
/// input delay, the regulator burns one frame: it runs the emulator a step and
/// restores the previous snapshot, so the simulation stalls while audio keeps
/// playing, quieter.
///
/// # Forward Compatibility
///
/// New fields may be added to this struct in future versions. Use the
/// `..RiftSyncConfig::default()` pattern when constructing instances.
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use = "RiftSyncConfig has no effect unless placed in a TuningConfig"]
pub struct RiftSyncConfig {
    /// Whether correction runs at all.
    ///
    /// Default: `true`
    pub enabled: bool,
    /// Ticks between two checks.
    ///
    /// Default: 180 (three seconds at 60 FPS)
    pub check_interval: u64,
    /// Lead over the confirmed timeline, beyond the local delay, that triggers
    /// a correction.
    ///
    /// Default: 1.0 frame
    pub frames_ahead_threshold: f32,
    /// Volume multiplier during the burned frame.
    ///
    /// Default: 0.25
    pub volume_scale: f32,
}

impl Default for RiftSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: 180,
            frames_ahead_threshold: 1.0,
            volume_scale: 0.25,
        }
    }
}

impl RiftSyncConfig {
    /// Creates a new `RiftSyncConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks once a second, for links whose lead drifts quickly.
    pub fn responsive() -> Self {
        Self {
            check_interval: 60,
            ..Self::default()
        }
    }

    /// Never corrects.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Heuristic thresholds of the tick loop.
///
/// # Forward Compatibility
///
/// New fields may be added to this struct in future versions. Use the
/// `..TuningConfig::default()` pattern when constructing instances.
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use = "TuningConfig has no effect unless passed to RollbackSession::with_tuning()"]
pub struct TuningConfig {
    /// Consecutive ticks without updates after which audio is muted.
    ///
    /// Default: 10
    pub stall_mute_threshold: u32,
    /// Drift correction.
    pub rift: RiftSyncConfig,
    /// Interval between two network polls of the background poller.
    ///
    /// Default: 1ms
    pub poll_interval: Duration,
    /// Frames a spectator trails the host by.
    ///
    /// Default: 90 (1.5 seconds at 60 FPS)
    pub spectator_delay: usize,
    /// Largest snapshot a save-state slot may hold. A larger snapshot at start
    /// fails the start; during a session it ends the session.
    ///
    /// Default: `None` (unbounded)
    pub max_snapshot_bytes: Option<usize>,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            stall_mute_threshold: 10,
            rift: RiftSyncConfig::default(),
            poll_interval: Duration::from_millis(1),
            spectator_delay: 90,
            max_snapshot_bytes: None,
        }
    }
}

impl TuningConfig {
    /// Creates a new `TuningConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration preset for local network play.
    ///
    /// Latency is low and stable, so drift is checked more often and spectators
    /// trail by half a second.
    pub fn lan() -> Self {
        Self {
            rift: RiftSyncConfig::responsive(),
            spectator_delay: 30,
            ..Self::default()
        }
    }

    /// Configuration preset for high-latency links (100-200ms RTT).
    ///
    /// Longer stalls are expected before the stream recovers, and corrections
    /// only kick in once the lead exceeds two frames.
    pub fn high_latency() -> Self {
        Self {
            stall_mute_threshold: 20,
            rift: RiftSyncConfig {
                frames_ahead_threshold: 2.0,
                ..RiftSyncConfig::default()
            },
            poll_interval: Duration::from_millis(2),
            spectator_delay: 120,
            ..Self::default()
        }
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

    // ==========================================
    // SavePayload
    // ==========================================

    #[test]
    fn frame_marker_is_four_le_bytes() {
        let payload = SavePayload::FrameMarker.payload(Frame::new(0x0102), &[9; 64]);
        assert_eq!(payload, vec![0x02, 0x01, 0, 0]);
        assert_eq!(SavePayload::FrameMarker.state_size(64), 4);
    }

    #[test]
    fn full_snapshot_copies_state() {
        let payload = SavePayload::FullSnapshot.payload(Frame::new(3), &[9; 64]);
        assert_eq!(payload, vec![9; 64]);
        assert_eq!(SavePayload::FullSnapshot.state_size(64), 64);
    }

    // ==========================================
    // SessionConfig
    // ==========================================

    #[test]
    fn session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.num_players, 1);
        assert_eq!(config.input_size, 2);
        assert_eq!(config.spectator_delay, 90);
        assert_eq!(config.input_block_size(), 2);
    }

    #[test]
    fn input_block_scales_with_players() {
        let config = SessionConfig {
            num_players: 4,
            ..SessionConfig::default()
        };
        assert_eq!(config.input_block_size(), 8);
    }

    // ==========================================
    // Tuning presets
    // ==========================================

    #[test]
    fn tuning_defaults() {
        let tuning = TuningConfig::new();
        assert_eq!(tuning.stall_mute_threshold, 10);
        assert_eq!(tuning.poll_interval, Duration::from_millis(1));
        assert_eq!(tuning.rift, RiftSyncConfig::default());
        assert_eq!(tuning.rift.check_interval, 180);
        assert_eq!(tuning.max_snapshot_bytes, None);
        assert!((tuning.rift.volume_scale - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn presets_differ_from_default() {
        assert_ne!(TuningConfig::lan(), TuningConfig::default());
        assert_ne!(TuningConfig::high_latency(), TuningConfig::default());
        assert!(!RiftSyncConfig::disabled().enabled);
        assert_eq!(RiftSyncConfig::responsive().check_interval, 60);
    }
}
