//! # netplay-rollback
//!
//! Rollback netcode glue between a deterministic, frame-stepped emulator and a
//! peer-to-peer session transport.
//!
//! Each peer predicts remote inputs and advances without waiting. When
//! authoritative input arrives that contradicts a prediction, the transport asks
//! for the last good snapshot to be reloaded and the frames since then to be
//! replayed. This crate owns everything on the emulator's side of that exchange:
//!
//! - validating a session-start request and building the peer roster
//!   ([`StartRequest`], [`PeerRegistry`]),
//! - the per-tick loop that fulfils Save/Load/Advance updates ([`RollbackSession`]),
//! - the ring buffer of serialized snapshots ([`SaveStateStore`]),
//! - drift ("rift") correction and the mute-on-stall heuristic ([`SyncRegulator`]),
//! - the background thread that keeps the transport's sockets serviced
//!   ([`NetworkPoller`]).
//!
//! The wire protocol lives behind [`SessionTransport`]; the emulator, input
//! layer, audio and window are reached through the traits in [`host`].
//!
//! ```
//! use netplay_rollback::{LocalRole, StartRequest};
//!
//! let topology = StartRequest::new()
//!     .with_local_port(55435)
//!     .with_local_role(LocalRole::Player { slot: 0 })
//!     .add_remote("192.0.2.7:55435")
//!     .validate()
//!     .expect("two players over one link is a valid topology");
//! assert_eq!(topology.player_count(), 2);
//! assert_eq!(topology.state_capacity(90), 9);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use buttons::{Buttons, Device, InputBlock, SnesButton, BUTTONS_PER_PAD, MULTITAP_CAPACITY};
pub use error::{NetplayError, TopologyError};
pub use host::{AudioOutput, Emulator, Host, HostWindow, InputManager, InputMapping};
pub use input_sampler::InputSampler;
pub use network::network_stats::NetStats;
pub use network::poller::NetworkPoller;
pub use sessions::builder::{LocalRole, PeerSpec, StartRequest, Topology};
pub use sessions::config::{RiftSyncConfig, SavePayload, SessionConfig, TuningConfig};
pub use sessions::peer_registry::{Peer, PeerRegistry};
pub use sessions::rollback_session::RollbackSession;
pub use sessions::sync_regulator::{StallMonitor, StallVerdict, SyncRegulator};
pub use sync_layer::save_states::{SaveStateSlot, SaveStateStore};
pub use telemetry::{CollectingObserver, CompositeObserver, SessionObserver, TracingObserver};
pub use transport::local::{LocalTransport, LocalTransportFactory};
pub use transport::{
    SaveReport, SessionEvent, SessionHandle, SessionTransport, SessionUpdate, TransportFactory,
};

pub mod buttons;
pub mod codec;
#[doc(hidden)]
pub mod error;
pub mod hash;
pub mod host;
pub mod input_sampler;
pub mod telemetry;
pub mod transport;
#[doc(hidden)]
pub mod sessions {
    pub mod builder;
    pub mod config;
    pub mod peer_registry;
    pub mod rollback_session;
    pub mod sync_regulator;
}
#[doc(hidden)]
pub mod network {
    pub mod network_stats;
    /// Background thread that services the transport's sockets.
    pub mod poller;
}
#[doc(hidden)]
pub mod sync_layer {
    pub mod save_states;
}

/// A frame number in the synchronized timeline.
///
/// Frames start at `0` when the session starts. Negative values only appear as
/// [`Frame::NULL`] or when a transport hands over garbage; the save-state store
/// rejects both.
///
/// ```
/// use netplay_rollback::Frame;
///
/// let frame = Frame::new(0);
/// assert!(frame.is_valid());
/// assert!(Frame::NULL.is_null());
/// assert_eq!((frame + 1).as_i32(), 1);
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Frame(i32);

impl Frame {
    /// The null frame constant, representing "no frame".
    pub const NULL: Frame = Frame(-1);

    /// Creates a new `Frame` from an `i32` value. The value is not validated.
    #[inline]
    #[must_use]
    pub const fn new(frame: i32) -> Self {
        Frame(frame)
    }

    /// Returns the underlying `i32` value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns `true` if this frame is [`Frame::NULL`].
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }

    /// Returns `true` if this frame is non-negative.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Returns the ring-buffer slot this frame maps to, or `None` for a negative
    /// frame or an empty ring.
    #[inline]
    #[must_use]
    pub fn slot_in(self, capacity: usize) -> Option<usize> {
        let frame = usize::try_from(self.0).ok()?;
        frame.checked_rem(capacity)
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "NULL_FRAME")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl std::ops::Add<i32> for Frame {
    type Output = Frame;

    #[inline]
    fn add(self, rhs: i32) -> Self::Output {
        Frame(self.0 + rhs)
    }
}

impl std::ops::AddAssign<i32> for Frame {
    #[inline]
    fn add_assign(&mut self, rhs: i32) {
        self.0 += rhs;
    }
}

impl std::ops::Sub<Frame> for Frame {
    type Output = i32;

    #[inline]
    fn sub(self, rhs: Frame) -> Self::Output {
        self.0 - rhs.0
    }
}

impl From<i32> for Frame {
    #[inline]
    fn from(value: i32) -> Self {
        Frame(value)
    }
}

impl From<Frame> for i32 {
    #[inline]
    fn from(frame: Frame) -> Self {
        frame.0
    }
}

/// Identifier the transport assigns to a peer when it is attached.
///
/// The value is opaque: it is only meaningful to the transport that issued it
/// and is used to key per-peer input submission and statistics.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct PeerId(usize);

impl PeerId {
    /// Creates a new `PeerId` from a raw transport value.
    #[inline]
    #[must_use]
    pub const fn new(id: usize) -> Self {
        PeerId(id)
    }

    /// Returns the raw transport value.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a peer is to this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerRole {
    /// The player whose input is sampled on this machine.
    LocalPlayer,
    /// A player on another machine.
    RemotePlayer,
    /// A peer that receives inputs but never submits any.
    Spectator,
}

impl PeerRole {
    /// Returns `true` for local and remote players.
    #[inline]
    #[must_use]
    pub const fn is_player(self) -> bool {
        matches!(self, PeerRole::LocalPlayer | PeerRole::RemotePlayer)
    }
}

/// Lifecycle of a [`RollbackSession`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionMode {
    /// No session. `tick` does nothing.
    #[default]
    Inactive,
    /// `start` is validating the request and creating the transport.
    Setup,
    /// A session is live and `tick` drives it.
    Running,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::Inactive => write!(f, "inactive"),
            SessionMode::Setup => write!(f, "setup"),
            SessionMode::Running => write!(f, "running"),
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

    #[test]
    fn frame_null_and_validity() {
        assert!(Frame::NULL.is_null());
        assert!(!Frame::NULL.is_valid());
        assert!(Frame::new(0).is_valid());
        assert!(!Frame::new(-7).is_valid());
        assert_eq!(Frame::NULL.to_string(), "NULL_FRAME");
        assert_eq!(Frame::new(12).to_string(), "12");
    }

    #[test]
    fn frame_arithmetic() {
        let mut frame = Frame::new(10);
        frame += 5;
        assert_eq!(frame, Frame::new(15));
        assert_eq!(frame + 1, Frame::new(16));
        assert_eq!(Frame::new(16) - Frame::new(10), 6);
        assert_eq!(i32::from(Frame::from(3)), 3);
    }

    #[test]
    fn frame_slot_in_ring() {
        assert_eq!(Frame::new(0).slot_in(9), Some(0));
        assert_eq!(Frame::new(10).slot_in(9), Some(1));
        assert_eq!(Frame::new(18).slot_in(9), Some(0));
        assert_eq!(Frame::new(-1).slot_in(9), None);
        assert_eq!(Frame::new(4).slot_in(0), None);
    }

    #[test]
    fn peer_id_round_trip() {
        let id = PeerId::new(3);
        assert_eq!(id.as_usize(), 3);
        assert_eq!(id.to_string(), "3");
    }

    #[test]
    fn roles_and_modes() {
        assert!(PeerRole::LocalPlayer.is_player());
        assert!(PeerRole::RemotePlayer.is_player());
        assert!(!PeerRole::Spectator.is_player());
        assert_eq!(SessionMode::default(), SessionMode::Inactive);
        assert_eq!(SessionMode::Running.to_string(), "running");
    }
}
