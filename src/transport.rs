//! The session transport seam.
//!
//! A [`SessionTransport`] is the rollback protocol engine: it exchanges inputs
//! with remote peers, predicts what has not arrived yet and decides when the
//! emulator must save, load or advance. This crate never looks inside it. The
//! transport is created per session through a [`TransportFactory`], shared
//! between the tick thread and the network poller through a [`SessionHandle`],
//! and dropped when the session stops.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

use crate::error::NetplayError;
use crate::network::network_stats::NetStats;
use crate::sessions::config::SessionConfig;
use crate::{Frame, PeerId, PeerRole};

pub mod local;

/// Connection and status notifications drained from the transport once per tick.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionEvent {
    /// A remote peer is exchanging its synchronization handshake.
    PlayerSyncing {
        /// The peer being synchronized.
        peer: PeerId,
        /// Handshake round trips completed.
        current: u32,
        /// Handshake round trips required.
        max: u32,
    },
    /// A remote peer finished synchronizing.
    PlayerConnected {
        /// The peer that connected.
        peer: PeerId,
    },
    /// A remote peer stopped responding or left.
    PlayerDisconnected {
        /// The peer that disconnected.
        peer: PeerId,
    },
    /// Every peer is synchronized and frames start flowing.
    SessionStarted,
    /// The spectator ran out of confirmed host input.
    SpectatorPaused,
    /// Confirmed host input is flowing again.
    SpectatorUnpaused,
    /// A remote peer reported a different checksum for a confirmed frame.
    DesyncDetected {
        /// The frame whose checksums differ.
        frame: Frame,
        /// Checksum this peer saved for `frame`.
        local_checksum: u64,
        /// Checksum the remote peer saved for `frame`.
        remote_checksum: u64,
        /// The remote peer.
        peer: PeerId,
    },
}

impl SessionEvent {
    /// Stable snake-case name of the event, for logs and filtering.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            SessionEvent::PlayerSyncing { .. } => "player_syncing",
            SessionEvent::PlayerConnected { .. } => "player_connected",
            SessionEvent::PlayerDisconnected { .. } => "player_disconnected",
            SessionEvent::SessionStarted => "session_started",
            SessionEvent::SpectatorPaused => "spectator_paused",
            SessionEvent::SpectatorUnpaused => "spectator_unpaused",
            SessionEvent::DesyncDetected { .. } => "desync_detected",
        }
    }
}

/// Work the emulator must perform, in the order the transport returns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Serialize the emulator and keep the snapshot for `frame`.
    Save {
        /// Frame the snapshot belongs to.
        frame: Frame,
    },
    /// Restore the snapshot saved for `frame`.
    Load {
        /// Frame to roll back to.
        frame: Frame,
    },
    /// Run one frame with the given inputs.
    Advance {
        /// Frame being produced.
        frame: Frame,
        /// One encoded input per player, in player order.
        inputs: Vec<u8>,
    },
}

impl SessionUpdate {
    /// The frame this update refers to.
    #[must_use]
    pub const fn frame(&self) -> Frame {
        match self {
            SessionUpdate::Save { frame }
            | SessionUpdate::Load { frame }
            | SessionUpdate::Advance { frame, .. } => *frame,
        }
    }

    /// Returns `true` for [`SessionUpdate::Save`].
    #[must_use]
    pub const fn is_save(&self) -> bool {
        matches!(self, SessionUpdate::Save { .. })
    }
}

/// What the tick loop hands back to the transport for every Save it fulfilled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    /// Frame the snapshot belongs to.
    pub frame: Frame,
    /// FNV-1a checksum of the full snapshot.
    pub checksum: u64,
    /// Either the frame marker or the whole snapshot, per [`SavePayload`].
    ///
    /// [`SavePayload`]: crate::SavePayload
    pub payload: Vec<u8>,
}

/// The rollback protocol engine behind a running session.
///
/// Methods are only ever called with the [`SessionHandle`] lock held, either by
/// the tick thread or by the network poller. No method should block on I/O.
pub trait SessionTransport: Send {
    /// Registers a peer. The local player is attached without an address.
    fn add_actor(&mut self, role: PeerRole, address: Option<&str>)
        -> Result<PeerId, NetplayError>;

    /// Sets the input delay, in frames, of a local player.
    fn set_local_delay(&mut self, peer: PeerId, delay: u32) -> Result<(), NetplayError>;

    /// Queues one encoded local input for the next frame.
    fn add_local_input(&mut self, peer: PeerId, input: &[u8]) -> Result<(), NetplayError>;

    /// Services sockets: sends queued packets and receives pending ones.
    fn network_poll(&mut self);

    /// How many frames this peer runs ahead of the slowest remote peer.
    fn frames_ahead(&self) -> f32;

    /// Latest connection statistics for a remote peer.
    fn network_stats(&self, peer: PeerId) -> Option<NetStats>;

    /// Takes every pending connection and status event.
    fn drain_events(&mut self) -> Vec<SessionEvent>;

    /// Advances the protocol and takes the resulting updates.
    fn update_session(&mut self) -> Vec<SessionUpdate>;

    /// Hands back the results of the Save updates of the last batch.
    fn submit_saves(&mut self, reports: Vec<SaveReport>);
}

/// Creates one transport per session.
///
/// A host typically implements this over its UDP stack; [`LocalTransportFactory`]
/// serves single-machine sessions.
///
/// [`LocalTransportFactory`]: crate::LocalTransportFactory
pub trait TransportFactory {
    /// The transport this factory produces.
    type Transport: SessionTransport + 'static;

    /// Binds `local_port` and creates a transport for `config`.
    fn create(
        &mut self,
        local_port: u16,
        config: &SessionConfig,
    ) -> Result<Self::Transport, NetplayError>;
}

/// Shared ownership of a running transport.
///
/// The session owns the only strong handle. The network poller works from a
/// [`Weak`] obtained through [`SessionHandle::downgrade`], so dropping the
/// session drops the transport even if the poller is still winding down.
#[derive(Debug)]
pub struct SessionHandle<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> SessionHandle<T> {
    /// Wraps a freshly created transport.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(transport)),
        }
    }

    /// Runs `f` with exclusive access to the transport.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Returns a weak reference for the network poller.
    #[must_use]
    pub fn downgrade(&self) -> Weak<Mutex<T>> {
        Arc::downgrade(&self.inner)
    }

    /// Number of strong references. `1` while no poll is in progress.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
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
    fn update_frame_and_kind() {
        let save = SessionUpdate::Save {
            frame: Frame::new(4),
        };
        let advance = SessionUpdate::Advance {
            frame: Frame::new(5),
            inputs: vec![0, 0],
        };
        assert!(save.is_save());
        assert!(!advance.is_save());
        assert_eq!(save.frame(), Frame::new(4));
        assert_eq!(advance.frame(), Frame::new(5));
    }

    #[test]
    fn event_kinds_are_distinct() {
        let kinds = [
            SessionEvent::PlayerSyncing {
                peer: PeerId::new(0),
                current: 0,
                max: 0,
            }
            .kind(),
            SessionEvent::PlayerConnected {
                peer: PeerId::new(0),
            }
            .kind(),
            SessionEvent::PlayerDisconnected {
                peer: PeerId::new(0),
            }
            .kind(),
            SessionEvent::SessionStarted.kind(),
            SessionEvent::SpectatorPaused.kind(),
            SessionEvent::SpectatorUnpaused.kind(),
            SessionEvent::DesyncDetected {
                frame: Frame::new(0),
                local_checksum: 0,
                remote_checksum: 0,
                peer: PeerId::new(0),
            }
            .kind(),
        ];
        let unique: std::collections::BTreeSet<_> = kinds.iter().collect();
        assert_eq!(unique.len(), kinds.len());
    }

    #[test]
    fn handle_grants_exclusive_access() {
        let handle = SessionHandle::new(vec![1u8]);
        handle.with_session(|inner| inner.push(2));
        assert_eq!(handle.with_session(|inner| inner.clone()), vec![1, 2]);
    }

    #[test]
    fn weak_handle_dies_with_the_session() {
        let handle = SessionHandle::new(0u32);
        let weak = handle.downgrade();
        assert_eq!(handle.strong_count(), 1);
        assert!(weak.upgrade().is_some());
        drop(handle);
        assert!(weak.upgrade().is_none());
    }
}
