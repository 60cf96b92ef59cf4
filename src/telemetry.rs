//! Observers for session lifecycle events.
//!
//! The tick loop drains connection and status events from the transport and
//! hands each one to a [`SessionObserver`]. The default sink,
//! [`TracingObserver`], turns them into structured `tracing` records; a host
//! that shows status messages or feeds metrics installs its own observer, or
//! several at once through [`CompositeObserver`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use netplay_rollback::telemetry::{CollectingObserver, CompositeObserver, TracingObserver};
//!
//! let collector = Arc::new(CollectingObserver::new());
//! let mut composite = CompositeObserver::new();
//! composite.add(Arc::new(TracingObserver::new()));
//! composite.add(collector.clone());
//! assert!(collector.is_empty());
//! ```

use parking_lot::Mutex;
use std::sync::Arc;

use crate::transport::SessionEvent;

/// Trait for observing session events.
///
/// Observers are called on the tick thread, after the transport lock has been
/// released, so an observer may take its time without stalling network
/// polling. It still delays the current frame, so keep it quick.
///
/// # Thread Safety
///
/// When the `sync-send` feature is enabled, observers must be `Send + Sync`
/// to allow sharing across threads.
///
/// # Example
///
/// ```
/// use netplay_rollback::telemetry::SessionObserver;
/// use netplay_rollback::SessionEvent;
///
/// struct StatusLine;
///
/// impl SessionObserver for StatusLine {
///     fn on_event(&self, event: &SessionEvent) {
///         if let SessionEvent::PlayerDisconnected { peer } = event {
///             eprintln!("peer {} left", peer);
///         }
///     }
/// }
/// ```
#[cfg(feature = "sync-send")]
pub trait SessionObserver: Send + Sync {
    /// Called once per drained session event, in transport order.
    fn on_event(&self, event: &SessionEvent);
}

#[cfg(not(feature = "sync-send"))]
/// Trait for observing session events.
///
/// Observers are called on the tick thread, after the transport lock has been
/// released, in transport order.
pub trait SessionObserver {
    /// Called once per drained session event, in transport order.
    fn on_event(&self, event: &SessionEvent);
}

/// Built-in observer that logs events via the `tracing` crate.
///
/// # Log Levels
///
/// - connection progress and session start → `tracing::info!`
/// - disconnects and spectator pauses → `tracing::warn!`
/// - desynchronization → `tracing::error!`
///
/// Every record carries the event kind as a structured `kind` field.
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl TracingObserver {
    /// Creates a new tracing observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &SessionEvent) {
        let kind = event.kind();
        match event {
            SessionEvent::PlayerSyncing { peer, current, max } => {
                tracing::info!(kind, peer = peer.as_usize(), current, max, "Peer syncing");
            },
            SessionEvent::PlayerConnected { peer } => {
                tracing::info!(kind, peer = peer.as_usize(), "Peer Connected: {}", peer);
            },
            SessionEvent::PlayerDisconnected { peer } => {
                tracing::warn!(kind, peer = peer.as_usize(), "Peer Disconnected: {}", peer);
            },
            SessionEvent::SessionStarted => {
                tracing::info!(kind, "Netplay Session Started");
            },
            SessionEvent::SpectatorPaused => {
                tracing::warn!(kind, "Spectator stream paused, waiting for host input");
            },
            SessionEvent::SpectatorUnpaused => {
                tracing::info!(kind, "Spectator stream resumed");
            },
            SessionEvent::DesyncDetected {
                frame,
                local_checksum,
                remote_checksum,
                peer,
            } => {
                tracing::error!(
                    kind,
                    frame = frame.as_i32(),
                    peer = peer.as_usize(),
                    local_checksum = %format!("{:#018x}", local_checksum),
                    remote_checksum = %format!("{:#018x}", remote_checksum),
                    "Desync detected"
                );
            },
        }
    }
}

/// Observer that keeps every event it sees. Useful in tests.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<SessionEvent>>,
}

impl CollectingObserver {
    /// Creates a new collecting observer with an empty event list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Returns the events whose [`SessionEvent::kind`] equals `kind`.
    #[must_use]
    pub fn events_of_kind(&self, kind: &str) -> Vec<SessionEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind() == kind)
            .cloned()
            .collect()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl SessionObserver for CollectingObserver {
    fn on_event(&self, event: &SessionEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Observer that forwards every event to several child observers in order.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn SessionObserver>>,
}

impl CompositeObserver {
    /// Creates a new composite observer with no child observers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Adds an observer to the composite.
    pub fn add(&mut self, observer: Arc<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    /// Creates a composite observer from a list of observers.
    #[must_use]
    pub fn from_observers(observers: Vec<Arc<dyn SessionObserver>>) -> Self {
        Self { observers }
    }

    /// Number of child observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Returns true if there are no child observers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl SessionObserver for CompositeObserver {
    fn on_event(&self, event: &SessionEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

impl std::fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("num_observers", &self.observers.len())
            .finish()
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
    use crate::{Frame, PeerId};

    fn connected(peer: usize) -> SessionEvent {
        SessionEvent::PlayerConnected {
            peer: PeerId::new(peer),
        }
    }

    // ==========================================
    // CollectingObserver
    // ==========================================

    #[test]
    fn collecting_observer_keeps_order() {
        let observer = CollectingObserver::new();
        observer.on_event(&connected(1));
        observer.on_event(&SessionEvent::SessionStarted);
        assert_eq!(observer.len(), 2);
        assert_eq!(
            observer.events(),
            vec![connected(1), SessionEvent::SessionStarted]
        );
    }

    #[test]
    fn collecting_observer_filters_by_kind() {
        let observer = CollectingObserver::new();
        observer.on_event(&connected(1));
        observer.on_event(&SessionEvent::PlayerDisconnected {
            peer: PeerId::new(1),
        });
        observer.on_event(&connected(2));
        assert_eq!(observer.events_of_kind("player_connected").len(), 2);
        assert_eq!(observer.events_of_kind("player_disconnected").len(), 1);
        assert!(observer.events_of_kind("desync_detected").is_empty());
    }

    #[test]
    fn collecting_observer_clear() {
        let observer = CollectingObserver::new();
        observer.on_event(&SessionEvent::SpectatorPaused);
        observer.clear();
        assert!(observer.is_empty());
    }

    // ==========================================
    // CompositeObserver
    // ==========================================

    #[test]
    fn composite_forwards_to_every_child() {
        let first = Arc::new(CollectingObserver::new());
        let second = Arc::new(CollectingObserver::new());
        let composite = CompositeObserver::from_observers(vec![
            first.clone(),
            Arc::new(TracingObserver::new()),
            second.clone(),
        ]);
        assert_eq!(composite.len(), 3);

        composite.on_event(&SessionEvent::DesyncDetected {
            frame: Frame::new(120),
            local_checksum: 1,
            remote_checksum: 2,
            peer: PeerId::new(1),
        });
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn empty_composite_is_a_no_op() {
        let composite = CompositeObserver::new();
        assert!(composite.is_empty());
        composite.on_event(&SessionEvent::SessionStarted);
        assert!(format!("{:?}", composite).contains("num_observers"));
    }

    // ==========================================
    // TracingObserver
    // ==========================================

    #[test]
    fn tracing_observer_accepts_every_event() {
        let observer = TracingObserver::new();
        for event in [
            SessionEvent::PlayerSyncing {
                peer: PeerId::new(1),
                current: 1,
                max: 5,
            },
            connected(1),
            SessionEvent::PlayerDisconnected {
                peer: PeerId::new(1),
            },
            SessionEvent::SessionStarted,
            SessionEvent::SpectatorPaused,
            SessionEvent::SpectatorUnpaused,
            SessionEvent::DesyncDetected {
                frame: Frame::new(3),
                local_checksum: 0xdead,
                remote_checksum: 0xbeef,
                peer: PeerId::new(2),
            },
        ] {
            observer.on_event(&event);
        }
    }
}
