//! Background network servicing.
//!
//! The transport's sockets must be serviced even while the tick thread is busy
//! running frames, so a [`NetworkPoller`] owns one thread that calls
//! [`SessionTransport::network_poll`] at a fixed cadence. The thread only holds
//! a weak reference to the transport and exits on its own once the session
//! drops it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};
use web_time::Duration;

use crate::error::NetplayError;
use crate::transport::{SessionHandle, SessionTransport};

/// Name of the polling thread.
pub const POLL_THREAD_NAME: &str = "netplay-poll";

/// Owns the polling thread.
#[derive(Debug, Default)]
pub struct NetworkPoller {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl NetworkPoller {
    /// Creates an idle poller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts polling `session` every `interval`.
    ///
    /// Does nothing if the poller is already running.
    ///
    /// # Errors
    ///
    /// Returns [`NetplayError::Transport`] if the thread cannot be spawned.
    pub fn start<T>(
        &mut self,
        session: &SessionHandle<T>,
        interval: Duration,
    ) -> Result<(), NetplayError>
    where
        T: SessionTransport + 'static,
    {
        if self.handle.is_some() {
            return Ok(());
        }

        let weak = session.downgrade();
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::Release);

        let spawned = thread::Builder::new()
            .name(POLL_THREAD_NAME.to_owned())
            .spawn(move || {
                let mut polls: u64 = 0;
                while running.load(Ordering::Acquire) {
                    let Some(transport) = weak.upgrade() else {
                        trace!(polls, "Transport dropped, poller exiting");
                        break;
                    };
                    transport.lock().network_poll();
                    drop(transport);
                    polls += 1;
                    thread::sleep(interval);
                }
                running.store(false, Ordering::Release);
            });

        match spawned {
            Ok(handle) => {
                debug!(interval_us = interval.as_micros(), "Network poller started");
                self.handle = Some(handle);
                Ok(())
            },
            Err(err) => {
                self.running.store(false, Ordering::Release);
                Err(NetplayError::Transport {
                    context: format!("could not spawn {}: {}", POLL_THREAD_NAME, err),
                })
            },
        }
    }

    /// Stops the thread and waits for it to exit. Does nothing if idle.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Network poller panicked");
            } else {
                debug!("Network poller stopped");
            }
        }
    }

    /// Returns `true` while the thread is alive and polling.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::Acquire)
    }
}

impl Drop for NetworkPoller {
    fn drop(&mut self) {
        self.stop();
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
    use crate::network::network_stats::NetStats;
    use crate::transport::{SaveReport, SessionEvent, SessionUpdate};
    use crate::{PeerId, PeerRole};
    use web_time::Instant;

    #[derive(Default)]
    struct Counting {
        polls: u64,
        thread_names: Vec<Option<String>>,
    }

    impl SessionTransport for Counting {
        fn add_actor(&mut self, _: PeerRole, _: Option<&str>) -> Result<PeerId, NetplayError> {
            Ok(PeerId::new(0))
        }
        fn set_local_delay(&mut self, _: PeerId, _: u32) -> Result<(), NetplayError> {
            Ok(())
        }
        fn add_local_input(&mut self, _: PeerId, _: &[u8]) -> Result<(), NetplayError> {
            Ok(())
        }
        fn network_poll(&mut self) {
            self.polls += 1;
            if self.thread_names.is_empty() {
                self.thread_names
                    .push(thread::current().name().map(str::to_owned));
            }
        }
        fn frames_ahead(&self) -> f32 {
            0.0
        }
        fn network_stats(&self, _: PeerId) -> Option<NetStats> {
            None
        }
        fn drain_events(&mut self) -> Vec<SessionEvent> {
            Vec::new()
        }
        fn update_session(&mut self) -> Vec<SessionUpdate> {
            Vec::new()
        }
        fn submit_saves(&mut self, _: Vec<SaveReport>) {}
    }

    fn wait_for_polls(handle: &SessionHandle<Counting>, at_least: u64) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if handle.with_session(|t| t.polls) >= at_least {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn polls_on_a_named_thread() {
        let handle = SessionHandle::new(Counting::default());
        let mut poller = NetworkPoller::new();
        poller.start(&handle, Duration::from_millis(1)).unwrap();
        assert!(poller.is_running());
        assert!(wait_for_polls(&handle, 3));
        poller.stop();

        let names = handle.with_session(|t| t.thread_names.clone());
        assert_eq!(names, vec![Some(POLL_THREAD_NAME.to_owned())]);
    }

    #[test]
    fn stop_joins_and_polling_ceases() {
        let handle = SessionHandle::new(Counting::default());
        let mut poller = NetworkPoller::new();
        poller.start(&handle, Duration::from_millis(1)).unwrap();
        assert!(wait_for_polls(&handle, 1));
        poller.stop();
        assert!(!poller.is_running());

        let after_stop = handle.with_session(|t| t.polls);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(handle.with_session(|t| t.polls), after_stop);
        assert_eq!(handle.strong_count(), 1);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let handle = SessionHandle::new(Counting::default());
        let mut poller = NetworkPoller::new();
        poller.stop();
        poller.start(&handle, Duration::from_millis(1)).unwrap();
        poller.start(&handle, Duration::from_millis(1)).unwrap();
        poller.stop();
        poller.stop();
        assert!(!poller.is_running());
    }

    #[test]
    fn exits_when_transport_is_dropped() {
        let handle = SessionHandle::new(Counting::default());
        let mut poller = NetworkPoller::new();
        poller.start(&handle, Duration::from_millis(1)).unwrap();
        drop(handle);

        let deadline = Instant::now() + Duration::from_secs(5);
        while poller.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!poller.is_running());
        poller.stop();
    }

    #[test]
    fn can_restart_after_stop() {
        let handle = SessionHandle::new(Counting::default());
        let mut poller = NetworkPoller::new();
        poller.start(&handle, Duration::from_millis(1)).unwrap();
        poller.stop();
        let before = handle.with_session(|t| t.polls);
        poller.start(&handle, Duration::from_millis(1)).unwrap();
        assert!(wait_for_polls(&handle, before + 1));
    }
}
