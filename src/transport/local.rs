//! In-process transport for sessions without remote peers.
//!
//! [`LocalTransport`] confirms every input as soon as all local players have
//! submitted one, so it never predicts and never asks for a rollback. Each
//! frame produces a Save followed by an Advance. It lets a host run the whole
//! netplay code path (save ring, delay, poller, observers) on one machine, and
//! gives tests a transport with fully predictable output.

use std::collections::{BTreeMap, VecDeque};

use tracing::trace;

use crate::error::NetplayError;
use crate::network::network_stats::NetStats;
use crate::sessions::config::SessionConfig;
use crate::transport::{SaveReport, SessionEvent, SessionTransport, SessionUpdate, TransportFactory};
use crate::{Frame, PeerId, PeerRole};

/// A transport serving local players only.
#[derive(Debug)]
pub struct LocalTransport {
    config: SessionConfig,
    local_port: u16,
    queues: BTreeMap<PeerId, VecDeque<Vec<u8>>>,
    frame: Frame,
    started: bool,
    events: Vec<SessionEvent>,
    polls: u64,
    saves_received: u64,
    last_save: Option<SaveReport>,
}

impl LocalTransport {
    /// Creates a transport for `config`. Nothing is bound: `local_port` is only
    /// recorded.
    #[must_use]
    pub fn new(local_port: u16, config: SessionConfig) -> Self {
        Self {
            config,
            local_port,
            queues: BTreeMap::new(),
            frame: Frame::new(0),
            started: false,
            events: Vec::new(),
            polls: 0,
            saves_received: 0,
            last_save: None,
        }
    }

    /// The configuration the transport was created with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The port the session was asked to listen on.
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// The next frame to be produced.
    #[must_use]
    pub fn current_frame(&self) -> Frame {
        self.frame
    }

    /// Number of [`SessionTransport::network_poll`] calls so far.
    #[must_use]
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Number of save reports received so far.
    #[must_use]
    pub fn saves_received(&self) -> u64 {
        self.saves_received
    }

    /// The most recent save report.
    #[must_use]
    pub fn last_save(&self) -> Option<&SaveReport> {
        self.last_save.as_ref()
    }

    fn blank_input(&self) -> Vec<u8> {
        vec![0; self.config.input_size]
    }

    fn frame_ready(&self) -> bool {
        !self.queues.is_empty() && self.queues.values().all(|queue| !queue.is_empty())
    }
}

impl SessionTransport for LocalTransport {
    fn add_actor(
        &mut self,
        role: PeerRole,
        address: Option<&str>,
    ) -> Result<PeerId, NetplayError> {
        if role != PeerRole::LocalPlayer {
            return Err(NetplayError::Transport {
                context: format!(
                    "local transport cannot reach {:?} at {}",
                    role,
                    address.unwrap_or("<no address>")
                ),
            });
        }
        let id = PeerId::new(self.queues.len());
        self.queues.insert(id, VecDeque::new());
        Ok(id)
    }

    fn set_local_delay(&mut self, peer: PeerId, delay: u32) -> Result<(), NetplayError> {
        let blank = self.blank_input();
        let queue = self
            .queues
            .get_mut(&peer)
            .ok_or_else(|| NetplayError::Transport {
                context: format!("no local player with id {}", peer),
            })?;
        queue.clear();
        queue.extend((0..delay).map(|_| blank.clone()));
        Ok(())
    }

    fn add_local_input(&mut self, peer: PeerId, input: &[u8]) -> Result<(), NetplayError> {
        if input.len() != self.config.input_size {
            return Err(NetplayError::Transport {
                context: format!(
                    "input of {} bytes, expected {}",
                    input.len(),
                    self.config.input_size
                ),
            });
        }
        let queue = self
            .queues
            .get_mut(&peer)
            .ok_or_else(|| NetplayError::Transport {
                context: format!("no local player with id {}", peer),
            })?;
        queue.push_back(input.to_vec());
        if !self.started {
            self.started = true;
            self.events.push(SessionEvent::SessionStarted);
        }
        Ok(())
    }

    fn network_poll(&mut self) {
        self.polls += 1;
    }

    fn frames_ahead(&self) -> f32 {
        0.0
    }

    fn network_stats(&self, _peer: PeerId) -> Option<NetStats> {
        None
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    fn update_session(&mut self) -> Vec<SessionUpdate> {
        if !self.frame_ready() {
            return Vec::new();
        }
        let mut inputs = Vec::with_capacity(self.config.input_block_size());
        for queue in self.queues.values_mut() {
            if let Some(input) = queue.pop_front() {
                inputs.extend_from_slice(&input);
            }
        }
        // Ports without a player read as released.
        inputs.resize(self.config.input_block_size(), 0);

        let frame = self.frame;
        self.frame += 1;
        trace!(frame = frame.as_i32(), "Local frame confirmed");
        vec![
            SessionUpdate::Save { frame },
            SessionUpdate::Advance { frame, inputs },
        ]
    }

    fn submit_saves(&mut self, reports: Vec<SaveReport>) {
        self.saves_received += reports.len() as u64;
        if let Some(last) = reports.into_iter().last() {
            self.last_save = Some(last);
        }
    }
}

/// Creates a [`LocalTransport`] per session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LocalTransportFactory;

impl LocalTransportFactory {
    /// Creates a new factory.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TransportFactory for LocalTransportFactory {
    type Transport = LocalTransport;

    fn create(
        &mut self,
        local_port: u16,
        config: &SessionConfig,
    ) -> Result<LocalTransport, NetplayError> {
        Ok(LocalTransport::new(local_port, *config))
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

    fn transport(players: usize) -> LocalTransport {
        LocalTransport::new(
            7000,
            SessionConfig {
                num_players: players,
                ..SessionConfig::default()
            },
        )
    }

    #[test]
    fn remote_actors_are_rejected() {
        let mut local = transport(2);
        assert!(local.add_actor(PeerRole::LocalPlayer, None).is_ok());
        let err = local
            .add_actor(PeerRole::RemotePlayer, Some("203.0.113.5:7000"))
            .unwrap_err();
        assert!(err.to_string().contains("203.0.113.5:7000"));
        assert!(local.add_actor(PeerRole::Spectator, Some("s")).is_err());
    }

    #[test]
    fn nothing_happens_without_input() {
        let mut local = transport(1);
        local.add_actor(PeerRole::LocalPlayer, None).unwrap();
        assert!(local.update_session().is_empty());
        assert!(local.drain_events().is_empty());
    }

    #[test]
    fn each_input_confirms_one_frame() {
        let mut local = transport(1);
        let peer = local.add_actor(PeerRole::LocalPlayer, None).unwrap();

        local.add_local_input(peer, &[0x01, 0x00]).unwrap();
        assert_eq!(local.drain_events(), vec![SessionEvent::SessionStarted]);
        assert_eq!(
            local.update_session(),
            vec![
                SessionUpdate::Save {
                    frame: Frame::new(0)
                },
                SessionUpdate::Advance {
                    frame: Frame::new(0),
                    inputs: vec![0x01, 0x00],
                },
            ]
        );
        assert_eq!(local.current_frame(), Frame::new(1));

        local.add_local_input(peer, &[0x02, 0x00]).unwrap();
        assert!(local.drain_events().is_empty());
        assert_eq!(local.update_session().len(), 2);
    }

    #[test]
    fn delay_holds_inputs_back() {
        let mut local = transport(1);
        let peer = local.add_actor(PeerRole::LocalPlayer, None).unwrap();
        local.set_local_delay(peer, 2).unwrap();

        let mut advanced = Vec::new();
        for value in 1u8..=3 {
            local.add_local_input(peer, &[value, 0]).unwrap();
            for update in local.update_session() {
                if let SessionUpdate::Advance { inputs, .. } = update {
                    advanced.push(inputs[0]);
                }
            }
        }
        assert_eq!(advanced, vec![0, 0, 1]);
    }

    #[test]
    fn block_is_padded_to_player_count() {
        let mut local = transport(3);
        let peer = local.add_actor(PeerRole::LocalPlayer, None).unwrap();
        local.add_local_input(peer, &[0xFF, 0x0F]).unwrap();
        let updates = local.update_session();
        assert_eq!(
            updates[1],
            SessionUpdate::Advance {
                frame: Frame::new(0),
                inputs: vec![0xFF, 0x0F, 0, 0, 0, 0],
            }
        );
    }

    #[test]
    fn wrong_sized_input_is_rejected() {
        let mut local = transport(1);
        let peer = local.add_actor(PeerRole::LocalPlayer, None).unwrap();
        assert!(local.add_local_input(peer, &[1]).is_err());
        assert!(local.add_local_input(PeerId::new(9), &[1, 0]).is_err());
    }

    #[test]
    fn saves_and_polls_are_counted() {
        let mut local = transport(1);
        local.network_poll();
        local.network_poll();
        local.submit_saves(vec![
            SaveReport {
                frame: Frame::new(0),
                checksum: 1,
                payload: vec![0; 4],
            },
            SaveReport {
                frame: Frame::new(1),
                checksum: 2,
                payload: vec![1, 0, 0, 0],
            },
        ]);
        assert_eq!(local.polls(), 2);
        assert_eq!(local.saves_received(), 2);
        assert_eq!(local.last_save().unwrap().frame, Frame::new(1));
        assert!(local.frames_ahead().abs() < f32::EPSILON);
        assert!(local.network_stats(PeerId::new(0)).is_none());
    }

    #[test]
    fn factory_passes_config_through() {
        let config = SessionConfig {
            num_players: 2,
            ..SessionConfig::default()
        };
        let local = LocalTransportFactory::new().create(9000, &config).unwrap();
        assert_eq!(local.local_port(), 9000);
        assert_eq!(local.config(), &config);
    }
}
