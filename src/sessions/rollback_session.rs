use crate::buttons::{Device, InputBlock};
use crate::codec::{self, INPUT_SIZE};
use crate::error::NetplayError;
use crate::hash::snapshot_checksum;
use crate::host::{Emulator, Host};
use crate::input_sampler::InputSampler;
use crate::network::network_stats::NetStats;
use crate::network::poller::NetworkPoller;
use crate::sessions::builder::{StartRequest, Topology};
use crate::sessions::config::{SessionConfig, TuningConfig};
use crate::sessions::peer_registry::{Peer, PeerRegistry};
use crate::sessions::sync_regulator::{StallMonitor, StallVerdict, SyncRegulator};
use crate::sync_layer::save_states::SaveStateStore;
use crate::telemetry::{SessionObserver, TracingObserver};
use crate::transport::{
    SaveReport, SessionHandle, SessionTransport, SessionUpdate, TransportFactory,
};
use crate::{Buttons, Frame, PeerId, PeerRole, SessionMode};
use tracing::{debug, error, trace, warn};

use std::collections::BTreeMap;
use std::sync::Arc;

/// Engine option that must be fixed for every peer to produce identical frames.
const ENTROPY_KEY: &str = "Hacks/Entropy";
const ENTROPY_NONE: &str = "None";

/// A [`RollbackSession`] drives one emulator through a rollback netplay session.
///
/// The host creates it once with a [`TransportFactory`], calls
/// [`start`](Self::start) with a [`StartRequest`], then [`tick`](Self::tick)
/// once per emulated frame until [`stop`](Self::stop). Between ticks the engine
/// reads controller state through [`local_input`](Self::local_input) and the
/// audio layer checks [`is_muted`](Self::is_muted).
///
/// # Example
///
/// ```
/// use netplay_rollback::{LocalTransportFactory, RollbackSession, SessionMode};
///
/// let session = RollbackSession::new(LocalTransportFactory::new());
/// assert_eq!(session.mode(), SessionMode::Inactive);
/// assert_eq!(session.local_input(0, netplay_rollback::Device::Gamepad, 0), 0);
/// ```
pub struct RollbackSession<F>
where
    F: TransportFactory,
{
    factory: F,
    tuning: TuningConfig,
    sampler: InputSampler,
    observer: Arc<dyn SessionObserver>,
    mode: SessionMode,
    running: Option<RunningSession<F::Transport>>,
}

/// Everything that exists only while a session is [`SessionMode::Running`].
struct RunningSession<T> {
    handle: SessionHandle<T>,
    poller: NetworkPoller,
    config: SessionConfig,
    peers: PeerRegistry,
    inputs: InputBlock,
    stats: BTreeMap<PeerId, NetStats>,
    states: SaveStateStore,
    regulator: SyncRegulator,
    stall: StallMonitor,
    muted: bool,
    ticks: u64,
}

impl<F> RollbackSession<F>
where
    F: TransportFactory,
{
    /// Creates an inactive session that will build its transports with `factory`.
    #[must_use]
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            tuning: TuningConfig::default(),
            sampler: InputSampler::new(),
            observer: Arc::new(TracingObserver::new()),
            mode: SessionMode::Inactive,
            running: None,
        }
    }

    /// Replaces the tuning used by the next [`start`](Self::start).
    #[must_use]
    pub fn with_tuning(mut self, tuning: TuningConfig) -> Self {
        self.tuning = tuning;
        self
    }

    /// Replaces where local input is read from.
    #[must_use]
    pub fn with_sampler(mut self, sampler: InputSampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Replaces the sink for connection and status events.
    ///
    /// The default is a [`TracingObserver`].
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Starts a session.
    ///
    /// Does nothing if a session is already running. Otherwise the request is
    /// validated, the emulator is reset into a deterministic state, the
    /// transport is created and every peer attached, and network polling
    /// begins.
    ///
    /// # Errors
    ///
    /// - [`NetplayError::Topology`] if the request is malformed. Nothing is
    ///   touched in that case.
    /// - [`NetplayError::Transport`] if the transport cannot be created, a peer
    ///   cannot be attached or the poller cannot be spawned.
    /// - [`NetplayError::StateBufferExhausted`] if the save-state ring cannot be
    ///   allocated.
    ///
    /// On error the session is back in [`SessionMode::Inactive`].
    pub fn start(&mut self, request: StartRequest, host: &mut Host<'_>) -> Result<(), NetplayError> {
        if self.running.is_some() {
            return Ok(());
        }
        self.mode = SessionMode::Setup;
        match self.open(&request, host) {
            Ok(running) => {
                debug!(
                    players = running.config.num_players,
                    peers = running.peers.len(),
                    save_states = running.states.capacity(),
                    state_size = running.config.state_size,
                    "Netplay session running"
                );
                self.running = Some(running);
                self.mode = SessionMode::Running;
                Ok(())
            },
            Err(err) => {
                warn!(%err, "Netplay session failed to start");
                self.mode = SessionMode::Inactive;
                Err(err)
            },
        }
    }

    fn open(
        &mut self,
        request: &StartRequest,
        host: &mut Host<'_>,
    ) -> Result<RunningSession<F::Transport>, NetplayError> {
        let topology = request.validate()?;

        prepare_emulator(host.emulator, &topology);
        let snapshot_len = host.emulator.serialize().len();

        let config = SessionConfig {
            num_players: topology.player_count(),
            input_size: INPUT_SIZE,
            state_size: topology.save_payload().state_size(snapshot_len),
            max_spectators: topology.max_spectators(),
            input_prediction_window: topology.rollback_window(),
            spectator_delay: self.tuning.spectator_delay,
            local_delay: topology.local_delay(),
            save_payload: topology.save_payload(),
        };

        let mut states =
            SaveStateStore::with_capacity(topology.state_capacity(self.tuning.spectator_delay));
        if let Some(limit) = self.tuning.max_snapshot_bytes {
            states = states.with_slot_limit(limit);
        }
        states.reserve_each(snapshot_len)?;

        let handle = SessionHandle::new(self.factory.create(topology.local_port(), &config)?);
        let peers = handle.with_session(|transport| {
            PeerRegistry::build(&topology, |spec| {
                let id = transport.add_actor(spec.role, spec.address.as_deref())?;
                if spec.role == PeerRole::LocalPlayer {
                    transport.set_local_delay(id, topology.local_delay())?;
                }
                trace!(peer = %id, role = ?spec.role, slot = ?spec.slot, "Peer attached");
                Ok(id)
            })
        })?;

        let mut poller = NetworkPoller::new();
        poller.start(&handle, self.tuning.poll_interval)?;

        host.window.set_block_background_input(true);

        Ok(RunningSession {
            handle,
            poller,
            config,
            peers,
            inputs: InputBlock::with_ports(topology.input_slots()),
            stats: BTreeMap::new(),
            states,
            regulator: SyncRegulator::new(self.tuning.rift),
            stall: StallMonitor::new(self.tuning.stall_mute_threshold),
            muted: false,
            ticks: 0,
        })
    }

    /// Ends the session. Does nothing if no session is running.
    ///
    /// Polling stops before the transport is dropped, so no packet is sent or
    /// received afterwards. All session state is released.
    pub fn stop(&mut self, host: &mut Host<'_>) {
        let Some(mut running) = self.running.take() else {
            self.mode = SessionMode::Inactive;
            return;
        };
        running.poller.stop();
        let ticks = running.ticks;
        drop(running);

        self.mode = SessionMode::Inactive;
        host.emulator.set_run_ahead(false);
        host.window.set_block_background_input(false);
        host.window.set_pause_on_focus_loss(true);
        debug!(ticks, "Netplay session stopped");
    }

    /// Runs one synchronization step.
    ///
    /// Returns `false` if no session is running, or if the session had to be
    /// torn down because the save-state ring could not grow.
    pub fn tick(&mut self, host: &mut Host<'_>) -> bool {
        let Some(running) = self.running.as_mut() else {
            return false;
        };
        match running.step(host, &self.sampler, self.observer.as_ref()) {
            Ok(()) => true,
            Err(err) => {
                error!(%err, "Netplay session cannot continue");
                self.stop(host);
                false
            },
        }
    }

    /// Reads one button of the inputs applied to the last frame.
    ///
    /// With [`Device::Multitap`] the button index spans the pads behind the
    /// tap. Anything out of range, or any read without a running session,
    /// returns `0`.
    #[must_use]
    pub fn local_input(&self, port: usize, device: Device, button: usize) -> i16 {
        self.running
            .as_ref()
            .map_or(0, |running| running.inputs.get(port, device, button))
    }

    /// Current lifecycle stage.
    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Returns `true` while a session is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.mode == SessionMode::Running
    }

    /// Returns `true` while audio should be silent: during a rollback replay
    /// or after the transport stalled for too long.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.running.as_ref().is_some_and(|running| running.muted)
    }

    /// Every peer in canonical order. Empty without a running session.
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.running
            .iter()
            .flat_map(|running| running.peers.iter())
    }

    /// Looks up a peer by transport id.
    #[must_use]
    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.running.as_ref()?.peers.get(id)
    }

    /// Latest statistics for a remote player.
    #[must_use]
    pub fn net_stats(&self, id: PeerId) -> Option<NetStats> {
        self.running.as_ref()?.stats.get(&id).copied()
    }

    /// Configuration the transport was created with.
    #[must_use]
    pub fn config(&self) -> Option<&SessionConfig> {
        self.running.as_ref().map(|running| &running.config)
    }

    /// The tuning for this and future sessions.
    #[must_use]
    pub fn tuning(&self) -> &TuningConfig {
        &self.tuning
    }

    /// Inputs applied to the last frame, one per port.
    #[must_use]
    pub fn inputs(&self) -> &[Buttons] {
        self.running
            .as_ref()
            .map_or(&[], |running| running.inputs.as_slice())
    }

    /// The save-state ring, while a session is running.
    #[must_use]
    pub fn save_states(&self) -> Option<&SaveStateStore> {
        self.running.as_ref().map(|running| &running.states)
    }

    /// Number of save-state slots. `0` without a running session.
    #[must_use]
    pub fn save_state_capacity(&self) -> usize {
        self.save_states().map_or(0, SaveStateStore::capacity)
    }

    /// Consecutive ticks without any update.
    #[must_use]
    pub fn stall_counter(&self) -> u32 {
        self.running
            .as_ref()
            .map_or(0, |running| running.stall.counter())
    }

    /// Ticks since the session started.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.running.as_ref().map_or(0, |running| running.ticks)
    }

    /// Frames burned to resynchronize since the session started.
    #[must_use]
    pub fn rift_corrections(&self) -> u64 {
        self.running
            .as_ref()
            .map_or(0, |running| running.regulator.corrections())
    }

    /// Runs `f` with the transport locked. `None` without a running session.
    pub fn with_transport<R>(&self, f: impl FnOnce(&mut F::Transport) -> R) -> Option<R> {
        self.running
            .as_ref()
            .map(|running| running.handle.with_session(f))
    }
}

impl<F> std::fmt::Debug for RollbackSession<F>
where
    F: TransportFactory,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackSession")
            .field("mode", &self.mode)
            .field("tuning", &self.tuning)
            .field("sampler", &self.sampler)
            .field("ticks", &self.tick_count())
            .field("muted", &self.is_muted())
            .finish_non_exhaustive()
    }
}

fn prepare_emulator(emulator: &mut dyn Emulator, topology: &Topology) {
    emulator.connect(0, Device::Gamepad);
    let second = if topology.needs_multitap() {
        Device::Multitap
    } else {
        Device::Gamepad
    };
    emulator.connect(1, second);
    emulator.configure(ENTROPY_KEY, ENTROPY_NONE);
    emulator.power();
}

/// Returns `true` if the Advance at `index` is the last one of the batch: it is
/// either the final update, or only a Save follows it.
fn is_last_advance(index: usize, updates: &[SessionUpdate]) -> bool {
    let Some(last) = updates.len().checked_sub(1) else {
        return false;
    };
    index == last || (index + 1 == last && updates.get(last).is_some_and(SessionUpdate::is_save))
}

impl<T> RunningSession<T>
where
    T: SessionTransport,
{
    fn step(
        &mut self,
        host: &mut Host<'_>,
        sampler: &InputSampler,
        observer: &dyn SessionObserver,
    ) -> Result<(), NetplayError> {
        self.ticks += 1;

        if self.regulator.is_check_tick(self.ticks) {
            let frames_ahead = self.handle.with_session(|transport| transport.frames_ahead());
            if self
                .regulator
                .should_correct(self.ticks, frames_ahead, self.config.local_delay)
            {
                self.regulator
                    .correct(&mut *host.emulator, &mut *host.audio, &self.inputs);
                return Ok(());
            }
        }

        let local_input = match self.peers.local_player() {
            Some(local) => {
                let buttons = sampler.sample(&mut *host.input, &*host.window);
                match codec::encode_buttons(buttons) {
                    Ok(bytes) => Some((local.id, bytes)),
                    Err(err) => {
                        warn!(%err, "Dropping local input that failed to encode");
                        None
                    },
                }
            },
            None => None,
        };
        let remotes: Vec<PeerId> = self.peers.remote_players().map(|peer| peer.id).collect();

        let (events, updates, stats) = self.handle.with_session(|transport| {
            if let Some((peer, bytes)) = &local_input {
                if let Err(err) = transport.add_local_input(*peer, bytes) {
                    warn!(%err, peer = %peer, "Transport refused local input");
                }
            }
            let stats: Vec<(PeerId, NetStats)> = remotes
                .iter()
                .filter_map(|peer| transport.network_stats(*peer).map(|stats| (*peer, stats)))
                .collect();
            (transport.drain_events(), transport.update_session(), stats)
        });

        self.stats.extend(stats);
        for event in &events {
            observer.on_event(event);
        }

        let mut reports = Vec::new();
        for (index, update) in updates.iter().enumerate() {
            match update {
                SessionUpdate::Save { frame } => match self.save(host.emulator, *frame) {
                    Ok(report) => reports.push(report),
                    Err(err @ NetplayError::StateBufferExhausted { .. }) => return Err(err),
                    Err(err) => warn!(%err, "Skipping save"),
                },
                SessionUpdate::Load { frame } => self.load(host.emulator, *frame),
                SessionUpdate::Advance { frame, inputs } => {
                    if host.emulator.run_ahead() && is_last_advance(index, &updates) {
                        host.emulator.set_run_ahead(false);
                        self.muted = false;
                    }
                    self.advance(host.emulator, *frame, inputs);
                },
            }
        }

        if !reports.is_empty() {
            self.handle
                .with_session(|transport| transport.submit_saves(reports));
        }

        match self.stall.record(updates.len()) {
            StallVerdict::Flowing => self.muted = false,
            StallVerdict::Waiting => {},
            StallVerdict::Stalled => {
                if !self.muted {
                    debug!(empty_ticks = self.stall.counter(), "Transport stalled, muting");
                }
                self.muted = true;
            },
        }
        Ok(())
    }

    fn save(&mut self, emulator: &mut dyn Emulator, frame: Frame) -> Result<SaveReport, NetplayError> {
        let snapshot = emulator.serialize();
        self.states.set(frame, &snapshot)?;
        let checksum = snapshot_checksum(&snapshot);
        trace!(frame = frame.as_i32(), bytes = snapshot.len(), checksum, "Saved state");
        Ok(SaveReport {
            frame,
            checksum,
            payload: self.config.save_payload.payload(frame, &snapshot),
        })
    }

    fn load(&mut self, emulator: &mut dyn Emulator, frame: Frame) {
        match self.states.get(frame) {
            Some(state) => {
                if !emulator.unserialize(state) {
                    warn!(frame = frame.as_i32(), "Emulator rejected a saved state");
                }
            },
            None => warn!(frame = frame.as_i32(), "No saved state to roll back to"),
        }
        trace!(frame = frame.as_i32(), "Rolled back");
        self.muted = true;
        emulator.set_run_ahead(true);
    }

    fn advance(&mut self, emulator: &mut dyn Emulator, frame: Frame, inputs: &[u8]) {
        match codec::decode_input_block(inputs, self.config.num_players) {
            Ok(decoded) => self.inputs.copy_from(&decoded),
            Err(err) => {
                warn!(frame = frame.as_i32(), %err, "Running frame with released inputs");
                self.inputs.reset();
            },
        }
        emulator.run(&self.inputs);
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
    use crate::transport::local::LocalTransportFactory;

    fn save(frame: i32) -> SessionUpdate {
        SessionUpdate::Save {
            frame: Frame::new(frame),
        }
    }

    fn load(frame: i32) -> SessionUpdate {
        SessionUpdate::Load {
            frame: Frame::new(frame),
        }
    }

    fn advance(frame: i32) -> SessionUpdate {
        SessionUpdate::Advance {
            frame: Frame::new(frame),
            inputs: vec![0, 0],
        }
    }

    #[test]
    fn final_update_is_last_advance() {
        let updates = [load(3), advance(3), advance(4)];
        assert!(!is_last_advance(1, &updates));
        assert!(is_last_advance(2, &updates));
    }

    #[test]
    fn advance_followed_by_one_save_is_last() {
        let updates = [load(3), advance(3), save(4), advance(4), save(5)];
        assert!(!is_last_advance(1, &updates));
        assert!(is_last_advance(3, &updates));
    }

    #[test]
    fn advance_followed_by_more_work_is_not_last() {
        let updates = [advance(1), save(2), advance(2)];
        assert!(!is_last_advance(0, &updates));
        assert!(!is_last_advance(0, &[]));
    }

    #[test]
    fn inactive_session_reports_nothing() {
        let session = RollbackSession::new(LocalTransportFactory::new());
        assert_eq!(session.mode(), SessionMode::Inactive);
        assert!(!session.is_running());
        assert!(!session.is_muted());
        assert_eq!(session.peers().count(), 0);
        assert!(session.inputs().is_empty());
        assert!(session.config().is_none());
        assert_eq!(session.save_state_capacity(), 0);
        assert_eq!(session.stall_counter(), 0);
        assert_eq!(session.tick_count(), 0);
        assert_eq!(session.rift_corrections(), 0);
        assert!(session.with_transport(|transport| transport.polls()).is_none());
        assert_eq!(session.local_input(0, Device::Multitap, 13), 0);
    }

    #[test]
    fn tuning_is_applied_by_builder() {
        let session = RollbackSession::new(LocalTransportFactory::new())
            .with_tuning(TuningConfig::lan());
        assert_eq!(session.tuning(), &TuningConfig::lan());
    }
}
