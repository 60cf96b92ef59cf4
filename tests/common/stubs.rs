//! Host and transport stubs shared by the integration tests.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::use_self,
    dead_code
)]

use netplay_rollback::{
    AudioOutput, Buttons, Device, Emulator, Host, HostWindow, InputBlock, InputManager,
    InputMapping, NetStats, NetplayError, PeerId, PeerRole, SaveReport, SessionConfig,
    SessionEvent, SessionTransport, SessionUpdate, SnesButton, TransportFactory,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

// ============================================================================
// Emulator
// ============================================================================

/// A deterministic machine whose whole state is a frame counter and a running
/// digest of every input it has seen.
#[derive(Debug, Default)]
pub struct EmulatorStub {
    pub frame: u32,
    pub digest: u32,
    pub runs: u32,
    pub powered: u32,
    pub serialized: u32,
    pub unserialized: u32,
    pub run_ahead: bool,
    pub run_ahead_per_run: Vec<bool>,
    pub last_inputs: Vec<Buttons>,
    pub configured: Vec<(String, String)>,
    pub connected: Vec<(usize, Device)>,
    /// Pads the snapshot to this many bytes.
    pub snapshot_padding: usize,
    pub reject_snapshots: bool,
}

impl EmulatorStub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> (u32, u32) {
        (self.frame, self.digest)
    }

    /// The snapshot `serialize` would produce right now.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + self.snapshot_padding);
        bytes.extend_from_slice(&self.frame.to_le_bytes());
        bytes.extend_from_slice(&self.digest.to_le_bytes());
        bytes.resize(8 + self.snapshot_padding, 0xAB);
        bytes
    }
}

impl Emulator for EmulatorStub {
    fn serialize(&mut self) -> Vec<u8> {
        self.serialized += 1;
        self.snapshot()
    }

    fn unserialize(&mut self, state: &[u8]) -> bool {
        self.unserialized += 1;
        if self.reject_snapshots || state.len() < 8 {
            return false;
        }
        self.frame = u32::from_le_bytes(state[0..4].try_into().unwrap());
        self.digest = u32::from_le_bytes(state[4..8].try_into().unwrap());
        true
    }

    fn run(&mut self, inputs: &InputBlock) {
        self.runs += 1;
        self.frame += 1;
        for input in inputs.as_slice() {
            self.digest = self
                .digest
                .wrapping_mul(31)
                .wrapping_add(u32::from(input.bits()));
        }
        self.last_inputs = inputs.as_slice().to_vec();
        self.run_ahead_per_run.push(self.run_ahead);
    }

    fn power(&mut self) {
        self.powered += 1;
        self.frame = 0;
        self.digest = 0;
    }

    fn set_run_ahead(&mut self, enabled: bool) {
        self.run_ahead = enabled;
    }

    fn run_ahead(&self) -> bool {
        self.run_ahead
    }

    fn configure(&mut self, key: &str, value: &str) {
        self.configured.push((key.to_owned(), value.to_owned()));
    }

    fn connect(&mut self, port: usize, device: Device) {
        self.connected.push((port, device));
    }
}

// ============================================================================
// Input, audio and window
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct KeyBinding(bool);

impl InputMapping for KeyBinding {
    fn poll(&self) -> bool {
        self.0
    }
}

/// First pad on port 0, device 1. Every button is bound.
#[derive(Debug, Default)]
pub struct PadStub {
    pub bindings: [KeyBinding; 12],
    pub polls: u32,
}

impl PadStub {
    pub fn hold(&mut self, button: SnesButton) {
        self.bindings[button.index()] = KeyBinding(true);
    }

    pub fn release_all(&mut self) {
        self.bindings = [KeyBinding(false); 12];
    }
}

impl InputManager for PadStub {
    fn poll(&mut self) {
        self.polls += 1;
    }

    fn mapping(&self, port: usize, device: usize, button: SnesButton) -> Option<&dyn InputMapping> {
        if port != 0 || device != Device::Gamepad.id() {
            return None;
        }
        self.bindings
            .get(button.index())
            .map(|binding| binding as &dyn InputMapping)
    }
}

#[derive(Debug)]
pub struct SpeakerStub {
    pub volume: f32,
    pub history: Vec<f32>,
}

impl Default for SpeakerStub {
    fn default() -> Self {
        Self {
            volume: 1.0,
            history: Vec::new(),
        }
    }
}

impl AudioOutput for SpeakerStub {
    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        self.history.push(volume);
    }
}

#[derive(Debug)]
pub struct WindowStub {
    pub focused: bool,
    pub background_input: bool,
    pub block_background: Option<bool>,
    pub pause_on_focus_loss: Option<bool>,
}

impl Default for WindowStub {
    fn default() -> Self {
        Self {
            focused: true,
            background_input: false,
            block_background: None,
            pause_on_focus_loss: None,
        }
    }
}

impl HostWindow for WindowStub {
    fn focused(&self) -> bool {
        self.focused
    }

    fn allow_background_input(&self) -> bool {
        self.background_input
    }

    fn set_block_background_input(&mut self, block: bool) {
        self.block_background = Some(block);
    }

    fn set_pause_on_focus_loss(&mut self, pause: bool) {
        self.pause_on_focus_loss = Some(pause);
    }
}

/// Owns every host collaborator and lends them out as a [`Host`].
#[derive(Debug, Default)]
pub struct HostStub {
    pub emulator: EmulatorStub,
    pub pad: PadStub,
    pub speaker: SpeakerStub,
    pub window: WindowStub,
}

impl HostStub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(&mut self) -> Host<'_> {
        Host::new(
            &mut self.emulator,
            &mut self.pad,
            &mut self.speaker,
            &mut self.window,
        )
    }
}

// ============================================================================
// Scripted transport
// ============================================================================

/// Everything the scripted transport was told, and what it will answer.
#[derive(Debug, Default)]
pub struct Script {
    pub local_port: Option<u16>,
    pub config: Option<SessionConfig>,
    pub actors: Vec<(PeerRole, Option<String>)>,
    pub delays: Vec<(PeerId, u32)>,
    pub inputs: Vec<(PeerId, Vec<u8>)>,
    pub saves: Vec<SaveReport>,
    pub polls: u64,
    pub frames_ahead_queries: u32,
    pub dropped: bool,

    /// One batch is handed out per `update_session` call.
    pub batches: VecDeque<Vec<SessionUpdate>>,
    /// Handed out in full by the next `drain_events` call.
    pub events: Vec<SessionEvent>,
    pub frames_ahead: f32,
    pub stats: BTreeMap<PeerId, NetStats>,
    /// Attaching a peer with this role fails.
    pub refuse_role: Option<PeerRole>,
}

pub type SharedScript = Arc<Mutex<Script>>;

#[derive(Debug)]
pub struct ScriptedTransport {
    script: SharedScript,
}

impl SessionTransport for ScriptedTransport {
    fn add_actor(
        &mut self,
        role: PeerRole,
        address: Option<&str>,
    ) -> Result<PeerId, NetplayError> {
        let mut script = self.script.lock();
        if script.refuse_role == Some(role) {
            return Err(NetplayError::Transport {
                context: format!("refusing {:?}", role),
            });
        }
        script.actors.push((role, address.map(str::to_owned)));
        Ok(PeerId::new(100 + script.actors.len()))
    }

    fn set_local_delay(&mut self, peer: PeerId, delay: u32) -> Result<(), NetplayError> {
        self.script.lock().delays.push((peer, delay));
        Ok(())
    }

    fn add_local_input(&mut self, peer: PeerId, input: &[u8]) -> Result<(), NetplayError> {
        self.script.lock().inputs.push((peer, input.to_vec()));
        Ok(())
    }

    fn network_poll(&mut self) {
        self.script.lock().polls += 1;
    }

    fn frames_ahead(&self) -> f32 {
        let mut script = self.script.lock();
        script.frames_ahead_queries += 1;
        script.frames_ahead
    }

    fn network_stats(&self, peer: PeerId) -> Option<NetStats> {
        self.script.lock().stats.get(&peer).copied()
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.script.lock().events)
    }

    fn update_session(&mut self) -> Vec<SessionUpdate> {
        self.script.lock().batches.pop_front().unwrap_or_default()
    }

    fn submit_saves(&mut self, reports: Vec<SaveReport>) {
        self.script.lock().saves.extend(reports);
    }
}

impl Drop for ScriptedTransport {
    fn drop(&mut self) {
        self.script.lock().dropped = true;
    }
}

/// Hands out [`ScriptedTransport`]s that all share one [`Script`].
#[derive(Debug, Default)]
pub struct ScriptedFactory {
    pub script: SharedScript,
    pub refuse: bool,
    pub created: usize,
}

impl ScriptedFactory {
    #[must_use]
    pub fn new() -> (Self, SharedScript) {
        let factory = Self::default();
        let script = Arc::clone(&factory.script);
        (factory, script)
    }
}

impl TransportFactory for ScriptedFactory {
    type Transport = ScriptedTransport;

    fn create(
        &mut self,
        local_port: u16,
        config: &SessionConfig,
    ) -> Result<ScriptedTransport, NetplayError> {
        if self.refuse {
            return Err(NetplayError::Transport {
                context: format!("port {} is taken", local_port),
            });
        }
        self.created += 1;
        {
            let mut script = self.script.lock();
            script.local_port = Some(local_port);
            script.config = Some(*config);
            script.dropped = false;
        }
        Ok(ScriptedTransport {
            script: Arc::clone(&self.script),
        })
    }
}

// ============================================================================
// Update builders
// ============================================================================

#[must_use]
pub fn save(frame: i32) -> SessionUpdate {
    SessionUpdate::Save {
        frame: frame.into(),
    }
}

#[must_use]
pub fn load(frame: i32) -> SessionUpdate {
    SessionUpdate::Load {
        frame: frame.into(),
    }
}

/// An Advance carrying one encoded input per entry of `inputs`.
#[must_use]
pub fn advance(frame: i32, inputs: &[Buttons]) -> SessionUpdate {
    SessionUpdate::Advance {
        frame: frame.into(),
        inputs: netplay_rollback::codec::encode_input_block(inputs).unwrap(),
    }
}
