//! Collaborators owned by the host application.
//!
//! The session never owns the emulator, the input layer, the audio device or the
//! window. The host lends them for the duration of one call by bundling mutable
//! borrows into a [`Host`].

use crate::buttons::{Device, InputBlock, SnesButton};

/// The deterministic emulator being synchronized.
pub trait Emulator {
    /// Serializes the full machine state.
    fn serialize(&mut self) -> Vec<u8>;

    /// Restores a state produced by [`Emulator::serialize`]. Returns `false` if the
    /// snapshot was rejected.
    fn unserialize(&mut self, state: &[u8]) -> bool;

    /// Runs exactly one frame, reading controller state from `inputs`.
    fn run(&mut self, inputs: &InputBlock);

    /// Power-cycles the machine.
    fn power(&mut self);

    /// Enables or disables run-ahead frame presentation.
    fn set_run_ahead(&mut self, enabled: bool);

    /// Returns whether run-ahead is enabled.
    fn run_ahead(&self) -> bool;

    /// Sets an emulator option.
    fn configure(&mut self, key: &str, value: &str);

    /// Plugs `device` into controller `port`.
    fn connect(&mut self, port: usize, device: Device);
}

/// One bound physical input.
pub trait InputMapping {
    /// Returns whether the bound input is currently held.
    fn poll(&self) -> bool;
}

/// The host's input-mapping layer.
pub trait InputManager {
    /// Refreshes every physical device.
    fn poll(&mut self);

    /// Looks up the mapping bound to a logical button, if any.
    fn mapping(&self, port: usize, device: usize, button: SnesButton) -> Option<&dyn InputMapping>;
}

/// Audio output.
pub trait AudioOutput {
    /// Current master volume.
    fn volume(&self) -> f32;

    /// Sets the master volume.
    fn set_volume(&mut self, volume: f32);
}

/// Window and focus policy.
pub trait HostWindow {
    /// Whether the emulator window has keyboard focus.
    fn focused(&self) -> bool;

    /// Whether the user allows input while the window is unfocused.
    fn allow_background_input(&self) -> bool;

    /// Blocks or unblocks input while the window is unfocused.
    fn set_block_background_input(&mut self, block: bool);

    /// Enables or disables pausing the emulator when focus is lost.
    fn set_pause_on_focus_loss(&mut self, pause: bool);
}

/// Mutable borrows of every host collaborator for one session call.
pub struct Host<'a> {
    /// The emulator.
    pub emulator: &'a mut dyn Emulator,
    /// The input layer.
    pub input: &'a mut dyn InputManager,
    /// The audio output.
    pub audio: &'a mut dyn AudioOutput,
    /// The host window.
    pub window: &'a mut dyn HostWindow,
}

impl<'a> Host<'a> {
    /// Bundles the host collaborators.
    #[must_use]
    pub fn new(
        emulator: &'a mut dyn Emulator,
        input: &'a mut dyn InputManager,
        audio: &'a mut dyn AudioOutput,
        window: &'a mut dyn HostWindow,
    ) -> Self {
        Self {
            emulator,
            input,
            audio,
            window,
        }
    }
}

impl std::fmt::Debug for Host<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("focused", &self.window.focused())
            .field("run_ahead", &self.emulator.run_ahead())
            .field("volume", &self.audio.volume())
            .finish_non_exhaustive()
    }
}
