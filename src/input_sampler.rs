//! Sampling the local controller.

use crate::buttons::{Buttons, Device, SnesButton};
use crate::host::{HostWindow, InputManager};

/// Reads the live state of one physical pad into a [`Buttons`] value.
///
/// The local player always plays on the mappings of the first pad, whatever
/// slot it occupies in the session, so the defaults are port 0, gamepad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSampler {
    port: usize,
    device: usize,
}

impl Default for InputSampler {
    fn default() -> Self {
        Self {
            port: 0,
            device: Device::Gamepad.id(),
        }
    }
}

// Order the input layer is polled in. Matches the packed bit order.
const POLL_ORDER: [SnesButton; 12] = [
    SnesButton::B,
    SnesButton::Y,
    SnesButton::Select,
    SnesButton::Start,
    SnesButton::Up,
    SnesButton::Down,
    SnesButton::Left,
    SnesButton::Right,
    SnesButton::A,
    SnesButton::X,
    SnesButton::L,
    SnesButton::R,
];

impl InputSampler {
    /// Creates a sampler reading port 0, gamepad.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads mappings from another port and device.
    #[must_use]
    pub fn with_source(mut self, port: usize, device: usize) -> Self {
        self.port = port;
        self.device = device;
        self
    }

    /// Port whose mappings are read.
    #[must_use]
    pub fn port(&self) -> usize {
        self.port
    }

    /// Device id whose mappings are read.
    #[must_use]
    pub fn device(&self) -> usize {
        self.device
    }

    /// Samples the pad.
    ///
    /// Returns [`Buttons::EMPTY`] without touching the input layer unless the
    /// window is focused or background input is allowed. Otherwise the input
    /// layer is refreshed once and every bound button polled. Unbound buttons
    /// read as released.
    pub fn sample(&self, input: &mut dyn InputManager, window: &dyn HostWindow) -> Buttons {
        if !window.focused() && !window.allow_background_input() {
            return Buttons::EMPTY;
        }
        input.poll();
        let mut buttons = Buttons::EMPTY;
        for button in POLL_ORDER {
            if let Some(mapping) = input.mapping(self.port, self.device, button) {
                buttons.set(button, mapping.poll());
            }
        }
        buttons
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
    use crate::host::InputMapping;
    use std::collections::BTreeMap;

    struct Held(bool);

    impl InputMapping for Held {
        fn poll(&self) -> bool {
            self.0
        }
    }

    #[derive(Default)]
    struct Pad {
        polls: usize,
        bound: BTreeMap<(usize, usize, SnesButton), Held>,
    }

    impl Pad {
        fn bind(mut self, port: usize, device: usize, button: SnesButton, held: bool) -> Self {
            self.bound.insert((port, device, button), Held(held));
            self
        }
    }

    impl InputManager for Pad {
        fn poll(&mut self) {
            self.polls += 1;
        }

        fn mapping(
            &self,
            port: usize,
            device: usize,
            button: SnesButton,
        ) -> Option<&dyn InputMapping> {
            self.bound
                .get(&(port, device, button))
                .map(|held| held as &dyn InputMapping)
        }
    }

    struct Window {
        focused: bool,
        background: bool,
    }

    impl HostWindow for Window {
        fn focused(&self) -> bool {
            self.focused
        }
        fn allow_background_input(&self) -> bool {
            self.background
        }
        fn set_block_background_input(&mut self, _block: bool) {}
        fn set_pause_on_focus_loss(&mut self, _pause: bool) {}
    }

    const FOCUSED: Window = Window {
        focused: true,
        background: false,
    };

    #[test]
    fn focused_window_reads_bound_buttons() {
        let mut pad = Pad::default()
            .bind(0, 1, SnesButton::A, true)
            .bind(0, 1, SnesButton::Start, true)
            .bind(0, 1, SnesButton::B, false);
        let input = InputSampler::new().sample(&mut pad, &FOCUSED);
        assert_eq!(input, Buttons::EMPTY.with(SnesButton::A).with(SnesButton::Start));
        assert_eq!(pad.polls, 1);
    }

    #[test]
    fn unfocused_window_reads_nothing() {
        let mut pad = Pad::default().bind(0, 1, SnesButton::A, true);
        let window = Window {
            focused: false,
            background: false,
        };
        assert_eq!(InputSampler::new().sample(&mut pad, &window), Buttons::EMPTY);
        assert_eq!(pad.polls, 0);
    }

    #[test]
    fn background_input_allows_unfocused_reads() {
        let mut pad = Pad::default().bind(0, 1, SnesButton::L, true);
        let window = Window {
            focused: false,
            background: true,
        };
        assert!(InputSampler::new()
            .sample(&mut pad, &window)
            .pressed(SnesButton::L));
    }

    #[test]
    fn source_is_configurable() {
        let mut pad = Pad::default()
            .bind(0, 1, SnesButton::X, true)
            .bind(1, 2, SnesButton::Y, true);
        let sampler = InputSampler::new().with_source(1, 2);
        assert_eq!((sampler.port(), sampler.device()), (1, 2));
        assert_eq!(
            sampler.sample(&mut pad, &FOCUSED),
            Buttons::EMPTY.with(SnesButton::Y)
        );
    }
}
