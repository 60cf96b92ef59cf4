//! Bit-packed controller input and the per-port input block.
//!
//! [`Buttons`] is the only game data that crosses the wire: twelve logical
//! controls packed into a `u16`. [`InputBlock`] holds one [`Buttons`] per
//! controller port and answers the engine's `(port, device, button)` reads,
//! remapping multitap reads onto consecutive ports.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Number of logical buttons on one pad.
pub const BUTTONS_PER_PAD: usize = 12;

/// Number of controller ports reachable through a multitap (one pad on port 0,
/// four on the multitap in port 1).
pub const MULTITAP_CAPACITY: usize = 5;

/// Mask of the bits that carry a button.
const BUTTON_MASK: u16 = (1 << BUTTONS_PER_PAD) - 1;

/// Logical controls, in the order the engine enumerates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SnesButton {
    /// D-pad up.
    Up = 0,
    /// D-pad down.
    Down = 1,
    /// D-pad left.
    Left = 2,
    /// D-pad right.
    Right = 3,
    /// B face button.
    B = 4,
    /// A face button.
    A = 5,
    /// Y face button.
    Y = 6,
    /// X face button.
    X = 7,
    /// Left shoulder.
    L = 8,
    /// Right shoulder.
    R = 9,
    /// Select.
    Select = 10,
    /// Start.
    Start = 11,
}

impl SnesButton {
    /// All buttons in engine order.
    pub const ALL: [SnesButton; BUTTONS_PER_PAD] = [
        SnesButton::Up,
        SnesButton::Down,
        SnesButton::Left,
        SnesButton::Right,
        SnesButton::B,
        SnesButton::A,
        SnesButton::Y,
        SnesButton::X,
        SnesButton::L,
        SnesButton::R,
        SnesButton::Select,
        SnesButton::Start,
    ];

    /// Returns the button with the given engine index, if any.
    #[must_use]
    pub fn from_index(index: usize) -> Option<SnesButton> {
        Self::ALL.get(index).copied()
    }

    /// Returns the engine index of this button.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Bit this button occupies in the packed wire value.
    ///
    /// The wire layout is B, Y, Select, Start, Up, Down, Left, Right, A, X, L, R
    /// from the least significant bit, which differs from the engine order.
    #[inline]
    #[must_use]
    pub const fn bit(self) -> u16 {
        let shift = match self {
            SnesButton::B => 0,
            SnesButton::Y => 1,
            SnesButton::Select => 2,
            SnesButton::Start => 3,
            SnesButton::Up => 4,
            SnesButton::Down => 5,
            SnesButton::Left => 6,
            SnesButton::Right => 7,
            SnesButton::A => 8,
            SnesButton::X => 9,
            SnesButton::L => 10,
            SnesButton::R => 11,
        };
        1 << shift
    }
}

/// Controller device plugged into a port.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// Nothing connected.
    #[default]
    None,
    /// A standard pad.
    Gamepad,
    /// A multitap carrying several pads behind one port.
    Multitap,
}

impl Device {
    /// Numeric device id used by the input-mapping layer.
    #[inline]
    #[must_use]
    pub const fn id(self) -> usize {
        match self {
            Device::None => 0,
            Device::Gamepad => 1,
            Device::Multitap => 2,
        }
    }
}

/// A snapshot of the twelve logical buttons of one pad.
///
/// # Examples
///
/// ```
/// use netplay_rollback::{Buttons, SnesButton};
///
/// let input = Buttons::EMPTY.with(SnesButton::A).with(SnesButton::Start);
/// assert!(input.pressed(SnesButton::A));
/// assert!(!input.pressed(SnesButton::B));
/// assert_eq!(input.bits(), (1 << 8) | (1 << 3));
/// ```
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Buttons(u16);

impl Buttons {
    /// No buttons pressed.
    pub const EMPTY: Buttons = Buttons(0);

    /// Creates a value from packed bits. Bits above the twelfth are dropped.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Buttons(bits & BUTTON_MASK)
    }

    /// Returns the packed wire value.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Returns `true` if no button is pressed.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if `button` is pressed.
    #[inline]
    #[must_use]
    pub const fn pressed(self, button: SnesButton) -> bool {
        self.0 & button.bit() != 0
    }

    /// Sets or clears `button`.
    #[inline]
    pub fn set(&mut self, button: SnesButton, pressed: bool) {
        if pressed {
            self.0 |= button.bit();
        } else {
            self.0 &= !button.bit();
        }
    }

    /// Returns a copy with `button` pressed.
    #[inline]
    #[must_use]
    pub const fn with(self, button: SnesButton) -> Self {
        Buttons(self.0 | button.bit())
    }

    /// Iterates over the pressed buttons in engine order.
    pub fn iter_pressed(self) -> impl Iterator<Item = SnesButton> {
        SnesButton::ALL
            .into_iter()
            .filter(move |button| self.pressed(*button))
    }
}

/// The inputs applied to the current frame, one [`Buttons`] per controller port.
///
/// Ports beyond [`MULTITAP_CAPACITY`] never exist, so the block lives on the stack.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InputBlock {
    ports: SmallVec<[Buttons; MULTITAP_CAPACITY]>,
}

impl InputBlock {
    /// Creates a block with `ports` empty entries.
    #[must_use]
    pub fn with_ports(ports: usize) -> Self {
        Self {
            ports: SmallVec::from_elem(Buttons::EMPTY, ports),
        }
    }

    /// Number of ports in the block.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Returns `true` if the block has no ports (no session running).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Returns the ports as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Buttons] {
        &self.ports
    }

    /// Returns the input of one port.
    #[must_use]
    pub fn port(&self, port: usize) -> Option<Buttons> {
        self.ports.get(port).copied()
    }

    /// Overwrites the block from `inputs`, position by position. Ports without a
    /// matching entry are cleared.
    pub fn copy_from(&mut self, inputs: &[Buttons]) {
        for (index, slot) in self.ports.iter_mut().enumerate() {
            *slot = inputs.get(index).copied().unwrap_or_default();
        }
    }

    /// Sets every port to [`Buttons::EMPTY`].
    pub fn reset(&mut self) {
        self.copy_from(&[]);
    }

    /// Drops all ports.
    pub fn clear(&mut self) {
        self.ports.clear();
    }

    /// Reads one button the way the engine asks for it.
    ///
    /// For [`Device::Multitap`] the button index spans several pads:
    /// `port' = port + button / 12` and `button' = button % 12`.
    /// Unknown ports or buttons read as `0`.
    #[must_use]
    pub fn get(&self, port: usize, device: Device, button: usize) -> i16 {
        let (port, button) = remap(port, device, button);
        match (self.port(port), SnesButton::from_index(button)) {
            (Some(input), Some(button)) => i16::from(input.pressed(button)),
            _ => 0,
        }
    }
}

/// Applies the multitap channel formula.
#[inline]
#[must_use]
pub const fn remap(port: usize, device: Device, button: usize) -> (usize, usize) {
    match device {
        Device::Multitap => (port + button / BUTTONS_PER_PAD, button % BUTTONS_PER_PAD),
        Device::None | Device::Gamepad => (port, button),
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
    fn bits_are_unique_and_within_twelve() {
        let mut seen = 0u16;
        for button in SnesButton::ALL {
            assert_eq!(seen & button.bit(), 0, "{:?} shares a bit", button);
            seen |= button.bit();
        }
        assert_eq!(seen, BUTTON_MASK);
    }

    #[test]
    fn wire_layout_matches_packed_order() {
        assert_eq!(Buttons::EMPTY.with(SnesButton::B).bits(), 0b1);
        assert_eq!(Buttons::EMPTY.with(SnesButton::Up).bits(), 0b1_0000);
        assert_eq!(Buttons::EMPTY.with(SnesButton::R).bits(), 1 << 11);
    }

    #[test]
    fn from_bits_drops_high_bits() {
        assert_eq!(Buttons::from_bits(0xFFFF).bits(), 0x0FFF);
    }

    #[test]
    fn set_and_clear() {
        let mut input = Buttons::EMPTY;
        input.set(SnesButton::L, true);
        assert!(input.pressed(SnesButton::L));
        input.set(SnesButton::L, false);
        assert!(input.is_empty());
    }

    #[test]
    fn index_round_trips() {
        for (index, button) in SnesButton::ALL.iter().enumerate() {
            assert_eq!(button.index(), index);
            assert_eq!(SnesButton::from_index(index), Some(*button));
        }
        assert_eq!(SnesButton::from_index(BUTTONS_PER_PAD), None);
    }

    #[test]
    fn iter_pressed_uses_engine_order() {
        let input = Buttons::EMPTY
            .with(SnesButton::Start)
            .with(SnesButton::Up)
            .with(SnesButton::A);
        let pressed: Vec<_> = input.iter_pressed().collect();
        assert_eq!(
            pressed,
            vec![SnesButton::Up, SnesButton::A, SnesButton::Start]
        );
    }

    #[test]
    fn gamepad_reads_port_directly() {
        let mut block = InputBlock::with_ports(2);
        block.copy_from(&[Buttons::EMPTY, Buttons::EMPTY.with(SnesButton::X)]);
        assert_eq!(block.get(1, Device::Gamepad, SnesButton::X.index()), 1);
        assert_eq!(block.get(0, Device::Gamepad, SnesButton::X.index()), 0);
    }

    #[test]
    fn multitap_spreads_buttons_over_ports() {
        let mut block = InputBlock::with_ports(MULTITAP_CAPACITY);
        block.copy_from(&[
            Buttons::EMPTY,
            Buttons::EMPTY,
            Buttons::EMPTY,
            Buttons::EMPTY.with(SnesButton::Select),
            Buttons::EMPTY,
        ]);
        // Port 1 multitap, third pad: button index 2 * 12 + Select.
        let button = 2 * BUTTONS_PER_PAD + SnesButton::Select.index();
        assert_eq!(block.get(1, Device::Multitap, button), 1);
        assert_eq!(remap(1, Device::Multitap, button), (3, 10));
    }

    #[test]
    fn out_of_range_reads_are_zero() {
        let block = InputBlock::with_ports(2);
        assert_eq!(block.get(7, Device::Gamepad, 0), 0);
        assert_eq!(block.get(0, Device::Gamepad, 40), 0);
        assert_eq!(InputBlock::default().get(0, Device::Gamepad, 0), 0);
    }

    #[test]
    fn copy_from_clears_missing_ports() {
        let mut block = InputBlock::with_ports(3);
        block.copy_from(&[Buttons::from_bits(1), Buttons::from_bits(2), Buttons::from_bits(4)]);
        block.copy_from(&[Buttons::from_bits(8)]);
        assert_eq!(
            block.as_slice(),
            &[Buttons::from_bits(8), Buttons::EMPTY, Buttons::EMPTY]
        );
    }

    #[test]
    fn device_ids() {
        assert_eq!(Device::None.id(), 0);
        assert_eq!(Device::Gamepad.id(), 1);
        assert_eq!(Device::Multitap.id(), 2);
    }
}
