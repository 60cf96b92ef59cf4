//! Property-based tests for the synchronization building blocks.
//!
//! # Properties Tested
//!
//! ## Save-state ring
//! - The most recent `capacity` frames are always retrievable, byte for byte
//! - Anything older reads as missing, never as another frame's snapshot
//!
//! ## Input block
//! - Every (port, button) reads back what was pressed, directly and through
//!   the multitap remap
//! - Encoded blocks decode to the same inputs
//!
//! ## Topology
//! - Exactly one local player, at its own slot; remote players keep their
//!   order; spectators come last
//!
//! ## Regulation
//! - The stall monitor reports a stall iff the trailing empty streak exceeds
//!   the threshold
//! - Rift correction leaves the emulator where it found it after exactly one run

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use netplay_rollback::codec::{decode_input_block, encode_input_block};
use netplay_rollback::hash::snapshot_checksum;
use netplay_rollback::{
    AudioOutput, Buttons, Device, Emulator, Frame, InputBlock, LocalRole, PeerRole,
    RiftSyncConfig, SaveStateStore, SnesButton, StallMonitor, StallVerdict, StartRequest,
    SyncRegulator, BUTTONS_PER_PAD, MULTITAP_CAPACITY,
};
use proptest::prelude::*;

// ============================================================================
// Test Doubles
// ============================================================================

#[derive(Default)]
struct Machine {
    state: Vec<u8>,
    runs: u32,
}

impl Emulator for Machine {
    fn serialize(&mut self) -> Vec<u8> {
        self.state.clone()
    }
    fn unserialize(&mut self, state: &[u8]) -> bool {
        self.state = state.to_vec();
        true
    }
    fn run(&mut self, inputs: &InputBlock) {
        self.runs += 1;
        for (byte, input) in self.state.iter_mut().zip(inputs.as_slice()) {
            *byte = byte.wrapping_add(input.bits().to_le_bytes()[0]).wrapping_add(1);
        }
        self.state.push(0x5A);
    }
    fn power(&mut self) {}
    fn set_run_ahead(&mut self, _enabled: bool) {}
    fn run_ahead(&self) -> bool {
        false
    }
    fn configure(&mut self, _key: &str, _value: &str) {}
    fn connect(&mut self, _port: usize, _device: Device) {}
}

struct Speaker(f32);

impl AudioOutput for Speaker {
    fn volume(&self) -> f32 {
        self.0
    }
    fn set_volume(&mut self, volume: f32) {
        self.0 = volume;
    }
}

// ============================================================================
// Property Test Strategies
// ============================================================================

fn buttons_strategy() -> impl Strategy<Value = Buttons> {
    any::<u16>().prop_map(Buttons::from_bits)
}

fn block_strategy() -> impl Strategy<Value = Vec<Buttons>> {
    prop::collection::vec(buttons_strategy(), 1..=MULTITAP_CAPACITY)
}

fn snapshot(frame: usize, len: usize) -> Vec<u8> {
    (0..len).map(|i| (frame * 31 + i) as u8).collect()
}

// ============================================================================
// Save-state ring
// ============================================================================

proptest! {
    #[test]
    fn prop_ring_keeps_most_recent_frames(
        rollback_window in 0usize..12,
        extra in 0usize..40,
        len in 0usize..64,
    ) {
        let capacity = rollback_window + 2;
        let mut store = SaveStateStore::with_capacity(capacity);
        let total = capacity + extra;
        for frame in 0..total {
            store.set(Frame::new(frame as i32), &snapshot(frame, len)).unwrap();
        }

        for frame in 0..total {
            let loaded = store.get(Frame::new(frame as i32));
            if frame + capacity >= total {
                let expected = snapshot(frame, len);
                prop_assert_eq!(loaded, Some(expected.as_slice()));
            } else {
                prop_assert!(loaded.is_none(), "frame {} should have been evicted", frame);
            }
        }
    }

    #[test]
    fn prop_ring_slot_capacity_never_shrinks(
        sizes in prop::collection::vec(0usize..256, 1..30),
    ) {
        let mut store = SaveStateStore::with_capacity(3);
        let mut high_water = [0usize; 3];
        for (frame, size) in sizes.iter().enumerate() {
            store.set(Frame::new(frame as i32), &vec![0u8; *size]).unwrap();
            let slot = store.slot(Frame::new(frame as i32)).unwrap();
            let index = frame % 3;
            prop_assert!(slot.capacity() >= high_water[index]);
            high_water[index] = slot.capacity();
        }
    }
}

// ============================================================================
// Input block
// ============================================================================

proptest! {
    #[test]
    fn prop_gamepad_reads_match_pressed(inputs in block_strategy()) {
        let mut block = InputBlock::with_ports(inputs.len());
        block.copy_from(&inputs);
        for (port, input) in inputs.iter().enumerate() {
            for button in SnesButton::ALL {
                prop_assert_eq!(
                    block.get(port, Device::Gamepad, button.index()),
                    i16::from(input.pressed(button))
                );
            }
        }
    }

    #[test]
    fn prop_multitap_remap_spans_pads(inputs in block_strategy(), base in 0usize..2) {
        let mut block = InputBlock::with_ports(inputs.len());
        block.copy_from(&inputs);
        for index in 0..(MULTITAP_CAPACITY * BUTTONS_PER_PAD) {
            let port = base + index / BUTTONS_PER_PAD;
            let button = SnesButton::from_index(index % BUTTONS_PER_PAD).unwrap();
            let expected = inputs
                .get(port)
                .map_or(0, |input| i16::from(input.pressed(button)));
            prop_assert_eq!(block.get(base, Device::Multitap, index), expected);
        }
    }

    #[test]
    fn prop_encoded_block_decodes_to_same_inputs(inputs in block_strategy()) {
        let bytes = encode_input_block(&inputs).unwrap();
        let decoded = decode_input_block(&bytes, inputs.len()).unwrap();
        prop_assert_eq!(decoded.as_slice(), inputs.as_slice());
    }

    #[test]
    fn prop_high_bits_never_survive(bits in any::<u16>()) {
        prop_assert_eq!(Buttons::from_bits(bits).bits() & 0xF000, 0);
    }
}

// ============================================================================
// Topology
// ============================================================================

proptest! {
    #[test]
    fn prop_canonical_peer_order(
        remotes in 0usize..5,
        slot_seed in any::<usize>(),
        spectators in 0usize..4,
    ) {
        let players = remotes + 1;
        let slot = slot_seed % players;
        let mut request = StartRequest::new()
            .with_local_port(7000)
            .with_local_role(LocalRole::Player { slot })
            .with_multitap(true);
        for i in 0..remotes {
            request = request.add_remote(format!("remote-{}", i));
        }
        for i in 0..spectators {
            request = request.add_spectator(format!("spectator-{}", i));
        }

        let peers = request.validate().unwrap().peers();

        prop_assert_eq!(peers.len(), players + spectators);
        let locals: Vec<_> = peers.iter().filter(|p| p.role == PeerRole::LocalPlayer).collect();
        prop_assert_eq!(locals.len(), 1);
        prop_assert_eq!(locals[0].slot, Some(slot));

        let remote_addresses: Vec<_> = peers
            .iter()
            .filter(|p| p.role == PeerRole::RemotePlayer)
            .map(|p| p.address.clone().unwrap())
            .collect();
        let expected: Vec<_> = (0..remotes).map(|i| format!("remote-{}", i)).collect();
        prop_assert_eq!(remote_addresses, expected);

        for (index, peer) in peers.iter().enumerate() {
            prop_assert_eq!(peer.role == PeerRole::Spectator, index >= players);
            if index < players {
                prop_assert_eq!(peer.slot, Some(index));
            }
        }
    }
}

// ============================================================================
// Regulation
// ============================================================================

proptest! {
    #[test]
    fn prop_stall_iff_trailing_streak_exceeds_threshold(
        threshold in 0u32..15,
        ticks in prop::collection::vec(prop_oneof![3 => Just(0usize), 1 => 1usize..4], 1..80),
    ) {
        let mut monitor = StallMonitor::new(threshold);
        let mut streak = 0u32;
        for updates in ticks {
            let verdict = monitor.record(updates);
            streak = if updates == 0 { streak + 1 } else { 0 };
            let expected = if updates > 0 {
                StallVerdict::Flowing
            } else if streak > threshold {
                StallVerdict::Stalled
            } else {
                StallVerdict::Waiting
            };
            prop_assert_eq!(verdict, expected);
            prop_assert_eq!(monitor.counter(), streak);
        }
    }

    #[test]
    fn prop_rift_correction_is_a_no_op(
        state in prop::collection::vec(any::<u8>(), 0..128),
        inputs in block_strategy(),
        volume in 0.0f32..=1.0,
    ) {
        let mut machine = Machine { state: state.clone(), runs: 0 };
        let mut speaker = Speaker(volume);
        let mut block = InputBlock::with_ports(inputs.len());
        block.copy_from(&inputs);
        let mut regulator = SyncRegulator::new(RiftSyncConfig::default());

        regulator.correct(&mut machine, &mut speaker, &block);

        prop_assert_eq!(snapshot_checksum(&machine.state), snapshot_checksum(&state));
        prop_assert_eq!(machine.state, state);
        prop_assert_eq!(machine.runs, 1);
        prop_assert_eq!(speaker.0, volume);
    }
}
