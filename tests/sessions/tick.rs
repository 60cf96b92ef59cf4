//! Per-tick update handling.
//!
//! A scripted transport hands out one batch of updates per tick so each test
//! controls exactly what the session has to do.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::stubs::{advance, load, save, HostStub};
use crate::common::{quiet_tuning, start_scripted, two_player_request};
use netplay_rollback::codec::{encode_buttons, encode_input_block};
use netplay_rollback::hash::snapshot_checksum;
use netplay_rollback::telemetry::CollectingObserver;
use netplay_rollback::{
    Buttons, Device, Frame, NetStats, PeerId, RollbackSession, SavePayload, SessionEvent,
    SessionMode, SessionUpdate, SnesButton, TuningConfig,
};
use serial_test::serial;
use std::sync::Arc;

fn pressed(button: SnesButton) -> Buttons {
    Buttons::EMPTY.with(button)
}

// ============================================================================
// Save
// ============================================================================

#[test]
#[serial]
fn save_stores_snapshot_and_reports_checksum() {
    let mut stub = HostStub::new();
    let (mut session, script) = start_scripted(&mut stub, two_player_request(), quiet_tuning());
    let expected = stub.emulator.snapshot();
    script
        .lock()
        .batches
        .push_back(vec![save(0), advance(0, &[Buttons::EMPTY, Buttons::EMPTY])]);

    assert!(session.tick(&mut stub.host()));

    let saves = script.lock().saves.clone();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].frame, Frame::new(0));
    assert_eq!(saves[0].checksum, snapshot_checksum(&expected));
    assert_eq!(saves[0].payload, 0i32.to_le_bytes().to_vec());
    assert_eq!(
        session.save_states().unwrap().get(Frame::new(0)),
        Some(expected.as_slice())
    );
    session.stop(&mut stub.host());
}

#[test]
#[serial]
fn full_snapshot_payload_carries_the_state() {
    let mut stub = HostStub::new();
    let request = two_player_request().with_save_payload(SavePayload::FullSnapshot);
    let (mut session, script) = start_scripted(&mut stub, request, quiet_tuning());
    script.lock().batches.extend([
        vec![save(0), advance(0, &[Buttons::EMPTY, Buttons::EMPTY])],
        vec![save(1), advance(1, &[Buttons::EMPTY, Buttons::EMPTY])],
    ]);

    session.tick(&mut stub.host());
    let expected = stub.emulator.snapshot();
    session.tick(&mut stub.host());

    let saves = script.lock().saves.clone();
    assert_eq!(saves.len(), 2);
    assert_eq!(saves[1].frame, Frame::new(1));
    assert_eq!(saves[1].payload, expected);
    session.stop(&mut stub.host());
}

#[test]
#[serial]
fn negative_save_is_skipped() {
    let mut stub = HostStub::new();
    let (mut session, script) = start_scripted(&mut stub, two_player_request(), quiet_tuning());
    script
        .lock()
        .batches
        .push_back(vec![save(-3), advance(0, &[Buttons::EMPTY, Buttons::EMPTY])]);

    assert!(session.tick(&mut stub.host()));

    assert!(script.lock().saves.is_empty());
    assert_eq!(stub.emulator.runs, 1);
    assert!(session.is_running());
    session.stop(&mut stub.host());
}

#[test]
#[serial]
fn save_that_cannot_be_stored_ends_the_session() {
    let mut stub = HostStub::new();
    let tuning = TuningConfig {
        max_snapshot_bytes: Some(64),
        ..quiet_tuning()
    };
    let (mut session, script) = start_scripted(&mut stub, two_player_request(), tuning);
    script
        .lock()
        .batches
        .push_back(vec![save(0), advance(0, &[Buttons::EMPTY, Buttons::EMPTY])]);
    assert!(session.tick(&mut stub.host()));
    assert_eq!(script.lock().saves.len(), 1);

    stub.emulator.snapshot_padding = 100;
    stub.emulator.run_ahead = true;
    script
        .lock()
        .batches
        .push_back(vec![save(1), advance(1, &[Buttons::EMPTY, Buttons::EMPTY])]);

    assert!(!session.tick(&mut stub.host()));

    assert_eq!(session.mode(), SessionMode::Inactive);
    assert!(!session.is_running());
    assert_eq!(session.peers().count(), 0);
    assert_eq!(session.save_state_capacity(), 0);
    // The Advance after the failed Save never ran.
    assert_eq!(stub.emulator.runs, 1);
    assert_eq!(script.lock().saves.len(), 1);
    assert!(script.lock().dropped);
    assert!(!stub.emulator.run_ahead);
    assert_eq!(stub.window.pause_on_focus_loss, Some(true));
    assert!(!session.tick(&mut stub.host()));
}

// ============================================================================
// Load and replay
// ============================================================================

#[test]
#[serial]
fn load_replays_from_the_saved_frame() {
    let mut stub = HostStub::new();
    let (mut session, script) = start_scripted(&mut stub, two_player_request(), quiet_tuning());
    let a = pressed(SnesButton::A);
    let b = pressed(SnesButton::B);
    script.lock().batches.extend([
        vec![save(0), advance(0, &[a, Buttons::EMPTY])],
        vec![save(1), advance(1, &[a, Buttons::EMPTY])],
        vec![save(2), advance(2, &[a, Buttons::EMPTY])],
    ]);
    for _ in 0..3 {
        session.tick(&mut stub.host());
    }

    script.lock().batches.push_back(vec![
        load(1),
        advance(1, &[a, b]),
        save(2),
        advance(2, &[a, b]),
        save(3),
    ]);
    assert!(session.tick(&mut stub.host()));

    assert_eq!(stub.emulator.unserialized, 1);
    assert_eq!(stub.emulator.frame, 3);
    assert_eq!(stub.emulator.run_ahead_per_run, vec![false, false, false, true, false]);
    assert!(!stub.emulator.run_ahead);
    assert!(!session.is_muted());
    assert_eq!(session.inputs(), &[a, b]);
    session.stop(&mut stub.host());
}

#[test]
#[serial]
fn load_of_evicted_frame_still_replays() {
    let mut stub = HostStub::new();
    let request = two_player_request().with_rollback_window(1);
    let (mut session, script) = start_scripted(&mut stub, request, quiet_tuning());
    assert_eq!(session.save_state_capacity(), 3);
    for frame in 0..4 {
        script
            .lock()
            .batches
            .push_back(vec![save(frame), advance(frame, &[Buttons::EMPTY, Buttons::EMPTY])]);
    }
    for _ in 0..4 {
        session.tick(&mut stub.host());
    }
    assert!(session.save_states().unwrap().get(Frame::new(0)).is_none());

    script.lock().batches.push_back(vec![
        load(0),
        advance(0, &[Buttons::EMPTY, Buttons::EMPTY]),
    ]);
    assert!(session.tick(&mut stub.host()));

    assert_eq!(stub.emulator.unserialized, 0);
    assert_eq!(stub.emulator.runs, 5);
    assert!(session.is_running());
    session.stop(&mut stub.host());
}

#[test]
#[serial]
fn load_without_following_advance_leaves_run_ahead_on() {
    let mut stub = HostStub::new();
    let (mut session, script) = start_scripted(&mut stub, two_player_request(), quiet_tuning());
    script.lock().batches.extend([
        vec![save(0), advance(0, &[Buttons::EMPTY, Buttons::EMPTY])],
        vec![load(0)],
    ]);
    session.tick(&mut stub.host());
    session.tick(&mut stub.host());

    assert!(stub.emulator.run_ahead);
    assert_eq!(stub.emulator.frame, 0);
    session.stop(&mut stub.host());
    assert!(!stub.emulator.run_ahead);
}

// ============================================================================
// Advance
// ============================================================================

#[test]
#[serial]
fn advance_applies_inputs_in_player_order() {
    let mut stub = HostStub::new();
    let (mut session, script) = start_scripted(&mut stub, two_player_request(), quiet_tuning());
    let first = pressed(SnesButton::Start).with(SnesButton::L);
    let second = pressed(SnesButton::Right);
    script.lock().batches.push_back(vec![advance(0, &[first, second])]);

    session.tick(&mut stub.host());

    assert_eq!(stub.emulator.last_inputs, vec![first, second]);
    assert_eq!(session.local_input(0, Device::Gamepad, SnesButton::Start.index()), 1);
    assert_eq!(session.local_input(1, Device::Gamepad, SnesButton::Right.index()), 1);
    assert_eq!(session.local_input(1, Device::Gamepad, SnesButton::Start.index()), 0);
    assert_eq!(session.local_input(2, Device::Gamepad, 0), 0);
    session.stop(&mut stub.host());
}

#[test]
#[serial]
fn malformed_block_runs_with_released_inputs() {
    let mut stub = HostStub::new();
    let (mut session, script) = start_scripted(&mut stub, two_player_request(), quiet_tuning());
    let held = pressed(SnesButton::X);
    script.lock().batches.extend([
        vec![advance(0, &[held, held])],
        vec![SessionUpdate::Advance {
            frame: Frame::new(1),
            inputs: vec![0xFF],
        }],
    ]);

    session.tick(&mut stub.host());
    assert_eq!(session.inputs(), &[held, held]);
    assert!(session.tick(&mut stub.host()));

    assert_eq!(stub.emulator.runs, 2);
    assert_eq!(session.inputs(), &[Buttons::EMPTY, Buttons::EMPTY]);
    session.stop(&mut stub.host());
}

// ============================================================================
// Local input, events and stats
// ============================================================================

#[test]
#[serial]
fn local_input_is_sampled_and_submitted() {
    let mut stub = HostStub::new();
    let (mut session, script) = start_scripted(&mut stub, two_player_request(), quiet_tuning());
    let local = session.peers().find(|peer| peer.is_local()).unwrap().id;
    stub.pad.hold(SnesButton::Y);
    stub.pad.hold(SnesButton::Up);

    session.tick(&mut stub.host());
    stub.window.focused = false;
    session.tick(&mut stub.host());

    let expected = encode_buttons(pressed(SnesButton::Y).with(SnesButton::Up)).unwrap();
    let released = encode_buttons(Buttons::EMPTY).unwrap();
    assert_eq!(
        script.lock().inputs,
        vec![(local, expected), (local, released)]
    );
    assert_eq!(stub.pad.polls, 1);
    session.stop(&mut stub.host());
}

#[test]
#[serial]
fn events_reach_the_observer_in_order() {
    let mut stub = HostStub::new();
    let collector = Arc::new(CollectingObserver::new());
    let (factory, script) = crate::common::stubs::ScriptedFactory::new();
    let mut session = RollbackSession::new(factory)
        .with_tuning(quiet_tuning())
        .with_observer(collector.clone());
    session.start(two_player_request(), &mut stub.host()).unwrap();
    let remote = session.peers().find(|peer| !peer.is_local()).unwrap().id;

    script.lock().events = vec![
        SessionEvent::PlayerSyncing {
            peer: remote,
            current: 1,
            max: 5,
        },
        SessionEvent::PlayerConnected { peer: remote },
        SessionEvent::SessionStarted,
    ];
    session.tick(&mut stub.host());
    script.lock().events = vec![SessionEvent::PlayerDisconnected { peer: remote }];
    assert!(session.tick(&mut stub.host()));

    let kinds: Vec<_> = collector.events().iter().map(SessionEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            "player_syncing",
            "player_connected",
            "session_started",
            "player_disconnected"
        ]
    );
    assert!(session.is_running());
    session.stop(&mut stub.host());
}

#[test]
#[serial]
fn remote_stats_are_refreshed() {
    let mut stub = HostStub::new();
    let (mut session, script) = start_scripted(&mut stub, two_player_request(), quiet_tuning());
    let remote = session.peers().find(|peer| !peer.is_local()).unwrap().id;
    let local = session.peers().find(|peer| peer.is_local()).unwrap().id;

    session.tick(&mut stub.host());
    assert!(session.net_stats(remote).is_none());

    let stats = NetStats {
        ping_ms: 48,
        avg_ping_ms: 45.0,
        jitter_ms: 3.0,
        frame_advantage: -1.5,
    };
    script.lock().stats.insert(remote, stats);
    script.lock().stats.insert(local, NetStats::default());
    session.tick(&mut stub.host());

    assert_eq!(session.net_stats(remote), Some(stats));
    assert!(session.net_stats(local).is_none());
    assert!(session.net_stats(PeerId::new(9999)).is_none());
    session.stop(&mut stub.host());
}

#[test]
fn encoded_block_matches_transport_layout() {
    let inputs = [pressed(SnesButton::B), pressed(SnesButton::R)];
    let block = encode_input_block(&inputs).unwrap();
    assert_eq!(block, vec![0x01, 0x00, 0x00, 0x08]);
}
