//! Peer topology as built by a running session.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::stubs::{advance, HostStub, ScriptedFactory};
use crate::common::{init_tracing, quiet_tuning, start_scripted, TEST_PORT};
use netplay_rollback::{
    Buttons, Device, LocalRole, NetplayError, PeerRole, RollbackSession, SessionMode, SnesButton,
    StartRequest, TopologyError, TuningConfig, BUTTONS_PER_PAD,
};
use serial_test::serial;

fn player(slot: usize) -> StartRequest {
    StartRequest::new()
        .with_local_port(TEST_PORT)
        .with_local_role(LocalRole::Player { slot })
}

fn spectator(expected_players: Option<usize>) -> StartRequest {
    StartRequest::new()
        .with_local_port(TEST_PORT)
        .with_local_role(LocalRole::Spectator { expected_players })
}

fn start_error(request: StartRequest) -> NetplayError {
    init_tracing();
    let mut stub = HostStub::new();
    let (factory, _script) = ScriptedFactory::new();
    let mut session = RollbackSession::new(factory);
    let err = session.start(request, &mut stub.host()).unwrap_err();
    assert_eq!(session.mode(), SessionMode::Inactive);
    err
}

// ============================================================================
// Players
// ============================================================================

#[test]
#[serial]
fn peers_are_attached_in_canonical_order() {
    let mut stub = HostStub::new();
    let request = player(1)
        .with_multitap(true)
        .add_remote("198.51.100.1:1")
        .add_remote("198.51.100.3:3")
        .add_spectator("203.0.113.9:9");
    let (mut session, script) = start_scripted(&mut stub, request, quiet_tuning());

    assert_eq!(
        script.lock().actors,
        vec![
            (PeerRole::RemotePlayer, Some("198.51.100.1:1".to_owned())),
            (PeerRole::LocalPlayer, None),
            (PeerRole::RemotePlayer, Some("198.51.100.3:3".to_owned())),
            (PeerRole::Spectator, Some("203.0.113.9:9".to_owned())),
        ]
    );
    let nicknames: Vec<_> = session.peers().map(|peer| peer.nickname.clone()).collect();
    assert_eq!(nicknames, vec!["P1", "P2", "P3", "spectator"]);
    assert_eq!(session.peers().filter(|peer| peer.is_local()).count(), 1);
    let local = session.peers().find(|peer| peer.is_local()).unwrap();
    assert_eq!(local.slot, Some(1));
    assert_eq!(session.peer(local.id).unwrap().nickname, "P2");

    let config = script.lock().config.unwrap();
    assert_eq!(config.num_players, 3);
    assert_eq!(config.max_spectators, 1);
    assert_eq!(session.inputs().len(), 3);
    assert_eq!(
        stub.emulator.connected,
        vec![(0, Device::Gamepad), (1, Device::Multitap)]
    );
    session.stop(&mut stub.host());
}

#[test]
#[serial]
fn multitap_buttons_reach_the_right_pad() {
    let mut stub = HostStub::new();
    let request = player(0)
        .with_multitap(true)
        .add_remote("a")
        .add_remote("b")
        .add_remote("c");
    let (mut session, script) = start_scripted(&mut stub, request, quiet_tuning());
    let third = Buttons::EMPTY.with(SnesButton::B);
    let fourth = Buttons::EMPTY.with(SnesButton::Select);
    script.lock().batches.push_back(vec![advance(
        0,
        &[Buttons::EMPTY, Buttons::EMPTY, third, fourth],
    )]);

    session.tick(&mut stub.host());

    let b = SnesButton::B.index();
    let select = SnesButton::Select.index();
    assert_eq!(session.local_input(1, Device::Multitap, b), 0);
    assert_eq!(session.local_input(1, Device::Multitap, BUTTONS_PER_PAD + b), 1);
    assert_eq!(session.local_input(1, Device::Multitap, 2 * BUTTONS_PER_PAD + select), 1);
    assert_eq!(session.local_input(1, Device::Multitap, 3 * BUTTONS_PER_PAD + b), 0);
    assert_eq!(session.local_input(2, Device::Gamepad, b), 1);
    session.stop(&mut stub.host());
}

#[test]
#[serial]
fn five_players_is_the_limit() {
    let mut stub = HostStub::new();
    let request = player(4)
        .with_multitap(true)
        .add_remote("a")
        .add_remote("b")
        .add_remote("c")
        .add_remote("d");
    let (mut session, _script) = start_scripted(&mut stub, request.clone(), quiet_tuning());
    assert_eq!(session.inputs().len(), 5);
    session.stop(&mut stub.host());

    assert_eq!(
        start_error(request.add_remote("e")),
        NetplayError::Topology(TopologyError::TooManyPlayers { players: 6, max: 5 })
    );
}

// ============================================================================
// Spectators
// ============================================================================

#[test]
#[serial]
fn spectator_attaches_only_the_host() {
    let mut stub = HostStub::new();
    let request = spectator(Some(2))
        .add_remote("198.51.100.7:7000")
        .add_spectator("ignored")
        .add_spectator("also ignored")
        .with_max_spectators(1);
    let (mut session, script) = start_scripted(&mut stub, request, quiet_tuning());
    assert_eq!(script.lock().config.unwrap().max_spectators, 0);

    assert_eq!(
        script.lock().actors,
        vec![(PeerRole::RemotePlayer, Some("198.51.100.7:7000".to_owned()))]
    );
    assert!(session.peers().all(|peer| !peer.is_local()));
    assert_eq!(session.inputs().len(), 2);

    stub.pad.hold(SnesButton::A);
    session.tick(&mut stub.host());
    assert!(script.lock().inputs.is_empty());
    assert!(script.lock().delays.is_empty());
    session.stop(&mut stub.host());
}

#[test]
#[serial]
fn spectator_ring_is_bounded_by_spectator_delay() {
    let mut stub = HostStub::new();
    let tuning = TuningConfig {
        spectator_delay: 3,
        ..quiet_tuning()
    };
    let request = spectator(Some(2)).add_remote("host");
    let (mut session, script) = start_scripted(&mut stub, request, tuning);

    assert_eq!(session.save_state_capacity(), 5);
    assert_eq!(script.lock().config.unwrap().spectator_delay, 3);
    session.stop(&mut stub.host());

    let (mut session, _) = start_scripted(&mut stub, player(0).add_remote("a"), tuning);
    assert_eq!(session.save_state_capacity(), 9);
    session.stop(&mut stub.host());
}

// ============================================================================
// Rejected topologies
// ============================================================================

#[test]
#[serial]
fn rejected_topologies() {
    assert_eq!(
        start_error(StartRequest::new().add_remote("a")),
        NetplayError::Topology(TopologyError::MissingLocalPort)
    );
    assert_eq!(
        start_error(player(0).add_remote("a").add_remote("b")),
        NetplayError::Topology(TopologyError::AmbiguousMultitapAssignment { remotes: 2 })
    );
    assert_eq!(
        start_error(spectator(Some(2)).add_remote("a").add_remote("b")),
        NetplayError::Topology(TopologyError::SpectatorRequiresSingleHost { remotes: 2 })
    );
    assert_eq!(
        start_error(spectator(None).add_remote("a")),
        NetplayError::Topology(TopologyError::MissingSpectatorPlayerCount)
    );
    assert_eq!(
        start_error(player(3).add_remote("a")),
        NetplayError::Topology(TopologyError::LocalSlotOutOfRange {
            slot: 3,
            players: 2
        })
    );
    assert_eq!(
        start_error(
            player(0)
                .add_spectator("s1")
                .add_spectator("s2")
                .with_max_spectators(1)
        ),
        NetplayError::Topology(TopologyError::TooManySpectators {
            spectators: 2,
            max: 1
        })
    );
}

#[test]
#[serial]
fn refused_peer_aborts_start() {
    init_tracing();
    let mut stub = HostStub::new();
    let (factory, script) = ScriptedFactory::new();
    script.lock().refuse_role = Some(PeerRole::Spectator);
    let mut session = RollbackSession::new(factory);

    let err = session
        .start(player(0).add_remote("a").add_spectator("s"), &mut stub.host())
        .unwrap_err();

    assert!(matches!(err, NetplayError::Transport { .. }));
    assert_eq!(session.peers().count(), 0);
    assert!(script.lock().dropped);
}
