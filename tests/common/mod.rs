//! Common test infrastructure shared across integration tests.
//!
//! This module provides:
//! - `stubs`: host collaborator stubs and a scripted transport
//! - helpers to build requests, start sessions and wait on the poller
//!
//! # Usage
//!
//! From any integration test file:
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::stubs::{HostStub, ScriptedFactory};
//! use common::{start_scripted, two_player_request};
//! ```

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    dead_code
)]

pub mod stubs;

use netplay_rollback::{LocalRole, RollbackSession, StartRequest, TuningConfig};
use std::thread;
use std::time::{Duration, Instant};
use stubs::{HostStub, ScriptedFactory, SharedScript};

/// Port every test session listens on. Nothing is bound.
pub const TEST_PORT: u16 = 55435;

/// Upper bound for anything that waits on the poller thread.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

/// A two-player request with the local player in slot 0.
#[must_use]
pub fn two_player_request() -> StartRequest {
    StartRequest::new()
        .with_local_port(TEST_PORT)
        .with_local_role(LocalRole::Player { slot: 0 })
        .add_remote("198.51.100.2:55435")
}

/// Tuning without rift correction, so only scripted updates drive a tick.
#[must_use]
pub fn quiet_tuning() -> TuningConfig {
    TuningConfig {
        rift: netplay_rollback::RiftSyncConfig::disabled(),
        ..TuningConfig::default()
    }
}

/// Starts a scripted session for `request`.
pub fn start_scripted(
    host: &mut HostStub,
    request: StartRequest,
    tuning: TuningConfig,
) -> (RollbackSession<ScriptedFactory>, SharedScript) {
    init_tracing();
    let (factory, script) = ScriptedFactory::new();
    let mut session = RollbackSession::new(factory).with_tuning(tuning);
    session.start(request, &mut host.host()).unwrap();
    (session, script)
}

/// Polls `condition` every millisecond until it holds or [`WAIT_TIMEOUT`] passes.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}
