//! Drift correction and stall detection.
//!
//! Two peers running at nominally the same rate still drift apart. When this
//! peer runs ahead of the confirmed timeline by more than its own input delay,
//! [`SyncRegulator`] burns a frame: the emulator runs one step and is restored
//! to the snapshot taken just before, so the audio keeps playing while the
//! simulation stands still. This is an approximation: it can only slow the
//! local peer down one whole frame at a time.
//!
//! [`StallMonitor`] watches for the opposite case, ticks where the transport
//! has nothing to advance, and reports when the silence has lasted long enough
//! that audio should be muted.

use tracing::{debug, trace, warn};

use crate::buttons::InputBlock;
use crate::host::{AudioOutput, Emulator};
use crate::sessions::config::RiftSyncConfig;

/// Decides when to burn a frame and burns it.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRegulator {
    config: RiftSyncConfig,
    corrections: u64,
}

impl SyncRegulator {
    /// Creates a regulator with the given settings.
    #[must_use]
    pub fn new(config: RiftSyncConfig) -> Self {
        Self {
            config,
            corrections: 0,
        }
    }

    /// The regulator settings.
    #[must_use]
    pub fn config(&self) -> &RiftSyncConfig {
        &self.config
    }

    /// Returns `true` if `tick` is one on which the lead is checked at all.
    ///
    /// Callers use this to avoid asking the transport for its lead on every tick.
    #[must_use]
    pub fn is_check_tick(&self, tick: u64) -> bool {
        self.config.enabled && tick.checked_rem(self.config.check_interval) == Some(0)
    }

    /// Returns `true` if a frame should be burned on `tick`.
    ///
    /// That is the case on check ticks when `frames_ahead`, less the local input
    /// delay, reaches the configured threshold.
    #[must_use]
    pub fn should_correct(&self, tick: u64, frames_ahead: f32, local_delay: u32) -> bool {
        self.is_check_tick(tick)
            && frames_ahead - local_delay as f32 >= self.config.frames_ahead_threshold
    }

    /// Burns one frame.
    ///
    /// Turns the volume down, snapshots the emulator, runs exactly one step with
    /// `inputs`, restores the snapshot and the volume. The emulator ends in the
    /// state it started in.
    pub fn correct(
        &mut self,
        emulator: &mut dyn Emulator,
        audio: &mut dyn AudioOutput,
        inputs: &InputBlock,
    ) {
        let volume = audio.volume();
        audio.set_volume(volume * self.config.volume_scale);

        let state = emulator.serialize();
        emulator.run(inputs);
        if !emulator.unserialize(&state) {
            warn!(
                bytes = state.len(),
                "Emulator rejected its own snapshot after a rift correction"
            );
        }

        audio.set_volume(volume);
        self.corrections += 1;
        debug!(corrections = self.corrections, "Burned one frame to resync");
    }

    /// Number of frames burned so far.
    #[must_use]
    pub fn corrections(&self) -> u64 {
        self.corrections
    }
}

/// Outcome of one tick for the [`StallMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StallVerdict {
    /// The tick produced updates. Audio should play.
    Flowing,
    /// The tick produced nothing, but not for long enough to matter.
    Waiting,
    /// Too many consecutive empty ticks. Audio should be muted.
    Stalled,
}

/// Counts consecutive ticks without updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallMonitor {
    threshold: u32,
    consecutive: u32,
}

impl StallMonitor {
    /// Creates a monitor that reports [`StallVerdict::Stalled`] once more than
    /// `threshold` consecutive ticks were empty.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive: 0,
        }
    }

    /// Records a tick that produced `update_count` updates.
    pub fn record(&mut self, update_count: usize) -> StallVerdict {
        if update_count > 0 {
            if self.consecutive > 0 {
                trace!(empty_ticks = self.consecutive, "Updates flowing again");
            }
            self.consecutive = 0;
            return StallVerdict::Flowing;
        }
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive > self.threshold {
            StallVerdict::Stalled
        } else {
            StallVerdict::Waiting
        }
    }

    /// Consecutive empty ticks so far.
    #[must_use]
    pub fn counter(&self) -> u32 {
        self.consecutive
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
    use crate::buttons::Device;

    #[derive(Default)]
    struct Counter {
        frame: u32,
        runs: u32,
    }

    impl Emulator for Counter {
        fn serialize(&mut self) -> Vec<u8> {
            self.frame.to_le_bytes().to_vec()
        }
        fn unserialize(&mut self, state: &[u8]) -> bool {
            match <[u8; 4]>::try_from(state) {
                Ok(bytes) => {
                    self.frame = u32::from_le_bytes(bytes);
                    true
                },
                Err(_) => false,
            }
        }
        fn run(&mut self, _inputs: &InputBlock) {
            self.frame += 1;
            self.runs += 1;
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

    // ==========================================
    // SyncRegulator
    // ==========================================

    #[test]
    fn checks_only_on_interval_ticks() {
        let regulator = SyncRegulator::new(RiftSyncConfig::default());
        assert!(regulator.should_correct(180, 1.0, 0));
        assert!(regulator.should_correct(360, 3.0, 0));
        assert!(!regulator.should_correct(179, 5.0, 0));
        assert!(!regulator.should_correct(181, 5.0, 0));
    }

    #[test]
    fn local_delay_is_subtracted_from_lead() {
        let regulator = SyncRegulator::new(RiftSyncConfig::default());
        assert!(!regulator.should_correct(180, 2.5, 2));
        assert!(regulator.should_correct(180, 3.0, 2));
        assert!(!regulator.should_correct(180, 0.99, 0));
    }

    #[test]
    fn disabled_or_zero_interval_never_corrects() {
        assert!(!SyncRegulator::new(RiftSyncConfig::disabled()).should_correct(180, 9.0, 0));
        let zero = RiftSyncConfig {
            check_interval: 0,
            ..RiftSyncConfig::default()
        };
        assert!(!SyncRegulator::new(zero).should_correct(0, 9.0, 0));
    }

    #[test]
    fn correction_restores_state_and_volume() {
        let mut emulator = Counter {
            frame: 41,
            ..Counter::default()
        };
        let mut speaker = Speaker(0.8);
        let mut regulator = SyncRegulator::new(RiftSyncConfig::default());

        regulator.correct(&mut emulator, &mut speaker, &InputBlock::with_ports(2));

        assert_eq!(emulator.frame, 41);
        assert_eq!(emulator.runs, 1);
        assert!((speaker.0 - 0.8).abs() < f32::EPSILON);
        assert_eq!(regulator.corrections(), 1);
    }

    // ==========================================
    // StallMonitor
    // ==========================================

    #[test]
    fn stall_after_threshold_exceeded() {
        let mut monitor = StallMonitor::new(10);
        for _ in 0..10 {
            assert_eq!(monitor.record(0), StallVerdict::Waiting);
        }
        assert_eq!(monitor.record(0), StallVerdict::Stalled);
        assert_eq!(monitor.counter(), 11);
    }

    #[test]
    fn updates_reset_the_streak() {
        let mut monitor = StallMonitor::new(2);
        monitor.record(0);
        monitor.record(0);
        monitor.record(0);
        assert_eq!(monitor.record(3), StallVerdict::Flowing);
        assert_eq!(monitor.counter(), 0);
        assert_eq!(monitor.record(0), StallVerdict::Waiting);
    }

    #[test]
    fn zero_threshold_stalls_on_first_empty_tick() {
        let mut monitor = StallMonitor::new(0);
        assert_eq!(monitor.record(0), StallVerdict::Stalled);
        assert_eq!(monitor.counter(), 1);
    }
}
