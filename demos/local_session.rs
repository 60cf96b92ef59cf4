//! Runs a toy emulator through a single-machine netplay session.
//!
//! ```text
//! cargo run --example local_session -- --frames 300 --delay 2
//! ```
//!
//! The "emulator" is a counter that folds every input into a running digest,
//! and the pad presses A on a fixed rhythm, so two runs with the same options
//! print the same digest.

use clap::Parser;
use netplay_rollback::{
    AudioOutput, Device, Emulator, Host, HostWindow, InputBlock, InputManager, InputMapping,
    LocalTransportFactory, RollbackSession, SavePayload, SnesButton, StartRequest, TuningConfig,
};
use web_time::{Duration, Instant};

#[derive(Parser)]
struct Opt {
    /// Frames to run before stopping.
    #[arg(short, long, default_value_t = 300)]
    frames: u32,
    /// Local input delay, in frames.
    #[arg(short, long, default_value_t = 0)]
    delay: u32,
    /// Target frame rate. `0` runs unthrottled.
    #[arg(long, default_value_t = 60.0)]
    fps: f64,
    /// Report whole snapshots to the transport instead of frame markers.
    #[arg(long)]
    full_snapshot: bool,
}

#[derive(Default)]
struct Counter {
    frame: u32,
    digest: u64,
    run_ahead: bool,
}

impl Emulator for Counter {
    fn serialize(&mut self) -> Vec<u8> {
        let mut state = self.frame.to_le_bytes().to_vec();
        state.extend_from_slice(&self.digest.to_le_bytes());
        state
    }

    fn unserialize(&mut self, state: &[u8]) -> bool {
        let (Some(frame), Some(digest)) = (state.get(0..4), state.get(4..12)) else {
            return false;
        };
        let (Ok(frame), Ok(digest)) = (frame.try_into(), digest.try_into()) else {
            return false;
        };
        self.frame = u32::from_le_bytes(frame);
        self.digest = u64::from_le_bytes(digest);
        true
    }

    fn run(&mut self, inputs: &InputBlock) {
        self.frame += 1;
        for input in inputs.as_slice() {
            self.digest = self.digest.rotate_left(5) ^ u64::from(input.bits());
        }
    }

    fn power(&mut self) {
        *self = Self::default();
    }

    fn set_run_ahead(&mut self, enabled: bool) {
        self.run_ahead = enabled;
    }

    fn run_ahead(&self) -> bool {
        self.run_ahead
    }

    fn configure(&mut self, key: &str, value: &str) {
        tracing::debug!(key, value, "configure");
    }

    fn connect(&mut self, port: usize, device: Device) {
        tracing::debug!(port, ?device, "connect");
    }
}

#[derive(Default)]
struct Key(bool);

impl InputMapping for Key {
    fn poll(&self) -> bool {
        self.0
    }
}

/// Holds A for 10 frames out of every 30.
#[derive(Default)]
struct RhythmPad {
    polls: u32,
    a: Key,
    released: Key,
}

impl InputManager for RhythmPad {
    fn poll(&mut self) {
        self.polls += 1;
        self.a = Key(self.polls % 30 < 10);
    }

    fn mapping(&self, port: usize, device: usize, button: SnesButton) -> Option<&dyn InputMapping> {
        if port != 0 || device != Device::Gamepad.id() {
            return None;
        }
        let key: &dyn InputMapping = if button == SnesButton::A {
            &self.a
        } else {
            &self.released
        };
        Some(key)
    }
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

struct Window;

impl HostWindow for Window {
    fn focused(&self) -> bool {
        true
    }

    fn allow_background_input(&self) -> bool {
        false
    }

    fn set_block_background_input(&mut self, block: bool) {
        tracing::debug!(block, "block background input");
    }

    fn set_pause_on_focus_loss(&mut self, pause: bool) {
        tracing::debug!(pause, "pause on focus loss");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // configure logging: output netplay and demo logs to standard out
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(tracing::Level::DEBUG)
            .finish(),
    )?;
    // forward logs from the log crate to the tracing subscriber
    tracing_log::LogTracer::init()?;

    let opt = Opt::parse();

    let mut emulator = Counter::default();
    let mut pad = RhythmPad::default();
    let mut speaker = Speaker(1.0);
    let mut window = Window;
    let mut host = Host::new(&mut emulator, &mut pad, &mut speaker, &mut window);

    let payload = if opt.full_snapshot {
        SavePayload::FullSnapshot
    } else {
        SavePayload::FrameMarker
    };
    let request = StartRequest::new()
        .with_local_port(55435)
        .with_local_delay(opt.delay)
        .with_save_payload(payload);

    let mut session =
        RollbackSession::new(LocalTransportFactory::new()).with_tuning(TuningConfig::lan());
    session.start(request, &mut host)?;

    let frame_time = (opt.fps > 0.0).then(|| Duration::from_secs_f64(1.0 / opt.fps));
    let started = Instant::now();
    let mut next_frame = started;
    for frame in 0..opt.frames {
        if !session.tick(&mut host) {
            tracing::error!(frame, "session ended early");
            break;
        }
        if frame % 60 == 0 {
            let a = session.local_input(0, Device::Gamepad, SnesButton::A.index());
            tracing::info!(frame, a, muted = session.is_muted(), "tick");
        }
        if let Some(frame_time) = frame_time {
            next_frame += frame_time;
            if let Some(wait) = next_frame.checked_duration_since(Instant::now()) {
                std::thread::sleep(wait);
            }
        }
    }

    let polls = session
        .with_transport(|transport| transport.polls())
        .unwrap_or_default();
    session.stop(&mut host);
    drop(host);

    tracing::info!(
        frames = emulator.frame,
        digest = %format!("{:#018x}", emulator.digest),
        polls,
        elapsed_ms = started.elapsed().as_millis(),
        "done"
    );
    Ok(())
}
