//! `alsa-none-probe [config.toml] [periods]`
//!
//! Opens a playback/capture pair on one session, plays the requested number
//! of periods of silence, reads back whatever capture has ready and prints a
//! JSON report of the timing and final stream state.

use std::time::Instant;

use alsa::Direction;
use alsa::pcm::Format;
use alsa::poll::Flags;
use anyhow::{Context, Result};
use serde::Serialize;

use alsa_none_rs::Session;
use alsa_none_rs::config::{self, ConfigNode};
use alsa_none_rs::pcm::{HwParams, IoPlug, StreamStatus};

const PERIOD: u64 = 1024;
const DEFAULT_PERIODS: u64 = 16;

#[derive(Serialize)]
struct Report {
    plugin: &'static str,
    periods: u64,
    frames_written: u64,
    frames_read: u64,
    elapsed_ms: f64,
    expected_ms: f64,
    capture_silent: bool,
    playback: StreamStatus,
    capture: StreamStatus,
}

fn load_config(path: Option<&str>) -> Result<ConfigNode> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file '{}'", path))?;
            ConfigNode::from_toml_str(&text)
                .with_context(|| format!("Failed to parse config file '{}'", path))
        }
        None => Ok(ConfigNode::new()),
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let node = load_config(args.next().as_deref())?;
    let periods = match args.next() {
        Some(n) => n
            .parse::<u64>()
            .with_context(|| format!("Invalid period count '{}'", n))?,
        None => DEFAULT_PERIODS,
    };

    let session = Session::new();
    let playback = session
        .open_pcm(Direction::Playback, &node)
        .context("Failed to open playback stream")?;
    let capture = session
        .open_pcm(Direction::Capture, &node)
        .context("Failed to open capture stream")?;

    let params = HwParams {
        format: Format::S16LE,
        channels: 2,
        rate: 48000,
        period_size: PERIOD,
        buffer_size: PERIOD * 4,
    };
    for (label, pcm) in [("playback", &playback), ("capture", &capture)] {
        pcm.hw_params(&params)
            .with_context(|| format!("Failed to negotiate {} hw params", label))?;
        pcm.prepare()
            .with_context(|| format!("Failed to prepare {} stream", label))?;
    }
    capture.start().context("Failed to start capture stream")?;
    log::info!(
        "Streams ready: {:?} {}ch {}Hz, period {} frames, {} periods",
        params.format,
        params.channels,
        params.rate,
        params.period_size,
        periods
    );

    let mut frames_written = 0;
    let mut frames_read = 0;
    let mut capture_silent = true;
    let mut capture_buf = vec![0xA5u8; PERIOD as usize * capture.frame_bytes()];

    let started = Instant::now();
    for _ in 0..periods {
        frames_written += playback
            .transfer(PERIOD, &mut [])
            .context("Playback transfer failed")?;

        if capture.poll_revents()?.contains(Flags::IN) {
            capture_buf.fill(0xA5);
            let n = capture
                .transfer(PERIOD, &mut capture_buf)
                .context("Capture transfer failed")?;
            capture_silent &= capture_buf.iter().all(|&b| b == 0);
            frames_read += n;
        }
    }
    let elapsed = started.elapsed();

    let report = Report {
        plugin: config::PLUGIN_NAME,
        periods,
        frames_written,
        frames_read,
        elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        expected_ms: (periods * PERIOD) as f64 * 1000.0 / f64::from(params.rate),
        capture_silent,
        playback: playback.status(),
        capture: capture.status(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    playback.drain()?;
    capture.stop()?;
    Ok(())
}
