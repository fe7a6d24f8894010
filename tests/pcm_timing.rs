use std::sync::Arc;
use std::time::{Duration, Instant};

use alsa::Direction;
use alsa::pcm::Format;
use alsa::poll::Flags;
use alsa_none_rs::Session;
use alsa_none_rs::clock::{ManualClock, frames_in};
use alsa_none_rs::config::{ConfigNode, ConfigValue};
use alsa_none_rs::pcm::{HwParams, IoPlug, NullPcm};
use proptest::prelude::*;

fn s16_mono(rate: u32, period_size: u64) -> HwParams {
    HwParams {
        format: Format::S16LE,
        channels: 1,
        rate,
        period_size,
        buffer_size: period_size * 4,
    }
}

fn open(session: &Session, direction: Direction, params: &HwParams) -> NullPcm {
    let node = ConfigNode::new().with("auto_advance", ConfigValue::Integer(1));
    let pcm = session.open_pcm(direction, &node).unwrap();
    pcm.hw_params(params).unwrap();
    pcm.prepare().unwrap();
    pcm.start().unwrap();
    pcm
}

fn readable(fd: i32) -> bool {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let n = unsafe { libc::poll(&mut pfd, 1, 0) };
    n == 1 && pfd.revents & libc::POLLIN != 0
}

#[test]
fn playback_period_takes_its_duration() {
    let session = Session::new();
    let pcm = open(&session, Direction::Playback, &s16_mono(48000, 480));
    assert_eq!(pcm.frame_bytes(), 2);

    let started = Instant::now();
    assert_eq!(pcm.transfer(480, &mut []).unwrap(), 480);
    let elapsed = started.elapsed();
    // 480 frames at 48 kHz is 10 ms; allow for timer slack on either side
    assert!(elapsed >= Duration::from_millis(9), "returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(500), "returned after {:?}", elapsed);
}

#[test]
fn consecutive_transfers_hold_the_rate() {
    let session = Session::new();
    let pcm = open(&session, Direction::Playback, &s16_mono(48000, 480));

    let started = Instant::now();
    let mut written = 0;
    for _ in 0..5 {
        written += pcm.transfer(480, &mut []).unwrap();
    }
    let elapsed = started.elapsed();
    assert_eq!(written, 2400);
    assert!(elapsed >= Duration::from_millis(48), "5 periods in {:?}", elapsed);
    assert_eq!(pcm.status().usr_ptr, 2400);
}

#[test]
fn capture_read_is_silent() {
    let session = Session::new();
    let pcm = open(&session, Direction::Capture, &s16_mono(48000, 256));

    let mut buf = vec![0xFFu8; 256 * 2];
    assert_eq!(pcm.transfer(256, &mut buf).unwrap(), 256);
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn capture_descriptor_becomes_readable_after_a_period() {
    let clock = Arc::new(ManualClock::new());
    let session = Session::with_clock(clock.clone());
    let pcm = open(&session, Direction::Capture, &s16_mono(48000, 256));
    assert_eq!(pcm.poll_events(), Flags::IN);

    clock.advance(Duration::from_millis(5));
    assert!(pcm.poll_revents().unwrap().is_empty());
    assert!(!readable(pcm.poll_fd()));

    clock.advance(Duration::from_millis(6));
    assert_eq!(pcm.poll_revents().unwrap(), Flags::IN);
    assert!(readable(pcm.poll_fd()));

    let mut buf = vec![0u8; 512];
    assert_eq!(pcm.transfer(256, &mut buf).unwrap(), 256);
    assert!(!readable(pcm.poll_fd()));
}

#[test]
fn playback_drives_capture_on_the_same_session() {
    let clock = Arc::new(ManualClock::new());
    let session = Session::with_clock(clock.clone());
    let playback = open(&session, Direction::Playback, &s16_mono(48000, 480));
    let capture = open(&session, Direction::Capture, &s16_mono(48000, 480));

    let other = Session::with_clock(clock.clone());
    let foreign = open(&other, Direction::Capture, &s16_mono(48000, 480));

    clock.advance(Duration::from_millis(10));
    playback.transfer(480, &mut []).unwrap();

    assert_eq!(capture.status().adv_ptr, 480);
    assert!(readable(capture.poll_fd()));
    assert_eq!(foreign.status().adv_ptr, 0);
}

proptest! {
    #[test]
    fn advance_pointer_never_decreases_or_overtakes_the_clock(
        rate in prop::sample::select(vec![8000u32, 22050, 44100, 48000, 96000]),
        steps in prop::collection::vec(0u64..20_000, 1..40),
    ) {
        let clock = Arc::new(ManualClock::new());
        let session = Session::with_clock(clock.clone());
        let pcm = open(&session, Direction::Capture, &s16_mono(rate, 480));

        let mut elapsed = Duration::ZERO;
        let mut last = 0;
        for micros in steps {
            let step = Duration::from_micros(micros);
            clock.advance(step);
            elapsed += step;

            let ptr = pcm.pointer().unwrap();
            prop_assert!(ptr >= last);
            prop_assert!(ptr <= frames_in(elapsed, rate));
            last = ptr;
        }
    }
}
