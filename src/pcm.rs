//! Rate-clock buffer simulator: the "none" PCM stream.
//!
//! There is no hardware behind the stream, so its position is fabricated from
//! elapsed monotonic time at the negotiated rate. Transfers are throttled to
//! real time against that virtual pointer, capture produces silence, and
//! readiness is manufactured through a self-pipe (see [`crate::notifier`]).
//!
//! Pointers count frames. `adv_ptr` is how far the virtual clock has moved,
//! `usr_ptr` how far the host has written or read. Both only grow between
//! prepares.

use std::fmt;
use std::os::fd::RawFd;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use alsa::Direction;
use alsa::pcm::Format;
use alsa::poll::Flags;
use serde::Serialize;

use crate::clock::{Clock, duration_of, frames_in};
use crate::config::{self, HwConstraints, PcmConfig, physical_bits};
use crate::error::{Error, Result};
use crate::notifier::ReadinessPipe;
use crate::registry::{StreamId, TriggerRegistry, Triggerable};
use crate::session::Session;

pub type Frames = u64;

/// Waits shorter than this are not worth sleeping for.
const MIN_WAIT: Duration = Duration::from_micros(1);

macro_rules! trace {
    ($shared:expr, $($arg:tt)+) => {
        if $shared.config.debug {
            log::debug!("{}{} {}", $shared.id, $shared.tag(), format_args!($($arg)+));
        }
    };
}

/// Parameters the host negotiated for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwParams {
    pub format: Format,
    pub channels: u32,
    pub rate: u32,
    pub period_size: Frames,
    pub buffer_size: Frames,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PcmState {
    Open,
    Setup,
    Prepared,
    Running,
    Stopped,
}

impl PcmState {
    pub fn name(&self) -> &'static str {
        match self {
            PcmState::Open => "open",
            PcmState::Setup => "setup",
            PcmState::Prepared => "prepared",
            PcmState::Running => "running",
            PcmState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for PcmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot of a stream, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub id: StreamId,
    pub direction: &'static str,
    pub state: PcmState,
    pub rate: u32,
    pub frame_bytes: usize,
    pub fire_threshold: Frames,
    pub buffer_size: Frames,
    pub usr_ptr: Frames,
    pub adv_ptr: Frames,
    pub pending_wakeups: u32,
}

/// Where the virtual clock was anchored: elapsed time is measured from `at`
/// and added to `frames`.
#[derive(Debug, Clone, Copy)]
struct Epoch {
    at: Duration,
    frames: Frames,
}

#[derive(Debug)]
struct StreamState {
    state: PcmState,
    rate: u32,
    frame_bytes: usize,
    fire_threshold: Frames,
    buffer_size: Frames,
    usr_ptr: Frames,
    adv_ptr: Frames,
    /// None until the first advance after a (re)start.
    epoch: Option<Epoch>,
    /// Running only because prepare started a playback stream, the host has
    /// not issued its own start yet.
    auto_started: bool,
    pipe: ReadinessPipe,
}

impl StreamState {
    fn running(&self) -> bool {
        self.state == PcmState::Running
    }
}

struct StreamShared {
    id: StreamId,
    direction: Direction,
    config: PcmConfig,
    poll_fd: RawFd,
    poll_events: Flags,
    clock: Arc<dyn Clock>,
    state: Mutex<StreamState>,
    wake: Condvar,
}

impl StreamShared {
    fn tag(&self) -> char {
        match self.direction {
            Direction::Playback => 'P',
            Direction::Capture => 'C',
        }
    }

    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the virtual pointer up to the current time. Returns the number of
    /// frames gained, or None when the stream is not running.
    fn advance(&self, st: &mut StreamState) -> Option<Frames> {
        if !st.running() {
            return None;
        }
        let now = self.clock.now();
        let epoch = *st.epoch.get_or_insert(Epoch {
            at: now,
            frames: st.adv_ptr,
        });
        let target = epoch
            .frames
            .saturating_add(frames_in(now.saturating_sub(epoch.at), st.rate));
        trace!(self, "advance: {} to {}", st.adv_ptr, target);
        if target <= st.adv_ptr {
            return Some(0);
        }
        let gained = target - st.adv_ptr;
        if st.pipe.fire(gained, st.fire_threshold) {
            trace!(self, "pipe fired");
        }
        st.adv_ptr = target;
        Some(gained)
    }

    fn start(&self, st: &mut StreamState) -> Result<()> {
        match st.state {
            PcmState::Running => {
                trace!(self, "start: already started");
                return Ok(());
            }
            PcmState::Prepared | PcmState::Stopped => {}
            other => {
                return Err(Error::BadState {
                    op: "start",
                    state: other.name(),
                });
            }
        }
        trace!(self, "start");
        st.state = PcmState::Running;
        st.epoch = None;
        self.advance(st);
        Ok(())
    }

    fn stop(&self, st: &mut StreamState) {
        if !st.running() {
            trace!(self, "stop: already stopped");
            return;
        }
        trace!(self, "stop");
        st.state = PcmState::Stopped;
        st.auto_started = false;
        if st.pipe.flush() > 0 {
            trace!(self, "pipe flushed");
        }
        self.wake.notify_all();
    }
}

impl Triggerable for StreamShared {
    fn is_capture(&self) -> bool {
        self.direction == Direction::Capture
    }

    fn trigger(&self) -> bool {
        let mut st = self.lock();
        self.advance(&mut st).is_some()
    }
}

/// The operation set the host's PCM I/O framework drives a stream through.
///
/// [`crate::ffi`] turns any implementor into an ioplug callback table.
pub trait IoPlug: Send + Sync {
    fn direction(&self) -> Direction;
    fn poll_fd(&self) -> RawFd;
    fn poll_events(&self) -> Flags;
    fn constraints(&self) -> &HwConstraints;
    fn frame_bytes(&self) -> usize;
    fn buffer_size(&self) -> Frames;

    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn drain(&self) -> Result<()>;
    fn prepare(&self) -> Result<()>;
    fn hw_params(&self, params: &HwParams) -> Result<()>;
    fn delay(&self) -> Result<Frames>;
    fn pointer(&self) -> Result<Frames>;
    fn transfer(&self, size: Frames, buf: &mut [u8]) -> Result<Frames>;
    fn poll_revents(&self) -> Result<Flags>;
}

/// A "none" PCM stream. Closing is dropping: the stream leaves the registry,
/// stops, and releases its descriptors.
pub struct NullPcm {
    shared: Arc<StreamShared>,
    registry: Arc<TriggerRegistry>,
    constraints: HwConstraints,
}

impl NullPcm {
    /// Open a stream and register it with the session's registry.
    pub fn open(direction: Direction, config: PcmConfig, session: &Session) -> Result<Self> {
        let pipe = ReadinessPipe::new(direction)?;
        let registry = Arc::clone(session.registry());
        let id = registry.allocate_id();
        let shared = Arc::new(StreamShared {
            id,
            direction,
            config,
            poll_fd: pipe.poll_fd(),
            poll_events: pipe.poll_events(),
            clock: Arc::clone(session.clock()),
            state: Mutex::new(StreamState {
                state: PcmState::Open,
                rate: config::default_rate(),
                frame_bytes: config::default_frame_bytes(),
                fire_threshold: 1,
                buffer_size: 0,
                usr_ptr: 0,
                adv_ptr: 0,
                epoch: None,
                auto_started: false,
                pipe,
            }),
            wake: Condvar::new(),
        });

        let member: Arc<dyn Triggerable> = shared.clone();
        if !registry.insert(id, &member) {
            return Err(Error::BadState {
                op: "open",
                state: "registered",
            });
        }
        trace!(shared, "open");

        Ok(Self {
            shared,
            registry,
            constraints: session.constraints().clone(),
        })
    }

    pub fn id(&self) -> StreamId {
        self.shared.id
    }

    pub fn config(&self) -> PcmConfig {
        self.shared.config
    }

    pub fn status(&self) -> StreamStatus {
        let st = self.shared.lock();
        StreamStatus {
            id: self.shared.id,
            direction: match self.shared.direction {
                Direction::Playback => "playback",
                Direction::Capture => "capture",
            },
            state: st.state,
            rate: st.rate,
            frame_bytes: st.frame_bytes,
            fire_threshold: st.fire_threshold,
            buffer_size: st.buffer_size,
            usr_ptr: st.usr_ptr,
            adv_ptr: st.adv_ptr,
            pending_wakeups: st.pipe.outstanding(),
        }
    }

    /// Advance the virtual clock to now. Returns the frames gained, or None
    /// if the stream is not running.
    pub fn advance(&self) -> Option<Frames> {
        let mut st = self.shared.lock();
        self.shared.advance(&mut st)
    }

    /// Check the requested parameters against the constraint table and
    /// return the frame width they imply. Touches no state.
    fn validate(&self, params: &HwParams) -> Result<usize> {
        let c = &self.constraints;
        if !c.allows(params.format) {
            return Err(Error::UnsupportedFormat(params.format));
        }
        let bits = physical_bits(params.format).ok_or(Error::UnsupportedFormat(params.format))?;
        let frame_bytes = (u64::from(bits) * u64::from(params.channels) / 8) as usize;
        if frame_bytes < 1 {
            return Err(Error::ZeroFrameSize {
                format: params.format,
                channels: params.channels,
            });
        }

        let width = frame_bytes as u64;
        c.channels.check("channels", u64::from(params.channels))?;
        c.rate.check("rate", u64::from(params.rate))?;
        c.buffer_bytes
            .check("buffer_bytes", params.buffer_size.saturating_mul(width))?;
        c.period_bytes
            .check("period_bytes", params.period_size.saturating_mul(width))?;
        let periods = params.buffer_size.checked_div(params.period_size).unwrap_or(0);
        c.periods.check("periods", periods)?;
        Ok(frame_bytes)
    }
}

impl IoPlug for NullPcm {
    fn direction(&self) -> Direction {
        self.shared.direction
    }

    fn poll_fd(&self) -> RawFd {
        self.shared.poll_fd
    }

    fn poll_events(&self) -> Flags {
        self.shared.poll_events
    }

    fn constraints(&self) -> &HwConstraints {
        &self.constraints
    }

    fn frame_bytes(&self) -> usize {
        self.shared.lock().frame_bytes
    }

    fn buffer_size(&self) -> Frames {
        self.shared.lock().buffer_size
    }

    fn start(&self) -> Result<()> {
        let mut st = self.shared.lock();
        self.shared.start(&mut st)?;
        st.auto_started = false;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let mut st = self.shared.lock();
        self.shared.stop(&mut st);
        Ok(())
    }

    /// Nothing is ever buffered, so draining is stopping.
    fn drain(&self) -> Result<()> {
        let mut st = self.shared.lock();
        trace!(self.shared, "drain");
        self.shared.stop(&mut st);
        Ok(())
    }

    fn prepare(&self) -> Result<()> {
        let shared = &self.shared;
        let mut st = shared.lock();
        if st.state == PcmState::Open {
            return Err(Error::BadState {
                op: "prepare",
                state: st.state.name(),
            });
        }
        trace!(shared, "prepare");
        st.usr_ptr = 0;
        st.adv_ptr = 0;
        st.pipe.flush();
        if st.running() {
            // the old epoch refers to the discarded pointer
            st.epoch = Some(Epoch {
                at: shared.clock.now(),
                frames: 0,
            });
            shared.wake.notify_all();
        } else {
            st.state = PcmState::Prepared;
        }
        // playback data arrives before the host's start, keep the clock moving
        if shared.direction == Direction::Playback {
            shared.start(&mut st)?;
            st.auto_started = true;
        }
        Ok(())
    }

    fn hw_params(&self, params: &HwParams) -> Result<()> {
        let shared = &self.shared;
        let mut st = shared.lock();
        if st.running() && !st.auto_started {
            return Err(Error::BadState {
                op: "hw_params",
                state: st.state.name(),
            });
        }
        let frame_bytes = match self.validate(params) {
            Ok(width) => width,
            Err(e) => {
                trace!(shared, "params: rejected: {}", e);
                return Err(e);
            }
        };
        // the host still sees a prepared playback stream, renegotiation is legal
        if st.running() {
            shared.stop(&mut st);
        }
        st.frame_bytes = frame_bytes;
        st.rate = params.rate;
        st.fire_threshold = params.period_size;
        st.buffer_size = params.buffer_size;
        st.state = PcmState::Setup;
        trace!(
            shared,
            "params: frame_sz:{} rate:{} format:{:?} channels:{} period_sz:{} bufsize:{}",
            frame_bytes,
            params.rate,
            params.format,
            params.channels,
            params.period_size,
            params.buffer_size,
        );
        Ok(())
    }

    fn delay(&self) -> Result<Frames> {
        trace!(self.shared, "delay");
        Ok(1)
    }

    fn pointer(&self) -> Result<Frames> {
        let shared = &self.shared;
        let mut st = shared.lock();
        if !st.running() {
            trace!(shared, "pointer: not running");
            return Ok(0);
        }
        if shared.config.auto_advance {
            shared.advance(&mut st);
        }
        trace!(shared, "pointer: {}", st.adv_ptr);
        Ok(st.adv_ptr)
    }

    /// Accept `size` frames of playback or produce `size` frames of silent
    /// capture into `buf`, blocking until the virtual clock has caught up.
    ///
    /// Returns 0 if the stream is idle or is stopped while waiting.
    fn transfer(&self, size: Frames, buf: &mut [u8]) -> Result<Frames> {
        let shared = &self.shared;
        let mut st = shared.lock();
        if !st.running() {
            trace!(shared, "transfer: not running");
            return Ok(0);
        }
        let capture = shared.direction == Direction::Capture;
        let needed = usize::try_from(size)
            .unwrap_or(usize::MAX)
            .saturating_mul(st.frame_bytes);
        if capture && buf.len() < needed {
            return Err(Error::BufferTooSmall {
                needed,
                got: buf.len(),
            });
        }

        trace!(shared, "transfer: size: {}", size);
        loop {
            shared.advance(&mut st);
            let remaining = st.usr_ptr.saturating_add(size).saturating_sub(st.adv_ptr);
            if remaining == 0 {
                break;
            }
            let wait = duration_of(remaining, st.rate);
            if wait < MIN_WAIT {
                break;
            }
            trace!(shared, "transfer: remaining {}, sleep {} us", remaining, wait.as_micros());
            st = shared
                .wake
                .wait_timeout(st, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            if !st.running() {
                trace!(shared, "transfer: interrupted");
                return Ok(0);
            }
        }

        st.usr_ptr += size;
        if capture {
            buf[..needed].fill(0);
            if st.pipe.flush() > 0 {
                trace!(shared, "pipe flushed");
            }
            shared.advance(&mut st);
        }
        drop(st);

        if !capture {
            let triggered = self.registry.trigger_captures(shared.id);
            if triggered > 0 {
                trace!(shared, "triggered {} capture stream(s)", triggered);
            }
        }
        trace!(shared, "transfer: return {}", size);
        Ok(size)
    }

    fn poll_revents(&self) -> Result<Flags> {
        let shared = &self.shared;
        let mut st = shared.lock();
        if !st.running() {
            trace!(shared, "poll: not running");
            return Ok(Flags::empty());
        }
        shared.advance(&mut st);
        let available = st.adv_ptr.saturating_sub(st.usr_ptr);
        let revents = if available >= st.fire_threshold {
            shared.poll_events
        } else {
            Flags::empty()
        };
        trace!(shared, "poll: events:{:?} available:{}", revents, available);
        Ok(revents)
    }
}

impl Drop for NullPcm {
    fn drop(&mut self) {
        trace!(self.shared, "close");
        self.registry.remove(self.shared.id);
        let mut st = self.shared.lock();
        self.shared.stop(&mut st);
    }
}

impl fmt::Debug for NullPcm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NullPcm").field("status", &self.status()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, MonotonicClock};
    use crate::config::ConfigNode;

    fn manual_session() -> (Session, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (Session::with_clock(clock.clone()), clock)
    }

    fn s16_mono(period_size: Frames) -> HwParams {
        HwParams {
            format: Format::S16LE,
            channels: 1,
            rate: 48000,
            period_size,
            buffer_size: period_size * 4,
        }
    }

    fn prepared(session: &Session, direction: Direction, period_size: Frames) -> NullPcm {
        let config = PcmConfig {
            debug: true,
            auto_advance: true,
        };
        let pcm = NullPcm::open(direction, config, session).unwrap();
        pcm.hw_params(&s16_mono(period_size)).unwrap();
        pcm.prepare().unwrap();
        pcm
    }

    #[test]
    fn hw_params_computes_frame_size() {
        let (session, _) = manual_session();
        let pcm = session.open_pcm(Direction::Playback, &ConfigNode::new()).unwrap();
        pcm.hw_params(&s16_mono(480)).unwrap();
        let status = pcm.status();
        assert_eq!(status.frame_bytes, 2);
        assert_eq!(status.rate, 48000);
        assert_eq!(status.fire_threshold, 480);
        assert_eq!(status.state, PcmState::Setup);

        let stereo_float = HwParams {
            format: Format::FloatLE,
            channels: 2,
            ..s16_mono(480)
        };
        pcm.hw_params(&stereo_float).unwrap();
        assert_eq!(pcm.frame_bytes(), 8);
    }

    #[test]
    fn unsupported_format_leaves_state_alone() {
        let (session, _) = manual_session();
        let pcm = session.open_pcm(Direction::Capture, &ConfigNode::new()).unwrap();
        pcm.hw_params(&s16_mono(480)).unwrap();
        let before = pcm.status();

        let packed24 = HwParams {
            format: Format::S243LE,
            ..s16_mono(256)
        };
        let err = pcm.hw_params(&packed24).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(Format::S243LE)));
        assert_eq!(err.errno(), -libc::EINVAL);
        assert_eq!(pcm.status(), before);
    }

    #[test]
    fn zero_width_frame_is_rejected() {
        let (session, _) = manual_session();
        let pcm = session.open_pcm(Direction::Capture, &ConfigNode::new()).unwrap();
        let params = HwParams {
            format: Format::U8,
            channels: 0,
            ..s16_mono(480)
        };
        assert!(matches!(pcm.hw_params(&params), Err(Error::ZeroFrameSize { .. })));
        assert_eq!(pcm.status().state, PcmState::Open);
    }

    #[test]
    fn constraint_table_bounds_are_enforced() {
        let (session, _) = manual_session();
        let pcm = session.open_pcm(Direction::Playback, &ConfigNode::new()).unwrap();

        let two_periods = HwParams {
            buffer_size: 960,
            ..s16_mono(480)
        };
        assert!(matches!(
            pcm.hw_params(&two_periods),
            Err(Error::OutOfRange { param: "periods", .. })
        ));

        let tiny_period = s16_mono(32);
        assert!(matches!(
            pcm.hw_params(&tiny_period),
            Err(Error::OutOfRange { param: "period_bytes", .. })
        ));

        let too_fast = HwParams {
            rate: 384000,
            ..s16_mono(480)
        };
        assert!(matches!(
            pcm.hw_params(&too_fast),
            Err(Error::OutOfRange { param: "rate", .. })
        ));
    }

    #[test]
    fn start_requires_prepare() {
        let (session, _) = manual_session();
        let pcm = session.open_pcm(Direction::Capture, &ConfigNode::new()).unwrap();
        assert!(matches!(pcm.start(), Err(Error::BadState { op: "start", .. })));
        assert!(matches!(pcm.prepare(), Err(Error::BadState { op: "prepare", .. })));
    }

    #[test]
    fn prepare_resets_pointers() {
        let (session, clock) = manual_session();
        let pcm = prepared(&session, Direction::Capture, 256);
        pcm.start().unwrap();
        clock.advance(Duration::from_millis(20));
        let mut buf = vec![0u8; 512];
        assert_eq!(pcm.transfer(256, &mut buf).unwrap(), 256);
        let status = pcm.status();
        assert_eq!(status.usr_ptr, 256);
        assert_eq!(status.adv_ptr, 960);

        pcm.stop().unwrap();
        pcm.prepare().unwrap();
        let status = pcm.status();
        assert_eq!((status.usr_ptr, status.adv_ptr), (0, 0));
        assert_eq!(status.state, PcmState::Prepared);
    }

    #[test]
    fn prepare_while_running_reanchors_the_clock() {
        let (session, clock) = manual_session();
        let pcm = prepared(&session, Direction::Playback, 480);
        clock.advance(Duration::from_millis(10));
        assert_eq!(pcm.pointer().unwrap(), 480);

        pcm.prepare().unwrap();
        assert_eq!(pcm.pointer().unwrap(), 0);
        clock.advance(Duration::from_millis(5));
        assert_eq!(pcm.pointer().unwrap(), 240);
    }

    #[test]
    fn time_after_prepare_counts_before_the_first_read() {
        let (session, clock) = manual_session();
        let pcm = prepared(&session, Direction::Capture, 480);
        pcm.start().unwrap();
        clock.advance(Duration::from_millis(5));

        pcm.prepare().unwrap();
        clock.advance(Duration::from_millis(10));
        assert_eq!(pcm.pointer().unwrap(), 480);
    }

    #[test]
    fn playback_prepare_starts_the_clock() {
        let (session, _) = manual_session();
        let pcm = prepared(&session, Direction::Playback, 480);
        assert_eq!(pcm.status().state, PcmState::Running);

        let capture = prepared(&session, Direction::Capture, 480);
        assert_eq!(capture.status().state, PcmState::Prepared);
    }

    #[test]
    fn second_start_keeps_the_epoch() {
        let (session, clock) = manual_session();
        let pcm = prepared(&session, Direction::Capture, 256);
        pcm.start().unwrap();
        clock.advance(Duration::from_millis(5));
        pcm.start().unwrap();
        assert_eq!(pcm.status().adv_ptr, 0, "second start must not advance");
        clock.advance(Duration::from_millis(5));
        assert_eq!(pcm.pointer().unwrap(), 480);
        assert_eq!(pcm.status().state, PcmState::Running);
    }

    #[test]
    fn idle_stream_makes_no_progress() {
        let (session, clock) = manual_session();
        let pcm = prepared(&session, Direction::Capture, 256);
        clock.advance(Duration::from_secs(1));
        let mut buf = vec![0xAA; 512];
        assert_eq!(pcm.transfer(256, &mut buf).unwrap(), 0);
        assert_eq!(buf, vec![0xAA; 512]);
        assert_eq!(pcm.pointer().unwrap(), 0);
        assert_eq!(pcm.poll_revents().unwrap(), Flags::empty());
        assert_eq!(pcm.advance(), None);
    }

    #[test]
    fn pointer_without_auto_advance_reports_last_position() {
        let (session, clock) = manual_session();
        let pcm = NullPcm::open(Direction::Capture, PcmConfig::default(), &session).unwrap();
        pcm.hw_params(&s16_mono(256)).unwrap();
        pcm.prepare().unwrap();
        pcm.start().unwrap();
        clock.advance(Duration::from_millis(10));
        assert_eq!(pcm.pointer().unwrap(), 0);
        assert_eq!(pcm.advance(), Some(480));
        assert_eq!(pcm.pointer().unwrap(), 480);
    }

    #[test]
    fn capture_readiness_follows_fire_threshold() {
        let (session, clock) = manual_session();
        let pcm = prepared(&session, Direction::Capture, 256);
        pcm.start().unwrap();

        clock.advance(Duration::from_millis(5));
        assert_eq!(pcm.poll_revents().unwrap(), Flags::empty());
        assert_eq!(pcm.status().pending_wakeups, 0);

        clock.advance(Duration::from_millis(1));
        assert_eq!(pcm.poll_revents().unwrap(), Flags::IN);
    }

    #[test]
    fn capture_transfer_fills_silence_and_drains_wakeups() {
        let (session, clock) = manual_session();
        let pcm = prepared(&session, Direction::Capture, 256);
        pcm.start().unwrap();
        clock.advance(Duration::from_millis(10));
        assert_eq!(pcm.advance(), Some(480));
        assert_eq!(pcm.status().pending_wakeups, 1);

        let mut buf = vec![0xAA; 600];
        assert_eq!(pcm.transfer(256, &mut buf).unwrap(), 256);
        assert!(buf[..512].iter().all(|&b| b == 0));
        assert!(buf[512..].iter().all(|&b| b == 0xAA));
        assert_eq!(pcm.status().pending_wakeups, 0);
    }

    #[test]
    fn capture_buffer_must_hold_the_request() {
        let (session, clock) = manual_session();
        let pcm = prepared(&session, Direction::Capture, 256);
        pcm.start().unwrap();
        clock.advance(Duration::from_millis(10));
        let mut buf = vec![0u8; 100];
        assert!(matches!(
            pcm.transfer(256, &mut buf),
            Err(Error::BufferTooSmall { needed: 512, got: 100 })
        ));
        assert_eq!(pcm.status().usr_ptr, 0);
    }

    #[test]
    fn playback_transfer_advances_running_captures() {
        let (session, clock) = manual_session();
        let playback = prepared(&session, Direction::Playback, 480);
        let capture = prepared(&session, Direction::Capture, 256);
        let idle = prepared(&session, Direction::Capture, 256);
        capture.start().unwrap();

        clock.advance(Duration::from_millis(10));
        assert_eq!(playback.transfer(480, &mut []).unwrap(), 480);

        let status = capture.status();
        assert_eq!(status.adv_ptr, 480);
        assert_eq!(status.pending_wakeups, 1);
        assert_eq!(idle.status().adv_ptr, 0);
    }

    #[test]
    fn stop_flushes_pending_wakeups() {
        let (session, clock) = manual_session();
        let pcm = prepared(&session, Direction::Capture, 256);
        pcm.start().unwrap();
        clock.advance(Duration::from_millis(10));
        pcm.advance();
        assert_eq!(pcm.status().pending_wakeups, 1);

        pcm.stop().unwrap();
        let status = pcm.status();
        assert_eq!(status.pending_wakeups, 0);
        assert_eq!(status.state, PcmState::Stopped);
        pcm.stop().unwrap();
    }

    #[test]
    fn drain_stops_a_running_stream() {
        let (session, _) = manual_session();
        let pcm = prepared(&session, Direction::Playback, 480);
        pcm.drain().unwrap();
        assert_eq!(pcm.status().state, PcmState::Stopped);
        pcm.drain().unwrap();
    }

    #[test]
    fn playback_renegotiates_after_prepare() {
        let (session, clock) = manual_session();
        let pcm = prepared(&session, Direction::Playback, 480);
        assert_eq!(pcm.status().state, PcmState::Running);

        pcm.hw_params(&s16_mono(240)).unwrap();
        let status = pcm.status();
        assert_eq!(status.state, PcmState::Setup);
        assert_eq!(status.fire_threshold, 240);
        assert_eq!(status.pending_wakeups, 0);

        pcm.prepare().unwrap();
        assert_eq!(pcm.status().state, PcmState::Running);
        clock.advance(Duration::from_millis(5));
        assert_eq!(pcm.pointer().unwrap(), 240);
    }

    #[test]
    fn rejected_renegotiation_keeps_playback_running() {
        let (session, _) = manual_session();
        let pcm = prepared(&session, Direction::Playback, 480);
        let bad = HwParams {
            channels: 64,
            ..s16_mono(480)
        };
        assert!(pcm.hw_params(&bad).is_err());
        assert_eq!(pcm.status().state, PcmState::Running);
    }

    #[test]
    fn hw_params_refused_after_host_start() {
        let (session, _) = manual_session();
        let playback = prepared(&session, Direction::Playback, 480);
        playback.start().unwrap();
        assert!(matches!(
            playback.hw_params(&s16_mono(480)),
            Err(Error::BadState { op: "hw_params", .. })
        ));

        let capture = prepared(&session, Direction::Capture, 480);
        capture.start().unwrap();
        assert!(matches!(
            capture.hw_params(&s16_mono(480)),
            Err(Error::BadState { op: "hw_params", .. })
        ));
        assert_eq!(capture.status().state, PcmState::Running);
    }

    #[test]
    fn delay_is_one_frame() {
        let (session, _) = manual_session();
        let pcm = prepared(&session, Direction::Playback, 480);
        assert_eq!(pcm.delay().unwrap(), 1);
    }

    #[test]
    fn close_leaves_the_registry() {
        let (session, _) = manual_session();
        let a = prepared(&session, Direction::Playback, 480);
        let b = prepared(&session, Direction::Capture, 480);
        assert_eq!(session.registry().len(), 2);
        let id = a.id();
        drop(a);
        assert!(!session.registry().contains(id));
        assert!(session.registry().contains(b.id()));
    }

    #[test]
    fn stop_interrupts_a_throttled_transfer() {
        let session = Session::with_clock(Arc::new(MonotonicClock::new()));
        let pcm = NullPcm::open(Direction::Capture, PcmConfig::default(), &session).unwrap();
        // 1 Hz: a 64 frame read would block for a minute
        let slow = HwParams {
            rate: 1,
            ..s16_mono(64)
        };
        pcm.hw_params(&slow).unwrap();
        pcm.prepare().unwrap();
        pcm.start().unwrap();

        let begun = std::time::Instant::now();
        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(50));
                pcm.stop().unwrap();
            });
            let mut buf = vec![0u8; 128];
            assert_eq!(pcm.transfer(64, &mut buf).unwrap(), 0);
        });
        assert!(begun.elapsed() < Duration::from_secs(10));
        assert_eq!(pcm.status().usr_ptr, 0);
    }
}
