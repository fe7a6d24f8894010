//! `snd_pcm_ioplug` adapter for any [`IoPlug`] implementor.

use std::ffi::{c_char, c_int, c_long, c_uint, c_ulong, c_ushort, c_void};
use std::slice;

use alsa::Direction;
use alsa::pcm::{Access, Format};

use super::{config_node, init_logging, report_open_error, session, snd_config_t};
use crate::config::{HwConstraints, PcmConfig};
use crate::error::Result;
use crate::pcm::{HwParams, IoPlug, NullPcm};

const SND_PCM_IOPLUG_VERSION: c_uint = 0x010002;
const SND_PCM_STREAM_PLAYBACK: c_int = 0;

// snd_pcm_ioplug_hw_param
const SND_PCM_IOPLUG_HW_ACCESS: c_int = 0;
const SND_PCM_IOPLUG_HW_FORMAT: c_int = 1;
const SND_PCM_IOPLUG_HW_CHANNELS: c_int = 2;
const SND_PCM_IOPLUG_HW_BUFFER_BYTES: c_int = 3;
const SND_PCM_IOPLUG_HW_PERIOD_BYTES: c_int = 4;
const SND_PCM_IOPLUG_HW_PERIODS: c_int = 5;
const SND_PCM_IOPLUG_HW_RATE: c_int = 6;

const PCM_NAME: &str = concat!(env!("PCM_NAME"), "\0");

#[repr(C)]
pub struct snd_pcm_t {
    _private: [u8; 0],
}

#[repr(C)]
struct snd_pcm_hw_params_t {
    _private: [u8; 0],
}

#[repr(C)]
struct snd_pcm_channel_area_t {
    addr: *mut c_void,
    /// Bit offset of the first sample.
    first: c_uint,
    /// Bits between consecutive samples.
    step: c_uint,
}

/// Mirror of alsa-lib's `snd_pcm_ioplug_t`; only some fields are read here.
#[repr(C)]
#[allow(dead_code)]
struct snd_pcm_ioplug_t {
    version: c_uint,
    name: *const c_char,
    flags: c_uint,
    poll_fd: c_int,
    poll_events: c_uint,
    mmap_rw: c_uint,
    callback: *const snd_pcm_ioplug_callback_t,
    private_data: *mut c_void,
    pcm: *mut snd_pcm_t,
    stream: c_int,
    state: c_int,
    appl_ptr: c_ulong,
    hw_ptr: c_ulong,
    nonblock: c_int,
    access: c_int,
    format: c_int,
    channels: c_uint,
    rate: c_uint,
    period_size: c_ulong,
    buffer_size: c_ulong,
}

type Io = *mut snd_pcm_ioplug_t;
/// Callback slots the plugin leaves to alsa-lib's defaults.
type Unused = Option<unsafe extern "C" fn()>;

#[repr(C)]
struct snd_pcm_ioplug_callback_t {
    start: Option<unsafe extern "C" fn(Io) -> c_int>,
    stop: Option<unsafe extern "C" fn(Io) -> c_int>,
    pointer: Option<unsafe extern "C" fn(Io) -> c_long>,
    transfer: Option<
        unsafe extern "C" fn(Io, *const snd_pcm_channel_area_t, c_ulong, c_ulong) -> c_long,
    >,
    close: Option<unsafe extern "C" fn(Io) -> c_int>,
    hw_params: Option<unsafe extern "C" fn(Io, *mut snd_pcm_hw_params_t) -> c_int>,
    hw_free: Unused,
    sw_params: Unused,
    prepare: Option<unsafe extern "C" fn(Io) -> c_int>,
    drain: Option<unsafe extern "C" fn(Io) -> c_int>,
    pause: Unused,
    resume: Unused,
    poll_descriptors_count: Unused,
    poll_descriptors: Unused,
    poll_revents:
        Option<unsafe extern "C" fn(Io, *mut libc::pollfd, c_uint, *mut c_ushort) -> c_int>,
    dump: Unused,
    delay: Option<unsafe extern "C" fn(Io, *mut c_long) -> c_int>,
    query_chmaps: Unused,
    get_chmap: Unused,
    set_chmap: Unused,
}

unsafe extern "C" {
    fn snd_pcm_ioplug_create(io: Io, name: *const c_char, stream: c_int, mode: c_int) -> c_int;
    fn snd_pcm_ioplug_delete(io: Io) -> c_int;
    fn snd_pcm_ioplug_set_param_list(
        io: Io,
        ty: c_int,
        num_list: c_uint,
        list: *const c_uint,
    ) -> c_int;
    fn snd_pcm_ioplug_set_param_minmax(io: Io, ty: c_int, min: c_uint, max: c_uint) -> c_int;
}

/// One heap block per stream: alsa-lib keeps pointers to `io` and `callbacks`,
/// so the block stays put until the close callback frees it.
#[repr(C)]
struct Plugin<T> {
    io: snd_pcm_ioplug_t,
    callbacks: snd_pcm_ioplug_callback_t,
    plug: T,
}

unsafe fn plug<'a, T: IoPlug>(io: Io) -> &'a T {
    unsafe { &(*(*io).private_data.cast::<Plugin<T>>()).plug }
}

fn status(result: Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => e.errno(),
    }
}

fn frames(result: Result<u64>) -> c_long {
    match result {
        Ok(n) => c_long::try_from(n).unwrap_or(c_long::MAX),
        Err(e) => c_long::from(e.errno()),
    }
}

fn format_from_raw(raw: c_int) -> Format {
    Format::all()
        .iter()
        .copied()
        .find(|f| *f as c_int == raw)
        .unwrap_or(Format::Unknown)
}

unsafe extern "C" fn start<T: IoPlug>(io: Io) -> c_int {
    status(unsafe { plug::<T>(io) }.start())
}

unsafe extern "C" fn stop<T: IoPlug>(io: Io) -> c_int {
    status(unsafe { plug::<T>(io) }.stop())
}

unsafe extern "C" fn drain<T: IoPlug>(io: Io) -> c_int {
    status(unsafe { plug::<T>(io) }.drain())
}

unsafe extern "C" fn prepare<T: IoPlug>(io: Io) -> c_int {
    status(unsafe { plug::<T>(io) }.prepare())
}

/// alsa-lib has already stored the refined parameters in `io`.
unsafe extern "C" fn hw_params<T: IoPlug>(io: Io, _params: *mut snd_pcm_hw_params_t) -> c_int {
    let params = unsafe {
        let io = &*io;
        HwParams {
            format: format_from_raw(io.format),
            channels: io.channels,
            rate: io.rate,
            period_size: u64::from(io.period_size),
            buffer_size: u64::from(io.buffer_size),
        }
    };
    status(unsafe { plug::<T>(io) }.hw_params(&params))
}

/// Reports the ring position, not the running frame count.
unsafe extern "C" fn pointer<T: IoPlug>(io: Io) -> c_long {
    let plug = unsafe { plug::<T>(io) };
    let position = plug.pointer().map(|ptr| match plug.buffer_size() {
        0 => ptr,
        size => ptr % size,
    });
    frames(position)
}

/// Byte offset of frame `offset` in a channel area laid out as `first` bits
/// in, then `step` bits per frame.
fn area_offset(first: c_uint, step: c_uint, offset: c_ulong) -> usize {
    let bit = u64::from(first) + u64::from(step) * offset as u64;
    (bit / 8) as usize
}

unsafe extern "C" fn transfer<T: IoPlug>(
    io: Io,
    areas: *const snd_pcm_channel_area_t,
    offset: c_ulong,
    size: c_ulong,
) -> c_long {
    let plug = unsafe { plug::<T>(io) };
    let size = u64::from(size);
    if plug.direction() == Direction::Playback || areas.is_null() {
        return frames(plug.transfer(size, &mut []));
    }

    let len = (size as usize).saturating_mul(plug.frame_bytes());
    let buf = unsafe {
        let area = &*areas;
        let base = area.addr.cast::<u8>().add(area_offset(area.first, area.step, offset));
        slice::from_raw_parts_mut(base, len)
    };
    frames(plug.transfer(size, buf))
}

unsafe extern "C" fn close<T: IoPlug>(io: Io) -> c_int {
    let block = unsafe { (*io).private_data.cast::<Plugin<T>>() };
    drop(unsafe { Box::from_raw(block) });
    0
}

unsafe extern "C" fn poll_revents<T: IoPlug>(
    io: Io,
    _pfds: *mut libc::pollfd,
    _nfds: c_uint,
    revents: *mut c_ushort,
) -> c_int {
    match unsafe { plug::<T>(io) }.poll_revents() {
        Ok(flags) => {
            unsafe { *revents = flags.bits() as c_ushort };
            0
        }
        Err(e) => e.errno(),
    }
}

unsafe extern "C" fn delay<T: IoPlug>(io: Io, delayp: *mut c_long) -> c_int {
    match unsafe { plug::<T>(io) }.delay() {
        Ok(frames) => {
            unsafe { *delayp = frames as c_long };
            0
        }
        Err(e) => e.errno(),
    }
}

fn callbacks<T: IoPlug>() -> snd_pcm_ioplug_callback_t {
    snd_pcm_ioplug_callback_t {
        start: Some(start::<T>),
        stop: Some(stop::<T>),
        pointer: Some(pointer::<T>),
        transfer: Some(transfer::<T>),
        close: Some(close::<T>),
        hw_params: Some(hw_params::<T>),
        hw_free: None,
        sw_params: None,
        prepare: Some(prepare::<T>),
        drain: Some(drain::<T>),
        pause: None,
        resume: None,
        poll_descriptors_count: None,
        poll_descriptors: None,
        poll_revents: Some(poll_revents::<T>),
        dump: None,
        delay: Some(delay::<T>),
        query_chmaps: None,
        get_chmap: None,
        set_chmap: None,
    }
}

fn check(rc: c_int) -> std::result::Result<(), c_int> {
    if rc < 0 { Err(rc) } else { Ok(()) }
}

unsafe fn install_constraints(
    io: Io,
    c: &HwConstraints,
) -> std::result::Result<(), c_int> {
    let access = [Access::RWInterleaved as c_uint];
    let formats: Vec<c_uint> = c.formats.iter().map(|f| *f as c_uint).collect();
    let ranges = [
        (SND_PCM_IOPLUG_HW_CHANNELS, c.channels),
        (SND_PCM_IOPLUG_HW_BUFFER_BYTES, c.buffer_bytes),
        (SND_PCM_IOPLUG_HW_PERIOD_BYTES, c.period_bytes),
        (SND_PCM_IOPLUG_HW_PERIODS, c.periods),
        (SND_PCM_IOPLUG_HW_RATE, c.rate),
    ];
    unsafe {
        check(snd_pcm_ioplug_set_param_list(
            io,
            SND_PCM_IOPLUG_HW_ACCESS,
            access.len() as c_uint,
            access.as_ptr(),
        ))?;
        check(snd_pcm_ioplug_set_param_list(
            io,
            SND_PCM_IOPLUG_HW_FORMAT,
            formats.len() as c_uint,
            formats.as_ptr(),
        ))?;
        for (ty, range) in ranges {
            check(snd_pcm_ioplug_set_param_minmax(io, ty, range.min, range.max))?;
        }
    }
    Ok(())
}

/// Hand `plug` to alsa-lib as a new ioplug PCM and store the handle in `pcmp`.
unsafe fn create<T: IoPlug>(
    plug: T,
    name: *const c_char,
    stream: c_int,
    mode: c_int,
    pcmp: *mut *mut snd_pcm_t,
) -> c_int {
    let poll_fd = plug.poll_fd();
    let poll_events = plug.poll_events().bits() as c_uint;
    let block = Box::into_raw(Box::new(Plugin {
        // every field of the ioplug record is an integer or a pointer
        io: unsafe { std::mem::zeroed::<snd_pcm_ioplug_t>() },
        callbacks: callbacks::<T>(),
        plug,
    }));

    unsafe {
        let io = &raw mut (*block).io;
        (*io).version = SND_PCM_IOPLUG_VERSION;
        (*io).name = PCM_NAME.as_ptr().cast();
        (*io).mmap_rw = 0;
        (*io).poll_fd = poll_fd;
        (*io).poll_events = poll_events;
        (*io).callback = &raw const (*block).callbacks;
        (*io).private_data = block.cast();

        let rc = snd_pcm_ioplug_create(io, name, stream, mode);
        if rc < 0 {
            drop(Box::from_raw(block));
            return rc;
        }
        if let Err(rc) = install_constraints(io, (*block).plug.constraints()) {
            // tears the PCM down through the close callback, which frees the block
            snd_pcm_ioplug_delete(io);
            return rc;
        }
        *pcmp = (*io).pcm;
    }
    0
}

/// alsa-lib marks every plugin symbol with a versioned companion symbol.
#[unsafe(no_mangle)]
pub static __snd_pcm_none_open_dlsym_pcm_001: c_char = 0;

/// `pcm.!default { type none }` entry point.
///
/// # Safety
/// Called by alsa-lib with valid config pointers and a writable `pcmp`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _snd_pcm_none_open(
    pcmp: *mut *mut snd_pcm_t,
    name: *const c_char,
    _root: *mut snd_config_t,
    conf: *mut snd_config_t,
    stream: c_int,
    mode: c_int,
) -> c_int {
    let node = unsafe { config_node(conf) };
    let config = match PcmConfig::from_node(&node) {
        Ok(config) => config,
        Err(e) => return report_open_error(c"_snd_pcm_none_open", &e),
    };
    init_logging(config.debug);
    let session = match session() {
        Ok(session) => session,
        Err(e) => return report_open_error(c"_snd_pcm_none_open", e),
    };

    let direction = if stream == SND_PCM_STREAM_PLAYBACK {
        Direction::Playback
    } else {
        Direction::Capture
    };
    let pcm = match NullPcm::open(direction, config, session) {
        Ok(pcm) => pcm,
        Err(e) => return report_open_error(c"_snd_pcm_none_open", &e),
    };
    unsafe { create(pcm, name, stream, mode, pcmp) }
}
