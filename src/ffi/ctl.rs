//! `snd_ctl_ext` adapter for any [`CtlExt`] implementor.

use std::ffi::{CStr, CString, c_char, c_int, c_long, c_uint, c_ulong, c_ushort, c_void};

use alsa::ctl::ElemType;

use super::{config_node, report_open_error, session, snd_config_t};
use crate::ctl::{CtlExt, ElemKey};
use crate::error::Error;

const SND_CTL_EXT_VERSION: c_uint = 0x010001;
const SND_CTL_EXT_KEY_NOT_FOUND: c_ulong = !0;
const SND_CTL_EXT_ACCESS_READ: c_uint = 1 << 0;
const SND_CTL_EXT_ACCESS_WRITE: c_uint = 1 << 1;
const SND_CTL_ELEM_IFACE_MIXER: c_int = 2;
const SND_CTL_ELEM_TYPE_BOOLEAN: c_int = 1;
const SND_CTL_ELEM_TYPE_INTEGER: c_int = 2;

#[repr(C)]
pub struct snd_ctl_t {
    _private: [u8; 0],
}

#[repr(C)]
struct snd_ctl_elem_id_t {
    _private: [u8; 0],
}

/// Mirror of alsa-lib's `snd_ctl_ext_t`; only some fields are read here.
#[repr(C)]
#[allow(dead_code)]
struct snd_ctl_ext_t {
    version: c_uint,
    card_idx: c_int,
    id: [c_char; 16],
    driver: [c_char; 16],
    name: [c_char; 32],
    longname: [c_char; 80],
    mixername: [c_char; 80],
    poll_fd: c_int,
    callback: *const snd_ctl_ext_callback_t,
    private_data: *mut c_void,
    handle: *mut snd_ctl_t,
    nonblock: c_int,
    subscribed: c_int,
    /// `tlv` union, unused.
    tlv: *const c_void,
}

type Ext = *mut snd_ctl_ext_t;
type Unused = Option<unsafe extern "C" fn()>;

#[repr(C)]
struct snd_ctl_ext_callback_t {
    close: Option<unsafe extern "C" fn(Ext)>,
    elem_count: Option<unsafe extern "C" fn(Ext) -> c_int>,
    elem_list: Option<unsafe extern "C" fn(Ext, c_uint, *mut snd_ctl_elem_id_t) -> c_int>,
    find_elem: Option<unsafe extern "C" fn(Ext, *const snd_ctl_elem_id_t) -> c_ulong>,
    free_key: Unused,
    get_attribute:
        Option<unsafe extern "C" fn(Ext, c_ulong, *mut c_int, *mut c_uint, *mut c_uint) -> c_int>,
    get_integer_info:
        Option<unsafe extern "C" fn(Ext, c_ulong, *mut c_long, *mut c_long, *mut c_long) -> c_int>,
    get_integer64_info: Unused,
    get_enumerated_info: Unused,
    get_enumerated_name: Unused,
    read_integer: Option<unsafe extern "C" fn(Ext, c_ulong, *mut c_long) -> c_int>,
    read_integer64: Unused,
    read_enumerated: Unused,
    read_bytes: Unused,
    read_iec958: Unused,
    write_integer: Option<unsafe extern "C" fn(Ext, c_ulong, *mut c_long) -> c_int>,
    write_integer64: Unused,
    write_enumerated: Unused,
    write_bytes: Unused,
    write_iec958: Unused,
    subscribe_events: Option<unsafe extern "C" fn(Ext, c_int)>,
    read_event: Option<unsafe extern "C" fn(Ext, *mut snd_ctl_elem_id_t, *mut c_uint) -> c_int>,
    poll_descriptors_count: Unused,
    poll_descriptors: Unused,
    poll_revents:
        Option<unsafe extern "C" fn(Ext, *mut libc::pollfd, c_uint, *mut c_ushort) -> c_int>,
}

unsafe extern "C" {
    fn snd_ctl_ext_create(ext: Ext, name: *const c_char, mode: c_int) -> c_int;
    fn snd_ctl_elem_id_set_interface(id: *mut snd_ctl_elem_id_t, iface: c_int);
    fn snd_ctl_elem_id_set_name(id: *mut snd_ctl_elem_id_t, name: *const c_char);
    fn snd_ctl_elem_id_get_numid(id: *const snd_ctl_elem_id_t) -> c_uint;
    fn snd_ctl_elem_id_get_name(id: *const snd_ctl_elem_id_t) -> *const c_char;
}

#[repr(C)]
struct Plugin<T> {
    ext: snd_ctl_ext_t,
    callbacks: snd_ctl_ext_callback_t,
    ctl: T,
}

unsafe fn ctl<'a, T: CtlExt>(ext: Ext) -> &'a mut T {
    unsafe { &mut (*(*ext).private_data.cast::<Plugin<T>>()).ctl }
}

fn key(raw: c_ulong) -> ElemKey {
    ElemKey::from(raw)
}

/// Copy `src` into a fixed C string field, truncating and NUL-terminating.
fn fill(dst: &mut [c_char], src: &str) {
    let n = src.len().min(dst.len().saturating_sub(1));
    for (d, s) in dst.iter_mut().zip(&src.as_bytes()[..n]) {
        *d = *s as c_char;
    }
    dst[n..].fill(0);
}

unsafe extern "C" fn close<T: CtlExt>(ext: Ext) {
    let block = unsafe { (*ext).private_data.cast::<Plugin<T>>() };
    drop(unsafe { Box::from_raw(block) });
}

unsafe extern "C" fn elem_count<T: CtlExt>(ext: Ext) -> c_int {
    unsafe { ctl::<T>(ext) }.elem_count() as c_int
}

unsafe extern "C" fn elem_list<T: CtlExt>(
    ext: Ext,
    offset: c_uint,
    id: *mut snd_ctl_elem_id_t,
) -> c_int {
    let name = match unsafe { ctl::<T>(ext) }.elem_list(offset as usize) {
        Ok(name) => name,
        Err(e) => return e.errno(),
    };
    let Ok(name) = CString::new(name) else {
        return -libc::EINVAL;
    };
    unsafe {
        snd_ctl_elem_id_set_interface(id, SND_CTL_ELEM_IFACE_MIXER);
        snd_ctl_elem_id_set_name(id, name.as_ptr());
    }
    0
}

unsafe extern "C" fn find_elem<T: CtlExt>(ext: Ext, id: *const snd_ctl_elem_id_t) -> c_ulong {
    let (numid, name) = unsafe {
        let name = snd_ctl_elem_id_get_name(id);
        let name = if name.is_null() {
            String::new()
        } else {
            CStr::from_ptr(name).to_string_lossy().into_owned()
        };
        (snd_ctl_elem_id_get_numid(id), name)
    };
    match unsafe { ctl::<T>(ext) }.find_elem(numid, &name) {
        Some(key) => key as c_ulong,
        None => SND_CTL_EXT_KEY_NOT_FOUND,
    }
}

unsafe extern "C" fn get_attribute<T: CtlExt>(
    ext: Ext,
    k: c_ulong,
    ty: *mut c_int,
    acc: *mut c_uint,
    count: *mut c_uint,
) -> c_int {
    let attr = match unsafe { ctl::<T>(ext) }.get_attribute(key(k)) {
        Ok(attr) => attr,
        Err(e) => return e.errno(),
    };
    let raw_type = match attr.kind {
        ElemType::Boolean => SND_CTL_ELEM_TYPE_BOOLEAN,
        _ => SND_CTL_ELEM_TYPE_INTEGER,
    };
    let mut access = 0;
    if attr.readable {
        access |= SND_CTL_EXT_ACCESS_READ;
    }
    if attr.writable {
        access |= SND_CTL_EXT_ACCESS_WRITE;
    }
    unsafe {
        *ty = raw_type;
        *acc = access;
        *count = attr.count;
    }
    0
}

unsafe extern "C" fn get_integer_info<T: CtlExt>(
    ext: Ext,
    k: c_ulong,
    imin: *mut c_long,
    imax: *mut c_long,
    istep: *mut c_long,
) -> c_int {
    match unsafe { ctl::<T>(ext) }.get_integer_info(key(k)) {
        Ok(info) => {
            unsafe {
                *imin = info.min as c_long;
                *imax = info.max as c_long;
                *istep = info.step as c_long;
            }
            0
        }
        Err(e) => e.errno(),
    }
}

unsafe extern "C" fn read_integer<T: CtlExt>(ext: Ext, k: c_ulong, value: *mut c_long) -> c_int {
    match unsafe { ctl::<T>(ext) }.read_integer(key(k)) {
        Ok(v) => {
            unsafe { *value = v as c_long };
            0
        }
        Err(e) => e.errno(),
    }
}

/// Returns 1 when the value changed, as the ctl_ext contract asks.
unsafe extern "C" fn write_integer<T: CtlExt>(ext: Ext, k: c_ulong, value: *mut c_long) -> c_int {
    let v = i64::from(unsafe { *value });
    match unsafe { ctl::<T>(ext) }.write_integer(key(k), v) {
        Ok(changed) => c_int::from(changed),
        Err(e) => e.errno(),
    }
}

unsafe extern "C" fn subscribe_events<T: CtlExt>(ext: Ext, subscribe: c_int) {
    unsafe { ctl::<T>(ext) }.subscribe_events(subscribe != 0);
}

unsafe extern "C" fn read_event<T: CtlExt>(
    ext: Ext,
    _id: *mut snd_ctl_elem_id_t,
    _event_mask: *mut c_uint,
) -> c_int {
    match unsafe { ctl::<T>(ext) }.read_event() {
        // no element ever changes behind the host's back
        Ok(_) => Error::WouldBlock.errno(),
        Err(e) => e.errno(),
    }
}

unsafe extern "C" fn poll_revents<T: CtlExt>(
    ext: Ext,
    _pfds: *mut libc::pollfd,
    _nfds: c_uint,
    revents: *mut c_ushort,
) -> c_int {
    let flags = unsafe { ctl::<T>(ext) }.poll_revents();
    unsafe { *revents = flags.bits() as c_ushort };
    0
}

fn callbacks<T: CtlExt>() -> snd_ctl_ext_callback_t {
    snd_ctl_ext_callback_t {
        close: Some(close::<T>),
        elem_count: Some(elem_count::<T>),
        elem_list: Some(elem_list::<T>),
        find_elem: Some(find_elem::<T>),
        free_key: None,
        get_attribute: Some(get_attribute::<T>),
        get_integer_info: Some(get_integer_info::<T>),
        get_integer64_info: None,
        get_enumerated_info: None,
        get_enumerated_name: None,
        read_integer: Some(read_integer::<T>),
        read_integer64: None,
        read_enumerated: None,
        read_bytes: None,
        read_iec958: None,
        write_integer: Some(write_integer::<T>),
        write_integer64: None,
        write_enumerated: None,
        write_bytes: None,
        write_iec958: None,
        subscribe_events: Some(subscribe_events::<T>),
        read_event: Some(read_event::<T>),
        poll_descriptors_count: None,
        poll_descriptors: None,
        poll_revents: Some(poll_revents::<T>),
    }
}

unsafe fn create<T: CtlExt>(
    ctl: T,
    name: *const c_char,
    mode: c_int,
    handlep: *mut *mut snd_ctl_t,
) -> c_int {
    let block = Box::into_raw(Box::new(Plugin {
        // every field of the ctl_ext record is an integer, a pointer or a char array
        ext: unsafe { std::mem::zeroed::<snd_ctl_ext_t>() },
        callbacks: callbacks::<T>(),
        ctl,
    }));

    unsafe {
        let ext = &raw mut (*block).ext;
        (*ext).version = SND_CTL_EXT_VERSION;
        (*ext).card_idx = 0;
        fill(&mut (*ext).id, "none");
        fill(&mut (*ext).driver, "None plugin");
        fill(&mut (*ext).name, "None");
        fill(&mut (*ext).longname, "None");
        fill(&mut (*ext).mixername, "None");
        // no events, nothing to poll
        (*ext).poll_fd = -1;
        (*ext).callback = &raw const (*block).callbacks;
        (*ext).private_data = block.cast();

        let rc = snd_ctl_ext_create(ext, name, mode);
        if rc < 0 {
            drop(Box::from_raw(block));
            return rc;
        }
        *handlep = (*ext).handle;
    }
    0
}

/// alsa-lib marks every plugin symbol with a versioned companion symbol.
#[unsafe(no_mangle)]
pub static __snd_ctl_none_open_dlsym_ctl_001: c_char = 0;

/// `ctl.!default { type none }` entry point.
///
/// # Safety
/// Called by alsa-lib with valid config pointers and a writable `handlep`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _snd_ctl_none_open(
    handlep: *mut *mut snd_ctl_t,
    name: *const c_char,
    _root: *mut snd_config_t,
    conf: *mut snd_config_t,
    mode: c_int,
) -> c_int {
    let node = unsafe { config_node(conf) };
    let session = match session() {
        Ok(session) => session,
        Err(e) => return report_open_error(c"_snd_ctl_none_open", e),
    };
    let mixer = match session.open_ctl(&node) {
        Ok(mixer) => mixer,
        Err(e) => return report_open_error(c"_snd_ctl_none_open", &e),
    };
    unsafe { create(mixer, name, mode, handlep) }
}
