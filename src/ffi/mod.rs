//! Host adapter: the exported plugin entry points and the callback tables
//! that forward into [`crate::pcm`] and [`crate::ctl`].
//!
//! This is the only place that owns process-wide state. alsa-lib loads the
//! plugin once per process and calls the open entry points for every device,
//! so every stream opened here shares one [`Session`].

#![allow(non_camel_case_types, non_upper_case_globals)]

use std::ffi::{CStr, CString, c_char, c_double, c_int, c_long, c_longlong};
use std::ptr;

use once_cell::sync::Lazy;

use crate::config::{ConfigNode, ConfigValue, hook_load_if_running};
use crate::error::{Error, Result};
use crate::session::Session;

mod ctl;
mod pcm;

pub use ctl::{__snd_ctl_none_open_dlsym_ctl_001, _snd_ctl_none_open, snd_ctl_t};
pub use pcm::{__snd_pcm_none_open_dlsym_pcm_001, _snd_pcm_none_open, snd_pcm_t};

/// Opaque alsa-lib configuration node.
#[repr(C)]
pub struct snd_config_t {
    _private: [u8; 0],
}

#[repr(C)]
struct snd_config_iterator {
    _private: [u8; 0],
}

type snd_config_iterator_t = *mut snd_config_iterator;

type snd_lib_error_handler_t = Option<
    unsafe extern "C" fn(
        file: *const c_char,
        line: c_int,
        function: *const c_char,
        err: c_int,
        fmt: *const c_char,
        ...
    ),
>;

// snd_config_type_t
const SND_CONFIG_TYPE_INTEGER: c_int = 0;
const SND_CONFIG_TYPE_INTEGER64: c_int = 1;
const SND_CONFIG_TYPE_REAL: c_int = 2;
const SND_CONFIG_TYPE_STRING: c_int = 3;
const SND_CONFIG_TYPE_COMPOUND: c_int = 1024;

unsafe extern "C" {
    fn snd_config_iterator_first(node: *const snd_config_t) -> snd_config_iterator_t;
    fn snd_config_iterator_next(iterator: snd_config_iterator_t) -> snd_config_iterator_t;
    fn snd_config_iterator_end(node: *const snd_config_t) -> snd_config_iterator_t;
    fn snd_config_iterator_entry(iterator: snd_config_iterator_t) -> *mut snd_config_t;
    fn snd_config_get_id(config: *const snd_config_t, value: *mut *const c_char) -> c_int;
    fn snd_config_get_type(config: *const snd_config_t) -> c_int;
    fn snd_config_get_integer(config: *const snd_config_t, value: *mut c_long) -> c_int;
    fn snd_config_get_integer64(config: *const snd_config_t, value: *mut c_longlong) -> c_int;
    fn snd_config_get_real(config: *const snd_config_t, value: *mut c_double) -> c_int;
    fn snd_config_get_string(config: *const snd_config_t, value: *mut *const c_char) -> c_int;

    /// The handler behind alsa-lib's `SNDERR`, replaceable by the application.
    static mut snd_lib_error: snd_lib_error_handler_t;
}

static SESSION: Lazy<Result<Session>> = Lazy::new(Session::try_new);

/// The process-wide session, or the error that kept it from being built.
pub(crate) fn session() -> std::result::Result<&'static Session, &'static Error> {
    Lazy::force(&SESSION).as_ref()
}

fn open_error_message(err: &Error) -> CString {
    CString::new(err.to_string().replace('\0', "")).unwrap_or_default()
}

/// Report a failed open through alsa-lib's error handler, as `SNDERR` does,
/// so it reaches the user whether or not a logger is installed. Returns the
/// negative errno for the entry point.
pub(crate) fn report_open_error(function: &CStr, err: &Error) -> c_int {
    log::error!("{}: {}", function.to_string_lossy(), err);
    let message = open_error_message(err);
    let handler = unsafe { snd_lib_error };
    if let Some(handler) = handler {
        unsafe {
            handler(
                c"alsa_none_rs".as_ptr(),
                line!() as c_int,
                function.as_ptr(),
                0,
                c"%s".as_ptr(),
                message.as_ptr(),
            );
        }
    }
    err.errno()
}

/// Install a stderr logger the first time a device is opened with `debug`.
pub(crate) fn init_logging(debug: bool) {
    if debug {
        let env = env_logger::Env::default().default_filter_or("debug");
        // another plugin or the application may already own the logger
        let _ = env_logger::Builder::from_env(env).try_init();
    }
}

unsafe fn c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

unsafe fn config_value(entry: *const snd_config_t) -> Option<ConfigValue> {
    unsafe {
        match snd_config_get_type(entry) {
            SND_CONFIG_TYPE_INTEGER => {
                let mut value: c_long = 0;
                (snd_config_get_integer(entry, &mut value) >= 0)
                    .then(|| ConfigValue::Integer(i64::from(value)))
            }
            SND_CONFIG_TYPE_INTEGER64 => {
                let mut value: c_longlong = 0;
                (snd_config_get_integer64(entry, &mut value) >= 0)
                    .then(|| ConfigValue::Integer(value))
            }
            SND_CONFIG_TYPE_REAL => {
                let mut value: c_double = 0.0;
                (snd_config_get_real(entry, &mut value) >= 0).then(|| ConfigValue::Real(value))
            }
            SND_CONFIG_TYPE_STRING => {
                let mut value: *const c_char = ptr::null();
                if snd_config_get_string(entry, &mut value) < 0 {
                    return None;
                }
                c_str(value).map(ConfigValue::String)
            }
            SND_CONFIG_TYPE_COMPOUND => Some(ConfigValue::Compound(config_node(entry))),
            // pointers only appear in runtime-generated trees
            _ => None,
        }
    }
}

/// Copy an alsa-lib compound into an owned [`ConfigNode`]. Entries without an
/// id are skipped, as `snd_config_for_each` users do.
pub(crate) unsafe fn config_node(conf: *const snd_config_t) -> ConfigNode {
    let mut node = ConfigNode::new();
    if conf.is_null() {
        return node;
    }
    unsafe {
        let end = snd_config_iterator_end(conf);
        let mut it = snd_config_iterator_first(conf);
        while it != end {
            let entry = snd_config_iterator_entry(it);
            it = snd_config_iterator_next(it);

            let mut id: *const c_char = ptr::null();
            if snd_config_get_id(entry, &mut id) < 0 {
                continue;
            }
            let Some(id) = c_str(id) else { continue };
            // keep the key even when the value is unreadable so unknown keys still fail
            let value = config_value(entry).unwrap_or(ConfigValue::String(String::new()));
            node.push(id, value);
        }
    }
    node
}

/// alsa-lib marks every plugin symbol with a versioned companion symbol.
#[unsafe(no_mangle)]
pub static __conf_none_hook_load_if_running_dlsym_config_hook_001: c_char = 0;

/// `@hooks` handler: the none device contributes no configuration.
///
/// # Safety
/// Called by alsa-lib with valid config pointers and a writable `dst`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn conf_none_hook_load_if_running(
    _root: *mut snd_config_t,
    config: *mut snd_config_t,
    dst: *mut *mut snd_config_t,
    _private_data: *mut snd_config_t,
) -> c_int {
    let node = unsafe { config_node(config) };
    if hook_load_if_running(&node).is_some() {
        log::warn!("none hook produced configuration, ignoring it");
    }
    if !dst.is_null() {
        unsafe { *dst = ptr::null_mut() };
    }
    0
}
