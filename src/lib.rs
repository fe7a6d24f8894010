//! ALSA "none" plugin: a null PCM device driven by a virtual clock, and a
//! mixer control stub.
//!
//! Build as a cdylib and install as `libasound_module_pcm_none.so` /
//! `libasound_module_ctl_none.so`; the same library serves both plugin types.

pub mod clock;
pub mod config;
pub mod ctl;
pub mod error;
pub mod ffi;
pub mod notifier;
pub mod pcm;
pub mod registry;
pub mod session;

pub use error::{Error, Result};
pub use session::Session;
