//! Error type shared by the PCM simulator, the mixer stub and the host adapter.

use alsa::pcm::Format;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A configuration key the plugin does not understand.
    #[error("invalid config key \"{0}\"")]
    UnknownKey(String),

    #[error("config key \"{key}\" has a non-numeric value \"{value}\"")]
    InvalidValue { key: String, value: String },

    #[error("config parse error: {0}")]
    Parse(String),

    /// Descriptor or memory acquisition failed while opening.
    #[error("resource allocation failed: {0}")]
    Resource(#[from] io::Error),

    /// The build-time constraint table could not be read back.
    #[error("constraint table unavailable: {0}")]
    Constraints(&'static str),

    #[error("unsupported sample format {0:?}")]
    UnsupportedFormat(Format),

    #[error("format {format:?} with {channels} channel(s) gives a zero-width frame")]
    ZeroFrameSize { format: Format, channels: u32 },

    #[error("{param} = {value} outside [{min}, {max}]")]
    OutOfRange {
        param: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("{op} not allowed in state {state}")]
    BadState { op: &'static str, state: &'static str },

    #[error("no such control element {0}")]
    NoSuchElement(u64),

    /// Nothing to report yet; the caller should poll again.
    #[error("operation would block")]
    WouldBlock,

    #[error("transfer buffer holds {got} bytes, {needed} needed")]
    BufferTooSmall { needed: usize, got: usize },
}

impl Error {
    /// Negative errno for the host's callback tables.
    pub fn errno(&self) -> i32 {
        let code = match self {
            Error::UnknownKey(_)
            | Error::InvalidValue { .. }
            | Error::Parse(_)
            | Error::Constraints(_)
            | Error::UnsupportedFormat(_)
            | Error::ZeroFrameSize { .. }
            | Error::OutOfRange { .. }
            | Error::NoSuchElement(_)
            | Error::BufferTooSmall { .. } => libc::EINVAL,
            Error::Resource(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::BadState { .. } => libc::EBADFD,
            Error::WouldBlock => libc::EAGAIN,
        };
        -code
    }
}
