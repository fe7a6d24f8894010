//! Readiness self-pipe.
//!
//! The host's I/O loop blocks on a descriptor rather than a timer, so the
//! simulator manufactures wakeups: a capture stream writes one token into the
//! pipe when enough virtual frames have accumulated and drains it again once
//! the host has read. Playback polls the write end, which is always writable;
//! readiness for playback is decided in `poll_revents` alone.

use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use alsa::Direction;
use alsa::poll::Flags;

#[derive(Debug)]
pub struct ReadinessPipe {
    direction: Direction,
    /// End handed to the host: read end for capture, write end for playback.
    poll_end: File,
    other_end: File,
    /// Tokens written and not yet drained.
    outstanding: u32,
}

fn pipe_pair() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1; 2];
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    // pipe2 succeeded, both descriptors are fresh and owned by nobody else
    let pair = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    Ok(pair)
}

impl ReadinessPipe {
    pub fn new(direction: Direction) -> io::Result<Self> {
        let (read_end, write_end) = pipe_pair()?;
        let (poll_end, other_end) = match direction {
            Direction::Playback => (write_end, read_end),
            Direction::Capture => (read_end, write_end),
        };
        Ok(Self {
            direction,
            poll_end: File::from(poll_end),
            other_end: File::from(other_end),
            outstanding: 0,
        })
    }

    pub fn poll_fd(&self) -> RawFd {
        self.poll_end.as_raw_fd()
    }

    pub fn poll_events(&self) -> Flags {
        match self.direction {
            Direction::Playback => Flags::OUT,
            Direction::Capture => Flags::IN,
        }
    }

    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    /// Signal readiness for `frames` newly available frames.
    ///
    /// Only capture pipes fire, at most one token is outstanding at a time,
    /// and `frames` must reach `threshold`. Returns whether a token was written.
    pub fn fire(&mut self, frames: u64, threshold: u64) -> bool {
        if self.direction == Direction::Playback || self.outstanding > 0 || frames < threshold {
            return false;
        }
        match self.other_end.write(&[0u8]) {
            Ok(1) => {
                self.outstanding += 1;
                true
            }
            Ok(_) => false,
            Err(e) => {
                log::warn!("readiness pipe write failed: {}", e);
                false
            }
        }
    }

    /// Drain every outstanding token. Returns how many were drained.
    pub fn flush(&mut self) -> u32 {
        if self.direction == Direction::Playback {
            return 0;
        }
        let mut drained = 0;
        let mut byte = [0u8; 1];
        while self.outstanding > 0 {
            match self.poll_end.read(&mut byte) {
                Ok(1) => drained += 1,
                Ok(_) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    if e.kind() != ErrorKind::WouldBlock {
                        log::warn!("readiness pipe read failed: {}", e);
                    }
                    break;
                }
            }
            self.outstanding -= 1;
        }
        self.outstanding = 0;
        drained
    }
}
