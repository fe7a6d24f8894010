//! Mixer control stub: two volumes and two switches with no effect on anything.

use alsa::ctl::ElemType;
use alsa::poll::Flags;

use crate::error::{Error, Result};

/// Opaque element handle, the element's offset in [`ELEMENTS`].
pub type ElemKey = u64;

pub const VOLUME_MIN: i64 = 0;
pub const VOLUME_MAX: i64 = 127;

/// The fixed element set, in enumeration order. Numeric ids are offset + 1.
pub const ELEMENTS: [&str; 4] = [
    "Capture Volume",
    "Capture Switch",
    "Playback Volume",
    "Playback Switch",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attribute {
    pub kind: ElemType,
    pub readable: bool,
    pub writable: bool,
    /// Values per element.
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerInfo {
    pub min: i64,
    pub max: i64,
    pub step: i64,
}

/// The operation set the host's external control framework drives a
/// control handle through. [`crate::ffi`] adapts it to a callback table.
pub trait CtlExt: Send {
    fn elem_count(&self) -> usize;
    fn elem_list(&self, offset: usize) -> Result<&'static str>;
    /// Look an element up by numeric id, falling back to its name.
    fn find_elem(&self, numid: u32, name: &str) -> Option<ElemKey>;
    fn get_attribute(&self, key: ElemKey) -> Result<Attribute>;
    fn get_integer_info(&self, key: ElemKey) -> Result<IntegerInfo>;
    fn read_integer(&self, key: ElemKey) -> Result<i64>;
    /// Returns whether the value changed.
    fn write_integer(&mut self, key: ElemKey, value: i64) -> Result<bool>;
    fn subscribe_events(&mut self, subscribe: bool);
    fn read_event(&mut self) -> Result<ElemKey>;
    fn poll_revents(&self) -> Flags;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NullMixer {
    source_volume: i64,
    source_muted: bool,
    sink_volume: i64,
    sink_muted: bool,
    subscribed: bool,
}

fn is_switch(key: ElemKey) -> bool {
    key & 1 == 1
}

impl NullMixer {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_key(key: ElemKey) -> Result<()> {
        if key < ELEMENTS.len() as u64 {
            Ok(())
        } else {
            Err(Error::NoSuchElement(key))
        }
    }

    pub fn subscribed(&self) -> bool {
        self.subscribed
    }
}

impl CtlExt for NullMixer {
    fn elem_count(&self) -> usize {
        ELEMENTS.len()
    }

    fn elem_list(&self, offset: usize) -> Result<&'static str> {
        ELEMENTS
            .get(offset)
            .copied()
            .ok_or(Error::NoSuchElement(offset as u64))
    }

    fn find_elem(&self, numid: u32, name: &str) -> Option<ElemKey> {
        if numid > 0 && numid as usize <= ELEMENTS.len() {
            return Some(u64::from(numid) - 1);
        }
        ELEMENTS
            .iter()
            .position(|elem| *elem == name)
            .map(|offset| offset as ElemKey)
    }

    fn get_attribute(&self, key: ElemKey) -> Result<Attribute> {
        Self::check_key(key)?;
        Ok(Attribute {
            kind: if is_switch(key) {
                ElemType::Boolean
            } else {
                ElemType::Integer
            },
            readable: true,
            writable: true,
            count: 1,
        })
    }

    fn get_integer_info(&self, key: ElemKey) -> Result<IntegerInfo> {
        Self::check_key(key)?;
        Ok(IntegerInfo {
            min: VOLUME_MIN,
            max: VOLUME_MAX,
            step: 1,
        })
    }

    /// Switches read 1 when unmuted.
    fn read_integer(&self, key: ElemKey) -> Result<i64> {
        match key {
            0 => Ok(self.source_volume),
            1 => Ok(i64::from(!self.source_muted)),
            2 => Ok(self.sink_volume),
            3 => Ok(i64::from(!self.sink_muted)),
            _ => Err(Error::NoSuchElement(key)),
        }
    }

    /// Always reports a change, whether or not the value differed.
    fn write_integer(&mut self, key: ElemKey, value: i64) -> Result<bool> {
        Self::check_key(key)?;
        if !is_switch(key) && !(VOLUME_MIN..=VOLUME_MAX).contains(&value) {
            return Err(Error::OutOfRange {
                param: ELEMENTS[key as usize],
                value: value as u64,
                min: VOLUME_MIN as u64,
                max: VOLUME_MAX as u64,
            });
        }
        match key {
            0 => self.source_volume = value,
            1 => self.source_muted = value == 0,
            2 => self.sink_volume = value,
            _ => self.sink_muted = value == 0,
        }
        Ok(true)
    }

    fn subscribe_events(&mut self, subscribe: bool) {
        self.subscribed = subscribe;
    }

    fn read_event(&mut self) -> Result<ElemKey> {
        Err(Error::WouldBlock)
    }

    fn poll_revents(&self) -> Flags {
        Flags::empty()
    }
}
