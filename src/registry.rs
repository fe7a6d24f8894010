//! Registry of live streams, used to couple playback to capture.
//!
//! Every open stream is inserted at open and removed at close. When a
//! playback transfer completes, the registry is walked and every running
//! capture stream is advanced, which emulates a loopback device.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;

/// Stable identifier of a registered stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StreamId(pub u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stream the registry can advance on behalf of another stream.
pub trait Triggerable: Send + Sync {
    fn is_capture(&self) -> bool;

    /// Advance the stream's clock. Returns false when the stream is idle.
    fn trigger(&self) -> bool;
}

pub struct TriggerRegistry {
    next_id: AtomicU32,
    streams: Mutex<BTreeMap<StreamId, Weak<dyn Triggerable>>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            streams: Mutex::new(BTreeMap::new()),
        }
    }

    fn streams(&self) -> MutexGuard<'_, BTreeMap<StreamId, Weak<dyn Triggerable>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn allocate_id(&self) -> StreamId {
        StreamId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a stream. Returns false, leaving the registry untouched, if
    /// `id` is already present.
    pub fn insert(&self, id: StreamId, stream: &Arc<dyn Triggerable>) -> bool {
        let mut streams = self.streams();
        if streams.contains_key(&id) {
            return false;
        }
        streams.insert(id, Arc::downgrade(stream));
        true
    }

    pub fn remove(&self, id: StreamId) -> bool {
        self.streams().remove(&id).is_some()
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.streams().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.streams().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advance every running capture stream other than `source`.
    ///
    /// The member list is snapshotted first and the lock released before any
    /// stream is touched, so a stream closing mid-walk only drops out of the
    /// snapshot. Returns how many streams were advanced.
    pub fn trigger_captures(&self, source: StreamId) -> usize {
        let targets: Vec<Arc<dyn Triggerable>> = self
            .streams()
            .iter()
            .filter(|(id, _)| **id != source)
            .filter_map(|(_, weak)| weak.upgrade())
            .filter(|stream| stream.is_capture())
            .collect();

        targets.iter().filter(|stream| stream.trigger()).count()
    }
}

impl Default for TriggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerRegistry")
            .field("streams", &self.streams().keys().collect::<Vec<_>>())
            .finish()
    }
}
