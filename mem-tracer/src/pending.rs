//! Deferred write tracker
//!
//! A write's destination must be read before the instruction executes,
//! but its value only exists afterwards. The address and size are parked
//! here between the two probes. Entries are keyed by traced thread, so
//! capture/emit pairs on different threads never clobber each other.

use crate::engine::ThreadId;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Address and size of a write whose value has not been emitted yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWrite {
    pub address: u64,
    pub size: usize,
}

/// Per-thread pending write slots
#[derive(Debug, Default)]
pub struct PendingWrites {
    slots: Mutex<HashMap<ThreadId, PendingWrite>>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a write for `thread`, replacing whatever it had parked before
    pub fn capture(&self, thread: ThreadId, address: u64, size: usize) {
        self.lock().insert(thread, PendingWrite { address, size });
    }

    /// Remove and return the write parked for `thread`
    pub fn take(&self, thread: ThreadId) -> Option<PendingWrite> {
        self.lock().remove(&thread)
    }

    /// Number of threads with a parked write
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ThreadId, PendingWrite>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
