//! Media lane: a smaller concurrency cap for expensive media inputs.
//!
//! Admission either takes a media slot or parks the item in a FIFO. The
//! caller frees its primary queue slot as soon as an item is parked, so text
//! files keep flowing. After each `release` the caller pulls at most one
//! parked item with `drain_next` and re-admits it to the primary queue under
//! its original metadata.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::debug;

use super::QueueMetadata;

/// Snapshot of the lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MediaStats {
    pub active: usize,
    /// Parked, waiting for a media slot.
    pub queued: usize,
}

/// One held media slot. Never reused, even across `clear`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

/// Outcome of [`MediaLane::admit_or_defer`].
#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    /// A media slot was taken; the caller must `release` it when done.
    Admitted(SlotId),
    /// The lane is full; the item was parked.
    Deferred,
}

/// A parked item handed back by `drain_next`.
#[derive(Debug)]
pub struct Parked<T> {
    pub item: T,
    pub metadata: QueueMetadata,
}

struct LaneState<T> {
    /// Held slot → key of the item holding it.
    holders: HashMap<SlotId, String>,
    next_slot: u64,
    parked: VecDeque<Parked<T>>,
}

/// Counting gate plus wait-list for media items.
pub struct MediaLane<T> {
    cap: usize,
    state: Mutex<LaneState<T>>,
}

impl<T> MediaLane<T> {
    /// Create a lane with `cap` slots. A zero cap is raised to one.
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            state: Mutex::new(LaneState {
                holders: HashMap::new(),
                next_slot: 0,
                parked: VecDeque::new(),
            }),
        }
    }

    /// Take a slot if one is free, otherwise park the item.
    pub fn admit_or_defer(&self, item: T, metadata: QueueMetadata) -> Admission {
        let mut state = self.state();
        if state.holders.len() < self.cap {
            let slot = SlotId(state.next_slot);
            state.next_slot += 1;
            state.holders.insert(slot, metadata.hash.clone());
            debug!(hash = %metadata.hash, active = state.holders.len(), "Media slot taken");
            Admission::Admitted(slot)
        } else {
            debug!(hash = %metadata.hash, parked = state.parked.len() + 1, "Media lane full, parking");
            state.parked.push_back(Parked { item, metadata });
            Admission::Deferred
        }
    }

    /// Free `slot`. Returns `false` if it was no longer held.
    pub fn release(&self, slot: SlotId) -> bool {
        self.state().holders.remove(&slot).is_some()
    }

    /// Free whatever slot `key` holds, for a run that was abandoned while
    /// still holding it.
    pub fn release_key(&self, key: &str) -> bool {
        let mut state = self.state();
        let Some(slot) = state
            .holders
            .iter()
            .find(|(_, holder)| holder.as_str() == key)
            .map(|(slot, _)| *slot)
        else {
            return false;
        };
        debug!(hash = %key, "Media slot freed for abandoned run");
        state.holders.remove(&slot);
        true
    }

    /// Pop the next parked item while a slot is free.
    ///
    /// The cap check and the pop happen under one lock, so concurrent callers
    /// never hand out the same item twice or more items than there are slots.
    pub fn drain_next(&self) -> Option<Parked<T>> {
        let mut state = self.state();
        if state.holders.len() < self.cap {
            state.parked.pop_front()
        } else {
            None
        }
    }

    pub fn stats(&self) -> MediaStats {
        let state = self.state();
        MediaStats {
            active: state.holders.len(),
            queued: state.parked.len(),
        }
    }

    /// Forget held slots and drop parked items.
    pub fn clear(&self) {
        let mut state = self.state();
        state.holders.clear();
        state.parked.clear();
    }

    fn state(&self) -> MutexGuard<'_, LaneState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
