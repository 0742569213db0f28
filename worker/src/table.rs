//! Command table and request queue.
//!
//! The table owns the queue so every removal touches both. Queued entries
//! are eligible for backpressure eviction; parked entries (the worker sent a
//! non-terminal answer and will answer again) are exempt until a newer
//! request of the same kind supersedes them.

use std::collections::{HashMap, VecDeque};

use sidekick_types::{RequestId, RequestKind};

/// Maximum number of outstanding requests kept after an eviction pass.
pub const QUEUE_CEILING: usize = 10;

struct Slot<E> {
    kind: RequestKind,
    parked: bool,
    entry: E,
}

pub struct CommandTable<E> {
    entries: HashMap<RequestId, Slot<E>>,
    queue: VecDeque<RequestId>,
}

impl<E> Default for CommandTable<E> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            queue: VecDeque::new(),
        }
    }
}

impl<E> CommandTable<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `entry` and append its id to the queue.
    ///
    /// Ids are issued strictly increasing, so queue order is submission order.
    pub fn insert(&mut self, id: RequestId, kind: RequestKind, entry: E) {
        let previous = self.entries.insert(
            id,
            Slot {
                kind,
                parked: false,
                entry,
            },
        );
        debug_assert!(previous.is_none(), "request id {id} registered twice");
        self.queue.push_back(id);
    }

    #[must_use]
    pub fn get(&self, id: RequestId) -> Option<&E> {
        self.entries.get(&id).map(|slot| &slot.entry)
    }

    #[must_use]
    pub fn kind_of(&self, id: RequestId) -> Option<RequestKind> {
        self.entries.get(&id).map(|slot| slot.kind)
    }

    /// Remove `id` from both the table and the queue.
    pub fn remove(&mut self, id: RequestId) -> Option<E> {
        let slot = self.entries.remove(&id)?;
        if !slot.parked
            && let Some(index) = self.queue.iter().position(|queued| *queued == id)
        {
            self.queue.remove(index);
        }
        Some(slot.entry)
    }

    pub fn for_each(&self, mut f: impl FnMut(RequestId, RequestKind, &E)) {
        for (id, slot) in &self.entries {
            f(*id, slot.kind, &slot.entry);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn parked_len(&self) -> usize {
        self.entries.values().filter(|slot| slot.parked).count()
    }

    /// Evict the oldest queued entries until at most `ceiling` remain.
    ///
    /// Parked entries are never evicted here. The caller resolves every
    /// returned entry with no result.
    pub fn evict_overflow(&mut self, ceiling: usize) -> Vec<(RequestId, E)> {
        let mut evicted = Vec::new();
        while self.entries.len() > ceiling {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            if let Some(slot) = self.entries.remove(&id) {
                evicted.push((id, slot.entry));
            }
        }
        evicted
    }

    /// Take `id` off the queue but keep it registered.
    ///
    /// Returns `false` when `id` is unknown.
    pub fn park(&mut self, id: RequestId) -> bool {
        let Some(slot) = self.entries.get_mut(&id) else {
            return false;
        };
        if !slot.parked {
            slot.parked = true;
            if let Some(index) = self.queue.iter().position(|queued| *queued == id) {
                self.queue.remove(index);
            }
        }
        true
    }

    /// Release every parked entry of `kind`, oldest first.
    pub fn supersede_parked(&mut self, kind: RequestKind) -> Vec<(RequestId, E)> {
        let mut ids: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.parked && slot.kind == kind)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|slot| (id, slot.entry)))
            .collect()
    }

    /// Empty the table and the queue, returning entries in id order.
    pub fn drain(&mut self) -> Vec<(RequestId, E)> {
        self.queue.clear();
        let mut drained: Vec<(RequestId, E)> = self
            .entries
            .drain()
            .map(|(id, slot)| (id, slot.entry))
            .collect();
        drained.sort_unstable_by_key(|(id, _)| *id);
        drained
    }
}
