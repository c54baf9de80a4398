//! Per-category suppression of repeated states.
//!
//! Each category owns an independent map from device id to the last raw state
//! handed to its handler. Check-and-update runs under the map entry's lock, so
//! two identical notifications racing for the same device never both pass,
//! while unrelated devices only contend when they share a shard.

use super::category::EventCategory;
use super::state::RawState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use strum::EnumCount;

/// Last delivered raw state per device for one category.
#[derive(Debug, Default)]
pub struct StateDebouncer {
    records: DashMap<String, RawState>,
}

impl StateDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when `state` differs from the stored record, or no record
    /// exists yet, and stores `state` in that case.
    pub fn should_dispatch(&self, device_id: &str, state: &RawState) -> bool {
        match self.records.entry(device_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get() == state {
                    false
                } else {
                    entry.insert(state.clone());
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(state.clone());
                true
            }
        }
    }

    pub fn last_state(&self, device_id: &str) -> Option<RawState> {
        self.records.get(device_id).map(|record| record.value().clone())
    }

    pub fn clear(&self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One debouncer per category, indexed by [`EventCategory::index`].
#[derive(Debug)]
pub struct DebounceTable {
    debouncers: [StateDebouncer; EventCategory::COUNT],
}

impl DebounceTable {
    pub fn new() -> Self {
        Self {
            debouncers: std::array::from_fn(|_| StateDebouncer::new()),
        }
    }

    pub fn get(&self, category: EventCategory) -> &StateDebouncer {
        &self.debouncers[category.index()]
    }

    /// Drop every record of every category.
    pub fn clear(&self) {
        self.debouncers.iter().for_each(StateDebouncer::clear);
    }
}

impl Default for DebounceTable {
    fn default() -> Self {
        Self::new()
    }
}
