//! Latest merged reading per device.
//!
//! The engine is the only writer. Consumers get cheap [`Arc`] snapshots:
//! an entry is never mutated in place, only replaced by a newly merged
//! reading, so a snapshot stays consistent however long it is held.

use crate::device::DeviceId;
use crate::reading::{PartialReading, Reading};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

#[derive(Debug, Clone, Default)]
pub struct DataCache {
    entries: Arc<RwLock<BTreeMap<DeviceId, Arc<Reading>>>>,
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest reading for `id`, or `None` if nothing was decoded yet.
    pub fn get(&self, id: &DeviceId) -> Option<Arc<Reading>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// All readings, ordered by device id.
    pub fn snapshot(&self) -> Vec<(DeviceId, Arc<Reading>)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, reading)| (id.clone(), Arc::clone(reading)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge `update` into the entry for `id`, stamped now.
    pub(crate) fn merge(&self, id: &DeviceId, update: &PartialReading) -> Arc<Reading> {
        self.merge_at(id, update, SystemTime::now())
    }

    pub(crate) fn merge_at(
        &self,
        id: &DeviceId,
        update: &PartialReading,
        at: SystemTime,
    ) -> Arc<Reading> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let merged = Arc::new(Reading::merge(entries.get(id).map(Arc::as_ref), update, at));
        entries.insert(id.clone(), Arc::clone(&merged));
        merged
    }

    pub(crate) fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
