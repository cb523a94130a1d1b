//! Shared mutable values without read-modify-write synchronization.
//!
//! Values are stored in atomics purely so that concurrent access is defined
//! behaviour. Callers only ever get a separate `load` and `store`; there is no
//! `fetch_add`, so a read-think-write sequence from two workers can (and
//! will) overwrite each other.

use hazard_types::{HazardError, ValueId, WorkerId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

/// A named integer mutated by workers during a run.
#[derive(Debug)]
pub struct SharedValue {
    name: String,
    initial: i64,
    cell: AtomicI64,
}

impl SharedValue {
    /// Create a value with a known starting point.
    pub fn new(name: impl Into<String>, initial: i64) -> Self {
        Self {
            name: name.into(),
            initial,
            cell: AtomicI64::new(initial),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial(&self) -> i64 {
        self.initial
    }

    /// Read the current value. No ordering with other workers is implied.
    pub fn load(&self) -> i64 {
        self.cell.load(Ordering::Relaxed)
    }

    /// Overwrite the current value, discarding whatever is there.
    pub fn store(&self, value: i64) {
        self.cell.store(value, Ordering::Relaxed);
    }
}

/// Point-in-time reading of a shared value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueReading {
    pub id: ValueId,
    pub name: String,
    pub initial: i64,
    pub value: i64,
}

/// All shared values of a run, addressed by [`ValueId`].
#[derive(Debug, Default)]
pub struct SharedValues {
    values: Vec<SharedValue>,
}

impl SharedValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new value and return its id.
    pub fn add(&mut self, name: impl Into<String>, initial: i64) -> ValueId {
        self.values.push(SharedValue::new(name, initial));
        ValueId(self.values.len() - 1)
    }

    /// Look up a value.
    pub fn get(&self, id: ValueId) -> Result<&SharedValue, HazardError> {
        self.values
            .get(id.index())
            .ok_or_else(|| HazardError::config(format!("unknown shared value {id}")))
    }

    pub fn contains(&self, id: ValueId) -> bool {
        id.index() < self.values.len()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Read every value.
    pub fn readings(&self) -> Vec<ValueReading> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| ValueReading {
                id: ValueId(i),
                name: v.name.clone(),
                initial: v.initial,
                value: v.load(),
            })
            .collect()
    }
}

const UNSTAMPED: u32 = u32::MAX;

/// Fixed table of slots recording the last worker that wrote each one.
///
/// Writes are plain stores with no coordination, so the final table shows
/// which worker won each slot.
#[derive(Debug)]
pub struct StampTable {
    slots: Vec<AtomicU32>,
}

impl StampTable {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| AtomicU32::new(UNSTAMPED)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Record `worker` as the last writer of `slot`. Out-of-range slots are ignored.
    pub fn stamp(&self, slot: usize, worker: WorkerId) {
        if let Some(cell) = self.slots.get(slot) {
            cell.store(worker.0, Ordering::Relaxed);
        }
    }

    /// Last writer of a slot, if any worker wrote it.
    pub fn owner(&self, slot: usize) -> Option<WorkerId> {
        match self.slots.get(slot)?.load(Ordering::Relaxed) {
            UNSTAMPED => None,
            id => Some(WorkerId(id)),
        }
    }

    /// Number of slots each worker ended up owning.
    pub fn owners(&self) -> BTreeMap<WorkerId, usize> {
        let mut counts = BTreeMap::new();
        for slot in 0..self.slots.len() {
            if let Some(worker) = self.owner(slot) {
                *counts.entry(worker).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_load_store() {
        let mut values = SharedValues::new();
        let counter = values.add("counter", 0);
        let balance = values.add("balance", 1000);

        let v = values.get(counter).unwrap();
        v.store(v.load() + 1);

        let readings = values.readings();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].value, 1);
        assert_eq!(readings[1].name, "balance");
        assert_eq!(readings[1].initial, 1000);
        assert_eq!(readings[1].value, 1000);
        assert!(values.contains(balance));
    }

    #[test]
    fn test_unknown_value_is_config_error() {
        let values = SharedValues::new();
        assert!(matches!(
            values.get(ValueId(3)),
            Err(HazardError::Configuration(_))
        ));
    }

    #[test]
    fn test_stamp_table_last_writer_wins() {
        let table = StampTable::new(4);
        table.stamp(0, WorkerId(1));
        table.stamp(0, WorkerId(2));
        table.stamp(1, WorkerId(2));
        table.stamp(9, WorkerId(3)); // ignored

        assert_eq!(table.owner(0), Some(WorkerId(2)));
        assert_eq!(table.owner(3), None);

        let owners = table.owners();
        assert_eq!(owners.get(&WorkerId(2)), Some(&2));
        assert_eq!(owners.get(&WorkerId(1)), None);
        assert_eq!(owners.get(&WorkerId(3)), None);
    }
}
