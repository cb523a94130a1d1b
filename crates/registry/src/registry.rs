//! Mutual-exclusion resources with observable ownership and wait state.

use crate::shared::{SharedValues, StampTable};
use crate::wait_for::WaitForGraph;
use hazard_types::{HazardError, ResourceId, ValueId, WorkerId};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// Per-resource bookkeeping, guarded by the registry lock.
#[derive(Debug, Default)]
struct ResourceSlot {
    /// Current holder, if any.
    holder: Option<WorkerId>,
    acquisitions: u64,
    releases: u64,
}

/// Holder count kept outside the registry lock.
///
/// A worker enters once `acquire` has returned the grant and leaves before
/// the resource is vacated. The count never looks at `holder`, so a grant
/// to two workers at once shows up as a peak of 2.
#[derive(Debug, Default)]
struct Occupancy {
    current: AtomicU32,
    peak: AtomicU32,
}

impl Occupancy {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        let _ = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn peak(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    slots: Vec<ResourceSlot>,
    /// worker -> resource it is blocked on
    waiting: BTreeMap<WorkerId, ResourceId>,
}

impl RegistryState {
    fn grant(&mut self, resource: ResourceId, worker: WorkerId) {
        let slot = &mut self.slots[resource.index()];
        slot.holder = Some(worker);
        slot.acquisitions += 1;
    }

    fn vacate(&mut self, resource: ResourceId) {
        let slot = &mut self.slots[resource.index()];
        slot.holder = None;
        slot.releases += 1;
    }
}

/// Named locks plus the shared values a scenario mutates.
///
/// A single condition variable is signalled on every release; blocked
/// acquirers re-check their resource and go back to sleep if it is still
/// taken. This is a genuine blocking wait: a worker whose resource is never
/// released stays asleep forever.
#[derive(Debug)]
pub struct ResourceRegistry {
    names: Vec<String>,
    state: Mutex<RegistryState>,
    released: Condvar,
    occupancy: Vec<Occupancy>,
    values: SharedValues,
    stamps: StampTable,
}

impl ResourceRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Number of resources.
    pub fn resource_count(&self) -> usize {
        self.names.len()
    }

    /// Whether `resource` exists.
    pub fn contains(&self, resource: ResourceId) -> bool {
        resource.index() < self.names.len()
    }

    /// Human-readable name of a resource.
    pub fn name(&self, resource: ResourceId) -> Option<&str> {
        self.names.get(resource.index()).map(String::as_str)
    }

    /// The shared values hosted by this registry.
    pub fn values(&self) -> &SharedValues {
        &self.values
    }

    /// The last-writer stamp table (may be empty).
    pub fn stamps(&self) -> &StampTable {
        &self.stamps
    }

    /// Whether `value` exists.
    pub fn contains_value(&self, value: ValueId) -> bool {
        self.values.contains(value)
    }

    fn check(&self, resource: ResourceId) -> Result<(), HazardError> {
        if self.contains(resource) {
            Ok(())
        } else {
            Err(HazardError::config(format!("unknown resource {resource}")))
        }
    }

    /// Acquire `resource` for `worker`.
    ///
    /// With `blocking` set, the calling thread sleeps until the resource is
    /// free. Without it, a held resource fails immediately with
    /// [`HazardError::ResourceUnavailable`]. Re-acquiring a resource the
    /// worker already holds is a configuration error: these locks are not
    /// reentrant.
    pub fn acquire(
        &self,
        resource: ResourceId,
        worker: WorkerId,
        blocking: bool,
    ) -> Result<(), HazardError> {
        self.check(resource)?;
        let mut state = self.state.lock();

        let current = state.slots[resource.index()].holder;
        match current {
            Some(holder) if holder == worker => {
                return Err(HazardError::config(format!(
                    "{worker} already holds {resource}"
                )));
            }
            Some(holder) if !blocking => {
                return Err(HazardError::ResourceUnavailable { resource, holder });
            }
            Some(holder) => {
                debug!(%worker, %resource, %holder, "Blocking on held resource");
                state.waiting.insert(worker, resource);
                while state.slots[resource.index()].holder.is_some() {
                    self.released.wait(&mut state);
                }
                state.waiting.remove(&worker);
            }
            None => {}
        }

        state.grant(resource, worker);
        drop(state);

        self.occupancy[resource.index()].enter();
        debug!(%worker, %resource, "Acquired resource");
        Ok(())
    }

    /// Release `resource`. Only its current holder may do so.
    pub fn release(&self, resource: ResourceId, worker: WorkerId) -> Result<(), HazardError> {
        self.check(resource)?;
        let mut state = self.state.lock();

        if state.slots[resource.index()].holder != Some(worker) {
            return Err(HazardError::NotOwner { resource, worker });
        }
        self.occupancy[resource.index()].leave();
        state.vacate(resource);
        drop(state);

        self.released.notify_all();
        debug!(%worker, %resource, "Released resource");
        Ok(())
    }

    /// Release everything `worker` holds and forget any wait it had pending.
    ///
    /// Used when a worker dies mid-plan so that the ownership table stays
    /// consistent. Returns the resources that were released.
    pub fn abandon(&self, worker: WorkerId) -> Vec<ResourceId> {
        let mut state = self.state.lock();
        state.waiting.remove(&worker);

        let held: Vec<ResourceId> = state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.holder == Some(worker))
            .map(|(i, _)| ResourceId(i))
            .collect();
        for &resource in &held {
            self.occupancy[resource.index()].leave();
            state.vacate(resource);
        }
        drop(state);

        if !held.is_empty() {
            self.released.notify_all();
        }
        held
    }

    /// Consistent view of ownership and pending waits.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.lock();
        RegistrySnapshot {
            holders: state.slots.iter().map(|slot| slot.holder).collect(),
            waiting: state.waiting.clone(),
        }
    }

    /// Per-resource usage counters.
    pub fn audit(&self) -> Vec<ResourceAudit> {
        let state = self.state.lock();
        state
            .slots
            .iter()
            .enumerate()
            .map(|(i, slot)| ResourceAudit {
                resource: ResourceId(i),
                name: self.names[i].clone(),
                acquisitions: slot.acquisitions,
                releases: slot.releases,
                peak_holders: self.occupancy[i].peak(),
            })
            .collect()
    }
}

/// Builder for [`ResourceRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    names: Vec<String>,
    values: SharedValues,
    stamp_slots: usize,
}

impl RegistryBuilder {
    /// Add a resource and return its id.
    pub fn resource(&mut self, name: impl Into<String>) -> ResourceId {
        self.names.push(name.into());
        ResourceId(self.names.len() - 1)
    }

    /// Add a shared value and return its id.
    pub fn value(&mut self, name: impl Into<String>, initial: i64) -> ValueId {
        self.values.add(name, initial)
    }

    /// Size the last-writer stamp table.
    pub fn stamp_slots(&mut self, slots: usize) -> &mut Self {
        self.stamp_slots = slots;
        self
    }

    pub fn build(self) -> ResourceRegistry {
        let slots = self.names.iter().map(|_| ResourceSlot::default()).collect();
        let occupancy = self.names.iter().map(|_| Occupancy::default()).collect();
        ResourceRegistry {
            names: self.names,
            state: Mutex::new(RegistryState {
                slots,
                waiting: BTreeMap::new(),
            }),
            released: Condvar::new(),
            occupancy,
            values: self.values,
            stamps: StampTable::new(self.stamp_slots),
        }
    }
}

/// Ownership and wait state captured atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    /// Holder of each resource, indexed by resource id.
    pub holders: Vec<Option<WorkerId>>,
    /// Blocked workers and the resource each waits on.
    pub waiting: BTreeMap<WorkerId, ResourceId>,
}

impl RegistrySnapshot {
    pub fn holder_of(&self, resource: ResourceId) -> Option<WorkerId> {
        self.holders.get(resource.index()).copied().flatten()
    }

    pub fn waiting_on(&self, worker: WorkerId) -> Option<ResourceId> {
        self.waiting.get(&worker).copied()
    }

    /// Resources held by `worker`, in id order.
    pub fn held_by(&self, worker: WorkerId) -> Vec<ResourceId> {
        self.holders
            .iter()
            .enumerate()
            .filter(|(_, h)| **h == Some(worker))
            .map(|(i, _)| ResourceId(i))
            .collect()
    }

    /// Build the wait-for graph: waiter -> holder of the awaited resource.
    pub fn wait_for_graph(&self) -> WaitForGraph {
        let mut graph = WaitForGraph::new();
        for (&waiter, &resource) in &self.waiting {
            if let Some(holder) = self.holder_of(resource) {
                graph.add(waiter, resource, holder);
            }
        }
        graph
    }
}

/// Usage counters for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceAudit {
    pub resource: ResourceId,
    pub name: String,
    pub acquisitions: u64,
    pub releases: u64,
    /// Most simultaneous holders ever seen. Anything above 1 is a registry bug.
    pub peak_holders: u32,
}
