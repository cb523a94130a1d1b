//! Plan-driven workers.

use crate::plan::{AcquisitionPlan, RacyOp, Step, Think};
use hazard_registry::ResourceRegistry;
use hazard_types::{HazardError, ResourceId, WorkerId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Counters a worker accumulates while executing its plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Steps executed, not counting the final implicit releases.
    pub steps: usize,
    pub acquisitions: usize,
    pub releases: usize,
    /// Unsynchronized read-think-write ops that committed a write.
    pub racy_writes: usize,
    /// Withdrawals whose stale snapshot failed the balance guard.
    pub refused_withdrawals: usize,
}

/// Where a worker ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum WorkerStatus {
    /// Spawned but not yet released by the start gate.
    Pending,
    /// Executing its plan, possibly blocked on a resource.
    Running,
    /// Ran the whole plan and released everything.
    Completed { stats: WorkerStats },
    /// A registry call failed mid-plan; holdings were abandoned.
    Failed {
        error: String,
        released: Vec<ResourceId>,
    },
    /// The worker panicked; holdings were abandoned.
    Panicked {
        message: String,
        released: Vec<ResourceId>,
    },
}

impl WorkerStatus {
    /// Whether the worker reached a terminal status.
    pub fn is_finished(&self) -> bool {
        !matches!(self, WorkerStatus::Pending | WorkerStatus::Running)
    }
}

/// A unit of concurrent execution following an [`AcquisitionPlan`].
#[derive(Debug)]
pub struct Worker {
    id: WorkerId,
    plan: AcquisitionPlan,
    rng: ChaCha8Rng,
    /// Resources currently held, in acquisition order.
    held: Vec<ResourceId>,
    stats: WorkerStats,
}

impl Worker {
    /// Create a worker. The RNG used for jittered think times is seeded from
    /// `seed` and the worker id, so each worker draws its own stream.
    pub fn new(id: WorkerId, plan: AcquisitionPlan, seed: u64) -> Self {
        Self {
            id,
            plan,
            rng: ChaCha8Rng::seed_from_u64(seed.wrapping_add(u64::from(id.0))),
            held: Vec::new(),
            stats: WorkerStats::default(),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn plan(&self) -> &AcquisitionPlan {
        &self.plan
    }

    /// Run the plan to the end against `registry`.
    ///
    /// Blocks for as long as acquisitions block. On error the worker stops
    /// where it is and leaves its holdings for the caller to abandon.
    pub fn execute(mut self, registry: &ResourceRegistry) -> Result<WorkerStats, HazardError> {
        let steps = self.plan.steps().to_vec();
        let panic_at = self.plan.panic_point();

        for (i, step) in steps.into_iter().enumerate() {
            if panic_at == Some(i) {
                panic!("scripted fault in {} at step {}", self.id, i);
            }
            self.step(step, registry)?;
            self.stats.steps += 1;
        }
        if panic_at.is_some_and(|i| i >= self.plan.len()) {
            panic!("scripted fault in {} after last step", self.id);
        }

        while let Some(resource) = self.held.pop() {
            registry.release(resource, self.id)?;
            self.stats.releases += 1;
        }
        debug!(worker = %self.id, steps = self.stats.steps, "Worker finished plan");
        Ok(self.stats)
    }

    fn step(&mut self, step: Step, registry: &ResourceRegistry) -> Result<(), HazardError> {
        match step {
            Step::Acquire(resource) => {
                trace!(worker = %self.id, %resource, "Trying to acquire");
                registry.acquire(resource, self.id, true)?;
                self.held.push(resource);
                self.stats.acquisitions += 1;
            }
            Step::Release(resource) => {
                registry.release(resource, self.id)?;
                self.held.retain(|r| *r != resource);
                self.stats.releases += 1;
            }
            Step::Hold(duration) => thread::sleep(duration),
            Step::Update { value, delta } => {
                let value = registry.values().get(value)?;
                value.store(value.load() + delta);
            }
            Step::Racy(op) => self.racy(op, registry)?,
            Step::Repeat {
                op,
                times,
                stamp_first,
            } => {
                for i in 0..times {
                    self.racy(op, registry)?;
                    if i < stamp_first {
                        registry.stamps().stamp(i, self.id);
                    }
                }
            }
        }
        Ok(())
    }

    fn racy(&mut self, op: RacyOp, registry: &ResourceRegistry) -> Result<(), HazardError> {
        match op {
            RacyOp::Increment { value, think } => {
                let value = registry.values().get(value)?;
                let local = value.load();
                self.think(think);
                value.store(local + 1);
                self.stats.racy_writes += 1;
            }
            RacyOp::Deposit {
                value,
                amount,
                think,
            } => {
                let value = registry.values().get(value)?;
                let snapshot = value.load();
                self.think(think);
                value.store(snapshot + amount);
                self.stats.racy_writes += 1;
            }
            RacyOp::Withdraw {
                value,
                amount,
                think,
            } => {
                let value = registry.values().get(value)?;
                let snapshot = value.load();
                self.think(think);
                // Guard on the snapshot, which may already be stale.
                if snapshot >= amount {
                    value.store(snapshot - amount);
                    self.stats.racy_writes += 1;
                } else {
                    self.stats.refused_withdrawals += 1;
                }
            }
            RacyOp::Stamp { slot } => registry.stamps().stamp(slot, self.id),
        }
        Ok(())
    }

    fn think(&mut self, think: Think) {
        match think {
            Think::None => {}
            Think::Fixed(duration) => thread::sleep(duration),
            Think::Jitter { max } => {
                let max_micros = u64::try_from(max.as_micros()).unwrap_or(u64::MAX);
                if max_micros > 0 {
                    thread::sleep(Duration::from_micros(self.rng.gen_range(0..max_micros)));
                }
            }
        }
    }
}
