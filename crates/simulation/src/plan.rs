//! Acquisition plans: the scripts workers follow.

use hazard_registry::ResourceRegistry;
use hazard_types::{HazardError, ResourceId, ValueId, WorkerId};
use std::time::Duration;

/// Delay inserted inside a read-modify-write window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Think {
    /// Write back immediately.
    None,
    /// Always sleep this long.
    Fixed(Duration),
    /// Sleep a uniformly random duration in `[0, max)`, drawn from the worker's RNG.
    Jitter { max: Duration },
}

/// An unsynchronized operation on shared state.
///
/// Each op loads a snapshot, thinks, then stores a value computed from the
/// snapshot. Nothing prevents another worker from writing in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RacyOp {
    /// `local = value; think; value = local + 1`
    Increment { value: ValueId, think: Think },
    /// `snapshot = value; think; value = snapshot + amount`
    Deposit {
        value: ValueId,
        amount: i64,
        think: Think,
    },
    /// `snapshot = value; think; if snapshot >= amount { value = snapshot - amount }`
    ///
    /// The guard checks the stale snapshot, not the live value.
    Withdraw {
        value: ValueId,
        amount: i64,
        think: Think,
    },
    /// Record the worker as last writer of a stamp-table slot.
    Stamp { slot: usize },
}

impl RacyOp {
    /// The shared value this op writes, if any.
    pub fn value(&self) -> Option<ValueId> {
        match *self {
            RacyOp::Increment { value, .. }
            | RacyOp::Deposit { value, .. }
            | RacyOp::Withdraw { value, .. } => Some(value),
            RacyOp::Stamp { .. } => None,
        }
    }

    /// Result of applying this op atomically to `current`.
    pub fn apply_serialized(&self, current: i64) -> i64 {
        match *self {
            RacyOp::Increment { .. } => current + 1,
            RacyOp::Deposit { amount, .. } => current + amount,
            RacyOp::Withdraw { amount, .. } if current >= amount => current - amount,
            RacyOp::Withdraw { .. } | RacyOp::Stamp { .. } => current,
        }
    }
}

/// One scripted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Blocking acquisition of a registry resource.
    Acquire(ResourceId),
    /// Release a resource acquired earlier in the plan.
    Release(ResourceId),
    /// Sleep while holding whatever is currently held.
    Hold(Duration),
    /// Read-modify-write of a shared value, protected only by held resources.
    Update { value: ValueId, delta: i64 },
    /// Unsynchronized read-think-write on shared state.
    Racy(RacyOp),
    /// `op` applied `times` times in a row. Iterations below `stamp_first`
    /// also stamp the stamp-table slot equal to their iteration index.
    Repeat {
        op: RacyOp,
        times: usize,
        stamp_first: usize,
    },
}

/// Ordered steps a worker executes.
///
/// Resources still held when the steps run out are released in reverse
/// acquisition order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionPlan {
    steps: Vec<Step>,
    panic_at: Option<usize>,
}

impl AcquisitionPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(mut self, resource: ResourceId) -> Self {
        self.steps.push(Step::Acquire(resource));
        self
    }

    pub fn release(mut self, resource: ResourceId) -> Self {
        self.steps.push(Step::Release(resource));
        self
    }

    /// Hold for `duration`. Zero-length holds are dropped.
    pub fn hold(mut self, duration: Duration) -> Self {
        if !duration.is_zero() {
            self.steps.push(Step::Hold(duration));
        }
        self
    }

    pub fn update(mut self, value: ValueId, delta: i64) -> Self {
        self.steps.push(Step::Update { value, delta });
        self
    }

    pub fn racy(mut self, op: RacyOp) -> Self {
        self.steps.push(Step::Racy(op));
        self
    }

    /// Apply `op` `times` times without storing each iteration.
    pub fn repeat(self, op: RacyOp, times: usize) -> Self {
        self.repeat_stamped(op, times, 0)
    }

    /// Like [`repeat`](Self::repeat), stamping slot `i` after iteration `i`
    /// for every `i < stamp_first`.
    pub fn repeat_stamped(mut self, op: RacyOp, times: usize, stamp_first: usize) -> Self {
        if times > 0 {
            self.steps.push(Step::Repeat {
                op,
                times,
                stamp_first: stamp_first.min(times),
            });
        }
        self
    }

    /// Panic when reaching step `index` (or at the end if `index >= len`).
    ///
    /// Fault hook for exercising per-worker panic containment.
    pub fn panic_at(mut self, index: usize) -> Self {
        self.panic_at = Some(index);
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn panic_point(&self) -> Option<usize> {
        self.panic_at
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of actions the plan performs, counting every repetition.
    pub fn operation_count(&self) -> usize {
        self.steps
            .iter()
            .map(|s| match s {
                Step::Repeat { times, .. } => *times,
                _ => 1,
            })
            .sum()
    }

    /// Steps with repetitions unrolled lazily.
    fn unrolled(&self) -> impl Iterator<Item = Step> + '_ {
        self.steps.iter().flat_map(|step| {
            let (step, times) = match *step {
                Step::Repeat { op, times, .. } => (Step::Racy(op), times),
                other => (other, 1),
            };
            std::iter::repeat(step).take(times)
        })
    }

    /// Resources in the order the plan acquires them.
    pub fn acquisition_order(&self) -> Vec<ResourceId> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                Step::Acquire(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    /// Check the plan against a registry before any thread is spawned.
    ///
    /// Unknown resources/values, double acquisition and out-of-range stamp
    /// slots are configuration errors; releasing something the plan does not
    /// hold at that point is [`HazardError::NotOwner`].
    pub fn validate(
        &self,
        worker: WorkerId,
        registry: &ResourceRegistry,
    ) -> Result<(), HazardError> {
        let mut held: Vec<ResourceId> = Vec::new();

        for (i, step) in self.steps.iter().enumerate() {
            match *step {
                Step::Acquire(resource) => {
                    if !registry.contains(resource) {
                        return Err(HazardError::config(format!(
                            "{worker} step {i}: unknown resource {resource}"
                        )));
                    }
                    if held.contains(&resource) {
                        return Err(HazardError::config(format!(
                            "{worker} step {i}: {resource} acquired twice"
                        )));
                    }
                    held.push(resource);
                }
                Step::Release(resource) => {
                    let Some(pos) = held.iter().position(|r| *r == resource) else {
                        return Err(HazardError::NotOwner { resource, worker });
                    };
                    held.remove(pos);
                }
                Step::Hold(_) => {}
                Step::Update { value, .. } => check_value(worker, i, value, registry)?,
                Step::Racy(op) => check_racy(worker, i, op, registry)?,
                Step::Repeat { op, stamp_first, .. } => {
                    check_racy(worker, i, op, registry)?;
                    if stamp_first > registry.stamps().len() {
                        return Err(HazardError::config(format!(
                            "{worker} step {i}: stamps {stamp_first} slots, table has {}",
                            registry.stamps().len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_racy(
    worker: WorkerId,
    step: usize,
    op: RacyOp,
    registry: &ResourceRegistry,
) -> Result<(), HazardError> {
    if let Some(value) = op.value() {
        check_value(worker, step, value, registry)?;
    }
    if let RacyOp::Stamp { slot } = op {
        if slot >= registry.stamps().len() {
            return Err(HazardError::config(format!(
                "{worker} step {step}: stamp slot {slot} out of range"
            )));
        }
    }
    Ok(())
}

fn check_value(
    worker: WorkerId,
    step: usize,
    value: ValueId,
    registry: &ResourceRegistry,
) -> Result<(), HazardError> {
    if registry.contains_value(value) {
        Ok(())
    } else {
        Err(HazardError::config(format!(
            "{worker} step {step}: unknown shared value {value}"
        )))
    }
}

/// Final value of `value` if every plan's writes had been applied one at a
/// time: round-robin by operation index, workers in list order.
///
/// Repetitions count one operation per iteration and are unrolled on the
/// fly, so memory stays proportional to the number of plans.
pub fn serialized_replay(plans: &[AcquisitionPlan], value: ValueId, initial: i64) -> i64 {
    let mut cursors: Vec<_> = plans.iter().map(AcquisitionPlan::unrolled).collect();
    let mut current = initial;

    loop {
        let mut progressed = false;
        for cursor in &mut cursors {
            let Some(step) = cursor.next() else {
                continue;
            };
            progressed = true;
            match step {
                Step::Update { value: v, delta } if v == value => current += delta,
                Step::Racy(op) if op.value() == Some(value) => {
                    current = op.apply_serialized(current);
                }
                _ => {}
            }
        }
        if !progressed {
            return current;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (ResourceRegistry, ResourceId, ResourceId, ValueId) {
        let mut builder = ResourceRegistry::builder();
        let a = builder.resource("a");
        let b = builder.resource("b");
        let v = builder.value("counter", 0);
        builder.stamp_slots(2);
        (builder.build(), a, b, v)
    }

    #[test]
    fn test_valid_plan() {
        let (registry, a, b, v) = registry();
        let plan = AcquisitionPlan::new()
            .acquire(a)
            .update(v, 1)
            .hold(Duration::from_millis(1))
            .acquire(b)
            .release(b)
            .racy(RacyOp::Stamp { slot: 1 });

        assert!(plan.validate(WorkerId(0), &registry).is_ok());
        assert_eq!(plan.acquisition_order(), vec![a, b]);
        assert_eq!(plan.len(), 6);
    }

    #[test]
    fn test_zero_hold_is_dropped() {
        let plan = AcquisitionPlan::new().hold(Duration::ZERO);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_release_without_acquire_is_not_owner() {
        let (registry, a, b, _) = registry();
        let plan = AcquisitionPlan::new().acquire(a).release(b);

        assert_eq!(
            plan.validate(WorkerId(2), &registry),
            Err(HazardError::NotOwner {
                resource: b,
                worker: WorkerId(2)
            })
        );

        let twice = AcquisitionPlan::new().acquire(a).release(a).release(a);
        assert!(matches!(
            twice.validate(WorkerId(2), &registry),
            Err(HazardError::NotOwner { .. })
        ));
    }

    #[test]
    fn test_invalid_references_are_config_errors() {
        let (registry, a, _, _) = registry();

        let cases = [
            AcquisitionPlan::new().acquire(ResourceId(9)),
            AcquisitionPlan::new().acquire(a).acquire(a),
            AcquisitionPlan::new().update(ValueId(4), 1),
            AcquisitionPlan::new().racy(RacyOp::Increment {
                value: ValueId(4),
                think: Think::None,
            }),
            AcquisitionPlan::new().racy(RacyOp::Stamp { slot: 2 }),
        ];
        for plan in cases {
            assert!(
                matches!(
                    plan.validate(WorkerId(0), &registry),
                    Err(HazardError::Configuration(_))
                ),
                "plan {plan:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_withdraw_guard_in_serialized_form() {
        let op = RacyOp::Withdraw {
            value: ValueId(0),
            amount: 10,
            think: Think::None,
        };
        assert_eq!(op.apply_serialized(25), 15);
        assert_eq!(op.apply_serialized(10), 0);
        assert_eq!(op.apply_serialized(9), 9);
    }

    #[test]
    fn test_serialized_replay_round_robin() {
        let v = ValueId(0);
        let deposit = RacyOp::Deposit {
            value: v,
            amount: 10,
            think: Think::None,
        };
        let withdraw = RacyOp::Withdraw {
            value: v,
            amount: 10,
            think: Think::None,
        };
        let depositor = AcquisitionPlan::new().racy(deposit).racy(deposit);
        let withdrawer = AcquisitionPlan::new()
            .racy(withdraw)
            .racy(withdraw)
            .racy(withdraw);

        // From 0: +10, -10, +10, -10, then the last withdrawal is refused.
        let plans = [depositor.clone(), withdrawer.clone()];
        assert_eq!(serialized_replay(&plans, v, 0), 0);

        // Withdrawer first from 5: refused, 15, 5, 15, 5.
        assert_eq!(serialized_replay(&[withdrawer, depositor], v, 5), 5);
    }

    #[test]
    fn test_serialized_replay_counts_updates() {
        let v = ValueId(0);
        let inc = RacyOp::Increment {
            value: v,
            think: Think::None,
        };
        let plans: Vec<_> = (0..3)
            .map(|_| {
                (0..4).fold(AcquisitionPlan::new(), |p, i| {
                    p.racy(inc).racy(RacyOp::Stamp { slot: i })
                })
            })
            .collect();
        assert_eq!(serialized_replay(&plans, v, 0), 12);

        let locked = AcquisitionPlan::new()
            .acquire(ResourceId(0))
            .update(v, 10)
            .update(ValueId(1), 5);
        assert_eq!(serialized_replay(&[locked], v, 1), 11);
    }

    #[test]
    fn test_repeat_is_one_step_many_operations() {
        let (registry, _, _, v) = registry();
        let inc = RacyOp::Increment {
            value: v,
            think: Think::None,
        };
        let plan = AcquisitionPlan::new().repeat_stamped(inc, 1_000_000, 2);

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.operation_count(), 1_000_000);
        assert!(plan.validate(WorkerId(0), &registry).is_ok());
        assert!(AcquisitionPlan::new().repeat(inc, 0).is_empty());

        // Stamping more slots than the table holds is rejected.
        let too_many = AcquisitionPlan::new().repeat_stamped(inc, 10, 3);
        assert!(matches!(
            too_many.validate(WorkerId(0), &registry),
            Err(HazardError::Configuration(_))
        ));
    }

    #[test]
    fn test_serialized_replay_unrolls_repeats() {
        let v = ValueId(0);
        let deposit = RacyOp::Deposit {
            value: v,
            amount: 10,
            think: Think::None,
        };
        let withdraw = RacyOp::Withdraw {
            value: v,
            amount: 10,
            think: Think::None,
        };

        // Same interleaving as spelling every step out.
        let repeated = [
            AcquisitionPlan::new().repeat(deposit, 2),
            AcquisitionPlan::new().repeat(withdraw, 3),
        ];
        assert_eq!(serialized_replay(&repeated, v, 0), 0);

        let inc = RacyOp::Increment {
            value: v,
            think: Think::None,
        };
        let plans: Vec<_> = (0..4)
            .map(|_| AcquisitionPlan::new().repeat_stamped(inc, 250_000, 10))
            .collect();
        assert_eq!(serialized_replay(&plans, v, 0), 1_000_000);
    }
}
