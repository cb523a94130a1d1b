//! Lock-ordering deadlock scenarios.

use super::{Expectation, Scenario, ScenarioKind};
use crate::config::SimulatorConfig;
use hazard_registry::ResourceRegistry;
use hazard_simulation::AcquisitionPlan;
use hazard_types::{HazardError, ResourceId};

fn check_hold(config: &SimulatorConfig) -> Result<(), HazardError> {
    if config.hold.is_zero() {
        return Err(HazardError::config(
            "deadlock scenarios need a positive hold time",
        ));
    }
    Ok(())
}

/// Two workers taking two resources in opposite order.
///
/// Worker 0: `lock R1, value_a += 1, hold, lock R2, value_b += 1`.
/// Worker 1: `lock R2, value_b += 10, hold, lock R1, value_a += 10`.
///
/// Once both have their first resource, each blocks on the one the other
/// holds and neither ever releases.
pub fn simple(config: &SimulatorConfig) -> Result<Scenario, HazardError> {
    check_hold(config)?;

    let mut builder = ResourceRegistry::builder();
    let r1 = builder.resource("mutex_a");
    let r2 = builder.resource("mutex_b");
    let value_a = builder.value("resource_a", 0);
    let value_b = builder.value("resource_b", 0);

    let plans = vec![
        AcquisitionPlan::new()
            .acquire(r1)
            .update(value_a, 1)
            .hold(config.hold)
            .acquire(r2)
            .update(value_b, 1),
        AcquisitionPlan::new()
            .acquire(r2)
            .update(value_b, 10)
            .hold(config.hold)
            .acquire(r1)
            .update(value_a, 10),
    ];

    Ok(Scenario {
        kind: ScenarioKind::SimpleDeadlock,
        registry: builder.build(),
        plans,
        expectation: Expectation::Termination,
        timeout: config.deadlock_timeout,
        seed: config.seed,
    })
}

/// Resources worker `worker` of `count` acquires in the circular scenario:
/// `i, (i+2) mod N, (i+3) mod N`, keeping only the first occurrence of each.
///
/// Duplicates appear for N < 4 (for N = 3, `i + 3` wraps back to `i`); a
/// second acquisition of a held lock is not allowed, so they are dropped.
pub fn circular_order(worker: usize, count: usize) -> Vec<ResourceId> {
    let mut order: Vec<ResourceId> = Vec::with_capacity(3);
    for offset in [0, 2, 3] {
        let resource = ResourceId::rotated(worker, offset, count);
        if !order.contains(&resource) {
            order.push(resource);
        }
    }
    order
}

/// N workers over N resources with a rotating acquisition window.
///
/// Every worker holds between acquisitions and then for twice as long in
/// its critical section. With everyone on its first resource, worker `i`
/// waits for worker `(i+2) mod N`, and that mapping always closes into at
/// least one cycle. Which cycle forms depends on scheduling.
pub fn circular(workers: usize, config: &SimulatorConfig) -> Result<Scenario, HazardError> {
    if workers == 0 {
        return Err(HazardError::config(
            "circular deadlock needs at least one worker",
        ));
    }
    check_hold(config)?;

    let mut builder = ResourceRegistry::builder();
    for i in 0..workers {
        builder.resource(format!("mutex_{i}"));
    }

    let plans = (0..workers)
        .map(|i| {
            let order = circular_order(i, workers);
            let last = order.len() - 1;
            order
                .into_iter()
                .enumerate()
                .fold(AcquisitionPlan::new(), |plan, (step, resource)| {
                    let hold = if step == last {
                        config.hold * 2
                    } else {
                        config.hold
                    };
                    plan.acquire(resource).hold(hold)
                })
        })
        .collect();

    Ok(Scenario {
        kind: ScenarioKind::CircularDeadlock { workers },
        registry: builder.build(),
        plans,
        expectation: Expectation::Termination,
        timeout: config.deadlock_timeout,
        seed: config.seed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazard_simulation::Step;
    use std::time::Duration;

    fn r(i: usize) -> ResourceId {
        ResourceId(i)
    }

    #[test]
    fn test_circular_order_rotation() {
        assert_eq!(circular_order(0, 5), vec![r(0), r(2), r(3)]);
        assert_eq!(circular_order(3, 5), vec![r(3), r(0), r(1)]);
        assert_eq!(circular_order(4, 5), vec![r(4), r(1), r(2)]);
    }

    #[test]
    fn test_circular_order_drops_duplicates_for_small_pools() {
        assert_eq!(circular_order(1, 3), vec![r(1), r(0)]);
        assert_eq!(circular_order(0, 2), vec![r(0), r(1)]);
        assert_eq!(circular_order(0, 1), vec![r(0)]);
    }

    #[test]
    fn test_simple_plans_are_inverted() {
        let scenario = simple(&SimulatorConfig::default()).unwrap();
        assert_eq!(scenario.plans.len(), 2);
        assert_eq!(scenario.plans[0].acquisition_order(), vec![r(0), r(1)]);
        assert_eq!(scenario.plans[1].acquisition_order(), vec![r(1), r(0)]);
        assert_eq!(scenario.expectation, Expectation::Termination);
        assert_eq!(scenario.registry.resource_count(), 2);
        assert_eq!(scenario.registry.values().len(), 2);
    }

    #[test]
    fn test_circular_critical_hold_is_doubled() {
        let config = SimulatorConfig::default().with_hold(Duration::from_millis(10));
        let scenario = circular(5, &config).unwrap();

        let steps = scenario.plans[0].steps();
        assert_eq!(
            steps,
            &[
                Step::Acquire(r(0)),
                Step::Hold(Duration::from_millis(10)),
                Step::Acquire(r(2)),
                Step::Hold(Duration::from_millis(10)),
                Step::Acquire(r(3)),
                Step::Hold(Duration::from_millis(20)),
            ]
        );
        assert_eq!(scenario.registry.resource_count(), 5);
    }

    #[test]
    fn test_invalid_configurations() {
        let config = SimulatorConfig::default();
        assert!(matches!(
            circular(0, &config),
            Err(HazardError::Configuration(_))
        ));

        let no_hold = SimulatorConfig::default().with_hold(Duration::ZERO);
        assert!(matches!(simple(&no_hold), Err(HazardError::Configuration(_))));
        assert!(matches!(
            circular(3, &no_hold),
            Err(HazardError::Configuration(_))
        ));
    }
}
