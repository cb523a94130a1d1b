//! Unsynchronized shared-state race scenarios.

use super::{Expectation, Scenario, ScenarioKind};
use crate::config::SimulatorConfig;
use hazard_registry::ResourceRegistry;
use hazard_simulation::{serialized_replay, AcquisitionPlan, RacyOp, Think};
use hazard_types::{HazardError, WorkerId};

/// Upper bound on `threads * per_thread` for one race run.
pub const MAX_RACE_OPERATIONS: usize = 100_000_000;

fn check_counts(threads: usize, per_thread: usize, what: &str) -> Result<(), HazardError> {
    if threads == 0 {
        return Err(HazardError::config("race scenarios need at least one thread"));
    }
    if per_thread == 0 {
        return Err(HazardError::config(format!("{what} must be positive")));
    }
    match threads.checked_mul(per_thread) {
        Some(total) if total <= MAX_RACE_OPERATIONS => Ok(()),
        _ => Err(HazardError::config(format!(
            "{threads} threads x {per_thread} {what} exceeds {MAX_RACE_OPERATIONS} operations"
        ))),
    }
}

/// Lost-update counter.
///
/// Every worker runs `local = counter; think; counter = local + 1`
/// `iterations` times. The first `stamp_slots` iterations also stamp slot
/// `i` of the last-writer table with the worker id.
pub fn counter(
    threads: usize,
    iterations: usize,
    config: &SimulatorConfig,
) -> Result<Scenario, HazardError> {
    check_counts(threads, iterations, "iterations")?;

    let mut builder = ResourceRegistry::builder();
    let counter = builder.value("shared_counter", 0);
    builder.stamp_slots(config.stamp_slots);

    let think = if config.counter_think.is_zero() {
        Think::None
    } else {
        Think::Fixed(config.counter_think)
    };
    let increment = RacyOp::Increment {
        value: counter,
        think,
    };

    let plans: Vec<AcquisitionPlan> = (0..threads)
        .map(|_| {
            AcquisitionPlan::new().repeat_stamped(increment, iterations, config.stamp_slots)
        })
        .collect();

    let expected = serialized_replay(&plans, counter, 0);
    Ok(Scenario {
        kind: ScenarioKind::CounterRace {
            threads,
            iterations,
        },
        registry: builder.build(),
        plans,
        expectation: Expectation::FinalValue {
            value: counter,
            expected,
        },
        timeout: config.race_timeout,
        seed: config.seed,
    })
}

/// Bank balance with deposits and stale-guarded withdrawals.
///
/// Even workers deposit, odd workers withdraw only if the balance they read
/// covers the amount. The read, a random think, and the write are not
/// atomic, so both lost updates and decisions on stale data occur. The guard
/// itself reads the stale snapshot.
pub fn bank(
    threads: usize,
    transactions: usize,
    config: &SimulatorConfig,
) -> Result<Scenario, HazardError> {
    check_counts(threads, transactions, "transactions")?;
    if config.initial_balance < 0 || config.transaction_amount <= 0 {
        return Err(HazardError::config(
            "bank race needs a non-negative balance and a positive amount",
        ));
    }

    let mut builder = ResourceRegistry::builder();
    let balance = builder.value("account_balance", config.initial_balance);

    let think = if config.bank_think_max.is_zero() {
        Think::None
    } else {
        Think::Jitter {
            max: config.bank_think_max,
        }
    };

    let plans: Vec<AcquisitionPlan> = (0..threads)
        .map(|i| {
            let op = if WorkerId(i as u32).is_even() {
                RacyOp::Deposit {
                    value: balance,
                    amount: config.transaction_amount,
                    think,
                }
            } else {
                RacyOp::Withdraw {
                    value: balance,
                    amount: config.transaction_amount,
                    think,
                }
            };
            AcquisitionPlan::new().repeat(op, transactions)
        })
        .collect();

    let expected = serialized_replay(&plans, balance, config.initial_balance);
    Ok(Scenario {
        kind: ScenarioKind::BankRace {
            threads,
            transactions,
        },
        registry: builder.build(),
        plans,
        expectation: Expectation::FinalValue {
            value: balance,
            expected,
        },
        timeout: config.race_timeout,
        seed: config.seed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazard_simulation::Step;
    use hazard_types::ValueId;

    fn expected(scenario: &Scenario) -> i64 {
        match scenario.expectation {
            Expectation::FinalValue { expected, .. } => expected,
            Expectation::Termination => panic!("race scenarios compare values"),
        }
    }

    #[test]
    fn test_counter_expected_is_threads_times_iterations() {
        let scenario = counter(5, 1000, &SimulatorConfig::default()).unwrap();
        assert_eq!(expected(&scenario), 5000);
        assert_eq!(scenario.plans[0].len(), 1);
        assert_eq!(scenario.plans[0].operation_count(), 1000);
    }

    #[test]
    fn test_counter_stamps_only_first_slots() {
        let config = SimulatorConfig::default().with_stamp_slots(3);
        let scenario = counter(2, 10, &config).unwrap();
        assert_eq!(
            scenario.plans[0].steps(),
            &[Step::Repeat {
                op: RacyOp::Increment {
                    value: ValueId(0),
                    think: Think::Fixed(config.counter_think),
                },
                times: 10,
                stamp_first: 3,
            }]
        );
        assert_eq!(scenario.registry.stamps().len(), 3);
    }

    #[test]
    fn test_bank_expected_balance() {
        let config = SimulatorConfig::default();

        // 2 depositors and 2 withdrawers cancel out.
        let scenario = bank(4, 50, &config).unwrap();
        assert_eq!(expected(&scenario), 1000);

        // 2 depositors, 1 withdrawer: net +500.
        let scenario = bank(3, 50, &config).unwrap();
        assert_eq!(expected(&scenario), 1500);
    }

    #[test]
    fn test_bank_serialized_alternation() {
        let config = SimulatorConfig::default().with_initial_balance(30);
        // Worker 0 deposits and worker 1 withdraws, alternating.
        let scenario = bank(2, 5, &config).unwrap();
        assert_eq!(expected(&scenario), 30);

        // From zero, every withdrawal is covered by the deposit just before it.
        let scenario = bank(4, 10, &config.with_initial_balance(0)).unwrap();
        assert_eq!(expected(&scenario), 0);
    }

    #[test]
    fn test_zero_counts_rejected() {
        let config = SimulatorConfig::default();
        assert!(matches!(
            counter(0, 10, &config),
            Err(HazardError::Configuration(_))
        ));
        assert!(matches!(
            counter(2, 0, &config),
            Err(HazardError::Configuration(_))
        ));
        assert!(matches!(
            bank(0, 10, &config),
            Err(HazardError::Configuration(_))
        ));
    }

    #[test]
    fn test_large_counts_build_without_unrolling() {
        let config = SimulatorConfig::default();
        let scenario = counter(4, 1_000_000, &config).unwrap();
        assert_eq!(expected(&scenario), 4_000_000);
        assert!(scenario.plans.iter().all(|p| p.len() == 1));

        assert!(matches!(
            counter(8, 100_000_000, &config),
            Err(HazardError::Configuration(_))
        ));
        assert!(matches!(
            bank(usize::MAX, 2, &config),
            Err(HazardError::Configuration(_))
        ));
    }
}
