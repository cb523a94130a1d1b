//! Hazard scenarios.
//!
//! A scenario bundles a registry layout, one acquisition plan per worker, a
//! watchdog budget and the outcome a correct (serialized) execution would
//! produce. Two families are provided:
//!
//! - [`deadlock`]: workers take resources in conflicting orders.
//! - [`race`]: workers hit shared values with unsynchronized
//!   read-think-write sequences.

pub mod deadlock;
pub mod race;

use crate::config::SimulatorConfig;
use crate::reporter::{Reporter, Verdict};
use hazard_registry::ResourceRegistry;
use hazard_simulation::{AcquisitionPlan, Runner};
use hazard_types::{HazardError, ValueId};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Ids of the single-shot fault demonstrations. They live outside the
/// simulator and are only recognised so they can be rejected clearly.
pub const EXTERNAL_FAULT_IDS: &[&str] = &[
    "buffer-overflow",
    "segfault",
    "stack-overflow",
    "core-dump",
    "memory-leak",
];

/// Which kind of hazard a scenario constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HazardFamily {
    Deadlock,
    Race,
}

/// A scenario selection with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    /// Two workers, two resources, opposite acquisition order.
    SimpleDeadlock,
    /// N workers over N resources with a rotating acquisition window.
    CircularDeadlock { workers: usize },
    /// Lost-update counter.
    CounterRace { threads: usize, iterations: usize },
    /// Deposits and stale-guarded withdrawals on one balance.
    BankRace { threads: usize, transactions: usize },
}

impl ScenarioKind {
    /// Stable identifier used on the command line.
    pub fn id(&self) -> &'static str {
        match self {
            ScenarioKind::SimpleDeadlock => "simple-deadlock",
            ScenarioKind::CircularDeadlock { .. } => "circular-deadlock",
            ScenarioKind::CounterRace { .. } => "counter-race",
            ScenarioKind::BankRace { .. } => "bank-race",
        }
    }

    pub fn family(&self) -> HazardFamily {
        match self {
            ScenarioKind::SimpleDeadlock | ScenarioKind::CircularDeadlock { .. } => {
                HazardFamily::Deadlock
            }
            ScenarioKind::CounterRace { .. } | ScenarioKind::BankRace { .. } => HazardFamily::Race,
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ScenarioKind::SimpleDeadlock => write!(f, "simple-deadlock"),
            ScenarioKind::CircularDeadlock { workers } => {
                write!(f, "circular-deadlock({workers})")
            }
            ScenarioKind::CounterRace {
                threads,
                iterations,
            } => write!(f, "counter-race({threads}, {iterations})"),
            ScenarioKind::BankRace {
                threads,
                transactions,
            } => write!(f, "bank-race({threads}, {transactions})"),
        }
    }
}

/// Parses `simple-deadlock`, `circular-deadlock[:N]`, `counter-race[:TxI]`
/// and `bank-race[:TxX]`. Omitted parameters take the classic defaults
/// (5 workers; 5 threads x 1000 increments; 4 threads x 50 transactions).
impl FromStr for ScenarioKind {
    type Err = HazardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let (id, args) = match s.split_once(':') {
            Some((id, args)) => (id, Some(args)),
            None => (s.as_str(), None),
        };

        if EXTERNAL_FAULT_IDS.contains(&id) {
            return Err(HazardError::config(format!(
                "`{id}` is an external fault injector, not a concurrency hazard"
            )));
        }

        match (id, args) {
            ("simple-deadlock", None) => Ok(ScenarioKind::SimpleDeadlock),
            ("circular-deadlock", None) => Ok(ScenarioKind::CircularDeadlock { workers: 5 }),
            ("circular-deadlock", Some(n)) => Ok(ScenarioKind::CircularDeadlock {
                workers: parse_count(n)?,
            }),
            ("counter-race", None) => Ok(ScenarioKind::CounterRace {
                threads: 5,
                iterations: 1000,
            }),
            ("counter-race", Some(args)) => {
                let (threads, iterations) = parse_pair(args)?;
                Ok(ScenarioKind::CounterRace {
                    threads,
                    iterations,
                })
            }
            ("bank-race", None) => Ok(ScenarioKind::BankRace {
                threads: 4,
                transactions: 50,
            }),
            ("bank-race", Some(args)) => {
                let (threads, transactions) = parse_pair(args)?;
                Ok(ScenarioKind::BankRace {
                    threads,
                    transactions,
                })
            }
            _ => Err(HazardError::config(format!("unknown scenario `{s}`"))),
        }
    }
}

fn parse_count(s: &str) -> Result<usize, HazardError> {
    s.trim()
        .parse()
        .map_err(|_| HazardError::config(format!("invalid count `{s}`")))
}

fn parse_pair(s: &str) -> Result<(usize, usize), HazardError> {
    let (a, b) = s
        .split_once('x')
        .ok_or_else(|| HazardError::config(format!("expected `<threads>x<count>`, got `{s}`")))?;
    Ok((parse_count(a)?, parse_count(b)?))
}

/// Id that runs the counter race and then the bank race with their defaults.
pub const ALL_RACES_ID: &str = "races";

/// Resolve a command-line id into the scenarios it selects.
///
/// Everything [`ScenarioKind`] parses selects one scenario; `races` selects
/// both race scenarios in order.
pub fn parse_selection(id: &str) -> Result<Vec<ScenarioKind>, HazardError> {
    if id.trim().eq_ignore_ascii_case(ALL_RACES_ID) {
        return Ok(vec![
            ScenarioKind::CounterRace {
                threads: 5,
                iterations: 1000,
            },
            ScenarioKind::BankRace {
                threads: 4,
                transactions: 50,
            },
        ]);
    }
    Ok(vec![id.parse()?])
}

/// What the reporter compares the run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Every worker should finish.
    Termination,
    /// `value` should end at `expected`.
    FinalValue { value: ValueId, expected: i64 },
}

/// A fully built scenario, ready to run once.
#[derive(Debug)]
pub struct Scenario {
    pub kind: ScenarioKind,
    pub registry: ResourceRegistry,
    pub plans: Vec<AcquisitionPlan>,
    pub expectation: Expectation,
    pub timeout: Duration,
    pub seed: u64,
}

impl Scenario {
    /// Build the scenario described by `kind`.
    pub fn build(kind: ScenarioKind, config: &SimulatorConfig) -> Result<Self, HazardError> {
        match kind {
            ScenarioKind::SimpleDeadlock => deadlock::simple(config),
            ScenarioKind::CircularDeadlock { workers } => deadlock::circular(workers, config),
            ScenarioKind::CounterRace {
                threads,
                iterations,
            } => race::counter(threads, iterations, config),
            ScenarioKind::BankRace {
                threads,
                transactions,
            } => race::bank(threads, transactions, config),
        }
    }

    pub fn family(&self) -> HazardFamily {
        self.kind.family()
    }

    pub fn worker_count(&self) -> usize {
        self.plans.len()
    }

    /// Execute the scenario and classify the result.
    ///
    /// Setup errors (bad plans, zero workers) are returned before any thread
    /// is spawned. A watchdog timeout is not an error; it shows up in the
    /// verdict.
    pub fn run(self) -> Result<Verdict, HazardError> {
        let Scenario {
            kind,
            registry,
            plans,
            expectation,
            timeout,
            seed,
        } = self;

        info!(scenario = %kind, workers = plans.len(), "Running scenario");
        let runner = Runner::new(registry, plans, timeout, seed)?;
        let outcome = runner.run();

        Ok(Reporter::new(kind, expectation).verdict(&outcome))
    }
}

/// Build and run `kind` in one go.
pub fn run_scenario(kind: ScenarioKind, config: &SimulatorConfig) -> Result<Verdict, HazardError> {
    Scenario::build(kind, config)?.run()
}

/// Run `kinds` one after another. Stops at the first setup error.
pub fn run_scenarios(
    kinds: &[ScenarioKind],
    config: &SimulatorConfig,
) -> Result<Vec<Verdict>, HazardError> {
    kinds.iter().map(|&kind| run_scenario(kind, config)).collect()
}
