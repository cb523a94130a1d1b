//! Hazard Simulator
//!
//! Builds deadlock and race scenarios on top of the simulation runner,
//! runs them under a watchdog and classifies what happened.
//!
//! # Architecture
//!
//! The simulator builds on `hazard-simulation` to provide:
//!
//! - **Scenarios**: two-resource and circular lock-ordering deadlocks, the
//!   lost-update counter and the bank balance race
//! - **Reporting**: `deadlock-timeout` / `race-divergence` / `clean` verdicts
//!   with the wait-for state or value divergence behind them
//! - **Configuration**: hold times, watchdog budgets, seeds and race sizes
//!
//! # Example
//!
//! ```ignore
//! use hazard_simulator::{run_scenario, ScenarioKind, SimulatorConfig};
//! use std::time::Duration;
//!
//! let config = SimulatorConfig::new()
//!     .with_hold(Duration::from_millis(100))
//!     .with_deadlock_timeout(Duration::from_secs(2));
//!
//! let verdict = run_scenario(ScenarioKind::SimpleDeadlock, &config)?;
//! println!("{}", verdict.verdict); // deadlock-timeout
//! ```

pub mod config;
pub mod reporter;
pub mod scenario;

pub use config::SimulatorConfig;
pub use reporter::{BlockedWorker, Divergence, Reporter, Verdict, WaitState};
pub use scenario::{
    parse_selection, run_scenario, run_scenarios, Expectation, HazardFamily, Scenario,
    ScenarioKind, ALL_RACES_ID, EXTERNAL_FAULT_IDS,
};
