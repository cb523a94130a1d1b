//! Outcome classification and structured verdicts.

use crate::scenario::{Expectation, HazardFamily, ScenarioKind};
use hazard_registry::{ValueReading, WaitCycle};
use hazard_simulation::{RunOutcome, WorkerReport};
use hazard_types::{HazardClass, ResourceId, RunPhase, WorkerId};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Difference between a shared value's correct and observed final state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Divergence {
    pub value: String,
    pub expected: i64,
    pub observed: i64,
    /// `expected - observed`. Positive means updates were lost.
    pub delta: i64,
}

/// A worker still blocked when the watchdog fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedWorker {
    pub worker: WorkerId,
    pub waiting_on: ResourceId,
    /// Holder of `waiting_on` at the time of the snapshot.
    pub held_by: Option<WorkerId>,
    pub holding: Vec<ResourceId>,
}

/// Wait state captured when a run timed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitState {
    pub completed: Vec<WorkerId>,
    pub blocked: Vec<BlockedWorker>,
    pub cycles: Vec<WaitCycle>,
}

/// Structured result of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub scenario: String,
    pub family: HazardFamily,
    pub verdict: HazardClass,
    pub phase: RunPhase,
    pub elapsed_ms: u64,
    pub timeout_ms: u64,
    pub divergence: Option<Divergence>,
    pub wait_state: Option<WaitState>,
    pub workers: Vec<WorkerReport>,
    pub values: Vec<ValueReading>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub stamp_owners: BTreeMap<WorkerId, usize>,
    /// Most simultaneous holders seen on any resource (1 when exclusion held).
    pub peak_holders: u32,
}

impl Verdict {
    /// Print a human-readable summary to stdout.
    pub fn print(&self) {
        println!("=== {} ===", self.scenario);
        println!("verdict:  {}", self.verdict);
        println!(
            "phase:    {} after {} ms (budget {} ms)",
            self.phase, self.elapsed_ms, self.timeout_ms
        );

        if let Some(d) = &self.divergence {
            println!(
                "{}: expected {}, observed {}, delta {}",
                d.value, d.expected, d.observed, d.delta
            );
        }

        if let Some(wait) = &self.wait_state {
            println!("completed workers: {:?}", wait.completed);
            for b in &wait.blocked {
                let holder = b
                    .held_by
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "nobody".to_string());
                println!(
                    "  {} holds {:?}, waits on {} (held by {})",
                    b.worker, b.holding, b.waiting_on, holder
                );
            }
            for cycle in &wait.cycles {
                let path: Vec<String> = cycle.workers().iter().map(|w| w.to_string()).collect();
                println!("  cycle: {} -> {}", path.join(" -> "), path[0]);
            }
        }

        for v in &self.values {
            println!("value {} = {} (initial {})", v.name, v.value, v.initial);
        }
        if !self.stamp_owners.is_empty() {
            println!("stamp slots won: {:?}", self.stamp_owners);
        }
    }

    /// Render as pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Compares what a run did against what it should have done.
///
/// The reporter only measures. It never corrects the observed state.
#[derive(Debug, Clone)]
pub struct Reporter {
    kind: ScenarioKind,
    expectation: Expectation,
}

impl Reporter {
    pub fn new(kind: ScenarioKind, expectation: Expectation) -> Self {
        Self { kind, expectation }
    }

    /// Classify `outcome`.
    ///
    /// Deadlock scenarios: `deadlock-timeout` iff the watchdog fired with at
    /// least two workers in a wait-for cycle, otherwise `clean`.
    ///
    /// Race scenarios: `race-divergence` iff the run completed and the final
    /// value differs from the serialized result, otherwise `clean`. A race
    /// run stopped by the watchdog carries no divergence; its phase says
    /// `timed-out`.
    pub fn verdict(&self, outcome: &RunOutcome) -> Verdict {
        let family = self.kind.family();

        // A run cut short by the watchdog has no final value to compare.
        let completed = match outcome.ensure_completed() {
            Ok(()) => true,
            Err(e) => {
                if family == HazardFamily::Race {
                    warn!(
                        scenario = %self.kind,
                        error = %e,
                        "Race run did not finish, skipping value comparison"
                    );
                }
                false
            }
        };

        let divergence = match &self.expectation {
            Expectation::FinalValue { value, expected } if completed => {
                let reading = outcome.values.iter().find(|v| v.id == *value);
                reading.map(|r| Divergence {
                    value: r.name.clone(),
                    expected: *expected,
                    observed: r.value,
                    delta: expected - r.value,
                })
            }
            _ => None,
        };

        let verdict = match family {
            HazardFamily::Deadlock => {
                if outcome.timed_out() && outcome.has_deadlock() {
                    HazardClass::DeadlockTimeout
                } else {
                    HazardClass::Clean
                }
            }
            HazardFamily::Race => match &divergence {
                Some(d) if d.delta != 0 => HazardClass::RaceDivergence,
                _ => HazardClass::Clean,
            },
        };

        let wait_state = outcome.timed_out().then(|| WaitState {
            completed: outcome.completed_workers(),
            blocked: outcome
                .workers
                .iter()
                .filter_map(|w| {
                    let waiting_on = w.waiting_on?;
                    Some(BlockedWorker {
                        worker: w.id,
                        waiting_on,
                        held_by: outcome.snapshot.holder_of(waiting_on),
                        holding: w.holding.clone(),
                    })
                })
                .collect(),
            cycles: outcome.cycles.clone(),
        });

        info!(
            scenario = %self.kind,
            verdict = %verdict,
            elapsed = ?outcome.elapsed,
            "Scenario classified"
        );

        Verdict {
            scenario: self.kind.to_string(),
            family,
            verdict,
            phase: outcome.phase,
            elapsed_ms: outcome.elapsed.as_millis() as u64,
            timeout_ms: outcome.timeout.as_millis() as u64,
            divergence,
            wait_state,
            workers: outcome.workers.clone(),
            values: outcome.values.clone(),
            stamp_owners: outcome.stamp_owners.clone(),
            peak_holders: outcome.peak_holders(),
        }
    }
}
