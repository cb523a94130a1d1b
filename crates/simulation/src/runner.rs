//! Concurrent scenario runner with a wall-clock watchdog.

use crate::plan::AcquisitionPlan;
use crate::worker::{Worker, WorkerStatus};
use hazard_registry::{
    RegistrySnapshot, ResourceAudit, ResourceRegistry, ValueReading, WaitCycle, WaitForGraph,
};
use hazard_types::{HazardError, ResourceId, RunPhase, ValueId, WorkerId};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Progress of every worker, shared between the runner and worker threads.
#[derive(Debug)]
struct Board {
    state: Mutex<BoardState>,
    /// Signalled when the start gate opens and whenever a worker finishes.
    changed: Condvar,
}

#[derive(Debug)]
struct BoardState {
    started: Option<Instant>,
    statuses: Vec<WorkerStatus>,
    finished_after: Vec<Option<Duration>>,
    finished: usize,
}

impl Board {
    fn new(workers: usize) -> Self {
        Self {
            state: Mutex::new(BoardState {
                started: None,
                statuses: vec![WorkerStatus::Pending; workers],
                finished_after: vec![None; workers],
                finished: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Open the start gate. Every worker parked in `wait_for_start` runs.
    fn open(&self) -> Instant {
        let now = Instant::now();
        self.state.lock().started = Some(now);
        self.changed.notify_all();
        now
    }

    fn wait_for_start(&self, worker: WorkerId) {
        let mut state = self.state.lock();
        while state.started.is_none() {
            self.changed.wait(&mut state);
        }
        state.statuses[worker.index()] = WorkerStatus::Running;
    }

    fn finish(&self, worker: WorkerId, status: WorkerStatus) {
        let mut state = self.state.lock();
        let elapsed = state.started.map(|s| s.elapsed());
        state.statuses[worker.index()] = status;
        state.finished_after[worker.index()] = elapsed;
        state.finished += 1;
        drop(state);
        self.changed.notify_all();
    }

    /// Wait until every worker finished or `deadline` passes. Returns whether
    /// everyone finished.
    fn wait_all(&self, deadline: Instant) -> bool {
        let mut state = self.state.lock();
        while state.finished < state.statuses.len() {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.finished == state.statuses.len();
            }
        }
        true
    }

    /// Run `f` while no worker can record a finish, and return its result
    /// with the statuses at that instant.
    ///
    /// Workers release their resources before `finish`, so a snapshot taken
    /// inside `f` never shows a `Completed` worker still holding anything.
    fn capture<T>(
        &self,
        f: impl FnOnce() -> T,
    ) -> (T, Vec<WorkerStatus>, Vec<Option<Duration>>) {
        let state = self.state.lock();
        let captured = f();
        (captured, state.statuses.clone(), state.finished_after.clone())
    }
}

/// Spawns one OS thread per worker and supervises them with a watchdog.
///
/// Deadlocked workers cannot be unblocked without breaking the ownership of
/// the locks they hold, so on timeout their threads are detached and left
/// parked. Only the captured state is returned.
#[derive(Debug)]
pub struct Runner {
    registry: Arc<ResourceRegistry>,
    workers: Vec<Worker>,
    timeout: Duration,
    phase: RunPhase,
}

impl Runner {
    /// Validate every plan and prepare the run. Nothing is spawned yet.
    pub fn new(
        registry: ResourceRegistry,
        plans: Vec<AcquisitionPlan>,
        timeout: Duration,
        seed: u64,
    ) -> Result<Self, HazardError> {
        if plans.is_empty() {
            return Err(HazardError::config("a run needs at least one worker"));
        }
        if timeout.is_zero() {
            return Err(HazardError::config("watchdog timeout must be positive"));
        }
        let count = u32::try_from(plans.len())
            .map_err(|_| HazardError::config("too many workers"))?;

        let workers = (0..count)
            .zip(plans)
            .map(|(i, plan)| {
                let id = WorkerId(i);
                plan.validate(id, &registry)?;
                Ok(Worker::new(id, plan, seed))
            })
            .collect::<Result<Vec<_>, HazardError>>()?;

        Ok(Self {
            registry: Arc::new(registry),
            workers,
            timeout,
            phase: RunPhase::Initialized,
        })
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run every worker concurrently and return once they all finished or
    /// the watchdog fired, whichever comes first.
    pub fn run(mut self) -> RunOutcome {
        let worker_count = self.workers.len();
        let board = Arc::new(Board::new(worker_count));
        let mut handles = Vec::with_capacity(worker_count);

        for worker in self.workers.drain(..) {
            let id = worker.id();
            let registry = Arc::clone(&self.registry);
            let thread_board = Arc::clone(&board);

            let spawned = thread::Builder::new()
                .name(format!("hazard-worker-{}", id.0))
                .spawn(move || {
                    thread_board.wait_for_start(id);
                    let status = run_worker(worker, &registry);
                    thread_board.finish(id, status);
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    warn!(worker = %id, error = %e, "Failed to spawn worker thread");
                    board.finish(
                        id,
                        WorkerStatus::Failed {
                            error: format!("spawn failed: {e}"),
                            released: Vec::new(),
                        },
                    );
                }
            }
        }

        self.phase = RunPhase::Running;
        info!(
            workers = worker_count,
            timeout = ?self.timeout,
            "Starting scenario run"
        );
        let started = board.open();
        let all_finished = board.wait_all(started + self.timeout);
        let elapsed = started.elapsed();

        let (snapshot, statuses, finished_after) = board.capture(|| self.registry.snapshot());

        if all_finished {
            self.phase = RunPhase::Completed;
            for handle in handles {
                if handle.join().is_err() {
                    warn!("Worker thread panicked outside its plan");
                }
            }
            info!(elapsed = ?elapsed, "All workers finished");
        } else {
            self.phase = RunPhase::TimedOut;
            // Detach: blocked threads stay parked on the registry.
            drop(handles);
            warn!(
                elapsed = ?elapsed,
                blocked = snapshot.waiting.len(),
                "Watchdog fired before all workers finished"
            );
        }

        let workers = statuses
            .into_iter()
            .zip(finished_after)
            .enumerate()
            .map(|(i, (status, finished))| {
                let id = WorkerId(i as u32);
                WorkerReport {
                    id,
                    holding: snapshot.held_by(id),
                    waiting_on: snapshot.waiting_on(id),
                    finished_ms: finished.map(|d| d.as_millis() as u64),
                    status,
                }
            })
            .collect();

        let wait_for = snapshot.wait_for_graph();
        let cycles = wait_for.cycles();

        RunOutcome {
            phase: self.phase,
            elapsed,
            timeout: self.timeout,
            workers,
            cycles,
            wait_for,
            values: self.registry.values().readings(),
            audit: self.registry.audit(),
            stamp_owners: self.registry.stamps().owners(),
            snapshot,
        }
    }
}

/// Execute one worker, containing panics and registry errors.
fn run_worker(worker: Worker, registry: &ResourceRegistry) -> WorkerStatus {
    let id = worker.id();
    match panic::catch_unwind(AssertUnwindSafe(|| worker.execute(registry))) {
        Ok(Ok(stats)) => WorkerStatus::Completed { stats },
        Ok(Err(error)) => {
            let released = registry.abandon(id);
            warn!(worker = %id, %error, ?released, "Worker failed");
            WorkerStatus::Failed {
                error: error.to_string(),
                released,
            }
        }
        Err(payload) => {
            let released = registry.abandon(id);
            let message = panic_message(payload.as_ref());
            warn!(worker = %id, %message, ?released, "Worker panicked");
            WorkerStatus::Panicked { message, released }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Final state of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub id: WorkerId,
    pub status: WorkerStatus,
    /// Resources held when the run ended.
    pub holding: Vec<ResourceId>,
    /// Resource the worker was blocked on when the run ended.
    pub waiting_on: Option<ResourceId>,
    /// Milliseconds from start until the worker finished.
    pub finished_ms: Option<u64>,
}

impl WorkerReport {
    pub fn is_blocked(&self) -> bool {
        self.waiting_on.is_some()
    }
}

/// Everything observed about a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub phase: RunPhase,
    pub elapsed: Duration,
    pub timeout: Duration,
    pub workers: Vec<WorkerReport>,
    pub snapshot: RegistrySnapshot,
    pub wait_for: WaitForGraph,
    pub cycles: Vec<WaitCycle>,
    pub values: Vec<ValueReading>,
    pub audit: Vec<ResourceAudit>,
    /// Stamp-table slots won by each worker.
    pub stamp_owners: BTreeMap<WorkerId, usize>,
}

impl RunOutcome {
    pub fn timed_out(&self) -> bool {
        self.phase == RunPhase::TimedOut
    }

    /// Fail with [`HazardError::WatchdogTimeout`] unless every worker finished.
    pub fn ensure_completed(&self) -> Result<(), HazardError> {
        if self.timed_out() {
            Err(HazardError::WatchdogTimeout(self.timeout))
        } else {
            Ok(())
        }
    }

    /// Whether at least two workers were stuck waiting on each other.
    pub fn has_deadlock(&self) -> bool {
        self.cycles.iter().any(|c| c.len() >= 2)
    }

    pub fn completed_workers(&self) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter(|w| matches!(w.status, WorkerStatus::Completed { .. }))
            .map(|w| w.id)
            .collect()
    }

    pub fn blocked_workers(&self) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter(|w| w.is_blocked())
            .map(|w| w.id)
            .collect()
    }

    /// Final reading of a shared value.
    pub fn value(&self, id: ValueId) -> Option<i64> {
        self.values.iter().find(|v| v.id == id).map(|v| v.value)
    }

    /// Largest number of simultaneous holders seen on any resource.
    pub fn peak_holders(&self) -> u32 {
        self.audit.iter().map(|a| a.peak_holders).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{RacyOp, Think};
    use tracing_test::traced_test;

    fn crossed_registry() -> (ResourceRegistry, ResourceId, ResourceId) {
        let mut builder = ResourceRegistry::builder();
        let a = builder.resource("a");
        let b = builder.resource("b");
        (builder.build(), a, b)
    }

    #[test]
    fn test_rejects_empty_and_invalid_setups() {
        let (registry, _, _) = crossed_registry();
        assert!(matches!(
            Runner::new(registry, vec![], Duration::from_secs(1), 0),
            Err(HazardError::Configuration(_))
        ));

        let (registry, a, b) = crossed_registry();
        let bad = AcquisitionPlan::new().acquire(a).release(b);
        assert_eq!(
            Runner::new(registry, vec![bad], Duration::from_secs(1), 0).unwrap_err(),
            HazardError::NotOwner {
                resource: b,
                worker: WorkerId(0)
            }
        );

        let (registry, a, _) = crossed_registry();
        let plan = AcquisitionPlan::new().acquire(a);
        assert!(matches!(
            Runner::new(registry, vec![plan], Duration::ZERO, 0),
            Err(HazardError::Configuration(_))
        ));
    }

    #[test]
    #[traced_test]
    fn test_uncontended_run_completes() {
        let (registry, a, b) = crossed_registry();
        let plans = vec![
            AcquisitionPlan::new().acquire(a).release(a).acquire(b),
            AcquisitionPlan::new().acquire(b).release(b).acquire(a),
        ];
        let runner = Runner::new(registry, plans, Duration::from_secs(5), 0).unwrap();
        assert_eq!(runner.phase(), RunPhase::Initialized);

        let outcome = runner.run();

        assert_eq!(outcome.phase, RunPhase::Completed);
        assert!(outcome.ensure_completed().is_ok());
        assert_eq!(outcome.completed_workers(), vec![WorkerId(0), WorkerId(1)]);
        assert!(outcome.blocked_workers().is_empty());
        assert!(outcome.cycles.is_empty());
        assert!(outcome.workers.iter().all(|w| w.finished_ms.is_some()));
        assert_eq!(outcome.peak_holders(), 1);
        assert!(logs_contain("All workers finished"));
    }

    #[test]
    fn test_crossed_acquisition_times_out_with_two_cycle() {
        let (registry, a, b) = crossed_registry();
        let hold = Duration::from_millis(50);
        let plans = vec![
            AcquisitionPlan::new().acquire(a).hold(hold).acquire(b),
            AcquisitionPlan::new().acquire(b).hold(hold).acquire(a),
        ];
        let timeout = Duration::from_millis(400);
        let outcome = Runner::new(registry, plans, timeout, 0).unwrap().run();

        assert_eq!(outcome.phase, RunPhase::TimedOut);
        assert_eq!(
            outcome.ensure_completed(),
            Err(HazardError::WatchdogTimeout(timeout))
        );
        assert!(outcome.has_deadlock());
        assert_eq!(outcome.blocked_workers(), vec![WorkerId(0), WorkerId(1)]);
        assert!(outcome.completed_workers().is_empty());

        let w0 = &outcome.workers[0];
        let w1 = &outcome.workers[1];
        assert_eq!(w0.holding, vec![a]);
        assert_eq!(w0.waiting_on, Some(b));
        assert_eq!(w1.holding, vec![b]);
        assert_eq!(w1.waiting_on, Some(a));
        assert_eq!(outcome.cycles[0].workers(), vec![WorkerId(0), WorkerId(1)]);
        assert!(outcome.elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_panicking_worker_releases_and_others_proceed() {
        let (registry, a, _) = crossed_registry();
        let plans = vec![
            AcquisitionPlan::new()
                .acquire(a)
                .hold(Duration::from_millis(20))
                .panic_at(2),
            AcquisitionPlan::new()
                .hold(Duration::from_millis(5))
                .acquire(a),
        ];
        let outcome = Runner::new(registry, plans, Duration::from_secs(5), 0)
            .unwrap()
            .run();

        assert_eq!(outcome.phase, RunPhase::Completed);
        match &outcome.workers[0].status {
            WorkerStatus::Panicked { message, released } => {
                assert!(message.contains("scripted fault"));
                assert_eq!(released, &vec![a]);
            }
            other => panic!("expected panic status, got {other:?}"),
        }
        assert_eq!(outcome.completed_workers(), vec![WorkerId(1)]);
        assert_eq!(outcome.snapshot.holder_of(a), None);
    }

    #[test]
    fn test_racy_values_are_reported() {
        let mut builder = ResourceRegistry::builder();
        let v = builder.value("counter", 0);
        let registry = builder.build();
        let plan = (0..100).fold(AcquisitionPlan::new(), |p, _| {
            p.racy(RacyOp::Increment {
                value: v,
                think: Think::None,
            })
        });

        let outcome = Runner::new(registry, vec![plan], Duration::from_secs(5), 0)
            .unwrap()
            .run();

        assert_eq!(outcome.value(v), Some(100));
        assert_eq!(outcome.values[0].name, "counter");
    }

    #[test]
    fn test_completed_workers_never_report_holdings() {
        // Watchdog deadlines around the hold time so it fires while workers
        // are releasing and finishing.
        for timeout_ms in 1..=12 {
            let mut builder = ResourceRegistry::builder();
            let plans: Vec<_> = (0..6)
                .map(|i| {
                    let resource = builder.resource(format!("r{i}"));
                    AcquisitionPlan::new()
                        .acquire(resource)
                        .hold(Duration::from_millis(2 + i as u64))
                })
                .collect();

            let outcome = Runner::new(
                builder.build(),
                plans,
                Duration::from_millis(timeout_ms),
                0,
            )
            .unwrap()
            .run();

            for worker in &outcome.workers {
                if matches!(worker.status, WorkerStatus::Completed { .. }) {
                    assert!(
                        worker.holding.is_empty(),
                        "{} completed but holds {:?} (timeout {timeout_ms}ms)",
                        worker.id,
                        worker.holding
                    );
                }
            }
        }
    }
}
