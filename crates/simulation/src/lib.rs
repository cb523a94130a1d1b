//! Concurrent hazard runner.
//!
//! Unlike a cooperative simulation, this runner needs real preemption: the
//! hazards it reproduces only appear when OS threads interleave their
//! read-modify-write sequences and lock acquisitions unpredictably.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Runner                           │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │  plans validated  ->  one OS thread per Worker     │ │
//! │  │  start gate opens all workers at once              │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │  Workers: acquire / hold / update / racy ops       │ │
//! │  │  against the shared ResourceRegistry               │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │  watchdog: all finished -> Completed               │ │
//! │  │            deadline     -> TimedOut (detach)       │ │
//! │  │  snapshot ownership, waits, values -> RunOutcome   │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod plan;
mod runner;
mod worker;

pub use plan::{serialized_replay, AcquisitionPlan, RacyOp, Step, Think};
pub use runner::{RunOutcome, Runner, WorkerReport};
pub use worker::{Worker, WorkerStats, WorkerStatus};
