//! Core types for the hazard simulator.
//!
//! Everything in here is plain data shared by the registry, the runner and
//! the reporter: identifiers for resources, shared values and workers, the
//! hazard classification a run ends up in, and the error taxonomy.

mod error;
mod hazard;
mod identifiers;

pub use error::HazardError;
pub use hazard::{HazardClass, RunPhase};
pub use identifiers::{ResourceId, ValueId, WorkerId};
