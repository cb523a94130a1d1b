//! Resource registry for hazard scenarios.
//!
//! The registry is the only state workers share. It hosts two
//! disciplines side by side:
//!
//! - **Resources** enforce strict mutual exclusion. Acquisition is a real
//!   blocking wait on a condition variable, so two workers taking resources
//!   in opposite order genuinely deadlock.
//! - **Shared values** have no read-modify-write protection at all. Workers
//!   read, think and write back, and concurrent updates get lost.
//!
//! Every blocking wait is recorded, so at any point a [`RegistrySnapshot`]
//! can be turned into a [`WaitForGraph`] and searched for cycles.

mod registry;
mod shared;
mod wait_for;

pub use registry::{RegistryBuilder, RegistrySnapshot, ResourceAudit, ResourceRegistry};
pub use shared::{SharedValue, SharedValues, StampTable, ValueReading};
pub use wait_for::{WaitCycle, WaitEdge, WaitForGraph};
