//! Error types for hazard simulation.

use crate::{ResourceId, WorkerId};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while setting up or running a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HazardError {
    /// Non-blocking acquisition found the resource held.
    #[error("{resource} unavailable: held by {holder}")]
    ResourceUnavailable {
        resource: ResourceId,
        holder: WorkerId,
    },

    /// A worker tried to release a resource it does not hold.
    #[error("{worker} released {resource} without holding it")]
    NotOwner {
        resource: ResourceId,
        worker: WorkerId,
    },

    /// The run did not finish inside its watchdog budget.
    ///
    /// This is the expected end state of a deadlock scenario; it is only
    /// turned into an error when a caller explicitly requires completion.
    #[error("watchdog expired after {0:?}")]
    WatchdogTimeout(Duration),

    /// Invalid worker/resource counts or plans.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl HazardError {
    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        HazardError::Configuration(msg.into())
    }
}
