//! Hazard classification and run lifecycle.

use serde::Serialize;
use std::fmt;

/// The hazard a finished run was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HazardClass {
    /// The watchdog fired with at least two workers waiting on each other in a cycle.
    DeadlockTimeout,
    /// A shared value ended up different from its serialized result.
    RaceDivergence,
    /// Observed behaviour matched the correct outcome.
    Clean,
}

impl HazardClass {
    /// Whether this class represents a reproduced hazard.
    pub fn is_hazard(self) -> bool {
        !matches!(self, HazardClass::Clean)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HazardClass::DeadlockTimeout => "deadlock-timeout",
            HazardClass::RaceDivergence => "race-divergence",
            HazardClass::Clean => "clean",
        }
    }
}

impl fmt::Display for HazardClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single scenario run.
///
/// ```text
/// Initialized -> Running -> Completed
///                        -> TimedOut
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunPhase {
    /// Plans validated, no threads spawned yet.
    Initialized,
    /// Workers spawned, watchdog armed.
    Running,
    /// Every worker reached a terminal status before the deadline.
    Completed,
    /// The watchdog fired with at least one worker still running.
    TimedOut,
}

impl RunPhase {
    /// Whether the run has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::TimedOut)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Initialized => "initialized",
            RunPhase::Running => "running",
            RunPhase::Completed => "completed",
            RunPhase::TimedOut => "timed-out",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hazard_class_names() {
        assert_eq!(HazardClass::DeadlockTimeout.to_string(), "deadlock-timeout");
        assert_eq!(
            serde_json::to_string(&HazardClass::RaceDivergence).unwrap(),
            "\"race-divergence\""
        );
        assert!(!HazardClass::Clean.is_hazard());
        assert!(HazardClass::DeadlockTimeout.is_hazard());
    }

    #[test]
    fn test_run_phase_terminal() {
        assert!(!RunPhase::Initialized.is_terminal());
        assert!(!RunPhase::Running.is_terminal());
        assert!(RunPhase::Completed.is_terminal());
        assert!(RunPhase::TimedOut.is_terminal());
        assert_eq!(
            serde_json::to_string(&RunPhase::TimedOut).unwrap(),
            "\"timed-out\""
        );
    }
}
