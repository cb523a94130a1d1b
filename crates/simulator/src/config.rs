//! Configuration types for the simulator.

use std::time::Duration;

/// Tunables shared by every scenario.
#[derive(Clone, Debug)]
pub struct SimulatorConfig {
    /// Hold time between acquisitions in deadlock scenarios.
    /// Widens the window in which every worker owns its first resource.
    pub hold: Duration,

    /// Watchdog budget for deadlock scenarios.
    pub deadlock_timeout: Duration,

    /// Watchdog budget for race scenarios. These are expected to finish, so
    /// the budget is generous.
    pub race_timeout: Duration,

    /// Seed for per-worker think-time jitter.
    pub seed: u64,

    /// Think time inside the counter's read-modify-write window.
    pub counter_think: Duration,

    /// Upper bound of the random think time in the bank race.
    pub bank_think_max: Duration,

    /// Starting balance of the bank account.
    pub initial_balance: i64,

    /// Amount moved by each deposit or withdrawal.
    pub transaction_amount: i64,

    /// Size of the last-writer stamp table touched by the counter race.
    pub stamp_slots: usize,
}

impl SimulatorConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self {
            hold: Duration::from_millis(250),
            deadlock_timeout: Duration::from_secs(5),
            race_timeout: Duration::from_secs(60),
            seed: 12345,
            counter_think: Duration::from_micros(1),
            bank_think_max: Duration::from_millis(1),
            initial_balance: 1000,
            transaction_amount: 10,
            stamp_slots: 1000,
        }
    }

    /// Set the hold time between acquisitions.
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    /// Set the deadlock watchdog budget.
    pub fn with_deadlock_timeout(mut self, timeout: Duration) -> Self {
        self.deadlock_timeout = timeout;
        self
    }

    /// Set the race watchdog budget.
    pub fn with_race_timeout(mut self, timeout: Duration) -> Self {
        self.race_timeout = timeout;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the counter race think time.
    pub fn with_counter_think(mut self, think: Duration) -> Self {
        self.counter_think = think;
        self
    }

    /// Set the bank race think-time bound.
    pub fn with_bank_think_max(mut self, max: Duration) -> Self {
        self.bank_think_max = max;
        self
    }

    /// Set the starting bank balance.
    pub fn with_initial_balance(mut self, balance: i64) -> Self {
        self.initial_balance = balance;
        self
    }

    /// Set the stamp table size.
    pub fn with_stamp_slots(mut self, slots: usize) -> Self {
        self.stamp_slots = slots;
        self
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::new()
    }
}
