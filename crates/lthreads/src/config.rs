//! Runtime-configurable tunables.
//!
//! The original C source fixed these as preprocessor constants
//! (`LTHREAD_STACK_SIZE`, `LTHREAD_ALARM_INTERVAL_NS`, ...). Here they are
//! plain `Config` fields with the same defaults, set once at [`crate::init_with_config`]
//! time.

use std::time::Duration;

/// Default per-thread stack size: 2 MiB, matching the C source.
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Default preemption timer period: 500 microseconds, matching the C source.
pub const DEFAULT_ALARM_INTERVAL: Duration = Duration::from_micros(500);

/// Default initial handle-table capacity.
pub const DEFAULT_INITIAL_CAPACITY: usize = 4;

/// Scheduler-wide tunables, fixed for the lifetime of one [`crate::init`] call.
#[derive(Debug, Clone)]
pub struct Config {
    /// Size in bytes of each lthread's mapped stack (a guard page is added on top).
    pub stack_size: usize,
    /// Period of the preemption timer.
    pub alarm_interval: Duration,
    /// Initial number of slots in the handle table; doubles on exhaustion.
    pub initial_capacity: usize,
    /// Real-time signal number used to preempt/schedule. Defaults to `SIGRTMIN`.
    pub preemption_signal: i32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            stack_size: DEFAULT_STACK_SIZE,
            alarm_interval: DEFAULT_ALARM_INTERVAL,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            // SAFETY: sigrtmin() just reads a libc global; no preconditions.
            preemption_signal: unsafe { libc::SIGRTMIN() },
        }
    }
}

impl Config {
    /// Starts from [`Default::default`] and overrides the stack size.
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Starts from [`Default::default`] and overrides the alarm interval.
    pub fn with_alarm_interval(mut self, interval: Duration) -> Self {
        self.alarm_interval = interval;
        self
    }

    /// Starts from [`Default::default`] and overrides the initial handle-table capacity.
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity.max(1);
        self
    }
}
