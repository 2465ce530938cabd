//! Compiled-in boot configuration. Pintos threads this kind of thing through
//! as globals set by command-line flags (`-o mlfqs`, `-q`); we have no
//! command line, so `BootConfig::default()` plays the same role the flag
//! defaults do there, with the `mlfqs` cargo feature still deciding whether
//! the MLFQS recalculation in [`crate::kernel::scheduler`] runs at all.

/// Which policy [`crate::kernel::scheduler::pick_next`] uses to choose the
/// next thread off the ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// FIFO across the ready queue, ignoring priority.
    RoundRobin,
    /// Always run the highest-priority ready thread (with donation).
    Priority,
    /// Highest-priority ready thread, where priority itself is recomputed
    /// every few ticks from `nice` and `recent_cpu`.
    Mlfqs,
}

impl Default for SchedPolicy {
    fn default() -> Self {
        if cfg!(feature = "mlfqs") {
            SchedPolicy::Mlfqs
        } else {
            SchedPolicy::Priority
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    pub sched_policy: SchedPolicy,
    pub timer_hz: u32,
}

impl Default for BootConfig {
    fn default() -> Self {
        BootConfig {
            sched_policy: SchedPolicy::default(),
            timer_hz: 100,
        }
    }
}
