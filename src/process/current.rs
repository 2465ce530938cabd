//! Convenience wrappers for acting on the calling thread's own process
//! bookkeeping -- the common case at every syscall boundary. "Current" is
//! simply whatever [`crate::kernel::thread::current_tid`] reports; there is
//! no separate per-CPU current-process pointer to keep in sync.

use crate::kernel::thread;
use crate::process::task::{self, Pid};

pub fn current_pid() -> Pid {
    thread::current_tid()
}

pub fn with_current<R>(f: impl FnOnce(&mut task::Process) -> R) -> Option<R> {
    task::with_process(current_pid(), f)
}

pub fn name() -> alloc::string::String {
    with_current(|p| p.name.clone()).unwrap_or_default()
}
