//! Process model layered over the thread scheduler: a [`task::Pid`] is a
//! thread id, and a [`task::Process`] is the extra bookkeeping (parent,
//! children, fds, exit rendezvous) hung off a subset of threads -- the ones
//! running user code rather than pure kernel work.

pub mod current;
pub mod loader;
pub mod task;
pub mod wait;

pub use current::current_pid;
pub use task::Pid;

/// Register the boot thread as the first, parentless process. Called once
/// during kernel init, after the thread and scheduler subsystems are up.
pub fn init() {
    let boot_tid = crate::kernel::thread::current_tid();
    task::register(boot_tid, None, "kernel");
}
