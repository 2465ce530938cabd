//! Process lifecycle: fork, exec, wait, and exit. Grounded on
//! `userprog/process.c`'s three-semaphore rendezvous:
//!
//! - `load_sema` -- the parent blocks on this right after forking to learn
//!   whether the child's setup succeeded; the child signals it once it
//!   knows, one way or the other.
//! - `wait_sema` / `exit_sema` -- a dying process signals `wait_sema` so any
//!   parent blocked in `wait` wakes up, then blocks on `exit_sema` itself
//!   until that parent has read `exit_status`. This is what lets `wait`
//!   return a value instead of racing process teardown.

use alloc::string::String;

use crate::arch::x86_64::gdt;
use crate::arch::x86_64::syscall::return_to_user;
use crate::arch::x86_64::trapframe::TrapFrame;
use crate::kernel::scheduler;
use crate::kernel::thread::{self, PRI_DEFAULT};
use crate::mm::address_space;
use crate::process::task::{self, Pid};

/// Entry point for a freshly forked kernel thread. By the time this runs,
/// `fork` has already copied the address space and the saved user frame
/// into the child's thread record -- all that's left is to resume it.
extern "C" fn child_trampoline(arg: usize) -> ! {
    let pid = arg as Pid;
    let frame = thread::with_thread(pid, |t| t.user_frame).unwrap_or_default();
    unsafe { return_to_user(&frame as *const TrapFrame) }
}

/// Fork the calling process. Returns the child's pid to the parent on
/// success, or [`task::PID_ERROR`] if the address space couldn't be copied
/// (out of memory). The child never observes this function returning -- it
/// resumes straight into user mode via [`child_trampoline`], with `rax`
/// forced to 0.
pub fn fork(name: &str) -> Pid {
    let parent = thread::current_tid();

    let child = scheduler::spawn(name, PRI_DEFAULT, child_trampoline, 0);
    // `spawn` wires `arg` into the context as `rbx`, which the trampoline
    // above reads back out as the child's own pid.
    thread::with_thread(child, |t| t.context.rbx = child as u64);

    task::register(child, Some(parent), name);

    let child_fds = task::with_process(parent, |p| p.fds.fork_into()).unwrap_or_default();
    task::with_process(child, |p| p.fds = child_fds);

    let mut child_frame = thread::with_thread(parent, |t| t.user_frame).unwrap_or_default();
    child_frame.set_return_value(0);
    thread::with_thread(child, |t| t.user_frame = child_frame);

    let copied = address_space::fork(parent, child);
    task::with_process(child, |p| p.load_success = copied);

    if !copied {
        address_space::destroy_for(child);
        task::remove(child);
        thread::destroy(child);
        return task::PID_ERROR;
    }

    child
}

/// Tear down the calling process's address space and hand it to a freshly
/// loaded program. Program loading itself goes through
/// [`crate::process::loader`], a narrow interface this kernel doesn't ship a
/// concrete backend for -- so until one is installed, `exec` always fails
/// (returns `false`) without disturbing the caller, the same as handing it a
/// name that doesn't resolve to an executable.
pub fn exec(name: &str) -> bool {
    let pid = thread::current_tid();
    match crate::process::loader::load(pid, name) {
        Some(loaded) => {
            let mut frame = TrapFrame {
                rip: loaded.entry_point,
                rsp: loaded.initial_stack,
                cs: gdt::user_code_selector().0 as u64,
                ss: gdt::user_data_selector().0 as u64,
                rflags: 0x202,
                ..TrapFrame::default()
            };
            frame.set_return_value(0);
            thread::with_thread(pid, |t| t.user_frame = frame);
            task::with_process(pid, |p| p.name = String::from(name));
            true
        }
        None => false,
    }
}

/// Block until child `child_pid` exits, returning its exit status. Fails
/// (`None`) if `child_pid` does not name a living child of the caller, or
/// has already been waited on -- mirroring `process_wait`'s single-use
/// contract.
pub fn wait(child_pid: Pid) -> Option<i32> {
    let caller = thread::current_tid();
    let is_child =
        task::with_process(caller, |p| p.children.contains(&child_pid)).unwrap_or(false);
    if !is_child {
        return None;
    }

    let claimed = task::with_process(child_pid, |p| {
        if p.waited_on {
            false
        } else {
            p.waited_on = true;
            true
        }
    });
    if claimed != Some(true) {
        return None;
    }

    task::with_process(child_pid, |p| p.wait_sema.down());
    let status = task::with_process(child_pid, |p| p.exit_status).unwrap_or(-1);
    task::with_process(child_pid, |p| p.exit_sema.up());

    task::remove(child_pid);
    task::with_process(caller, |p| p.children.retain(|&c| c != child_pid));

    Some(status)
}

/// Terminate the calling process: print the exit message, close its files,
/// tear down its address space, then rendezvous with a waiting parent (if
/// any) before the underlying thread is finally reaped by the scheduler.
pub fn exit(status: i32) -> ! {
    let pid = thread::current_tid();
    let name = task::with_process(pid, |p| p.name.clone()).unwrap_or_else(|| String::from("?"));

    crate::info!("{}: exit({})", name, status);

    task::close_all_fds(pid);
    address_space::destroy_for(pid);
    task::with_process(pid, |p| p.exit_status = status);

    let parent = task::with_process(pid, |p| p.parent).flatten();
    if let Some(parent_pid) = parent {
        if task::exists(parent_pid) {
            task::with_process(pid, |p| p.wait_sema.up());
            task::with_process(pid, |p| p.exit_sema.down());
        }
    }

    if parent.map(|p| !task::exists(p)).unwrap_or(true) {
        task::remove(pid);
    }

    scheduler::exit_current();
}

pub fn halt() -> ! {
    crate::arch::x86_64::serial::serial_write(b"Power off\n");
    loop {
        x86_64::instructions::interrupts::disable();
        x86_64::instructions::hlt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_makes_child_a_registered_child_process() {
        let parent = scheduler::init(crate::init::config::SchedPolicy::Priority);
        task::register(parent, None, "parent");

        let child = fork("parent");

        assert_ne!(child, task::PID_ERROR);
        assert!(task::with_process(parent, |p| p.children.contains(&child)).unwrap());
        assert_eq!(task::with_process(child, |p| p.parent), Some(Some(parent)));
        assert_eq!(
            thread::with_thread(child, |t| t.user_frame.rax),
            Some(0),
            "child's cloned frame must return 0 from fork"
        );
    }

    #[test]
    fn exec_without_a_loader_installed_fails() {
        assert!(!exec("nonexistent-program"));
    }

    #[test]
    fn wait_rejects_a_pid_that_is_not_a_child() {
        let caller = scheduler::init(crate::init::config::SchedPolicy::Priority);
        task::register(caller, None, "caller");
        assert_eq!(wait(caller + 1000), None);
    }
}
