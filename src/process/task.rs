//! The process control block and its global table. Grounded on
//! `userprog/process.c`'s `struct thread` extension fields: a process is a
//! thread plus a parent/child rendezvous (the three-semaphore protocol in
//! [`super::wait`]), an exit status, and a file descriptor table.
//!
//! This kernel does not distinguish kernel threads from user processes at
//! the scheduling level -- a [`Pid`] *is* a [`Tid`]. `Process` is the extra
//! bookkeeping hung off a subset of them.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use crate::kernel::sync::Semaphore;
use crate::kernel::thread::Tid;
use crate::mm::fs::FileHandle;

pub type Pid = Tid;

pub use crate::kernel::thread::TID_ERROR as PID_ERROR;

/// Per-process open file table. Slots 0 and 1 are reserved for the console
/// (stdin/stdout) the way Pintos's `syscall.c` special-cases fd 0/1 rather
/// than opening them through the filesystem.
struct FdEntry {
    handle: FileHandle,
    offset: u64,
}

pub struct FdTable {
    entries: Vec<Option<FdEntry>>,
}

impl FdTable {
    fn new() -> Self {
        FdTable { entries: Vec::new() }
    }

    /// Allocate the lowest free descriptor at or above 2.
    pub fn alloc(&mut self, handle: FileHandle) -> i32 {
        let entry = Some(FdEntry { handle, offset: 0 });
        for (i, slot) in self.entries.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = entry;
                return (i + 2) as i32;
            }
        }
        self.entries.push(entry);
        (self.entries.len() + 1) as i32
    }

    pub fn get(&self, fd: i32) -> Option<FileHandle> {
        if fd < 2 {
            return None;
        }
        self.entries.get((fd - 2) as usize).and_then(|s| s.as_ref()).map(|e| e.handle)
    }

    pub fn offset(&self, fd: i32) -> u64 {
        if fd < 2 {
            return 0;
        }
        self.entries.get((fd - 2) as usize).and_then(|s| s.as_ref()).map(|e| e.offset).unwrap_or(0)
    }

    pub fn set_offset(&mut self, fd: i32, offset: u64) {
        if fd < 2 {
            return;
        }
        if let Some(Some(entry)) = self.entries.get_mut((fd - 2) as usize) {
            entry.offset = offset;
        }
    }

    pub fn advance_offset(&mut self, fd: i32, n: u64) {
        let new_offset = self.offset(fd) + n;
        self.set_offset(fd, new_offset);
    }

    pub fn close(&mut self, fd: i32) -> bool {
        if fd < 2 {
            return false;
        }
        match self.entries.get_mut((fd - 2) as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    fn close_all(&mut self) -> Vec<FileHandle> {
        self.entries.drain(..).flatten().map(|e| e.handle).collect()
    }

    /// Independent fds over the same underlying files, for `fork`.
    pub(crate) fn fork_into(&self) -> FdTable {
        let entries = self
            .entries
            .iter()
            .map(|slot| {
                slot.as_ref().and_then(|e| {
                    crate::mm::fs::reopen(e.handle).map(|handle| FdEntry { handle, offset: e.offset })
                })
            })
            .collect();
        FdTable { entries }
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Process {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub name: String,
    pub children: Vec<Pid>,
    pub fds: FdTable,

    /// Set by the child once it knows whether its own setup (address-space
    /// fork, or `exec`'s program load) succeeded.
    pub load_success: bool,
    pub load_sema: Semaphore,

    /// -1 until the process actually exits (Pintos convention: a process
    /// killed by the kernel for a violation also reports -1).
    pub exit_status: i32,
    pub wait_sema: Semaphore,
    pub exit_sema: Semaphore,

    /// Set once `wait` has been called for this pid, so a second call (or a
    /// non-child) is rejected the way `process_wait` only succeeds once.
    pub waited_on: bool,
}

impl Process {
    fn new(pid: Pid, parent: Option<Pid>, name: String) -> Self {
        Process {
            pid,
            parent,
            name,
            children: Vec::new(),
            fds: FdTable::new(),
            load_success: false,
            load_sema: Semaphore::new(0),
            exit_status: -1,
            wait_sema: Semaphore::new(0),
            exit_sema: Semaphore::new(0),
            waited_on: false,
        }
    }
}

struct ProcessTable {
    processes: BTreeMap<Pid, Process>,
}

static TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable { processes: BTreeMap::new() });

fn with_table<R>(f: impl FnOnce(&mut ProcessTable) -> R) -> R {
    f(&mut TABLE.lock())
}

/// Register bookkeeping for a thread that already exists (created via
/// [`crate::kernel::scheduler::spawn`] or as the boot thread). Also creates
/// its [`crate::mm::address_space::AddressSpace`].
pub fn register(pid: Pid, parent: Option<Pid>, name: &str) {
    crate::mm::address_space::create_for(pid);
    with_table(|t| {
        t.processes.insert(pid, Process::new(pid, parent, String::from(name)));
        if let Some(p) = parent {
            if let Some(parent_proc) = t.processes.get_mut(&p) {
                parent_proc.children.push(pid);
            }
        }
    });
}

pub fn with_process<R>(pid: Pid, f: impl FnOnce(&mut Process) -> R) -> Option<R> {
    with_table(|t| t.processes.get_mut(&pid).map(f))
}

pub fn exists(pid: Pid) -> bool {
    with_table(|t| t.processes.contains_key(&pid))
}

/// Remove a process's bookkeeping entirely. Called once its parent has
/// consumed its exit status (`wait` returned) or it was never waited on and
/// is being reaped at parent death -- mirroring Pintos's lack of a zombie
/// table: there's nothing left to query once `process_exit`'s rendezvous
/// finishes.
pub fn remove(pid: Pid) -> Option<Process> {
    with_table(|t| t.processes.remove(&pid))
}

/// Close every fd a process held open. Called from [`super::wait::exit`]
/// before the address space itself is torn down.
pub fn close_all_fds(pid: Pid) {
    let handles = with_table(|t| {
        t.processes.get_mut(&pid).map(|p| p.fds.close_all()).unwrap_or_default()
    });
    for h in handles {
        crate::mm::fs::close(h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fd_table_allocates_starting_at_two() {
        let mut fds = FdTable::new();
        let a = fds.alloc(FileHandle(10));
        let b = fds.alloc(FileHandle(11));
        assert_eq!(a, 2);
        assert_eq!(b, 3);
        assert_eq!(fds.get(a), Some(FileHandle(10)));
        assert_eq!(fds.get(b), Some(FileHandle(11)));
    }

    #[test]
    fn fd_table_reuses_closed_slot() {
        let mut fds = FdTable::new();
        let a = fds.alloc(FileHandle(1));
        let b = fds.alloc(FileHandle(2));
        assert!(fds.close(a));
        let c = fds.alloc(FileHandle(3));
        assert_eq!(c, a);
        assert_eq!(fds.get(b), Some(FileHandle(2)));
    }

    #[test]
    fn fd_table_tracks_offset_per_descriptor() {
        let mut fds = FdTable::new();
        let fd = fds.alloc(FileHandle(5));
        assert_eq!(fds.offset(fd), 0);
        fds.advance_offset(fd, 128);
        assert_eq!(fds.offset(fd), 128);
        fds.set_offset(fd, 0);
        assert_eq!(fds.offset(fd), 0);
    }

    #[test]
    fn register_links_parent_and_child() {
        let parent = 9001;
        let child = 9002;
        register(parent, None, "parent");
        register(child, Some(parent), "child");
        assert!(with_process(parent, |p| p.children.contains(&child)).unwrap());
        assert_eq!(with_process(child, |p| p.parent), Some(Some(parent)));
        remove(child);
        remove(parent);
    }

    #[test]
    fn fd_below_two_is_always_rejected() {
        let mut fds = FdTable::new();
        fds.alloc(FileHandle(1));
        assert_eq!(fds.get(0), None);
        assert_eq!(fds.get(1), None);
        assert!(!fds.close(1));
    }
}
