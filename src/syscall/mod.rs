//! System-call dispatch. Entered from [`crate::arch::x86_64::syscall`] with
//! the trapped [`TrapFrame`] already saved onto the calling thread; this
//! module owns the syscall-number switch and every handler body, the way
//! Pintos's `syscall.c` does, but keeps argument validation
//! ([`validation`]) and userspace copies ([`uaccess`]) in their own modules
//! rather than inlining pointer arithmetic into every handler.
//!
//! Numbering and argument order follow the surface named for this kernel:
//! halt, exit, fork, exec, wait, create, remove, open, filesize, read,
//! write, seek, tell, close, mmap, munmap. Console I/O (fd 0/1/2) is the one
//! piece of terminal handling this kernel implements directly, by way of
//! the serial port -- a full keyboard/tty stack is external-collaborator
//! territory, so `read` on stdin simply reports EOF.

pub mod uaccess;
pub mod validation;

use alloc::string::String;
use alloc::vec;

use crate::arch::x86_64::trapframe::TrapFrame;
use crate::lib::error::Errno;
use crate::mm::address_space;
use crate::mm::fs::{self, FileHandle};
use crate::process::task;
use crate::process::{current_pid, wait};
use crate::syscall::uaccess::{copy_from_user, copy_string_from_user, copy_to_user};
use crate::syscall::validation::SyscallValidator;

#[allow(dead_code)]
mod number {
    pub const HALT: u64 = 0;
    pub const EXIT: u64 = 1;
    pub const FORK: u64 = 2;
    pub const EXEC: u64 = 3;
    pub const WAIT: u64 = 4;
    pub const CREATE: u64 = 5;
    pub const REMOVE: u64 = 6;
    pub const OPEN: u64 = 7;
    pub const FILESIZE: u64 = 8;
    pub const READ: u64 = 9;
    pub const WRITE: u64 = 10;
    pub const SEEK: u64 = 11;
    pub const TELL: u64 = 12;
    pub const CLOSE: u64 = 13;
    pub const MMAP: u64 = 14;
    pub const MUNMAP: u64 = 15;
}

/// Route a trapped syscall to its handler and write the result back into
/// `frame.rax`. Called from the `int 0x80` entry stub with interrupts
/// enabled and the frame already snapshotted onto the current thread.
pub fn dispatch(frame: &mut TrapFrame) {
    let args = frame.syscall_args();
    let ret: i64 = match frame.syscall_number() {
        number::HALT => wait::halt(),
        number::EXIT => wait::exit(args[0] as i32),
        number::FORK => sys_fork(args[0]),
        number::EXEC => sys_exec(args[0]),
        number::WAIT => sys_wait(args[0] as i32),
        number::CREATE => sys_create(args[0], args[1]),
        number::REMOVE => sys_remove(args[0]),
        number::OPEN => sys_open(args[0]),
        number::FILESIZE => sys_filesize(args[0] as i32),
        number::READ => sys_read(args[0] as i32, args[1], args[2] as usize),
        number::WRITE => sys_write(args[0] as i32, args[1], args[2] as usize),
        number::SEEK => sys_seek(args[0] as i32, args[1]),
        number::TELL => sys_tell(args[0] as i32),
        number::CLOSE => sys_close(args[0] as i32),
        number::MMAP => sys_mmap(args[0] as i32, args[1], args[2] as usize, args[3], args[4]),
        number::MUNMAP => sys_munmap(args[0]),
        other => {
            crate::warn!("unknown syscall number {}", other);
            Errno::ENOSYS.as_isize() as i64
        }
    };
    frame.set_return_value(ret);
}

fn sys_fork(name_ptr: u64) -> i64 {
    let name = read_path(name_ptr).unwrap_or_else(|_| crate::process::current::name());
    wait::fork(&name) as i64
}

fn sys_exec(path_ptr: u64) -> i64 {
    match read_path(path_ptr) {
        Ok(path) => {
            if wait::exec(&path) {
                0
            } else {
                -1
            }
        }
        Err(e) => e.as_isize() as i64,
    }
}

fn sys_wait(pid: i32) -> i64 {
    match wait::wait(pid as task::Pid) {
        Some(status) => status as i64,
        None => -1,
    }
}

fn sys_create(path_ptr: u64, size: u64) -> i64 {
    match read_path(path_ptr) {
        Ok(path) => fs::create(&path, size) as i64,
        Err(e) => e.as_isize() as i64,
    }
}

fn sys_remove(path_ptr: u64) -> i64 {
    match read_path(path_ptr) {
        Ok(path) => fs::remove(&path) as i64,
        Err(e) => e.as_isize() as i64,
    }
}

fn sys_open(path_ptr: u64) -> i64 {
    match read_path(path_ptr) {
        Ok(path) => match fs::open(&path) {
            Some(handle) => with_current_fds(|fds| fds.alloc(handle)).unwrap_or(-1) as i64,
            None => -1,
        },
        Err(e) => e.as_isize() as i64,
    }
}

fn sys_filesize(fd: i32) -> i64 {
    match fd_handle(fd) {
        Some(handle) => fs::length(handle) as i64,
        None => -1,
    }
}

fn sys_read(fd: i32, buf_ptr: u64, count: usize) -> i64 {
    if SyscallValidator::validate_fd(fd).is_err() {
        return Errno::EBADF.as_isize() as i64;
    }
    if fd == 0 {
        return 0; // no keyboard/tty stack behind stdin in this kernel
    }
    let handle = match fd_handle(fd) {
        Some(h) => h,
        None => return Errno::EBADF.as_isize() as i64,
    };
    let offset = with_current_fds(|fds| fds.offset(fd)).unwrap_or(0);
    let mut buf = vec![0u8; count];
    let n = fs::read_at(handle, buf.as_ptr() as u64, count, offset);
    if n == 0 {
        return 0;
    }
    match copy_to_user(buf_ptr as *mut u8, &buf[..n]) {
        Ok(()) => {
            with_current_fds(|fds| fds.advance_offset(fd, n as u64));
            n as i64
        }
        Err(e) => e.as_isize() as i64,
    }
}

fn sys_write(fd: i32, buf_ptr: u64, count: usize) -> i64 {
    if SyscallValidator::validate_fd(fd).is_err() {
        return Errno::EBADF.as_isize() as i64;
    }
    let buf = match copy_from_user(buf_ptr as *const u8, count) {
        Ok(b) => b,
        Err(e) => return e.as_isize() as i64,
    };
    if fd == 1 || fd == 2 {
        crate::arch::x86_64::serial::serial_write(&buf);
        return count as i64;
    }
    let handle = match fd_handle(fd) {
        Some(h) => h,
        None => return Errno::EBADF.as_isize() as i64,
    };
    let offset = with_current_fds(|fds| fds.offset(fd)).unwrap_or(0);
    let n = fs::write_at(handle, buf.as_ptr() as u64, count, offset);
    with_current_fds(|fds| fds.advance_offset(fd, n as u64));
    n as i64
}

fn sys_seek(fd: i32, position: u64) -> i64 {
    with_current_fds(|fds| fds.set_offset(fd, position));
    0
}

fn sys_tell(fd: i32) -> i64 {
    with_current_fds(|fds| fds.offset(fd)).unwrap_or(0) as i64
}

fn sys_close(fd: i32) -> i64 {
    let closed = with_current_fds(|fds| match fds.get(fd) {
        Some(handle) => {
            fds.close(fd);
            fs::close(handle);
            true
        }
        None => false,
    })
    .unwrap_or(false);
    if closed {
        0
    } else {
        -1
    }
}

fn sys_mmap(fd: i32, addr: u64, length: usize, writable: u64, offset: u64) -> i64 {
    let handle = match fd_handle(fd) {
        Some(h) => h,
        None => return 0,
    };
    match address_space::mmap(current_pid(), addr, length, writable != 0, handle, offset) {
        Some(mapped) => mapped as i64,
        None => 0,
    }
}

fn sys_munmap(addr: u64) -> i64 {
    if address_space::munmap(current_pid(), addr) {
        0
    } else {
        -1
    }
}

fn read_path(ptr: u64) -> Result<String, Errno> {
    SyscallValidator::validate_path(ptr as *const u8)?;
    copy_string_from_user(ptr as *const u8, validation::MAX_PATH_LEN)
}

fn fd_handle(fd: i32) -> Option<FileHandle> {
    with_current_fds(|fds| fds.get(fd)).flatten()
}

fn with_current_fds<R>(f: impl FnOnce(&mut task::FdTable) -> R) -> Option<R> {
    task::with_process(current_pid(), |p| f(&mut p.fds))
}
