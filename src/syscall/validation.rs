//! Syscall argument validation, kept separate from dispatch so each
//! handler states its preconditions instead of re-deriving them.

use crate::lib::error::{Errno, Result};
use crate::mm::address_space::KERNEL_VA_START;

/// Largest single read/write this kernel will attempt in one syscall.
pub const MAX_IO_SIZE: usize = 64 * 1024 * 1024;

/// Longest path string `open`/`create`/`remove` will read from user memory.
pub const MAX_PATH_LEN: usize = 4096;

/// Highest file descriptor a process may hold open at once.
pub const MAX_FD: i32 = 256;

pub type ValidationResult<T> = Result<T>;

pub struct SyscallValidator;

impl SyscallValidator {
    #[inline]
    pub fn validate_fd(fd: i32) -> ValidationResult<i32> {
        if fd < 0 || fd >= MAX_FD {
            return Err(Errno::EBADF);
        }
        Ok(fd)
    }

    /// Reject null, kernel-half, and wrap-around user pointers. Does not
    /// check that the range is actually mapped -- that's the fault
    /// handler's job once the access is attempted.
    #[inline]
    pub fn validate_user_ptr<T>(ptr: *const T, len: usize) -> ValidationResult<*const T> {
        let addr = ptr as u64;
        if addr == 0 {
            return Err(Errno::EFAULT);
        }
        if addr >= KERNEL_VA_START {
            return Err(Errno::EFAULT);
        }
        let end = addr.checked_add(len as u64).ok_or(Errno::EFAULT)?;
        if end > KERNEL_VA_START {
            return Err(Errno::EFAULT);
        }
        Ok(ptr)
    }

    #[inline]
    pub fn validate_user_ptr_mut<T>(ptr: *mut T, len: usize) -> ValidationResult<*mut T> {
        Self::validate_user_ptr(ptr as *const T, len)?;
        Ok(ptr)
    }

    #[inline]
    pub fn validate_read_buffer(ptr: *const u8, len: usize) -> ValidationResult<(*const u8, usize)> {
        if len > MAX_IO_SIZE {
            return Err(Errno::EINVAL);
        }
        Self::validate_user_ptr(ptr, len)?;
        Ok((ptr, len))
    }

    #[inline]
    pub fn validate_write_buffer(ptr: *mut u8, len: usize) -> ValidationResult<(*mut u8, usize)> {
        if len > MAX_IO_SIZE {
            return Err(Errno::EINVAL);
        }
        Self::validate_user_ptr_mut(ptr, len)?;
        Ok((ptr, len))
    }

    /// Validate a NUL-terminated string pointer, returning once the
    /// terminator is found within `max_len`.
    pub fn validate_string_ptr(ptr: *const u8, max_len: usize) -> ValidationResult<*const u8> {
        if ptr.is_null() {
            return Err(Errno::EFAULT);
        }
        Self::validate_user_ptr(ptr, max_len)?;
        unsafe {
            for i in 0..max_len {
                if ptr.add(i).read_volatile() == 0 {
                    return Ok(ptr);
                }
            }
        }
        Err(Errno::ENAMETOOLONG)
    }

    #[inline]
    pub fn validate_path(ptr: *const u8) -> ValidationResult<*const u8> {
        Self::validate_string_ptr(ptr, MAX_PATH_LEN)
    }

    #[inline]
    pub fn validate_whence(whence: i32) -> ValidationResult<i32> {
        match whence {
            0 | 1 | 2 => Ok(whence),
            _ => Err(Errno::EINVAL),
        }
    }

    #[inline]
    pub fn validate_size(size: usize, max_size: usize) -> ValidationResult<usize> {
        if size > max_size {
            return Err(Errno::EINVAL);
        }
        Ok(size)
    }

    #[inline]
    pub fn validate_alignment(addr: u64, alignment: usize) -> ValidationResult<u64> {
        if addr % alignment as u64 != 0 {
            return Err(Errno::EINVAL);
        }
        Ok(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_null_pointer() {
        assert!(SyscallValidator::validate_user_ptr::<u8>(core::ptr::null(), 1).is_err());
    }

    #[test]
    fn rejects_kernel_half_pointer() {
        let ptr = KERNEL_VA_START as *const u8;
        assert!(SyscallValidator::validate_user_ptr(ptr, 1).is_err());
    }

    #[test]
    fn accepts_in_range_pointer() {
        let ptr = 0x1000_u64 as *const u8;
        assert!(SyscallValidator::validate_user_ptr(ptr, 64).is_ok());
    }

    #[test]
    fn rejects_oversized_io() {
        let ptr = 0x1000_u64 as *const u8;
        assert!(SyscallValidator::validate_read_buffer(ptr, MAX_IO_SIZE + 1).is_err());
    }
}
