//! Raw user-memory copies. Built on top of [`super::validation`]'s range
//! checks; actual access still relies on the fault handler to fill in pages
//! that exist in the supplemental page table but aren't yet resident.

use alloc::string::String;
use alloc::vec::Vec;
use core::ptr;

use crate::lib::error::{Errno, Result};
use crate::syscall::validation::SyscallValidator;

pub fn copy_from_user<T: Copy>(user_ptr: *const T, count: usize) -> Result<Vec<T>> {
    SyscallValidator::validate_user_ptr(user_ptr, count * core::mem::size_of::<T>())?;
    if count == 0 {
        return Ok(Vec::new());
    }
    let mut buf = Vec::with_capacity(count);
    unsafe {
        ptr::copy_nonoverlapping(user_ptr, buf.as_mut_ptr(), count);
        buf.set_len(count);
    }
    Ok(buf)
}

pub fn copy_to_user<T: Copy>(user_ptr: *mut T, data: &[T]) -> Result<()> {
    SyscallValidator::validate_user_ptr_mut(user_ptr, data.len() * core::mem::size_of::<T>())?;
    if data.is_empty() {
        return Ok(());
    }
    unsafe {
        ptr::copy_nonoverlapping(data.as_ptr(), user_ptr, data.len());
    }
    Ok(())
}

pub fn copy_string_from_user(user_ptr: *const u8, max_len: usize) -> Result<String> {
    SyscallValidator::validate_string_ptr(user_ptr, max_len)?;
    let mut bytes = Vec::new();
    unsafe {
        for i in 0..max_len {
            let byte = ptr::read(user_ptr.add(i));
            if byte == 0 {
                break;
            }
            bytes.push(byte);
        }
    }
    String::from_utf8(bytes).map_err(|_| Errno::EINVAL)
}
