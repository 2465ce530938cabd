//! Page-fault resolution policy (C10). Grounded on `vm/vm.c`'s
//! `vm_try_handle_fault`: stack growth, copy-on-write, and first-touch
//! claiming all funnel through here, called from the architecture's
//! `#PF` handler with the four booleans x86_64 already decodes from the
//! error code.

use crate::kernel::thread::{self, Tid};
use crate::mm::address_space::{self, KERNEL_VA_START, STACK_GROWTH_LIMIT, USER_STACK_TOP};
use crate::mm::page::Page;
use crate::mm::palloc::{self, PAGE_SIZE};

fn round_down(addr: u64) -> u64 {
    addr & !((PAGE_SIZE as u64) - 1)
}

/// Resolve one page fault. Returns `true` if the fault was handled and the
/// faulting instruction can be retried; `false` means the access was
/// invalid and the caller should kill the process (or panic, at boot).
pub fn handle_page_fault(fault_addr: u64, write: bool, user: bool, present: bool) -> bool {
    if user && fault_addr >= KERNEL_VA_START {
        return false;
    }

    let tid = thread::current_tid();
    let page_addr = round_down(fault_addr);

    let found = address_space::with_spt(tid, |spt| spt.find_page(page_addr).is_some())
        .unwrap_or(false);

    if !found {
        return try_stack_growth(tid, fault_addr);
    }

    if write && present {
        return handle_cow(tid, page_addr);
    }

    if present {
        return false;
    }

    let read_only = address_space::with_spt(tid, |spt| {
        spt.find_page(page_addr).map(|p| write && !p.writable)
    })
    .flatten()
    .unwrap_or(false);
    if read_only {
        return false;
    }

    claim_page(tid, page_addr)
}

/// Stack-growth heuristic: fault is within the user stack region, at or
/// above `rsp - 8`, and within `STACK_GROWTH_LIMIT` of the stack's top.
fn try_stack_growth(tid: Tid, fault_addr: u64) -> bool {
    let rsp = current_rsp(tid);
    if fault_addr >= USER_STACK_TOP {
        return false;
    }
    if fault_addr < rsp.saturating_sub(8) {
        return false;
    }
    if fault_addr < USER_STACK_TOP.saturating_sub(STACK_GROWTH_LIMIT) {
        return false;
    }

    let mut page_addr = round_down(fault_addr);
    loop {
        let exists = address_space::with_spt(tid, |spt| spt.find_page(page_addr).is_some())
            .unwrap_or(true);
        if exists {
            break;
        }
        let page = Page::new_anon(page_addr, true);
        let inserted = address_space::with_spt(tid, |spt| spt.insert_page(page)).unwrap_or(false);
        if !inserted {
            return false;
        }
        if !claim_page(tid, page_addr) {
            return false;
        }
        if page_addr >= round_down(USER_STACK_TOP - 1) {
            break;
        }
        page_addr += PAGE_SIZE as u64;
    }
    true
}

/// The `rsp` the current thread last trapped into the kernel from. Recorded
/// by the syscall entry on every crossing; zero for a thread that has never
/// trapped from user mode yet, in which case the whole stack region is
/// treated as fair game for growth.
fn current_rsp(tid: Tid) -> u64 {
    match thread::with_thread(tid, |t| t.user_rsp) {
        Some(rsp) if rsp != 0 => rsp,
        _ => USER_STACK_TOP,
    }
}

/// Write to a copy-on-write page: if the frame is shared, copy it into a
/// fresh frame before granting write access; if it was never really
/// writable, fail.
fn handle_cow(tid: Tid, page_addr: u64) -> bool {
    let (original_writable, frame) = match address_space::with_spt(tid, |spt| {
        spt.find_page(page_addr).map(|p| (p.original_writable, p.frame))
    })
    .flatten()
    {
        Some(v) => v,
        None => return false,
    };
    if !original_writable {
        return false;
    }
    let frame = match frame {
        Some(f) => f,
        None => return claim_page(tid, page_addr),
    };

    let mapped_frame = if palloc::frame_refcount(frame) > 1 {
        let new_frame = match palloc::frame_alloc((tid, page_addr)) {
            Some(f) => f,
            None => return false,
        };
        unsafe {
            core::ptr::copy_nonoverlapping(frame as *const u8, new_frame as *mut u8, PAGE_SIZE);
        }
        palloc::free_frame(frame);
        address_space::with_spt(tid, |spt| {
            if let Some(p) = spt.find_page_mut(page_addr) {
                p.frame = Some(new_frame);
            }
        });
        new_frame
    } else {
        frame
    };
    if !address_space::map_hw(tid, page_addr, mapped_frame, true) {
        return false;
    }
    address_space::with_spt(tid, |spt| {
        if let Some(p) = spt.find_page_mut(page_addr) {
            p.writable = true;
        }
    });
    address_space::mark_dirty(tid, page_addr);
    true
}

/// Not-present fault on a found page: allocate a frame, link it both ways,
/// run the page-kind `swap_in` to populate its contents, then install the
/// hardware mapping so the faulting instruction can be retried.
fn claim_page(tid: Tid, page_addr: u64) -> bool {
    let frame = match palloc::frame_alloc((tid, page_addr)) {
        Some(f) => f,
        None => return false,
    };
    let writable = address_space::with_spt(tid, |spt| match spt.find_page_mut(page_addr) {
        Some(page) => {
            page.frame = Some(frame);
            if page.swap_in(frame) {
                Some(page.writable)
            } else {
                None
            }
        }
        None => None,
    })
    .flatten();
    let ok = match writable {
        Some(writable) => address_space::map_hw(tid, page_addr, frame, writable),
        None => false,
    };
    if !ok {
        palloc::free_frame(frame);
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::{address_space, palloc, swap};

    fn setup(tid: Tid) {
        let _ = palloc::init();
        swap::init();
        address_space::create_for(tid);
    }

    #[test]
    fn not_present_claim_populates_zeroed_anon_page() {
        let tid = 201;
        setup(tid);
        address_space::with_spt(tid, |spt| spt.insert_page(Page::new_anon(0x4000, true)));
        assert!(handle_page_fault(0x4000, false, true, false));
    }

    #[test]
    fn missing_page_outside_stack_fails() {
        let tid = 202;
        setup(tid);
        assert!(!handle_page_fault(0x10, false, true, false));
    }

    #[test]
    fn user_access_to_kernel_va_fails() {
        let tid = 203;
        setup(tid);
        assert!(!handle_page_fault(KERNEL_VA_START + 0x10, false, true, false));
    }
}
