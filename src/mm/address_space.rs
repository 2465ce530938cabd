//! Address-space operations (C11): fork's supplemental-page-table copy,
//! mmap/munmap, and the teardown half of process exit. Grounded on
//! `userprog/process.c`'s `supplemental_page_table_copy` and `vm/file.c`'s
//! `do_mmap`/`do_munmap`.
//!
//! One [`AddressSpace`] per thread that owns user memory, keyed the same way
//! [`crate::kernel::thread`] keys its table: by [`Tid`], behind one lock.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use x86_64::structures::paging::PageTableFlags;
use x86_64::{PhysAddr, VirtAddr};

use crate::arch::x86_64::paging::PageTableManager;
use crate::kernel::thread::{self, Tid};
use crate::mm::fs::FileHandle;
use crate::mm::page::{FileData, Page, PageKind, Va};
use crate::mm::palloc::PAGE_SIZE;
use crate::mm::spt::SupplementalPageTable;
use spin::Mutex;

/// Top of the user stack region (canonical lower-half address, just below
/// the conventional kernel/user split at `0x0000_8000_0000_0000`).
pub const USER_STACK_TOP: u64 = 0x0000_7fff_ffff_f000;
pub const KERNEL_VA_START: u64 = 0xffff_8000_0000_0000;
pub const STACK_GROWTH_LIMIT: u64 = 1 << 20;

struct MmapRegion {
    start: Va,
    page_count: usize,
}

pub struct AddressSpace {
    pub spt: SupplementalPageTable,
    pub pml4: Option<u64>,
    mmaps: Vec<MmapRegion>,
}

impl AddressSpace {
    fn new() -> Self {
        AddressSpace { spt: SupplementalPageTable::new(), pml4: None, mmaps: Vec::new() }
    }
}

static SPACES: Mutex<BTreeMap<Tid, AddressSpace>> = Mutex::new(BTreeMap::new());

/// Allocate a fresh PML4 (with the kernel half already present, see
/// `paging::copy_kernel_half`) and register both the `AddressSpace` and a
/// quick-access copy on the `Thread` itself, so the scheduler can read it on
/// every context switch without taking this module's lock.
pub fn create_for(tid: Tid) {
    let pml4 = unsafe { PageTableManager::new_address_space() }
        .ok()
        .map(|ptm| ptm.pml4_phys_value());
    let mut space = AddressSpace::new();
    space.pml4 = pml4;
    SPACES.lock().insert(tid, space);
    thread::with_thread(tid, |t| t.pml4 = pml4);
}

/// Process exit's memory teardown: write back dirty file-backed pages,
/// free the hardware page-table hierarchy, and drop every entry.
pub fn destroy_for(tid: Tid) {
    if let Some(mut space) = SPACES.lock().remove(&tid) {
        space.spt.kill();
        if let Some(pml4) = space.pml4 {
            unsafe { PageTableManager::from_pml4_phys(pml4).destroy() };
        }
    }
}

pub fn with_spt<R>(tid: Tid, f: impl FnOnce(&mut SupplementalPageTable) -> R) -> Option<R> {
    let mut spaces = SPACES.lock();
    spaces.get_mut(&tid).map(|space| f(&mut space.spt))
}

fn pml4_of(tid: Tid) -> Option<u64> {
    SPACES.lock().get(&tid).and_then(|s| s.pml4)
}

/// Install (or update) the hardware mapping for `va` in `tid`'s address
/// space, pointing at `frame`. This is the only place outside `munmap`
/// that touches the page-table hierarchy directly, matching the invariant
/// that `page.frame.is_some()` iff a hardware mapping for that page exists.
pub fn map_hw(tid: Tid, va: Va, frame: u64, writable: bool) -> bool {
    let Some(pml4) = pml4_of(tid) else { return false };
    let mut flags = PageTableFlags::USER_ACCESSIBLE;
    if writable {
        flags |= PageTableFlags::WRITABLE;
    }
    unsafe {
        let mut ptm = PageTableManager::from_pml4_phys(pml4);
        ptm.map_page(VirtAddr::new(va), PhysAddr::new(frame), flags).is_ok()
    }
}

/// Clear the hardware mapping for `va` in `tid`'s address space, if any.
/// Safe to call on a page that was never mapped.
pub fn unmap_hw(tid: Tid, va: Va) {
    let Some(pml4) = pml4_of(tid) else { return };
    unsafe {
        let mut ptm = PageTableManager::from_pml4_phys(pml4);
        let _ = ptm.unmap_page(VirtAddr::new(va));
    }
}

/// Called from [`crate::mm::palloc::evict`] when a frame owned by
/// `(tid, va)` has been chosen as the eviction victim. Clears the hardware
/// mapping first so no stale translation survives the frame being handed to
/// another owner.
pub fn swap_out_owner(owner: (Tid, Va)) -> bool {
    let (tid, va) = owner;
    let ok = with_spt(tid, |spt| match spt.find_page_mut(va) {
        Some(page) => page.swap_out(),
        None => false,
    })
    .unwrap_or(false);
    if ok {
        unmap_hw(tid, va);
    }
    ok
}

/// Mark a file-backed page dirty. The fault handler calls this whenever it
/// grants (or already finds) a writable mapping and the caller is about to
/// write through it -- a software stand-in for the hardware dirty bit this
/// kernel has no per-process page table to query.
pub fn mark_dirty(tid: Tid, va: Va) {
    with_spt(tid, |spt| {
        if let Some(page) = spt.find_page_mut(va) {
            if let crate::mm::page::PageData::File(file) = &mut page.data {
                file.dirty = true;
            }
        }
    });
}

/// Copy `src`'s supplemental page table into `dst`, sharing frames
/// copy-on-write for anonymous and file-backed pages. Called by `fork`
/// before the child thread is made runnable.
pub fn fork(src: Tid, dst: Tid) -> bool {
    let entries: Vec<(Va, bool, bool, PageKind)> = match with_spt(src, |spt| {
        spt.iter().map(|(va, p)| (*va, p.writable, p.original_writable, p.kind())).collect()
    }) {
        Some(v) => v,
        None => return false,
    };

    for (va, writable, original_writable, kind) in entries {
        match kind {
            PageKind::Uninit => {
                // Deferred initializers aren't `Clone`; re-run identical lazy
                // work in the child on its own first fault instead of
                // cloning the closure.
                continue;
            }
            PageKind::Anon => {
                let frame = with_spt(src, |spt| spt.find_page(va).and_then(|p| p.frame));
                let mut child_page = Page::new_anon(va, false);
                child_page.original_writable = original_writable;
                if let Some(frame) = frame {
                    crate::mm::palloc::frame_incref(frame);
                    child_page.frame = Some(frame);
                    // Both parent and child lose write access until the
                    // next write fault resolves the copy-on-write.
                    with_spt(src, |spt| {
                        if let Some(p) = spt.find_page_mut(va) {
                            p.writable = false;
                        }
                    });
                    map_hw(src, va, frame, false);
                    map_hw(dst, va, frame, false);
                }
                with_spt(dst, |spt| spt.insert_page(child_page));
            }
            PageKind::File => {
                let (frame, cloned) = with_spt(src, |spt| {
                    spt.find_page(va).map(|p| {
                        let frame = p.frame;
                        let cloned = if let crate::mm::page::PageData::File(f) = &p.data {
                            Some(FileData {
                                file: crate::mm::fs::reopen(f.file).unwrap_or(f.file),
                                offset: f.offset,
                                read_bytes: f.read_bytes,
                                start_addr: f.start_addr,
                                mapping_size: f.mapping_size,
                                dirty: f.dirty,
                            })
                        } else {
                            None
                        };
                        (frame, cloned)
                    })
                })
                .flatten()
                .unzip();
                let frame = frame.flatten();
                if let Some(file_data) = cloned.flatten() {
                    let mut child_page = Page::new_file(va, false, file_data);
                    child_page.original_writable = original_writable;
                    if let Some(frame) = frame {
                        crate::mm::palloc::frame_incref(frame);
                        child_page.frame = Some(frame);
                        with_spt(src, |spt| {
                            if let Some(p) = spt.find_page_mut(va) {
                                p.writable = false;
                            }
                        });
                        map_hw(src, va, frame, false);
                        map_hw(dst, va, frame, false);
                    }
                    with_spt(dst, |spt| spt.insert_page(child_page));
                }
            }
        }
        let _ = writable;
    }
    true
}

/// Map `[addr, addr + min(length, file_size - offset))` into `tid`'s address
/// space from `file`, each page an `Uninit` page whose initializer reads the
/// right slice and zeros the tail. Rejects the cases enumerated in C11.
pub fn mmap(
    tid: Tid,
    addr: Va,
    length: usize,
    writable: bool,
    file: FileHandle,
    offset: u64,
) -> Option<Va> {
    if addr == 0 || addr >= KERNEL_VA_START || addr % PAGE_SIZE as u64 != 0 {
        return None;
    }
    if length == 0 || offset % PAGE_SIZE as u64 != 0 {
        return None;
    }
    let file_size = crate::mm::fs::length(file);
    if file_size == 0 || offset >= file_size {
        return None;
    }

    let mapped_len = core::cmp::min(length as u64, file_size - offset) as usize;
    let page_count = (mapped_len + PAGE_SIZE - 1) / PAGE_SIZE;

    // Reject overlap with any existing mapping in this address space.
    let overlaps = with_spt(tid, |spt| {
        (0..page_count).any(|i| spt.find_page(addr + (i * PAGE_SIZE) as u64).is_some())
    })
    .unwrap_or(true);
    if overlaps {
        return None;
    }

    let reopened = crate::mm::fs::reopen(file)?;

    let mut remaining = mapped_len;
    let mut cursor = addr;
    let mut file_off = offset;
    while remaining > 0 {
        let read_bytes = core::cmp::min(PAGE_SIZE, remaining) as u32;
        let file_data = FileData {
            file: reopened,
            offset: file_off,
            read_bytes,
            start_addr: addr,
            mapping_size: mapped_len as u32,
            dirty: false,
        };
        let page = Page::new_file(cursor, writable, file_data);
        with_spt(tid, |spt| spt.insert_page(page));
        cursor += PAGE_SIZE as u64;
        file_off += read_bytes as u64;
        remaining = remaining.saturating_sub(read_bytes as usize);
    }

    let mut spaces = SPACES.lock();
    if let Some(space) = spaces.get_mut(&tid) {
        space.mmaps.push(MmapRegion { start: addr, page_count });
    }
    Some(addr)
}

/// `addr` must be the start address of a prior mapping. Writes back dirty
/// pages, clears the hardware mapping for each page, clears the SPT
/// entries (which frees the backing frame via `Page::destroy`), and
/// forgets the mapping.
///
/// Unmaps the hardware page table directly under the held `SPACES` lock
/// rather than through `unmap_hw`, which takes that same lock itself --
/// `SPACES` is a `spin::Mutex` and is not reentrant.
pub fn munmap(tid: Tid, addr: Va) -> bool {
    let mut spaces = SPACES.lock();
    let space = match spaces.get_mut(&tid) {
        Some(s) => s,
        None => return false,
    };
    let idx = match space.mmaps.iter().position(|m| m.start == addr) {
        Some(i) => i,
        None => return false,
    };
    let region = space.mmaps.remove(idx);
    let pml4 = space.pml4;
    for i in 0..region.page_count {
        let va = addr + (i * PAGE_SIZE) as u64;
        space.spt.remove_page(va);
        if let Some(pml4) = pml4 {
            unsafe {
                let mut ptm = PageTableManager::from_pml4_phys(pml4);
                let _ = ptm.unmap_page(VirtAddr::new(va));
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmap_rejects_unaligned_addr() {
        create_for(99);
        assert!(mmap(99, 0x1001, 4096, true, FileHandle(0), 0).is_none());
    }

    #[test]
    fn mmap_rejects_kernel_addr() {
        create_for(98);
        assert!(mmap(98, KERNEL_VA_START, 4096, true, FileHandle(0), 0).is_none());
    }
}
