//! Frame table (C6) and the page-granular physical allocator backing it.
//! Grounded on `vm/vm.c`'s `vm_get_frame` / `vm_evict_frame` / `frame_list`,
//! adapted from Pintos's real-physical-memory `palloc_get_page` to a static
//! pool carved out of the kernel image, since this kernel has no bootloader
//! memory map to parse.
//!
//! Kept deliberately separate from [`crate::heap`]: the heap backs
//! kernel-metadata allocations (`Box`, `Vec`, the supplemental page table
//! itself); this pool backs user pages and is the thing eviction reclaims.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use spin::Mutex;

use crate::kernel::thread::Tid;
use crate::mm::bitmap::Bitmap;
use crate::mm::page::Va;

pub const PAGE_SIZE: usize = 4096;

/// 4 MiB user pool -- enough pages to demonstrate eviction under load
/// without needing real memory-map discovery.
const POOL_PAGES: usize = 1024;

#[repr(align(4096))]
struct Pool([u8; POOL_PAGES * PAGE_SIZE]);

static mut USER_POOL: Pool = Pool([0u8; POOL_PAGES * PAGE_SIZE]);

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        const ZERO = 1 << 0;
        const USER = 1 << 1;
    }
}

pub trait PageAllocator: Send + Sync {
    fn palloc_get_page(&self, flags: AllocFlags) -> Option<u64>;
    fn palloc_free_page(&self, kva: u64);
}

struct BitmapPool {
    base: u64,
    bitmap: Mutex<Bitmap>,
}

impl PageAllocator for BitmapPool {
    fn palloc_get_page(&self, flags: AllocFlags) -> Option<u64> {
        let idx = self.bitmap.lock().scan_and_flip()?;
        let kva = self.base + (idx * PAGE_SIZE) as u64;
        if flags.contains(AllocFlags::ZERO) {
            unsafe { core::ptr::write_bytes(kva as *mut u8, 0, PAGE_SIZE) };
        }
        Some(kva)
    }

    fn palloc_free_page(&self, kva: u64) {
        let idx = ((kva - self.base) / PAGE_SIZE as u64) as usize;
        self.bitmap.lock().set(idx, false);
    }
}

static POOL: Mutex<Option<BitmapPool>> = Mutex::new(None);

struct Frame {
    kva: u64,
    owner: Option<(Tid, Va)>,
    refcount: u32,
}

struct FrameTable {
    frames: BTreeMap<u64, Frame>,
    /// Eviction order: the head is the next victim, per the frame table's
    /// FIFO policy.
    fifo: VecDeque<u64>,
}

static FRAMES: Mutex<FrameTable> =
    Mutex::new(FrameTable { frames: BTreeMap::new(), fifo: VecDeque::new() });

/// Reserve the user pool and reset the frame table. Called once during boot,
/// after the heap (the frame table's `BTreeMap`/`VecDeque` live on it) and
/// before the scheduler creates any thread that might fault.
pub fn init() -> Result<(), &'static str> {
    let base = core::ptr::addr_of!(USER_POOL) as u64;
    *POOL.lock() = Some(BitmapPool { base, bitmap: Mutex::new(Bitmap::new(POOL_PAGES)) });
    let mut table = FRAMES.lock();
    table.frames.clear();
    table.fifo.clear();
    Ok(())
}

fn pool_get(flags: AllocFlags) -> Option<u64> {
    POOL.lock().as_ref().expect("palloc::init not called").palloc_get_page(flags)
}

fn pool_free(kva: u64) {
    POOL.lock().as_ref().expect("palloc::init not called").palloc_free_page(kva)
}

/// Generic `palloc_get_page`/`palloc_free_page` surface (used directly by
/// the architecture paging code for page-table nodes, which don't go through
/// the frame table's refcount/eviction bookkeeping).
pub fn alloc_page() -> Option<u64> {
    pool_get(AllocFlags::ZERO)
}

pub fn free_page(kva: u64) {
    pool_free(kva);
}

/// Obtain a user-pool frame for `owner` (the faulting page's (thread, va)),
/// evicting the FIFO victim if the pool is full. Always returns a valid
/// frame: eviction only fails if nothing is tracked in the frame table,
/// which would mean the pool was never actually exhausted.
pub fn frame_alloc(owner: (Tid, Va)) -> Option<u64> {
    let kva = match pool_get(AllocFlags::ZERO.union(AllocFlags::USER)) {
        Some(kva) => kva,
        None => evict()?,
    };
    let mut table = FRAMES.lock();
    table.frames.insert(kva, Frame { kva, owner: Some(owner), refcount: 1 });
    table.fifo.push_back(kva);
    Some(kva)
}

/// Increment a frame's refcount (CoW sharing on fork).
pub fn frame_incref(kva: u64) {
    let mut table = FRAMES.lock();
    if let Some(frame) = table.frames.get_mut(&kva) {
        frame.refcount += 1;
    }
}

pub fn frame_refcount(kva: u64) -> u32 {
    FRAMES.lock().frames.get(&kva).map(|f| f.refcount).unwrap_or(0)
}

pub fn frame_owner(kva: u64) -> Option<(Tid, Va)> {
    FRAMES.lock().frames.get(&kva).and_then(|f| f.owner)
}

pub fn set_frame_owner(kva: u64, owner: (Tid, Va)) {
    if let Some(frame) = FRAMES.lock().frames.get_mut(&kva) {
        frame.owner = Some(owner);
    }
}

/// Decrement a frame's refcount; at zero, drop it from the FIFO list and
/// release the physical page. Every frame on the FIFO list is owned by
/// exactly one logical page -- CoW-shared frames are refcounted but only
/// ever sit on one owner's FIFO entry at a time.
pub fn free_frame(kva: u64) {
    let mut table = FRAMES.lock();
    let done = match table.frames.get_mut(&kva) {
        Some(frame) => {
            frame.refcount = frame.refcount.saturating_sub(1);
            frame.refcount == 0
        }
        None => return,
    };
    if done {
        table.frames.remove(&kva);
        table.fifo.retain(|k| *k != kva);
        drop(table);
        pool_free(kva);
    }
}

/// Pop the FIFO head, ask its owning page to swap itself out, then hand the
/// freed frame back to the caller (zeroed) as the newly claimed frame.
fn evict() -> Option<u64> {
    let victim_kva = {
        let mut table = FRAMES.lock();
        table.fifo.pop_front()?
    };
    let owner = frame_owner(victim_kva)?;
    let swapped = crate::mm::address_space::swap_out_owner(owner);
    if !swapped {
        // Put it back at the tail and give up; caller will see allocation
        // failure rather than silently dropping data.
        FRAMES.lock().fifo.push_back(victim_kva);
        return None;
    }
    let mut table = FRAMES.lock();
    table.frames.remove(&victim_kva);
    drop(table);
    unsafe { core::ptr::write_bytes(victim_kva as *mut u8, 0, PAGE_SIZE) };
    Some(victim_kva)
}

pub fn frame_table_len() -> usize {
    FRAMES.lock().frames.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_round_trip() {
        let _ = init();
        let kva = frame_alloc((1, 0x1000)).unwrap();
        assert_eq!(frame_refcount(kva), 1);
        free_frame(kva);
        assert_eq!(frame_table_len(), 0);
    }

    #[test]
    fn shared_frame_survives_one_free() {
        let _ = init();
        let kva = frame_alloc((1, 0x2000)).unwrap();
        frame_incref(kva);
        free_frame(kva);
        assert_eq!(frame_refcount(kva), 1);
        free_frame(kva);
        assert_eq!(frame_table_len(), 0);
    }
}
