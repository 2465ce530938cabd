//! Swap layer: a flat array of 4 KiB slots on the block device registered as
//! channel (1, 1), guarded by a bitmap and a dedicated lock around both the
//! bitmap edit and the disk I/O it protects. Grounded on `vm/anon.c`'s
//! `swap_disk`/`swap_bitmap` pair.

use alloc::boxed::Box;
use alloc::vec;
use spin::Mutex;

use crate::mm::bitmap::Bitmap;
use crate::mm::palloc::PAGE_SIZE;

pub const SECTOR_SIZE: usize = 512;
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// Educational kernel's swap disk: 1 MiB, enough for a handful of evictions
/// under test without needing a real backing disk image.
const SWAP_SLOTS: usize = 256;

pub trait BlockDevice: Send + Sync {
    fn read_sectors(&self, sector: u64, buf: &mut [u8]);
    fn write_sectors(&self, sector: u64, buf: &[u8]);
}

/// RAM-backed stand-in for the channel (1, 1) swap disk. There is no durable
/// on-disk format here -- contents only need to survive one kernel boot.
struct RamDisk {
    sectors: Mutex<alloc::vec::Vec<u8>>,
}

impl RamDisk {
    fn new(total_sectors: usize) -> Self {
        RamDisk { sectors: Mutex::new(vec![0u8; total_sectors * SECTOR_SIZE]) }
    }
}

impl BlockDevice for RamDisk {
    fn read_sectors(&self, sector: u64, buf: &mut [u8]) {
        let disk = self.sectors.lock();
        let start = sector as usize * SECTOR_SIZE;
        buf.copy_from_slice(&disk[start..start + buf.len()]);
    }

    fn write_sectors(&self, sector: u64, buf: &[u8]) {
        let mut disk = self.sectors.lock();
        let start = sector as usize * SECTOR_SIZE;
        disk[start..start + buf.len()].copy_from_slice(buf);
    }
}

struct SwapState {
    bitmap: Bitmap,
    disk: Box<dyn BlockDevice>,
}

static SWAP: Mutex<Option<SwapState>> = Mutex::new(None);

pub fn init() {
    let disk = RamDisk::new(SWAP_SLOTS * SECTORS_PER_PAGE);
    *SWAP.lock() = Some(SwapState { bitmap: Bitmap::new(SWAP_SLOTS), disk: Box::new(disk) });
}

/// Write the page at `kva` to a freshly allocated slot. `PANIC`s when the
/// bitmap is exhausted, per the swap layer's own failure contract -- there is
/// nowhere else to put the page.
pub fn swap_out(kva: u64) -> Option<usize> {
    let mut guard = SWAP.lock();
    let state = guard.as_mut().expect("swap::init not called");
    let slot = match state.bitmap.scan_and_flip() {
        Some(slot) => slot,
        None => panic!("swap space exhausted"),
    };
    let page = unsafe { core::slice::from_raw_parts(kva as *const u8, PAGE_SIZE) };
    for i in 0..SECTORS_PER_PAGE {
        let sector_off = i * SECTOR_SIZE;
        state.disk.write_sectors(
            (slot * SECTORS_PER_PAGE + i) as u64,
            &page[sector_off..sector_off + SECTOR_SIZE],
        );
    }
    Some(slot)
}

/// Read `slot` back into `kva` and free it.
pub fn swap_in(slot: usize, kva: u64) -> bool {
    let mut guard = SWAP.lock();
    let state = guard.as_mut().expect("swap::init not called");
    if !state.bitmap.test(slot) {
        return false;
    }
    let page = unsafe { core::slice::from_raw_parts_mut(kva as *mut u8, PAGE_SIZE) };
    for i in 0..SECTORS_PER_PAGE {
        let sector_off = i * SECTOR_SIZE;
        state
            .disk
            .read_sectors((slot * SECTORS_PER_PAGE + i) as u64, &mut page[sector_off..sector_off + SECTOR_SIZE]);
    }
    state.bitmap.set(slot, false);
    true
}

/// Release a slot without reading it back (used by `anon_destroy` when a
/// page is torn down while still swapped out).
pub fn free_slot(slot: usize) {
    let mut guard = SWAP.lock();
    if let Some(state) = guard.as_mut() {
        state.bitmap.set(slot, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_page() {
        init();
        let page = Box::new([0xABu8; PAGE_SIZE]);
        let kva = page.as_ptr() as u64;
        let slot = swap_out(kva).unwrap();

        let mut back = Box::new([0u8; PAGE_SIZE]);
        let back_kva = back.as_mut_ptr() as u64;
        assert!(swap_in(slot, back_kva));
        assert_eq!(&back[..], &[0xABu8; PAGE_SIZE][..]);
    }
}
