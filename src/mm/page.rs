//! Logical page: the supplemental page table's unit of bookkeeping, in the
//! three flavors from `vm/uninit.c`, `vm/anon.c` and `vm/file.c`. Every page
//! carries a `PageData` (the kind-specific state) behind one `swap_in` /
//! `swap_out` / `destroy` vector, so the fault handler and the frame table's
//! evictor never need to know which kind they're touching.

use alloc::boxed::Box;

use crate::mm::fs::FileHandle;
use crate::mm::{palloc, swap};

pub type Va = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Uninit,
    Anon,
    File,
}

/// Deferred first-touch initializer for a page created with
/// `alloc_page_with_initializer`. Runs once, the first time the page is
/// claimed, then the page is converted in place to `target_kind`.
pub type Initializer = Box<dyn FnMut(&mut AnonData, &mut FileData, u64) -> bool + Send>;

pub struct UninitData {
    pub target_kind: PageKind,
    pub init: Initializer,
}

#[derive(Default)]
pub struct AnonData {
    pub swap_slot: Option<usize>,
}

pub struct FileData {
    pub file: FileHandle,
    pub offset: u64,
    pub read_bytes: u32,
    pub start_addr: Va,
    pub mapping_size: u32,
    /// Software dirty flag. There is no per-process hardware page table in
    /// this kernel to query a real PTE dirty bit from, so the fault handler
    /// sets this directly whenever it grants a write mapping.
    pub dirty: bool,
}

pub enum PageData {
    Uninit(UninitData),
    Anon(AnonData),
    File(FileData),
}

pub struct Page {
    pub va: Va,
    pub writable: bool,
    pub original_writable: bool,
    /// Kernel virtual address of the backing frame, once claimed.
    pub frame: Option<u64>,
    pub data: PageData,
}

impl Page {
    pub fn new_uninit(va: Va, writable: bool, target_kind: PageKind, init: Initializer) -> Self {
        Page {
            va,
            writable,
            original_writable: writable,
            frame: None,
            data: PageData::Uninit(UninitData { target_kind, init }),
        }
    }

    pub fn new_anon(va: Va, writable: bool) -> Self {
        Page {
            va,
            writable,
            original_writable: writable,
            frame: None,
            data: PageData::Anon(AnonData::default()),
        }
    }

    pub fn new_file(va: Va, writable: bool, file: FileData) -> Self {
        Page {
            va,
            writable,
            original_writable: writable,
            frame: None,
            data: PageData::File(file),
        }
    }

    pub fn kind(&self) -> PageKind {
        match &self.data {
            PageData::Uninit(u) => u.target_kind,
            PageData::Anon(_) => PageKind::Anon,
            PageData::File(_) => PageKind::File,
        }
    }

    /// Populate `kva` with this page's contents. For an `Uninit` page this
    /// runs the deferred initializer and converts `self.data` to the target
    /// kind in place -- the classic "lazy loading completes on first fault".
    pub fn swap_in(&mut self, kva: u64) -> bool {
        match &mut self.data {
            PageData::Uninit(u) => {
                let mut anon = AnonData::default();
                let mut file_stub = FileData {
                    file: FileHandle::INVALID,
                    offset: 0,
                    read_bytes: 0,
                    start_addr: self.va,
                    mapping_size: 0,
                    dirty: false,
                };
                let ok = (u.init)(&mut anon, &mut file_stub, kva);
                if !ok {
                    return false;
                }
                self.data = match u.target_kind {
                    PageKind::Anon => PageData::Anon(anon),
                    PageKind::File => PageData::File(file_stub),
                    PageKind::Uninit => unreachable!("uninit page cannot target itself"),
                };
                true
            }
            PageData::Anon(anon) => anon_swap_in(anon, kva),
            PageData::File(file) => file_swap_in(file, kva),
        }
    }

    /// Write this page's frame contents out so the frame can be reused.
    /// Clears `self.frame`'s hardware mapping is the caller's job (the
    /// fault/eviction path owns the page table); this only handles the
    /// kind-specific backing store.
    pub fn swap_out(&mut self) -> bool {
        let kva = match self.frame {
            Some(kva) => kva,
            None => return false,
        };
        let ok = match &mut self.data {
            PageData::Uninit(_) => true, // never claimed, nothing to write back
            PageData::Anon(anon) => anon_swap_out(anon, kva),
            PageData::File(file) => file_swap_out(file, kva, self.writable),
        };
        if ok {
            self.frame = None;
        }
        ok
    }

    /// Release all resources: frame (refcount-aware), swap slot, and for
    /// file-backed pages a final write-back if dirty.
    pub fn destroy(&mut self) {
        match &mut self.data {
            PageData::Uninit(_) => {}
            PageData::Anon(anon) => {
                if let Some(kva) = self.frame.take() {
                    palloc::free_frame(kva);
                }
                if let Some(slot) = anon.swap_slot.take() {
                    swap::free_slot(slot);
                }
            }
            PageData::File(file) => {
                if self.writable {
                    if let Some(kva) = self.frame {
                        file_swap_out(file, kva, true);
                    }
                }
                if let Some(kva) = self.frame.take() {
                    palloc::free_frame(kva);
                }
            }
        }
    }
}

fn anon_swap_in(anon: &mut AnonData, kva: u64) -> bool {
    match anon.swap_slot.take() {
        Some(slot) => swap::swap_in(slot, kva),
        // First touch of a zero-filled anonymous page.
        None => {
            zero_page(kva);
            true
        }
    }
}

fn anon_swap_out(anon: &mut AnonData, kva: u64) -> bool {
    match swap::swap_out(kva) {
        Some(slot) => {
            anon.swap_slot = Some(slot);
            true
        }
        None => false,
    }
}

fn file_swap_in(file: &mut FileData, kva: u64) -> bool {
    let read = crate::mm::fs::read_at(file.file, kva, file.read_bytes as usize, file.offset);
    if read != file.read_bytes as usize {
        return false;
    }
    if (file.read_bytes as usize) < palloc::PAGE_SIZE {
        zero_tail(kva, file.read_bytes as usize);
    }
    true
}

/// Write back iff the software dirty flag is set; mmap pages don't consume a
/// swap slot, unlike anonymous pages.
fn file_swap_out(file: &mut FileData, kva: u64, writable: bool) -> bool {
    if writable && file.dirty {
        let _ = crate::mm::fs::write_at(file.file, kva, file.read_bytes as usize, file.offset);
        file.dirty = false;
    }
    true
}

fn zero_page(kva: u64) {
    unsafe {
        core::ptr::write_bytes(kva as *mut u8, 0, palloc::PAGE_SIZE);
    }
}

fn zero_tail(kva: u64, from: usize) {
    unsafe {
        let ptr = (kva as *mut u8).add(from);
        core::ptr::write_bytes(ptr, 0, palloc::PAGE_SIZE - from);
    }
}
