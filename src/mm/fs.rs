//! Filesystem collaborator surface consumed by the VM layer (mmap, the
//! executable-denies-write rule, process exit's fd teardown). Modeled as a
//! trait rather than calling a concrete filesystem directly, so the paging
//! and fault-handling logic here can be exercised under test with an
//! in-memory fake -- a real on-disk filesystem is out of scope for this
//! kernel.

use spin::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileHandle(pub u32);

impl FileHandle {
    pub const INVALID: FileHandle = FileHandle(u32::MAX);
}

pub trait FileSystem: Send + Sync {
    fn open(&self, name: &str) -> Option<FileHandle>;
    fn close(&self, handle: FileHandle);
    fn read_at(&self, handle: FileHandle, buf: &mut [u8], offset: u64) -> isize;
    fn write_at(&self, handle: FileHandle, buf: &[u8], offset: u64) -> isize;
    fn length(&self, handle: FileHandle) -> u64;
    fn deny_write(&self, handle: FileHandle);
    /// Independent cursor/fd over the same underlying file, used by fork and
    /// by mmap so the mapping outlives the fd it was created from.
    fn reopen(&self, handle: FileHandle) -> Option<FileHandle>;
    fn create(&self, name: &str, size: u64) -> bool;
    fn remove(&self, name: &str) -> bool;
}

/// Filesystem used until [`set_filesystem`] installs a real one. Every call
/// fails cleanly rather than panicking, so code paths that only conditionally
/// touch the filesystem (anonymous-only workloads) keep working.
struct NullFileSystem;

impl FileSystem for NullFileSystem {
    fn open(&self, _name: &str) -> Option<FileHandle> {
        None
    }
    fn close(&self, _handle: FileHandle) {}
    fn read_at(&self, _handle: FileHandle, _buf: &mut [u8], _offset: u64) -> isize {
        -1
    }
    fn write_at(&self, _handle: FileHandle, _buf: &[u8], _offset: u64) -> isize {
        -1
    }
    fn length(&self, _handle: FileHandle) -> u64 {
        0
    }
    fn deny_write(&self, _handle: FileHandle) {}
    fn reopen(&self, _handle: FileHandle) -> Option<FileHandle> {
        None
    }
    fn create(&self, _name: &str, _size: u64) -> bool {
        false
    }
    fn remove(&self, _name: &str) -> bool {
        false
    }
}

static FILESYSTEM: RwLock<Option<alloc::boxed::Box<dyn FileSystem>>> = RwLock::new(None);

pub fn set_filesystem(fs: alloc::boxed::Box<dyn FileSystem>) {
    *FILESYSTEM.write() = Some(fs);
}

fn with_fs<R>(f: impl FnOnce(&dyn FileSystem) -> R) -> R {
    let guard = FILESYSTEM.read();
    match guard.as_deref() {
        Some(fs) => f(fs),
        None => f(&NullFileSystem),
    }
}

pub fn open(name: &str) -> Option<FileHandle> {
    with_fs(|fs| fs.open(name))
}

pub fn close(handle: FileHandle) {
    with_fs(|fs| fs.close(handle))
}

pub fn read_at(handle: FileHandle, kva: u64, len: usize, offset: u64) -> usize {
    let buf = unsafe { core::slice::from_raw_parts_mut(kva as *mut u8, len) };
    with_fs(|fs| fs.read_at(handle, buf, offset)).max(0) as usize
}

pub fn write_at(handle: FileHandle, kva: u64, len: usize, offset: u64) -> usize {
    let buf = unsafe { core::slice::from_raw_parts(kva as *const u8, len) };
    with_fs(|fs| fs.write_at(handle, buf, offset)).max(0) as usize
}

pub fn length(handle: FileHandle) -> u64 {
    with_fs(|fs| fs.length(handle))
}

pub fn deny_write(handle: FileHandle) {
    with_fs(|fs| fs.deny_write(handle))
}

pub fn reopen(handle: FileHandle) -> Option<FileHandle> {
    with_fs(|fs| fs.reopen(handle))
}

pub fn create(name: &str, size: u64) -> bool {
    with_fs(|fs| fs.create(name, size))
}

pub fn remove(name: &str) -> bool {
    with_fs(|fs| fs.remove(name))
}
