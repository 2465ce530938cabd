//! Program loading is consumed through a narrow interface: parsing an
//! executable's segments and building its initial address space is
//! external-collaborator territory (ELF loader details), just as the
//! on-disk filesystem is. [`ProgramLoader`] is the seam, mirroring
//! [`crate::mm::fs::FileSystem`]'s pattern of a trait plus a null default.

use alloc::boxed::Box;
use spin::RwLock;

use crate::mm::page::Va;

pub struct LoadedProgram {
    pub entry_point: Va,
    pub initial_stack: Va,
}

pub trait ProgramLoader: Send + Sync {
    /// Parse `name` and populate `tid`'s address space with its segments as
    /// `Uninit` pages. Returns the entry point and initial stack top on
    /// success.
    fn load(&self, tid: crate::kernel::thread::Tid, name: &str) -> Option<LoadedProgram>;
}

struct NullLoader;

impl ProgramLoader for NullLoader {
    fn load(&self, _tid: crate::kernel::thread::Tid, _name: &str) -> Option<LoadedProgram> {
        None
    }
}

static LOADER: RwLock<Option<Box<dyn ProgramLoader>>> = RwLock::new(None);

pub fn set_loader(loader: Box<dyn ProgramLoader>) {
    *LOADER.write() = Some(loader);
}

pub fn load(tid: crate::kernel::thread::Tid, name: &str) -> Option<LoadedProgram> {
    match LOADER.read().as_ref() {
        Some(loader) => loader.load(tid, name),
        None => NullLoader.load(tid, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_loader_installed_means_every_load_fails() {
        assert!(load(1, "shell").is_none());
    }
}
