//! Virtual memory subsystem: frame table and swap layer (C6, C7), the
//! supplemental page table and its page kinds (C8, C9), fault resolution
//! (C10), and address-space operations (C11).
//!
//! Architecture-specific paging (`arch::x86_64::paging`) sits below this and
//! knows nothing about logical pages; this module knows nothing about PML4
//! entries. The two meet at [`palloc::alloc_page`]/[`palloc::free_page`],
//! which the architecture layer uses to back its own page-table nodes.

pub mod address_space;
pub mod bitmap;
pub mod fault;
pub mod fs;
pub mod page;
pub mod palloc;
pub mod spt;
pub mod swap;

pub use palloc::{alloc_page, free_page};
