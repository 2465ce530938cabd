//! Architecture abstraction layer.
//!
//! Only x86_64 is supported; this module exists so the rest of the kernel
//! can write `crate::arch::X` without spelling out the target arch, the way
//! a multi-arch kernel would, even though there's presently one backend.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use self::x86_64::trapframe::TrapFrame;
#[cfg(target_arch = "x86_64")]
pub use self::x86_64::{CpuContext, switch_to};
