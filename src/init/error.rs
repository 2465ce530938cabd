//! Boot-time error type. Distinct from [`crate::lib::error::KernelError`]:
//! a boot failure is always fatal and carries a step name, where the
//! runtime error type is something callers are expected to recover from.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootError {
    pub step: &'static str,
    pub reason: &'static str,
}

impl BootError {
    pub const fn new(step: &'static str, reason: &'static str) -> Self {
        BootError { step, reason }
    }
}

impl core::fmt::Display for BootError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "boot step '{}' failed: {}", self.step, self.reason)
    }
}

pub type BootResult<T> = core::result::Result<T, BootError>;
