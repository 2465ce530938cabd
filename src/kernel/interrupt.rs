//! Interrupt level tracking.
//!
//! Thin wrapper around `cli`/`sti` (via the `x86_64` crate) plus the bit of
//! state the scheduler needs: whether we're currently running inside an
//! external interrupt handler, and whether that handler should yield the CPU
//! on return.

use core::sync::atomic::{AtomicBool, Ordering};
use x86_64::instructions::interrupts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrLevel {
    Off,
    On,
}

/// True while a hardware interrupt handler is executing (set by the IDT
/// trampoline around IRQ dispatch, not by CPU exception handlers).
static IN_EXTERNAL_INTR: AtomicBool = AtomicBool::new(false);

/// Set by the timer tick handler when it decides the current thread's
/// quantum has expired; checked by the IRQ epilogue to trigger a yield only
/// after interrupts are re-enabled, never from within the handler itself.
static YIELD_ON_RETURN: AtomicBool = AtomicBool::new(false);

pub fn get_level() -> IntrLevel {
    if interrupts::are_enabled() {
        IntrLevel::On
    } else {
        IntrLevel::Off
    }
}

#[inline]
pub fn enable() {
    interrupts::enable();
}

#[inline]
pub fn disable() -> IntrLevel {
    let prev = get_level();
    interrupts::disable();
    prev
}

pub fn set_level(level: IntrLevel) -> IntrLevel {
    let prev = get_level();
    match level {
        IntrLevel::On => interrupts::enable(),
        IntrLevel::Off => interrupts::disable(),
    }
    prev
}

/// True if the calling code is running inside an external interrupt
/// handler (not merely with interrupts disabled).
pub fn in_external_intr() -> bool {
    IN_EXTERNAL_INTR.load(Ordering::Relaxed)
}

pub(crate) fn enter_external_intr() {
    IN_EXTERNAL_INTR.store(true, Ordering::Relaxed);
}

pub(crate) fn leave_external_intr() {
    IN_EXTERNAL_INTR.store(false, Ordering::Relaxed);
}

pub(crate) fn request_yield_on_return() {
    YIELD_ON_RETURN.store(true, Ordering::Relaxed);
}

pub(crate) fn take_yield_on_return() -> bool {
    YIELD_ON_RETURN.swap(false, Ordering::Relaxed)
}

/// RAII guard that disables interrupts and restores the previous level on
/// drop. Used by the scheduler and synchronization primitives to bound
/// critical sections.
pub struct IntrGuard {
    prev: IntrLevel,
}

impl IntrGuard {
    pub fn new() -> Self {
        Self { prev: disable() }
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        set_level(self.prev);
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_intr_flag_roundtrip() {
        assert!(!in_external_intr());
        enter_external_intr();
        assert!(in_external_intr());
        leave_external_intr();
        assert!(!in_external_intr());
    }

    #[test]
    fn yield_on_return_consumed_once() {
        request_yield_on_return();
        assert!(take_yield_on_return());
        assert!(!take_yield_on_return());
    }
}
