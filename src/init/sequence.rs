//! The boot sequence proper. See the step list in [`crate::main`]'s module
//! docs; this is its implementation, kept as one straight-line function so
//! the ordering dependency between steps (GDT before TSS before IDT, heap
//! before frame table, frame table before scheduler) is visible at a glance.

use crate::arch::x86_64::serial::serial_write;
use crate::init::config::BootConfig;
use crate::init::error::{BootError, BootResult};

/// Used only for the one step that runs before the heap does --
/// `crate::info!` needs `alloc::format!`, which needs an allocator.
fn step_early<T>(name: &'static str, result: Result<T, &'static str>) -> BootResult<T> {
    match result {
        Ok(v) => {
            serial_write(b"[boot] ");
            serial_write(name.as_bytes());
            serial_write(b": ok\n");
            Ok(v)
        }
        Err(reason) => Err(BootError::new(name, reason)),
    }
}

fn step<T>(name: &'static str, result: Result<T, &'static str>) -> BootResult<T> {
    match result {
        Ok(v) => {
            crate::info!("{}: ok", name);
            Ok(v)
        }
        Err(reason) => Err(BootError::new(name, reason)),
    }
}

/// Run every boot step. Returns the tid of the thread that should keep
/// running as "thread 0" (the one that called `boot()`), now registered
/// with the scheduler.
///
/// # Safety
/// Must be called exactly once, as the very first Rust code after the
/// bootloader hands off control.
pub unsafe fn boot() -> BootResult<crate::kernel::thread::Tid> {
    boot_with_config(BootConfig::default())
}

/// # Safety
/// Same contract as [`boot`]; `config` is compiled-in defaults unless a
/// caller (e.g. a test harness) overrides it.
pub unsafe fn boot_with_config(config: BootConfig) -> BootResult<crate::kernel::thread::Tid> {
    // Steps 1-8: GDT, TSS, IDT, CPU features, serial console, PIC, PIT.
    // All handled by arch_early_init, which disables interrupts as its
    // first act and leaves them disabled on return.
    step_early(
        "arch_early_init",
        crate::arch::x86_64::arch_early_init(config.timer_hz)
            .map_err(|_| "architecture bring-up failed"),
    )?;

    step("heap", {
        crate::heap::init_heap();
        Ok(())
    })?;

    step("time", {
        crate::time::init_boot_timestamp();
        Ok(())
    })?;

    step("frame_table", crate::mm::palloc::init().map_err(|_| "no usable RAM ranges reported"))?;

    step("swap", {
        crate::mm::swap::init();
        Ok(())
    })?;

    let idle_tid = step(
        "scheduler",
        Ok(crate::kernel::scheduler::init(config.sched_policy)),
    )?;

    step("process_table", {
        crate::process::init();
        Ok(())
    })?;

    crate::info!("all steps complete, enabling interrupts");
    crate::kernel::interrupt::enable();

    Ok(idle_tid)
}
