//! Panic handler with register/state dump to the serial console.

use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::arch::x86_64::serial::serial_write;

static PANICKING: AtomicBool = AtomicBool::new(false);
static PANIC_COUNT: AtomicU64 = AtomicU64::new(0);

pub fn panic_handler(info: &PanicInfo) -> ! {
    if PANICKING.swap(true, Ordering::SeqCst) {
        serial_write(b"\n!!! RECURSIVE PANIC !!!\n");
        halt();
    }

    let panic_num = PANIC_COUNT.fetch_add(1, Ordering::SeqCst) + 1;

    x86_64::instructions::interrupts::disable();

    print_header(panic_num);
    print_info(info);
    print_registers();
    print_state();

    halt();
}

fn print_header(panic_num: u64) {
    serial_write(b"\n================================================================================\n");
    serial_write(b"!!!                          KERNEL PANIC                                   !!!\n");
    serial_write(b"================================================================================\n");
    if panic_num > 1 {
        let msg = alloc::format!("Panic #{}\n", panic_num);
        serial_write(msg.as_bytes());
    }
}

fn print_info(info: &PanicInfo) {
    serial_write(b"PANIC INFORMATION:\n");
    if let Some(location) = info.location() {
        let loc = alloc::format!("  Location: {}:{}:{}\n", location.file(), location.line(), location.column());
        serial_write(loc.as_bytes());
    }
    let msg = alloc::format!("  Message:  {}\n", info.message());
    serial_write(msg.as_bytes());
}

fn print_registers() {
    use core::arch::asm;
    serial_write(b"REGISTER DUMP:\n");
    unsafe {
        let (rax, rbx, rcx, rdx): (u64, u64, u64, u64);
        let (rsi, rdi, rbp, rsp): (u64, u64, u64, u64);
        asm!("mov {}, rax", out(reg) rax, options(nomem, nostack, preserves_flags));
        asm!("mov {}, rbx", out(reg) rbx, options(nomem, nostack, preserves_flags));
        asm!("mov {}, rcx", out(reg) rcx, options(nomem, nostack, preserves_flags));
        asm!("mov {}, rdx", out(reg) rdx, options(nomem, nostack, preserves_flags));
        asm!("mov {}, rsi", out(reg) rsi, options(nomem, nostack, preserves_flags));
        asm!("mov {}, rdi", out(reg) rdi, options(nomem, nostack, preserves_flags));
        asm!("mov {}, rbp", out(reg) rbp, options(nomem, nostack, preserves_flags));
        asm!("mov {}, rsp", out(reg) rsp, options(nomem, nostack, preserves_flags));
        let regs = alloc::format!(
            "  rax: {:016x}  rbx: {:016x}  rcx: {:016x}  rdx: {:016x}\n\
             rsi: {:016x}  rdi: {:016x}  rbp: {:016x}  rsp: {:016x}\n",
            rax, rbx, rcx, rdx, rsi, rdi, rbp, rsp
        );
        serial_write(regs.as_bytes());
    }
}

fn print_state() {
    serial_write(b"SYSTEM STATE:\n");
    let uptime_ms = crate::time::get_uptime_ms();
    let msg = alloc::format!("  Uptime: {} ms\n", uptime_ms);
    serial_write(msg.as_bytes());

    let stats = crate::heap::get_heap_stats();
    let msg = alloc::format!(
        "  Heap: {} bytes current, {} bytes peak, {} allocs, {} failures\n",
        stats.current_allocated(),
        stats.peak_allocated(),
        stats.total_allocations(),
        stats.allocation_failures(),
    );
    serial_write(msg.as_bytes());
}

#[inline(always)]
fn halt() -> ! {
    serial_write(b"================================================================================\n");
    serial_write(b"System halted.\n");
    loop {
        x86_64::instructions::interrupts::disable();
        x86_64::instructions::hlt();
    }
}

pub fn get_panic_count() -> u64 {
    PANIC_COUNT.load(Ordering::Relaxed)
}

pub fn is_panicking() -> bool {
    PANICKING.load(Ordering::Relaxed)
}
