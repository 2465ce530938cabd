//! # System-call entry
//!
//! User processes enter the kernel via a software interrupt (`int 0x80`),
//! the same mechanism Pintos uses (`intr 0x30` in the original, registered
//! with a user-accessible DPL). This is simpler than the SYSCALL/SYSRET fast
//! path -- the CPU already does the privileged stack switch for us via the
//! TSS, the same as every other exception this kernel handles -- and needs
//! no MSR bring-up.
//!
//! The entry stub below is the "interrupt stub assembly" this kernel treats
//! as a narrow, mechanical boundary: it does nothing but lay the trapped
//! registers out as a [`TrapFrame`] and hand control to Rust. The actual
//! system-call semantics live in [`crate::syscall::dispatch`].
//!
//! ## Calling convention
//!
//! ```text
//! Register    Usage
//! --------    --------------
//! RAX         Syscall number (in), return value (out)
//! RDI         Argument 1
//! RSI         Argument 2
//! RDX         Argument 3
//! R10         Argument 4
//! R8          Argument 5
//! R9          Argument 6
//! ```

use x86_64::structures::idt::InterruptDescriptorTable;
use x86_64::{PrivilegeLevel, VirtAddr};

use crate::arch::x86_64::trapframe::TrapFrame;

/// Software interrupt vector user processes trap through. Chosen well clear
/// of the PIC's remapped IRQ range (32-47).
pub const SYSCALL_VECTOR: u8 = 0x80;

/// Install the `int 0x80` gate at DPL 3 so user mode may invoke it.
pub fn register(idt: &mut InterruptDescriptorTable) {
    unsafe {
        idt[SYSCALL_VECTOR as usize]
            .set_handler_addr(VirtAddr::new(syscall_isr_entry as u64))
            .set_privilege_level(PrivilegeLevel::Ring3);
    }
}

extern "C" {
    fn syscall_isr_entry();
    /// Restore every register in `*frame` and `iretq` into it. Used both by
    /// the syscall epilogue and by `fork`/`exec` to enter a freshly built
    /// user context for the first time.
    pub fn return_to_user(frame: *const TrapFrame) -> !;
}

/// Called from `syscall_isr_entry` with the just-built frame. Saves it onto
/// the current thread (so a later `fork` can clone it) before dispatching.
#[no_mangle]
extern "C" fn syscall_entry_rust(frame: *mut TrapFrame) {
    let frame = unsafe { &mut *frame };
    let tid = crate::kernel::thread::current_tid();
    crate::kernel::thread::save_user_frame(tid, frame);
    crate::syscall::dispatch(frame);
}

core::arch::global_asm!(
    r#"
.global syscall_isr_entry
syscall_isr_entry:
    push 0
    push 0x80
    push 0
    push 0
    push 0
    push 0
    push rax
    push rbx
    push rcx
    push rdx
    push rsi
    push rdi
    push rbp
    push r8
    push r9
    push r10
    push r11
    push r12
    push r13
    push r14
    push r15

    mov rbx, rsp
    mov rdi, rsp
    and rsp, -16
    call syscall_entry_rust
    mov rdi, rbx
    jmp return_to_user

.global return_to_user
return_to_user:
    mov rsp, rdi
    pop r15
    pop r14
    pop r13
    pop r12
    pop r11
    pop r10
    pop r9
    pop r8
    pop rbp
    pop rdi
    pop rsi
    pop rdx
    pop rcx
    pop rbx
    pop rax
    add rsp, 32
    add rsp, 16
    iretq
"#
);
