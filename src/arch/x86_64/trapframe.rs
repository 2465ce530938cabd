//! Full x86_64 trap frame.
//!
//! Layout matches what the IDT stub pushes before calling into Rust: all
//! general-purpose registers (pushed by the stub in reverse order so the
//! struct reads naturally), then the CPU-pushed error code and the
//! interrupt frame (`rip`, `cs`, `rflags`, `rsp`, `ss`). Used both for
//! exception/IRQ entry and as the saved user-mode state for a process, the
//! way Pintos' `struct intr_frame` doubles as both.

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    // Pushed by the common stub, callee- and caller-saved GPRs.
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,

    /// Segment selectors at time of the trap, saved so `iretq` restores the
    /// correct privilege level.
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,

    /// Vector number and CPU-pushed error code (0 for vectors that don't
    /// push one; the stub pushes a 0 placeholder so the layout is uniform).
    pub vector: u64,
    pub error_code: u64,

    // CPU-pushed interrupt frame.
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// Syscall argument registers in System V order (rdi, rsi, rdx, r10, r8, r9).
    pub fn syscall_args(&self) -> [u64; 6] {
        [self.rdi, self.rsi, self.rdx, self.r10, self.r8, self.r9]
    }

    pub fn syscall_number(&self) -> u64 {
        self.rax
    }

    pub fn set_return_value(&mut self, value: i64) {
        self.rax = value as u64;
    }

    pub fn is_user_mode(&self) -> bool {
        (self.cs & 0x3) == 0x3
    }
}
