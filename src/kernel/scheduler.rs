//! Thread scheduler: priority donation (default) or 4.4BSD MLFQS (`mlfqs`
//! feature), selected at compile time the way Pintos selects it with the
//! `-o mlfqs` boot option.
//!
//! The run queue and sleep queue live in [`crate::kernel::thread`]; this
//! module owns tick accounting, the load-average/recent-CPU recalculation,
//! and the actual context switch via [`crate::arch::x86_64::switch_to`].

use core::sync::atomic::{AtomicUsize, Ordering};

use x86_64::VirtAddr;

use crate::arch::x86_64::paging::PageTableManager;
use crate::arch::x86_64::{switch_to, tss, CpuContext};
use crate::init::config::SchedPolicy;
use crate::kernel::fixed_point::Fixed;
use crate::kernel::interrupt;
use crate::kernel::thread::{self, Tid, ThreadStatus, PRI_DEFAULT, PRI_MAX, PRI_MIN};

const TIME_SLICE_TICKS: usize = 4;
const TICKS_PER_SECOND: i64 = 100;

static TICKS_THIS_SLICE: AtomicUsize = AtomicUsize::new(0);
static LOAD_AVG: spin::Mutex<Fixed> = spin::Mutex::new(Fixed::ZERO);
static POLICY: spin::Mutex<SchedPolicy> = spin::Mutex::new(SchedPolicy::Priority);

pub fn mlfqs_enabled() -> bool {
    cfg!(feature = "mlfqs")
}

fn policy() -> SchedPolicy {
    *POLICY.lock()
}

/// Bootstrap the scheduler on the thread that's currently executing (the
/// boot stack becomes the idle thread's context).
pub fn init(sched_policy: SchedPolicy) -> Tid {
    *POLICY.lock() = sched_policy;
    thread::init("idle")
}

/// Create a new thread and make it ready to run. `entry` is invoked with
/// `arg` the first time the thread is scheduled; it must not return (a
/// returning entry point falls through to [`exit_current`]).
pub fn spawn(name: &str, priority: i32, entry: extern "C" fn(usize) -> !, arg: usize) -> Tid {
    let priority = priority.clamp(PRI_MIN, PRI_MAX);
    let tid = thread::create(name, priority);
    thread::with_thread(tid, |t| {
        let stack_top = t.stack_top();
        // Align down to 16 bytes, then leave room for the trampoline to
        // pop `arg` as if it were a normal argument passed on first entry.
        let aligned = stack_top & !0xF;
        t.context = CpuContext {
            rbx: arg as u64,
            rip: entry as usize as u64,
            rsp: aligned,
            rflags: 0x202, // IF=1
            ..CpuContext::default()
        };
    });
    thread::push_ready(tid);
    tid
}

/// Called from the PIT IRQ handler. Must not block or switch directly --
/// it runs with interrupts disabled on the interrupted thread's stack.
pub fn on_timer_tick() {
    let now = thread::tick();

    for tid in thread::drain_expired_sleepers(now) {
        thread::push_ready(tid);
    }

    let current = thread::current_tid();
    thread::with_thread(current, |t| {
        t.recent_cpu = t.recent_cpu.add_int(1);
    });

    if mlfqs_enabled() {
        if now % TICKS_PER_SECOND == 0 {
            recalculate_load_avg();
            for tid in thread::all_tids() {
                recalculate_recent_cpu(tid);
            }
        }
        if now % 4 == 0 {
            for tid in thread::all_tids() {
                recalculate_priority(tid);
            }
        }
    }

    let slice = TICKS_THIS_SLICE.fetch_add(1, Ordering::Relaxed) + 1;
    let current_pri = thread::with_thread(current, |t| t.priority).unwrap_or(PRI_MIN);
    let preempted = thread_with_higher_priority_ready(current_pri);

    if slice >= TIME_SLICE_TICKS || preempted {
        interrupt::request_yield_on_return();
    }
}

fn thread_with_higher_priority_ready(current_pri: i32) -> bool {
    if policy() == SchedPolicy::RoundRobin {
        return thread::ready_len() > 0;
    }
    thread::max_ready_priority().is_some_and(|p| p > current_pri)
}

fn recalculate_load_avg() {
    let ready = thread::ready_len() as i32;
    let running_extra = 1; // the current thread, not counted in ready_len
    let mut load = LOAD_AVG.lock();
    let coeff59 = Fixed::from_int(59).div(Fixed::from_int(60));
    let coeff1 = Fixed::from_int(1).div(Fixed::from_int(60));
    *load = coeff59.mul(*load) + coeff1.mul_int(ready + running_extra);
}

fn recalculate_recent_cpu(tid: Tid) {
    let load = *LOAD_AVG.lock();
    thread::with_thread(tid, |t| {
        let two_load = load.mul_int(2);
        let coeff = two_load.div(two_load.add_int(1));
        t.recent_cpu = coeff.mul(t.recent_cpu).add_int(t.nice);
    });
}

fn recalculate_priority(tid: Tid) {
    thread::with_thread(tid, |t| {
        let penalty = t.recent_cpu.div_int(4).to_int_zero();
        let nice_penalty = t.nice * 2;
        let new_pri = (PRI_MAX - penalty - nice_penalty).clamp(PRI_MIN, PRI_MAX);
        t.priority = new_pri;
    });
}

/// Block the current thread (it must already be off the ready queue, e.g.
/// via a semaphore wait) and switch to the next runnable thread.
pub fn block_current() {
    let _guard = interrupt::IntrGuard::new();
    let current = thread::current_tid();
    thread::with_thread(current, |t| t.status = ThreadStatus::Blocked);
    switch_away_from(current);
}

/// Move a blocked thread back onto the ready queue. Requests a yield on
/// return if it now outranks the running thread.
pub fn unblock(tid: Tid) {
    let _guard = interrupt::IntrGuard::new();
    thread::push_ready(tid);
    let current = thread::current_tid();
    let cur_pri = thread::with_thread(current, |t| t.priority).unwrap_or(PRI_MIN);
    let woken_pri = thread::with_thread(tid, |t| t.priority).unwrap_or(PRI_MIN);
    if woken_pri > cur_pri {
        interrupt::request_yield_on_return();
    }
}

/// Voluntarily give up the CPU. Called both by explicit `thread_yield`
/// callers and by the IRQ epilogue when [`interrupt::take_yield_on_return`]
/// is set.
pub fn yield_now() {
    let _guard = interrupt::IntrGuard::new();
    let current = thread::current_tid();
    thread::push_ready(current);
    switch_away_from(current);
}

/// Terminate the current thread. Does not return; the thread's resources
/// are reclaimed by the next thread to run in its place (classic
/// `schedule_tail` pattern -- we can't free our own kernel stack while
/// standing on it).
pub fn exit_current() -> ! {
    let _guard = interrupt::IntrGuard::new();
    let current = thread::current_tid();
    thread::with_thread(current, |t| t.status = ThreadStatus::Dying);
    let next = pick_next();
    reap_dying_threads_except(next);
    switch_to_thread(current, next, false);
    unreachable!("exited thread resumed");
}

fn reap_dying_threads_except(keep: Tid) {
    for tid in thread::all_tids() {
        if tid == keep {
            continue;
        }
        let dying = thread::with_thread(tid, |t| t.status == ThreadStatus::Dying).unwrap_or(false);
        if dying {
            thread::destroy(tid);
        }
    }
}

fn pick_next() -> Tid {
    let priority_order = policy() != SchedPolicy::RoundRobin;
    loop {
        if let Some(tid) = thread::pop_ready(priority_order) {
            return tid;
        }
        // Nothing ready: enable interrupts briefly so a pending IRQ (timer,
        // keyboard, disk completion) can unblock someone, then check again.
        interrupt::enable();
        x86_64::instructions::hlt();
        interrupt::disable();
    }
}

fn switch_away_from(current: Tid) {
    let next = pick_next();
    if next == current {
        return;
    }
    switch_to_thread(current, next, true);
}

fn switch_to_thread(current: Tid, next: Tid, save_current: bool) {
    TICKS_THIS_SLICE.store(0, Ordering::Relaxed);
    thread::with_thread(next, |t| t.status = ThreadStatus::Running);
    thread::set_current(next);

    let stack_top = thread::with_thread(next, |t| t.stack_top()).unwrap_or(0);
    unsafe {
        tss::set_kernel_stack(VirtAddr::new(stack_top));
    }

    // Reload CR3 only when the next thread owns its own address space.
    // A kernel-only thread (`pml4: None`) never switches CR3 -- the kernel
    // half is present and identical in every address space, so whichever
    // table is already loaded stays valid for it.
    if let Some(pml4) = thread::with_thread(next, |t| t.pml4).flatten() {
        unsafe {
            PageTableManager::from_pml4_phys(pml4).switch_to();
        }
    }

    let next_ctx: *const CpuContext =
        thread::with_thread(next, |t| &t.context as *const CpuContext).unwrap();

    if save_current {
        let prev_ctx: *mut CpuContext =
            thread::with_thread(current, |t| &mut t.context as *mut CpuContext).unwrap();
        unsafe {
            switch_to(prev_ctx, next_ctx);
        }
    } else {
        unsafe {
            switch_to(core::ptr::null_mut(), next_ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_enqueues_ready_thread() {
        let _ = init(SchedPolicy::Priority);
        extern "C" fn noop(_arg: usize) -> ! {
            loop {}
        }
        let before = thread::ready_len();
        spawn("worker", PRI_DEFAULT, noop, 0);
        assert_eq!(thread::ready_len(), before + 1);
    }

    #[test]
    fn round_robin_policy_ignores_priority_order() {
        let _ = init(SchedPolicy::RoundRobin);
        let low = thread::create("low", 10);
        let high = thread::create("high", 50);
        thread::push_ready(low);
        thread::push_ready(high);
        // FIFO, not priority: `low` was pushed first and comes out first.
        assert_eq!(pick_next(), low);
    }

    #[test]
    fn higher_priority_ready_thread_triggers_preemption() {
        let _ = init(SchedPolicy::Priority);
        assert!(!thread_with_higher_priority_ready(PRI_DEFAULT));
        thread::push_ready(thread::create("high", PRI_MAX));
        assert!(thread_with_higher_priority_ready(PRI_DEFAULT));
    }
}
