//! Synchronization primitives with priority donation.
//!
//! Semaphore, lock and condition variable, layered the way Pintos'
//! `synch.c` does: locks are semaphores-of-one plus a `holder` field and
//! donation bookkeeping, condition variables are waiter lists of
//! per-waiter semaphores.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::kernel::interrupt::IntrGuard;
use crate::kernel::scheduler;
use crate::kernel::thread::{self, Tid, MAX_NESTED_DEPTH};

pub struct Semaphore {
    inner: Mutex<SemaphoreState>,
}

struct SemaphoreState {
    value: usize,
    waiters: VecDeque<Tid>,
}

impl Semaphore {
    pub const fn new(value: usize) -> Self {
        Semaphore {
            inner: Mutex::new(SemaphoreState {
                value,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Block the calling thread until the semaphore has a free unit.
    pub fn down(&self) {
        loop {
            let _guard = IntrGuard::new();
            let mut state = self.inner.lock();
            if state.value > 0 {
                state.value -= 1;
                return;
            }
            let me = thread::current_tid();
            state.waiters.push_back(me);
            drop(state);
            scheduler::block_current();
        }
    }

    pub fn try_down(&self) -> bool {
        let _guard = IntrGuard::new();
        let mut state = self.inner.lock();
        if state.value > 0 {
            state.value -= 1;
            true
        } else {
            false
        }
    }

    pub fn up(&self) {
        let _guard = IntrGuard::new();
        let mut state = self.inner.lock();
        state.value += 1;
        if let Some(waiter) = pop_highest_priority(&mut state.waiters) {
            drop(state);
            scheduler::unblock(waiter);
        }
    }
}

fn pop_highest_priority(waiters: &mut VecDeque<Tid>) -> Option<Tid> {
    if waiters.is_empty() {
        return None;
    }
    let mut best_idx = 0;
    let mut best_pri = i32::MIN;
    for (i, tid) in waiters.iter().enumerate() {
        let pri = thread::with_thread(*tid, |t| t.priority).unwrap_or(i32::MIN);
        if pri > best_pri {
            best_pri = pri;
            best_idx = i;
        }
    }
    waiters.remove(best_idx)
}

static NEXT_LOCK_ID: AtomicUsize = AtomicUsize::new(1);

/// Lock id -> current holder, kept alongside each `Lock`'s own `holder`
/// field so `donate_priority_chain` can look up an arbitrary lock further
/// down the chain without holding a reference to it -- Pintos's C code gets
/// this for free by following `wait_on_lock` as a direct pointer.
static LOCK_HOLDERS: Mutex<BTreeMap<usize, Tid>> = Mutex::new(BTreeMap::new());

pub struct Lock {
    id: usize,
    sema: Semaphore,
    holder: Mutex<Option<Tid>>,
}

impl Lock {
    pub fn new() -> Self {
        Lock {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::SeqCst),
            sema: Semaphore::new(1),
            holder: Mutex::new(None),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_held_by_current(&self) -> bool {
        *self.holder.lock() == Some(thread::current_tid())
    }

    pub fn acquire(&self) {
        let me = thread::current_tid();
        if !self.sema.try_down() {
            thread::with_thread(me, |t| {
                t.wait_on_lock = thread::WaitTarget::Lock(self.id);
            });
            self.donate_priority_chain(me);
            self.sema.down();
        }
        thread::with_thread(me, |t| {
            t.wait_on_lock = thread::WaitTarget::None;
        });
        *self.holder.lock() = Some(me);
        LOCK_HOLDERS.lock().insert(self.id, me);
    }

    /// Walk the chain of locks the acquiring thread is blocked behind,
    /// bumping each holder's priority if the acquirer's is higher and
    /// following that holder's own `wait_on_lock` to the *next* lock in the
    /// chain. Bounded to `MAX_NESTED_DEPTH` to match the nested-donation
    /// guarantee the scheduler assumes.
    fn donate_priority_chain(&self, acquirer: Tid) {
        let mut lock_id = self.id;
        let mut depth = 0;
        let mut current = acquirer;
        loop {
            if depth >= MAX_NESTED_DEPTH {
                break;
            }
            let holder = LOCK_HOLDERS.lock().get(&lock_id).copied();
            let Some(holder) = holder else { break };
            let acquirer_pri = thread::with_thread(current, |t| t.priority).unwrap_or(0);
            let mut next_lock = None;
            thread::with_thread(holder, |t| {
                if acquirer_pri > t.priority {
                    t.priority = acquirer_pri;
                    if !t.donations.contains(&current) {
                        t.donations.push(current);
                    }
                }
                if let thread::WaitTarget::Lock(l) = t.wait_on_lock {
                    next_lock = Some(l);
                }
            });
            match next_lock {
                Some(l) => {
                    lock_id = l;
                    current = holder;
                    depth += 1;
                }
                None => break,
            }
        }
    }

    pub fn release(&self) {
        let me = thread::current_tid();
        let my_lock = thread::WaitTarget::Lock(self.id);
        let donors: Vec<Tid> = thread::with_thread(me, |t| t.donations.clone()).unwrap_or_default();

        // Only a donation tied to *this* lock goes away on this release --
        // a donor still blocked on a different lock this thread holds keeps
        // its boost alive (Pintos's donate-multiple case).
        let mut remaining = Vec::new();
        let mut remaining_max = None;
        for donor in donors {
            let info = thread::with_thread(donor, |t| (t.wait_on_lock, t.priority));
            match info {
                Some((wait_on, pri)) if wait_on != my_lock => {
                    remaining_max = Some(remaining_max.map_or(pri, |m: i32| m.max(pri)));
                    remaining.push(donor);
                }
                _ => {}
            }
        }

        thread::with_thread(me, |t| {
            t.donations = remaining;
            t.priority = t.original_priority.max(remaining_max.unwrap_or(t.original_priority));
        });
        *self.holder.lock() = None;
        LOCK_HOLDERS.lock().remove(&self.id);
        self.sema.up();
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Condvar {
    waiters: Mutex<VecDeque<Tid>>,
}

impl Condvar {
    pub const fn new() -> Self {
        Condvar {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// Caller must hold `lock`. Releases it, blocks, and reacquires it
    /// before returning.
    pub fn wait(&self, lock: &Lock) {
        assert!(lock.is_held_by_current());
        let me = thread::current_tid();
        self.waiters.lock().push_back(me);
        lock.release();
        scheduler::block_current();
        lock.acquire();
    }

    pub fn signal(&self, _lock: &Lock) {
        let mut waiters = self.waiters.lock();
        if let Some(waiter) = pop_highest_priority(&mut waiters) {
            drop(waiters);
            scheduler::unblock(waiter);
        }
    }

    pub fn broadcast(&self, lock: &Lock) {
        while !self.waiters.lock().is_empty() {
            self.signal(lock);
        }
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semaphore_basic() {
        let _ = thread::init("idle-sem");
        let sem = Semaphore::new(1);
        assert!(sem.try_down());
        assert!(!sem.try_down());
        sem.up();
        assert!(sem.try_down());
    }

    #[test]
    fn lock_tracks_holder() {
        let _ = thread::init("idle-lock");
        let lock = Lock::new();
        lock.acquire();
        assert!(lock.is_held_by_current());
        lock.release();
        assert!(!lock.is_held_by_current());
    }

    #[test]
    fn donation_propagates_through_a_chain_of_two_locks() {
        let _ = thread::init("idle-donate-chain");
        let low = thread::create("low", 10);
        let mid = thread::create("mid", 20);
        let high = thread::create("high", 30);

        let lock_a = Lock::new();
        let lock_b = Lock::new();

        // low holds lock_a; mid holds lock_b and is blocked on lock_a.
        LOCK_HOLDERS.lock().insert(lock_a.id, low);
        LOCK_HOLDERS.lock().insert(lock_b.id, mid);
        thread::with_thread(mid, |t| t.wait_on_lock = thread::WaitTarget::Lock(lock_a.id));

        lock_b.donate_priority_chain(high);

        assert_eq!(thread::with_thread(mid, |t| t.priority), Some(30));
        assert_eq!(thread::with_thread(low, |t| t.priority), Some(30));
    }

    #[test]
    fn release_only_clears_donations_tied_to_this_lock() {
        let _ = thread::init("idle-donate-multi");
        let holder = thread::create("holder", 10);
        let donor_a = thread::create("donor_a", 20);
        let donor_b = thread::create("donor_b", 30);

        let lock_a = Lock::new();
        let lock_b = Lock::new();

        thread::set_current(holder);
        *lock_a.holder.lock() = Some(holder);
        LOCK_HOLDERS.lock().insert(lock_a.id, holder);
        *lock_b.holder.lock() = Some(holder);
        LOCK_HOLDERS.lock().insert(lock_b.id, holder);

        thread::with_thread(donor_a, |t| t.wait_on_lock = thread::WaitTarget::Lock(lock_a.id));
        thread::with_thread(donor_b, |t| t.wait_on_lock = thread::WaitTarget::Lock(lock_b.id));
        thread::with_thread(holder, |t| {
            t.priority = 30;
            t.donations = alloc::vec![donor_a, donor_b];
        });

        lock_a.release();

        // donor_b's donation is for lock_b, still held -- must survive.
        assert_eq!(thread::with_thread(holder, |t| t.priority), Some(30));
        assert_eq!(thread::with_thread(holder, |t| t.donations.clone()), Some(alloc::vec![donor_b]));
    }
}
