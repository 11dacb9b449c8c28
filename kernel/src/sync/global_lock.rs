// =============================================================================
// KestrelOS — Global Kernel Lock
// =============================================================================
//
// The single, kernel-wide critical section protecting scheduler-global state
// shared across cores. Unlike a spinlock, the global lock is RECURSION-AWARE:
// nested acquisitions by the same logical holder never block each other.
//
// OWNERSHIP MODEL:
//   The lock belongs to a THREAD, not to a core. The recursion depth lives
//   in the thread's base state (`ThreadLockState`), so a thread that acquires
//   the lock, gets preempted, and resumes on a DIFFERENT core still treats
//   its own nested acquisitions as non-blocking, while any other thread, on
//   any core, must spin.
//
// CONSISTENCY BY CONSTRUCTION:
//   Recursion is detected purely from the calling thread's own counter,
//   never by inspecting which core set the shared word. That works because:
//     - every increment from 0 is preceded by a successful CAS free→held
//     - every path that returns a count to 0 also clears the shared word
//       (the last release(), or the switch-out hook for a non-holder)
//
// MISUSE:
//   Mismatched acquire/release pairs are programming errors detected only
//   by symptom (deadlock or premature unlock). None of these operations
//   return errors; checking would require more synchronized state than the
//   primitive itself.
// =============================================================================

use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch::{Cpu, IrqKey};
use crate::sync::atomic::AtomicWord;
use crate::sync::spin_until;

const FREE: usize = 0;
const HELD: usize = 1;

/// The global-lock recursion depth of one thread.
///
/// Embedded in each schedulable thread's base state. Zero means the thread
/// does not hold the global lock. Mutated only by the owning thread, with
/// one documented exception: the context-switch path reads it (and the
/// kernel's swap code may act on it) via [`GlobalLock::on_thread_switched_out`]
/// after the thread has stopped running, which is safe because a stopped
/// thread is not concurrently running anywhere else.
#[derive(Debug)]
pub struct ThreadLockState {
    global_lock_count: AtomicU32,
}

impl ThreadLockState {
    /// State for a thread that holds nothing. Created with the thread.
    pub const fn new() -> Self {
        Self {
            global_lock_count: AtomicU32::new(0),
        }
    }

    /// Current recursion depth of the global lock for this thread.
    pub fn global_lock_count(&self) -> u32 {
        self.global_lock_count.load(Ordering::Relaxed)
    }

    /// True iff this thread currently holds the global lock.
    pub fn holds_global_lock(&self) -> bool {
        self.global_lock_count() != 0
    }

    fn inc(&self) {
        self.global_lock_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements and returns the new depth.
    fn dec(&self) -> u32 {
        self.global_lock_count.fetch_sub(1, Ordering::Relaxed) - 1
    }
}

impl Default for ThreadLockState {
    fn default() -> Self {
        Self::new()
    }
}

/// The kernel-wide recursive critical-section guard.
///
/// Exactly one logical holder exists kernel-wide at any instant, established
/// by compare-and-swap on the shared word. Construct one per kernel (it is
/// part of the top-level synchronization context, outliving all cores).
#[derive(Debug)]
pub struct GlobalLock {
    lock: AtomicWord,
}

impl GlobalLock {
    /// Creates the lock in the free state.
    pub const fn new() -> Self {
        Self {
            lock: AtomicWord::new(FREE),
        }
    }

    /// Enters the global critical section on behalf of `thread`.
    ///
    /// Disables local interrupts and, unless `thread` already holds the lock
    /// (the recursion fast path, which never spins), busy-waits until the
    /// shared word is transitioned free→held. Increments the thread's depth
    /// and returns the interrupt key for the matching [`GlobalLock::release`].
    pub fn acquire<C: Cpu>(&self, cpu: &C, thread: &ThreadLockState) -> IrqKey {
        let key = cpu.irq_lock();
        if !thread.holds_global_lock() {
            spin_until(|| self.lock.compare_and_swap(FREE, HELD), || cpu.relax());
        }
        thread.inc();
        key
    }

    /// Leaves the global critical section on behalf of `thread`.
    ///
    /// Decrements the thread's depth if it is nonzero, clearing the shared
    /// word when the depth returns to zero. Local interrupts are restored
    /// from `key` unconditionally; calling this on a thread that holds
    /// nothing is a safe no-op for the shared state.
    pub fn release<C: Cpu>(&self, cpu: &C, thread: &ThreadLockState, key: IrqKey) {
        if thread.holds_global_lock() && thread.dec() == 0 {
            self.lock.clear();
        }
        cpu.irq_unlock(key);
    }

    /// Drops lock ownership on behalf of a thread being switched out.
    ///
    /// Contract: called exactly once from the context-switch path,
    /// immediately before `outgoing` stops running. This is the only place
    /// a thread's lock state is touched from outside the owning thread.
    ///
    /// If the outgoing thread holds no nested acquisitions, the shared word
    /// is cleared unconditionally, so the lock does not continue to appear
    /// held on behalf of a thread that has relinquished it, even while some
    /// other thread is mid-spin waiting to acquire. If the outgoing thread's
    /// depth is nonzero, the word stays held: the thread keeps conceptual
    /// ownership across suspension, and only real `release` calls drain it.
    pub fn on_thread_switched_out(&self, outgoing: &ThreadLockState) {
        if !outgoing.holds_global_lock() {
            self.lock.clear();
        }
    }

    /// True iff some thread somewhere holds the lock.
    pub fn is_held(&self) -> bool {
        self.lock.get() != FREE
    }
}

impl Default for GlobalLock {
    fn default() -> Self {
        Self::new()
    }
}
