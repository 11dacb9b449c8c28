// =============================================================================
// KestrelOS — Kernel Synchronization Primitives
// =============================================================================
//
// This module provides synchronization primitives for the kernel.
// In a kernel, we can't use std::sync (there is no std). We need our own
// primitives that work in a bare-metal, multi-core, interrupt-driven
// environment, and they must work BEFORE the scheduler exists, because
// the bring-up path uses them to start the scheduler in the first place.
// That is why every wait here is a busy-wait: nothing at this layer may
// depend on the scheduler's blocking machinery.
//
// LAYERING (innermost first):
//   Level 1: AtomicWord       : the only cross-core ordering primitive
//   Level 2: RawSpinLock      : CAS test-and-set + local IRQ suspension
//   Level 3: GlobalLock       : recursion-aware, kernel-wide, per-thread owned
//
// NEVER acquire a RawSpinLock while holding the GlobalLock unless the
// spinlock is strictly leaf-scoped. Violating this WILL cause deadlocks
// on multi-core.
// =============================================================================

pub mod atomic;
pub mod global_lock;
pub mod spinlock;

pub use self::atomic::AtomicWord;
pub use self::global_lock::{GlobalLock, ThreadLockState};
pub use self::spinlock::{RawSpinLock, SpinLock, SpinLockGuard};

/// Spins until `ready` returns true, invoking `relax` between polls.
///
/// This is the single funnel for every unbounded wait in the crate. In
/// production there is no cap and no timeout: each of these waits has
/// exactly one setter whose obligation is unconditional, so the wait is
/// always eventually satisfied and a timeout would only mask bugs. Test
/// builds carry an iteration budget so a broken handshake fails the test
/// run instead of hanging it.
pub(crate) fn spin_until<R, P>(mut ready: R, mut relax: P)
where
    R: FnMut() -> bool,
    P: FnMut(),
{
    #[cfg(test)]
    let mut budget: u64 = 50_000_000;

    while !ready() {
        #[cfg(test)]
        {
            budget -= 1;
            assert!(budget != 0, "spin wait exceeded its test iteration budget");
        }
        relax();
    }
}
