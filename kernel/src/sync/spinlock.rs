// =============================================================================
// KestrelOS — Spinlock
// =============================================================================
//
// Busy-wait mutual exclusion for a multi-core kernel, in two layers:
//
//   - `RawSpinLock`: the protocol itself. Disable local interrupts, CAS
//     test-and-set on an AtomicWord, hand the caller an IrqKey to pass back
//     on unlock. No data, no ownership tracking, no recursion.
//   - `SpinLock<T>`: the ergonomic form. Wraps a value and returns an RAII
//     guard, so the unlock and the interrupt restore can never be forgotten.
//
// IRQ SAFETY:
//   When we acquire a spinlock, we MUST disable interrupts on the current
//   core first. Otherwise:
//     1. Thread A holds lock L with interrupts enabled
//     2. Interrupt fires on same core
//     3. Interrupt handler tries to acquire lock L
//     4. DEADLOCK — the handler spins forever because Thread A can't release
//        the lock until the handler returns
//
//   The prior interrupt state travels in the IrqKey so nested lock/unlock
//   pairs restore it exactly.
//
// RECURSION:
//   Not supported. A second lock() by the same caller before unlock() spins
//   forever. That is a documented caller obligation, not a runtime-detected
//   error; recursion belongs to the GlobalLock, layered above.
// =============================================================================

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use crate::arch::{Cpu, IrqKey};
use crate::sync::atomic::AtomicWord;
use crate::sync::spin_until;

const UNLOCKED: usize = 0;
const LOCKED: usize = 1;

/// The bare spinlock protocol: an atomic "held" flag plus local-interrupt
/// suspension. Safe to use from interrupt handlers and from thread context,
/// on any core. Never recursively acquired by the same caller.
#[derive(Debug)]
pub struct RawSpinLock {
    held: AtomicWord,
}

impl RawSpinLock {
    /// Creates an unlocked lock.
    pub const fn new() -> Self {
        Self {
            held: AtomicWord::new(UNLOCKED),
        }
    }

    /// Disables local interrupts, then spins until this call exclusively
    /// sets the held flag. Returns the key that must be passed, unchanged,
    /// to [`RawSpinLock::unlock`].
    pub fn lock<C: Cpu>(&self, cpu: &C) -> IrqKey {
        let key = cpu.irq_lock();
        spin_until(
            || self.held.compare_and_swap(UNLOCKED, LOCKED),
            || cpu.relax(),
        );
        key
    }

    /// Attempts a single test-and-set without spinning.
    ///
    /// On success returns the interrupt key; on failure the prior interrupt
    /// state is restored immediately and `None` is returned.
    pub fn try_lock<C: Cpu>(&self, cpu: &C) -> Option<IrqKey> {
        let key = cpu.irq_lock();
        if self.held.compare_and_swap(UNLOCKED, LOCKED) {
            Some(key)
        } else {
            cpu.irq_unlock(key);
            None
        }
    }

    /// Clears the held flag, then restores local interrupt state from `key`.
    pub fn unlock<C: Cpu>(&self, cpu: &C, key: IrqKey) {
        self.held.clear();
        cpu.irq_unlock(key);
    }

    /// Reports whether some caller currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.held.get() != UNLOCKED
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// A spinlock that owns the data it protects and disables interrupts while
/// held.
///
/// # Type Parameter
/// - `T`: The data protected by the lock. Must be `Send` because ownership
///   effectively transfers between cores when the lock is acquired.
pub struct SpinLock<T> {
    raw: RawSpinLock,

    /// The protected data. UnsafeCell is required because we mutate through
    /// a shared reference (the lock ensures exclusive access at runtime).
    data: UnsafeCell<T>,
}

// SAFETY: SpinLock<T> can be shared between cores as long as T itself can be
// sent between them. The raw lock ensures only one core accesses T at a time.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock wrapping the given value.
    ///
    /// Const so spinlocks can be used in statics and in context structs
    /// built before secondary cores exist.
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawSpinLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, disabling interrupts on the current core.
    ///
    /// Returns a guard providing `Deref`/`DerefMut` access to the protected
    /// data. The lock is released (and the prior interrupt state restored)
    /// when the guard is dropped.
    pub fn lock<'a, C: Cpu>(&'a self, cpu: &'a C) -> SpinLockGuard<'a, T, C> {
        let key = self.raw.lock(cpu);
        SpinLockGuard {
            lock: self,
            cpu,
            key,
        }
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// Useful in interrupt handlers where spinning is dangerous: if the
    /// interrupted code holds the lock, try_lock fails immediately instead
    /// of deadlocking.
    pub fn try_lock<'a, C: Cpu>(&'a self, cpu: &'a C) -> Option<SpinLockGuard<'a, T, C>> {
        self.raw.try_lock(cpu).map(|key| SpinLockGuard {
            lock: self,
            cpu,
            key,
        })
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// `&mut self` guarantees exclusive access at compile time, so no lock
    /// is needed. Useful during initialization before the lock is shared.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

/// RAII guard for a held spinlock.
///
/// While this guard exists, the holder has exclusive access to the protected
/// data and interrupts are disabled on the holder's core.
pub struct SpinLockGuard<'a, T, C: Cpu> {
    lock: &'a SpinLock<T>,
    cpu: &'a C,
    key: IrqKey,
}

impl<T, C: Cpu> Deref for SpinLockGuard<'_, T, C> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: We hold the lock, so we have exclusive access.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, C: Cpu> DerefMut for SpinLockGuard<'_, T, C> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: We hold the lock, so we have exclusive access.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T, C: Cpu> Drop for SpinLockGuard<'_, T, C> {
    fn drop(&mut self) {
        self.lock.raw.unlock(self.cpu, self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::hosted::HostedCpu;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn lock_restores_prior_interrupt_state() {
        let cpu = HostedCpu::new(1);
        let lock = RawSpinLock::new();

        assert!(HostedCpu::irqs_enabled());
        let key = lock.lock(&cpu);
        assert!(!HostedCpu::irqs_enabled());
        assert!(lock.is_held());
        lock.unlock(&cpu, key);
        assert!(HostedCpu::irqs_enabled());
        assert!(!lock.is_held());
    }

    #[test]
    fn nested_irq_keys_restore_innermost_first() {
        let cpu = HostedCpu::new(1);
        let outer = RawSpinLock::new();
        let inner = RawSpinLock::new();

        let outer_key = outer.lock(&cpu);
        let inner_key = inner.lock(&cpu);
        inner.unlock(&cpu, inner_key);
        // Interrupts stay masked until the outermost key is consumed.
        assert!(!HostedCpu::irqs_enabled());
        outer.unlock(&cpu, outer_key);
        assert!(HostedCpu::irqs_enabled());
    }

    #[test]
    fn try_lock_fails_and_restores_when_held() {
        let cpu = HostedCpu::new(1);
        let lock = RawSpinLock::new();

        let key = lock.lock(&cpu);
        assert!(lock.try_lock(&cpu).is_none());
        // The failed attempt must not clobber the saved interrupt state.
        assert!(!HostedCpu::irqs_enabled());
        lock.unlock(&cpu, key);
        assert!(HostedCpu::irqs_enabled());
        let key = lock.try_lock(&cpu).expect("lock is free");
        lock.unlock(&cpu, key);
    }

    #[test]
    fn guarded_counter_survives_contention() {
        let cpu = Arc::new(HostedCpu::new(4));
        let counter = Arc::new(SpinLock::new(0u64));

        let mut workers = Vec::new();
        for _ in 0..4 {
            let cpu = Arc::clone(&cpu);
            let counter = Arc::clone(&counter);
            workers.push(thread::spawn(move || {
                for _ in 0..25_000 {
                    *counter.lock(&*cpu) += 1;
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(*counter.lock(&*cpu), 100_000);
    }

    #[test]
    fn get_mut_bypasses_locking() {
        let cpu = HostedCpu::new(1);
        let mut lock = SpinLock::new(41);
        *lock.get_mut() += 1;
        assert_eq!(*lock.lock(&cpu), 42);
    }
}
