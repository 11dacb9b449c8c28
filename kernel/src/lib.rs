// =============================================================================
// KestrelOS — Kernel Core
// =============================================================================
//
// This crate is the concurrency backbone of the kernel: the primitives that
// must be correct under true hardware parallelism before anything else in
// the system can be.
//
// WHAT LIVES HERE:
//   - `sync::AtomicWord`     : indivisible machine-word operations
//   - `sync::SpinLock`       : IRQ-suspending busy-wait mutual exclusion
//   - `sync::GlobalLock`     : the recursive, kernel-wide critical section
//   - `smp::SmpCoordinator`  : secondary-CPU bring-up and batch release
//   - `arch::Cpu`            : the seam to architecture-specific services
//
// WHAT DOES NOT LIVE HERE:
//   Drivers, memory management, the scheduler's run-queue policy, and the
//   boot protocol that physically resets a core. The bring-up sequencer and
//   the global lock are consumed BY the scheduler; they do not contain it.
//
// WHY `cfg_attr(not(test), no_std)`:
//   On bare metal there is no std; we are below it. But these primitives
//   are exactly the kind of code that must be hammered by real parallelism
//   before it ever touches hardware, so the unit tests build against std
//   and use host threads as stand-ins for CPU cores (see `arch::hosted`).
//
// =============================================================================

#![cfg_attr(not(test), no_std)]

/// Architecture seam: the `Cpu` trait plus its implementations.
/// Contains: interrupt lock/unlock keys, core start, the x86_64 binding.
pub mod arch;

/// Secondary-CPU bring-up: the two-phase ready/start handshake and the
/// orchestrator that drives cores 1..N-1 from reset into the scheduler.
pub mod smp;

/// Synchronization primitives.
/// Contains: atomic word, spinlocks, the global recursive kernel lock.
pub mod sync;

pub use arch::{Cpu, CpuEntry, IrqKey};
pub use smp::{Handoff, SmpCoordinator, cpu_is_mobile};
pub use sync::{AtomicWord, GlobalLock, RawSpinLock, SpinLock, ThreadLockState};
