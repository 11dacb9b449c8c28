// =============================================================================
// KestrelOS — Architecture Abstraction
// =============================================================================
//
// The kernel core never touches architecture-specific machinery directly.
// Everything it needs from the hardware (interrupt masking, the number of
// cores, the trampoline that resets a secondary core into a Rust entry
// point) is expressed through the `Cpu` trait below.
//
// Two implementations exist:
//   - `x86_64::X64Cpu`: the real thing, built on the `khal` crate
//   - `hosted::HostedCpu`: test-only; "cores" are host threads and the
//     "interrupt flag" is thread-local state
//
// To add a new architecture:
//   1. Create `arch/<arch>.rs` with a type implementing `Cpu`
//   2. Add a `#[cfg(target_arch = "...")]` module declaration here
//   3. Everything else just works
// =============================================================================

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(test)]
pub mod hosted;

/// Opaque interrupt-state key.
///
/// Returned by [`Cpu::irq_lock`] and consumed, unchanged, by
/// [`Cpu::irq_unlock`]. The key captures whatever the architecture needs to
/// restore the caller's prior local-interrupt state; on x86_64 it is the
/// saved RFLAGS word. Callers must treat it as opaque.
#[derive(Clone, Copy, Debug)]
#[must_use = "an unconsumed IrqKey leaves local interrupts masked"]
pub struct IrqKey(pub(crate) usize);

/// Entry routine executed on a freshly started secondary core.
///
/// Receives the core's logical id and the opaque argument that was passed to
/// [`Cpu::start_cpu`].
pub type CpuEntry = fn(cpu_id: usize, arg: usize);

/// Services the kernel core consumes from the architecture layer.
///
/// Implementations must be callable from any core, in thread or interrupt
/// context. The interrupt-masking operations act on the *calling* core only;
/// there is no cross-core interrupt control at this seam.
pub trait Cpu: Sync + Sized + 'static {
    /// Disables local interrupt delivery and returns a key capturing the
    /// prior state. Keys nest: each `irq_lock` pairs with exactly one
    /// `irq_unlock` of its own key, innermost first.
    fn irq_lock(&self) -> IrqKey;

    /// Restores local interrupt state from a key produced by [`Cpu::irq_lock`]
    /// on this same core.
    fn irq_unlock(&self, key: IrqKey);

    /// Reports whether `key` was captured while interrupts were enabled,
    /// that is, whether the caller was *outside* any locked region when it
    /// took the key.
    fn irq_unlocked(&self, key: IrqKey) -> bool;

    /// Reports whether the calling core is currently executing an interrupt
    /// handler.
    fn is_in_isr(&self) -> bool;

    /// Number of logical cores in the system, including the boot core.
    fn num_cpus(&self) -> usize;

    /// Performs core-local bookkeeping for `cpu_id` before that core is
    /// started (per-CPU structures, interrupt stacks). Called on the
    /// orchestrating core, never on `cpu_id` itself.
    fn init_cpu(&self, cpu_id: usize);

    /// Begins executing `entry(cpu_id, arg)` on the given secondary core.
    ///
    /// Returns as soon as the start request is issued; the new core runs
    /// concurrently from here on.
    ///
    /// # Safety
    /// `arg` must remain valid for as long as the started core may
    /// dereference it; in practice, for the lifetime of the system.
    /// `cpu_id` must identify a core that is currently halted.
    unsafe fn start_cpu(&self, cpu_id: usize, entry: CpuEntry, arg: usize);

    /// Busy-wait relaxation hint, executed between polls of a spin loop.
    fn relax(&self) {
        core::hint::spin_loop();
    }
}
