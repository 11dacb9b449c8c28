// =============================================================================
// KestrelOS — x86_64 CPU Binding
// =============================================================================
//
// Implements the `Cpu` seam on top of `khal`. The interrupt key is the
// saved RFLAGS word; "in interrupt context" is khal's per-core nesting
// depth, indexed by the GS-resident core id.
//
// The one thing this binding does NOT own is the physical reset of a
// secondary core: INIT/SIPI sequencing (or the boot protocol's equivalent)
// belongs to the boot layer, which injects its trampoline here as a
// function pointer at construction. By the time that trampoline runs Rust
// code on the new core, it must call the entry it was given — everything
// after that point is the portable handshake in `smp`.
// =============================================================================

use super::{Cpu, CpuEntry, IrqKey};

/// Boot-layer trampoline that resets core `cpu_id` and lands it in
/// `entry(cpu_id, arg)` with a valid stack, paging enabled, and interrupts
/// masked.
///
/// # Safety
/// Same contract as [`Cpu::start_cpu`].
pub type CpuStarter = unsafe fn(cpu_id: usize, entry: CpuEntry, arg: usize);

/// x86_64 CPU services.
pub struct X64Cpu {
    cpus: usize,
    starter: CpuStarter,
}

impl X64Cpu {
    /// Binds the detected core count and the boot layer's start trampoline.
    ///
    /// `cpus` comes from whatever enumerated the topology (MADT, the boot
    /// protocol's CPU list); it includes the boot core.
    pub fn new(cpus: usize, starter: CpuStarter) -> Self {
        Self { cpus, starter }
    }
}

impl Cpu for X64Cpu {
    fn irq_lock(&self) -> IrqKey {
        IrqKey(khal::cpu::irq_save() as usize)
    }

    fn irq_unlock(&self, key: IrqKey) {
        khal::cpu::irq_restore(key.0 as u64);
    }

    fn irq_unlocked(&self, key: IrqKey) -> bool {
        khal::cpu::irqs_enabled_in(key.0 as u64)
    }

    fn is_in_isr(&self) -> bool {
        khal::cpu::in_isr(khal::cpu::core_id() as usize)
    }

    fn num_cpus(&self) -> usize {
        self.cpus
    }

    fn init_cpu(&self, cpu_id: usize) {
        // A core about to be (re)started has no live interrupt frames.
        khal::cpu::isr_reset(cpu_id);
    }

    unsafe fn start_cpu(&self, cpu_id: usize, entry: CpuEntry, arg: usize) {
        // SAFETY: forwarded contract; the starter was supplied by the boot
        // layer that owns the reset machinery.
        unsafe { (self.starter)(cpu_id, entry, arg) }
    }

    fn relax(&self) {
        khal::cpu::pause();
    }
}
