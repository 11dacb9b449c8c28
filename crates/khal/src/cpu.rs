//! x86_64 CPU primitives: interrupt-flag save/restore, spin relaxation,
//! per-core interrupt-nesting depth, and GS-based core identification.
//!
//! These are the "bottom" of the abstraction stack: thin wrappers around
//! privileged instructions with no logic of their own. Higher-level kernel
//! code reaches them through the kernel's `Cpu` seam, never directly.

use core::sync::atomic::{AtomicU32, Ordering};

use x86_64::VirtAddr;
use x86_64::instructions::interrupts;
use x86_64::registers::model_specific::{GsBase, KernelGsBase};
use x86_64::registers::rflags::{self, RFlags};

/// Maximum number of cores the per-core tables below are sized for.
pub const MAX_CORES: usize = 16;

/// Checks whether maskable interrupts are enabled on this core.
#[inline]
pub fn interrupts_enabled() -> bool {
    interrupts::are_enabled()
}

/// Saves RFLAGS and disables maskable interrupts on the calling core.
///
/// The returned word is the full prior RFLAGS value; hand it back to
/// [`irq_restore`] to reinstate the exact prior interrupt state. Save/restore
/// pairs nest, innermost first.
#[inline]
pub fn irq_save() -> u64 {
    let flags = rflags::read_raw();
    interrupts::disable();
    flags
}

/// Restores the interrupt state captured by [`irq_save`].
///
/// Only the Interrupt Flag is acted on: if interrupts were enabled when the
/// flags word was captured, STI is executed; otherwise they stay masked.
#[inline]
pub fn irq_restore(flags: u64) {
    if irqs_enabled_in(flags) {
        interrupts::enable();
    }
}

/// Whether a saved RFLAGS word was captured with interrupts enabled.
#[inline]
pub fn irqs_enabled_in(flags: u64) -> bool {
    RFlags::from_bits_truncate(flags).contains(RFlags::INTERRUPT_FLAG)
}

/// Spin-loop relaxation (PAUSE). Reduces bus contention and power draw
/// while busy-waiting on a flag another core will set.
#[inline]
pub fn pause() {
    core::hint::spin_loop();
}

// ── Per-core interrupt nesting depth ────────────────────────────────

/// Interrupt nesting depth per core. Incremented on every exception/IRQ
/// entry, decremented on exit; nonzero means "in interrupt context".
static ISR_DEPTH: [AtomicU32; MAX_CORES] = {
    const ZERO: AtomicU32 = AtomicU32::new(0);
    [ZERO; MAX_CORES]
};

/// Marks interrupt entry on `core`. Called from the exception entry stub.
#[inline]
pub fn isr_enter(core: usize) {
    ISR_DEPTH[core].fetch_add(1, Ordering::Relaxed);
}

/// Marks interrupt exit on `core`. Called from the exception return path.
#[inline]
pub fn isr_exit(core: usize) {
    ISR_DEPTH[core].fetch_sub(1, Ordering::Relaxed);
}

/// Clears the nesting depth for a core about to be (re)started.
#[inline]
pub fn isr_reset(core: usize) {
    ISR_DEPTH[core].store(0, Ordering::Relaxed);
}

/// Whether `core` is currently executing an interrupt handler.
#[inline]
pub fn in_isr(core: usize) -> bool {
    ISR_DEPTH[core].load(Ordering::Relaxed) != 0
}

// ── Core identification via GS ──────────────────────────────────────

/// Installs the calling core's per-core block address into both GS base
/// MSRs, so `core_id()` and the swapgs-based syscall entry agree on it.
///
/// # Safety
/// `block` must point to a live per-core block whose first field is the
/// core's `u32` id, and must remain valid for the lifetime of the core.
pub unsafe fn install_core_block(block: u64) {
    let addr = VirtAddr::new(block);
    GsBase::write(addr);
    KernelGsBase::write(addr);
}

/// Gets the current core's id via the GS register.
///
/// Reads the first u32 at the GS base, which is the id field of the
/// per-core block installed by [`install_core_block`] (guaranteed at
/// offset 0 by `#[repr(C)]` on the block).
#[inline]
pub fn core_id() -> u32 {
    let id: u32;
    // SAFETY: GS base was installed at core bring-up; reading through it
    // has no side effects.
    unsafe {
        core::arch::asm!(
            "mov {:e}, gs:[0]",
            out(reg) id,
            options(nomem, nostack, preserves_flags)
        );
    }
    id
}
