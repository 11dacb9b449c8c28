// =============================================================================
// KestrelOS — Hosted CPU (test builds only)
// =============================================================================
//
// A `Cpu` implementation for the host: every "core" is a std thread, the
// local interrupt flag is thread-local state, and starting a secondary core
// means spawning a thread at the requested entry point. This is what lets
// the bring-up handshake and the lock protocols be hammered by real
// parallelism in `cargo test`, long before they ever touch hardware.
//
// The interrupt flag here is bookkeeping, not behavior: nothing actually
// stops delivering anything. What the tests verify is the PROTOCOL: that
// keys nest, restore the right prior state, and are reported correctly by
// irq_unlocked().
// =============================================================================

use std::cell::Cell;
use std::thread;

use super::{Cpu, CpuEntry, IrqKey};

thread_local! {
    /// The simulated local interrupt-enable flag of the calling "core".
    static IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };

    /// Whether the calling "core" is inside a simulated interrupt handler.
    static IN_ISR: Cell<bool> = const { Cell::new(false) };
}

/// Host-thread-backed CPU services for unit tests.
pub struct HostedCpu {
    cores: usize,
}

impl HostedCpu {
    pub fn new(cores: usize) -> Self {
        Self { cores }
    }

    /// Reports the calling thread's simulated interrupt-enable flag.
    pub fn irqs_enabled() -> bool {
        IRQ_ENABLED.with(Cell::get)
    }

    /// Runs `f` as if the calling thread were inside an interrupt handler.
    pub fn with_isr<R>(f: impl FnOnce() -> R) -> R {
        IN_ISR.with(|isr| isr.set(true));
        let result = f();
        IN_ISR.with(|isr| isr.set(false));
        result
    }
}

impl Cpu for HostedCpu {
    fn irq_lock(&self) -> IrqKey {
        let was_enabled = IRQ_ENABLED.with(|irq| irq.replace(false));
        IrqKey(usize::from(was_enabled))
    }

    fn irq_unlock(&self, key: IrqKey) {
        IRQ_ENABLED.with(|irq| irq.set(key.0 != 0));
    }

    fn irq_unlocked(&self, key: IrqKey) -> bool {
        key.0 != 0
    }

    fn is_in_isr(&self) -> bool {
        IN_ISR.with(Cell::get)
    }

    fn num_cpus(&self) -> usize {
        self.cores
    }

    fn init_cpu(&self, _cpu_id: usize) {}

    unsafe fn start_cpu(&self, cpu_id: usize, entry: CpuEntry, arg: usize) {
        thread::Builder::new()
            .name(format!("cpu{cpu_id}"))
            .spawn(move || entry(cpu_id, arg))
            .expect("spawning a simulated core");
    }

    fn relax(&self) {
        thread::yield_now();
    }
}
