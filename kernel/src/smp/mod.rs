// =============================================================================
// KestrelOS — SMP Bring-up
// =============================================================================
//
// Drives every secondary core from reset into the scheduler, exactly once,
// using a two-phase handshake:
//
//   ready_flag : "this core's low-level init completed"; cleared by the
//                orchestrator before each start, set exactly once by the
//                secondary core at its readiness checkpoint, busy-waited on
//                by the orchestrator.
//   start_flag : "all brought-up cores may now enter the scheduler"; one
//                shared gate set once per batch, after EVERY core in the
//                batch has reached its readiness checkpoint.
//
// Separating the two keeps a core that races ahead from observing
// partially-initialized shared state: no core passes its scheduler-handoff
// point until the orchestrator has seen every core's readiness AND released
// the batch.
//
// Cores are started one at a time, not concurrently; that is what lets a
// single reused ready_flag serve every bring-up cycle.
//
// FAILURE MODEL:
//   None of this times out. A core that never signals readiness hangs the
//   orchestrator forever; that is an accepted fatal boot condition, caught
//   in development, not recovered from at runtime.
// =============================================================================

use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::{Cpu, IrqKey};
use crate::sync::atomic::AtomicWord;
use crate::sync::global_lock::ThreadLockState;
use crate::sync::spin_until;

/// Maximum number of cores supported. `Cpu::num_cpus` is clamped to this.
pub const MAX_CPUS: usize = 16;

/// The scheduler-side services a freshly started core hands off into.
///
/// Both operations run ON the new core, after the batch release. They are
/// consumed here, not specified: the idle-context initializer and the swap
/// primitive belong to the scheduler proper.
pub trait Handoff: Sync + Sized + 'static {
    /// Prepares the core-local idle/dummy thread context for `cpu_id`.
    fn init_idle(&self, cpu_id: usize);

    /// Hands `cpu_id` off to the scheduler. In production this never
    /// returns; the hosted test implementation returns so simulated cores
    /// can wind down.
    fn enter_scheduler(&self, cpu_id: usize);
}

/// Orchestrates secondary-core bring-up.
///
/// Owns the handshake flags and the per-core online bookkeeping. One of
/// these exists per kernel, constructed by top-level initialization and
/// outliving every core, which is why the starting entry points take
/// `&'static self`.
pub struct SmpCoordinator<C: Cpu, H: Handoff> {
    cpu: C,
    handoff: H,

    /// Batch release gate, shared by every core started in one batch.
    start_flag: AtomicWord,

    /// Readiness signal for the core currently being started. Reused
    /// sequentially; cleared before each start request.
    ready_flag: AtomicWord,

    /// Which logical cores have reached their readiness checkpoint.
    /// Core 0 is the initiator and is online from construction.
    online: [AtomicBool; MAX_CPUS],
}

impl<C: Cpu, H: Handoff> SmpCoordinator<C, H> {
    /// Creates the coordinator with only the boot core online.
    pub fn new(cpu: C, handoff: H) -> Self {
        let online: [AtomicBool; MAX_CPUS] = core::array::from_fn(|_| AtomicBool::new(false));
        online[0].store(true, Ordering::Relaxed);
        Self {
            cpu,
            handoff,
            start_flag: AtomicWord::new(0),
            ready_flag: AtomicWord::new(0),
            online,
        }
    }

    /// The architecture services this coordinator was built over.
    pub fn cpu(&self) -> &C {
        &self.cpu
    }

    /// Brings up all secondary cores. Called exactly once at kernel
    /// startup, on core 0, after core 0's own initialization.
    ///
    /// Starts cores 1..N-1 sequentially (each start blocks until that
    /// core signals readiness) and only then opens the start gate once,
    /// releasing the whole batch into the scheduler simultaneously.
    pub fn smp_init(&'static self) {
        self.start_flag.clear();

        let detected = self.cpu.num_cpus();
        if detected > MAX_CPUS {
            log::warn!("smp: {} cores detected, capping at {}", detected, MAX_CPUS);
        }

        let cpus = self.num_cpus();
        log::info!("smp: bringing up {} secondary cores", cpus - 1);

        for cpu_id in 1..cpus {
            self.start_cpu(cpu_id);
        }

        self.start_flag.set(1);
        log::info!("smp: batch released, {} cores online", self.online_cpus());
    }

    /// Brings up one additional core outside the initial batch
    /// (hotplug-style). The start gate is already open, or is opened now,
    /// so the core proceeds straight through its handshake.
    pub fn smp_start_cpu(&'static self, cpu_id: usize) {
        self.start_flag.set(1);
        self.start_cpu(cpu_id);
    }

    /// Number of cores that have reached their readiness checkpoint,
    /// including the boot core.
    pub fn online_cpus(&self) -> usize {
        self.online
            .iter()
            .filter(|c| c.load(Ordering::Acquire))
            .count()
    }

    /// True iff `cpu_id` has reached its readiness checkpoint.
    pub fn is_online(&self, cpu_id: usize) -> bool {
        cpu_id < MAX_CPUS && self.online[cpu_id].load(Ordering::Acquire)
    }

    fn num_cpus(&self) -> usize {
        self.cpu.num_cpus().min(MAX_CPUS)
    }

    /// Starts one secondary core and blocks until it signals readiness.
    fn start_cpu(&'static self, cpu_id: usize) {
        debug_assert!(cpu_id != 0 && cpu_id < self.num_cpus());

        self.cpu.init_cpu(cpu_id);
        self.ready_flag.clear();

        log::debug!("smp: starting core {}", cpu_id);
        // SAFETY: `self` is 'static, so the address handed to the new core
        // outlives it; the core is halted because each core is started
        // exactly once, sequentially.
        unsafe {
            self.cpu
                .start_cpu(cpu_id, secondary_entry::<C, H>, self as *const Self as usize);
        }

        spin_until(|| self.ready_flag.get() != 0, || self.cpu.relax());
        log::debug!("smp: core {} ready", cpu_id);
    }

    /// Top-level continuation for a secondary core, running ON that core.
    fn secondary_main(&self, cpu_id: usize) {
        // Readiness checkpoint: unblocks the orchestrator's start_cpu()...
        self.online[cpu_id].store(true, Ordering::Release);
        self.ready_flag.set(1);

        // ...while this core independently waits for the batch release.
        spin_until(|| self.start_flag.get() != 0, || self.cpu.relax());

        self.handoff.init_idle(cpu_id);
        log::info!("smp: core {} entering scheduler", cpu_id);
        self.handoff.enter_scheduler(cpu_id);
    }
}

/// Arch-level entry trampoline target for secondary cores.
fn secondary_entry<C: Cpu, H: Handoff>(cpu_id: usize, arg: usize) {
    // SAFETY: `arg` is the address of the 'static coordinator that issued
    // the start request; see SmpCoordinator::start_cpu.
    let coordinator = unsafe { &*(arg as *const SmpCoordinator<C, H>) };
    coordinator.secondary_main(cpu_id);
}

/// Reports whether the calling thread, at this exact instant, could safely
/// be migrated to a different core if preempted.
///
/// A thread is pinned while it runs in interrupt context, while it sits
/// inside an interrupt-locked region, or while it holds the global lock
/// (which implies the former for its whole critical section).
pub fn cpu_is_mobile<C: Cpu>(cpu: &C, thread: &ThreadLockState) -> bool {
    let key: IrqKey = cpu.irq_lock();
    let pinned = cpu.is_in_isr() || !cpu.irq_unlocked(key) || thread.holds_global_lock();
    cpu.irq_unlock(key);
    !pinned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::hosted::HostedCpu;
    use crate::sync::global_lock::GlobalLock;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Hosted scheduler seam: records what each simulated core did.
    struct TestHandoff {
        idle_inited: [AtomicBool; MAX_CPUS],
        entered: AtomicUsize,
    }

    impl TestHandoff {
        fn new() -> Self {
            Self {
                idle_inited: core::array::from_fn(|_| AtomicBool::new(false)),
                entered: AtomicUsize::new(0),
            }
        }
    }

    impl Handoff for TestHandoff {
        fn init_idle(&self, cpu_id: usize) {
            self.idle_inited[cpu_id].store(true, Ordering::Release);
        }

        fn enter_scheduler(&self, _cpu_id: usize) {
            self.entered.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn leaked(cores: usize) -> &'static SmpCoordinator<HostedCpu, TestHandoff> {
        Box::leak(Box::new(SmpCoordinator::new(
            HostedCpu::new(cores),
            TestHandoff::new(),
        )))
    }

    static LOG_LINES: std::sync::Mutex<String> = std::sync::Mutex::new(String::new());

    fn capture_sink(args: core::fmt::Arguments) {
        use std::fmt::Write;
        let _ = LOG_LINES.lock().unwrap().write_fmt(args);
    }

    fn wait_for_entered(coord: &SmpCoordinator<HostedCpu, TestHandoff>, n: usize) {
        spin_until(
            || coord.handoff.entered.load(Ordering::Acquire) == n,
            || std::thread::yield_now(),
        );
    }

    #[test]
    fn smp_init_brings_up_every_secondary_core() {
        klog::init(capture_sink);
        let coord = leaked(4);
        coord.smp_init();

        // smp_init must not return before cores 1..=3 signalled readiness.
        for cpu_id in 1..4 {
            assert!(coord.is_online(cpu_id), "core {cpu_id} not online");
        }
        assert_eq!(coord.online_cpus(), 4);

        wait_for_entered(coord, 3);
        for cpu_id in 1..4 {
            assert!(coord.handoff.idle_inited[cpu_id].load(Ordering::Acquire));
        }

        // The bring-up path logs through the kernel logger installed above.
        let lines = LOG_LINES.lock().unwrap();
        assert!(lines.contains("bringing up 3 secondary cores"));
        assert!(lines.contains("batch released"));
    }

    #[test]
    fn ready_cores_hold_at_the_gate_until_batch_release() {
        let coord = leaked(4);
        coord.start_flag.clear();

        // Start the whole batch by hand, without opening the gate.
        for cpu_id in 1..4 {
            coord.start_cpu(cpu_id);
            assert!(coord.is_online(cpu_id));
        }

        // Every core is alive and initialized, but none may reach the
        // scheduler before the single release point.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(coord.handoff.entered.load(Ordering::Acquire), 0);

        coord.start_flag.set(1);
        wait_for_entered(coord, 3);
    }

    #[test]
    fn smp_start_cpu_does_not_batch() {
        let coord = leaked(4);

        // A single post-boot start: the gate opens immediately, so the core
        // runs straight through to the scheduler with no further action.
        coord.smp_start_cpu(2);
        assert!(coord.is_online(2));
        wait_for_entered(coord, 1);
        assert!(coord.handoff.idle_inited[2].load(Ordering::Acquire));
    }

    #[test]
    fn single_core_system_has_nothing_to_do() {
        let coord = leaked(1);
        coord.smp_init();
        assert_eq!(coord.online_cpus(), 1);
        assert_eq!(coord.handoff.entered.load(Ordering::Acquire), 0);
    }

    #[test]
    fn mobility_follows_isr_and_lock_state() {
        let cpu = HostedCpu::new(1);
        let lock = GlobalLock::new();
        let me = ThreadLockState::new();

        assert!(cpu_is_mobile(&cpu, &me));

        // Inside an interrupt handler: pinned.
        HostedCpu::with_isr(|| {
            assert!(!cpu_is_mobile(&cpu, &me));
        });

        // Inside an interrupt-locked region: pinned.
        let key = cpu.irq_lock();
        assert!(!cpu_is_mobile(&cpu, &me));
        cpu.irq_unlock(key);

        // Holding the global lock: pinned until the last release.
        let key = lock.acquire(&cpu, &me);
        assert!(!cpu_is_mobile(&cpu, &me));
        lock.release(&cpu, &me, key);
        assert!(cpu_is_mobile(&cpu, &me));
    }
}
