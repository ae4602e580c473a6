//! Seeding state machine (component H, §4.8).
//!
//! Orchestrates stage transitions, wakeups, and forced reseeds across the
//! NUMA DRNG array. This core has no real work-queue/scheduler to hand a
//! deferred job to, so `pool_add_events` returns whether the caller
//! should now invoke [`SeedingStateMachine::run_seed_work`] (the
//! embedding kernel's equivalent of scheduling that work item).

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::callbacks::HashCallbacks;
use crate::config::{Config, FULL_SEED_ENTROPY_BITS, INIT_ENTROPY_BITS, MIN_SEED_ENTROPY_BITS};
use crate::entropy_source::EntropySourceManager;
use crate::numa::NumaDrngArray;

/// `{min_seeded, fully_seeded, operational, all_numa_seeded,
/// seed_work_in_progress}` (§3 "Global state G").
#[derive(Default)]
pub struct GlobalState {
    min_seeded: AtomicBool,
    fully_seeded: AtomicBool,
    operational: AtomicBool,
    all_numa_seeded: AtomicBool,
    seed_work_in_progress: AtomicBool,
    bootloader_trust_consumed: AtomicBool,
}

impl GlobalState {
    pub const fn new() -> Self {
        Self {
            min_seeded: AtomicBool::new(false),
            fully_seeded: AtomicBool::new(false),
            operational: AtomicBool::new(false),
            all_numa_seeded: AtomicBool::new(false),
            seed_work_in_progress: AtomicBool::new(false),
            bootloader_trust_consumed: AtomicBool::new(false),
        }
    }

    pub fn min_seeded(&self) -> bool {
        self.min_seeded.load(Ordering::Acquire)
    }
    pub fn fully_seeded(&self) -> bool {
        self.fully_seeded.load(Ordering::Acquire)
    }
    pub fn operational(&self) -> bool {
        self.operational.load(Ordering::Acquire)
    }
    pub fn all_numa_seeded(&self) -> bool {
        self.all_numa_seeded.load(Ordering::Acquire)
    }
    pub fn work_in_progress(&self) -> bool {
        self.seed_work_in_progress.load(Ordering::Acquire)
    }

    /// Publish-once transitions: a `store(true)` once set never reverts
    /// except through [`GlobalState::reset`] (P3).
    fn set_min_seeded(&self) {
        self.min_seeded.store(true, Ordering::Release);
    }
    fn set_fully_seeded(&self) {
        self.fully_seeded.store(true, Ordering::Release);
    }
    fn set_operational(&self) {
        self.operational.store(true, Ordering::Release);
    }

    /// Explicit reset, the only way `min_seeded`/`fully_seeded`/
    /// `operational` may revert to false (P3), and the only way
    /// `all_numa_seeded` is cleared.
    pub fn reset(&self) {
        self.min_seeded.store(false, Ordering::Release);
        self.fully_seeded.store(false, Ordering::Release);
        self.operational.store(false, Ordering::Release);
        self.all_numa_seeded.store(false, Ordering::Release);
        self.bootloader_trust_consumed.store(false, Ordering::Release);
    }
}

/// Orchestrates (E) and (G) per the triggers and work handler of §4.8.
pub struct SeedingStateMachine {
    pub state: GlobalState,
    /// Coarse wakeup-trigger level, analogous to `lrng_irq_info.num_events`:
    /// accumulates via `pool_add_events`, drained back to zero by
    /// `run_seed_work` on every successful reseed so it can clear the
    /// threshold again later rather than only once.
    aggregate_events: AtomicU32,
}

impl SeedingStateMachine {
    pub const fn new() -> Self {
        Self {
            state: GlobalState::new(),
            aggregate_events: AtomicU32::new(0),
        }
    }

    /// §4.8 trigger: `pool_add_events(n)` adds to the aggregate count and
    /// reports whether there is now enough to justify running
    /// `run_seed_work`. Mirrors `lrng_pool_add_irq`'s plain level check
    /// (`num_events < num_events_thresh`) rather than an edge-triggered
    /// "just crossed" test: `run_seed_work` drains the aggregate back
    /// down on every successful reseed (the same way `lrng_get_pool`
    /// subtracts the interrupts it actually consumed from `num_events`),
    /// so the level can clear the threshold again on a later call instead
    /// of only ever once.
    pub fn pool_add_events(&self, n: u32, config: &Config) -> bool {
        let now = self.aggregate_events.fetch_add(n, Ordering::AcqRel) + n;
        now >= config.write_wakeup_bits
            && !self.state.work_in_progress()
            && !self.state.all_numa_seeded()
    }

    /// §4.8 work handler. Walks nodes in order; reseeds the first
    /// not-fully-seeded one; once every online node is fully seeded,
    /// marks `all_numa_seeded` and stops scheduling further work from
    /// event-count triggers. Always releases the reseed mutex (held
    /// internally by `EntropySourceManager::fill_seed`) and signals
    /// wakeups via the returned [`WakeSignal`].
    pub fn run_seed_work(
        &self,
        numa: &NumaDrngArray,
        es: &EntropySourceManager<'_>,
        hash_cb: &dyn HashCallbacks,
        startup_complete: bool,
    ) -> WakeSignal {
        self.state
            .seed_work_in_progress
            .store(true, Ordering::Release);

        let mut wake = WakeSignal::default();
        let mut reseeded_any = false;

        if let Some(inst) = numa.first_not_fully_seeded() {
            if let Ok(sb) = es.fill_seed(hash_cb, FULL_SEED_ENTROPY_BITS, inst.fully_seeded()) {
                let credited = sb.total_credited_bits();
                let bytes = sb.concat_bytes();
                let now_secs = crate::drng::now_secs_from(sb.now);
                if inst.seed(&bytes, credited, now_secs, startup_complete).is_ok() {
                    reseeded_any = true;
                    self.aggregate_events.store(0, Ordering::Release);
                    self.advance_global_stage(credited, startup_complete, &mut wake);
                }
            }
        }

        if numa.all_fully_seeded() {
            self.state.all_numa_seeded.store(true, Ordering::Release);
            self.state
                .bootloader_trust_consumed
                .store(true, Ordering::Release);
            wake.all_numa_seeded = true;
        }

        self.state
            .seed_work_in_progress
            .store(false, Ordering::Release);
        wake.reseeded = reseeded_any;
        wake
    }

    fn advance_global_stage(&self, credited_bits: u32, startup_complete: bool, wake: &mut WakeSignal) {
        if credited_bits >= INIT_ENTROPY_BITS {
            wake.init = true;
        }
        if credited_bits >= MIN_SEED_ENTROPY_BITS && !self.state.min_seeded() {
            self.state.set_min_seeded();
            wake.min_seeded = true;
        }
        if credited_bits >= FULL_SEED_ENTROPY_BITS && startup_complete {
            if !self.state.fully_seeded() {
                self.state.set_fully_seeded();
                wake.fully_seeded = true;
            }
            if !self.state.operational() {
                self.state.set_operational();
                wake.operational = true;
            }
        }
    }

    /// §4.8 "Forced reseed": set `force_reseed` on every DRNG including
    /// the atomic instance.
    pub fn force_reseed_all(&self, numa: &NumaDrngArray) {
        numa.for_each(|inst| inst.set_force_reseed());
        numa.atomic.set_force_reseed();
    }
}

impl Default for SeedingStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Which wakeups a `run_seed_work` call should signal to blocked
/// readers/writers.
#[derive(Default, Clone, Copy, Debug)]
pub struct WakeSignal {
    pub init: bool,
    pub min_seeded: bool,
    pub fully_seeded: bool,
    pub operational: bool,
    pub all_numa_seeded: bool,
    pub reseeded: bool,
}
