//! Linux-style layered random number generator core.
//!
//! Collects entropy from interrupts, scheduler ticks, hardware RNGs, and
//! opportunistic input events into a per-CPU hash pool and an auxiliary
//! pool (A, B, X), health-tests it (C), analyzes timestamp LSBs for a
//! shared low-bit factor (D), blends sources into seed material (E),
//! feeds one or more DRBG instances per NUMA node (F, G), drives the
//! stage state machine that governs when readers may draw output (H),
//! and allows the hash/DRBG primitives themselves to be hot-swapped
//! without losing accumulated entropy (I).
//!
//! This crate never reads a hardware clock, interrupt controller, or
//! scheduler itself — [`ClockSource`](timestamp::ClockSource) and the
//! `EntropySource`/`HashCallbacks`/`DrngCallbacks` traits in
//! [`callbacks`] are the seams the embedding kernel (or, for tests, a
//! host fixture) plugs into.
#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod aux_pool;
pub mod callbacks;
pub mod config;
pub mod default_crypto;
pub mod drng;
pub mod entropy_source;
pub mod error;
pub mod gcd;
pub mod health;
pub mod numa;
pub mod percpu;
pub mod percpu_pool;
pub mod seed_buffer;
pub mod seeding;
pub mod slot_array;
pub mod switch;
pub mod timestamp;

use alloc::vec;

use aux_pool::AuxPool;
use callbacks::{CallbackSet, EntropySource, HashCallbacks};
use config::Config;
use drng::DrngInstance;
use entropy_source::EntropySourceManager;
use error::{LrngError, Result};
use gcd::GcdAnalyzer;
use health::{HealthTester, Verdict};
use numa::NumaDrngArray;
use percpu_pool::PerCpuPool;
use seeding::SeedingStateMachine;
use switch::CryptoSwitcher;
use timestamp::ClockSource;

/// Bit flags for [`Lrng::get_seed`] and (conceptually) the blocking
/// output queries (§6).
pub mod flags {
    /// Convert a would-block condition into [`crate::error::LrngError::Again`]
    /// instead of actually blocking.
    pub const NONBLOCK: u32 = 1 << 0;
    /// Request runtime-rate entropy accounting rather than the more
    /// conservative initial-seeding rate.
    pub const FULLY_SEEDED: u32 = 1 << 1;
}

/// Which entropy source fed one event, for dispatch inside
/// [`Lrng::add_interrupt_event`]/[`Lrng::add_scheduler_event`] into the
/// right per-CPU slot array plus health tester pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EventClass {
    Interrupt,
    Scheduler,
}

/// Top-level wiring of all nine components behind the §6 surface.
///
/// Generic over nothing: collaborators (clock, CPU RNG, jitter RNG) are
/// trait objects supplied at construction, since the core itself never
/// picks a concrete implementation for them (§6 "not implemented by the
/// core").
pub struct Lrng<'a> {
    config: Config,
    clock: &'a dyn ClockSource,

    percpu: PerCpuPool,
    aux: AuxPool,
    gcd: GcdAnalyzer,
    irq_health: HealthTester,
    sched_health: HealthTester,

    numa: NumaDrngArray,
    seeding: SeedingStateMachine,
    switcher: CryptoSwitcher,

    cpu_rng: Option<&'a dyn EntropySource>,
    jitter_rng: Option<&'a dyn EntropySource>,
}

impl<'a> Lrng<'a> {
    /// Build a fresh core. `online_nodes` seeds the NUMA array's sizing
    /// (§4.7); `cpu_rng`/`jitter_rng` are optional per §4.5 step 2 (both
    /// may be absent, in which case the hash pool and auxiliary pool
    /// alone carry the seed).
    pub fn new(
        config: Config,
        clock: &'a dyn ClockSource,
        online_nodes: usize,
        cpu_rng: Option<&'a dyn EntropySource>,
        jitter_rng: Option<&'a dyn EntropySource>,
    ) -> Self {
        let default_set = CallbackSet::new(&default_crypto::SHA3_HASH, &default_crypto::CHACHA_DRNG);
        let initial = DrngInstance::new(
            default_set,
            default_crypto::CHACHA_DRNG
                .alloc(config::SECURITY_STRENGTH_BYTES)
                .expect("default DRNG state allocation cannot fail"),
            false,
        );
        let atomic = DrngInstance::new(
            default_set,
            default_crypto::CHACHA_DRNG
                .alloc(config::SECURITY_STRENGTH_BYTES)
                .expect("default DRNG state allocation cannot fail"),
            true,
        );
        Self {
            config,
            clock,
            percpu: PerCpuPool::new(config.pool_size_log2),
            aux: AuxPool::new(),
            gcd: GcdAnalyzer::new(),
            irq_health: HealthTester::new(),
            sched_health: HealthTester::new(),
            numa: NumaDrngArray::new(initial, atomic, online_nodes),
            seeding: SeedingStateMachine::new(),
            switcher: CryptoSwitcher::new(default_set),
            cpu_rng,
            jitter_rng,
        }
    }

    fn active_hash(&self) -> &'static dyn HashCallbacks {
        self.switcher.current_alt().unwrap_or_else(|| self.switcher.default_set()).hash
    }

    fn es_manager(&self) -> EntropySourceManager<'_> {
        EntropySourceManager::new(
            &self.percpu,
            &self.aux,
            self.cpu_rng,
            self.jitter_rng,
            self.clock,
            self.config,
        )
    }

    /// Common event path for A/C: GCD-strip (or fall back to word mode),
    /// pack into `cpu`'s slot array, health-test, and on a full wrap
    /// schedule a B absorb plus an H trigger check.
    fn ingest_event(&self, cpu: usize, class: EventClass) {
        let now = self.clock.now();
        self.gcd.add_value(now.low32());

        let health = match class {
            EventClass::Interrupt => &self.irq_health,
            EventClass::Scheduler => &self.sched_health,
        };
        let verdict = health.test((now.low32() & 0xFF) as u8);

        let slots = self.percpu.slots(cpu);
        let wrapped = if self.config.high_res_timer && self.gcd.has_computed() {
            let v = now.slot_value(self.gcd.divisor(), slot_array::DEFAULT_SLOT_BITS);
            slots.insert_slot(self.gcd.divisor(), v)
        } else {
            slots.insert_word(now.low32())
        };

        match verdict {
            Verdict::Pass => slots.count_event(),
            Verdict::FailUse => {}
            Verdict::FailDrop => return,
        }

        if wrapped {
            self.percpu.absorb_array(cpu, self.active_hash());
            let entropy_bits_per_256 = match class {
                EventClass::Interrupt => self.config.irq_entropy_bits,
                EventClass::Scheduler => self.config.sched_entropy_bits,
            };
            let bits = entropy_source::events_to_bits(
                slots.n_slots(),
                default_crypto::SHA3_HASH.digest_size() as u32 * 8,
                entropy_bits_per_256,
                self.config.oversampling_factor,
                self.config.high_res_timer,
            );
            self.maybe_run_seed_work(bits);
        }
    }

    fn maybe_run_seed_work(&self, credited_bits: u32) {
        if self.seeding.pool_add_events(credited_bits, &self.config) {
            let startup_complete = self.irq_health.startup_complete() && self.sched_health.startup_complete();
            self.seeding.run_seed_work(&self.numa, &self.es_manager(), self.active_hash(), startup_complete);
        }
    }

    // ------------------------------------------------------------------
    // Event inputs (§6)
    // ------------------------------------------------------------------

    /// `add_interrupt_event(irq, flags)`. `irq` selects which per-CPU
    /// slot array receives the sample; this core has no interrupt
    /// controller of its own, so the caller's `cpu` stands in for "the
    /// CPU servicing `irq`".
    pub fn add_interrupt_event(&self, cpu: usize, _irq: u32, _flags: u32) {
        self.ingest_event(cpu, EventClass::Interrupt);
    }

    /// `add_scheduler_event(task_ptr, cpu)`.
    pub fn add_scheduler_event(&self, _task_ptr: usize, cpu: usize) {
        self.ingest_event(cpu, EventClass::Scheduler);
    }

    /// `add_hw_generator_bytes(buf, entropy_bits, may_sleep)`. Feeds the
    /// auxiliary pool, credited at the caller-asserted rate (trusted
    /// hardware source, distinct from the opportunistic zero-credit path
    /// of `add_device_randomness`). `may_sleep` is accepted for API
    /// parity with the kernel entry point but unused: this core performs
    /// no blocking allocation on the ingest path.
    pub fn add_hw_generator_bytes(&self, buf: &[u8], entropy_bits: u32, _may_sleep: bool) {
        self.aux.add(self.active_hash(), buf, entropy_bits);
        self.maybe_run_seed_work(entropy_bits);
    }

    /// `add_input_event(type, code, value)`. Input subsystem events carry
    /// no asserted entropy estimate of their own; fold the tuple into the
    /// auxiliary pool as zero-credited mixing material, same as
    /// `add_device_randomness`.
    pub fn add_input_event(&self, kind: u16, code: u16, value: i32) {
        let mut buf = [0u8; 8];
        buf[0..2].copy_from_slice(&kind.to_le_bytes());
        buf[2..4].copy_from_slice(&code.to_le_bytes());
        buf[4..8].copy_from_slice(&value.to_le_bytes());
        self.aux.add(self.active_hash(), &buf, 0);
    }

    /// `add_device_randomness(buf)` — zero-credited identity mixing.
    pub fn add_device_randomness(&self, buf: &[u8]) {
        self.aux.add(self.active_hash(), buf, 0);
    }

    /// `add_bootloader_randomness(buf, trust)` — one-shot at init;
    /// credited only when both the caller and [`Config::trust_bootloader`]
    /// agree to trust it.
    pub fn add_bootloader_randomness(&self, buf: &[u8], trust: bool) {
        let credit = if trust && self.config.trust_bootloader {
            buf.len() as u32 * 8
        } else {
            0
        };
        self.aux.add(self.active_hash(), buf, credit);
        if credit > 0 {
            self.maybe_run_seed_work(credit);
        }
    }

    // ------------------------------------------------------------------
    // Output queries (§6)
    // ------------------------------------------------------------------

    /// `get_random_bytes(buf, n)` — atomic-context path: always draws
    /// from the dedicated spinlocked atomic-context DRNG instance,
    /// regardless of seeding stage (the caller accepts whatever quality
    /// is currently available, per §6's "atomic-context path" framing).
    pub fn get_random_bytes(&self, buf: &mut [u8]) -> Result<()> {
        self.numa.atomic.generate(buf)
    }

    /// `get_random_bytes_full(buf, n)` — blocks until fully seeded. This
    /// core has no scheduler to park a waiter on, so "blocks" is modeled
    /// as the caller retrying on `Again`; see `wait_for_seeded` for an
    /// actual blocking primitive built from a caller-supplied spin/yield
    /// callback.
    pub fn get_random_bytes_full(&self, buf: &mut [u8], node: usize) -> Result<()> {
        let inst = self.numa.get(node);
        if !inst.fully_seeded() {
            return Err(LrngError::Again);
        }
        self.generate_checked(inst, buf)
    }

    /// `get_random_bytes_min(buf, n)` — blocks until min seeded.
    pub fn get_random_bytes_min(&self, buf: &mut [u8], node: usize) -> Result<()> {
        if !self.seeding.state.min_seeded() {
            return Err(LrngError::Again);
        }
        let inst = self.numa.get(node);
        self.generate_checked(inst, buf)
    }

    /// §4.6 `generate`'s full contract for non-atomic instances: per
    /// `<= MAX_REQSIZE` chunk, check `inst`'s reseed triggers (request
    /// count, age, `force_reseed`) and, if tripped, run
    /// `reseed_from_sources` against `inst` specifically before producing
    /// that chunk — this is what makes `force_reseed_all()` (P4) actually
    /// observable on the next `generate`, not just on the next scheduled
    /// seeding-work pass.
    fn generate_checked(&self, inst: &DrngInstance, buf: &mut [u8]) -> Result<()> {
        let now_secs = drng::now_secs_from(self.clock.now());
        inst.generate_with_reseed(buf, now_secs, self.config.reseed_max_seconds, || {
            self.reseed_instance_from_sources(inst)
        })
    }

    /// Run one `reseed_from_sources` round against `inst` specifically
    /// (§4.6/§4.8), folding its result back into `inst.seed`. Failures are
    /// silent here, per §7's "entropy-source failure to produce bytes:
    /// silently yields zero credited bits" — a reseed attempt that comes
    /// up dry just leaves `inst` on its prior (still valid) state for the
    /// generate call that triggered it.
    fn reseed_instance_from_sources(&self, inst: &DrngInstance) {
        let startup_complete = self.irq_health.startup_complete() && self.sched_health.startup_complete();
        if let Ok(sb) = self
            .es_manager()
            .fill_seed(self.active_hash(), config::FULL_SEED_ENTROPY_BITS, inst.fully_seeded())
        {
            let credited = sb.total_credited_bits();
            let bytes = sb.concat_bytes();
            let now_secs = drng::now_secs_from(sb.now);
            let _ = inst.seed(&bytes, credited, now_secs, startup_complete);
        }
    }

    /// `get_random_bytes_pr(buf, n) → produced_bytes` — requires a fresh
    /// reseed straight from the entropy sources (predictive resistance);
    /// never blocks, since a true predictive-resistance guarantee needs a
    /// reseed *now*, not eventually. Returns fewer bytes than requested
    /// (including zero) rather than block when the sources can't satisfy
    /// the request immediately — resolved this way over the alternative
    /// open question of blocking, since §7 already specifies the
    /// "Again"/non-blocking contract for every other query and a third
    /// behavior (silent partial fill) keeps this one's contract in the
    /// same family instead of inventing a new blocking mode solely for
    /// this entry point.
    pub fn get_random_bytes_pr(&self, buf: &mut [u8], node: usize) -> usize {
        let es = self.es_manager();
        let requested_bits = (buf.len() as u32 * 8).min(self.max_pr_request_bits());
        let sb = match es.fill_seed(self.active_hash(), requested_bits, true) {
            Ok(sb) => sb,
            Err(_) => return 0,
        };
        let credited = sb.total_credited_bits();
        if credited == 0 {
            return 0;
        }
        let bytes = sb.concat_bytes();
        let now_secs = drng::now_secs_from(sb.now);
        let inst = self.numa.get(node);
        if inst.seed(&bytes, credited, now_secs, true).is_err() {
            return 0;
        }
        let produce = ((credited / 8) as usize).min(buf.len());
        if produce == 0 {
            return 0;
        }
        match inst.generate(&mut buf[..produce]) {
            Ok(()) => produce,
            Err(_) => 0,
        }
    }

    fn max_pr_request_bits(&self) -> u32 {
        config::FULL_SEED_ENTROPY_BITS
    }

    /// `get_seed(out, flags) → bytes_or_error`. Writes `{u64 seedlen, u64
    /// entropy_rate_bits, bytes seed}` into `out` in native byte order.
    /// `flags::NONBLOCK` converts "not yet seeded" into [`LrngError::Again`]
    /// instead of the caller looping; `flags::FULLY_SEEDED` selects the
    /// runtime entropy rate over the initial-seeding rate for the
    /// `entropy_rate_bits` field.
    pub fn get_seed(&self, out: &mut [u8], flags: u32, node: usize) -> Result<usize> {
        const HEADER: usize = 16; // 2 * size_of::<u64>()
        if out.len() < core::mem::size_of::<u64>() {
            return Err(LrngError::BufferTooSmall);
        }

        let runtime_rate = flags & self::flags::FULLY_SEEDED != 0;
        let min_ready = if runtime_rate {
            self.seeding.state.fully_seeded()
        } else {
            self.seeding.state.min_seeded()
        };
        // This core has no waitqueue to park a blocking caller on, so
        // both the NONBLOCK and blocking contracts resolve to the same
        // immediate `Again` here; an embedding kernel with a real
        // blocking path would loop on `Again` itself when the flag is
        // absent.
        if !min_ready {
            return Err(LrngError::Again);
        }

        let seed_len = config::SECURITY_STRENGTH_BYTES;
        let total = HEADER + seed_len;
        if out.len() < total {
            out[0..8].copy_from_slice(&(seed_len as u64).to_ne_bytes());
            return Err(LrngError::MessageSize);
        }

        let inst = self.numa.get(node);
        let entropy_rate_bits: u64 = if runtime_rate {
            config::FULL_SEED_ENTROPY_BITS as u64
        } else {
            config::INIT_ENTROPY_BITS as u64
        };

        let mut seed = vec![0u8; seed_len];
        inst.generate_for_reseed(&mut seed)?;

        out[0..8].copy_from_slice(&(seed_len as u64).to_ne_bytes());
        out[8..16].copy_from_slice(&entropy_rate_bits.to_ne_bytes());
        out[16..16 + seed_len].copy_from_slice(&seed);

        Ok(total)
    }

    /// `wait_for_seeded()` — blocks until min-seeded; interruptible.
    /// Modeled without an OS waitqueue: `poll` is invoked between checks
    /// and its `false` return is treated as a delivered signal.
    pub fn wait_for_seeded<F: FnMut() -> bool>(&self, mut poll: F) -> Result<()> {
        while !self.seeding.state.min_seeded() {
            if !poll() {
                return Err(LrngError::Interrupted);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Administrative operations
    // ------------------------------------------------------------------

    /// Lazily provision the NUMA DRNG array (§4.7), using `alloc_node` to
    /// pick the callback set and allocate fresh DRNG state for each
    /// non-zero node. A no-op if already published.
    pub fn provision_numa<F>(&self, alloc_node: F)
    where
        F: Fn(usize) -> (CallbackSet, alloc::boxed::Box<dyn callbacks::DrngState>),
    {
        self.numa.allocate_and_publish(alloc_node);
    }

    /// §4.8 "Forced reseed": mark every DRNG instance (including per-node
    /// and the atomic instance) for reseed on next opportunity.
    pub fn force_reseed_all(&self) {
        self.seeding.force_reseed_all(&self.numa);
    }

    /// Drive one iteration of the seeding work handler directly, e.g. on
    /// a periodic timer in addition to the event-triggered path.
    pub fn run_seed_work(&self) -> seeding::WakeSignal {
        let startup_complete = self.irq_health.startup_complete() && self.sched_health.startup_complete();
        self.seeding.run_seed_work(&self.numa, &self.es_manager(), self.active_hash(), startup_complete)
    }

    /// Component I: install `new_set` as the sole permitted alternative
    /// callback pair (or fall back to the default when `None`).
    pub fn switch_callbacks(&self, new_set: Option<CallbackSet>) -> Result<()> {
        self.switcher.switch(&self.config, new_set, &self.percpu, &self.numa)
    }

    pub fn min_seeded(&self) -> bool {
        self.seeding.state.min_seeded()
    }

    pub fn fully_seeded(&self) -> bool {
        self.seeding.state.fully_seeded()
    }

    pub fn operational(&self) -> bool {
        self.seeding.state.operational()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timestamp::std_clock::StdClock;

    fn fresh_lrng(clock: &StdClock) -> Lrng<'_> {
        let config = Config::default();
        Lrng::new(config, clock, 1, None, None)
    }

    #[test]
    fn atomic_path_always_produces_bytes() {
        let clock = StdClock::new();
        let lrng = fresh_lrng(&clock);
        let mut buf = [0u8; 32];
        assert!(lrng.get_random_bytes(&mut buf).is_ok());
    }

    #[test]
    fn unseeded_min_and_full_queries_return_again() {
        let clock = StdClock::new();
        let lrng = fresh_lrng(&clock);
        let mut buf = [0u8; 32];
        assert_eq!(lrng.get_random_bytes_min(&mut buf, 0), Err(LrngError::Again));
        assert_eq!(lrng.get_random_bytes_full(&mut buf, 0), Err(LrngError::Again));
    }

    #[test]
    fn min_seeded_reached_after_enough_varied_events() {
        let clock = StdClock::new();
        let lrng = fresh_lrng(&clock);
        // Feed enough varied interrupt events across one full slot-array
        // wrap plus aggregate-event threshold to cross min-seeded.
        for i in 0..100_000u32 {
            lrng.add_interrupt_event(0, i % 16, 0);
        }
        assert!(lrng.min_seeded(), "expected min_seeded after substantial varied input");
    }

    #[test]
    fn get_seed_buffer_too_small_reports_length_only() {
        let clock = StdClock::new();
        let lrng = fresh_lrng(&clock);
        for i in 0..100_000u32 {
            lrng.add_interrupt_event(0, i % 16, 0);
        }
        let mut tiny = [0u8; 8];
        let res = lrng.get_seed(&mut tiny, 0, 0);
        assert_eq!(res, Err(LrngError::MessageSize));
        let seed_len = u64::from_ne_bytes(tiny);
        assert_eq!(seed_len as usize, config::SECURITY_STRENGTH_BYTES);
    }

    #[test]
    fn get_seed_nonblock_returns_again_before_seeded() {
        let clock = StdClock::new();
        let lrng = fresh_lrng(&clock);
        let mut out = [0u8; 64];
        assert_eq!(
            lrng.get_seed(&mut out, self::flags::NONBLOCK, 0),
            Err(LrngError::Again)
        );
    }

    #[test]
    fn force_reseed_all_marks_every_instance() {
        let clock = StdClock::new();
        let lrng = fresh_lrng(&clock);
        lrng.force_reseed_all();
        assert!(lrng.numa.initial.force_reseed());
        assert!(lrng.numa.atomic.force_reseed());
    }

    /// P4: after `force_reseed_all()`, the next `generate` on a
    /// non-atomic instance must itself have drawn from a `seed` invoked
    /// after the force call — not merely leave `force_reseed` set and
    /// otherwise change nothing.
    #[test]
    fn force_reseed_is_observed_by_next_generate() {
        let clock = StdClock::new();
        let lrng = fresh_lrng(&clock);
        for i in 0..100_000u32 {
            lrng.add_interrupt_event(0, i % 16, 0);
        }
        assert!(lrng.min_seeded());

        lrng.force_reseed_all();
        assert!(lrng.numa.initial.force_reseed());

        let mut buf = [0u8; 16];
        assert!(lrng.get_random_bytes_min(&mut buf, 0).is_ok());
        assert!(
            !lrng.numa.initial.force_reseed(),
            "generate should have driven a reseed that cleared the force flag on success"
        );
    }

    #[test]
    fn wait_for_seeded_reports_interrupted_on_false_poll() {
        let clock = StdClock::new();
        let lrng = fresh_lrng(&clock);
        let mut calls = 0;
        let result = lrng.wait_for_seeded(|| {
            calls += 1;
            calls < 3
        });
        assert_eq!(result, Err(LrngError::Interrupted));
    }

    #[test]
    fn device_randomness_never_credits_entropy() {
        let clock = StdClock::new();
        let lrng = fresh_lrng(&clock);
        lrng.add_device_randomness(b"identity-bytes-only");
        assert_eq!(lrng.aux.entropy_bits(), 0);
    }

    #[test]
    fn hw_generator_bytes_credit_aux_pool() {
        let clock = StdClock::new();
        let lrng = fresh_lrng(&clock);
        lrng.add_hw_generator_bytes(&[1u8; 32], 256, false);
        assert!(lrng.aux.entropy_bits() > 0);
    }
}
