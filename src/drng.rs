//! DRNG instance (component F, §4.6).
//!
//! Constants below (`MAX_REQSIZE = 4096`, `RESEED_THRESH = 1<<20`) are
//! grounded in `lrng_sdrng.c`'s `LRNG_DRNG_MAX_REQSIZE`/
//! `LRNG_DRNG_RESEED_THRESH`.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use spin::Mutex;

use crate::callbacks::{CallbackSet, DrngState};
use crate::config::{Config, FULL_SEED_ENTROPY_BITS, INIT_ENTROPY_BITS, MIN_SEED_ENTROPY_BITS};
use crate::error::{LrngError, Result};
use crate::timestamp::Timestamp;

pub const MAX_REQSIZE: usize = 1 << 12;
pub const RESEED_THRESH: u64 = 1 << 20;

/// §4.6 state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Stage {
    Uninitialized = 0,
    SeededMin = 1,
    SeededFull = 2,
    Operational = 3,
}

impl Stage {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Stage::Uninitialized,
            1 => Stage::SeededMin,
            2 => Stage::SeededFull,
            _ => Stage::Operational,
        }
    }
}

/// Whether a [`DrngInstance`] uses a spinlock (atomic-context instances,
/// and any instance presently on the static-default callback pair) or a
/// sleeping mutex (§5 shared-resource policy). This core has no OS
/// scheduler to hand a real sleeping mutex to, so both kinds are backed
/// by `spin::Mutex` (matching `nexa-os`'s own `drivers/random.rs`, which
/// uses `spin::Mutex` uniformly); the field only tracks which *kind* this
/// instance nominally is, for callers that care (e.g. the switcher).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockKind {
    Spin,
    Sleeping,
}

struct Inner {
    cb: CallbackSet,
    state: Box<dyn DrngState>,
}

/// Seedable, generate-capable DRNG state with request-count and
/// time-based reseed triggers (§3 "DRNG D").
pub struct DrngInstance {
    inner: Mutex<Inner>,
    lock_kind: AtomicU8_LockKind,
    requests_until_reseed: AtomicU64,
    last_seeded_secs: AtomicU64,
    fully_seeded: AtomicBool,
    force_reseed: AtomicBool,
    stage: AtomicU8,
    is_atomic_instance: bool,
}

// Small wrapper so `LockKind` can live in an atomic without pulling in an
// extra dependency for a two-variant enum.
struct AtomicU8_LockKind(AtomicU8);
impl AtomicU8_LockKind {
    const fn new(k: LockKind) -> Self {
        Self(AtomicU8::new(match k {
            LockKind::Spin => 0,
            LockKind::Sleeping => 1,
        }))
    }
    fn load(&self) -> LockKind {
        match self.0.load(Ordering::Acquire) {
            0 => LockKind::Spin,
            _ => LockKind::Sleeping,
        }
    }
    fn store(&self, k: LockKind) {
        self.0.store(
            match k {
                LockKind::Spin => 0,
                LockKind::Sleeping => 1,
            },
            Ordering::Release,
        );
    }
}

impl DrngInstance {
    pub fn new(cb: CallbackSet, state: Box<dyn DrngState>, is_atomic_instance: bool) -> Self {
        let lock_kind = if is_atomic_instance {
            LockKind::Spin
        } else {
            LockKind::Sleeping
        };
        Self {
            inner: Mutex::new(Inner { cb, state }),
            lock_kind: AtomicU8_LockKind::new(lock_kind),
            requests_until_reseed: AtomicU64::new(RESEED_THRESH),
            last_seeded_secs: AtomicU64::new(0),
            fully_seeded: AtomicBool::new(false),
            force_reseed: AtomicBool::new(false),
            stage: AtomicU8::new(Stage::Uninitialized as u8),
            is_atomic_instance,
        }
    }

    pub fn is_atomic_instance(&self) -> bool {
        self.is_atomic_instance
    }

    pub fn lock_kind(&self) -> LockKind {
        self.lock_kind.load()
    }

    pub fn set_lock_kind(&self, k: LockKind) {
        self.lock_kind.store(k);
    }

    pub fn stage(&self) -> Stage {
        Stage::from_u8(self.stage.load(Ordering::Acquire))
    }

    pub fn fully_seeded(&self) -> bool {
        self.fully_seeded.load(Ordering::Acquire)
    }

    pub fn force_reseed(&self) -> bool {
        self.force_reseed.load(Ordering::Acquire)
    }

    pub fn set_force_reseed(&self) {
        self.force_reseed.store(true, Ordering::Release);
    }

    pub fn last_seeded_secs(&self) -> u64 {
        self.last_seeded_secs.load(Ordering::Acquire)
    }

    /// §4.6 reseed triggers: any one of request-count exhaustion, age,
    /// or a pending force.
    pub fn needs_reseed(&self, now_secs: u64, reseed_max_seconds: u64) -> bool {
        self.requests_until_reseed.load(Ordering::Acquire) == 0
            || now_secs.saturating_sub(self.last_seeded_secs()) > reseed_max_seconds
            || self.force_reseed()
            || !self.fully_seeded()
    }

    /// Advance this instance's own stage from a single `seed` call's
    /// credited bits. `lrng_init_ops` compares the entropy a single
    /// `lrng_fill_seed_buffer` call actually yielded directly against the
    /// stage thresholds. The pools it draws from (per-CPU hash pool,
    /// auxiliary pool) are what accumulate raw material across calls
    /// until drained, not a counter kept at this layer, so there is
    /// nothing to bank here beyond the current call's figure.
    fn advance_stage(&self, credited_bits: u32, startup_complete: bool) {
        let mut new_stage = Stage::Uninitialized;
        if credited_bits >= FULL_SEED_ENTROPY_BITS && startup_complete {
            new_stage = Stage::Operational;
            self.fully_seeded.store(true, Ordering::Release);
        } else if credited_bits >= FULL_SEED_ENTROPY_BITS {
            new_stage = Stage::SeededFull;
            self.fully_seeded.store(true, Ordering::Release);
        } else if credited_bits >= MIN_SEED_ENTROPY_BITS {
            new_stage = Stage::SeededMin;
        } else if credited_bits >= INIT_ENTROPY_BITS {
            // No dedicated stage value for "init" at the per-instance
            // level (component H owns the global init/debug signal);
            // the instance itself only distinguishes min/full/operational.
            new_stage = Stage::Uninitialized;
        }
        let cur = self.stage();
        if new_stage > cur {
            self.stage.store(new_stage as u8, Ordering::Release);
        }
    }

    /// §4.6 `seed`: call `cb.seed` with `bytes`; on success reset the
    /// reseed countdown and clear `force_reseed` (cleared only on
    /// success, matching `lrng_sdrng_inject`'s `force_reseed = false`
    /// placement inside its success branch — see `DESIGN.md` for the
    /// Open Question this resolves); on failure force an immediate retry.
    pub fn seed(&self, bytes: &[u8], credited_bits: u32, now_secs: u64, startup_complete: bool) -> Result<()> {
        let mut g = self.inner.lock();
        match g.state.seed(bytes) {
            Ok(()) => {
                self.last_seeded_secs.store(now_secs, Ordering::Release);
                self.requests_until_reseed
                    .store(RESEED_THRESH, Ordering::Release);
                self.force_reseed.store(false, Ordering::Release);
                drop(g);
                self.advance_stage(credited_bits, startup_complete);
                Ok(())
            }
            Err(_) => {
                self.requests_until_reseed.store(1, Ordering::Release);
                Err(LrngError::Internal)
            }
        }
    }

    /// §4.6 `generate`: produce `out.len()` bytes in `<= MAX_REQSIZE`
    /// chunks, decrementing the request counter per chunk. Does not check
    /// reseed triggers itself — used directly by the atomic-context
    /// instance (which never triggers `reseed_from_sources`, per §4.6) and
    /// by callers that have already reseeded (`get_random_bytes_pr`,
    /// `get_seed`). Non-atomic callers that want the full per-chunk
    /// reseed-trigger check should use [`DrngInstance::generate_with_reseed`].
    pub fn generate(&self, out: &mut [u8]) -> Result<()> {
        let mut off = 0;
        while off < out.len() {
            let chunk = (out.len() - off).min(MAX_REQSIZE);
            let mut g = self.inner.lock();
            let produced = g.state.generate(&mut out[off..off + chunk])?;
            drop(g);
            let _ = self
                .requests_until_reseed
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(v.saturating_sub(1)));
            if produced == 0 {
                return Err(LrngError::Internal);
            }
            off += produced;
        }
        Ok(())
    }

    /// §4.6 `generate`, full contract: "for chunks <= max_reqsize, check
    /// reseed triggers and (unless this is the atomic instance) trigger
    /// `reseed_from_sources` before producing". `reseed` performs that
    /// trigger (an `EntropySourceManager::fill_seed` + `self.seed` round
    /// trip driven by the caller, which alone has access to the entropy
    /// sources); its return value is ignored for control flow — a reseed
    /// attempt that fails to gather enough entropy still leaves a valid,
    /// merely stale, DRNG state to generate from, so generation proceeds
    /// either way.
    pub fn generate_with_reseed<F: FnMut()>(
        &self,
        out: &mut [u8],
        now_secs: u64,
        reseed_max_seconds: u64,
        mut reseed: F,
    ) -> Result<()> {
        let mut off = 0;
        while off < out.len() {
            if !self.is_atomic_instance && self.needs_reseed(now_secs, reseed_max_seconds) {
                reseed();
            }
            let chunk = (out.len() - off).min(MAX_REQSIZE);
            let mut g = self.inner.lock();
            let produced = g.state.generate(&mut out[off..off + chunk])?;
            drop(g);
            let _ = self
                .requests_until_reseed
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(v.saturating_sub(1)));
            if produced == 0 {
                return Err(LrngError::Internal);
            }
            off += produced;
        }
        Ok(())
    }

    /// Reset to the uninitialized state (used by NUMA-array reset paths
    /// and by the seeding state machine's forced reinitialization).
    pub fn reset(&self) {
        self.requests_until_reseed
            .store(RESEED_THRESH, Ordering::Release);
        self.fully_seeded.store(false, Ordering::Release);
        self.force_reseed.store(true, Ordering::Release);
        self.stage.store(Stage::Uninitialized as u8, Ordering::Release);
    }

    /// Swap in a new callback pair + state under this instance's lock
    /// (§4.9 per-DRNG switch step 3: "hold both locks during the swap
    /// phase" — callers arrange the outer lock; this call holds the
    /// inner one).
    pub fn install(&self, cb: CallbackSet, state: Box<dyn DrngState>) {
        let mut g = self.inner.lock();
        g.cb = cb;
        g.state = state;
    }

    pub fn callback_name(&self) -> &'static str {
        self.inner.lock().cb.drng.name()
    }

    /// Generate `n` bytes from the *old* state into `seed`, for §4.9 step
    /// 2 ("generate `security_strength_bytes` from the old D into a
    /// seed").
    pub fn generate_for_reseed(&self, seed: &mut [u8]) -> Result<()> {
        let mut g = self.inner.lock();
        g.state.generate(seed)?;
        Ok(())
    }
}

pub fn now_secs_from(ts: Timestamp) -> u64 {
    ts.0 / 1_000_000_000
}

pub fn reseed_max_seconds(cfg: &Config) -> u64 {
    cfg.reseed_max_seconds
}
