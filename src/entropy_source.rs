//! Entropy-source manager (component E, §4.5).
//!
//! Produces a [`SeedBuffer`] on demand by walking the four fixed-order
//! sources (per-CPU hash pool, CPU/arch RNG, jitter/timing RNG,
//! auxiliary pool), applying the event-to-bits accounting rules, and
//! capping total credited bits at the caller's request.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::aux_pool::AuxPool;
use crate::callbacks::{EntropySource, HashCallbacks};
use crate::config::Config;
use crate::error::{LrngError, Result};
use crate::percpu_pool::PerCpuPool;
use crate::seed_buffer::SeedBuffer;
use crate::timestamp::ClockSource;

/// Non-blocking "reseed in progress" guard (§5: "a compare-and-set atomic
/// to prevent concurrent drains of the same sources").
#[derive(Default)]
pub struct ReseedGuard(AtomicBool);

impl ReseedGuard {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn try_acquire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn in_progress(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Convert a credited event count into credited bits at the configured
/// rate, applying the non-high-res-timer oversampling penalty (§4.5
/// accounting rules, P9).
pub fn events_to_bits(events: u32, strength_bits: u32, entropy_bits_per_256: u32, oversampling_factor: u32, high_res_timer: bool) -> u32 {
    let denom = if high_res_timer {
        entropy_bits_per_256 as u64
    } else {
        entropy_bits_per_256 as u64 * oversampling_factor as u64
    };
    if denom == 0 {
        return 0;
    }
    ((events as u64 * strength_bits as u64) / denom) as u32
}

/// Apply the SP800-90B hash-conditioning loss (§4.5) to the hash/irq pool's
/// own credited-bits figure: subtract 1 bit, never underflowing past zero.
/// This models the conditioning loss of the hash draw specifically, not the
/// whole cross-source request — `lrng_pool.c` applies it to the pool's
/// yield before summing in what the other (non-hash-conditioned) sources
/// contribute, not as a blanket tax on `remaining` up front.
fn apply_conditioning_loss(credited_bits: u32) -> u32 {
    credited_bits.saturating_sub(1)
}

pub struct EntropySourceManager<'a> {
    pub percpu: &'a PerCpuPool,
    pub aux: &'a AuxPool,
    pub cpu_rng: Option<&'a dyn EntropySource>,
    pub jitter_rng: Option<&'a dyn EntropySource>,
    pub clock: &'a dyn ClockSource,
    pub config: Config,
    guard: ReseedGuard,
}

impl<'a> EntropySourceManager<'a> {
    pub fn new(
        percpu: &'a PerCpuPool,
        aux: &'a AuxPool,
        cpu_rng: Option<&'a dyn EntropySource>,
        jitter_rng: Option<&'a dyn EntropySource>,
        clock: &'a dyn ClockSource,
        config: Config,
    ) -> Self {
        Self {
            percpu,
            aux,
            cpu_rng,
            jitter_rng,
            clock,
            config,
            guard: ReseedGuard::new(),
        }
    }

    pub fn reseed_in_progress(&self) -> bool {
        self.guard.in_progress()
    }

    /// §4.5 public operation: produce a seed buffer, crediting at most
    /// `requested_bits` total (oversampling allowance applied by the
    /// per-source accounting, not here).
    pub fn fill_seed(
        &self,
        hash_cb: &dyn HashCallbacks,
        requested_bits: u32,
        fully_seeded: bool,
    ) -> Result<SeedBuffer> {
        if !self.guard.try_acquire() {
            return Err(LrngError::InProgress);
        }
        let result = self.fill_seed_locked(hash_cb, requested_bits, fully_seeded);
        self.guard.release();
        result
    }

    fn fill_seed_locked(
        &self,
        hash_cb: &dyn HashCallbacks,
        requested_bits: u32,
        fully_seeded: bool,
    ) -> Result<SeedBuffer> {
        let now = self.clock.now();
        let mut sb = SeedBuffer::new(now);
        let mut remaining = requested_bits;

        // Each source below is asked for the *full* remaining budget, not
        // a pre-split share: `lrng_fill_seed_buffer` requests
        // `LRNG_DRNG_SECURITY_STRENGTH_BITS` from the pool and then sums
        // whatever the arch/jitter sources additionally yield on top,
        // rather than partitioning one fixed budget across sources ahead
        // of time. A source that's absent or running dry simply leaves
        // `remaining` for the next one to pick up.

        // 1. Per-CPU hash pool (folds in the auxiliary pool's bytes too,
        // for forward-secrecy mixing).
        let (bytes, credited) = self.hash_pool_get_ent(hash_cb, remaining, fully_seeded);
        remaining = remaining.saturating_sub(credited);
        sb.push(bytes, credited);

        // 2. CPU/arch RNG.
        if let Some(src) = self.cpu_rng.filter(|_| self.config.trust_cpu) {
            let mut buf = alloc::vec![0u8; crate::config::SECURITY_STRENGTH_BYTES];
            let credited = src.get_ent(&mut buf, remaining, fully_seeded);
            remaining = remaining.saturating_sub(credited);
            sb.push(buf, credited);
        }

        // 3. Jitter/timing RNG.
        if let Some(src) = self.jitter_rng {
            let mut buf = alloc::vec![0u8; crate::config::SECURITY_STRENGTH_BYTES];
            let credited = src.get_ent(&mut buf, remaining, fully_seeded);
            remaining = remaining.saturating_sub(credited);
            sb.push(buf, credited);
        }

        // 4. Auxiliary pool, independently of what the hash-pool step
        // already folded in (typically drained to zero there; anything
        // here is entropy that arrived concurrently).
        {
            let mut buf = alloc::vec![0u8; hash_cb.digest_size()];
            let credited = self.aux.drain_into(hash_cb, &mut buf).min(remaining);
            sb.push(buf, credited);
        }

        Ok(sb)
    }

    /// §4.5 "Per-source 'hash pool' procedure".
    fn hash_pool_get_ent(&self, hash_cb: &dyn HashCallbacks, requested_bits: u32, _fully_seeded: bool) -> (Vec<u8>, u32) {
        let digest_size = hash_cb.digest_size();
        let mut ctx = match hash_cb.alloc() {
            Ok(h) => h,
            Err(_) => return (alloc::vec![0u8; digest_size], 0),
        };

        // Absorb the auxiliary pool bytes; read-and-zero its counter,
        // capped at digest size.
        let mut aux_buf = alloc::vec![0u8; digest_size];
        let aux_bits = self.aux.drain_into(hash_cb, &mut aux_buf);
        ctx.update(&aux_buf);
        let mut credited_bits = aux_bits.min(requested_bits);

        let strength = digest_size as u32 * 8;
        let mut stop_crediting = credited_bits >= requested_bits;

        for cpu in self.percpu.online_cpus() {
            let (digest, events) = self.percpu.drain(cpu, hash_cb);
            ctx.update(&digest);

            if stop_crediting {
                // Forward-secrecy mixing continues even once the request
                // is satisfied, but we push entropy back onto the CPU
                // instead of double-crediting it.
                self.percpu.slots(cpu).count_events_back(events);
                continue;
            }

            let bits = events_to_bits(
                events,
                strength,
                self.config.irq_entropy_bits,
                self.config.oversampling_factor,
                self.config.high_res_timer,
            );
            let room = requested_bits.saturating_sub(credited_bits);
            if bits <= room {
                credited_bits += bits;
            } else {
                credited_bits = requested_bits;
                stop_crediting = true;
                // Overflow events pushed back, never beyond the cap.
                let bits_used_events = if strength == 0 {
                    0
                } else {
                    (room as u64 * self.config.irq_entropy_bits as u64 / strength as u64) as u32
                };
                let leftover = events.saturating_sub(bits_used_events);
                self.percpu.slots(cpu).count_events_back(leftover);
            }
        }

        let mut out = alloc::vec![0u8; digest_size];
        ctx.finalize_into(&mut out);
        // SP800-90B hash-conditioning loss (§4.5) applies to this source's
        // own draw specifically, not to the other (non-hash-conditioned)
        // sources `fill_seed_locked` also consults.
        let credited_bits = apply_conditioning_loss(credited_bits.min(requested_bits));
        (out, credited_bits)
    }
}
