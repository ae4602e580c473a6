//! Auxiliary pool (X, §3 "Auxiliary pool").
//!
//! Shared hash state plus an atomic entropy-bit counter. Receives
//! opportunistic writes (bootloader data, hwrng input, device-identity
//! data, user writes); entropy is only credited when the caller asserts
//! it, mirroring `add_device_randomness` (zero-credited) vs.
//! `add_bootloader_randomness`/`add_hw_generator_bytes` (credited when
//! trusted).

use alloc::boxed::Box;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

use crate::callbacks::{HashCallbacks, HashState};

pub struct AuxPool {
    hash: Mutex<Option<Box<dyn HashState>>>,
    entropy_bits: AtomicU32,
}

impl AuxPool {
    pub fn new() -> Self {
        Self {
            hash: Mutex::new(None),
            entropy_bits: AtomicU32::new(0),
        }
    }

    pub fn entropy_bits(&self) -> u32 {
        self.entropy_bits.load(Ordering::Acquire)
    }

    fn ensure(&self, hash_cb: &dyn HashCallbacks, guard: &mut Option<Box<dyn HashState>>) {
        if guard.is_none() {
            *guard = hash_cb.alloc().ok();
        }
    }

    /// Mix `bytes` in; credit `entropy_bits` atop whatever is already
    /// banked, capped at the hash's digest size in bits (P2-style cap
    /// applied uniformly across all pools).
    pub fn add(&self, hash_cb: &dyn HashCallbacks, bytes: &[u8], entropy_bits: u32) {
        let mut g = self.hash.lock();
        self.ensure(hash_cb, &mut g);
        if let Some(h) = g.as_deref_mut() {
            h.update(bytes);
        }
        drop(g);
        let cap = hash_cb.digest_size() as u32 * 8;
        let _ = self
            .entropy_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(cap.min(v.saturating_add(entropy_bits)))
            });
    }

    /// Read-and-zero the entropy counter, finalize the hash into `out`,
    /// reinitialize with `new_cb`'s allocator, and seed the fresh state
    /// from the finalize output (backtracking resistance for the next
    /// cycle, §4.5 "the finalize output also becomes the new auxiliary
    /// pool state").
    ///
    /// Returns bits credited, capped at `out.len() * 8`.
    pub fn drain_into(&self, hash_cb: &dyn HashCallbacks, out: &mut [u8]) -> u32 {
        let credited = self.entropy_bits.swap(0, Ordering::AcqRel);
        let mut g = self.hash.lock();
        self.ensure(hash_cb, &mut g);
        if let Some(h) = g.as_deref_mut() {
            h.finalize_into(out);
            h.reset();
            h.update(out);
        }
        drop(g);
        credited.min(out.len() as u32 * 8)
    }

    /// Re-key the auxiliary pool's hash under a new callback set,
    /// carrying its current digest forward (§4.9 switch semantics apply
    /// uniformly to all pools, not just per-CPU ones).
    pub fn switch(&self, new_cb: &dyn HashCallbacks) {
        let mut g = self.hash.lock();
        let mut carried = alloc::vec![0u8; new_cb.digest_size()];
        if let Some(old) = g.as_deref_mut() {
            old.finalize_into(&mut carried);
        }
        let mut new_hash = match new_cb.alloc() {
            Ok(h) => h,
            Err(_) => return,
        };
        new_hash.update(&carried);
        *g = Some(new_hash);
    }
}

impl Default for AuxPool {
    fn default() -> Self {
        Self::new()
    }
}
