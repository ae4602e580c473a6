//! Per-CPU entropy pool (component B, §4.2).
//!
//! One hash state per CPU, lazily initialized on first access, absorbing
//! the contents of that CPU's [`SlotArray`] on wrap and handing back a
//! digest + event count on [`PerCpuPool::drain`].

use alloc::boxed::Box;
use alloc::vec::Vec;
use spin::Mutex;

use crate::callbacks::{HashCallbacks, HashState};
use crate::config::SECURITY_STRENGTH_BYTES;
use crate::percpu::{PerCpu, MAX_CPUS};
use crate::slot_array::SlotArray;

struct PoolState {
    hash: Option<Box<dyn HashState>>,
}

/// Hash-state-plus-slot-array pair for one CPU.
pub struct CpuPool {
    pub slots: SlotArray,
    state: Mutex<PoolState>,
}

impl CpuPool {
    fn new(pool_size_log2: u8) -> Self {
        Self {
            slots: SlotArray::new(pool_size_log2, crate::slot_array::DEFAULT_SLOT_BITS),
            state: Mutex::new(PoolState { hash: None }),
        }
    }
}

/// All per-CPU pools, plus the hash callback currently in force (swapped
/// in its entirety by the switcher, §4.9).
pub struct PerCpuPool {
    cpus: PerCpu<CpuPool>,
    pool_size_log2: u8,
}

impl PerCpuPool {
    pub fn new(pool_size_log2: u8) -> Self {
        Self {
            cpus: PerCpu::new_with(move || CpuPool::new(pool_size_log2)),
            pool_size_log2,
        }
    }

    pub fn pool_size_log2(&self) -> u8 {
        self.pool_size_log2
    }

    pub fn online_count(&self) -> u32 {
        self.cpus.online_count()
    }

    pub fn online_cpus(&self) -> impl Iterator<Item = usize> + '_ {
        self.cpus.online_iter()
    }

    pub fn slots(&self, cpu: usize) -> &SlotArray {
        &self.cpus.get(cpu).slots
    }

    /// Lazily initialize `cpu`'s hash state with `hash_cb` if this is the
    /// first access from that CPU, and mark it online (§4.2 "Lazy init").
    fn ensure_online(&self, cpu: usize, hash_cb: &dyn HashCallbacks) {
        if self.cpus.mark_online(cpu) {
            let mut st = self.cpus.get(cpu).state.lock();
            if st.hash.is_none() {
                st.hash = hash_cb.alloc().ok();
            }
        }
    }

    /// §4.2 `absorb_array`: fold the entire array's bytes (including
    /// unused slots) into the running hash without finalizing. Call on
    /// every `SlotArray` wrap, or more often under the continuous
    /// compression policy.
    pub fn absorb_array(&self, cpu: usize, hash_cb: &dyn HashCallbacks) {
        self.ensure_online(cpu, hash_cb);
        let cp = self.cpus.get(cpu);
        let mut scratch = Vec::new();
        cp.slots.snapshot_bytes(&mut scratch);
        let mut st = cp.state.lock();
        if st.hash.is_none() {
            st.hash = hash_cb.alloc().ok();
        }
        if let Some(h) = st.hash.as_deref_mut() {
            h.update(&scratch);
        }
    }

    /// §4.2 `drain`: under the per-CPU lock, finalize into `digest`,
    /// reinitialize, feed `digest` back into the fresh state (so entropy
    /// carries forward, P6), and atomically zero `events`.
    ///
    /// Returns `(digest, events)`. `digest` is sized to the hash's
    /// `digest_size()`; entropy credited by the caller must be capped at
    /// `digest_size * 8` (P2).
    pub fn drain(&self, cpu: usize, hash_cb: &dyn HashCallbacks) -> (Vec<u8>, u32) {
        self.ensure_online(cpu, hash_cb);
        let cp = self.cpus.get(cpu);
        let digest_size = hash_cb.digest_size();
        let mut digest = alloc::vec![0u8; digest_size];

        let mut st = cp.state.lock();
        if st.hash.is_none() {
            st.hash = hash_cb.alloc().ok();
        }
        if let Some(h) = st.hash.as_deref_mut() {
            h.finalize_into(&mut digest);
            h.reset();
            h.update(&digest);
        }
        drop(st);

        let events_cap = cp.slots.n_slots().min(digest_size as u32 * 8);
        let events = cp.slots.take_events().min(events_cap);
        (digest, events)
    }

    /// Re-initialize `cpu`'s hash state with `new_cb`, carrying the old
    /// state's digest forward (§4.9 per-CPU switch step 1). Caller holds
    /// the global switch mutex.
    pub fn switch_cpu(&self, cpu: usize, new_cb: &dyn HashCallbacks) {
        let cp = self.cpus.get(cpu);
        let mut st = cp.state.lock();
        let mut carried = alloc::vec![0u8; new_cb.digest_size().max(SECURITY_STRENGTH_BYTES)];
        if let Some(old) = st.hash.as_deref_mut() {
            old.finalize_into(&mut carried);
        }
        let mut new_hash = match new_cb.alloc() {
            Ok(h) => h,
            Err(_) => return,
        };
        new_hash.update(&carried);
        st.hash = Some(new_hash);
        let cap = cp.slots.n_slots().min(new_cb.digest_size() as u32 * 8);
        cp.slots.cap_events(cap);
    }

    pub const MAX_CPUS: usize = MAX_CPUS;
}
