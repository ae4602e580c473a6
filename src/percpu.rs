//! Per-CPU state primitive (§9 design notes: "model as an array indexed
//! by CPU id with each element pinned to its CPU").
//!
//! `nexa-os` has no native per-CPU section/segment support exposed to a
//! standalone library crate, so this mirrors the fallback the design
//! notes describe: a fixed-size array plus an atomic bitmap of which
//! slots have been lazily initialized. `MAX_CPUS` is the LRNG analogue of
//! a kernel's static `NR_CPUS` ceiling.
use core::sync::atomic::{AtomicU64, Ordering};

/// Upper bound on concurrently tracked CPUs. A bitmap word's worth;
/// raising this would need a multi-word bitmap, which this core does not
/// need for its target scale.
pub const MAX_CPUS: usize = 64;

/// A fixed array of per-CPU slots plus an online bitmap.
///
/// Lock-ordering rule (§9): a per-CPU lock nests *inside* a DRNG's
/// read-lock, never the other way around — callers that hold both must
/// acquire the DRNG lock first.
pub struct PerCpu<T> {
    slots: [T; MAX_CPUS],
    online: AtomicU64,
}

impl<T> PerCpu<T> {
    pub fn new_with<F: Fn() -> T>(f: F) -> Self {
        Self {
            slots: core::array::from_fn(|_| f()),
            online: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn get(&self, cpu: usize) -> &T {
        &self.slots[cpu % MAX_CPUS]
    }

    #[inline]
    pub fn is_online(&self, cpu: usize) -> bool {
        (self.online.load(Ordering::Acquire) & (1 << (cpu % MAX_CPUS))) != 0
    }

    /// Mark `cpu` online. Idempotent; returns whether this call was the
    /// one that transitioned it (first access on that CPU, per the
    /// per-CPU pool's lazy-init invariant).
    #[inline]
    pub fn mark_online(&self, cpu: usize) -> bool {
        let bit = 1u64 << (cpu % MAX_CPUS);
        let prev = self.online.fetch_or(bit, Ordering::AcqRel);
        prev & bit == 0
    }

    pub fn online_count(&self) -> u32 {
        self.online.load(Ordering::Acquire).count_ones()
    }

    /// Iterate CPU ids currently marked online, in ascending order.
    pub fn online_iter(&self) -> impl Iterator<Item = usize> + '_ {
        let bits = self.online.load(Ordering::Acquire);
        (0..MAX_CPUS).filter(move |c| bits & (1 << c) != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32;

    #[test]
    fn mark_online_idempotent() {
        let p: PerCpu<AtomicU32> = PerCpu::new_with(|| AtomicU32::new(0));
        assert!(p.mark_online(3));
        assert!(!p.mark_online(3));
        assert!(p.is_online(3));
        assert!(!p.is_online(4));
        assert_eq!(p.online_count(), 1);
    }

    #[test]
    fn online_iter_order() {
        let p: PerCpu<AtomicU32> = PerCpu::new_with(|| AtomicU32::new(0));
        p.mark_online(5);
        p.mark_online(1);
        p.mark_online(9);
        let v: alloc::vec::Vec<usize> = p.online_iter().collect();
        assert_eq!(v, alloc::vec![1, 5, 9]);
    }
}
