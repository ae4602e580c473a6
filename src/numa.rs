//! NUMA DRNG array (component G, §4.7).
//!
//! Lazily provisions one [`DrngInstance`] per online NUMA node and
//! publishes the array once via a single atomic pointer swap. Per §9's
//! "cyclic references" note, node 0 is never array-owned: it *is* the
//! pre-existing "initial" instance, referenced (not owned) from the
//! array, so a lookup for any node falls back to it when the array isn't
//! published yet or a given slot was never provisioned.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::callbacks::CallbackSet;
use crate::drng::DrngInstance;

pub const MAX_NODES: usize = 8;

struct ArrayInner {
    /// `nodes[0]` is never populated; node 0 always resolves to the
    /// shared `initial` instance held by [`NumaDrngArray`] itself.
    nodes: Vec<Option<Box<DrngInstance>>>,
}

/// Per-NUMA-node DRNG array, plus the always-present "initial" instance
/// and a dedicated atomic-context instance.
pub struct NumaDrngArray {
    /// Process-wide singleton, also node 0's fallback (§3 "one
    /// well-known 'initial' D exists before the array is populated").
    pub initial: DrngInstance,
    /// Dedicated spinlocked instance for contexts that may not block.
    pub atomic: DrngInstance,
    published: AtomicPtr<ArrayInner>,
    online_nodes: usize,
}

impl NumaDrngArray {
    pub fn new(initial: DrngInstance, atomic: DrngInstance, online_nodes: usize) -> Self {
        Self {
            initial,
            atomic,
            published: AtomicPtr::new(core::ptr::null_mut()),
            online_nodes: online_nodes.clamp(1, MAX_NODES),
        }
    }

    pub fn online_nodes(&self) -> usize {
        self.online_nodes
    }

    pub fn is_published(&self) -> bool {
        !self.published.load(Ordering::Acquire).is_null()
    }

    /// §4.7 procedure: allocate a provisional array, seed each non-zero
    /// node's DRNG from the initial instance's *output* (parity of
    /// state, not entropy), then publish with a single CAS from null.
    /// If the CAS loses the race, everything but the initial instance is
    /// dropped (node 0 is never array-owned to begin with).
    pub fn allocate_and_publish<F>(&self, alloc_node: F)
    where
        F: Fn(usize) -> (CallbackSet, Box<dyn crate::callbacks::DrngState>),
    {
        if self.is_published() {
            return;
        }

        let mut nodes: Vec<Option<Box<DrngInstance>>> = Vec::with_capacity(self.online_nodes);
        nodes.push(None); // node 0 -> initial
        for node in 1..self.online_nodes {
            let (cb, state) = alloc_node(node);
            let inst = DrngInstance::new(cb, state, false);

            let mut seed = [0u8; crate::config::SECURITY_STRENGTH_BYTES];
            if self.initial.generate_for_reseed(&mut seed).is_ok() {
                let _ = inst.seed(&seed, 0, 0, true);
            }
            inst.reset_requests_after_provision();
            nodes.push(Some(Box::new(inst)));
        }

        // Memory fence before publish (§4.7): ensures the node contents
        // above are visible to any reader that observes the new pointer.
        core::sync::atomic::fence(Ordering::Release);

        let boxed = Box::new(ArrayInner { nodes });
        let raw = Box::into_raw(boxed);
        match self.published.compare_exchange(
            core::ptr::null_mut(),
            raw,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(_) => {
                // Lost the race: free everything except the (never
                // array-owned) initial instance.
                unsafe {
                    drop(Box::from_raw(raw));
                }
            }
        }
    }

    /// Lookup for `node`; falls back to `initial` when the array isn't
    /// published yet or that slot was never provisioned.
    pub fn get(&self, node: usize) -> &DrngInstance {
        let ptr = self.published.load(Ordering::Acquire);
        if ptr.is_null() {
            return &self.initial;
        }
        let inner = unsafe { &*ptr };
        match inner.nodes.get(node) {
            Some(Some(inst)) => inst,
            _ => &self.initial,
        }
    }

    /// Every online node's stage is fully seeded (component H step 2).
    pub fn all_fully_seeded(&self) -> bool {
        if !self.initial.fully_seeded() {
            return false;
        }
        let ptr = self.published.load(Ordering::Acquire);
        if ptr.is_null() {
            return self.online_nodes <= 1;
        }
        let inner = unsafe { &*ptr };
        (0..self.online_nodes).all(|n| self.get_checked(inner, n).fully_seeded())
    }

    fn get_checked<'a>(&'a self, inner: &'a ArrayInner, node: usize) -> &'a DrngInstance {
        match inner.nodes.get(node) {
            Some(Some(inst)) => inst,
            _ => &self.initial,
        }
    }

    /// Iterate all node DRNGs (including the `initial` stand-in for node
    /// 0), for component H's "walk nodes in order" and for
    /// `force_reseed_all`.
    pub fn for_each<F: FnMut(&DrngInstance)>(&self, mut f: F) {
        f(&self.initial);
        let ptr = self.published.load(Ordering::Acquire);
        if ptr.is_null() {
            return;
        }
        let inner = unsafe { &*ptr };
        for slot in inner.nodes.iter().skip(1) {
            if let Some(inst) = slot {
                f(inst);
            }
        }
    }

    /// First node (walked in order, `initial` representing node 0) that
    /// still needs a reseed from the entropy sources, if any (§4.8 work
    /// handler step 1). "Needs a reseed" covers both not-yet-fully-seeded
    /// instances and fully-seeded ones a caller has marked with
    /// `force_reseed` via `force_reseed_all()` — a fully-seeded node whose
    /// `force_reseed` flag is set must still be picked up here, or that
    /// flag is never acted on (P4).
    pub fn first_not_fully_seeded(&self) -> Option<&DrngInstance> {
        fn needs_work(inst: &DrngInstance) -> bool {
            !inst.fully_seeded() || inst.force_reseed()
        }
        if needs_work(&self.initial) {
            return Some(&self.initial);
        }
        let ptr = self.published.load(Ordering::Acquire);
        if ptr.is_null() {
            return None;
        }
        let inner = unsafe { &*ptr };
        inner
            .nodes
            .iter()
            .skip(1)
            .filter_map(|s| s.as_deref())
            .find(|inst| needs_work(inst))
    }
}

impl DrngInstance {
    /// After being provisioned by the NUMA allocator (seeded only for
    /// state parity, not entropy), the fresh instance still needs a real
    /// entropy-backed reseed before it can be trusted; reset its
    /// countdown so the next `reseed_from_sources` pass picks it up
    /// promptly instead of waiting out the full threshold.
    fn reset_requests_after_provision(&self) {
        self.set_force_reseed();
    }
}

impl Drop for ArrayInner {
    fn drop(&mut self) {
        self.nodes.clear();
    }
}
