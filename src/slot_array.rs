//! Time-slot array (component A, §4.1).
//!
//! Packs the low bits of timestamps into a compact per-CPU word buffer
//! with O(1), non-blocking, non-allocating inserts, as required from
//! interrupt context. Two insertion modes:
//!
//! - *slot mode* (§8 scenarios 1,2 generalize): one `slot_bits`-wide value
//!   per sample, GCD-divided first.
//! - *word mode*: the full 32-bit timestamp, spread across the
//!   `k = 32 / slot_bits` slots it straddles, each written with an
//!   explicit zero-then-OR so no bits of a prior occupant survive (P5;
//!   see §9 design notes on the historical straddle race this guards
//!   against).
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

use crate::timestamp::Timestamp;

/// Fixed-width packed sub-word width, in bits. 8 by default per §4.1.
pub const DEFAULT_SLOT_BITS: u32 = 8;

pub struct SlotArray {
    /// `n_slots / slots_per_word` packed words, behind a per-CPU lock
    /// (§5: "Each CPU has an independent spinlock guarding its
    /// pool/array against the cold-path drainer").
    words: Mutex<Vec<u32>>,
    ptr: AtomicU32,
    events: AtomicU32,
    n_slots: u32,
    slot_bits: u32,
    slots_per_word: u32,
}

impl SlotArray {
    /// `pool_size_log2` gives `n_slots = 2^pool_size_log2`, a power of
    /// two per §3's Slot-array invariant.
    pub fn new(pool_size_log2: u8, slot_bits: u32) -> Self {
        let n_slots = 1u32 << pool_size_log2;
        let slots_per_word = 32 / slot_bits;
        let n_words = (n_slots / slots_per_word).max(1) as usize;
        Self {
            words: Mutex::new(alloc::vec![0u32; n_words]),
            ptr: AtomicU32::new(0),
            events: AtomicU32::new(0),
            n_slots,
            slot_bits,
            slots_per_word,
        }
    }

    pub fn n_slots(&self) -> u32 {
        self.n_slots
    }

    pub fn events(&self) -> u32 {
        self.events.load(Ordering::Acquire)
    }

    /// Atomically seize and zero the event counter (§4.1 "Ordering":
    /// reseed-time readers use atomic exchange to seize the counter").
    pub fn take_events(&self) -> u32 {
        self.events.swap(0, Ordering::AcqRel)
    }

    fn write_slot(words: &mut [u32], slots_per_word: u32, slot_bits: u32, n_slots: u32, slot_index: u32, value: u32) {
        let slot_index = slot_index % n_slots;
        let word_idx = (slot_index / slots_per_word) as usize;
        let bit_offset = (slot_index % slots_per_word) * slot_bits;
        let mask = ((1u64 << slot_bits) - 1) as u32;
        let cleared = words[word_idx] & !(mask << bit_offset);
        words[word_idx] = cleared | ((value & mask) << bit_offset);
    }

    /// Slot-mode insert: one GCD-divided LSB value. Returns whether this
    /// insert completed a full wrap of the array (§4.1: "on wrap an
    /// absorb into (B) is scheduled for the current CPU").
    pub fn insert_slot(&self, divisor: u32, slot_value: u32) -> bool {
        let idx = self.ptr.fetch_add(1, Ordering::AcqRel);
        let mut w = self.words.lock();
        let _ = divisor; // division already applied by caller via Timestamp::slot_value
        Self::write_slot(&mut w, self.slots_per_word, self.slot_bits, self.n_slots, idx, slot_value);
        (idx + 1) % self.n_slots == 0
    }

    /// Word-mode insert: spread the full 32-bit timestamp across
    /// `slots_per_word` consecutive slots starting at the current write
    /// cursor, straddling two array words when the cursor isn't
    /// word-aligned. Returns whether this insert completed a full wrap.
    pub fn insert_word(&self, time32: u32) -> bool {
        let start = self
            .ptr
            .fetch_add(self.slots_per_word, Ordering::AcqRel);
        let mut w = self.words.lock();
        let mut wrapped = false;
        for j in 0..self.slots_per_word {
            let slot_index = start + j;
            let shift = j * self.slot_bits;
            let value = time32 >> shift;
            Self::write_slot(&mut w, self.slots_per_word, self.slot_bits, self.n_slots, slot_index, value);
            if (slot_index + 1) % self.n_slots == 0 {
                wrapped = true;
            }
        }
        wrapped
    }

    /// Record that a sample passed health testing and should be counted
    /// toward `events` (the packing itself is a separate call so callers
    /// can still pack `fail_use` samples without counting them, per
    /// §4.3).
    pub fn count_event(&self) {
        self.events.fetch_add(1, Ordering::AcqRel);
    }

    /// Push `n` events back onto the live counter (§4.5: overflow events
    /// from a drain that exceeded the requested credit are pushed back
    /// "never beyond the cap"), so a subsequent reseed cycle can still
    /// credit them.
    pub fn count_events_back(&self, n: u32) {
        let cap = self.n_slots;
        let _ = self
            .events
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(cap.min(v.saturating_add(n)))
            });
    }

    /// Cap the live `events` counter at `cap`, used after a hash-callback
    /// switch whose new digest size is narrower than the old one
    /// (§4.9 per-CPU switch step 2).
    pub fn cap_events(&self, cap: u32) {
        let _ = self
            .events
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                if v > cap {
                    Some(cap)
                } else {
                    None
                }
            });
    }

    /// Snapshot the raw word contents for absorption into the hash pool.
    /// Returns bytes in little-endian word order, matching how
    /// `write_slot` packs values.
    pub fn snapshot_bytes(&self, out: &mut Vec<u8>) {
        let w = self.words.lock();
        out.clear();
        out.reserve(w.len() * 4);
        for word in w.iter() {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// §8 scenario 2: empty 64-slot array of 8-bit slots at ptr=0;
    /// inserting 0x03020100 at the aligned position yields
    /// words[0]=0x03020100, words[1]=0; a second aligned insert yields
    /// words[1]=0x07060504.
    #[test]
    fn scenario_word_mode_aligned() {
        let a = SlotArray::new(6, DEFAULT_SLOT_BITS); // 64 slots
        a.insert_word(0x0302_0100);
        let mut buf = Vec::new();
        a.snapshot_bytes(&mut buf);
        let w0 = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let w1 = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        assert_eq!(w0, 0x0302_0100);
        assert_eq!(w1, 0);

        a.insert_word(0x0706_0504);
        a.snapshot_bytes(&mut buf);
        let w1 = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        assert_eq!(w1, 0x0706_0504);
    }

    /// P5: a straddling word-mode insert over pre-initialized (all-1s)
    /// words leaves the targeted slots holding exactly the inserted
    /// byte values, no stale bits surviving.
    #[test]
    fn straddle_leaves_no_stale_bits() {
        let a = SlotArray::new(6, DEFAULT_SLOT_BITS);
        {
            let mut w = a.words.lock();
            for word in w.iter_mut() {
                *word = 0xFFFF_FFFF;
            }
        }
        // ptr starts at 0; advance by 1 slot manually so the next
        // word-mode insert straddles words[0]/[1].
        a.ptr.store(1, Ordering::SeqCst);
        a.insert_word(0x0706_0504);
        let mut buf = Vec::new();
        a.snapshot_bytes(&mut buf);
        let w0 = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let w1 = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        // slots 1,2,3 <- 0x04,0x05,0x06 ; slot 4 <- 0x07
        assert_eq!(w0 & 0xFFFF_FF00, 0x0605_0400);
        assert_eq!(w0 & 0x0000_00FF, 0x0000_00FF); // slot 0 untouched
        assert_eq!(w1 & 0x0000_00FF, 0x0000_0007);
    }

    #[test]
    fn wrap_detected_exactly_once_per_full_pass() {
        let a = SlotArray::new(4, DEFAULT_SLOT_BITS); // 16 slots, 4 words
        let mut wraps = 0;
        for i in 0..32u32 {
            if a.insert_slot(1, i & 0xFF) {
                wraps += 1;
            }
        }
        assert_eq!(wraps, 2);
    }

    #[test]
    fn events_seized_and_zeroed() {
        let a = SlotArray::new(6, DEFAULT_SLOT_BITS);
        for _ in 0..10 {
            a.count_event();
        }
        assert_eq!(a.events(), 10);
        assert_eq!(a.take_events(), 10);
        assert_eq!(a.events(), 0);
    }

    #[test]
    fn timestamp_slot_value_applies_divisor_and_mask() {
        let t = Timestamp::new(0x1_0203);
        let v = t.slot_value(1, 8);
        assert_eq!(v, 0x03);
        let v2 = t.slot_value(2, 8);
        assert_eq!(v2, (0x1_0203u32 / 2) & 0xFF);
    }
}
