//! Seed buffer (SB, §3).
//!
//! Fixed layout: one sub-buffer per entropy source plus a `now` field.
//! Produced by the entropy-source manager (component E) and consumed by
//! `DrngInstance::seed`. Zeroized on drop per §5's memory discipline.

use alloc::vec;
use alloc::vec::Vec;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::timestamp::Timestamp;

/// One source's contribution, paired with how many bits of it are
/// actually credited (the rest of the sub-buffer may be mixing material
/// without a credited-entropy claim).
#[derive(Zeroize)]
pub struct SourceContribution {
    pub bytes: Vec<u8>,
    #[zeroize(skip)]
    pub credited_bits: u32,
}

/// Seed material assembled by [`crate::entropy_source::EntropySourceManager::fill_seed`].
#[derive(ZeroizeOnDrop)]
pub struct SeedBuffer {
    #[zeroize(skip)]
    pub now: Timestamp,
    contributions: Vec<SourceContribution>,
}

impl SeedBuffer {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now,
            contributions: Vec::new(),
        }
    }

    pub fn push(&mut self, bytes: Vec<u8>, credited_bits: u32) {
        self.contributions.push(SourceContribution {
            bytes,
            credited_bits,
        });
    }

    pub fn total_credited_bits(&self) -> u32 {
        self.contributions.iter().map(|c| c.credited_bits).sum()
    }

    /// Concatenate all sub-buffers into one seed byte string for
    /// `DrngCallbacks::seed`.
    pub fn concat_bytes(&self) -> Vec<u8> {
        let total: usize = self.contributions.iter().map(|c| c.bytes.len()).sum();
        let mut out = vec![0u8; total];
        let mut off = 0;
        for c in &self.contributions {
            out[off..off + c.bytes.len()].copy_from_slice(&c.bytes);
            off += c.bytes.len();
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }
}
