//! External collaborator contracts (§6).
//!
//! The hash function, block cipher and DRBG algorithms are not designed
//! here; they are consumed only through these callback traits. A
//! `default_crypto` module ships one concrete implementation of each so
//! the crate is useful standalone and so the switcher (§4.9) has a
//! fallback pair that "must remain available".

use alloc::boxed::Box;
use alloc::string::String;

use crate::error::Result;

/// Opaque hash state handle. Implementors box whatever their hash crate
/// needs (e.g. a `sha3::Sha3_256` context) behind this trait object so
/// `PerCpuPool`/`AuxPool`/the switcher can hold one without generic
/// parameters bleeding through the whole crate.
pub trait HashState: Send {
    fn update(&mut self, bytes: &[u8]);
    /// Finalize into `out`, returning the number of bytes written.
    /// Must not panic if `out.len() > digest_size()`; excess bytes are
    /// left untouched by the callee (callers size buffers to
    /// `digest_size()`).
    fn finalize_into(&mut self, out: &mut [u8]) -> usize;
    /// Reinitialize this state in place, discarding all absorbed input.
    fn reset(&mut self);
}

/// Hash callback set (consumed by B, E, I).
pub trait HashCallbacks: Send + Sync {
    fn name(&self) -> &'static str;
    fn digest_size(&self) -> usize;
    /// Allocate a fresh, initialized hash state.
    fn alloc(&self) -> Result<Box<dyn HashState>>;
}

/// DRNG callback set (consumed by F).
///
/// `alloc`/`seed`/`generate` all return `Result` per §6; a primitive
/// failure propagates as [`crate::error::LrngError::Internal`] from the
/// caller (§7 propagation policy).
pub trait DrngCallbacks: Send + Sync {
    fn name(&self) -> &'static str;
    /// Allocate a new DRNG state sized for `sec_strength_bytes` of
    /// security strength.
    fn alloc(&self, sec_strength_bytes: usize) -> Result<Box<dyn DrngState>>;
}

/// Opaque DRNG state handle.
pub trait DrngState: Send {
    fn seed(&mut self, bytes: &[u8]) -> Result<()>;
    /// Fill `out` with generated bytes; returns bytes produced (may be
    /// less than `out.len()` only on error, in which case it returns
    /// `Err`).
    fn generate(&mut self, out: &mut [u8]) -> Result<usize>;
}

/// An immutable pairing of one hash and one DRNG callback set, the unit
/// the switcher (§4.9) hot-swaps atomically.
#[derive(Clone, Copy)]
pub struct CallbackSet {
    pub hash: &'static dyn HashCallbacks,
    pub drng: &'static dyn DrngCallbacks,
}

impl CallbackSet {
    pub const fn new(hash: &'static dyn HashCallbacks, drng: &'static dyn DrngCallbacks) -> Self {
        Self { hash, drng }
    }

    /// Identity comparison (same underlying static hash *and* DRNG
    /// callback instances), used by the switcher (§5) to tell whether a
    /// DRNG instance is "presently equal to the static-default pointer"
    /// for lock-kind purposes. Not a value comparison: two distinct
    /// `static` callback sets with coincidentally identical behavior are
    /// still "different" here, which is the right notion for a hot-swap
    /// policy keyed on pointer identity.
    pub fn is_same_as(&self, other: &CallbackSet) -> bool {
        core::ptr::eq(self.hash, other.hash) && core::ptr::eq(self.drng, other.drng)
    }
}

/// Entropy-source callback set (consumed by E).
///
/// Implemented by each of the four fixed-order sources in §4.5 step 2:
/// per-CPU hash pool, CPU/arch RNG, jitter/timing RNG, auxiliary pool.
pub trait EntropySource: Send + Sync {
    /// Write up to `requested_bits` worth of entropy into `seed_buf_slot`,
    /// returning bits actually credited. `fully_seeded` tells the source
    /// whether the *runtime* entropy rate (vs. the more conservative
    /// initial-seeding rate) should be used for accounting.
    fn get_ent(&self, seed_buf_slot: &mut [u8], requested_bits: u32, fully_seeded: bool) -> u32;
    fn curr_entropy(&self) -> u32;
    fn max_entropy(&self) -> u32;
    fn reset(&self);
    fn state(&self) -> String;
}
