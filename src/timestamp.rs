//! Timestamp type (§3 "Timestamp (T)").
//!
//! Only the low bits of a reading are treated as entropic; the type
//! itself is a transparent wrapper so call sites read naturally (`t.low(s)`)
//! without spreading bit-mask literals across the crate.

/// A monotonic high-resolution clock reading. Semantically only the low
/// bits carry entropy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    #[inline]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    /// Low 32 bits, the unit the GCD analyzer and slot array operate on.
    #[inline]
    pub const fn low32(self) -> u32 {
        self.0 as u32
    }

    /// `s`-bit slot value after dividing by `divisor` (GCD stripping).
    #[inline]
    pub fn slot_value(self, divisor: u32, slot_bits: u32) -> u32 {
        let divided = if divisor > 1 {
            self.low32() / divisor
        } else {
            self.low32()
        };
        let mask = (1u32 << slot_bits) - 1;
        divided & mask
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Source of high-resolution timestamps and of the "is a high-res timer
/// actually present" fact that governs slot vs. word mode (§4.1).
///
/// Implemented by the embedding kernel (TSC reader, `Instant`-backed
/// fixture for tests, ...); the core never reads a hardware clock itself.
pub trait ClockSource: Send + Sync {
    fn now(&self) -> Timestamp;
    fn high_res_available(&self) -> bool;
}

#[cfg(any(test, feature = "std"))]
pub mod std_clock {
    use super::*;
    use std::time::Instant;

    /// `std::time`-backed clock used by tests and by host-side tooling
    /// built with the `std` feature.
    pub struct StdClock {
        start: Instant,
    }

    impl StdClock {
        pub fn new() -> Self {
            Self {
                start: Instant::now(),
            }
        }
    }

    impl Default for StdClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ClockSource for StdClock {
        fn now(&self) -> Timestamp {
            Timestamp(self.start.elapsed().as_nanos() as u64)
        }

        fn high_res_available(&self) -> bool {
            true
        }
    }
}
