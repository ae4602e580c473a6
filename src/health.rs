//! Health testing (component C, §4.3).
//!
//! SP800-90B repetition-count (RCT) and adaptive-proportion (APT) tests
//! applied to the low byte of each raw timestamp, plus the per-source
//! startup-complete gate. `lrng_internal.h` only exposes the three-way
//! verdict enum and the `lrng_sp80090b_startup_complete`/`lrng_health_test`
//! signatures for the real module (its body is outside the retrieved
//! source window); the RCT/APT parameters below are the standard SP800-90B
//! figures for a single-bit-per-sample estimate, which is the conservative
//! assumption this core makes about raw timestamp LSBs.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use spin::Mutex;

/// SP800-90B RCT cutoff for an assumed worst-case min-entropy of 1 bit per
/// sample at false-positive rate alpha = 2^-30: C = 1 + ceil(-log2(alpha)/H).
pub const RCT_CUTOFF: u32 = 31;

/// SP800-90B APT window size.
pub const APT_WINDOW_SIZE: u32 = 512;

/// SP800-90B APT cutoff for H = 1 bit/sample, W = 512, alpha = 2^-30.
pub const APT_CUTOFF: u32 = 329;

/// Samples a source must pass consecutively, without triggering either
/// test, before it is considered past SP800-90B startup.
pub const STARTUP_SAMPLES: u32 = 1024;

/// Per-event gate verdict (§4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Sample packed and counted.
    Pass,
    /// Sample packed but not counted toward `events`.
    FailUse,
    /// Sample discarded: not packed, not counted.
    FailDrop,
}

struct RctState {
    last_low_byte: u8,
    run_length: u32,
}

struct AptState {
    window_count: u32,
    reference: u8,
    matches: u32,
}

/// One health-test instance, owned per entropy source (GCD-analyzer-style:
/// a state variable per source, not a global, per §9 design notes).
pub struct HealthTester {
    rct: Mutex<RctState>,
    apt: Mutex<AptState>,
    startup_remaining: AtomicU32,
    total_failures: AtomicU64,
}

impl HealthTester {
    pub const fn new() -> Self {
        Self {
            rct: Mutex::new(RctState {
                last_low_byte: 0,
                run_length: 0,
            }),
            apt: Mutex::new(AptState {
                window_count: 0,
                reference: 0,
                matches: 0,
            }),
            startup_remaining: AtomicU32::new(STARTUP_SAMPLES),
            total_failures: AtomicU64::new(0),
        }
    }

    /// Whether this source has completed its SP800-90B startup run
    /// without a failure resetting the window.
    pub fn startup_complete(&self) -> bool {
        self.startup_remaining.load(Ordering::Acquire) == 0
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Disable health testing (debug/bring-up escape hatch, mirrors
    /// `lrng_health_disable`): forces `startup_complete()` to report true
    /// and every future `test` call to return `Pass`.
    pub fn disable(&self) {
        self.startup_remaining.store(0, Ordering::Release);
    }

    fn reset_startup_window(&self) {
        self.startup_remaining.store(STARTUP_SAMPLES, Ordering::Release);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn tick_startup(&self) {
        // Saturating decrement; never wraps once it hits zero ("complete"
        // stays sticky until an explicit failure resets the window).
        let _ = self
            .startup_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                if v == 0 {
                    None
                } else {
                    Some(v - 1)
                }
            });
    }

    /// Run RCT + APT over one raw timestamp's low byte. Tie-break: if both
    /// tests would flag, `FailDrop` (the stronger verdict) wins.
    pub fn test(&self, low_byte: u8) -> Verdict {
        let rct_fail = self.run_rct(low_byte);
        let apt_fail = self.run_apt(low_byte);

        let verdict = if rct_fail {
            Verdict::FailDrop
        } else if apt_fail {
            Verdict::FailUse
        } else {
            Verdict::Pass
        };

        match verdict {
            Verdict::Pass => self.tick_startup(),
            Verdict::FailUse | Verdict::FailDrop => self.reset_startup_window(),
        }

        verdict
    }

    fn run_rct(&self, low_byte: u8) -> bool {
        let mut s = self.rct.lock();
        if s.run_length == 0 {
            s.last_low_byte = low_byte;
            s.run_length = 1;
            return false;
        }
        if low_byte == s.last_low_byte {
            s.run_length += 1;
            if s.run_length >= RCT_CUTOFF {
                s.run_length = 0;
                return true;
            }
            false
        } else {
            s.last_low_byte = low_byte;
            s.run_length = 1;
            false
        }
    }

    fn run_apt(&self, low_byte: u8) -> bool {
        let mut s = self.apt.lock();
        if s.window_count == 0 {
            s.reference = low_byte;
            s.matches = 0;
            s.window_count = 1;
            return false;
        }
        if low_byte == s.reference {
            s.matches += 1;
        }
        s.window_count += 1;
        if s.window_count >= APT_WINDOW_SIZE {
            let fail = s.matches >= APT_CUTOFF;
            s.window_count = 0;
            s.matches = 0;
            return fail;
        }
        false
    }
}

impl Default for HealthTester {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tester_not_started() {
        let h = HealthTester::new();
        assert!(!h.startup_complete());
    }

    #[test]
    fn disable_forces_complete() {
        let h = HealthTester::new();
        h.disable();
        assert!(h.startup_complete());
    }

    #[test]
    fn rct_trips_on_long_repeat_run() {
        let h = HealthTester::new();
        let mut last = Verdict::Pass;
        for _ in 0..RCT_CUTOFF {
            last = h.test(0x42);
        }
        assert_eq!(last, Verdict::FailDrop);
    }

    #[test]
    fn varying_samples_never_trip_rct() {
        let h = HealthTester::new();
        for i in 0..(STARTUP_SAMPLES as u16 + 10) {
            let v = h.test((i % 251) as u8);
            assert_ne!(v, Verdict::FailDrop);
        }
        assert!(h.startup_complete());
    }

    #[test]
    fn failure_resets_startup_window() {
        let h = HealthTester::new();
        for _ in 0..RCT_CUTOFF {
            h.test(7);
        }
        assert!(!h.startup_complete());
        assert_eq!(h.total_failures(), 1);
    }
}
