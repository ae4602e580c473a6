//! Runtime configuration (§6 "Configuration").
//!
//! The external sysctl/debugfs surface sees a name -> value map; the core
//! only needs the typed struct it resolves to. Defaults below are taken
//! from `lrng_internal.h` in the upstream source this crate's design is
//! grounded on (`LRNG_DRNG_SECURITY_STRENGTH_BYTES`, `LRNG_IRQ_ENTROPY_BITS`,
//! `LRNG_MIN_SEED_ENTROPY_BITS`, `LRNG_INIT_ENTROPY_BITS`).

use crate::error::{LrngError, Result};

/// Bits of DRNG security strength this core targets. Also the default
/// hash/digest size assumption used for entropy-cap arithmetic.
pub const SECURITY_STRENGTH_BITS: u32 = 256;
pub const SECURITY_STRENGTH_BYTES: usize = (SECURITY_STRENGTH_BITS / 8) as usize;

pub const INIT_ENTROPY_BITS: u32 = 32;
pub const MIN_SEED_ENTROPY_BITS: u32 = 128;
pub const FULL_SEED_ENTROPY_BITS: u32 = SECURITY_STRENGTH_BITS;

/// Default DRNG reseed age trigger, in seconds.
pub const DEFAULT_RESEED_MAX_SECONDS: u64 = 600;

/// Default per-CPU slot-array exponent (2^6 = 64 slots).
pub const DEFAULT_POOL_SIZE_LOG2: u8 = 6;

/// Oversampling floor mandated by P9: entropy source callers must not
/// configure a factor weaker than this when no high-resolution timer is
/// present.
pub const MIN_OVERSAMPLING_FACTOR: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Events credited per `SECURITY_STRENGTH_BITS` worth of entropy for
    /// the interrupt source.
    pub irq_entropy_bits: u32,
    /// Same, for the scheduler-tick source.
    pub sched_entropy_bits: u32,
    /// Multiplier applied to required event counts when no high-res timer
    /// is present. Must be >= `MIN_OVERSAMPLING_FACTOR`.
    pub oversampling_factor: u32,
    /// Maximum age, in seconds, before a DRNG is forced to reseed.
    pub reseed_max_seconds: u64,
    /// log2 of the per-CPU slot array length.
    pub pool_size_log2: u8,
    /// Credit bootloader-supplied bytes as entropy.
    pub trust_bootloader: bool,
    /// Credit CPU-RNG (RDRAND/RDSEED-class) bytes as entropy.
    pub trust_cpu: bool,
    /// Whether a high-resolution timer is available; governs slot-mode
    /// vs. word-mode packing (§4.1) and oversampling (P9).
    pub high_res_timer: bool,
    /// Threshold, in credited aggregate bits, beyond which `pool_add_events`
    /// considers the write-wakeup pool "large enough" to schedule reseed
    /// work eagerly rather than coalescing further small increments.
    /// Supplemented from `lrng_pool.c`'s write-wakeup threshold logic.
    pub write_wakeup_bits: u32,
    /// Whether runtime hash/DRNG callback switching is permitted at all.
    pub switching_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        let write_wakeup_bits = if SECURITY_STRENGTH_BITS * 2 <= (1u32 << DEFAULT_POOL_SIZE_LOG2) * 8
        {
            SECURITY_STRENGTH_BITS * 2
        } else {
            SECURITY_STRENGTH_BITS + SECURITY_STRENGTH_BITS / 2
        };
        Self {
            irq_entropy_bits: SECURITY_STRENGTH_BITS,
            sched_entropy_bits: SECURITY_STRENGTH_BITS,
            oversampling_factor: MIN_OVERSAMPLING_FACTOR,
            reseed_max_seconds: DEFAULT_RESEED_MAX_SECONDS,
            pool_size_log2: DEFAULT_POOL_SIZE_LOG2,
            trust_bootloader: false,
            trust_cpu: true,
            high_res_timer: true,
            write_wakeup_bits,
            switching_enabled: true,
        }
    }
}

/// Builder mirroring the name -> value configuration map of §6; unknown
/// keys and out-of-range values are rejected rather than panicking.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConfigBuilder {
    cfg: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            cfg: Config::default(),
        }
    }

    pub fn irq_entropy_bits(mut self, v: u32) -> Self {
        self.cfg.irq_entropy_bits = v;
        self
    }

    pub fn sched_entropy_bits(mut self, v: u32) -> Self {
        self.cfg.sched_entropy_bits = v;
        self
    }

    pub fn oversampling_factor(mut self, v: u32) -> Self {
        self.cfg.oversampling_factor = v;
        self
    }

    pub fn reseed_max_seconds(mut self, v: u64) -> Self {
        self.cfg.reseed_max_seconds = v;
        self
    }

    pub fn pool_size_log2(mut self, v: u8) -> Self {
        self.cfg.pool_size_log2 = v;
        self
    }

    pub fn trust_bootloader(mut self, v: bool) -> Self {
        self.cfg.trust_bootloader = v;
        self
    }

    pub fn trust_cpu(mut self, v: bool) -> Self {
        self.cfg.trust_cpu = v;
        self
    }

    pub fn high_res_timer(mut self, v: bool) -> Self {
        self.cfg.high_res_timer = v;
        self
    }

    pub fn switching_enabled(mut self, v: bool) -> Self {
        self.cfg.switching_enabled = v;
        self
    }

    pub fn build(self) -> Result<Config> {
        if self.cfg.oversampling_factor < MIN_OVERSAMPLING_FACTOR {
            return Err(LrngError::InvalidArgument);
        }
        if self.cfg.pool_size_log2 == 0 || self.cfg.pool_size_log2 > 16 {
            return Err(LrngError::InvalidArgument);
        }
        if self.cfg.irq_entropy_bits == 0 || self.cfg.sched_entropy_bits == 0 {
            return Err(LrngError::InvalidArgument);
        }
        Ok(self.cfg)
    }
}
