//! Error kinds surfaced by the core (§7).

use core::fmt;

/// All conditions the core may report.
///
/// `#[non_exhaustive]` because external collaborators (the character
/// device, /proc/debugfs surfaces) are expected to match on the kinds
/// they care about and fall through to a generic path otherwise.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LrngError {
    /// Switch requested when switching is disabled by configuration.
    NotSupported,
    /// Buffer too small, invalid flag combination (e.g. both "insecure"
    /// and "blocking").
    InvalidArgument,
    /// `get_seed` target buffer smaller than `size_of::<u64>()`.
    BufferTooSmall,
    /// `get_seed` buffer holds the length field but not the payload;
    /// length is written, no payload.
    MessageSize,
    /// Non-blocking request and preconditions not yet satisfied (not
    /// min-seeded, reseed in progress).
    Again,
    /// Blocking wait cancelled by signal.
    Interrupted,
    /// Primitive failure: hash init/update/final, DRNG alloc/seed/generate
    /// returned failure.
    Internal,
    /// Reseed attempted while one is already running (non-fatal; caller
    /// retries).
    InProgress,
}

impl fmt::Display for LrngError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LrngError::NotSupported => "operation not supported by current configuration",
            LrngError::InvalidArgument => "invalid argument",
            LrngError::BufferTooSmall => "buffer too small",
            LrngError::MessageSize => "buffer holds length but not payload",
            LrngError::Again => "not ready, try again",
            LrngError::Interrupted => "interrupted by signal",
            LrngError::Internal => "internal primitive failure",
            LrngError::InProgress => "reseed already in progress",
        };
        f.write_str(s)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LrngError {}

pub type Result<T> = core::result::Result<T, LrngError>;
