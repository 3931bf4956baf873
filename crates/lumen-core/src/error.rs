//! Error handling for the firmware core.
//!
//! Protocol-level failures (bad CRC, duplicate frames, malformed input) are
//! silent drops by design and never surface here. The only conditions worth
//! reporting to a caller are table exhaustion at wiring time and a shard
//! missing from flash.

use core::fmt;

/// Result type for core operations.
pub type Result<T> = core::result::Result<T, CoreError>;

/// Errors the core reports to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// Scheduler task table is at capacity.
    TaskTableFull,
    /// No valid copy of the requested shard exists in flash.
    ShardNotFound,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskTableFull => write!(f, "task table full"),
            Self::ShardNotFound => write!(f, "shard not found in flash"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CoreError {}
