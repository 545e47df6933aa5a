//! Error types for target memory access.

use thiserror::Error;

/// Error type for reads from target memory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The address range is not mapped in the target.
    #[error("unmapped read of {len} bytes at {address:#x}")]
    Unmapped { address: u64, len: usize },

    /// Fewer bytes were available than requested.
    #[error("short read at {address:#x}: wanted {wanted} bytes, got {got}")]
    ShortRead {
        address: u64,
        wanted: usize,
        got: usize,
    },

    /// The target process or image is gone.
    #[error("target unavailable")]
    TargetUnavailable,
}
