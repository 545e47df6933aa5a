//! Data-model description of the debug target.

use serde::{Deserialize, Serialize};

/// Sizing and byte-order properties of the target.
///
/// The pointer size doubles as the cap on every alignment the layout engine
/// computes, matching the natural-alignment rule of the common C ABIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchInfo {
    /// Pointer size in bytes.
    pub pointer_size: usize,
    /// Size of `long` in bytes (differs between LP64 and LLP64).
    pub long_size: usize,
    /// Is the target big endian?
    pub big_endian: bool,
}

impl Default for ArchInfo {
    fn default() -> Self {
        Self::lp64()
    }
}

impl ArchInfo {
    /// LP64 model (Linux, macOS 64-bit).
    pub fn lp64() -> Self {
        Self {
            pointer_size: 8,
            long_size: 8,
            big_endian: false,
        }
    }

    /// LLP64 model (Windows 64-bit): `long` stays 4 bytes.
    pub fn llp64() -> Self {
        Self {
            pointer_size: 8,
            long_size: 4,
            big_endian: false,
        }
    }

    /// ILP32 model (32-bit targets).
    pub fn ilp32() -> Self {
        Self {
            pointer_size: 4,
            long_size: 4,
            big_endian: false,
        }
    }

    /// Clamp an alignment to the pointer width.
    pub fn cap_align(&self, align: usize) -> usize {
        align.min(self.pointer_size).max(1)
    }

    /// Returns whether this is a 64-bit target.
    pub fn is_64bit(&self) -> bool {
        self.pointer_size == 8
    }
}
