//! Collaborator seams: target memory and native type information.
//!
//! The synthetic type engine never owns the target. Reading bytes at an
//! address and asking "does this module already define a native type named X"
//! are both supplied by the host environment through these traits.

use crate::{ArchInfo, MemoryError, ModuleId};
use serde::{Deserialize, Serialize};

/// Reads raw bytes from target memory.
pub trait MemoryReader {
    /// Read `len` bytes at `address`. Fails when the range is unmapped or the
    /// target is unavailable; a failed read is reported once, never retried.
    fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>, MemoryError>;

    /// Read one pointer-width word at `address`.
    fn read_pointer(&self, address: u64, arch: &ArchInfo) -> Result<u64, MemoryError> {
        let bytes = self.read_bytes(address, arch.pointer_size)?;
        let mut word = [0u8; 8];
        if arch.big_endian {
            word[8 - bytes.len()..].copy_from_slice(&bytes);
            Ok(u64::from_be_bytes(word))
        } else {
            word[..bytes.len()].copy_from_slice(&bytes);
            Ok(u64::from_le_bytes(word))
        }
    }
}

/// The kind of a native type, as reported by the module's symbol information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeKind {
    /// Integer scalar.
    Int { signed: bool },
    /// Floating-point scalar.
    Float,
    /// Pointer scalar.
    Pointer,
    /// Struct/union/class defined by the module's own debug info.
    Udt,
    /// Enumeration defined by the module's own debug info.
    Enum,
}

/// Size, alignment, and kind of one native type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeTypeInfo {
    pub size: usize,
    pub align: usize,
    pub kind: NativeKind,
}

impl NativeTypeInfo {
    pub fn new(size: usize, align: usize, kind: NativeKind) -> Self {
        Self { size, align, kind }
    }
}

/// Queries type information the bound module already defines.
///
/// Names that resolve here are *native*; everything else becomes synthetic
/// and is driven by the header parser.
pub trait NativeTypes {
    /// Does `module` define a native type named `name`?
    fn has_type(&self, module: &ModuleId, name: &str) -> bool {
        self.type_info(module, name).is_some()
    }

    /// Size/alignment/kind of a native type, if the module defines it.
    fn type_info(&self, module: &ModuleId, name: &str) -> Option<NativeTypeInfo>;
}

/// A `MemoryReader` over one contiguous byte window.
///
/// Backs tests and snapshot-style hosts (core dumps, captured buffers).
/// Reads outside the window fail as unmapped.
#[derive(Debug, Clone)]
pub struct SliceMemory {
    base: u64,
    data: Vec<u8>,
}

impl SliceMemory {
    pub fn new(base: u64, data: Vec<u8>) -> Self {
        Self { base, data }
    }

    /// Base address of the window.
    pub fn base(&self) -> u64 {
        self.base
    }
}

impl MemoryReader for SliceMemory {
    fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>, MemoryError> {
        let start = address
            .checked_sub(self.base)
            .ok_or(MemoryError::Unmapped { address, len })? as usize;
        let end = start
            .checked_add(len)
            .ok_or(MemoryError::Unmapped { address, len })?;
        if end > self.data.len() {
            return Err(MemoryError::Unmapped { address, len });
        }
        Ok(self.data[start..end].to_vec())
    }
}

/// The standard C scalar catalog as a `NativeTypes` implementation.
///
/// Hosts whose symbol provider only knows user-defined types can layer this
/// underneath; it also serves as the provider in tests. Sizing follows the
/// target data model (`long` is 4 bytes under LLP64, 8 under LP64).
#[derive(Debug, Clone, Copy)]
pub struct HostTypes {
    arch: ArchInfo,
}

impl HostTypes {
    pub fn new(arch: ArchInfo) -> Self {
        Self { arch }
    }

    fn scalar(&self, size: usize, kind: NativeKind) -> NativeTypeInfo {
        NativeTypeInfo::new(size, self.arch.cap_align(size), kind)
    }
}

impl NativeTypes for HostTypes {
    fn type_info(&self, _module: &ModuleId, name: &str) -> Option<NativeTypeInfo> {
        let signed = |s| NativeKind::Int { signed: s };
        let info = match name {
            // void has no size of its own; pointer-to-void is the useful form
            "void" => NativeTypeInfo::new(0, 1, NativeKind::Udt),
            "char" | "signed char" | "int8_t" => self.scalar(1, signed(true)),
            "unsigned char" | "uint8_t" | "bool" | "_Bool" => self.scalar(1, signed(false)),
            "short" | "short int" | "signed short" | "int16_t" => self.scalar(2, signed(true)),
            "unsigned short" | "uint16_t" => self.scalar(2, signed(false)),
            "int" | "signed" | "signed int" | "int32_t" => self.scalar(4, signed(true)),
            "unsigned" | "unsigned int" | "uint32_t" => self.scalar(4, signed(false)),
            "long" | "signed long" => self.scalar(self.arch.long_size, signed(true)),
            "unsigned long" => self.scalar(self.arch.long_size, signed(false)),
            "long long" | "signed long long" | "int64_t" => self.scalar(8, signed(true)),
            "unsigned long long" | "uint64_t" => self.scalar(8, signed(false)),
            "size_t" | "uintptr_t" => self.scalar(self.arch.pointer_size, signed(false)),
            "ssize_t" | "intptr_t" | "ptrdiff_t" => {
                self.scalar(self.arch.pointer_size, signed(true))
            }
            // wchar_t is 2 bytes under LLP64 targets, 4 elsewhere
            "wchar_t" => self.scalar(if self.arch.long_size == 4 { 2 } else { 4 }, signed(false)),
            "float" => self.scalar(4, NativeKind::Float),
            "double" => self.scalar(8, NativeKind::Float),
            "long double" => self.scalar(16, NativeKind::Float),
            _ => return None,
        };
        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> ModuleId {
        ModuleId::new("test", 0)
    }

    #[test]
    fn test_slice_memory_read() {
        let mem = SliceMemory::new(0x1000, vec![1, 2, 3, 4]);
        assert_eq!(mem.read_bytes(0x1000, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(mem.read_bytes(0x1002, 2).unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_slice_memory_unmapped() {
        let mem = SliceMemory::new(0x1000, vec![0; 8]);
        assert!(mem.read_bytes(0xfff, 1).is_err());
        assert!(mem.read_bytes(0x1007, 2).is_err());
        assert!(mem.read_bytes(0x2000, 1).is_err());
    }

    #[test]
    fn test_read_pointer_little_endian() {
        let mem = SliceMemory::new(0, vec![0x78, 0x56, 0x34, 0x12, 0, 0, 0, 0]);
        let ptr = mem.read_pointer(0, &ArchInfo::lp64()).unwrap();
        assert_eq!(ptr, 0x12345678);
    }

    #[test]
    fn test_read_pointer_32bit() {
        let mem = SliceMemory::new(0, vec![0x78, 0x56, 0x34, 0x12]);
        let ptr = mem.read_pointer(0, &ArchInfo::ilp32()).unwrap();
        assert_eq!(ptr, 0x12345678);
    }

    #[test]
    fn test_read_pointer_big_endian() {
        let arch = ArchInfo {
            big_endian: true,
            ..ArchInfo::ilp32()
        };
        let mem = SliceMemory::new(0, vec![0x12, 0x34, 0x56, 0x78]);
        assert_eq!(mem.read_pointer(0, &arch).unwrap(), 0x12345678);
    }

    #[test]
    fn test_host_types_scalars() {
        let host = HostTypes::new(ArchInfo::lp64());
        assert_eq!(host.type_info(&module(), "int").unwrap().size, 4);
        assert_eq!(host.type_info(&module(), "char").unwrap().size, 1);
        assert_eq!(host.type_info(&module(), "long").unwrap().size, 8);
        assert!(host.has_type(&module(), "unsigned long long"));
        assert!(!host.has_type(&module(), "FOO"));
    }

    #[test]
    fn test_host_types_llp64_long() {
        let host = HostTypes::new(ArchInfo::llp64());
        assert_eq!(host.type_info(&module(), "long").unwrap().size, 4);
        assert_eq!(host.type_info(&module(), "unsigned long").unwrap().size, 4);
        assert_eq!(host.type_info(&module(), "long long").unwrap().size, 8);
    }

    #[test]
    fn test_host_types_signedness() {
        let host = HostTypes::new(ArchInfo::lp64());
        let int = host.type_info(&module(), "int").unwrap();
        assert_eq!(int.kind, NativeKind::Int { signed: true });
        let uint = host.type_info(&module(), "unsigned int").unwrap();
        assert_eq!(uint.kind, NativeKind::Int { signed: false });
    }

    #[test]
    fn test_host_types_alignment_capped() {
        let host = HostTypes::new(ArchInfo::ilp32());
        let ld = host.type_info(&module(), "long double").unwrap();
        assert_eq!(ld.align, 4);
        let ll = host.type_info(&module(), "long long").unwrap();
        assert_eq!(ll.align, 4);
    }
}
