//! # memview-core
//!
//! Host-facing abstractions for the memview synthetic type engine. This crate
//! defines the data-model description of the debug target (pointer width,
//! endianness), module identity, and the two collaborator seams the engine
//! consumes: reading raw bytes from target memory and querying the module's
//! own native type information.

pub mod arch;
pub mod error;
pub mod module;
pub mod provider;

pub use arch::ArchInfo;
pub use error::MemoryError;
pub use module::ModuleId;
pub use provider::{
    HostTypes, MemoryReader, NativeKind, NativeTypeInfo, NativeTypes, SliceMemory,
};
