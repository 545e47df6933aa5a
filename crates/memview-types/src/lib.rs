//! Synthetic C types for debugger tooling.
//!
//! Parses a practical subset of C headers (structs, unions, enums,
//! typedefs, preprocessor conditionals) into a session-scoped registry,
//! computes C ABI layouts for the target architecture, and materializes
//! lazy typed views over target memory.
//!
//! ```no_run
//! use memview_core::{ArchInfo, HostTypes, SliceMemory};
//! use memview_types::{Session, SessionAttributes};
//! use memview_core::ModuleId;
//!
//! # fn main() -> Result<(), memview_types::TypeError> {
//! let arch = ArchInfo::lp64();
//! let mut session = Session::new(
//!     arch,
//!     Box::new(SliceMemory::new(0x1000, vec![0; 64])),
//!     Box::new(HostTypes::new(arch)),
//! );
//! let module = ModuleId::new("app", 0x400000);
//! session.read_header_source(
//!     "struct Point { int x; int y; };",
//!     "point.h",
//!     &module,
//!     SessionAttributes::default(),
//! )?;
//! let point = session.create_instance("Point", 0x1000)?;
//! let x = point.get("x")?;
//! # let _ = x;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod expr;
pub mod instance;
pub mod layout;
pub mod parser;
pub mod preprocess;
pub mod registry;
pub mod token;
pub mod types;

pub use error::{TypeError, TypeResult};
pub use expr::EvalScope;
pub use instance::{EnumValue, Instance, Value};
pub use layout::{Layout, TypeScope};
pub use registry::{Registry, Session, SessionAttributes, SessionStats, TypeTable};
pub use types::{AliasTarget, Enumerant, FieldSpec, TypeDefinition, TypeKind};
