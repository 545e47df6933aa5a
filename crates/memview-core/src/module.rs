//! Target module identity.

use serde::{Deserialize, Serialize};

/// Identity of one module (image) loaded in the debug target.
///
/// Type tables are keyed by (header path, module), so two modules with the
/// same name but different bases are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId {
    /// Module name as reported by the target (e.g. `ntdll.dll`, `libc.so.6`).
    pub name: String,
    /// Load base address.
    pub base: u64,
}

impl ModuleId {
    pub fn new(name: impl Into<String>, base: u64) -> Self {
        Self {
            name: name.into(),
            base,
        }
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{:#x}", self.name, self.base)
    }
}
