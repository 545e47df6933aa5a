//! Synthetic type representation.
//!
//! Unlike a compiler's closed type tree, synthetic definitions refer to other
//! types by *name*: a field's type may resolve to another synthetic
//! definition, to a typedef alias, or to a native type the bound module's own
//! symbol information already describes. Resolution happens at layout and
//! materialization time against the live registry.

use serde::{Deserialize, Serialize};

/// Kind of a synthetic type definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Struct,
    Union,
    Enum,
    /// Typedef alias to another named type.
    Alias,
}

/// Size in bytes of the integer type underlying every synthetic enum.
pub const ENUM_BASE_SIZE: usize = 4;

/// One struct/union member.
///
/// `array_length`, `pointer_depth`, and `bit_length` are mutually exclusive;
/// the parser enforces this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Resolved type name (post alias/remap resolution).
    pub type_name: String,
    /// True when the bound module's symbol information defines the type.
    pub native: bool,
    /// Field name; `None` for an anonymous embedded struct/union.
    pub name: Option<String>,
    /// Fixed array length, constant-evaluated at parse time.
    pub array_length: Option<usize>,
    /// Number of `*` levels.
    pub pointer_depth: u32,
    /// Declared bit width for bitfields.
    pub bit_length: Option<u32>,
    /// Anonymous struct/union member whose fields flatten into the parent.
    pub embedded: bool,
}

impl FieldSpec {
    /// An ordinary scalar/UDT field.
    pub fn scalar(type_name: impl Into<String>, native: bool, name: Option<String>) -> Self {
        Self {
            type_name: type_name.into(),
            native,
            name,
            array_length: None,
            pointer_depth: 0,
            bit_length: None,
            embedded: false,
        }
    }

    pub fn is_bitfield(&self) -> bool {
        self.bit_length.is_some()
    }

    pub fn is_array(&self) -> bool {
        self.array_length.is_some()
    }

    pub fn is_pointer(&self) -> bool {
        self.pointer_depth > 0
    }
}

/// One enumerant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enumerant {
    pub name: String,
    pub value: i64,
}

/// Typedef target: a named type plus accumulated pointer levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasTarget {
    pub target: String,
    pub pointer_depth: u32,
}

/// A parsed type definition.
///
/// `fields` is populated for structs/unions, `enumerants` for enums, and
/// `alias` for typedefs; names are unique within a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    pub fields: Vec<FieldSpec>,
    pub enumerants: Vec<Enumerant>,
    pub alias: Option<AliasTarget>,
}

impl TypeDefinition {
    pub fn new_struct(name: impl Into<String>) -> Self {
        Self::empty(name, TypeKind::Struct)
    }

    pub fn new_union(name: impl Into<String>) -> Self {
        Self::empty(name, TypeKind::Union)
    }

    pub fn new_enum(name: impl Into<String>) -> Self {
        Self::empty(name, TypeKind::Enum)
    }

    pub fn new_alias(name: impl Into<String>, target: impl Into<String>, pointer_depth: u32) -> Self {
        let mut def = Self::empty(name, TypeKind::Alias);
        def.alias = Some(AliasTarget {
            target: target.into(),
            pointer_depth,
        });
        def
    }

    fn empty(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            fields: Vec::new(),
            enumerants: Vec::new(),
            alias: None,
        }
    }

    /// Value of an enumerant by name.
    pub fn enum_value(&self, name: &str) -> Option<i64> {
        self.enumerants
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value)
    }

    /// Name of the first enumerant with this value. Enumerants may alias the
    /// same value; first match wins.
    pub fn enum_name(&self, value: i64) -> Option<&str> {
        self.enumerants
            .iter()
            .find(|e| e.value == value)
            .map(|e| e.name.as_str())
    }

    /// Ordered field names (named fields only).
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter_map(|f| f.name.as_deref())
    }
}
