//! Session-scoped registry of parsed type definitions.
//!
//! Parsing a header produces a [`TypeTable`]; all tables for a session
//! share one [`Registry`] so that types from one header can reference
//! types from another. Header reads are idempotent per `(path, module)`
//! key, and a header that fails to parse registers nothing.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use memview_core::{ArchInfo, MemoryReader, ModuleId, NativeTypes};
use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};
use crate::instance::Instance;
use crate::layout::{self, Layout, Resolved, TypeScope};
use crate::parser::HeaderParser;
use crate::types::TypeDefinition;

/// Per-header knobs supplied by the caller at read time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionAttributes {
    /// Macros predefined before the header's first line, as if each were
    /// a `#define NAME VALUE` at the top of the file.
    pub macros: HashMap<String, String>,
    /// When set, enum-typed reads produce an [`crate::EnumValue`] carrying
    /// the enumerant name instead of a bare integer.
    pub return_enums_as_objects: bool,
    /// Accepted for compatibility with older callers; synthetic model
    /// registration hooks were removed and this flag has no effect.
    pub register_synthetic_models: bool,
}

/// The outcome of reading one header for one module.
#[derive(Debug, Clone)]
pub struct TypeTable {
    module: ModuleId,
    header_path: PathBuf,
    attributes: SessionAttributes,
    type_names: Vec<String>,
}

impl TypeTable {
    pub fn module(&self) -> &ModuleId {
        &self.module
    }

    pub fn header_path(&self) -> &Path {
        &self.header_path
    }

    pub fn attributes(&self) -> &SessionAttributes {
        &self.attributes
    }

    /// Names of the types this header declared, in declaration order.
    pub fn type_names(&self) -> &[String] {
        &self.type_names
    }

    /// Definitions this header declared, in declaration order.
    pub fn types<'a>(
        &'a self,
        registry: &'a Registry,
    ) -> impl Iterator<Item = &'a TypeDefinition> + 'a {
        self.type_names
            .iter()
            .filter_map(move |name| registry.definition(name))
    }
}

/// All type definitions known to a session, across every header read.
#[derive(Debug, Default)]
pub struct Registry {
    types: IndexMap<String, TypeDefinition>,
    tables: Vec<TypeTable>,
    table_index: HashMap<(PathBuf, ModuleId), usize>,
    /// Type name -> index of the table that declared it.
    owners: HashMap<String, usize>,
    /// Memoized layouts of committed types.
    layouts: RefCell<HashMap<String, Layout>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn definition(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.values()
    }

    pub fn tables(&self) -> &[TypeTable] {
        &self.tables
    }

    /// Searches every registered enum for an enumerant named `name`.
    pub fn enum_value(&self, name: &str) -> Option<i64> {
        self.types.values().find_map(|def| def.enum_value(name))
    }

    pub(crate) fn cached_layout(&self, name: &str) -> Option<Layout> {
        self.layouts.borrow().get(name).copied()
    }

    pub(crate) fn store_layout(&self, name: &str, layout: Layout) {
        self.layouts.borrow_mut().insert(name.to_string(), layout);
    }

    fn table_for(&self, path: &Path, module: &ModuleId) -> Option<usize> {
        self.table_index
            .get(&(path.to_path_buf(), module.clone()))
            .copied()
    }

    /// Commits a fully-parsed staging table. Only called after the whole
    /// header parsed cleanly, so registration is all-or-nothing.
    fn commit(
        &mut self,
        path: &Path,
        module: ModuleId,
        attributes: SessionAttributes,
        staging: IndexMap<String, TypeDefinition>,
    ) -> usize {
        let index = self.tables.len();
        let type_names: Vec<String> = staging.keys().cloned().collect();
        for (name, def) in staging {
            self.owners.insert(name.clone(), index);
            self.types.insert(name, def);
        }
        self.tables.push(TypeTable {
            module: module.clone(),
            header_path: path.to_path_buf(),
            attributes,
            type_names,
        });
        self.table_index.insert((path.to_path_buf(), module), index);
        index
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(&mut self, def: TypeDefinition) {
        self.types.insert(def.name.clone(), def);
    }
}

/// Counters describing what a session has parsed so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub type_count: usize,
    pub table_count: usize,
    /// Headers actually parsed; repeated reads of the same `(path,
    /// module)` key hit the cache and do not increment this.
    pub parse_count: usize,
}

/// A debug-target session: architecture, memory access, native type
/// catalog, and the registry of synthetic types read so far.
pub struct Session {
    arch: ArchInfo,
    memory: Box<dyn MemoryReader>,
    natives: Box<dyn NativeTypes>,
    registry: Registry,
    parse_count: usize,
    fallback_module: ModuleId,
    default_attributes: SessionAttributes,
}

impl Session {
    pub fn new(
        arch: ArchInfo,
        memory: Box<dyn MemoryReader>,
        natives: Box<dyn NativeTypes>,
    ) -> Self {
        Self {
            arch,
            memory,
            natives,
            registry: Registry::new(),
            parse_count: 0,
            fallback_module: ModuleId::new("", 0),
            default_attributes: SessionAttributes::default(),
        }
    }

    pub fn arch(&self) -> &ArchInfo {
        &self.arch
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            type_count: self.registry.type_count(),
            table_count: self.registry.table_count(),
            parse_count: self.parse_count,
        }
    }

    pub(crate) fn memory(&self) -> &dyn MemoryReader {
        self.memory.as_ref()
    }

    pub(crate) fn natives(&self) -> &dyn NativeTypes {
        self.natives.as_ref()
    }

    /// Reads and parses a header file for `module`.
    ///
    /// Re-reading the same `(path, module)` pair returns the existing
    /// table without touching the file or re-parsing.
    pub fn read_header(
        &mut self,
        path: impl AsRef<Path>,
        module: &ModuleId,
        attributes: SessionAttributes,
    ) -> TypeResult<&TypeTable> {
        let path = path.as_ref();
        if let Some(idx) = self.registry.table_for(path, module) {
            return Ok(&self.registry.tables[idx]);
        }
        let source = fs::read_to_string(path)?;
        self.parse_source(&source, path, module, attributes)
    }

    /// Like [`Session::read_header`] but with the header text supplied
    /// directly; `path` only serves as the cache key.
    pub fn read_header_source(
        &mut self,
        source: &str,
        path: impl AsRef<Path>,
        module: &ModuleId,
        attributes: SessionAttributes,
    ) -> TypeResult<&TypeTable> {
        let path = path.as_ref();
        if let Some(idx) = self.registry.table_for(path, module) {
            return Ok(&self.registry.tables[idx]);
        }
        self.parse_source(source, path, module, attributes)
    }

    fn parse_source(
        &mut self,
        source: &str,
        path: &Path,
        module: &ModuleId,
        attributes: SessionAttributes,
    ) -> TypeResult<&TypeTable> {
        let staging = {
            let parser = HeaderParser::new(
                source,
                attributes.macros.clone(),
                &self.arch,
                module,
                self.natives.as_ref(),
                &self.registry,
            )?;
            parser.parse()?
        };
        self.parse_count += 1;
        let idx = self.registry.commit(path, module.clone(), attributes, staging);
        Ok(&self.registry.tables[idx])
    }

    /// Size in bytes of a registered or native type.
    pub fn size_of(&self, type_name: &str) -> TypeResult<usize> {
        layout::size_of(type_name, &self.scope())
    }

    /// Alignment in bytes of a registered or native type.
    pub fn align_of(&self, type_name: &str) -> TypeResult<usize> {
        layout::align_of(type_name, &self.scope())
    }

    /// Binds a registered struct, union, or enum definition to a target
    /// address. No memory is read until a field is accessed.
    pub fn create_instance(&self, type_name: &str, address: u64) -> TypeResult<Instance<'_>> {
        match self.scope().resolve(type_name)? {
            Resolved::Synthetic(def) => {
                let (module, attrs) = self.context_for(&def.name);
                Instance::new(self, def, module, attrs, address)
            }
            _ => Err(TypeError::UnknownType(type_name.to_string())),
        }
    }

    /// Binds a definition obtained from the registry to a target address.
    /// Equivalent to [`Session::create_instance`] with the definition's name.
    pub fn make(&self, def: &TypeDefinition, address: u64) -> TypeResult<Instance<'_>> {
        self.create_instance(&def.name, address)
    }

    pub(crate) fn scope(&self) -> TypeScope<'_> {
        TypeScope {
            arch: &self.arch,
            module: &self.fallback_module,
            natives: self.natives.as_ref(),
            registry: &self.registry,
            staging: None,
        }
    }

    /// Module and attributes of the table that declared `type_name`.
    pub(crate) fn context_for(&self, type_name: &str) -> (&ModuleId, &SessionAttributes) {
        match self.registry.owners.get(type_name) {
            Some(&idx) => {
                let table = &self.registry.tables[idx];
                (&table.module, &table.attributes)
            }
            None => (&self.fallback_module, &self.default_attributes),
        }
    }
}
