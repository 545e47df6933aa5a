//! C ABI layout computation for synthetic and native types.
//!
//! Sizes and alignments follow the natural-alignment model: every scalar
//! aligns to its own size, capped at the pointer width of the target
//! architecture. Struct size is the sum of its field contributions rounded
//! up to the struct alignment; union size is the largest contribution.
//! Adjacent bitfields share a storage unit until the declared widths
//! exhaust it.

use std::collections::HashMap;

use indexmap::IndexMap;
use memview_core::{ArchInfo, ModuleId, NativeTypes};

use crate::error::{TypeError, TypeResult};
use crate::expr::EvalScope;
use crate::parser::remap_platform_name;
use crate::registry::Registry;
use crate::types::{FieldSpec, TypeDefinition, TypeKind, ENUM_BASE_SIZE};

/// Alias chains and layout recursion deeper than this are rejected.
const RESOLVE_LIMIT: usize = 64;

/// Computed sizes above this are rejected rather than laid out.
const SIZE_LIMIT: u64 = 1 << 48;

/// Computed size and alignment of a type, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub size: usize,
    pub align: usize,
}

/// Name-resolution context for layout and expression evaluation.
///
/// Lookups consult the in-progress staging table (when a header is being
/// parsed) before the committed registry, so a header can reference the
/// types it declared earlier in the same file.
pub struct TypeScope<'a> {
    pub arch: &'a ArchInfo,
    pub module: &'a ModuleId,
    pub natives: &'a dyn NativeTypes,
    pub registry: &'a Registry,
    pub staging: Option<&'a IndexMap<String, TypeDefinition>>,
}

/// What a type name resolves to after chasing aliases and platform remaps.
pub(crate) enum Resolved<'a> {
    /// A registered struct, union, or enum definition.
    Synthetic(&'a TypeDefinition),
    /// A scalar known to the debug target, with its reported size/alignment.
    Native(memview_core::NativeTypeInfo),
    /// An alias chain that accumulated pointer depth; the payload is the
    /// final pointee name and the total depth.
    Pointer { pointee: String, depth: u32 },
    /// Nothing known under this name.
    Unknown,
}

impl<'a> TypeScope<'a> {
    /// Looks up a definition by name, staging table first.
    pub(crate) fn definition(&self, name: &str) -> Option<&'a TypeDefinition> {
        if let Some(staging) = self.staging {
            if let Some(def) = staging.get(name) {
                return Some(def);
            }
        }
        self.registry.definition(name)
    }

    /// Chases typedef aliases and platform-name remaps until the name
    /// settles on a definition, a native scalar, or nothing.
    pub(crate) fn resolve(&self, name: &str) -> TypeResult<Resolved<'a>> {
        let mut current = name.to_string();
        let mut depth: u32 = 0;
        for _ in 0..RESOLVE_LIMIT {
            if let Some(def) = self.definition(&current) {
                if def.kind == TypeKind::Alias {
                    let target = def
                        .alias
                        .as_ref()
                        .ok_or_else(|| TypeError::UnknownType(current.clone()))?;
                    depth += target.pointer_depth;
                    current = target.target.clone();
                    continue;
                }
                if depth > 0 {
                    return Ok(Resolved::Pointer { pointee: current, depth });
                }
                return Ok(Resolved::Synthetic(def));
            }
            if let Some((mapped, extra)) = remap_platform_name(&current) {
                depth += extra;
                current = mapped.to_string();
                continue;
            }
            if depth > 0 {
                return Ok(Resolved::Pointer { pointee: current, depth });
            }
            if let Some(info) = self.natives.type_info(self.module, &current) {
                return Ok(Resolved::Native(info));
            }
            return Ok(Resolved::Unknown);
        }
        Err(TypeError::UnknownType(format!("alias cycle through `{name}`")))
    }
}

impl EvalScope for TypeScope<'_> {
    fn enum_value(&self, name: &str) -> Option<i64> {
        if let Some(staging) = self.staging {
            for def in staging.values() {
                if let Some(v) = def.enum_value(name) {
                    return Some(v);
                }
            }
        }
        self.registry.enum_value(name)
    }

    fn size_of(&self, type_name: &str, pointer_depth: u32) -> TypeResult<usize> {
        if pointer_depth > 0 {
            return Ok(self.arch.pointer_size);
        }
        size_of(type_name, self)
    }

    fn is_defined(&self, _name: &str) -> bool {
        // Macro definedness is a preprocessor concern; type-level
        // expressions (array lengths, enumerant values) never see macros
        // that survived preprocessing.
        false
    }
}

pub fn round_up(value: usize, align: usize) -> usize {
    if align <= 1 {
        return value;
    }
    value.div_ceil(align) * align
}

/// Size in bytes of the named type.
pub fn size_of(name: &str, scope: &TypeScope) -> TypeResult<usize> {
    Ok(layout_of(name, scope)?.size)
}

/// Alignment in bytes of the named type, capped at the pointer width.
pub fn align_of(name: &str, scope: &TypeScope) -> TypeResult<usize> {
    Ok(layout_of(name, scope)?.align)
}

/// Full layout of the named type.
///
/// Layouts of committed types are memoized in the registry; types still
/// in a staging table are computed fresh each time, since the table can
/// grow between calls.
pub fn layout_of(name: &str, scope: &TypeScope) -> TypeResult<Layout> {
    let mut memo = HashMap::new();
    layout_inner(name, scope, &mut memo, 0)
}

fn layout_inner(
    name: &str,
    scope: &TypeScope,
    memo: &mut HashMap<String, Layout>,
    rec: usize,
) -> TypeResult<Layout> {
    if rec > RESOLVE_LIMIT {
        return Err(TypeError::UnknownType(format!(
            "recursive layout through `{name}`"
        )));
    }
    match scope.resolve(name)? {
        Resolved::Pointer { .. } => Ok(Layout {
            size: scope.arch.pointer_size,
            align: scope.arch.pointer_size,
        }),
        Resolved::Native(info) => Ok(Layout {
            size: info.size,
            align: scope.arch.cap_align(info.align.max(1)),
        }),
        Resolved::Synthetic(def) => {
            if let Some(hit) = memo.get(&def.name) {
                return Ok(*hit);
            }
            let from_staging = scope
                .staging
                .is_some_and(|s| s.contains_key(&def.name));
            if !from_staging {
                if let Some(hit) = scope.registry.cached_layout(&def.name) {
                    return Ok(hit);
                }
            }
            let layout = match def.kind {
                TypeKind::Enum => Layout {
                    size: ENUM_BASE_SIZE,
                    align: scope.arch.cap_align(ENUM_BASE_SIZE),
                },
                TypeKind::Struct | TypeKind::Union => {
                    udt_layout(def, scope, memo, rec)?
                }
                TypeKind::Alias => unreachable!("resolve chases aliases"),
            };
            memo.insert(def.name.clone(), layout);
            if !from_staging {
                scope.registry.store_layout(&def.name, layout);
            }
            Ok(layout)
        }
        Resolved::Unknown => Err(TypeError::UnknownType(name.to_string())),
    }
}

fn udt_layout(
    def: &TypeDefinition,
    scope: &TypeScope,
    memo: &mut HashMap<String, Layout>,
    rec: usize,
) -> TypeResult<Layout> {
    let is_union = def.kind == TypeKind::Union;
    let mut total = 0usize;
    let mut max_align = 1usize;

    // Bitfield storage-unit cursor. A unit opens when a bitfield follows
    // a non-bitfield (or overflows the previous unit) and contributes its
    // declared type's full size; continuations contribute nothing.
    let mut cur_bit = 0usize;
    let mut storage = 0usize;

    for field in &def.fields {
        let contribution;
        if let Some(bits) = field.bit_length {
            if storage == 0 {
                storage = field_type_size(field, scope, memo, rec)?;
                contribution = storage;
            } else {
                contribution = 0;
            }
            cur_bit += bits as usize;
            if storage > 0 && cur_bit >= storage * 8 {
                cur_bit = 0;
                storage = 0;
            }
        } else {
            cur_bit = 0;
            storage = 0;
            contribution = field_size_inner(field, scope, memo, rec)?;
        }
        max_align = max_align.max(field_align_inner(field, scope, memo, rec)?);
        if is_union {
            total = total.max(contribution);
        } else {
            total = total
                .checked_add(contribution)
                .filter(|&n| n as u64 <= SIZE_LIMIT)
                .ok_or_else(|| TypeError::TooLarge(def.name.clone()))?;
        }
    }

    let align = scope.arch.cap_align(max_align);
    Ok(Layout {
        size: round_up(total, align),
        align,
    })
}

/// Size one field contributes to a struct, ignoring bitfield packing.
pub fn field_size(field: &FieldSpec, scope: &TypeScope) -> TypeResult<usize> {
    let mut memo = HashMap::new();
    field_size_inner(field, scope, &mut memo, 0)
}

fn field_size_inner(
    field: &FieldSpec,
    scope: &TypeScope,
    memo: &mut HashMap<String, Layout>,
    rec: usize,
) -> TypeResult<usize> {
    if field.pointer_depth > 0 {
        return Ok(scope.arch.pointer_size);
    }
    let elem = field_type_size(field, scope, memo, rec)?;
    match field.array_length {
        Some(len) => elem
            .checked_mul(len)
            .filter(|&n| n as u64 <= SIZE_LIMIT)
            .ok_or_else(|| TypeError::TooLarge(field.type_name.clone())),
        None => Ok(elem),
    }
}

fn field_type_size(
    field: &FieldSpec,
    scope: &TypeScope,
    memo: &mut HashMap<String, Layout>,
    rec: usize,
) -> TypeResult<usize> {
    Ok(layout_inner(&field.type_name, scope, memo, rec + 1)?.size)
}

/// Alignment requirement a field imposes on its enclosing struct.
pub fn field_align(field: &FieldSpec, scope: &TypeScope) -> TypeResult<usize> {
    let mut memo = HashMap::new();
    field_align_inner(field, scope, &mut memo, 0)
}

fn field_align_inner(
    field: &FieldSpec,
    scope: &TypeScope,
    memo: &mut HashMap<String, Layout>,
    rec: usize,
) -> TypeResult<usize> {
    if field.pointer_depth > 0 {
        return Ok(scope.arch.pointer_size);
    }
    // Arrays and bitfields align as their element / declared type.
    Ok(layout_inner(&field.type_name, scope, memo, rec + 1)?.align)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memview_core::HostTypes;

    fn scope_over<'a>(
        arch: &'a ArchInfo,
        module: &'a ModuleId,
        natives: &'a HostTypes,
        registry: &'a Registry,
    ) -> TypeScope<'a> {
        TypeScope {
            arch,
            module,
            natives,
            registry,
            staging: None,
        }
    }

    fn fixture(defs: Vec<TypeDefinition>) -> (ArchInfo, ModuleId, HostTypes, Registry) {
        let arch = ArchInfo::lp64();
        let module = ModuleId::new("test", 0);
        let natives = HostTypes::new(arch);
        let mut registry = Registry::new();
        for def in defs {
            registry.insert_for_test(def);
        }
        (arch, module, natives, registry)
    }

    #[test]
    fn native_scalar_sizes() {
        let (arch, module, natives, registry) = fixture(vec![]);
        let scope = scope_over(&arch, &module, &natives, &registry);
        assert_eq!(size_of("char", &scope).unwrap(), 1);
        assert_eq!(size_of("int", &scope).unwrap(), 4);
        assert_eq!(size_of("unsigned long long", &scope).unwrap(), 8);
        assert_eq!(size_of("double", &scope).unwrap(), 8);
        assert_eq!(align_of("double", &scope).unwrap(), 8);
    }

    #[test]
    fn long_differs_by_data_model() {
        let module = ModuleId::new("test", 0);
        let registry = Registry::new();

        let lp64 = ArchInfo::lp64();
        let natives = HostTypes::new(lp64);
        let scope = scope_over(&lp64, &module, &natives, &registry);
        assert_eq!(size_of("long", &scope).unwrap(), 8);

        let llp64 = ArchInfo::llp64();
        let natives = HostTypes::new(llp64);
        let scope = scope_over(&llp64, &module, &natives, &registry);
        assert_eq!(size_of("long", &scope).unwrap(), 4);
    }

    #[test]
    fn struct_sum_rounded_to_alignment() {
        let mut def = TypeDefinition::new_struct("S");
        def.fields.push(FieldSpec::scalar("char", true, Some("c".into())));
        def.fields.push(FieldSpec::scalar("long long", true, Some("x".into())));
        let (arch, module, natives, registry) = fixture(vec![def]);
        let scope = scope_over(&arch, &module, &natives, &registry);
        // 1 + 8 = 9, rounded up to alignment 8.
        assert_eq!(size_of("S", &scope).unwrap(), 16);
        assert_eq!(align_of("S", &scope).unwrap(), 8);
    }

    #[test]
    fn union_takes_largest_member() {
        let mut def = TypeDefinition::new_union("U");
        def.fields.push(FieldSpec::scalar("char", true, Some("c".into())));
        def.fields.push(FieldSpec::scalar("long long", true, Some("x".into())));
        def.fields.push(FieldSpec::scalar("int", true, Some("i".into())));
        let (arch, module, natives, registry) = fixture(vec![def]);
        let scope = scope_over(&arch, &module, &natives, &registry);
        assert_eq!(size_of("U", &scope).unwrap(), 8);
        assert_eq!(align_of("U", &scope).unwrap(), 8);
    }

    #[test]
    fn oversized_array_is_an_error() {
        let mut def = TypeDefinition::new_struct("C");
        let mut f = FieldSpec::scalar("long long", true, Some("x".into()));
        f.array_length = Some(0x2000_0000_0000_0000);
        def.fields.push(f);
        let (arch, module, natives, registry) = fixture(vec![def]);
        let scope = scope_over(&arch, &module, &natives, &registry);
        assert!(matches!(size_of("C", &scope), Err(TypeError::TooLarge(_))));
    }

    #[test]
    fn oversized_struct_total_is_an_error() {
        // Each member is under the limit; the running sum is not.
        let mut def = TypeDefinition::new_struct("D");
        for name in ["a", "b"] {
            let mut f = FieldSpec::scalar("char", true, Some(name.into()));
            f.array_length = Some((1usize << 47) + 1);
            def.fields.push(f);
        }
        let (arch, module, natives, registry) = fixture(vec![def]);
        let scope = scope_over(&arch, &module, &natives, &registry);
        assert!(matches!(size_of("D", &scope), Err(TypeError::TooLarge(_))));
    }

    #[test]
    fn enum_has_fixed_base_size() {
        let def = TypeDefinition::new_enum("Color");
        let (arch, module, natives, registry) = fixture(vec![def]);
        let scope = scope_over(&arch, &module, &natives, &registry);
        assert_eq!(size_of("Color", &scope).unwrap(), 4);
        assert_eq!(align_of("Color", &scope).unwrap(), 4);
    }

    #[test]
    fn pointer_fields_are_pointer_sized() {
        let mut def = TypeDefinition::new_struct("P");
        let mut f = FieldSpec::scalar("NoSuchType", false, Some("p".into()));
        f.pointer_depth = 2;
        def.fields.push(f);
        let (arch, module, natives, registry) = fixture(vec![def]);
        let scope = scope_over(&arch, &module, &natives, &registry);
        // Pointee never needs resolving.
        assert_eq!(size_of("P", &scope).unwrap(), 8);
    }

    #[test]
    fn array_is_element_size_times_length() {
        let mut def = TypeDefinition::new_struct("A");
        let mut f = FieldSpec::scalar("int", true, Some("v".into()));
        f.array_length = Some(10);
        def.fields.push(f);
        let (arch, module, natives, registry) = fixture(vec![def]);
        let scope = scope_over(&arch, &module, &natives, &registry);
        assert_eq!(size_of("A", &scope).unwrap(), 40);
        assert_eq!(align_of("A", &scope).unwrap(), 4);
    }

    #[test]
    fn bitfields_share_a_storage_unit() {
        let mut def = TypeDefinition::new_struct("B");
        for (name, bits) in [("a", 3u32), ("b", 5), ("c", 8)] {
            let mut f = FieldSpec::scalar("int", true, Some(name.into()));
            f.bit_length = Some(bits);
            def.fields.push(f);
        }
        let (arch, module, natives, registry) = fixture(vec![def]);
        let scope = scope_over(&arch, &module, &natives, &registry);
        // All 16 bits fit in one 4-byte unit.
        assert_eq!(size_of("B", &scope).unwrap(), 4);
    }

    #[test]
    fn bitfield_overflow_opens_new_unit() {
        let mut def = TypeDefinition::new_struct("B2");
        for (name, bits) in [("a", 30u32), ("b", 5)] {
            let mut f = FieldSpec::scalar("int", true, Some(name.into()));
            f.bit_length = Some(bits);
            def.fields.push(f);
        }
        let (arch, module, natives, registry) = fixture(vec![def]);
        let scope = scope_over(&arch, &module, &natives, &registry);
        // 30 bits fill past... 30 < 32 so unit stays open; +5 overflows,
        // but the second field was declared while the unit was open so it
        // contributes nothing; overflow closes the unit. One unit total,
        // then nothing follows.
        assert_eq!(size_of("B2", &scope).unwrap(), 4);
    }

    #[test]
    fn bitfield_then_nonbitfield() {
        let mut def = TypeDefinition::new_struct("B3");
        let mut f = FieldSpec::scalar("int", true, Some("flags".into()));
        f.bit_length = Some(3);
        def.fields.push(f);
        def.fields.push(FieldSpec::scalar("int", true, Some("after".into())));
        let (arch, module, natives, registry) = fixture(vec![def]);
        let scope = scope_over(&arch, &module, &natives, &registry);
        assert_eq!(size_of("B3", &scope).unwrap(), 8);
    }

    #[test]
    fn alias_chain_accumulates_pointer_depth() {
        let inner = TypeDefinition::new_struct("Inner");
        let alias = TypeDefinition::new_alias("PINNER", "Inner", 1);
        let alias2 = TypeDefinition::new_alias("PPINNER", "PINNER", 1);
        let (arch, module, natives, registry) = fixture(vec![inner, alias, alias2]);
        let scope = scope_over(&arch, &module, &natives, &registry);
        assert_eq!(size_of("PINNER", &scope).unwrap(), 8);
        assert_eq!(size_of("PPINNER", &scope).unwrap(), 8);
        match scope.resolve("PPINNER").unwrap() {
            Resolved::Pointer { pointee, depth } => {
                assert_eq!(pointee, "Inner");
                assert_eq!(depth, 2);
            }
            _ => panic!("expected pointer resolution"),
        }
    }

    #[test]
    fn platform_names_remap() {
        let (arch, module, natives, registry) = fixture(vec![]);
        let scope = scope_over(&arch, &module, &natives, &registry);
        // ULONG maps to `unsigned long` and tracks the data model;
        // DWORD stays a fixed 32-bit quantity.
        assert_eq!(size_of("ULONG", &scope).unwrap(), 8);
        assert_eq!(size_of("DWORD", &scope).unwrap(), 4);
        assert_eq!(size_of("PVOID", &scope).unwrap(), 8);
        assert_eq!(size_of("ULONG_PTR", &scope).unwrap(), 8);

        let llp64 = ArchInfo::llp64();
        let module = ModuleId::new("test", 0);
        let registry = Registry::new();
        let natives = HostTypes::new(llp64);
        let scope = scope_over(&llp64, &module, &natives, &registry);
        assert_eq!(size_of("ULONG", &scope).unwrap(), 4);
    }

    #[test]
    fn alignment_capped_at_pointer_width() {
        let module = ModuleId::new("test", 0);
        let registry = Registry::new();
        let ilp32 = ArchInfo::ilp32();
        let natives = HostTypes::new(ilp32);
        let scope = scope_over(&ilp32, &module, &natives, &registry);
        assert_eq!(size_of("double", &scope).unwrap(), 8);
        assert_eq!(align_of("double", &scope).unwrap(), 4);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let (arch, module, natives, registry) = fixture(vec![]);
        let scope = scope_over(&arch, &module, &natives, &registry);
        assert!(matches!(
            size_of("NoSuchThing", &scope),
            Err(TypeError::UnknownType(_))
        ));
    }

    #[test]
    fn nested_struct_contributes_its_layout() {
        let mut inner = TypeDefinition::new_struct("Inner");
        inner.fields.push(FieldSpec::scalar("long long", true, Some("x".into())));
        let mut outer = TypeDefinition::new_struct("Outer");
        outer.fields.push(FieldSpec::scalar("char", true, Some("c".into())));
        outer.fields.push(FieldSpec::scalar("Inner", false, Some("in".into())));
        let (arch, module, natives, registry) = fixture(vec![inner, outer]);
        let scope = scope_over(&arch, &module, &natives, &registry);
        // 1 + 8 = 9 rounded to 8-alignment.
        assert_eq!(size_of("Outer", &scope).unwrap(), 16);
        assert_eq!(align_of("Outer", &scope).unwrap(), 8);
    }
}
