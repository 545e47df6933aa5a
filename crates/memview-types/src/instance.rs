//! Lazy materialization of typed values from target memory.
//!
//! An [`Instance`] binds a registered definition to an address. Building
//! one computes field addresses and bitfield positions from metadata
//! alone; target memory is only touched when a field is read, and every
//! read goes back to the target rather than a cache, so a watched
//! structure always reflects current memory.

use std::fmt;

use indexmap::IndexMap;
use memview_core::{ArchInfo, MemoryReader, ModuleId, NativeKind, NativeTypeInfo};

use crate::error::{TypeError, TypeResult};
use crate::layout::{self, Resolved, TypeScope};
use crate::registry::{Session, SessionAttributes};
use crate::types::{FieldSpec, TypeDefinition, TypeKind, ENUM_BASE_SIZE};

/// Member names that never participate in anonymous-member flattening;
/// the debugger reserves them for its own bookkeeping views.
const RESERVED_FIELD_NAMES: &[&str] = &["targetLocation", "targetSize"];

/// Resolved placement of one accessible member.
#[derive(Debug, Clone)]
struct Slot {
    address: u64,
    field: FieldSpec,
    /// First bit within the storage unit, for bitfield members.
    starting_bit: u32,
    /// Size of the shared storage unit, for bitfield members.
    storage_size: usize,
}

/// A typed view of target memory at a fixed address.
#[derive(Clone)]
pub struct Instance<'s> {
    session: &'s Session,
    def: &'s TypeDefinition,
    module: &'s ModuleId,
    attrs: &'s SessionAttributes,
    address: u64,
    slots: IndexMap<String, Slot>,
}

/// A value read out of target memory.
#[derive(Debug, Clone)]
pub enum Value<'s> {
    Int(i64),
    UInt(u64),
    Float(f64),
    /// A nested struct or union view; reading it triggered no memory
    /// access of its own.
    Struct(Instance<'s>),
    Array(Vec<Value<'s>>),
    /// Enum read with `return_enums_as_objects` set.
    Enum(EnumValue<'s>),
    /// An address whose pointee type is unregistered, `void`, or
    /// otherwise not decodable.
    Opaque { address: u64, pointer_depth: u32 },
}

/// An enum value paired with its definition so the enumerant name can be
/// recovered.
#[derive(Debug, Clone, Copy)]
pub struct EnumValue<'s> {
    def: &'s TypeDefinition,
    value: i32,
}

impl<'s> EnumValue<'s> {
    pub fn value(&self) -> i32 {
        self.value
    }

    pub fn type_name(&self) -> &'s str {
        &self.def.name
    }

    /// Name of the first enumerant with this value, if any.
    pub fn name(&self) -> Option<&'s str> {
        self.def.enum_name(self.value as i64)
    }
}

impl<'s> Value<'s> {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => Some(*v as i64),
            Value::Enum(e) => Some(e.value() as i64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(v) => Some(*v as u64),
            Value::UInt(v) => Some(*v),
            Value::Opaque { address, .. } => Some(*address),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Instance<'s>> {
        match self {
            Value::Struct(inst) => Some(inst),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value<'s>]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl<'s> Instance<'s> {
    pub(crate) fn new(
        session: &'s Session,
        def: &'s TypeDefinition,
        module: &'s ModuleId,
        attrs: &'s SessionAttributes,
        address: u64,
    ) -> TypeResult<Self> {
        let scope = TypeScope {
            arch: session.arch(),
            module,
            natives: session.natives(),
            registry: session.registry(),
            staging: None,
        };
        let slots = build_slots(def, address, &scope)?;
        Ok(Self {
            session,
            def,
            module,
            attrs,
            address,
            slots,
        })
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn type_name(&self) -> &'s str {
        &self.def.name
    }

    pub fn definition(&self) -> &'s TypeDefinition {
        self.def
    }

    /// Accessible member names, flattened anonymous members included.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Target address of a member, without reading it.
    pub fn field_address(&self, name: &str) -> Option<u64> {
        self.slots.get(name).map(|s| s.address)
    }

    /// Starting bit of a bitfield member within its storage unit.
    pub fn field_bit_offset(&self, name: &str) -> Option<u32> {
        let slot = self.slots.get(name)?;
        slot.field.bit_length.map(|_| slot.starting_bit)
    }

    /// Reads one member from target memory.
    pub fn get(&self, name: &str) -> TypeResult<Value<'s>> {
        let slot = self.slots.get(name).ok_or_else(|| {
            TypeError::UnknownType(format!("{}.{}", self.def.name, name))
        })?;
        self.read_slot(slot)
    }

    fn scope(&self) -> TypeScope<'s> {
        TypeScope {
            arch: self.session.arch(),
            module: self.module,
            natives: self.session.natives(),
            registry: self.session.registry(),
            staging: None,
        }
    }

    fn read_slot(&self, slot: &Slot) -> TypeResult<Value<'s>> {
        let field = &slot.field;
        if let Some(bits) = field.bit_length {
            let raw = read_uint(
                self.session.memory(),
                slot.address,
                slot.storage_size,
                self.session.arch(),
            )?;
            let mask = if bits >= 64 {
                u64::MAX
            } else {
                (1u64 << bits) - 1
            };
            return Ok(Value::UInt((raw >> slot.starting_bit) & mask));
        }
        if field.pointer_depth > 0 {
            // One target read per level of indirection.
            let mut target = slot.address;
            for _ in 0..field.pointer_depth {
                target = self
                    .session
                    .memory()
                    .read_pointer(target, self.session.arch())?;
            }
            return self.pointee_at(&field.type_name, target, field.pointer_depth);
        }
        if let Some(len) = field.array_length {
            // field_size bounds len * element size, so the allocation is sane.
            let total = layout::field_size(field, &self.scope())?;
            let elem_size = (total / len.max(1)) as u64;
            let mut items = Vec::with_capacity(len);
            for i in 0..len {
                items.push(self.value_at(&field.type_name, slot.address + i as u64 * elem_size)?);
            }
            return Ok(Value::Array(items));
        }
        self.value_at(&field.type_name, slot.address)
    }

    /// Decodes a value of the named type directly at `address`.
    fn value_at(&self, type_name: &str, address: u64) -> TypeResult<Value<'s>> {
        match self.scope().resolve(type_name)? {
            Resolved::Synthetic(def) => match def.kind {
                TypeKind::Enum => self.read_enum(def, address),
                _ => Ok(Value::Struct(Instance::new(
                    self.session,
                    def,
                    self.module,
                    self.attrs,
                    address,
                )?)),
            },
            Resolved::Native(info) => self.read_native(info, address),
            Resolved::Pointer { pointee, depth } => {
                let mut target = address;
                for _ in 0..depth {
                    target = self
                        .session
                        .memory()
                        .read_pointer(target, self.session.arch())?;
                }
                self.pointee_at(&pointee, target, depth)
            }
            Resolved::Unknown => Err(TypeError::UnknownType(type_name.to_string())),
        }
    }

    /// Decodes what a chased pointer lands on. Unregistered, `void`, and
    /// multiply-indirect pointees become opaque handles instead of
    /// errors, so pointer fields into foreign structures stay usable.
    fn pointee_at(&self, pointee: &str, address: u64, depth: u32) -> TypeResult<Value<'s>> {
        match self.scope().resolve(pointee)? {
            Resolved::Synthetic(def) => match def.kind {
                TypeKind::Enum => self.read_enum(def, address),
                _ => Ok(Value::Struct(Instance::new(
                    self.session,
                    def,
                    self.module,
                    self.attrs,
                    address,
                )?)),
            },
            Resolved::Native(info) if info.size > 0 && info.size <= 8 => {
                self.read_native(info, address)
            }
            _ => Ok(Value::Opaque {
                address,
                pointer_depth: depth,
            }),
        }
    }

    fn read_native(&self, info: NativeTypeInfo, address: u64) -> TypeResult<Value<'s>> {
        let memory = self.session.memory();
        let arch = self.session.arch();
        match info.kind {
            NativeKind::Int { signed } => {
                if info.size == 0 || info.size > 8 {
                    return Ok(Value::Opaque {
                        address,
                        pointer_depth: 0,
                    });
                }
                let raw = read_uint(memory, address, info.size, arch)?;
                if signed {
                    Ok(Value::Int(sign_extend(raw, info.size)))
                } else {
                    Ok(Value::UInt(raw))
                }
            }
            NativeKind::Float => match info.size {
                4 => {
                    let raw = read_uint(memory, address, 4, arch)?;
                    Ok(Value::Float(f32::from_bits(raw as u32) as f64))
                }
                8 => {
                    let raw = read_uint(memory, address, 8, arch)?;
                    Ok(Value::Float(f64::from_bits(raw)))
                }
                _ => Ok(Value::Opaque {
                    address,
                    pointer_depth: 0,
                }),
            },
            NativeKind::Pointer => Ok(Value::UInt(memory.read_pointer(address, arch)?)),
            NativeKind::Udt | NativeKind::Enum => Ok(Value::Opaque {
                address,
                pointer_depth: 0,
            }),
        }
    }

    fn read_enum(&self, def: &'s TypeDefinition, address: u64) -> TypeResult<Value<'s>> {
        let raw = read_uint(
            self.session.memory(),
            address,
            ENUM_BASE_SIZE,
            self.session.arch(),
        )?;
        let value = raw as u32 as i32;
        if self.attrs.return_enums_as_objects {
            Ok(Value::Enum(EnumValue { def, value }))
        } else {
            Ok(Value::Int(value as i64))
        }
    }
}

impl fmt::Debug for Instance<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.def.name)
            .field("address", &format_args!("{:#x}", self.address))
            .field("fields", &self.slots.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Places every accessible member of `def` relative to `base`, merging
/// in the members of anonymous embedded structs/unions. On a name
/// collision the earlier member wins; reserved names never merge.
fn build_slots<'a>(
    def: &TypeDefinition,
    base: u64,
    scope: &TypeScope<'a>,
) -> TypeResult<IndexMap<String, Slot>> {
    let is_union = def.kind == TypeKind::Union;
    let mut slots = IndexMap::new();
    let mut addr = base;
    let mut cur_bit: u32 = 0;
    let mut storage: usize = 0;

    for field in &def.fields {
        if is_union {
            addr = base;
            cur_bit = 0;
            storage = 0;
        }
        if let Some(bits) = field.bit_length {
            if storage == 0 {
                let align = layout::field_align(field, scope)? as u64;
                addr = round_up_addr(addr, align);
                storage = layout::size_of(&field.type_name, scope)?;
            }
            let starting_bit = cur_bit;
            if let Some(name) = &field.name {
                slots.entry(name.clone()).or_insert(Slot {
                    address: addr,
                    field: field.clone(),
                    starting_bit,
                    storage_size: storage,
                });
            }
            cur_bit += bits;
            if storage > 0 && cur_bit as usize >= storage * 8 {
                if !is_union {
                    addr += storage as u64;
                }
                cur_bit = 0;
                storage = 0;
            }
        } else {
            // A non-bitfield closes any open storage unit.
            if storage > 0 && !is_union {
                addr += storage as u64;
            }
            cur_bit = 0;
            storage = 0;
            let align = layout::field_align(field, scope)? as u64;
            addr = round_up_addr(addr, align);
            if field.embedded {
                let Resolved::Synthetic(child) = scope.resolve(&field.type_name)? else {
                    return Err(TypeError::UnknownType(field.type_name.clone()));
                };
                for (name, slot) in build_slots(child, addr, scope)? {
                    if RESERVED_FIELD_NAMES.contains(&name.as_str()) {
                        continue;
                    }
                    slots.entry(name).or_insert(slot);
                }
            } else if let Some(name) = &field.name {
                slots.entry(name.clone()).or_insert(Slot {
                    address: addr,
                    field: field.clone(),
                    starting_bit: 0,
                    storage_size: 0,
                });
            }
            if !is_union {
                addr += layout::field_size(field, scope)? as u64;
            }
        }
    }
    Ok(slots)
}

fn round_up_addr(addr: u64, align: u64) -> u64 {
    if align <= 1 {
        return addr;
    }
    addr.div_ceil(align) * align
}

fn read_uint(
    memory: &dyn MemoryReader,
    address: u64,
    size: usize,
    arch: &ArchInfo,
) -> TypeResult<u64> {
    let bytes = memory.read_bytes(address, size)?;
    let mut value = 0u64;
    if arch.big_endian {
        for b in &bytes {
            value = (value << 8) | u64::from(*b);
        }
    } else {
        for b in bytes.iter().rev() {
            value = (value << 8) | u64::from(*b);
        }
    }
    Ok(value)
}

fn sign_extend(raw: u64, size: usize) -> i64 {
    if size >= 8 {
        return raw as i64;
    }
    let shift = 64 - size as u32 * 8;
    ((raw << shift) as i64) >> shift
}
