#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use memview_core::{ArchInfo, HostTypes, ModuleId, SliceMemory};
use memview_types::{Session, SessionAttributes, Value};

/// Structured input: a header, a memory image, and an address to bind.
#[derive(Debug, Arbitrary)]
struct Input {
    header: String,
    memory: Vec<u8>,
    offset: u16,
    llp64: bool,
}

fuzz_target!(|input: Input| {
    let arch = if input.llp64 {
        ArchInfo::llp64()
    } else {
        ArchInfo::lp64()
    };
    let base = 0x1000u64;
    let mut session = Session::new(
        arch,
        Box::new(SliceMemory::new(base, input.memory)),
        Box::new(HostTypes::new(arch)),
    );
    let module = ModuleId::new("fuzz", 0);
    let names = match session.read_header_source(
        &input.header,
        "fuzz.h",
        &module,
        SessionAttributes::default(),
    ) {
        Ok(table) => table.type_names().to_vec(),
        Err(_) => return,
    };

    let address = base + u64::from(input.offset);
    for name in &names {
        let Ok(instance) = session.create_instance(name, address) else {
            continue;
        };
        let fields: Vec<String> = instance.field_names().map(str::to_string).collect();
        for field in &fields {
            match instance.get(field) {
                Ok(Value::Struct(inner)) => {
                    // One level of nesting is enough to shake out offsets
                    let _ = inner.field_names().count();
                }
                Ok(Value::Array(items)) => {
                    let _ = items.len();
                }
                Ok(_) | Err(_) => {}
            }
        }
    }
});
