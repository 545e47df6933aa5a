#![no_main]

use libfuzzer_sys::fuzz_target;
use memview_core::{ArchInfo, HostTypes, ModuleId, SliceMemory};
use memview_types::{Session, SessionAttributes};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else { return };

    // Parse arbitrary text as a header - should never panic
    let arch = ArchInfo::lp64();
    let mut session = Session::new(
        arch,
        Box::new(SliceMemory::new(0x1000, vec![0u8; 512])),
        Box::new(HostTypes::new(arch)),
    );
    let module = ModuleId::new("fuzz", 0x400000);
    let names = match session.read_header_source(
        text,
        "fuzz.h",
        &module,
        SessionAttributes::default(),
    ) {
        Ok(table) => table.type_names().to_vec(),
        Err(_) => return,
    };

    // If parsing succeeds, exercise layout and materialization
    for name in &names {
        let _ = session.size_of(name);
        let _ = session.align_of(name);
        if let Ok(instance) = session.create_instance(name, 0x1000) {
            let fields: Vec<String> = instance.field_names().map(str::to_string).collect();
            for field in &fields {
                let _ = instance.field_address(field);
                let _ = instance.field_bit_offset(field);
                let _ = instance.get(field);
            }
        }
    }
});
