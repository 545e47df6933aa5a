//! Property-based tests for the header reader.
//!
//! These tests verify that header parsing handles arbitrary input safely,
//! is deterministic, and that computed layouts obey the ABI invariants.

use proptest::prelude::*;

use memview_core::{ArchInfo, HostTypes, ModuleId, SliceMemory};
use memview_types::{Session, SessionAttributes};

fn session(arch: ArchInfo) -> Session {
    Session::new(
        arch,
        Box::new(SliceMemory::new(0x1000, vec![0u8; 4096])),
        Box::new(HostTypes::new(arch)),
    )
}

fn module() -> ModuleId {
    ModuleId::new("proptest", 0x400000)
}

// =============================================================================
// Parser Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    /// Reading arbitrary text never panics; errors are fine.
    #[test]
    fn read_header_never_panics(text in "\\PC{0,400}") {
        let mut s = session(ArchInfo::lp64());
        let _ = s.read_header_source(&text, "fuzz.h", &module(), SessionAttributes::default());
    }

    /// Arbitrary byte soup built from header-ish fragments never panics.
    #[test]
    fn header_fragments_never_panic(
        parts in prop::collection::vec(
            prop_oneof![
                Just("struct"), Just("union"), Just("enum"), Just("typedef"),
                Just("{"), Just("}"), Just(";"), Just(","), Just("*"),
                Just("["), Just("]"), Just(":"), Just("="),
                Just("int"), Just("char"), Just("unsigned"), Just("long"),
                Just("#define X 1"), Just("#if X"), Just("#else"), Just("#endif"),
                Just("#ifdef Y"), Just("name"), Just("7"), Just("0x1f"),
                Just("sizeof"), Just("("), Just(")"), Just("\n"),
            ],
            0..60,
        )
    ) {
        let text = parts.join(" ");
        let mut s = session(ArchInfo::lp64());
        let _ = s.read_header_source(&text, "frag.h", &module(), SessionAttributes::default());
    }

    /// Parsing the same text twice into fresh sessions gives the same
    /// outcome: same registered names or an error both times.
    #[test]
    fn read_header_is_deterministic(text in "\\PC{0,300}") {
        let mut s1 = session(ArchInfo::lp64());
        let mut s2 = session(ArchInfo::lp64());
        let m = module();
        let r1 = s1
            .read_header_source(&text, "d.h", &m, SessionAttributes::default())
            .map(|t| t.type_names().to_vec());
        let r2 = s2
            .read_header_source(&text, "d.h", &m, SessionAttributes::default())
            .map(|t| t.type_names().to_vec());
        match (r1, r2) {
            (Ok(n1), Ok(n2)) => prop_assert_eq!(n1, n2),
            (Err(_), Err(_)) => {}
            _ => prop_assert!(false, "parse outcome should be deterministic"),
        }
    }

    /// A failed header read must leave the registry untouched.
    #[test]
    fn failed_reads_register_nothing(text in "\\PC{0,300}") {
        let mut s = session(ArchInfo::lp64());
        let result = s
            .read_header_source(&text, "x.h", &module(), SessionAttributes::default())
            .map(|_| ());
        if result.is_err() {
            prop_assert_eq!(s.stats().type_count, 0);
            prop_assert_eq!(s.stats().table_count, 0);
        }
    }
}

// =============================================================================
// Layout Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Struct size is always a non-zero multiple of struct alignment.
    #[test]
    fn size_is_multiple_of_alignment(
        types in prop::collection::vec(
            prop_oneof![
                Just("char"), Just("short"), Just("int"), Just("long"),
                Just("long long"), Just("float"), Just("double"), Just("void *"),
            ],
            1..8,
        )
    ) {
        let fields: String = types
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{t} f{i};"))
            .collect();
        let text = format!("struct G {{ {fields} }};");
        for arch in [ArchInfo::lp64(), ArchInfo::llp64(), ArchInfo::ilp32()] {
            let mut s = session(arch);
            s.read_header_source(&text, "g.h", &module(), SessionAttributes::default())
                .unwrap();
            let size = s.size_of("G").unwrap();
            let align = s.align_of("G").unwrap();
            prop_assert!(size > 0);
            prop_assert!(align > 0 && align <= arch.pointer_size);
            prop_assert_eq!(size % align, 0);
        }
    }

    /// A homogeneous int struct is exactly 4 bytes per field.
    #[test]
    fn int_struct_size_is_exact(n in 1usize..24) {
        let fields: String = (0..n).map(|i| format!("int f{i};")).collect();
        let text = format!("struct H {{ {fields} }};");
        let mut s = session(ArchInfo::lp64());
        s.read_header_source(&text, "h.h", &module(), SessionAttributes::default())
            .unwrap();
        prop_assert_eq!(s.size_of("H").unwrap(), 4 * n);
    }

    /// Bitfields over one int never grow the struct past one storage
    /// unit as long as the widths fit.
    #[test]
    fn packed_bitfields_stay_in_one_unit(widths in prop::collection::vec(1u32..8, 1..4)) {
        let total: u32 = widths.iter().sum();
        prop_assume!(total <= 32);
        let fields: String = widths
            .iter()
            .enumerate()
            .map(|(i, w)| format!("unsigned b{i} : {w};"))
            .collect();
        let text = format!("struct W {{ {fields} }};");
        let mut s = session(ArchInfo::lp64());
        s.read_header_source(&text, "w.h", &module(), SessionAttributes::default())
            .unwrap();
        prop_assert_eq!(s.size_of("W").unwrap(), 4);
    }

    /// Union size equals its largest member's size, rounded to alignment.
    #[test]
    fn union_is_as_big_as_its_biggest_member(n_ints in 1usize..6, n_chars in 1usize..12) {
        let text = format!(
            "union M {{ int a[{n_ints}]; char b[{n_chars}]; }};"
        );
        let mut s = session(ArchInfo::lp64());
        s.read_header_source(&text, "m.h", &module(), SessionAttributes::default())
            .unwrap();
        let expected = (4 * n_ints).max(n_chars).div_ceil(4) * 4;
        prop_assert_eq!(s.size_of("M").unwrap(), expected);
    }

    /// Instance field addresses stay inside [address, address + size).
    #[test]
    fn field_addresses_stay_in_bounds(
        types in prop::collection::vec(
            prop_oneof![Just("char"), Just("short"), Just("int"), Just("double")],
            1..6,
        )
    ) {
        let fields: String = types
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{t} f{i};"))
            .collect();
        let text = format!("struct B {{ {fields} }};");
        let mut s = session(ArchInfo::lp64());
        s.read_header_source(&text, "b.h", &module(), SessionAttributes::default())
            .unwrap();
        let size = s.size_of("B").unwrap() as u64;
        let inst = s.create_instance("B", 0x1000).unwrap();
        for i in 0..types.len() {
            let addr = inst.field_address(&format!("f{i}")).unwrap();
            prop_assert!(addr >= 0x1000);
            prop_assert!(addr < 0x1000 + size);
        }
    }
}

// =============================================================================
// Expression Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// Constant expressions in array lengths evaluate without panicking,
    /// and accepted lengths are reflected in the layout.
    #[test]
    fn array_length_expressions_are_safe(a in 0i64..64, b in 1i64..8) {
        let text = format!("struct E {{ char buf[{a} * {b} + 1]; }};");
        let mut s = session(ArchInfo::lp64());
        s.read_header_source(&text, "e.h", &module(), SessionAttributes::default())
            .unwrap();
        prop_assert_eq!(s.size_of("E").unwrap() as i64, a * b + 1);
    }

    /// Macro-heavy headers terminate even with mutually recursive
    /// definitions.
    #[test]
    fn macro_substitution_terminates(
        names in prop::collection::vec("[A-D]{1,3}", 1..5),
    ) {
        let defines: String = names
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let next = &names[(i + 1) % names.len()];
                format!("#define {n} {next}\n")
            })
            .collect();
        let text = format!("{defines}struct T {{ int v; }};");
        let mut s = session(ArchInfo::lp64());
        let _ = s.read_header_source(&text, "t.h", &module(), SessionAttributes::default());
    }
}
