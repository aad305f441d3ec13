use crate::common::{fixture, fixture_with};
use dlscope::{Demangler, ImageNumber, TypeMask};
use std::sync::Arc;

fn names(entries: &[dlscope::SymbolEntry<'_>]) -> Vec<String> {
    entries.iter().map(|e| e.name_str().into_owned()).collect()
}

#[test]
fn default_mask_yields_only_defined_entries() {
    let fx = fixture();
    let all = fx.process.all_images();
    let entries: Vec<_> = all.entries().collect();
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|e| e.is_defined()));
    let seen = names(&entries);
    assert!(!seen.iter().any(|n| n == "main.o" || n == "sys_debug"));
    assert!(!seen.iter().any(|n| n == "missing_target"));
}

#[test]
fn unfiltered_includes_undefined_and_debug_entries() {
    let fx = fixture();
    let main = fx.process.main_image().unfiltered();
    assert_eq!(main.mask(), TypeMask::unfiltered());
    let entries: Vec<_> = main.entries().collect();
    let missing = entries
        .iter()
        .find(|e| e.name == b"missing_target")
        .expect("undefined entry is listed");
    assert_eq!(missing.value, None);
    assert!(entries.iter().any(|e| e.name == b"main.o"));
    // stab, local, private external, two exports, three imports
    assert_eq!(entries.len(), 8);
}

#[test]
fn globals_hide_private_externals() {
    let fx = fixture();
    let main = fx.process.main_image();
    assert!(main.entry_named("app_hidden").is_some());
    assert!(main.globals().entry_named("app_hidden").is_none());
    assert!(main.globals().entry_named("app_entry").is_some());
}

#[test]
fn entries_run_in_load_order() {
    let fx = fixture();
    let all = fx.process.all_images();
    let images: Vec<ImageNumber> = all.entries().map(|e| e.image).collect();
    let mut sorted = images.clone();
    sorted.sort();
    assert_eq!(images, sorted);
    assert_eq!(images.first(), Some(&ImageNumber(0)));
    assert_eq!(images.last(), Some(&ImageNumber(2)));
}

#[test]
fn prefix_filter_is_a_subset() {
    let fx = fixture();
    let all = fx.process.all_images();
    let everything = names(&all.entries().collect::<Vec<_>>());
    let sys = names(&all.entries_with_prefix("sys_"));
    assert_eq!(sys, vec!["sys_helper", "sys_open", "sys_close"]);
    assert!(sys.iter().all(|n| everything.contains(n)));
    assert_eq!(names(&all.entries_with_prefix("")), everything);
    assert!(all.entries_with_prefix("no_such_prefix").is_empty());
}

#[test]
fn lookup_and_reverse_round_trip() {
    let fx = fixture();
    let main = fx.process.main_image();
    for (name, offset) in &fx.app.exports {
        let address = main.lookup(name).expect("exported by the executable");
        assert_eq!(address, fx.headers[1] + *offset as usize);
        let info = main.reverse_lookup(address).expect("address is in the set");
        assert_eq!(info.name, *name);
        assert_eq!(info.address, address);
        assert_eq!(info.image.image_number(), ImageNumber(1));
    }
}

#[test]
fn reverse_lookup_inside_a_symbol() {
    let fx = fixture();
    let kit = fx.process.image(2);
    let start = kit.lookup("kit_init").unwrap();
    let info = kit.reverse_lookup(start + 4).unwrap();
    assert_eq!(info.name, "kit_init");
    assert_eq!(info.address, start);
}

#[test]
fn reverse_lookup_requires_membership() {
    let fx = fixture();
    let address = fx.process.main_image().lookup("main").unwrap();
    assert!(fx.process.image(0).reverse_lookup(address).is_none());
    let info = fx.process.all_images().reverse_lookup(address).unwrap();
    assert_eq!(info.image.image_number(), ImageNumber(1));
}

#[test]
fn lookup_scopes() {
    let fx = fixture();
    let all = fx.process.all_images();
    let system = fx.process.image(0);
    assert_eq!(all.lookup("kit_init"), Some(fx.headers[2] + 0x420));
    assert!(system.lookup("sys_open").is_some());
    assert!(system.lookup("main").is_none());
    assert!(fx.process.main_image().lookup("sys_open").is_none());
    assert_eq!(
        all.lookup_all(&["sys_close", "nope", "main"]),
        vec![
            Some(fx.headers[0] + 0x410),
            None,
            Some(fx.headers[1] + 0x430),
        ]
    );
}

#[test]
fn entry_values_match_loader_addresses() {
    let fx = fixture();
    let main = fx.process.main_image();
    let entry = main.entry_named("app_entry").unwrap();
    assert_eq!(entry.value, main.lookup("app_entry"));
    assert_eq!(entry.image_key(), "Demo");
    assert_eq!(
        entry.to_string(),
        format!("#1   {:#x}: 0x0f app_entry Demo", entry.value.unwrap())
    );
}

#[test]
fn exported_entries_cover_the_external_range() {
    let fx = fixture();
    let main = fx.process.main_image();
    let exported = names(&main.exported_entries().collect::<Vec<_>>());
    assert_eq!(exported, vec!["main", "app_entry"]);
    let all_exported = names(&fx.process.all_images().exported_entries().collect::<Vec<_>>());
    assert_eq!(
        all_exported,
        vec![
            "sys_open",
            "sys_close",
            "main",
            "app_entry",
            "$s3Kit4ViewC",
            "$s3Kit4ViewCMa",
            "kit_init"
        ]
    );
}

#[test]
fn swift_symbols_with_and_without_suffixes() {
    let fx = fixture();
    let kit = fx.process.image(2);
    assert_eq!(
        names(&kit.swift_symbols(None)),
        vec!["$s3Kit4ViewC", "$s3Kit4ViewCMa"]
    );
    assert_eq!(names(&kit.swift_symbols(Some(&["Ma"]))), vec!["$s3Kit4ViewCMa"]);
    assert!(fx.process.image(0).swift_symbols(None).is_empty());
}

struct Prefixing;

impl Demangler for Prefixing {
    fn demangle(&self, mangled: &[u8]) -> Option<String> {
        let name = std::str::from_utf8(mangled).ok()?;
        Some(format!("demo::{name}()"))
    }
}

#[test]
fn mangle_finds_entry_by_display_name() {
    let fx = fixture_with(|process| process.with_demangler(Arc::new(Prefixing)));
    let main = fx.process.main_image();
    let entry = main.mangle("demo::app_entry()").expect("display name matches");
    assert_eq!(entry.name, b"app_entry");
    assert!(main.mangle("demo::not_here()").is_none());
}

#[test]
fn mangle_with_native_demangler_skips_plain_names() {
    let fx = fixture();
    assert!(fx.process.main_image().mangle("app_entry").is_none());
}

#[test]
fn exports_decode_the_trie() {
    let fx = fixture();
    let kit = fx.process.image(2);
    let exports = kit.exports();
    assert_eq!(exports.len(), 3);
    for (export, (name, offset)) in exports.iter().zip(&fx.kit.exports) {
        assert_eq!(export.name, *name);
        assert_eq!(export.image, ImageNumber(2));
        assert_eq!(export.address, Some(fx.headers[2] + *offset as usize));
        assert!(!export.is_reexport());
    }
}
