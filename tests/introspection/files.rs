use crate::common::loader::MockLoader;
use crate::common::macho::{fat, fat64, Built, MachBuilder};
use crate::common::{fixture, process_with};
use dlscope::image::registry;
use dlscope::{CpuType, DlError, Rebinding};
use std::io::Write;
use std::path::Path;

fn write_temp(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(bytes).unwrap();
    path
}

#[test]
fn missing_file_is_an_error() {
    let (process, _) = process_with(MockLoader::new());
    let err = process
        .file_image("/nonexistent/dlscope/Missing.dylib")
        .unwrap_err();
    assert!(matches!(err, DlError::Io(_)));
}

#[test]
fn file_lookup_and_reverse_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let built = MachBuilder::new()
        .local("helper")
        .export("foo")
        .export("bar")
        .import("puts")
        .build();
    let path = write_temp(dir.path(), "libdisk.dylib", &built.bytes);

    let (process, _) = process_with(MockLoader::new());
    let image = process.file_image(&path).unwrap();
    assert!(image.is_file());
    assert!(image.image_number().is_file());
    assert_eq!(image.key(), "libdisk.dylib");
    assert_eq!(image.slide(), 0);
    assert_eq!(
        registry::file_path(image.image_number()).as_deref(),
        Some(path.to_string_lossy().as_ref())
    );

    for (name, offset) in &built.exports {
        let address = image.lookup(name).expect("defined in the file");
        assert_eq!(address, image.header() + *offset as usize);
        let info = image.reverse_lookup(address + 2).expect("inside the file");
        assert_eq!(info.name, *name);
        assert_eq!(info.address, address);
        assert_eq!(info.image.image_number(), image.image_number());
    }
    assert!(image.lookup("puts").is_none());
    assert!(image.lookup("nothing").is_none());
}

#[test]
fn file_entries_carry_the_file_key() {
    let dir = tempfile::tempdir().unwrap();
    let built = MachBuilder::new().export("foo").import("puts").build();
    let path = write_temp(dir.path(), "Tool", &built.bytes);

    let (process, _) = process_with(MockLoader::new());
    let image = process.file_image(&path).unwrap();
    let entries: Vec<_> = image.entries().collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, b"foo");
    assert_eq!(entries[0].image_key(), "Tool");
    assert_eq!(entries[0].image, image.image_number());
    assert_eq!(image.unfiltered().entries().count(), 2);
}

#[test]
fn fat_file_selects_requested_slice() {
    let dir = tempfile::tempdir().unwrap();
    let intel = MachBuilder::new()
        .cputype(CpuType::X86_64)
        .export("only_in_intel")
        .build();
    let arm = MachBuilder::new()
        .cputype(CpuType::ARM64)
        .export("only_in_arm")
        .build();
    let (container, ranges) = fat(&[
        (CpuType::X86_64, &intel.bytes),
        (CpuType::ARM64, &arm.bytes),
    ]);
    let path = write_temp(dir.path(), "Universal", &container);

    let (process, _) = process_with(MockLoader::new());
    let image = process.file_image_arch(&path, Some(CpuType::ARM64)).unwrap();
    let file = image.file().unwrap();
    assert_eq!(file.slice_range(), ranges[1].clone());
    assert_eq!(file.data(), &container[ranges[1].clone()]);
    assert_eq!(file.image().unwrap().cputype(), CpuType::ARM64);
    assert!(image.lookup("only_in_arm").is_some());
    assert!(image.lookup("only_in_intel").is_none());

    let first = process.file_image_arch(&path, None).unwrap();
    assert_eq!(first.file().unwrap().slice_range(), ranges[0].clone());

    let err = process
        .file_image_arch(&path, Some(CpuType::ARM))
        .unwrap_err();
    assert!(matches!(err, DlError::NoMatchingArch { .. }));
}

fn variant() -> MachBuilder {
    MachBuilder::new()
        .local("helper")
        .export("foo")
        .export("bar")
        .import("puts")
}

/// Open `contents` as a file image and check its symbols against `built`.
fn assert_file_symbols(contents: &[u8], built: &Built, cpu: Option<CpuType>) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_temp(dir.path(), "libvariant.dylib", contents);
    let (process, _) = process_with(MockLoader::new());
    let image = process.file_image_arch(&path, cpu).unwrap();

    let names: Vec<String> = image.entries().map(|e| e.name_str().into_owned()).collect();
    assert_eq!(names, vec!["helper", "foo", "bar"]);
    assert_eq!(image.unfiltered().entries().count(), 4);
    for (name, offset) in &built.exports {
        assert_eq!(image.lookup(name), Some(image.header() + *offset as usize));
    }
    assert!(image.lookup("puts").is_none());
}

#[test]
fn narrow_file_image() {
    let built = variant().narrow().cputype(CpuType::X86).build();
    assert_file_symbols(&built.bytes, &built, None);
}

#[test]
fn big_endian_file_image() {
    let built = variant().big_endian().build();
    assert_file_symbols(&built.bytes, &built, None);
}

#[test]
fn narrow_big_endian_file_image() {
    let built = variant().narrow().big_endian().cputype(CpuType::ARM).build();
    assert_file_symbols(&built.bytes, &built, None);
}

#[test]
fn wide_fat_table_selects_slice() {
    let narrow = variant().narrow().cputype(CpuType::X86).build();
    let wide = variant().cputype(CpuType::ARM64).build();
    let (container, ranges) = fat64(&[
        (CpuType::X86, &narrow.bytes),
        (CpuType::ARM64, &wide.bytes),
    ]);
    assert_eq!(&container[ranges[0].clone()], &narrow.bytes[..]);
    assert_file_symbols(&container, &narrow, Some(CpuType::X86));
    assert_file_symbols(&container, &wide, Some(CpuType::ARM64));
    assert_file_symbols(&container, &narrow, None);
}

#[test]
fn edits_are_saved_back() {
    let dir = tempfile::tempdir().unwrap();
    let built = MachBuilder::new().export("foo").build();
    let path = write_temp(dir.path(), "libedit.dylib", &built.bytes);

    let (process, _) = process_with(MockLoader::new());
    let mut image = process.file_image(&path).unwrap();
    let offset = built.exports[0].1 as usize;
    {
        let file = image.file_mut().expect("set owns the file");
        file.data_mut()[offset..offset + 4].copy_from_slice(&[0xc0, 0x03, 0x5f, 0xd6]);
        file.save().unwrap();
    }
    let on_disk = std::fs::read(&path).unwrap();
    assert_eq!(&on_disk[offset..offset + 4], &[0xc0, 0x03, 0x5f, 0xd6]);
    assert_eq!(on_disk.len(), built.bytes.len());

    let shared = image.clone();
    assert!(image.file_mut().is_none());
    drop(shared);
}

#[test]
fn interposition_skips_file_images() {
    let dir = tempfile::tempdir().unwrap();
    let built = MachBuilder::new().import("puts").build();
    let path = write_temp(dir.path(), "libhooked.dylib", &built.bytes);

    let fx = fixture();
    let image = fx.process.file_image(&path).unwrap();
    let mut batch = vec![Rebinding::new("puts", 0x1234)];
    let replaced = unsafe { image.rebind_batch(&mut batch) };
    assert!(replaced.is_empty());
    assert_eq!(image.file().unwrap().data(), &built.bytes[..]);
}

#[test]
fn synthetic_images_parse_with_object() {
    use object::{Object, ObjectSymbol};

    let built = MachBuilder::new().export("foo").import("puts").build();
    let file = object::File::parse(&*built.bytes).expect("well-formed Mach-O");
    assert_eq!(file.format(), object::BinaryFormat::MachO);
    let names: Vec<&str> = file.symbols().filter_map(|s| s.name().ok()).collect();
    assert!(names.contains(&"_foo"));
    assert!(names.contains(&"_puts"));
}
