//! Process-wide record of images read from disk.
//!
//! Numbers start at [`FILE_IMAGE_BASE`] and only ever grow. Paths stay
//! registered for the life of the process; a file's export table is dropped
//! together with the buffer it describes.

use super::{ImageNumber, FILE_IMAGE_BASE};
use crate::loader::AddressInfo;
use crate::macho::trie::ExportTable;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

struct FileExports {
    base: usize,
    len: usize,
    table: ExportTable,
}

struct Registry {
    next: u32,
    paths: BTreeMap<ImageNumber, String>,
    exports: BTreeMap<ImageNumber, FileExports>,
}

static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| {
    Mutex::new(Registry {
        next: FILE_IMAGE_BASE,
        paths: BTreeMap::new(),
        exports: BTreeMap::new(),
    })
});

fn registry() -> MutexGuard<'static, Registry> {
    // A panic while holding the lock leaves the maps consistent.
    REGISTRY.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Assign the next file number to `path` and remember its exports, which
/// occupy `[base, base + len)` in this process.
pub(crate) fn register(path: &str, base: usize, len: usize, table: ExportTable) -> ImageNumber {
    let mut registry = registry();
    let number = ImageNumber(registry.next);
    registry.next += 1;
    registry.paths.insert(number, path.to_string());
    registry
        .exports
        .insert(number, FileExports { base, len, table });
    number
}

pub(crate) fn forget_exports(number: ImageNumber) {
    registry().exports.remove(&number);
}

/// Path a file image was read from.
pub fn file_path(number: ImageNumber) -> Option<String> {
    registry().paths.get(&number).cloned()
}

/// Every path registered so far, in number order.
pub fn file_paths() -> Vec<(ImageNumber, String)> {
    registry()
        .paths
        .iter()
        .map(|(number, path)| (*number, path.clone()))
        .collect()
}

/// Resolve `address` against the export tables of live file images.
pub fn address_info(address: usize) -> Option<(ImageNumber, AddressInfo)> {
    let registry = registry();
    registry.exports.iter().find_map(|(number, exports)| {
        let offset = address.checked_sub(exports.base)?;
        if offset >= exports.len {
            return None;
        }
        let (start, name) = exports.table.nearest(offset as u64)?;
        let info = AddressInfo {
            path: registry.paths.get(number)?.clone(),
            image_base: exports.base,
            name: Some(name.to_string()),
            symbol_address: exports.base + start as usize,
        };
        Some((*number, info))
    })
}
