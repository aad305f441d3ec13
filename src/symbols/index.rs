//! Queries over the entries of an image set.
//!
//! Everything except loader-backed name lookup is a linear scan of the
//! iterator; callers that repeat a query should keep the result.

use super::SymbolEntry;
use crate::image::{registry, ImageNumber, ImageSymbols};
use crate::macho::trie::{parse_exports, EXPORT_SYMBOL_FLAGS_REEXPORT};
use tracing::trace;

/// A symbol found by address.
#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub name: String,
    /// Start of the symbol.
    pub address: usize,
    /// The member image defining it.
    pub image: ImageSymbols,
}

/// One record of an image's export trie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub image: ImageNumber,
    pub name: String,
    /// Absent for re-exports of another library's symbol.
    pub address: Option<usize>,
    pub flags: u64,
}

impl Export {
    pub fn is_reexport(&self) -> bool {
        self.flags & EXPORT_SYMBOL_FLAGS_REEXPORT != 0
    }
}

impl ImageSymbols {
    /// Address of `name` (no leading underscore).
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.lookup_all(&[name]).pop().flatten()
    }

    /// Addresses of several names; each element is resolved independently.
    ///
    /// Live images ask the loader through a handle acquired on first use.
    /// File images, and live images the loader cannot open, are scanned.
    pub fn lookup_all<S: AsRef<str>>(&self, names: &[S]) -> Vec<Option<usize>> {
        match self.handle() {
            Some(handle) => {
                let loader = self.process().loader();
                names
                    .iter()
                    .map(|name| {
                        let address = loader.lookup(handle, name.as_ref());
                        trace!(name = name.as_ref(), ?address, "loader lookup");
                        address
                    })
                    .collect()
            }
            None => names
                .iter()
                .map(|name| self.entry_named(name.as_ref()).and_then(|e| e.value))
                .collect(),
        }
    }

    /// First entry whose name equals `name` byte for byte.
    pub fn entry_named<N: AsRef<[u8]>>(&self, name: N) -> Option<SymbolEntry<'_>> {
        let name = name.as_ref();
        self.entries().find(|entry| entry.name == name)
    }

    /// Entries whose names start with `prefix`; every entry for an empty prefix.
    pub fn entries_with_prefix<P: AsRef<[u8]>>(&self, prefix: P) -> Vec<SymbolEntry<'_>> {
        let prefix = prefix.as_ref();
        self.entries()
            .filter(|entry| entry.name.starts_with(prefix))
            .collect()
    }

    /// The symbol at or before `address` and the member image containing it.
    ///
    /// The loader answers for live images; images read from disk are
    /// resolved from the export trie recorded when they were opened.
    pub fn reverse_lookup(&self, address: usize) -> Option<SymbolInfo> {
        let members = self.image_numbers();

        if let Some(info) = self.process().loader().address_info(address) {
            if let Some(name) = info.name {
                let owner = members
                    .iter()
                    .copied()
                    .filter(|n| n.is_live())
                    .find(|n| self.process().live_path(*n) == info.path);
                if let Some(owner) = owner {
                    return Some(SymbolInfo {
                        name,
                        address: info.symbol_address,
                        image: self.process().image(owner.0).with_mask(self.mask()),
                    });
                }
            }
        }

        let (number, info) = registry::address_info(address)?;
        if !members.contains(&number) {
            return None;
        }
        let image = self
            .image_list()
            .into_iter()
            .find(|image| image.image_number() == number)?;
        Some(SymbolInfo {
            name: info.name?,
            address: info.symbol_address,
            image,
        })
    }

    /// First entry whose demangled name is `display`.
    pub fn mangle(&self, display: &str) -> Option<SymbolEntry<'_>> {
        let demangler = self.process().demangler();
        self.entries()
            .find(|entry| demangler.demangle(entry.name).as_deref() == Some(display))
    }

    /// Defined Swift symbols, optionally only those ending in one of `suffixes`.
    ///
    /// Names are compared undecoded.
    pub fn swift_symbols(&self, suffixes: Option<&[&str]>) -> Vec<SymbolEntry<'_>> {
        self.entries()
            .filter(|entry| entry.is_defined() && entry.is_swift())
            .filter(|entry| match suffixes {
                None => true,
                Some(suffixes) => suffixes
                    .iter()
                    .any(|suffix| entry.name.ends_with(suffix.as_bytes())),
            })
            .collect()
    }

    /// Decoded export tries of every member image.
    pub fn exports(&self) -> Vec<Export> {
        let mut out = Vec::new();
        for number in self.image_numbers() {
            let Some((image, _)) = self.mach_image(number) else {
                continue;
            };
            let Some(trie) = image.export_trie() else {
                continue;
            };
            let base = image.memory().base();
            out.extend(parse_exports(trie).into_iter().map(|symbol| Export {
                image: number,
                address: (!symbol.is_reexport()).then(|| base.wrapping_add(symbol.offset as usize)),
                name: symbol.name,
                flags: symbol.flags,
            }));
        }
        out
    }
}
