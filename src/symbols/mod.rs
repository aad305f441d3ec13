//! # Symbols Module
//!
//! Symbol-table entries, the exclusion mask applied while iterating them and
//! the query surface built on top (name, prefix, reverse and mangled-name
//! lookups).

use crate::image::ImageNumber;
use crate::macho::{Nlist, N_EXT, N_PEXT, N_STAB, N_TYPE};
use bitflags::bitflags;
use std::fmt;
use std::sync::Arc;

pub mod index;
pub mod iter;

pub use index::SymbolInfo;
pub use iter::{Entries, SymbolIterator};

bitflags! {
    /// `n_type` bits that exclude an entry from iteration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeMask: u8 {
        const STAB = N_STAB;
        const PEXT = N_PEXT;
        const TYPE = N_TYPE;
        const EXT = N_EXT;
    }
}

impl TypeMask {
    /// Debugger entries excluded; the mask used unless one is requested.
    pub const DEFAULT: TypeMask = TypeMask::STAB;

    /// Debugger and private-external entries excluded.
    pub fn globals() -> Self {
        TypeMask::STAB | TypeMask::PEXT
    }

    /// Nothing excluded, undefined entries included.
    pub fn unfiltered() -> Self {
        TypeMask::empty()
    }

    /// Whether an entry survives this mask.
    pub fn admits(&self, nlist: &Nlist) -> bool {
        if self.is_empty() {
            return true;
        }
        nlist.n_type & self.bits() == 0 && nlist.is_defined()
    }
}

impl Default for TypeMask {
    fn default() -> Self {
        TypeMask::DEFAULT
    }
}

/// One decoded symbol-table entry.
///
/// The name borrows the image's string table; it is valid while the image
/// stays mapped (or, for file images, while the owning buffer lives).
#[derive(Debug, Clone)]
pub struct SymbolEntry<'data> {
    pub image: ImageNumber,
    pub name: &'data [u8],
    /// Absent for undefined entries.
    pub value: Option<usize>,
    pub nlist: Nlist,
    pub(crate) image_key: Arc<str>,
}

impl<'data> SymbolEntry<'data> {
    /// Name as text, lossily decoded.
    pub fn name_str(&self) -> std::borrow::Cow<'data, str> {
        String::from_utf8_lossy(self.name)
    }

    pub fn is_defined(&self) -> bool {
        self.value.is_some()
    }

    /// Last path component of the owning image.
    pub fn image_key(&self) -> &str {
        &self.image_key
    }

    /// Swift metadata and entity symbols carry the `$s` prefix.
    pub fn is_swift(&self) -> bool {
        self.name.starts_with(b"$s")
    }
}

impl fmt::Display for SymbolEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:<3} {:#x}: 0x{:02x} {} {}",
            self.image.0,
            self.value.unwrap_or(0),
            self.nlist.n_type,
            self.name_str(),
            self.image_key
        )
    }
}
