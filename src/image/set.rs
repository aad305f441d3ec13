//! Image selections and the symbol view over them.

use super::{FileImage, ImageNumber};
use crate::loader::{image_key, Handle};
use crate::macho::{MachImage, Memory};
use crate::process::Process;
use crate::symbols::{Entries, SymbolIterator, TypeMask};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Which images a set covers.
#[derive(Debug, Clone)]
pub(crate) enum Selection {
    Single(ImageNumber),
    /// Recomputed on every query.
    All,
    /// Recomputed on every query.
    App,
    Main(ImageNumber),
    File(Arc<FileImage>),
}

/// A set of images and the exclusion mask applied to their symbol tables.
#[derive(Clone)]
pub struct ImageSymbols {
    process: Arc<Process>,
    selection: Selection,
    mask: TypeMask,
    handle: OnceCell<Option<Handle>>,
}

impl ImageSymbols {
    pub(crate) fn new(process: Arc<Process>, selection: Selection, mask: TypeMask) -> Self {
        ImageSymbols {
            process,
            selection,
            mask,
            handle: OnceCell::new(),
        }
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    pub fn mask(&self) -> TypeMask {
        self.mask
    }

    /// The same images iterated with a different mask.
    pub fn with_mask(&self, mask: TypeMask) -> ImageSymbols {
        ImageSymbols {
            mask,
            ..self.clone()
        }
    }

    /// Excludes debugger and private-external entries.
    pub fn globals(&self) -> ImageSymbols {
        self.with_mask(TypeMask::globals())
    }

    /// Yields every entry, undefined ones included.
    pub fn unfiltered(&self) -> ImageSymbols {
        self.with_mask(TypeMask::unfiltered())
    }

    /// Member images in load order.
    pub fn image_numbers(&self) -> Vec<ImageNumber> {
        match &self.selection {
            Selection::Single(n) | Selection::Main(n) => vec![*n],
            Selection::All => self.process.all_numbers(),
            Selection::App => self.process.app_numbers(),
            Selection::File(file) => vec![file.number()],
        }
    }

    /// The representative number; [`ImageNumber::ANY`] for all/app sets.
    pub fn image_number(&self) -> ImageNumber {
        match &self.selection {
            Selection::Single(n) | Selection::Main(n) => *n,
            Selection::All | Selection::App => ImageNumber::ANY,
            Selection::File(file) => file.number(),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.selection, Selection::File(_))
    }

    /// One set per member image, each with this set's mask.
    pub fn image_list(&self) -> Vec<ImageSymbols> {
        if let Selection::File(_) = self.selection {
            return vec![self.clone()];
        }
        self.image_numbers()
            .into_iter()
            .map(|n| ImageSymbols::new(Arc::clone(&self.process), Selection::Single(n), self.mask))
            .collect()
    }

    /// Member images keyed by last path component; the first image with a
    /// given key wins.
    pub fn image_map(&self) -> BTreeMap<String, ImageSymbols> {
        let mut map = BTreeMap::new();
        for image in self.image_list() {
            map.entry(image.key()).or_insert(image);
        }
        map
    }

    /// Header address; zero for all/app sets.
    pub fn header(&self) -> usize {
        match &self.selection {
            Selection::Single(n) | Selection::Main(n) => self.process.live_header(*n),
            Selection::All | Selection::App => 0,
            Selection::File(file) => file.header(),
        }
    }

    /// Load-time slide; zero for file images and all/app sets.
    pub fn slide(&self) -> isize {
        match &self.selection {
            Selection::Single(n) | Selection::Main(n) => {
                self.process.live_header(*n);
                self.process.loader().image_slide(n.0)
            }
            _ => 0,
        }
    }

    pub fn path(&self) -> String {
        match &self.selection {
            Selection::Single(n) | Selection::Main(n) => self.process.live_path(*n),
            Selection::All => "<all images>".to_string(),
            Selection::App => "<app images>".to_string(),
            Selection::File(file) => file.path().to_string_lossy().into_owned(),
        }
    }

    /// Last component of [`path`](Self::path).
    pub fn key(&self) -> String {
        image_key(&self.path()).to_string()
    }

    pub fn file(&self) -> Option<&FileImage> {
        match &self.selection {
            Selection::File(file) => Some(file),
            _ => None,
        }
    }

    /// Mutable access to a file image not shared with other sets.
    pub fn file_mut(&mut self) -> Option<&mut FileImage> {
        match &mut self.selection {
            Selection::File(file) => Arc::get_mut(file),
            _ => None,
        }
    }

    /// Handle for loader lookups, acquired on first use.
    pub(crate) fn handle(&self) -> Option<Handle> {
        *self.handle.get_or_init(|| match &self.selection {
            Selection::All | Selection::App => Some(Handle::DEFAULT),
            Selection::Main(_) => Some(Handle::MAIN_ONLY),
            Selection::Single(n) => {
                let path = self.process.live_path(*n);
                let handle = self.process.loader().open(&path);
                trace!(path, ?handle, "opened image");
                handle
            }
            Selection::File(_) => None,
        })
    }

    /// Decode the load commands of member `number`.
    pub(crate) fn mach_image(&self, number: ImageNumber) -> Option<(MachImage<'_>, Arc<str>)> {
        if number.is_file() {
            let file = self.file().filter(|f| f.number() == number)?;
            let image = file.image().ok()?;
            return Some((image, Arc::from(file.key())));
        }
        let header = self.process.live_header(number);
        // Safety: the Loader contract keeps reported headers and the regions
        // their load commands describe mapped for the process lifetime.
        match MachImage::parse(unsafe { Memory::mapped(header) }) {
            Ok(image) => {
                let path = self.process.live_path(number);
                Some((image, Arc::from(image_key(&path))))
            }
            Err(err) => {
                debug!(image = number.0, %err, "skipping undecodable image");
                None
            }
        }
    }

    pub(crate) fn symbol_iterator(
        &self,
        number: ImageNumber,
        exported_only: bool,
    ) -> Option<SymbolIterator<'_>> {
        let (image, key) = self.mach_image(number)?;
        if exported_only {
            SymbolIterator::exported(&image, number, self.mask, key)
        } else {
            SymbolIterator::new(&image, number, self.mask, key)
        }
    }

    /// Symbol-table entries of every member, in load order then table order.
    pub fn entries(&self) -> Entries<'_> {
        Entries::new(self, false)
    }

    /// Entries in the externally defined range of each member's dynamic
    /// symbol table.
    pub fn exported_entries(&self) -> Entries<'_> {
        Entries::new(self, true)
    }
}

impl PartialEq for ImageSymbols {
    fn eq(&self, other: &Self) -> bool {
        self.image_number() == other.image_number()
    }
}

impl fmt::Display for ImageSymbols {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} {:#x}", self.image_number(), self.path(), self.header())
    }
}

impl fmt::Debug for ImageSymbols {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageSymbols")
            .field("selection", &self.selection)
            .field("mask", &self.mask)
            .finish()
    }
}

impl<'a> IntoIterator for &'a ImageSymbols {
    type Item = crate::symbols::SymbolEntry<'a>;
    type IntoIter = Entries<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries()
    }
}
