//! Lazy symbol-table iteration.

use super::{SymbolEntry, TypeMask};
use crate::image::{ImageNumber, ImageSymbols};
use crate::macho::{MachImage, SymbolTable};
use std::sync::Arc;

/// Entries of one image's symbol table, in table order.
#[derive(Debug, Clone)]
pub struct SymbolIterator<'data> {
    image: ImageNumber,
    table: SymbolTable<'data>,
    address_base: usize,
    mask: TypeMask,
    next: u32,
    end: u32,
    key: Arc<str>,
}

impl<'data> SymbolIterator<'data> {
    /// Iterate the whole table. `None` when the image has no symbol table.
    pub fn new(
        image: &MachImage<'data>,
        number: ImageNumber,
        mask: TypeMask,
        key: Arc<str>,
    ) -> Option<Self> {
        let table = image.symbol_table()?;
        Some(SymbolIterator {
            image: number,
            address_base: image.address_base(),
            mask,
            next: 0,
            end: table.len(),
            table,
            key,
        })
    }

    /// Iterate only the externally defined range of the dynamic symbol table.
    pub fn exported(
        image: &MachImage<'data>,
        number: ImageNumber,
        mask: TypeMask,
        key: Arc<str>,
    ) -> Option<Self> {
        let range = image.dynamic_ranges()?.exported;
        let mut iter = Self::new(image, number, mask, key)?;
        iter.end = range.end.min(iter.end);
        iter.next = range.start.min(iter.end);
        Some(iter)
    }
}

impl<'data> Iterator for SymbolIterator<'data> {
    type Item = SymbolEntry<'data>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.end {
            let index = self.next;
            self.next += 1;
            let Some(nlist) = self.table.nlist(index) else {
                self.next = self.end;
                return None;
            };
            if !self.mask.admits(&nlist) {
                continue;
            }
            let value = nlist
                .is_defined()
                .then(|| self.address_base.wrapping_add(nlist.n_value as usize));
            return Some(SymbolEntry {
                image: self.image,
                name: self.table.name(nlist.n_strx),
                value,
                nlist,
                image_key: Arc::clone(&self.key),
            });
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some((self.end - self.next) as usize))
    }
}

/// Entries of every image in a set, each image decoded when reached.
pub struct Entries<'a> {
    set: &'a ImageSymbols,
    numbers: std::vec::IntoIter<ImageNumber>,
    current: Option<SymbolIterator<'a>>,
    exported_only: bool,
}

impl<'a> Entries<'a> {
    pub(crate) fn new(set: &'a ImageSymbols, exported_only: bool) -> Self {
        Entries {
            set,
            numbers: set.image_numbers().into_iter(),
            current: None,
            exported_only,
        }
    }
}

impl<'a> Iterator for Entries<'a> {
    type Item = SymbolEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.current.as_mut().and_then(Iterator::next) {
                return Some(entry);
            }
            let number = self.numbers.next()?;
            self.current = self.set.symbol_iterator(number, self.exported_only);
        }
    }
}
