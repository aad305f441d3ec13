//! Images read from disk rather than loaded.
//!
//! The whole file is held in memory. Thin Mach-O files are used as they are;
//! for fat containers the slice matching the requested CPU becomes the image.

use super::{registry, ImageNumber};
use crate::error::Result;
use crate::loader::image_key;
use crate::macho::trie::ExportTable;
use crate::macho::{fat, CpuType, MachImage, Memory};
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One image file held in memory, registered under a file image number.
#[derive(Debug)]
pub struct FileImage {
    number: ImageNumber,
    path: PathBuf,
    data: Vec<u8>,
    slice: Range<usize>,
}

impl FileImage {
    /// Read `path`, picking the host CPU's slice from fat containers.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_arch(path, CpuType::host())
    }

    /// Read `path`, picking the slice for `cpu` from fat containers, or the
    /// first slice when `cpu` is `None`.
    pub fn open_arch<P: AsRef<Path>>(path: P, cpu: Option<CpuType>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let slice = if fat::is_fat(&data) {
            fat::select_slice(&data, cpu)?
        } else {
            0..data.len()
        };

        let image = MachImage::parse(Memory::buffer(&data[slice.clone()]))?;
        let exports = image
            .export_trie()
            .map(ExportTable::from_trie)
            .unwrap_or_default();
        debug!(
            path = %path.display(),
            slice = ?slice,
            cputype = image.cputype().0,
            exports = exports.len(),
            "loaded image file"
        );

        let base = data[slice.clone()].as_ptr() as usize;
        let number = registry::register(&path.to_string_lossy(), base, slice.len(), exports);
        Ok(FileImage {
            number,
            path: path.to_path_buf(),
            data,
            slice,
        })
    }

    pub fn number(&self) -> ImageNumber {
        self.number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> String {
        image_key(&self.path.to_string_lossy()).to_string()
    }

    /// Bytes of the selected slice.
    pub fn data(&self) -> &[u8] {
        &self.data[self.slice.clone()]
    }

    /// Mutable bytes of the selected slice, for edits written back by [`save`](Self::save).
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.slice.clone()]
    }

    /// Byte range of the selected slice within the file.
    pub fn slice_range(&self) -> Range<usize> {
        self.slice.clone()
    }

    /// Address of the image header.
    pub fn header(&self) -> usize {
        self.data().as_ptr() as usize
    }

    pub fn image(&self) -> Result<MachImage<'_>> {
        MachImage::parse(Memory::buffer(self.data()))
    }

    /// Write the whole file back, replacing the original atomically.
    pub fn save(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&self.data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        debug!(path = %self.path.display(), bytes = self.data.len(), "saved image file");
        Ok(())
    }
}

impl Drop for FileImage {
    fn drop(&mut self) {
        registry::forget_exports(self.number);
    }
}
