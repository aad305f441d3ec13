//! The dynamic loader seen through a narrow interface.
//!
//! Everything dlscope knows about the images mapped into the process comes
//! from a [`Loader`]. On macOS [`dyld::DyldLoader`] answers from dyld itself;
//! tests and embedding tools can supply their own implementation.

#[cfg(target_os = "macos")]
pub mod dyld;

use std::path::Path;

/// An opened image or one of the reserved lookup scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub isize);

impl Handle {
    /// Search every image in load order.
    pub const DEFAULT: Handle = Handle(-2);
    /// Search only the main executable's exports.
    pub const MAIN_ONLY: Handle = Handle(-5);

    pub fn as_ptr(self) -> *mut std::ffi::c_void {
        self.0 as *mut std::ffi::c_void
    }
}

/// Result of resolving an address to the image and symbol containing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    /// Path of the containing image.
    pub path: String,
    /// Header address of the containing image.
    pub image_base: usize,
    /// Nearest preceding exported symbol, without its leading underscore.
    pub name: Option<String>,
    /// Address of that symbol.
    pub symbol_address: usize,
}

/// Services of the dynamic loader.
///
/// Image indices run from `0` to `image_count() - 1` in load order.
///
/// # Safety
///
/// `image_header` must return the address of a Mach-O header that, together
/// with every segment and linkedit region its load commands describe, stays
/// mapped and readable for the rest of the process lifetime. The symbol
/// iterator dereferences these addresses directly.
pub unsafe trait Loader: Send + Sync {
    fn image_count(&self) -> u32;

    fn image_header(&self, index: u32) -> usize;

    fn image_slide(&self, index: u32) -> isize;

    fn image_path(&self, index: u32) -> String;

    /// Path of the main executable, as the loader reports it.
    fn main_executable_path(&self) -> Option<String>;

    /// The application's private frameworks directory.
    ///
    /// Bundled executables live in `Contents/MacOS` and keep frameworks in
    /// `Contents/Frameworks`; otherwise a `Frameworks` directory beside the
    /// executable is assumed.
    fn private_frameworks_path(&self) -> Option<String> {
        let exe = self.main_executable_path()?;
        let dir = Path::new(&exe).parent()?;
        let frameworks = if dir.file_name().is_some_and(|name| name == "MacOS") {
            dir.parent()?.join("Frameworks")
        } else {
            dir.join("Frameworks")
        };
        Some(frameworks.to_string_lossy().into_owned())
    }

    /// Open the image at `path`, loading it if necessary.
    fn open(&self, path: &str) -> Option<Handle>;

    /// Resolve `name` (no leading underscore) within `handle`.
    fn lookup(&self, handle: Handle, name: &str) -> Option<usize>;

    fn address_info(&self, address: usize) -> Option<AddressInfo>;
}

/// Last path component, the short key of an image.
pub fn image_key(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}
