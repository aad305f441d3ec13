//! dlscope: introspection of the Mach-O images mapped into the running
//! process.
//!
//! Images are enumerated through a [`Loader`], their `nlist` symbol tables are
//! walked lazily, names resolve to addresses and back, and references to a
//! symbol can be rebound to a replacement function without relinking.
//!
//! ```no_run
//! # #[cfg(target_os = "macos")]
//! # fn main() -> dlscope::Result<()> {
//! let process = dlscope::Process::native()?;
//! for entry in process.main_image().entries_with_prefix("$s") {
//!     println!("{entry}");
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(target_os = "macos"))]
//! # fn main() {}
//! ```

pub mod config;
pub mod demangle;
pub mod error;
pub mod image;
pub mod interpose;
pub mod loader;
pub mod logging;
pub mod macho;
pub mod process;
pub mod symbols;

pub use config::Config;
pub use demangle::{Demangler, NativeDemangler};
pub use error::{DlError, Result};
pub use image::{FileImage, ImageNumber, ImageSymbols, FILE_IMAGE_BASE};
pub use interpose::{fishhook::Fishhook, Rebinder, Rebinding};
pub use loader::{AddressInfo, Handle, Loader};
pub use macho::CpuType;
pub use process::Process;
pub use symbols::{SymbolEntry, SymbolInfo, TypeMask};
