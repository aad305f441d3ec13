//! # Image Module
//!
//! Images loaded into the process or read from disk, and the selections
//! (single image, all images, application images, main executable, file)
//! symbol queries run against.

pub mod file;
pub mod registry;
pub mod set;

pub use file::FileImage;
pub use set::ImageSymbols;

use std::fmt;

/// First number handed to images read from disk.
pub const FILE_IMAGE_BASE: u32 = 1_000_000;

/// Position of an image in the process load order, or a file image's
/// registry number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageNumber(pub u32);

impl ImageNumber {
    /// Representative number of selections spanning several images.
    pub const ANY: ImageNumber = ImageNumber(u32::MAX);

    pub fn is_file(self) -> bool {
        self.0 >= FILE_IMAGE_BASE && self != Self::ANY
    }

    pub fn is_live(self) -> bool {
        self.0 < FILE_IMAGE_BASE
    }
}

impl fmt::Display for ImageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ANY {
            f.write_str("*")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
