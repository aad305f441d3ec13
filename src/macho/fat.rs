//! Multi-architecture ("fat") containers.
//!
//! The container header and architecture table are decoded by `object`;
//! this module only decides which slice an image file stands for.

use super::CpuType;
use crate::error::{DlError, Result};
use object::read::macho::{FatArch, MachOFatFile32, MachOFatFile64};
use std::ops::Range;

pub const FAT_MAGIC: u32 = object::macho::FAT_MAGIC;
pub const FAT_MAGIC_64: u32 = object::macho::FAT_MAGIC_64;

/// Whether `data` starts with a fat header.
pub fn is_fat(data: &[u8]) -> bool {
    matches!(
        data.get(..4).map(|m| u32::from_be_bytes([m[0], m[1], m[2], m[3]])),
        Some(FAT_MAGIC | FAT_MAGIC_64)
    )
}

/// Byte range of the slice for `cpu`, or of the first slice when `cpu` is `None`.
pub fn select_slice(data: &[u8], cpu: Option<CpuType>) -> Result<Range<usize>> {
    if let Ok(fat) = MachOFatFile32::parse(data) {
        return pick(data, fat.arches(), cpu);
    }
    match MachOFatFile64::parse(data) {
        Ok(fat) => pick(data, fat.arches(), cpu),
        Err(err) => Err(DlError::InvalidFormat(format!("fat header: {err}"))),
    }
}

fn pick<A: FatArch>(data: &[u8], arches: &[A], cpu: Option<CpuType>) -> Result<Range<usize>> {
    let arch = match cpu {
        Some(cpu) => arches
            .iter()
            .find(|a| a.cputype() as i32 == cpu.0)
            .ok_or(DlError::NoMatchingArch { cputype: cpu.0 })?,
        None => arches
            .first()
            .ok_or_else(|| DlError::InvalidFormat("fat file without slices".to_string()))?,
    };
    let (offset, size) = arch.file_range();
    let truncated = || DlError::Truncated {
        offset,
        message: format!("slice of {size} bytes"),
    };
    arch.data(data).map_err(|_| truncated())?;
    let start = usize::try_from(offset).map_err(|_| truncated())?;
    let len = usize::try_from(size).map_err(|_| truncated())?;
    Ok(start..start + len)
}
