//! [`Rebinder`] that rewrites lazy and non-lazy symbol pointers.
//!
//! Every `S_LAZY_SYMBOL_POINTERS`/`S_NON_LAZY_SYMBOL_POINTERS` section holds
//! one pointer per entry of the indirect symbol table starting at the
//! section's `reserved1`. A slot whose symbol name matches a rebinding is
//! pointed at the replacement.

use super::{Rebinder, Rebinding};
use crate::macho::{
    MachImage, Memory, Section, INDIRECT_SYMBOL_ABS, INDIRECT_SYMBOL_LOCAL, SEG_DATA_CONST,
};
use tracing::{debug, trace};

/// Segments whose pointer tables are rewritten. Only `__DATA_CONST` is
/// unprotected for the write; the other is writable as mapped.
const POINTER_SEGMENTS: &[&str] = &["__DATA", SEG_DATA_CONST];

#[derive(Debug, Clone, Copy, Default)]
pub struct Fishhook;

impl Fishhook {
    pub fn new() -> Self {
        Fishhook
    }
}

#[cfg(unix)]
struct Unprotect {
    page: usize,
    len: usize,
    restore: libc::c_int,
}

#[cfg(unix)]
impl Unprotect {
    /// Make `[start, start + len)` writable until dropped, then put back
    /// the protection the first page had.
    unsafe fn new(start: usize, len: usize) -> Option<Self> {
        let page_size = usize::try_from(libc::sysconf(libc::_SC_PAGESIZE)).ok()?;
        let page = start & !(page_size - 1);
        let len = (start + len - page).div_ceil(page_size) * page_size;
        // dyld maps __DATA_CONST read-only once binding is done
        let restore = protection_of(page).unwrap_or(libc::PROT_READ);
        let rc = libc::mprotect(page as *mut _, len, libc::PROT_READ | libc::PROT_WRITE);
        if rc != 0 {
            debug!(page = format_args!("{page:#x}"), "mprotect failed");
            return None;
        }
        Some(Unprotect { page, len, restore })
    }
}

#[cfg(unix)]
impl Drop for Unprotect {
    fn drop(&mut self) {
        if self.restore == libc::PROT_READ | libc::PROT_WRITE {
            return;
        }
        // Safety: the range was mapped when the guard was created.
        unsafe {
            libc::mprotect(self.page as *mut _, self.len, self.restore);
        }
    }
}

/// Current protection of the mapping containing `page`.
#[cfg(target_os = "linux")]
fn protection_of(page: usize) -> Option<libc::c_int> {
    let maps = std::fs::read_to_string("/proc/self/maps").ok()?;
    maps.lines().find_map(|line| {
        let mut fields = line.split_ascii_whitespace();
        let (start, end) = fields.next()?.split_once('-')?;
        let start = usize::from_str_radix(start, 16).ok()?;
        let end = usize::from_str_radix(end, 16).ok()?;
        if !(start..end).contains(&page) {
            return None;
        }
        let perms = fields.next()?.as_bytes();
        let mut prot = libc::PROT_NONE;
        for (flag, bit) in [(b'r', libc::PROT_READ), (b'w', libc::PROT_WRITE), (b'x', libc::PROT_EXEC)] {
            if perms.contains(&flag) {
                prot |= bit;
            }
        }
        Some(prot)
    })
}

/// Current protection of the region containing `page`, descending into
/// submaps such as the shared cache.
#[cfg(target_os = "macos")]
fn protection_of(page: usize) -> Option<libc::c_int> {
    use mach2::kern_return::KERN_SUCCESS;
    use mach2::traps::mach_task_self;
    use mach2::vm::mach_vm_region_recurse;
    use mach2::vm_region::{
        vm_region_recurse_info_t, vm_region_submap_short_info_data_64_t,
        VM_REGION_SUBMAP_SHORT_INFO_COUNT_64,
    };
    use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t, natural_t};

    let mut depth: natural_t = 0;
    loop {
        let mut address = page as mach_vm_address_t;
        let mut size: mach_vm_size_t = 0;
        let mut info = vm_region_submap_short_info_data_64_t::default();
        let mut count = VM_REGION_SUBMAP_SHORT_INFO_COUNT_64;
        // Safety: every out-pointer refers to a live local of the right type.
        let rc = unsafe {
            mach_vm_region_recurse(
                mach_task_self(),
                &mut address,
                &mut size,
                &mut depth,
                &mut info as *mut _ as vm_region_recurse_info_t,
                &mut count,
            )
        };
        if rc != KERN_SUCCESS || address > page as mach_vm_address_t {
            return None;
        }
        if info.is_submap != 0 {
            depth += 1;
            continue;
        }
        // VM_PROT_* share their values with PROT_*
        return Some(info.protection);
    }
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "macos"))))]
fn protection_of(_page: usize) -> Option<libc::c_int> {
    None
}

#[cfg(not(unix))]
struct Unprotect;

#[cfg(not(unix))]
impl Unprotect {
    unsafe fn new(_start: usize, _len: usize) -> Option<Self> {
        None
    }
}

unsafe fn rebind_section(
    image: &MachImage<'_>,
    section: &Section,
    slide: isize,
    rebindings: &mut [Rebinding],
) {
    let (Some(symbols), Some(indirect)) = (image.symbol_table(), image.indirect_symbols()) else {
        return;
    };
    let width = std::mem::size_of::<usize>();
    let count = section.size as usize / width;
    if count == 0 {
        return;
    }
    let slots = (section.addr as usize).wrapping_add_signed(slide) as *mut usize;

    let _guard = if section.segname == SEG_DATA_CONST {
        match Unprotect::new(slots as usize, count * width) {
            Some(guard) => Some(guard),
            None => return,
        }
    } else {
        None
    };

    for i in 0..count {
        let Some(symbol_index) = indirect.get(section.reserved1 as usize + i) else {
            break;
        };
        if symbol_index & (INDIRECT_SYMBOL_LOCAL | INDIRECT_SYMBOL_ABS) != 0 {
            continue;
        }
        let Some(nlist) = symbols.nlist(symbol_index) else {
            continue;
        };
        let name = symbols.name(nlist.n_strx);
        if name.is_empty() {
            continue;
        }
        let Some(rebinding) = rebindings.iter_mut().find(|r| r.name.as_bytes() == name) else {
            continue;
        };
        let slot = slots.add(i);
        // The previous value is recorded even when it already is the
        // replacement so that reapplying a batch reports the same names.
        rebinding.replaced = std::ptr::read_unaligned(slot);
        std::ptr::write_unaligned(slot, rebinding.replacement);
        trace!(
            name = %rebinding.name,
            slot = format_args!("{:#x}", slot as usize),
            "rebound slot"
        );
    }
}

impl Rebinder for Fishhook {
    unsafe fn rebind_image(&self, header: usize, slide: isize, rebindings: &mut [Rebinding]) {
        let image = match MachImage::parse(Memory::mapped(header)) {
            Ok(image) => image,
            Err(err) => {
                debug!(header = format_args!("{header:#x}"), %err, "cannot rebind image");
                return;
            }
        };
        if image.is_64() != (usize::BITS == 64)
            || image.is_little_endian() != cfg!(target_endian = "little")
        {
            debug!(header = format_args!("{header:#x}"), "image layout differs from the host");
            return;
        }
        let sections = image
            .segments()
            .iter()
            .filter(|seg| POINTER_SEGMENTS.contains(&seg.name.as_str()))
            .flat_map(|seg| seg.sections.iter())
            .filter(|section| section.is_symbol_pointers());
        for section in sections {
            rebind_section(&image, section, slide, rebindings);
        }
    }
}
