//! [`Loader`] backed by dyld and the `dl*` family.

use super::{AddressInfo, Handle, Loader};
use crate::macho::MH_EXECUTE;
use libc::{c_char, c_void, dladdr, dlopen, dlsym, Dl_info, RTLD_LAZY};
use once_cell::sync::OnceCell;
use std::ffi::{CStr, CString};
use tracing::trace;

extern "C" {
    fn _dyld_image_count() -> u32;
    fn _dyld_get_image_header(index: u32) -> *const c_void;
    fn _dyld_get_image_name(index: u32) -> *const c_char;
    fn _dyld_get_image_vmaddr_slide(index: u32) -> isize;
}

unsafe fn c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // Safety: dyld and dladdr return NUL-terminated strings.
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// The live process, as dyld sees it.
#[derive(Debug, Default)]
pub struct DyldLoader {
    main_executable: OnceCell<Option<String>>,
}

impl DyldLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_main_executable(&self) -> Option<String> {
        for index in 0..self.image_count() {
            let header = self.image_header(index);
            if header == 0 {
                continue;
            }
            // Safety: dyld headers are mapped for the process lifetime.
            let filetype = unsafe { *((header + 12) as *const u32) };
            if filetype == MH_EXECUTE {
                return Some(self.image_path(index));
            }
        }
        let exe = std::env::current_exe().ok()?;
        Some(exe.to_string_lossy().into_owned())
    }
}

// Safety: dyld never unmaps the headers or segments of images it reports
// while they remain in its list, and dlclose is never called here.
unsafe impl Loader for DyldLoader {
    fn image_count(&self) -> u32 {
        unsafe { _dyld_image_count() }
    }

    fn image_header(&self, index: u32) -> usize {
        unsafe { _dyld_get_image_header(index) as usize }
    }

    fn image_slide(&self, index: u32) -> isize {
        unsafe { _dyld_get_image_vmaddr_slide(index) }
    }

    fn image_path(&self, index: u32) -> String {
        unsafe { c_string(_dyld_get_image_name(index)) }.unwrap_or_default()
    }

    fn main_executable_path(&self) -> Option<String> {
        self.main_executable
            .get_or_init(|| self.find_main_executable())
            .clone()
    }

    fn open(&self, path: &str) -> Option<Handle> {
        let cpath = CString::new(path).ok()?;
        let handle = unsafe { dlopen(cpath.as_ptr(), RTLD_LAZY) };
        if handle.is_null() {
            trace!(path, "dlopen failed");
            return None;
        }
        Some(Handle(handle as isize))
    }

    fn lookup(&self, handle: Handle, name: &str) -> Option<usize> {
        let cname = CString::new(name).ok()?;
        let address = unsafe { dlsym(handle.as_ptr(), cname.as_ptr()) };
        (!address.is_null()).then_some(address as usize)
    }

    fn address_info(&self, address: usize) -> Option<AddressInfo> {
        let mut info: Dl_info = unsafe { std::mem::zeroed() };
        if unsafe { dladdr(address as *const c_void, &mut info) } == 0 {
            return None;
        }
        Some(AddressInfo {
            path: unsafe { c_string(info.dli_fname) }?,
            image_base: info.dli_fbase as usize,
            name: unsafe { c_string(info.dli_sname) },
            symbol_address: info.dli_saddr as usize,
        })
    }
}
