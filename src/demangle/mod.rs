//! Demangler helpers for Swift, Rust and C++ (Itanium) symbols.
//!
//! Names arrive as stored in the symbol table with the C-level underscore
//! already removed, so Itanium names start with `_Z` and Swift names with
//! `$s`. Swift names are decoded by the Swift runtime when it is loaded into
//! the process; there is no Rust implementation of the Swift mangling.

use once_cell::sync::OnceCell;

/// Decodes symbol names into their source-level spelling.
pub trait Demangler: Send + Sync {
    /// `None` when the name is not mangled or not understood.
    fn demangle(&self, mangled: &[u8]) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolFlavor {
    Swift,
    Rust,
    Itanium,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemangleResult {
    pub original: String,
    pub demangled: String,
    pub flavor: SymbolFlavor,
}

fn is_swift_mangled(s: &str) -> bool {
    ["$s", "$S", "_T0", "$e"].iter().any(|p| s.starts_with(p))
}

fn is_itanium_mangled(s: &str) -> bool {
    s.starts_with("_Z")
}

type SwiftDemangleFn = unsafe extern "C" fn(
    mangled: *const libc::c_char,
    length: libc::size_t,
    output: *mut libc::c_char,
    output_size: *mut libc::size_t,
    flags: u32,
) -> *mut libc::c_char;

#[cfg(unix)]
fn swift_runtime() -> Option<SwiftDemangleFn> {
    static SWIFT_DEMANGLE: OnceCell<Option<usize>> = OnceCell::new();
    let address = (*SWIFT_DEMANGLE.get_or_init(|| {
        // Safety: dlsym with a NUL-terminated name has no other preconditions.
        let ptr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, b"swift_demangle\0".as_ptr().cast()) };
        (!ptr.is_null()).then_some(ptr as usize)
    }))?;
    // Safety: swift_demangle has had this signature since Swift 4.
    Some(unsafe { std::mem::transmute::<usize, SwiftDemangleFn>(address) })
}

#[cfg(not(unix))]
fn swift_runtime() -> Option<SwiftDemangleFn> {
    None
}

fn demangle_swift(s: &str) -> Option<String> {
    let demangle = swift_runtime()?;
    let mangled = std::ffi::CString::new(s).ok()?;
    // Safety: the runtime allocates the result with malloc; it is copied and freed here.
    unsafe {
        let out = demangle(
            mangled.as_ptr(),
            s.len(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        );
        if out.is_null() {
            return None;
        }
        let text = std::ffi::CStr::from_ptr(out).to_string_lossy().into_owned();
        libc::free(out.cast());
        Some(text)
    }
}

/// Attempt to demangle a single symbol. Returns None when not recognized.
pub fn demangle_one(s: &str) -> Option<DemangleResult> {
    // Swift, only when the runtime is present
    if is_swift_mangled(s) {
        if let Some(out) = demangle_swift(s) {
            return Some(DemangleResult {
                original: s.to_string(),
                demangled: out,
                flavor: SymbolFlavor::Swift,
            });
        }
    }
    // Rust (v0 + legacy) demangler
    if let Ok(dm) = rustc_demangle::try_demangle(s) {
        let out = dm.to_string();
        return Some(DemangleResult {
            original: s.to_string(),
            demangled: out,
            flavor: SymbolFlavor::Rust,
        });
    }
    // C++ (Itanium) demangler
    if is_itanium_mangled(s) {
        if let Ok(sym) = cpp_demangle::Symbol::new(s) {
            let out = sym.to_string();
            return Some(DemangleResult {
                original: s.to_string(),
                demangled: out,
                flavor: SymbolFlavor::Itanium,
            });
        }
    }
    None
}

/// Swift runtime, then Rust, then Itanium C++.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeDemangler;

impl NativeDemangler {
    pub fn new() -> Self {
        NativeDemangler
    }
}

impl Demangler for NativeDemangler {
    fn demangle(&self, mangled: &[u8]) -> Option<String> {
        let s = std::str::from_utf8(mangled).ok()?;
        demangle_one(s).map(|r| r.demangled)
    }
}
