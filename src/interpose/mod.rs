//! Symbol rebinding across a set of images.
//!
//! Replacements are written into the symbol-pointer tables the dynamic
//! binder consults, one image at a time, by a [`Rebinder`]. Whether a
//! replacement took effect in an image is detected by poisoning each
//! rebinding's `replaced` slot with the slot's own address before the image
//! is processed: the rebinder stores the previous pointer there only when it
//! rewrote a reference, and no real pointer equals that address.

pub mod fishhook;

use crate::image::ImageSymbols;
use crate::loader::Handle;
use crate::logging::diagnostic;
use tracing::{debug, trace};

const INTERPOSABLE_ADVICE: &str = "No symbols replaced, have you added -Xlinker -interposable \
     to your project's \"Other Linker Flags\"?";

/// One requested replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rebinding {
    /// Symbol name without its leading underscore.
    pub name: String,
    pub replacement: usize,
    /// Previous pointer, written by the rebinder.
    pub replaced: usize,
}

impl Rebinding {
    pub fn new<S: Into<String>>(name: S, replacement: usize) -> Self {
        Rebinding {
            name: name.into(),
            replacement,
            replaced: 0,
        }
    }

    /// Value `replaced` holds while armed.
    pub fn sentinel(&self) -> usize {
        &self.replaced as *const usize as usize
    }

    pub fn arm(&mut self) {
        self.replaced = self.sentinel();
    }

    /// Whether the rebinder wrote `replaced` since the last [`arm`](Self::arm).
    pub fn took_effect(&self) -> bool {
        self.replaced != self.sentinel()
    }
}

/// Rewrites symbol references inside one mapped image.
pub trait Rebinder: Send + Sync {
    /// For every rebinding whose symbol the image references: point the
    /// references at `replacement` and store the previous pointer in
    /// `replaced`. Rebindings the image does not reference are left untouched.
    ///
    /// # Safety
    ///
    /// `header` must be the header of an image mapped into this process with
    /// load-time slide `slide`, and every `replacement` must be callable in
    /// place of the symbol it replaces.
    unsafe fn rebind_image(&self, header: usize, slide: isize, rebindings: &mut [Rebinding]);
}

impl ImageSymbols {
    /// Replace each named symbol with the symbol named alongside it, resolved
    /// in `scope`. Returns the names replaced in at least one member image.
    ///
    /// # Safety
    ///
    /// Each replacement must be callable in place of the symbol it replaces.
    pub unsafe fn rebind_names<S: AsRef<str>>(
        &self,
        pairs: &[(S, S)],
        scope: Handle,
        warn: bool,
    ) -> Vec<String> {
        let loader = self.process().loader();
        let mut names: Vec<&str> = Vec::with_capacity(pairs.len());
        let mut values: Vec<Option<usize>> = Vec::with_capacity(pairs.len());
        for (name, replacement) in pairs {
            let replacement = replacement.as_ref();
            match loader.lookup(scope, replacement) {
                Some(value) => {
                    names.push(name.as_ref());
                    values.push(Some(value));
                }
                None => diagnostic(&format!(
                    "Unable to find replacement for symbol: {replacement}"
                )),
            }
        }
        let replaced = self.rebind(&names, &values, false);
        if warn && replaced.is_empty() && !pairs.is_empty() {
            diagnostic(INTERPOSABLE_ADVICE);
        }
        replaced
    }

    /// [`rebind_names`](Self::rebind_names) in the default scope, warning as
    /// configured.
    ///
    /// # Safety
    ///
    /// Each replacement must be callable in place of the symbol it replaces.
    pub unsafe fn interpose<S: AsRef<str>>(&self, pairs: &[(S, S)]) -> Vec<String> {
        let warn = self.process().config().interpose.warn;
        self.rebind_names(pairs, Handle::DEFAULT, warn)
    }

    /// Replace `names[i]` with `values[i]`. Missing values are reported and
    /// skipped. Returns the names replaced in at least one member image.
    ///
    /// # Safety
    ///
    /// Each replacement must be callable in place of the symbol it replaces.
    pub unsafe fn rebind<S: AsRef<str>>(
        &self,
        names: &[S],
        values: &[Option<usize>],
        warn: bool,
    ) -> Vec<String> {
        let mut rebindings: Vec<Rebinding> = names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| match values.get(i).copied().flatten() {
                Some(replacement) => Some(Rebinding::new(name.as_ref(), replacement)),
                None => {
                    diagnostic(&format!(
                        "missing replacement at index {i} for symbol {}",
                        name.as_ref()
                    ));
                    None
                }
            })
            .collect();
        let replaced = self.rebind_batch(&mut rebindings);
        if warn && replaced.is_empty() && !names.is_empty() {
            diagnostic(INTERPOSABLE_ADVICE);
        }
        replaced
    }

    /// Run prepared rebindings over every mapped member image.
    ///
    /// Nothing is undone if a later image fails to take a replacement.
    ///
    /// # Safety
    ///
    /// Each replacement must be callable in place of the symbol it replaces.
    pub unsafe fn rebind_batch(&self, rebindings: &mut [Rebinding]) -> Vec<String> {
        let mut replaced: Vec<String> = Vec::new();
        if rebindings.is_empty() {
            return replaced;
        }
        let process = self.process();
        for number in self.image_numbers() {
            if !number.is_live() {
                trace!(image = number.0, "file images are not mapped, skipping");
                continue;
            }
            let _span = crate::span_trace!("rebind_image", image = number.0).entered();
            let header = process.live_header(number);
            let slide = process.loader().image_slide(number.0);
            for rebinding in rebindings.iter_mut() {
                rebinding.arm();
            }
            process.rebinder().rebind_image(header, slide, rebindings);
            for rebinding in rebindings.iter().filter(|r| r.took_effect()) {
                debug!(image = number.0, name = %rebinding.name, "rebound");
                if !replaced.contains(&rebinding.name) {
                    replaced.push(rebinding.name.clone());
                }
            }
        }
        replaced
    }
}
