//! The process being inspected: its loader, the collaborators symbol
//! queries depend on and the configuration they read.

use crate::config::Config;
use crate::demangle::{Demangler, NativeDemangler};
use crate::error::Result;
use crate::image::set::Selection;
use crate::image::{FileImage, ImageNumber, ImageSymbols};
use crate::interpose::{fishhook::Fishhook, Rebinder};
use crate::loader::Loader;
use crate::macho::{CpuType, MachImage, Memory};
use crate::symbols::TypeMask;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const SEG_PAGEZERO: &str = "__PAGEZERO";

pub struct Process {
    loader: Arc<dyn Loader>,
    demangler: Arc<dyn Demangler>,
    rebinder: Arc<dyn Rebinder>,
    config: Config,
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("image_count", &self.loader.image_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Process {
    /// A process answering from `loader`, with the native demangler, the
    /// pointer-table rebinder and default configuration.
    pub fn new(loader: Arc<dyn Loader>) -> Self {
        Process {
            loader,
            demangler: Arc::new(NativeDemangler::new()),
            rebinder: Arc::new(Fishhook::new()),
            config: Config::default(),
        }
    }

    /// The running process, configured from `DLSCOPE_CONFIG`.
    #[cfg(target_os = "macos")]
    pub fn native() -> Result<Arc<Self>> {
        let config = Config::from_env()?;
        let loader = Arc::new(crate::loader::dyld::DyldLoader::new());
        Ok(Arc::new(Process::new(loader).with_config(config)))
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_demangler(mut self, demangler: Arc<dyn Demangler>) -> Self {
        self.demangler = demangler;
        self
    }

    pub fn with_rebinder(mut self, rebinder: Arc<dyn Rebinder>) -> Self {
        self.rebinder = rebinder;
        self
    }

    pub fn loader(&self) -> &dyn Loader {
        self.loader.as_ref()
    }

    pub fn demangler(&self) -> &dyn Demangler {
        self.demangler.as_ref()
    }

    pub fn rebinder(&self) -> &dyn Rebinder {
        self.rebinder.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn image_count(&self) -> u32 {
        self.loader.image_count()
    }

    /// Header of a live image.
    ///
    /// # Panics
    ///
    /// When `number` is not below the current image count; reading past the
    /// loader's list would interpret unrelated memory as an image.
    pub(crate) fn live_header(&self, number: ImageNumber) -> usize {
        let count = self.loader.image_count();
        assert!(
            number.0 < count,
            "image number {} out of range, {} images loaded",
            number.0,
            count
        );
        self.loader.image_header(number.0)
    }

    pub(crate) fn live_path(&self, number: ImageNumber) -> String {
        self.loader.image_path(number.0)
    }

    pub(crate) fn all_numbers(&self) -> Vec<ImageNumber> {
        (0..self.loader.image_count()).map(ImageNumber).collect()
    }

    pub(crate) fn app_numbers(&self) -> Vec<ImageNumber> {
        let main = self.loader.main_executable_path();
        let frameworks = self
            .config
            .images
            .private_frameworks
            .clone()
            .or_else(|| self.loader.private_frameworks_path());
        self.all_numbers()
            .into_iter()
            .filter(|number| {
                let path = self.live_path(*number);
                main.as_deref() == Some(path.as_str())
                    || frameworks
                        .as_deref()
                        .is_some_and(|dir| !dir.is_empty() && path.starts_with(dir))
                    || self.config.images.matches_markers(&path)
            })
            .collect()
    }

    /// Every image currently loaded; membership is recomputed on each query.
    pub fn all_images(self: &Arc<Self>) -> ImageSymbols {
        ImageSymbols::new(Arc::clone(self), Selection::All, TypeMask::DEFAULT)
    }

    /// Images belonging to the application rather than the system.
    pub fn app_images(self: &Arc<Self>) -> ImageSymbols {
        ImageSymbols::new(Arc::clone(self), Selection::App, TypeMask::DEFAULT)
    }

    /// The main executable.
    ///
    /// # Panics
    ///
    /// When no loaded image has the loader-reported executable path.
    pub fn main_image(self: &Arc<Self>) -> ImageSymbols {
        let Some(exe) = self.loader.main_executable_path() else {
            panic!("loader reports no main executable");
        };
        let Some(number) = self
            .all_numbers()
            .into_iter()
            .find(|n| self.live_path(*n) == exe)
        else {
            panic!("main executable {exe} is not among the loaded images");
        };
        ImageSymbols::new(Arc::clone(self), Selection::Main(number), TypeMask::DEFAULT)
    }

    /// The most recently loaded image.
    pub fn last_image(self: &Arc<Self>) -> Option<ImageSymbols> {
        let count = self.loader.image_count();
        (count > 0).then(|| self.image(count - 1))
    }

    /// The live image at load index `index`.
    ///
    /// # Panics
    ///
    /// When `index` is not below the current image count.
    pub fn image(self: &Arc<Self>, index: u32) -> ImageSymbols {
        let number = ImageNumber(index);
        self.live_header(number);
        ImageSymbols::new(Arc::clone(self), Selection::Single(number), TypeMask::DEFAULT)
    }

    pub fn image_list(self: &Arc<Self>) -> Vec<ImageSymbols> {
        self.all_images().image_list()
    }

    pub fn image_map(self: &Arc<Self>) -> BTreeMap<String, ImageSymbols> {
        self.all_images().image_map()
    }

    /// The live image with a segment spanning `address`.
    pub fn image_containing(self: &Arc<Self>, address: usize) -> Option<ImageSymbols> {
        let address = address as i128;
        self.all_numbers().into_iter().find_map(|number| {
            let header = self.live_header(number);
            let slide = self.loader.image_slide(number.0) as i128;
            // Safety: the Loader contract keeps reported headers mapped.
            let image = MachImage::parse(unsafe { Memory::mapped(header) }).ok()?;
            image
                .segments()
                .iter()
                .filter(|seg| seg.vmsize != 0 && seg.name != SEG_PAGEZERO)
                .any(|seg| {
                    let start = seg.vmaddr as i128 + slide;
                    (start..start + seg.vmsize as i128).contains(&address)
                })
                .then(|| self.image(number.0))
        })
    }

    /// Read an image file, slicing fat containers for the configured CPU.
    pub fn file_image<P: AsRef<Path>>(self: &Arc<Self>, path: P) -> Result<ImageSymbols> {
        self.file_image_arch(path, self.config.files.cpu())
    }

    /// Read an image file, slicing fat containers for `cpu` (first slice when `None`).
    pub fn file_image_arch<P: AsRef<Path>>(
        self: &Arc<Self>,
        path: P,
        cpu: Option<CpuType>,
    ) -> Result<ImageSymbols> {
        let file = FileImage::open_arch(path, cpu)?;
        Ok(self.file_symbols(file))
    }

    /// Wrap an already opened file image.
    pub fn file_symbols(self: &Arc<Self>, file: FileImage) -> ImageSymbols {
        debug!(number = file.number().0, path = %file.path().display(), "file image");
        ImageSymbols::new(
            Arc::clone(self),
            Selection::File(Arc::new(file)),
            TypeMask::DEFAULT,
        )
    }
}
