//! An in-memory stand-in for the dynamic loader.

#![allow(dead_code)]

use super::macho::Built;
use dlscope::{AddressInfo, Handle, Loader};
use std::collections::HashMap;
use std::sync::Mutex;

const OPEN_HANDLE_BASE: isize = 0x1000;

#[derive(Debug, Clone)]
struct MockImage {
    path: String,
    header: usize,
    len: usize,
    /// Exported symbols and their absolute addresses, sorted by address.
    exports: Vec<(String, usize)>,
}

/// Images are leaked buffers; they stay mapped for the process lifetime.
#[derive(Debug, Default)]
pub struct MockLoader {
    images: Mutex<Vec<MockImage>>,
    main: Mutex<Option<String>>,
    frameworks: Option<String>,
    globals: Mutex<HashMap<String, usize>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frameworks(mut self, dir: &str) -> Self {
        self.frameworks = Some(dir.to_string());
        self
    }

    pub fn set_main(&self, path: &str) {
        *self.main.lock().unwrap() = Some(path.to_string());
    }

    /// Map `built` at a fresh address; returns its index and header.
    pub fn add_image(&self, path: &str, built: &Built) -> (u32, usize) {
        let leaked: &'static mut [u8] = Box::leak(built.bytes.clone().into_boxed_slice());
        let header = leaked.as_mut_ptr() as usize;
        let mut exports: Vec<(String, usize)> = built
            .exports
            .iter()
            .map(|(name, offset)| (name.clone(), header + *offset as usize))
            .collect();
        exports.sort_by_key(|(_, address)| *address);
        let mut images = self.images.lock().unwrap();
        images.push(MockImage {
            path: path.to_string(),
            header,
            len: leaked.len(),
            exports,
        });
        ((images.len() - 1) as u32, header)
    }

    /// Make `name` resolvable in the default scope without an image.
    pub fn define(&self, name: &str, address: usize) {
        self.globals
            .lock()
            .unwrap()
            .insert(name.to_string(), address);
    }

    fn image_lookup(image: &MockImage, name: &str) -> Option<usize> {
        image
            .exports
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, address)| *address)
    }
}

unsafe impl Loader for MockLoader {
    fn image_count(&self) -> u32 {
        self.images.lock().unwrap().len() as u32
    }

    fn image_header(&self, index: u32) -> usize {
        self.images.lock().unwrap()[index as usize].header
    }

    fn image_slide(&self, index: u32) -> isize {
        // __TEXT sits at vmaddr 0, so the slide is the header address.
        self.image_header(index) as isize
    }

    fn image_path(&self, index: u32) -> String {
        self.images.lock().unwrap()[index as usize].path.clone()
    }

    fn main_executable_path(&self) -> Option<String> {
        self.main.lock().unwrap().clone()
    }

    fn private_frameworks_path(&self) -> Option<String> {
        self.frameworks.clone()
    }

    fn open(&self, path: &str) -> Option<Handle> {
        let images = self.images.lock().unwrap();
        let index = images.iter().position(|image| image.path == path)?;
        Some(Handle(OPEN_HANDLE_BASE + index as isize))
    }

    fn lookup(&self, handle: Handle, name: &str) -> Option<usize> {
        let images = self.images.lock().unwrap();
        match handle {
            Handle::DEFAULT => images
                .iter()
                .find_map(|image| Self::image_lookup(image, name))
                .or_else(|| self.globals.lock().unwrap().get(name).copied()),
            Handle::MAIN_ONLY => {
                let main = self.main.lock().unwrap().clone()?;
                let image = images.iter().find(|image| image.path == main)?;
                Self::image_lookup(image, name)
            }
            Handle(h) => {
                let image = images.get(usize::try_from(h - OPEN_HANDLE_BASE).ok()?)?;
                Self::image_lookup(image, name)
            }
        }
    }

    fn address_info(&self, address: usize) -> Option<AddressInfo> {
        let images = self.images.lock().unwrap();
        let image = images
            .iter()
            .find(|image| (image.header..image.header + image.len).contains(&address))?;
        let nearest = image
            .exports
            .iter()
            .rev()
            .find(|(_, start)| *start <= address);
        Some(AddressInfo {
            path: image.path.clone(),
            image_base: image.header,
            name: nearest.map(|(name, _)| name.clone()),
            symbol_address: nearest.map(|(_, start)| *start).unwrap_or(0),
        })
    }
}
