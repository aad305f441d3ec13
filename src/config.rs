//! Configuration for dlscope.
//!
//! Provides the heuristics used to pick out application images, the
//! architecture chosen when slicing multi-architecture files and defaults
//! for the interposition engine. Every section falls back to sensible
//! defaults, so a partial JSON document is enough to override one value.

use crate::error::{DlError, Result};
use crate::macho::CpuType;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_ENV: &str = "DLSCOPE_CONFIG";

/// Master configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application-image selection.
    pub images: ImagesConfig,
    /// Standalone image files.
    pub files: FilesConfig,
    /// Interposition defaults.
    pub interpose: InterposeConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a JSON file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DlError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Load the file named by `DLSCOPE_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::from_path(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Path markers that classify an image as part of the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    /// Directory holding development build products.
    pub build_products_marker: String,
    /// Loadable bundle component; only counts inside build products.
    pub bundle_marker: String,
    /// Test bundle component.
    pub test_bundle_marker: String,
    /// Directory used for ad-hoc evaluation builds.
    pub evaluation_marker: String,
    /// Overrides the loader-reported private frameworks directory.
    pub private_frameworks: Option<String>,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            build_products_marker: "/DerivedData/".to_string(),
            bundle_marker: ".framework/".to_string(),
            test_bundle_marker: ".xctest/".to_string(),
            evaluation_marker: "/eval".to_string(),
            private_frameworks: None,
        }
    }
}

impl ImagesConfig {
    /// Whether a path matches the development-time markers.
    pub fn matches_markers(&self, path: &str) -> bool {
        let has = |marker: &str| !marker.is_empty() && path.contains(marker);
        (has(&self.build_products_marker) && has(&self.bundle_marker))
            || has(&self.test_bundle_marker)
            || has(&self.evaluation_marker)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Slice picked from multi-architecture files. Host CPU when unset.
    pub target_cpu: Option<CpuType>,
}

impl FilesConfig {
    pub fn cpu(&self) -> Option<CpuType> {
        self.target_cpu.or_else(CpuType::host)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterposeConfig {
    /// Advise about `-interposable` when a batch replaces nothing.
    pub warn: bool,
}

impl Default for InterposeConfig {
    fn default() -> Self {
        Self { warn: true }
    }
}
