// SPDX-License-Identifier: MIT

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::LayoutConfig;
use crate::error::*;

/// A document together with where it came from.
#[derive(Debug, Clone)]
pub struct SourcedConfig {
    /// Identity of the document; parents are looked up relative to it.
    pub origin: PathBuf,
    pub config: LayoutConfig,
}

/// Supplies layout documents by name.
pub trait ConfigSource {
    /// Loads `name`, referenced from the document at `referrer` (if any).
    fn load(&self, name: &str, referrer: Option<&Path>) -> LayoutResult<SourcedConfig>;
}

/// Reads documents from disk.
///
/// Names are looked up next to the referring document first, then in the
/// fallback directory.
#[derive(Debug, Clone, Default)]
pub struct FsSource {
    pub fallback_dir: Option<PathBuf>,
}

impl FsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fallback_dir = Some(dir.into());
        self
    }

    fn candidates(&self, name: &str, referrer: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(2);
        match referrer.and_then(Path::parent) {
            Some(dir) => paths.push(dir.join(name)),
            None => paths.push(PathBuf::from(name)),
        }
        if let Some(dir) = &self.fallback_dir {
            paths.push(dir.join(name));
        }
        paths
    }

    pub fn read_file(path: &Path) -> LayoutResult<LayoutConfig> {
        let text = fs::read_to_string(path).map_err(|e| {
            LayoutError::ConfigNotFound(format!("cannot read {}: {e}", path.display()))
        })?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let parsed = if is_toml {
            LayoutConfig::from_toml_str(&text)
        } else {
            LayoutConfig::from_json_str(&text)
        };
        parsed.map_err(|e| LayoutError::InvalidLayout(format!("{}: {}", path.display(), e.msg())))
    }
}

impl ConfigSource for FsSource {
    fn load(&self, name: &str, referrer: Option<&Path>) -> LayoutResult<SourcedConfig> {
        let candidates = self.candidates(name, referrer);
        let path = candidates
            .iter()
            .find(|path| path.is_file())
            .ok_or_else(|| {
                let tried: Vec<String> =
                    candidates.iter().map(|p| p.display().to_string()).collect();
                LayoutError::ConfigNotFound(format!(
                    "partition config {name} was not found (tried {})",
                    tried.join(", ")
                ))
            })?;
        log::debug!("loading layout document {}", path.display());
        Ok(SourcedConfig {
            origin: path.clone(),
            config: Self::read_file(path)?,
        })
    }
}

/// Documents held in memory, addressed by plain name.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    documents: BTreeMap<String, LayoutConfig>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, name: impl Into<String>, config: LayoutConfig) -> Self {
        self.documents.insert(name.into(), config);
        self
    }

    pub fn with_value(self, name: impl Into<String>, value: Value) -> LayoutResult<Self> {
        Ok(self.with_document(name, LayoutConfig::from_value(value)?))
    }
}

impl ConfigSource for MemorySource {
    fn load(&self, name: &str, _referrer: Option<&Path>) -> LayoutResult<SourcedConfig> {
        let config = self.documents.get(name).cloned().ok_or_else(|| {
            LayoutError::ConfigNotFound(format!("partition config {name} was not found"))
        })?;
        Ok(SourcedConfig {
            origin: PathBuf::from(name),
            config,
        })
    }
}
