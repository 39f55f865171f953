//! Pack manifests and the registry document listing available packs.
//!
//! ```json
//! {
//!   "schema_version": 2,
//!   "packs": [{
//!     "id": "es-en",
//!     "name": "Spanish -> English",
//!     "source_language": "es",
//!     "target_language": "en",
//!     "size_bytes": 48213,
//!     "version": "2.0",
//!     "files": [{
//!       "name": "es-en.sqlite.zip",
//!       "url": "https://packs.example/es-en.sqlite.zip",
//!       "size_bytes": 48213,
//!       "checksum": "9f86d0..."
//!     }]
//!   }]
//! }
//! ```

use crate::error::PackError;
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Registry documents older than this describe the retired flat layout.
pub const REGISTRY_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackFile {
    /// Plain file name, used inside the download directory.
    pub name: String,
    /// `http(s)://`, `file://` or a local path.
    pub url: String,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the file.
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackManifest {
    pub id: String,
    pub name: String,
    pub source_language: String,
    pub target_language: String,
    /// Storage charged against the quota once installed.
    pub size_bytes: u64,
    #[serde(default)]
    pub version: String,
    pub files: Vec<PackFile>,
}

impl PackManifest {
    pub fn from_json(content: &str) -> Result<Self, PackError> {
        let manifest: PackManifest = serde_json::from_str(content)
            .map_err(|e| PackError::InvalidManifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PackError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String, PackError> {
        serde_json::to_string_pretty(self).map_err(|e| PackError::InvalidManifest(e.to_string()))
    }

    /// Reject manifests whose identifiers or file names could escape the
    /// download directory, and files without a usable checksum.
    pub fn validate(&self) -> Result<(), PackError> {
        if !is_safe_name(&self.id) {
            return Err(PackError::InvalidManifest(format!("bad pack id {:?}", self.id)));
        }
        if self.source_language.trim().is_empty() || self.target_language.trim().is_empty() {
            return Err(PackError::InvalidManifest(format!(
                "pack {} is missing a language",
                self.id
            )));
        }
        if self.source_language == self.target_language {
            return Err(PackError::InvalidManifest(format!(
                "pack {} maps {} onto itself",
                self.id, self.source_language
            )));
        }
        if self.files.is_empty() {
            return Err(PackError::InvalidManifest(format!("pack {} lists no files", self.id)));
        }
        let mut names = AHashSet::with_capacity(self.files.len());
        for file in &self.files {
            if !is_safe_name(&file.name) {
                return Err(PackError::InvalidManifest(format!(
                    "bad file name {:?}",
                    file.name
                )));
            }
            // Files share one download directory.
            if !names.insert(file.name.to_lowercase()) {
                return Err(PackError::InvalidManifest(format!(
                    "pack {} lists {} twice",
                    self.id, file.name
                )));
            }
            if file.url.trim().is_empty() {
                return Err(PackError::InvalidManifest(format!("{} has no url", file.name)));
            }
            if file.checksum.len() != 64 || !file.checksum.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(PackError::InvalidManifest(format!(
                    "{} has no sha-256 checksum",
                    file.name
                )));
            }
        }
        Ok(())
    }

    /// Bytes to download across all files.
    pub fn download_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }

    pub fn serves(&self, source_language: &str, target_language: &str) -> bool {
        self.source_language == source_language && self.target_language == target_language
    }
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackRegistry {
    pub schema_version: u32,
    #[serde(default)]
    pub packs: Vec<PackManifest>,
}

impl PackRegistry {
    pub fn from_json(content: &str) -> Result<Self, PackError> {
        let registry: PackRegistry = serde_json::from_str(content)
            .map_err(|e| PackError::InvalidManifest(e.to_string()))?;
        if registry.schema_version < REGISTRY_SCHEMA_VERSION {
            return Err(PackError::InvalidManifest(format!(
                "registry schema {} is older than {}",
                registry.schema_version, REGISTRY_SCHEMA_VERSION
            )));
        }
        for pack in &registry.packs {
            pack.validate()?;
        }
        Ok(registry)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PackError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn find(&self, id: &str) -> Option<&PackManifest> {
        self.packs.iter().find(|p| p.id == id)
    }

    /// Packs serving `source_language -> target_language`.
    pub fn for_pair<'a>(
        &'a self,
        source_language: &'a str,
        target_language: &'a str,
    ) -> impl Iterator<Item = &'a PackManifest> + 'a {
        self.packs
            .iter()
            .filter(move |p| p.serves(source_language, target_language))
    }
}
