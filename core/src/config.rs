//! Engine configuration.
//!
//! Loaded from TOML. Every section and field has a default so a partial file
//! (or none at all) is valid:
//!
//! ```toml
//! data_dir = "/var/lib/polyread"
//!
//! [storage]
//! quota_bytes = 268435456
//!
//! [installer]
//! max_concurrent_installs = 2
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for the dictionary store, the pack store and downloads.
    pub data_dir: PathBuf,
    pub storage: StorageConfig,
    pub installer: InstallerConfig,
    pub archive: ArchiveLimits,
    pub cache: CacheConfig,
    pub remote: RemoteConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("polyread-data"),
            storage: StorageConfig::default(),
            installer: InstallerConfig::default(),
            archive: ArchiveLimits::default(),
            cache: CacheConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Total bytes all installed packs may occupy.
    pub quota_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            quota_bytes: 512 * MIB,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Simultaneous pack installations (downloads included).
    pub max_concurrent_installs: usize,
    /// Word groups copied per import batch.
    pub import_batch_size: usize,
    /// Import progress is published every N batches.
    pub progress_every_batches: usize,
    /// Capacity of the per-install progress channel.
    pub event_channel_capacity: usize,
    /// Read size for streamed downloads.
    pub download_chunk_bytes: usize,
    pub download_timeout_secs: u64,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_installs: 3,
            import_batch_size: 500,
            progress_every_batches: 20,
            event_channel_capacity: 64,
            download_chunk_bytes: 64 * 1024,
            download_timeout_secs: 300,
        }
    }
}

/// Limits enforced on pack archives before anything is extracted.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArchiveLimits {
    /// Extensions recognised as a relational store file (lowercase, no dot).
    pub allowed_extensions: Vec<String>,
    pub max_file_bytes: u64,
    pub max_total_bytes: u64,
    pub max_entries: usize,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            allowed_extensions: vec!["sqlite".into(), "sqlite3".into(), "db".into()],
            max_file_bytes: 512 * MIB,
            max_total_bytes: 1024 * MIB,
            max_entries: 16,
        }
    }
}

impl ArchiveLimits {
    pub fn is_store_file(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.allowed_extensions.iter().any(|a| *a == e)
            })
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries kept by the translation cache.
    pub translation_capacity: usize,
    /// Entries kept by the lookup engine's result cache.
    pub lookup_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            translation_capacity: 1000,
            lookup_capacity: 256,
        }
    }
}

/// Remote translation endpoint. Disabled while `endpoint` is unset.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    /// Language codes the endpoint accepts. Empty means any.
    pub languages: Vec<String>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// A config rooted at `data_dir` with every other field defaulted.
    pub fn with_data_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn dictionary_path(&self) -> PathBuf {
        self.data_dir.join("dictionary.sqlite")
    }

    pub fn pack_store_path(&self) -> PathBuf {
        self.data_dir.join("packs.redb")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }
}
