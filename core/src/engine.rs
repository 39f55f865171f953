// core/src/engine.rs
//
// Consumer-facing facade: owns the stores, lookup engine, installer and
// translation pipeline for one data directory.

use crate::cache::{CacheStats, TranslationCache};
use crate::config::Config;
use crate::download::{PackFetcher, RoutingFetcher};
use crate::error::{PackError, ProviderError, StoreError};
use crate::installer::{InstallHandle, InstallManager, InstallReport, PackInstaller};
use crate::lookup::{LookupEngine, LookupOutcome, SearchHit};
use crate::manifest::PackManifest;
use crate::orchestrator::{
    DictionaryStrategy, OnDeviceStrategy, RemoteStrategy, TranslationOrchestrator,
    TranslationResponse,
};
use crate::pack_store::{LanguagePackRecord, PackStore, RepairReport, StorageStatistics};
use crate::providers::{Connectivity, HttpTranslator, OnDeviceModel, RemoteTranslator, StaticConnectivity};
use crate::store::{DictionaryStore, IntegrityReport};
use std::sync::Arc;
use std::time::Duration;

/// Pluggable collaborators. Everything defaults to what `Config` describes.
pub struct Providers {
    pub fetcher: Option<Arc<dyn PackFetcher>>,
    pub on_device: Option<Arc<dyn OnDeviceModel>>,
    pub remote: Option<Arc<dyn RemoteTranslator>>,
    pub connectivity: Arc<dyn Connectivity>,
}

impl Default for Providers {
    fn default() -> Self {
        Self {
            fetcher: None,
            on_device: None,
            remote: None,
            connectivity: Arc::new(StaticConnectivity::new(true)),
        }
    }
}

pub struct DictionaryEngine {
    config: Config,
    store: Arc<DictionaryStore>,
    packs: Arc<PackStore>,
    lookup: Arc<LookupEngine>,
    installs: InstallManager,
    translation_cache: Arc<TranslationCache>,
    orchestrator: TranslationOrchestrator,
    on_device: Option<Arc<dyn OnDeviceModel>>,
}

impl DictionaryEngine {
    /// Open with default providers: file/http fetching, and the remote
    /// endpoint from `config.remote` when one is set.
    pub fn open(config: Config) -> Result<Self, PackError> {
        Self::open_with(config, Providers::default())
    }

    pub fn open_with(config: Config, providers: Providers) -> Result<Self, PackError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store = Arc::new(DictionaryStore::open(config.dictionary_path())?);
        let packs = Arc::new(PackStore::open(
            config.pack_store_path(),
            Arc::clone(&store),
            config.storage.quota_bytes,
        )?);

        let report = packs.repair()?;
        if !report.is_clean() {
            tracing::warn!(?report, "startup repair changed pack state");
        }

        let lookup = Arc::new(LookupEngine::new(
            Arc::clone(&store),
            Arc::clone(&packs),
            config.cache.lookup_capacity,
        ));

        let fetcher: Arc<dyn PackFetcher> = match providers.fetcher {
            Some(f) => f,
            None => Arc::new(RoutingFetcher::new(Duration::from_secs(
                config.installer.download_timeout_secs,
            ))?),
        };
        let installs = InstallManager::new(PackInstaller::new(Arc::clone(&packs), fetcher, &config));

        let remote: Option<Arc<dyn RemoteTranslator>> = match providers.remote {
            Some(r) => Some(r),
            None => match HttpTranslator::from_config(&config.remote) {
                Ok(Some(t)) => Some(Arc::new(t)),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "remote translator disabled");
                    None
                }
            },
        };

        let translation_cache = Arc::new(TranslationCache::new(config.cache.translation_capacity));
        let mut orchestrator = TranslationOrchestrator::new(Arc::clone(&translation_cache))
            .with_strategy(Box::new(DictionaryStrategy::new(Arc::clone(&lookup))));
        if let Some(model) = &providers.on_device {
            orchestrator = orchestrator.with_strategy(Box::new(OnDeviceStrategy::new(Arc::clone(model))));
        }
        if let Some(remote) = remote {
            orchestrator = orchestrator.with_strategy(Box::new(RemoteStrategy::new(
                remote,
                Arc::clone(&providers.connectivity),
            )));
        }
        tracing::info!(
            data_dir = %config.data_dir.display(),
            providers = ?orchestrator.providers(),
            "dictionary engine ready"
        );

        Ok(Self {
            config,
            store,
            packs,
            lookup,
            installs,
            translation_cache,
            orchestrator,
            on_device: providers.on_device,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<DictionaryStore> {
        &self.store
    }

    pub fn pack_store(&self) -> &Arc<PackStore> {
        &self.packs
    }

    pub fn lookup(
        &self,
        query: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<LookupOutcome, StoreError> {
        self.lookup.lookup(query, source_language, target_language)
    }

    pub fn search(
        &self,
        needle: &str,
        source_language: &str,
        target_language: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        self.lookup.search(needle, source_language, target_language, limit)
    }

    pub fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> TranslationResponse {
        self.orchestrator.translate(text, source_language, target_language)
    }

    /// Start an install in the background.
    pub fn install(&self, manifest: PackManifest) -> Result<InstallHandle, PackError> {
        self.installs.install(manifest)
    }

    /// Install and wait for the attempt to end.
    pub fn install_blocking(&self, manifest: PackManifest) -> Result<InstallReport, PackError> {
        Ok(self.installs.install(manifest)?.wait())
    }

    pub fn cancel_install(&self, pack_id: &str) -> bool {
        self.installs.cancel(pack_id)
    }

    /// Remove a pack. Cached translations are dropped with it.
    pub fn remove_pack(&self, pack_id: &str) -> Result<usize, PackError> {
        let removed = self.installs.remove(pack_id)?;
        self.translation_cache.clear();
        Ok(removed)
    }

    pub fn is_installed(&self, pack_id: &str) -> Result<bool, StoreError> {
        self.installs.is_installed(pack_id)
    }

    pub fn packs(&self) -> Result<Vec<LanguagePackRecord>, StoreError> {
        self.packs.list()
    }

    pub fn set_active(&self, pack_id: &str, active: bool) -> Result<LanguagePackRecord, PackError> {
        self.packs.set_active(pack_id, active)
    }

    pub fn verify_pack(&self, pack_id: &str) -> Result<IntegrityReport, PackError> {
        self.packs.verify_pack(pack_id)
    }

    pub fn statistics(&self) -> Result<StorageStatistics, StoreError> {
        self.installs.statistics()
    }

    pub fn repair(&self) -> Result<RepairReport, PackError> {
        let report = self.packs.repair()?;
        if !report.is_clean() {
            self.translation_cache.clear();
        }
        Ok(report)
    }

    /// Fetch the on-device model for a pair.
    pub fn download_model(
        &self,
        source_language: &str,
        target_language: &str,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<(), ProviderError> {
        let model = self
            .on_device
            .as_ref()
            .ok_or_else(|| ProviderError::Unavailable("no on-device model configured".into()))?;
        if !model.supports_pair(source_language, target_language) {
            return Err(ProviderError::UnsupportedPair {
                from: source_language.to_string(),
                to: target_language.to_string(),
            });
        }
        model.download_model(source_language, target_language, progress)
    }

    /// Clear the translation and lookup caches.
    pub fn clear_cache(&self) {
        self.translation_cache.clear();
        self.lookup.clear_cache();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.translation_cache.stats()
    }

    /// (hits, misses) of the lookup result cache.
    pub fn lookup_cache_stats(&self) -> (u64, u64) {
        self.lookup.cache_stats()
    }
}
