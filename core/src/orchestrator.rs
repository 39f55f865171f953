//! Translation routing.
//!
//! `translate` answers from the cache when it can, then walks an ordered list
//! of strategies (dictionary, on-device model, remote endpoint) until one
//! produces a translation. Successes are cached; total failure is reported in
//! the response, never raised.

use crate::cache::{CacheEntry, CacheKey, TranslationCache};
use crate::error::ProviderError;
use crate::lookup::{LookupEngine, LookupOutcome};
use crate::providers::{Connectivity, OnDeviceModel, ProviderTranslation, RemoteTranslator};
use crate::utils;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    Cache,
    Dictionary,
    OnDevice,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    SingleWord,
    /// Contains whitespace or sentence punctuation.
    MultiWord,
}

impl TextKind {
    pub fn classify(text: &str) -> Self {
        if utils::is_multi_word(text) {
            TextKind::MultiWord
        } else {
            TextKind::SingleWord
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TranslationRequest<'a> {
    /// NFC, trimmed.
    pub text: &'a str,
    pub source_language: &'a str,
    pub target_language: &'a str,
    pub kind: TextKind,
}

/// One step of the fallback chain.
pub trait TranslationStrategy: Send + Sync {
    fn provider(&self) -> Provider;

    fn accepts(&self, _kind: TextKind) -> bool {
        true
    }

    /// `Ok(None)` when the strategy does not apply (pair unsupported, model
    /// not resident, offline, no dictionary data).
    fn attempt(
        &self,
        request: &TranslationRequest<'_>,
    ) -> Result<Option<ProviderTranslation>, ProviderError>;
}

/// Single words through the installed packs.
pub struct DictionaryStrategy {
    lookup: Arc<LookupEngine>,
}

impl DictionaryStrategy {
    pub fn new(lookup: Arc<LookupEngine>) -> Self {
        Self { lookup }
    }
}

impl TranslationStrategy for DictionaryStrategy {
    fn provider(&self) -> Provider {
        Provider::Dictionary
    }

    fn accepts(&self, kind: TextKind) -> bool {
        kind == TextKind::SingleWord
    }

    fn attempt(
        &self,
        request: &TranslationRequest<'_>,
    ) -> Result<Option<ProviderTranslation>, ProviderError> {
        let outcome = self
            .lookup
            .lookup(request.text, request.source_language, request.target_language)
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        let LookupOutcome::Resolved(result) = outcome else {
            return Ok(None);
        };

        let mut texts: Vec<String> = if !result.forward.is_empty() {
            result.forward.into_iter().map(|m| m.target_meaning).collect()
        } else {
            result.reverse.into_iter().map(|m| m.source_word).collect()
        };
        texts.dedup();
        if texts.is_empty() {
            return Ok(None);
        }
        let text = texts.remove(0);
        texts.retain(|t| *t != text);
        Ok(Some(ProviderTranslation {
            text,
            alternatives: texts,
        }))
    }
}

pub struct OnDeviceStrategy {
    model: Arc<dyn OnDeviceModel>,
}

impl OnDeviceStrategy {
    pub fn new(model: Arc<dyn OnDeviceModel>) -> Self {
        Self { model }
    }
}

impl TranslationStrategy for OnDeviceStrategy {
    fn provider(&self) -> Provider {
        Provider::OnDevice
    }

    fn attempt(
        &self,
        request: &TranslationRequest<'_>,
    ) -> Result<Option<ProviderTranslation>, ProviderError> {
        let (from, to) = (request.source_language, request.target_language);
        if !self.model.supports_pair(from, to) || !self.model.is_model_resident(from, to) {
            return Ok(None);
        }
        self.model.translate(request.text, from, to).map(Some)
    }
}

pub struct RemoteStrategy {
    remote: Arc<dyn RemoteTranslator>,
    connectivity: Arc<dyn Connectivity>,
}

impl RemoteStrategy {
    pub fn new(remote: Arc<dyn RemoteTranslator>, connectivity: Arc<dyn Connectivity>) -> Self {
        Self {
            remote,
            connectivity,
        }
    }
}

impl TranslationStrategy for RemoteStrategy {
    fn provider(&self) -> Provider {
        Provider::Remote
    }

    fn attempt(
        &self,
        request: &TranslationRequest<'_>,
    ) -> Result<Option<ProviderTranslation>, ProviderError> {
        if !self.connectivity.is_online()
            || !self
                .remote
                .supports_pair(request.source_language, request.target_language)
        {
            return Ok(None);
        }
        self.remote
            .translate(request.text, request.source_language, request.target_language)
            .map(Some)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Skipped,
    Succeeded,
    Failed(ProviderError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub provider: Provider,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResponse {
    pub success: bool,
    pub translated_text: Option<String>,
    /// Who answered this call; `Cache` for cache hits.
    pub provider: Option<Provider>,
    /// Who produced the translation originally.
    pub origin: Option<Provider>,
    pub alternatives: Vec<String>,
    pub latency: Duration,
    pub attempts: Vec<StrategyAttempt>,
    pub error: Option<String>,
}

impl TranslationResponse {
    fn failure(error: String, attempts: Vec<StrategyAttempt>, started: Instant) -> Self {
        Self {
            success: false,
            translated_text: None,
            provider: None,
            origin: None,
            alternatives: Vec::new(),
            latency: started.elapsed(),
            attempts,
            error: Some(error),
        }
    }
}

pub struct TranslationOrchestrator {
    cache: Arc<TranslationCache>,
    strategies: Vec<Box<dyn TranslationStrategy>>,
}

impl TranslationOrchestrator {
    pub fn new(cache: Arc<TranslationCache>) -> Self {
        Self {
            cache,
            strategies: Vec::new(),
        }
    }

    /// Append a strategy to the end of the fallback chain.
    pub fn with_strategy(mut self, strategy: Box<dyn TranslationStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.strategies.iter().map(|s| s.provider()).collect()
    }

    pub fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> TranslationResponse {
        let started = Instant::now();
        let normalized = utils::normalize(text);
        if normalized.is_empty() {
            return TranslationResponse::failure("empty input".into(), Vec::new(), started);
        }

        let key = CacheKey::new(&normalized, source_language, target_language);
        if let Some(hit) = self.cache.get(&key) {
            return TranslationResponse {
                success: true,
                translated_text: Some(hit.translated_text),
                provider: Some(Provider::Cache),
                origin: Some(hit.provider),
                alternatives: hit.alternatives,
                latency: started.elapsed(),
                attempts: Vec::new(),
                error: None,
            };
        }

        let request = TranslationRequest {
            text: &normalized,
            source_language,
            target_language,
            kind: TextKind::classify(&normalized),
        };
        let mut attempts = Vec::with_capacity(self.strategies.len());
        let mut last_error: Option<ProviderError> = None;

        for strategy in &self.strategies {
            let provider = strategy.provider();
            if !strategy.accepts(request.kind) {
                attempts.push(StrategyAttempt {
                    provider,
                    outcome: AttemptOutcome::Skipped,
                });
                continue;
            }
            match strategy.attempt(&request) {
                Ok(Some(translation)) => {
                    attempts.push(StrategyAttempt {
                        provider,
                        outcome: AttemptOutcome::Succeeded,
                    });
                    self.cache.put(
                        key,
                        CacheEntry {
                            translated_text: translation.text.clone(),
                            provider,
                            alternatives: translation.alternatives.clone(),
                            last_access: 0,
                        },
                    );
                    tracing::debug!(?provider, source_language, target_language, "translated");
                    return TranslationResponse {
                        success: true,
                        translated_text: Some(translation.text),
                        provider: Some(provider),
                        origin: Some(provider),
                        alternatives: translation.alternatives,
                        latency: started.elapsed(),
                        attempts,
                        error: None,
                    };
                }
                Ok(None) => attempts.push(StrategyAttempt {
                    provider,
                    outcome: AttemptOutcome::Skipped,
                }),
                Err(e) => {
                    if e.is_transient() {
                        tracing::debug!(?provider, error = %e, "provider failed, falling through");
                    } else {
                        tracing::warn!(?provider, error = %e, "provider failed");
                    }
                    attempts.push(StrategyAttempt {
                        provider,
                        outcome: AttemptOutcome::Failed(e.clone()),
                    });
                    last_error = Some(e);
                }
            }
        }

        let error = match last_error {
            Some(e) => format!("no provider translated {source_language}->{target_language}: {e}"),
            None => format!("no provider available for {source_language}->{target_language}"),
        };
        TranslationResponse::failure(error, attempts, started)
    }
}
