//! Translation providers behind the dictionary.
//!
//! The on-device model is opaque: the engine only asks whether it supports a
//! pair, whether its weights are resident, and for a translation. The remote
//! side ships one implementation, `HttpTranslator`, a blocking JSON client for
//! a user-configured endpoint.

use crate::config::RemoteConfig;
use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A provider's answer: the best translation plus any alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTranslation {
    pub text: String,
    #[serde(default)]
    pub alternatives: Vec<String>,
}

pub trait OnDeviceModel: Send + Sync {
    fn supports_pair(&self, source_language: &str, target_language: &str) -> bool;

    /// Whether the model for the pair is downloaded and loadable now.
    fn is_model_resident(&self, source_language: &str, target_language: &str) -> bool;

    fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<ProviderTranslation, ProviderError>;

    /// Fetch the model for the pair. `progress` receives (bytes, total).
    fn download_model(
        &self,
        source_language: &str,
        target_language: &str,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<(), ProviderError>;
}

pub trait RemoteTranslator: Send + Sync {
    fn supports_pair(&self, source_language: &str, target_language: &str) -> bool;

    fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<ProviderTranslation, ProviderError>;
}

pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Connectivity flag set by the host application.
#[derive(Debug)]
pub struct StaticConnectivity(AtomicBool);

impl StaticConnectivity {
    pub fn new(online: bool) -> Self {
        Self(AtomicBool::new(online))
    }

    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::Relaxed);
    }
}

impl Connectivity for StaticConnectivity {
    fn is_online(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    source: &'a str,
    target: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translation: String,
    #[serde(default)]
    alternatives: Vec<String>,
}

/// Remote translation over HTTP.
///
/// Request: `POST <endpoint>` with `{"text", "source", "target"}` and an
/// optional bearer key. Response: `{"translation": "...", "alternatives": [...]}`.
pub struct HttpTranslator {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    languages: Vec<String>,
}

impl HttpTranslator {
    pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        languages: Vec<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            languages,
        })
    }

    /// Build from config; `None` while no endpoint is configured.
    pub fn from_config(config: &RemoteConfig) -> Result<Option<Self>, ProviderError> {
        let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.trim().is_empty()) else {
            return Ok(None);
        };
        let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(Self::DEFAULT_TIMEOUT_MS));
        Self::new(endpoint, config.api_key.clone(), timeout, config.languages.clone()).map(Some)
    }

    fn map_error(e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if let Some(status) = e.status() {
            if status.is_client_error() {
                ProviderError::Rejected(status.to_string())
            } else {
                ProviderError::Unavailable(status.to_string())
            }
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

impl RemoteTranslator for HttpTranslator {
    fn supports_pair(&self, source_language: &str, target_language: &str) -> bool {
        self.languages.is_empty()
            || (self.languages.iter().any(|l| l == source_language)
                && self.languages.iter().any(|l| l == target_language))
    }

    fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<ProviderTranslation, ProviderError> {
        let mut request = self.client.post(&self.endpoint).json(&TranslateRequest {
            text,
            source: source_language,
            target: target_language,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response: TranslateResponse = request
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(Self::map_error)?;

        let translation = response.translation.trim().to_string();
        if translation.is_empty() {
            return Err(ProviderError::Empty);
        }
        Ok(ProviderTranslation {
            text: translation,
            alternatives: response.alternatives,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_endpoint_yields_none() {
        assert!(HttpTranslator::from_config(&RemoteConfig::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn language_list_restricts_pairs() {
        let t = HttpTranslator::new(
            "http://127.0.0.1:9/translate",
            None,
            Duration::from_millis(100),
            vec!["es".into(), "en".into()],
        )
        .unwrap();
        assert!(t.supports_pair("es", "en"));
        assert!(!t.supports_pair("es", "xx"));

        let open = HttpTranslator::new("http://127.0.0.1:9/", None, Duration::from_millis(100), vec![])
            .unwrap();
        assert!(open.supports_pair("es", "xx"));
    }

    #[test]
    fn connectivity_flag_toggles() {
        let c = StaticConnectivity::new(false);
        assert!(!c.is_online());
        c.set_online(true);
        assert!(c.is_online());
    }

    #[test]
    #[ignore] // requires network access
    fn unreachable_endpoint_is_transient() {
        let t = HttpTranslator::new("http://127.0.0.1:9/", None, Duration::from_millis(200), vec![])
            .unwrap();
        let err = t.translate("hola", "es", "en").unwrap_err();
        assert!(err.is_transient());
    }
}
