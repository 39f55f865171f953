//! polyread-core
//!
//! Bidirectional cycling dictionary engine and translation pipeline for a
//! language-learning reader.
//!
//! Components, leaf first:
//! - `PackStore` - installed-pack records, storage quota, LRU eviction (redb)
//! - `DictionaryStore` - word groups, ordered meanings, reverse index (SQLite)
//! - `LookupEngine` - forward/reverse lookup, meaning cycling, partial search
//! - `PackInstaller` / `InstallManager` - download, verify, extract, import
//! - `TranslationOrchestrator` - cache, dictionary, on-device and remote providers
//! - `DictionaryEngine` - facade owning all of the above for one data directory

pub mod error;
pub use error::{ErrorCategory, PackError, ProviderError, StoreError};

pub mod config;
pub use config::{ArchiveLimits, CacheConfig, Config, InstallerConfig, RemoteConfig, StorageConfig};

pub mod schema;

pub mod store;
pub use store::{DictionaryStore, IntegrityReport, MeaningRow, PackCounts, ReverseRow, WordGroupRow};

pub mod cycle;
pub use cycle::{CycleItem, MeaningCycle};

pub mod lookup;
pub use lookup::{
    ForwardMeaning, LookupEngine, LookupOutcome, LookupResult, MeaningEntry, ReverseMeaning,
    SearchHit,
};

pub mod pack_store;
pub use pack_store::{LanguagePackRecord, PackStore, PackUsage, RepairReport, StorageStatistics};

pub mod manifest;
pub use manifest::{PackFile, PackManifest, PackRegistry};

pub mod archive;
pub mod download;
pub use download::{FileFetcher, HttpFetcher, PackFetcher, RoutingFetcher};

pub mod import;
pub use import::{ImportOptions, ImportStats};

pub mod installer;
pub use installer::{
    CancelToken, FailureReason, InstallEvent, InstallHandle, InstallManager, InstallReport, InstallState,
    PackInstaller,
};

pub mod cache;
pub use cache::{CacheEntry, CacheKey, CacheStats, TranslationCache};

pub mod providers;
pub use providers::{
    Connectivity, HttpTranslator, OnDeviceModel, ProviderTranslation, RemoteTranslator,
    StaticConnectivity,
};

pub mod orchestrator;
pub use orchestrator::{
    AttemptOutcome, DictionaryStrategy, OnDeviceStrategy, Provider, RemoteStrategy, TextKind,
    TranslationOrchestrator, TranslationRequest, TranslationResponse, TranslationStrategy,
};

pub mod builder;
pub use builder::{BuilderEntry, BuiltPack, PackBuilder, PackSource};

pub mod engine;
pub use engine::{DictionaryEngine, Providers};

/// Text normalization shared by import, lookup and caching.
pub mod utils {
    use once_cell::sync::Lazy;
    use regex::Regex;
    use unicode_normalization::UnicodeNormalization;

    static QUALIFIERS: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]").expect("static regex"));
    static MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex"));
    static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

    /// Glosses derived per meaning when building the reverse index.
    pub const MAX_DERIVED_GLOSSES: usize = 10;

    /// Normalize input strings (NFC) and trim whitespace.
    pub fn normalize(s: &str) -> String {
        s.nfc().collect::<String>().trim().to_string()
    }

    /// Key for exact case-insensitive surface-form matching.
    pub fn normalize_form(s: &str) -> String {
        normalize(s).to_lowercase()
    }

    /// Cache key text: NFC, lowercase, runs of whitespace collapsed.
    pub fn normalize_cache_text(s: &str) -> String {
        SPACES.replace_all(&normalize_form(s), " ").into_owned()
    }

    /// Remove HTML-like tags.
    pub fn strip_markup(s: &str) -> String {
        MARKUP.replace_all(s, " ").into_owned()
    }

    /// Remove `(...)` and `[...]` qualifiers.
    pub fn strip_qualifiers(s: &str) -> String {
        QUALIFIERS.replace_all(s, " ").into_owned()
    }

    /// Normalize a target-language word for the reverse index.
    ///
    /// Lowercases, drops parenthetical and bracketed qualifiers and keeps only
    /// the part before the first comma: `"Water (liquid), H2O"` -> `"water"`.
    pub fn normalize_reverse_word(s: &str) -> String {
        let stripped = strip_qualifiers(&strip_markup(&normalize_form(s)));
        let first = stripped.split(',').next().unwrap_or_default();
        SPACES.replace_all(first.trim(), " ").into_owned()
    }

    /// Candidate reverse-index words from one gloss.
    ///
    /// Splits on `;`, `|`, `,` and newlines, normalizes each part and drops
    /// empties, duplicates and overlong phrases.
    pub fn gloss_terms(gloss: &str) -> Vec<String> {
        let cleaned = strip_qualifiers(&strip_markup(gloss));
        let mut terms: Vec<String> = Vec::new();
        for part in cleaned.split(|c| matches!(c, ';' | '|' | ',' | '\n')) {
            let term = normalize_reverse_word(part);
            if term.is_empty() || term.chars().count() > 64 || terms.contains(&term) {
                continue;
            }
            terms.push(term);
            if terms.len() == MAX_DERIVED_GLOSSES {
                break;
            }
        }
        terms
    }

    /// True when `text` contains whitespace or sentence punctuation.
    pub fn is_multi_word(text: &str) -> bool {
        normalize(text)
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '.' | '!' | '?' | ';' | ':' | ',' | '。' | '！' | '？' | '¿' | '¡'))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn reverse_word_keeps_first_part() {
            assert_eq!(normalize_reverse_word("Water (liquid), H2O"), "water");
            assert_eq!(normalize_reverse_word("  [arch.] Body  of water"), "body of water");
            assert_eq!(normalize_reverse_word("(only a qualifier)"), "");
        }

        #[test]
        fn gloss_terms_split_and_dedupe() {
            assert_eq!(
                gloss_terms("<b>water</b>; Water | rain (weather), drizzle"),
                vec!["water", "rain", "drizzle"]
            );
        }

        #[test]
        fn multi_word_detection() {
            assert!(!is_multi_word("  hola "));
            assert!(is_multi_word("buenos días"));
            assert!(is_multi_word("¡hola!"));
        }

        #[test]
        fn cache_text_collapses_whitespace() {
            assert_eq!(normalize_cache_text(" Buenos \t Días "), "buenos días");
            // NFD input normalizes to the same key.
            assert_eq!(normalize_cache_text("Di\u{301}as"), normalize_cache_text("Días"));
        }
    }
}
