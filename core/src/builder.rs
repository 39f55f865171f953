//! Pack builder.
//!
//! Writes word groups in the archive layout (`schema::ARCHIVE_DDL`), records
//! the pack languages in `pack_metadata`, zips the store file and produces a
//! manifest with its size and SHA-256. Used by `packtool build` and by tests.
//!
//! Source documents are JSON:
//!
//! ```json
//! {
//!   "id": "es-en", "name": "Spanish -> English",
//!   "source_language": "es", "target_language": "en", "version": "1.0",
//!   "entries": [
//!     { "base_word": "agua", "forms": ["aguas"], "part_of_speech": "noun",
//!       "meanings": [{ "text": "water" }, { "text": "rain", "context": "poetic" }] }
//!   ]
//! }
//! ```

use crate::download::sha256_file;
use crate::error::PackError;
use crate::import::derived_quality;
use crate::manifest::{PackFile, PackManifest};
use crate::schema::{self, ARCHIVE_DDL};
use crate::utils;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

pub const ARCHIVE_SCHEMA_VERSION: &str = "2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderMeaning {
    pub text: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub part_of_speech: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderEntry {
    pub base_word: String,
    #[serde(default)]
    pub forms: Vec<String>,
    #[serde(default)]
    pub part_of_speech: Option<String>,
    pub meanings: Vec<BuilderMeaning>,
    /// Overrides the pack languages for this row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<(String, String)>,
}

impl BuilderEntry {
    pub fn new<I, S>(base_word: &str, meanings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            base_word: base_word.to_string(),
            forms: Vec::new(),
            part_of_speech: None,
            meanings: meanings
                .into_iter()
                .map(|m| BuilderMeaning {
                    text: m.into(),
                    context: None,
                    part_of_speech: None,
                })
                .collect(),
            languages: None,
        }
    }

    pub fn forms<I, S>(mut self, forms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.forms = forms.into_iter().map(Into::into).collect();
        self
    }

    pub fn part_of_speech(mut self, pos: &str) -> Self {
        self.part_of_speech = Some(pos.to_string());
        self
    }

    /// Attach a context note to the meaning at `order` (1-based).
    pub fn context(mut self, order: usize, context: &str) -> Self {
        if let Some(m) = order.checked_sub(1).and_then(|i| self.meanings.get_mut(i)) {
            m.context = Some(context.to_string());
        }
        self
    }

    pub fn languages(mut self, source: &str, target: &str) -> Self {
        self.languages = Some((source.to_string(), target.to_string()));
        self
    }
}

/// A JSON pack source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackSource {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub source_language: String,
    pub target_language: String,
    #[serde(default)]
    pub version: String,
    pub entries: Vec<BuilderEntry>,
}

/// A built archive and the manifest describing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPack {
    pub archive_path: PathBuf,
    pub manifest: PackManifest,
}

pub struct PackBuilder {
    id: String,
    name: String,
    source_language: String,
    target_language: String,
    version: String,
    entries: Vec<BuilderEntry>,
    reverse_index: bool,
    metadata: bool,
}

impl PackBuilder {
    pub fn new(id: &str, source_language: &str, target_language: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("{source_language} -> {target_language}"),
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
            version: "1.0".to_string(),
            entries: Vec::new(),
            reverse_index: true,
            metadata: true,
        }
    }

    pub fn from_source(source: PackSource) -> Self {
        let mut builder = Self::new(&source.id, &source.source_language, &source.target_language);
        if !source.name.is_empty() {
            builder.name = source.name;
        }
        if !source.version.is_empty() {
            builder.version = source.version;
        }
        builder.entries = source.entries;
        builder
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, PackError> {
        let content = std::fs::read_to_string(path)?;
        let source: PackSource = serde_json::from_str(&content)
            .map_err(|e| PackError::InvalidManifest(format!("pack source: {e}")))?;
        Ok(Self::from_source(source))
    }

    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = name.to_string();
        self
    }

    pub fn version(&mut self, version: &str) -> &mut Self {
        self.version = version.to_string();
        self
    }

    pub fn push(&mut self, entry: BuilderEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    /// Write `target_reverse_lookup` rows into the archive (default on).
    /// Without them the importer derives the index from glosses.
    pub fn include_reverse_index(&mut self, include: bool) -> &mut Self {
        self.reverse_index = include;
        self
    }

    /// Write the `pack_metadata` table (default on).
    pub fn include_metadata(&mut self, include: bool) -> &mut Self {
        self.metadata = include;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the archive-layout store file to `path`, replacing any file there.
    pub fn write_store(&self, path: &Path) -> Result<PathBuf, PackError> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path)?;
        conn.execute_batch(ARCHIVE_DDL)?;
        let tx = conn.transaction()?;

        if self.metadata {
            let mut stmt = tx.prepare("INSERT INTO pack_metadata (key, value) VALUES (?1, ?2)")?;
            for (key, value) in [
                ("pack_id", self.id.as_str()),
                ("source_language", self.source_language.as_str()),
                ("target_language", self.target_language.as_str()),
                ("schema_version", ARCHIVE_SCHEMA_VERSION),
                ("version", self.version.as_str()),
            ] {
                stmt.execute(params![key, value])?;
            }
        }

        for entry in &self.entries {
            let (source, target) = entry
                .languages
                .clone()
                .unwrap_or_else(|| (self.source_language.clone(), self.target_language.clone()));
            let forms = entry.forms.join(&schema::FORM_SEPARATOR.to_string());
            tx.execute(
                "INSERT INTO word_groups
                     (base_word, word_forms, part_of_speech, source_language, target_language)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![entry.base_word, forms, entry.part_of_speech, source, target],
            )?;
            let group_id = tx.last_insert_rowid();

            for (i, meaning) in entry.meanings.iter().enumerate() {
                let order = i as u32 + 1;
                tx.execute(
                    "INSERT INTO meanings
                         (word_group_id, meaning_order, target_meaning, context, part_of_speech, is_primary)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        group_id,
                        order,
                        meaning.text,
                        meaning.context,
                        meaning.part_of_speech,
                        order == 1
                    ],
                )?;
                let meaning_id = tx.last_insert_rowid();

                if self.reverse_index {
                    for (j, term) in utils::gloss_terms(&meaning.text).iter().enumerate() {
                        tx.execute(
                            "INSERT INTO target_reverse_lookup
                                 (target_word, source_word_group_id, source_meaning_id, lookup_order, quality_score)
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                            params![term, group_id, meaning_id, j as u32 + 1, derived_quality(order)],
                        )?;
                    }
                }
            }
        }
        tx.commit()?;
        Ok(path.to_path_buf())
    }

    /// Build `<out_dir>/<id>.sqlite.zip` and a manifest pointing at it.
    pub fn build(&self, out_dir: &Path) -> Result<BuiltPack, PackError> {
        std::fs::create_dir_all(out_dir)?;
        let staging = tempfile::tempdir_in(out_dir)?;
        let store_name = format!("{}.sqlite", self.id);
        let store_path = self.write_store(&staging.path().join(&store_name))?;
        let store_bytes = std::fs::metadata(&store_path)?.len();

        let archive_name = format!("{store_name}.zip");
        let archive_path = out_dir.join(&archive_name);
        let mut zip = zip::ZipWriter::new(File::create(&archive_path)?);
        zip.start_file(
            store_name.as_str(),
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        )?;
        std::io::copy(&mut File::open(&store_path)?, &mut zip)?;
        zip.finish()?;

        let archive_bytes = std::fs::metadata(&archive_path)?.len();
        let checksum = sha256_file(&archive_path)?;
        let absolute = std::fs::canonicalize(&archive_path)?;
        tracing::info!(
            pack_id = %self.id,
            entries = self.entries.len(),
            store_bytes,
            archive_bytes,
            "built pack"
        );

        Ok(BuiltPack {
            manifest: PackManifest {
                id: self.id.clone(),
                name: self.name.clone(),
                source_language: self.source_language.clone(),
                target_language: self.target_language.clone(),
                size_bytes: store_bytes,
                version: self.version.clone(),
                files: vec![PackFile {
                    name: archive_name,
                    url: format!("file://{}", absolute.display()),
                    size_bytes: archive_bytes,
                    checksum,
                }],
            },
            archive_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_archive_passes_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = PackBuilder::new("es-en", "es", "en");
        builder.push(BuilderEntry::new("agua", ["water", "body of water", "rain"]).forms(["aguas"]));
        let built = builder.build(dir.path()).unwrap();

        built.manifest.validate().unwrap();
        assert_eq!(built.manifest.files[0].name, "es-en.sqlite.zip");
        let plan = crate::archive::validate(&built.archive_path, &Default::default()).unwrap();
        assert_eq!(plan.name, "es-en.sqlite");
        assert_eq!(
            sha256_file(&built.archive_path).unwrap(),
            built.manifest.files[0].checksum
        );
    }

    #[test]
    fn store_carries_metadata_and_reverse_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = PackBuilder::new("es-en", "es", "en");
        builder.push(BuilderEntry::new("casa", ["house; home"]).context(1, "dwelling"));
        let path = builder.write_store(&dir.path().join("s.sqlite")).unwrap();

        let conn = Connection::open(&path).unwrap();
        schema::verify_archive_schema(&conn).unwrap();
        let meta = schema::read_pack_metadata(&conn).unwrap();
        assert!(meta.contains(&("source_language".to_string(), "es".to_string())));
        let words: Vec<String> = conn
            .prepare("SELECT target_word FROM target_reverse_lookup ORDER BY lookup_order")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(words, vec!["house", "home"]);
    }

    #[test]
    fn parses_json_source() {
        let source: PackSource = serde_json::from_str(
            r#"{"id": "es-en", "source_language": "es", "target_language": "en",
                "entries": [{"base_word": "agua", "meanings": [{"text": "water"}]}]}"#,
        )
        .unwrap();
        let builder = PackBuilder::from_source(source);
        assert_eq!(builder.len(), 1);
        assert_eq!(builder.version, "1.0");
    }
}
