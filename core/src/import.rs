//! Copy an extracted pack archive into the dictionary store.
//!
//! One transaction per attempt: the pack's previous rows are deleted first,
//! inside the same transaction, then word groups are copied in batches. A
//! cancel or a failure anywhere rolls the whole attempt back, so the previous
//! installation (if any) survives untouched.
//!
//! Each word group is copied under its own savepoint; a row that trips a
//! constraint is rolled back alone and counted as an error.

use crate::error::PackError;
use crate::installer::CancelToken;
use crate::manifest::PackManifest;
use crate::schema;
use crate::store::{self, DictionaryStore, NewMeaning, NewWordGroup};
use crate::utils;
use ahash::AHashMap;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStats {
    /// Word groups copied.
    pub inserted: u64,
    /// Rows left out as malformed: word groups with an empty word, the wrong
    /// pair or no meanings, and reverse rows with no usable ids.
    pub skipped: u64,
    /// Rows rejected by a store constraint.
    pub errors: u64,
    pub meanings: u64,
    pub reverse_entries: u64,
    /// The reverse index was built from glosses because the archive had none.
    pub reverse_derived: bool,
    /// Groups whose source primary flag disagreed with meaning order 1.
    pub primary_corrected: u64,
    /// Column values of an unexpected storage type that were converted or
    /// defaulted.
    pub coerced: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub batch_size: usize,
    pub progress_every_batches: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            batch_size: 500,
            progress_every_batches: 20,
        }
    }
}

struct SourceGroup {
    id: i64,
    coerced: u64,
    base_word: String,
    word_forms: Option<String>,
    part_of_speech: Option<String>,
    source_language: String,
    target_language: String,
}

struct SourceMeaning {
    id: i64,
    coerced: u64,
    target_meaning: String,
    context: Option<String>,
    part_of_speech: Option<String>,
    is_primary: bool,
}

/// Open an extracted archive read-only and check its layout against
/// `manifest`.
pub fn open_archive(path: &Path, manifest: &PackManifest) -> Result<Connection, PackError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| PackError::SchemaMismatch(format!("not a store file: {e}")))?;
    schema::verify_archive_schema(&conn).map_err(PackError::SchemaMismatch)?;

    for (key, value) in schema::read_pack_metadata(&conn)? {
        let expected = match key.as_str() {
            "source_language" => &manifest.source_language,
            "target_language" => &manifest.target_language,
            _ => continue,
        };
        if value != *expected {
            return Err(PackError::SchemaMismatch(format!(
                "pack metadata says {key} = {value}, manifest says {expected}"
            )));
        }
    }
    Ok(conn)
}

/// Import the archive at `path` as pack `manifest.id`.
///
/// `progress` receives (groups processed, groups total) every
/// `progress_every_batches` batches and once at the end.
pub fn import_pack(
    store: &DictionaryStore,
    path: &Path,
    manifest: &PackManifest,
    options: ImportOptions,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<ImportStats, PackError> {
    let source = open_archive(path, manifest)?;
    let total: i64 = source.query_row("SELECT COUNT(*) FROM word_groups", [], |row| row.get(0))?;
    let total = total as u64;
    let batch_size = options.batch_size.max(1);
    let every = options.progress_every_batches.max(1);

    let stats = store.write(|tx| -> Result<ImportStats, PackError> {
        let removed = store::delete_pack_rows(tx, &manifest.id)?;
        if removed > 0 {
            tracing::debug!(pack_id = %manifest.id, removed, "replacing previous rows");
        }

        let mut stats = ImportStats::default();
        let mut group_ids: AHashMap<i64, i64> = AHashMap::new();
        let mut meaning_ids: AHashMap<i64, i64> = AHashMap::new();
        let mut processed: u64 = 0;
        let mut batches: usize = 0;
        let mut last_id = i64::MIN;

        loop {
            if cancel.is_cancelled() {
                return Err(PackError::Cancelled);
            }
            let batch = read_group_batch(&source, last_id, batch_size)?;
            let Some(last) = batch.last() else {
                break;
            };
            last_id = last.id;

            for group in &batch {
                processed += 1;
                copy_group(
                    tx,
                    &source,
                    manifest,
                    group,
                    &mut stats,
                    &mut group_ids,
                    &mut meaning_ids,
                )?;
            }

            batches += 1;
            if batches % every == 0 {
                progress(processed, total);
            }
        }

        if stats.inserted == 0 {
            return Err(PackError::SchemaMismatch(format!(
                "pack {} has no usable word groups",
                manifest.id
            )));
        }

        let archived: i64 =
            source.query_row("SELECT COUNT(*) FROM target_reverse_lookup", [], |row| row.get(0))?;
        if archived > 0 {
            copy_reverse(tx, &source, &group_ids, &meaning_ids, batch_size, cancel, &mut stats)?;
        } else {
            derive_reverse(tx, &manifest.id, &mut stats)?;
        }

        progress(processed, total);
        Ok(stats)
    })?;

    tracing::info!(
        pack_id = %manifest.id,
        inserted = stats.inserted,
        skipped = stats.skipped,
        errors = stats.errors,
        reverse = stats.reverse_entries,
        derived = stats.reverse_derived,
        "import finished"
    );
    Ok(stats)
}

/// Column reads that accept whatever storage class an archive row holds.
///
/// SQLite does not enforce declared column types, so a pack built by another
/// tool can carry text in an integer column or a blob in a text column.
/// Values are converted where the meaning is clear and defaulted otherwise;
/// every such value is counted in `coerced`.
struct LenientRow<'a, 'r> {
    row: &'a Row<'r>,
    coerced: u64,
}

impl<'a, 'r> LenientRow<'a, 'r> {
    fn new(row: &'a Row<'r>) -> Self {
        Self { row, coerced: 0 }
    }

    fn text(&mut self, idx: usize) -> rusqlite::Result<Option<String>> {
        Ok(match self.row.get_ref(idx)? {
            ValueRef::Null => None,
            ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => {
                self.coerced += 1;
                Some(String::from_utf8_lossy(bytes).into_owned())
            }
            ValueRef::Integer(i) => {
                self.coerced += 1;
                Some(i.to_string())
            }
            ValueRef::Real(f) => {
                self.coerced += 1;
                Some(f.to_string())
            }
        })
    }

    /// `None` for NULL and for values with no integer reading.
    fn integer(&mut self, idx: usize) -> rusqlite::Result<Option<i64>> {
        Ok(match self.row.get_ref(idx)? {
            ValueRef::Null => None,
            ValueRef::Integer(i) => Some(i),
            ValueRef::Real(f) => {
                self.coerced += 1;
                f.is_finite().then(|| f.round() as i64)
            }
            ValueRef::Text(bytes) => {
                self.coerced += 1;
                std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.trim().parse().ok())
            }
            ValueRef::Blob(_) => {
                self.coerced += 1;
                None
            }
        })
    }

    fn flag(&mut self, idx: usize) -> rusqlite::Result<bool> {
        Ok(match self.row.get_ref(idx)? {
            ValueRef::Null => false,
            ValueRef::Integer(i) => i != 0,
            ValueRef::Real(f) => {
                self.coerced += 1;
                f != 0.0
            }
            ValueRef::Text(bytes) => {
                self.coerced += 1;
                let text = String::from_utf8_lossy(bytes).trim().to_ascii_lowercase();
                matches!(text.as_str(), "1" | "true" | "yes" | "y")
            }
            ValueRef::Blob(_) => {
                self.coerced += 1;
                false
            }
        })
    }
}

fn read_group_batch(
    source: &Connection,
    after_id: i64,
    limit: usize,
) -> rusqlite::Result<Vec<SourceGroup>> {
    let mut stmt = source.prepare_cached(
        "SELECT id, base_word, word_forms, part_of_speech, source_language, target_language
         FROM word_groups WHERE id > ?1 ORDER BY id LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![after_id, limit as i64], |row| {
            let mut cols = LenientRow::new(row);
            let base_word = cols.text(1)?.unwrap_or_default();
            let word_forms = cols.text(2)?;
            let part_of_speech = cols.text(3)?;
            let source_language = cols.text(4)?.unwrap_or_default();
            let target_language = cols.text(5)?.unwrap_or_default();
            Ok(SourceGroup {
                id: row.get(0)?,
                coerced: cols.coerced,
                base_word,
                word_forms,
                part_of_speech,
                source_language,
                target_language,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn read_meanings(source: &Connection, group_id: i64) -> rusqlite::Result<Vec<SourceMeaning>> {
    let mut stmt = source.prepare_cached(
        "SELECT id, target_meaning, context, part_of_speech, is_primary
         FROM meanings WHERE word_group_id = ?1 ORDER BY meaning_order, id",
    )?;
    let rows = stmt
        .query_map([group_id], |row| {
            let mut cols = LenientRow::new(row);
            let target_meaning = cols.text(1)?.unwrap_or_default();
            let context = cols.text(2)?;
            let part_of_speech = cols.text(3)?;
            let is_primary = cols.flag(4)?;
            Ok(SourceMeaning {
                id: row.get(0)?,
                coerced: cols.coerced,
                target_meaning,
                context,
                part_of_speech,
                is_primary,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| utils::normalize(&v))
        .filter(|v| !v.is_empty())
}

fn copy_group(
    tx: &Connection,
    source: &Connection,
    manifest: &PackManifest,
    group: &SourceGroup,
    stats: &mut ImportStats,
    group_ids: &mut AHashMap<i64, i64>,
    meaning_ids: &mut AHashMap<i64, i64>,
) -> Result<(), PackError> {
    stats.coerced += group.coerced;
    let base_word = utils::normalize(&group.base_word);
    if base_word.is_empty()
        || group.source_language != manifest.source_language
        || group.target_language != manifest.target_language
    {
        stats.skipped += 1;
        return Ok(());
    }

    let meanings: Vec<SourceMeaning> = read_meanings(source, group.id)?
        .into_iter()
        .inspect(|m| stats.coerced += m.coerced)
        .filter_map(|mut m| {
            m.target_meaning = utils::normalize(&m.target_meaning);
            (!m.target_meaning.is_empty()).then_some(m)
        })
        .collect();
    if meanings.is_empty() {
        stats.skipped += 1;
        return Ok(());
    }

    let forms: Vec<String> = group
        .word_forms
        .as_deref()
        .map(schema::split_forms)
        .unwrap_or_default()
        .into_iter()
        .map(|f| utils::normalize(&f))
        .filter(|f| *f != base_word)
        .collect();

    tx.execute_batch("SAVEPOINT import_group")?;
    let copied = (|| -> rusqlite::Result<(i64, Vec<(i64, i64)>)> {
        let new_group = store::insert_word_group(
            tx,
            &NewWordGroup {
                pack_id: &manifest.id,
                base_word: &base_word,
                forms: &forms,
                part_of_speech: group.part_of_speech.as_deref(),
                source_language: &group.source_language,
                target_language: &group.target_language,
            },
        )?;
        let mut ids = Vec::with_capacity(meanings.len());
        for (i, m) in meanings.iter().enumerate() {
            let order = i as u32 + 1;
            let new_meaning = store::insert_meaning(
                tx,
                new_group,
                &NewMeaning {
                    meaning_order: order,
                    target_meaning: m.target_meaning.clone(),
                    context: non_empty(m.context.clone()),
                    part_of_speech: non_empty(m.part_of_speech.clone()),
                    is_primary: order == 1,
                },
            )?;
            ids.push((m.id, new_meaning));
        }
        Ok((new_group, ids))
    })();

    match copied {
        Ok((new_group, ids)) => {
            tx.execute_batch("RELEASE import_group")?;
            group_ids.insert(group.id, new_group);
            meaning_ids.extend(ids);
            stats.inserted += 1;
            stats.meanings += meanings.len() as u64;
            let flagged = meanings.iter().position(|m| m.is_primary);
            if flagged.is_some_and(|p| p != 0) || meanings.iter().filter(|m| m.is_primary).count() > 1
            {
                stats.primary_corrected += 1;
                tracing::debug!(base_word = %base_word, "primary meaning reset to order 1");
            }
        }
        Err(e) => {
            tx.execute_batch("ROLLBACK TO import_group; RELEASE import_group")?;
            stats.errors += 1;
            tracing::warn!(base_word = %base_word, error = %e, "word group rejected");
        }
    }
    Ok(())
}

fn copy_reverse(
    tx: &Connection,
    source: &Connection,
    group_ids: &AHashMap<i64, i64>,
    meaning_ids: &AHashMap<i64, i64>,
    batch_size: usize,
    cancel: &CancelToken,
    stats: &mut ImportStats,
) -> Result<(), PackError> {
    let mut stmt = source.prepare(
        "SELECT target_word, source_word_group_id, source_meaning_id, lookup_order, quality_score
         FROM target_reverse_lookup ORDER BY id",
    )?;
    let mut rows = stmt.query([])?;
    let mut seen: usize = 0;
    while let Some(row) = rows.next()? {
        if seen % batch_size == 0 && cancel.is_cancelled() {
            return Err(PackError::Cancelled);
        }
        seen += 1;

        let mut cols = LenientRow::new(row);
        let target_word = cols.text(0)?;
        let group = cols.integer(1)?;
        let meaning = match row.get_ref(2)? {
            ValueRef::Null => Ok(None),
            _ => cols.integer(2)?.map(Some).ok_or(()),
        };
        let lookup_order = cols.integer(3)?;
        let quality = cols.integer(4)?;
        stats.coerced += cols.coerced;

        let (Some(group), Ok(meaning)) = (group, meaning) else {
            stats.skipped += 1;
            tracing::debug!(row = seen, "reverse row without a usable word group or meaning id");
            continue;
        };
        let word = utils::normalize_reverse_word(target_word.as_deref().unwrap_or_default());
        let Some(&new_group) = group_ids.get(&group) else {
            continue;
        };
        let new_meaning = match meaning {
            Some(id) => match meaning_ids.get(&id) {
                Some(&m) => Some(m),
                None => continue,
            },
            None => None,
        };
        if word.is_empty() {
            continue;
        }
        store::insert_reverse(
            tx,
            &word,
            new_group,
            new_meaning,
            lookup_order.unwrap_or(1).max(1) as u32,
            quality.unwrap_or(100),
        )?;
        stats.reverse_entries += 1;
    }
    Ok(())
}

/// Quality of a reverse row derived from the meaning at `rank` (1-based).
pub fn derived_quality(rank: u32) -> i64 {
    (100 - 10 * (rank as i64 - 1)).max(1)
}

fn derive_reverse(tx: &Connection, pack_id: &str, stats: &mut ImportStats) -> Result<(), PackError> {
    let mut stmt = tx.prepare(
        "SELECT m.id, m.word_group_id, m.meaning_order, m.target_meaning
         FROM meanings m JOIN word_groups g ON g.id = m.word_group_id
         WHERE g.pack_id = ?1 ORDER BY m.word_group_id, m.meaning_order",
    )?;
    let meanings = stmt
        .query_map([pack_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (meaning_id, group_id, rank, gloss) in meanings {
        for (i, term) in utils::gloss_terms(&gloss).iter().enumerate() {
            store::insert_reverse(
                tx,
                term,
                group_id,
                Some(meaning_id),
                i as u32 + 1,
                derived_quality(rank),
            )?;
            stats.reverse_entries += 1;
        }
    }
    stats.reverse_derived = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuilderEntry, PackBuilder};
    use crate::manifest::PackFile;

    fn manifest(id: &str) -> PackManifest {
        PackManifest {
            id: id.into(),
            name: id.into(),
            source_language: "es".into(),
            target_language: "en".into(),
            size_bytes: 0,
            version: "1".into(),
            files: vec![PackFile {
                name: format!("{id}.sqlite.zip"),
                url: String::new(),
                size_bytes: 0,
                checksum: String::new(),
            }],
        }
    }

    fn archive(dir: &Path, derive: bool) -> std::path::PathBuf {
        let mut builder = PackBuilder::new("es-en", "es", "en");
        builder.push(BuilderEntry::new("agua", ["water", "body of water", "rain"]).forms(["aguas"]));
        builder.push(BuilderEntry::new("casa", ["house", "home"]));
        builder.push(BuilderEntry::new("", ["nothing"]));
        builder.push(BuilderEntry::new("vacío", Vec::<String>::new()));
        builder.include_reverse_index(!derive);
        builder.write_store(&dir.join("es-en.sqlite")).unwrap()
    }

    #[test]
    fn imports_and_skips_malformed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = archive(dir.path(), true);
        let store = DictionaryStore::open(dir.path().join("d.sqlite")).unwrap();
        let mut last = (0, 0);
        let stats = import_pack(
            &store,
            &path,
            &manifest("es-en"),
            ImportOptions {
                batch_size: 1,
                progress_every_batches: 2,
            },
            &CancelToken::new(),
            &mut |done, total| last = (done, total),
        )
        .unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.meanings, 5);
        assert!(stats.reverse_derived);
        assert_eq!(last, (4, 4));

        let water = store.reverse_entries("water", "es", "en", "es-en").unwrap();
        assert_eq!(water[0].source_word, "agua");
        assert_eq!(water[0].quality_score, 100);
    }

    #[test]
    fn loosely_typed_columns_do_not_abort_the_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = archive(dir.path(), false);
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "UPDATE meanings SET is_primary = 'yes' WHERE target_meaning = 'house';
                 UPDATE meanings SET is_primary = 'sometimes' WHERE target_meaning = 'home';
                 UPDATE word_groups SET word_forms = CAST('aguas' AS BLOB) WHERE base_word = 'agua';
                 UPDATE target_reverse_lookup SET quality_score = 0.5 WHERE target_word = 'water';
                 UPDATE target_reverse_lookup SET source_word_group_id = 'casa'
                     WHERE target_word = 'house';",
            )
            .unwrap();
        }
        let store = DictionaryStore::open(dir.path().join("d.sqlite")).unwrap();
        let stats = import_pack(
            &store,
            &path,
            &manifest("es-en"),
            ImportOptions::default(),
            &CancelToken::new(),
            &mut |_, _| {},
        )
        .unwrap();

        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.meanings, 5);
        assert_eq!(stats.primary_corrected, 0);
        // Two flags, one blob, one real and one text id.
        assert_eq!(stats.coerced, 5);
        // Two malformed groups plus the reverse row with no usable group id.
        assert_eq!(stats.skipped, 3);

        let water = store.reverse_entries("water", "es", "en", "es-en").unwrap();
        assert_eq!(water[0].source_word, "agua");
        assert_eq!(water[0].quality_score, 1);
        assert!(store.reverse_entries("house", "es", "en", "es-en").unwrap().is_empty());
        let aguas = store.forward_entries("aguas", "es", "en", "es-en").unwrap();
        assert_eq!(aguas[0].0.base_word, "agua");
    }

    #[test]
    fn constraint_failures_roll_back_only_their_group() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = PackBuilder::new("es-en", "es", "en");
        builder.push(BuilderEntry::new("casa", ["house"]));
        builder.push(BuilderEntry::new("casa", ["home", "dwelling"]));
        builder.push(BuilderEntry::new("perro", ["dog"]));
        let path = builder.write_store(&dir.path().join("es-en.sqlite")).unwrap();

        let store = DictionaryStore::open(dir.path().join("d.sqlite")).unwrap();
        let stats = import_pack(
            &store,
            &path,
            &manifest("es-en"),
            ImportOptions::default(),
            &CancelToken::new(),
            &mut |_, _| {},
        )
        .unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.meanings, 2);

        let counts = store.pack_counts("es-en").unwrap();
        assert_eq!(counts.word_groups, 2);
        assert_eq!(counts.meanings, 2);
        let casa = store.forward_entries("casa", "es", "en", "es-en").unwrap();
        assert_eq!(casa.len(), 1);
        let meanings: Vec<&str> = casa[0].1.iter().map(|m| m.target_meaning.as_str()).collect();
        assert_eq!(meanings, vec!["house"]);
    }

    #[test]
    fn archived_reverse_rows_are_remapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = archive(dir.path(), false);
        let store = DictionaryStore::open(dir.path().join("d.sqlite")).unwrap();
        let stats = import_pack(
            &store,
            &path,
            &manifest("es-en"),
            ImportOptions::default(),
            &CancelToken::new(),
            &mut |_, _| {},
        )
        .unwrap();
        assert!(!stats.reverse_derived);
        let home = store.reverse_entries("home", "es", "en", "es-en").unwrap();
        assert_eq!(home.len(), 1);
        assert_eq!(home[0].source_word, "casa");
        assert_eq!(home[0].gloss.as_deref(), Some("home"));
    }

    #[test]
    fn cancelled_import_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = archive(dir.path(), true);
        let store = DictionaryStore::open(dir.path().join("d.sqlite")).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = import_pack(
            &store,
            &path,
            &manifest("es-en"),
            ImportOptions::default(),
            &cancel,
            &mut |_, _| {},
        )
        .unwrap_err();
        assert!(matches!(err, PackError::Cancelled));
        assert_eq!(store.pack_counts("es-en").unwrap().word_groups, 0);
    }

    #[test]
    fn metadata_language_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = archive(dir.path(), true);
        let mut wrong = manifest("es-en");
        wrong.target_language = "fr".into();
        assert!(matches!(
            open_archive(&path, &wrong),
            Err(PackError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn quality_decays_with_rank() {
        assert_eq!(derived_quality(1), 100);
        assert_eq!(derived_quality(3), 80);
        assert_eq!(derived_quality(50), 1);
    }
}
