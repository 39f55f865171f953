//! Cycling dictionary store.
//!
//! SQLite database holding word groups, their ordered meanings and the reverse
//! (target -> source) index for every installed pack.
//!
//! Access model:
//! - one writer connection behind a mutex; every write runs inside a single
//!   transaction via [`DictionaryStore::write`];
//! - read-only connections are pooled and handed out per query, so lookups
//!   keep running (WAL snapshot reads) while an import transaction is open.

use crate::error::StoreError;
use crate::schema::{self, STORE_DDL};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const MAX_IDLE_READERS: usize = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A word group as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordGroupRow {
    pub id: i64,
    pub pack_id: String,
    pub base_word: String,
    pub word_forms: Vec<String>,
    pub part_of_speech: Option<String>,
    pub source_language: String,
    pub target_language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeaningRow {
    pub id: i64,
    pub word_group_id: i64,
    pub meaning_order: u32,
    pub target_meaning: String,
    pub context: Option<String>,
    pub part_of_speech: Option<String>,
    pub is_primary: bool,
}

/// A reverse index row joined with the source word it points back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseRow {
    pub id: i64,
    pub target_word: String,
    pub word_group_id: i64,
    pub meaning_id: Option<i64>,
    pub lookup_order: u32,
    pub quality_score: i64,
    pub source_word: String,
    pub part_of_speech: Option<String>,
    pub gloss: Option<String>,
    pub context: Option<String>,
}

/// A surface-form match returned by partial search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormMatch {
    pub form: String,
    pub word_group_id: i64,
    pub base_word: String,
    pub part_of_speech: Option<String>,
}

/// A reverse-index match returned by partial search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetMatch {
    pub target_word: String,
    pub word_group_id: i64,
    pub source_word: String,
}

/// Row counts owned by one pack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackCounts {
    pub word_groups: u64,
    pub meanings: u64,
    pub reverse_entries: u64,
}

/// Result of a structural re-check of one pack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub counts: PackCounts,
    pub problems: Vec<String>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Values for a word group insert.
#[derive(Debug, Clone)]
pub struct NewWordGroup<'a> {
    pub pack_id: &'a str,
    pub base_word: &'a str,
    /// Inflected forms, not including the base word.
    pub forms: &'a [String],
    pub part_of_speech: Option<&'a str>,
    pub source_language: &'a str,
    pub target_language: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMeaning {
    pub meaning_order: u32,
    pub target_meaning: String,
    pub context: Option<String>,
    pub part_of_speech: Option<String>,
    pub is_primary: bool,
}

pub struct DictionaryStore {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for DictionaryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictionaryStore")
            .field("path", &self.path)
            .field("generation", &self.generation())
            .finish()
    }
}

impl DictionaryStore {
    /// Create or open the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(STORE_DDL)?;
        tracing::debug!(path = %path.display(), "opened dictionary store");
        Ok(Self {
            path,
            writer: Mutex::new(conn),
            readers: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Counter bumped after every committed write.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Run `f` inside one immediate transaction on the writer connection.
    ///
    /// Commits when `f` returns `Ok`; any `Err` drops the transaction, which
    /// rolls every statement of the attempt back.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.writer.lock().map_err(|_| E::from(StoreError::Poisoned))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| E::from(StoreError::Sqlite(e)))?;
        let value = f(&tx)?;
        tx.commit().map_err(|e| E::from(StoreError::Sqlite(e)))?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(value)
    }

    /// Run a read-only query on a pooled connection.
    pub fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.checkout()?;
        let result = f(&conn);
        self.checkin(conn);
        result.map_err(StoreError::from)
    }

    fn checkout(&self) -> Result<Connection, StoreError> {
        if let Some(conn) = self.readers.lock().map_err(|_| StoreError::Poisoned)?.pop() {
            return Ok(conn);
        }
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn checkin(&self, conn: Connection) {
        if let Ok(mut pool) = self.readers.lock() {
            if pool.len() < MAX_IDLE_READERS {
                pool.push(conn);
            }
        }
    }

    /// Remove every row owned by `pack_id` in one transaction.
    ///
    /// Meanings, reverse rows and surface forms go with their word groups
    /// through `ON DELETE CASCADE`. Returns the number of word groups removed.
    pub fn delete_pack(&self, pack_id: &str) -> Result<usize, StoreError> {
        let removed = self.write(|tx| delete_pack_rows(tx, pack_id))?;
        tracing::info!(pack_id, removed, "removed pack rows");
        Ok(removed)
    }

    /// Word groups of `pack_id` having `form` (already normalized) as a
    /// surface form, each with its meanings in cycle order.
    ///
    /// Groups whose base word is the form itself come first.
    pub fn forward_entries(
        &self,
        form: &str,
        source_language: &str,
        target_language: &str,
        pack_id: &str,
    ) -> Result<Vec<(WordGroupRow, Vec<MeaningRow>)>, StoreError> {
        self.read(|conn| {
            let mut groups_stmt = conn.prepare_cached(
                "SELECT g.id, g.pack_id, g.base_word, g.word_forms, g.part_of_speech,
                        g.source_language, g.target_language
                 FROM surface_forms f
                 JOIN word_groups g ON g.id = f.word_group_id
                 WHERE f.form = ?1 AND g.source_language = ?2
                   AND g.target_language = ?3 AND g.pack_id = ?4
                 ORDER BY f.is_base DESC, g.base_word, g.id",
            )?;
            let groups = groups_stmt
                .query_map(
                    params![form, source_language, target_language, pack_id],
                    word_group_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut out = Vec::with_capacity(groups.len());
            for group in groups {
                let meanings = meanings_for_group(conn, group.id)?;
                out.push((group, meanings));
            }
            Ok(out)
        })
    }

    /// Reverse rows for `target_word`, restricted to word groups of the
    /// `(source_language, target_language)` pair owned by `pack_id`.
    ///
    /// Ordered by quality score descending, then lookup order ascending.
    pub fn reverse_entries(
        &self,
        target_word: &str,
        source_language: &str,
        target_language: &str,
        pack_id: &str,
    ) -> Result<Vec<ReverseRow>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT r.id, r.target_word, r.source_word_group_id, r.source_meaning_id,
                        r.lookup_order, r.quality_score, g.base_word, g.part_of_speech,
                        m.target_meaning, m.context
                 FROM target_reverse_lookup r
                 JOIN word_groups g ON g.id = r.source_word_group_id
                 LEFT JOIN meanings m ON m.id = r.source_meaning_id
                 WHERE r.target_word = ?1 AND g.source_language = ?2
                   AND g.target_language = ?3 AND g.pack_id = ?4
                 ORDER BY r.quality_score DESC, r.lookup_order ASC, r.id ASC",
            )?;
            let rows = stmt
                .query_map(
                    params![target_word, source_language, target_language, pack_id],
                    |row| {
                        Ok(ReverseRow {
                            id: row.get(0)?,
                            target_word: row.get(1)?,
                            word_group_id: row.get(2)?,
                            meaning_id: row.get(3)?,
                            lookup_order: row.get(4)?,
                            quality_score: row.get(5)?,
                            source_word: row.get(6)?,
                            part_of_speech: row.get(7)?,
                            gloss: row.get(8)?,
                            context: row.get(9)?,
                        })
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Word groups with a surface form containing `needle`, one match per
    /// group carrying its shortest matching form. Shortest first, then
    /// lexicographic.
    pub fn search_forward(
        &self,
        needle: &str,
        source_language: &str,
        target_language: &str,
        pack_id: &str,
        limit: usize,
    ) -> Result<Vec<FormMatch>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT form, group_id, base_word, part_of_speech FROM (
                     SELECT f.form, g.id AS group_id, g.base_word, g.part_of_speech,
                            ROW_NUMBER() OVER (
                                PARTITION BY g.id ORDER BY length(f.form), f.form
                            ) AS form_rank
                     FROM surface_forms f
                     JOIN word_groups g ON g.id = f.word_group_id
                     WHERE instr(f.form, ?1) > 0 AND g.source_language = ?2
                       AND g.target_language = ?3 AND g.pack_id = ?4
                 )
                 WHERE form_rank = 1
                 ORDER BY length(form), form, group_id
                 LIMIT ?5",
            )?;
            let rows = stmt
                .query_map(
                    params![needle, source_language, target_language, pack_id, limit as i64],
                    |row| {
                        Ok(FormMatch {
                            form: row.get(0)?,
                            word_group_id: row.get(1)?,
                            base_word: row.get(2)?,
                            part_of_speech: row.get(3)?,
                        })
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Word groups reachable from a reverse-index word containing `needle`,
    /// one match per group carrying its shortest matching word. Shortest
    /// first, then lexicographic. `source_language`/`target_language` name
    /// the word group pair the index rows point into.
    pub fn search_reverse(
        &self,
        needle: &str,
        source_language: &str,
        target_language: &str,
        pack_id: &str,
        limit: usize,
    ) -> Result<Vec<TargetMatch>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT target_word, group_id, base_word FROM (
                     SELECT r.target_word, g.id AS group_id, g.base_word,
                            ROW_NUMBER() OVER (
                                PARTITION BY g.id ORDER BY length(r.target_word), r.target_word
                            ) AS form_rank
                     FROM target_reverse_lookup r
                     JOIN word_groups g ON g.id = r.source_word_group_id
                     WHERE instr(r.target_word, ?1) > 0 AND g.source_language = ?2
                       AND g.target_language = ?3 AND g.pack_id = ?4
                 )
                 WHERE form_rank = 1
                 ORDER BY length(target_word), target_word, base_word
                 LIMIT ?5",
            )?;
            let rows = stmt
                .query_map(
                    params![needle, source_language, target_language, pack_id, limit as i64],
                    |row| {
                        Ok(TargetMatch {
                            target_word: row.get(0)?,
                            word_group_id: row.get(1)?,
                            source_word: row.get(2)?,
                        })
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Look up one word group by identity.
    pub fn word_group(
        &self,
        base_word: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<Option<WordGroupRow>, StoreError> {
        self.read(|conn| {
            conn.query_row(
                "SELECT id, pack_id, base_word, word_forms, part_of_speech,
                        source_language, target_language
                 FROM word_groups
                 WHERE base_word = ?1 AND source_language = ?2 AND target_language = ?3",
                params![base_word, source_language, target_language],
                word_group_from_row,
            )
            .optional()
        })
    }

    pub fn pack_counts(&self, pack_id: &str) -> Result<PackCounts, StoreError> {
        self.read(|conn| pack_counts_on(conn, pack_id))
    }

    /// Distinct owners of word groups present in the store.
    pub fn pack_ids(&self) -> Result<Vec<String>, StoreError> {
        self.read(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT pack_id FROM word_groups ORDER BY pack_id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
    }

    /// Structural re-check of one pack's rows.
    pub fn check_integrity(&self, pack_id: &str) -> Result<IntegrityReport, StoreError> {
        self.read(|conn| {
            let counts = pack_counts_on(conn, pack_id)?;
            let mut problems = Vec::new();

            // Orders are unique per group (table constraint), so min == 1 and
            // max == count means dense.
            let sparse: i64 = conn.query_row(
                "SELECT COUNT(*) FROM (
                     SELECT m.word_group_id
                     FROM meanings m JOIN word_groups g ON g.id = m.word_group_id
                     WHERE g.pack_id = ?1
                     GROUP BY m.word_group_id
                     HAVING MIN(m.meaning_order) <> 1 OR MAX(m.meaning_order) <> COUNT(*)
                 )",
                [pack_id],
                |row| row.get(0),
            )?;
            if sparse > 0 {
                problems.push(format!("{sparse} word groups with non-dense meaning order"));
            }

            let empty: i64 = conn.query_row(
                "SELECT COUNT(*) FROM word_groups g
                 WHERE g.pack_id = ?1
                   AND NOT EXISTS (SELECT 1 FROM meanings m WHERE m.word_group_id = g.id)",
                [pack_id],
                |row| row.get(0),
            )?;
            if empty > 0 {
                problems.push(format!("{empty} word groups without meanings"));
            }

            let dangling: i64 = conn.query_row(
                "SELECT COUNT(*) FROM target_reverse_lookup r
                 JOIN word_groups g ON g.id = r.source_word_group_id
                 LEFT JOIN meanings m ON m.id = r.source_meaning_id
                 WHERE g.pack_id = ?1 AND r.source_meaning_id IS NOT NULL
                   AND (m.id IS NULL OR m.word_group_id <> r.source_word_group_id)",
                [pack_id],
                |row| row.get(0),
            )?;
            if dangling > 0 {
                problems.push(format!("{dangling} reverse rows point at foreign meanings"));
            }

            Ok(IntegrityReport { counts, problems })
        })
    }
}

fn word_group_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WordGroupRow> {
    let forms: String = row.get(3)?;
    Ok(WordGroupRow {
        id: row.get(0)?,
        pack_id: row.get(1)?,
        base_word: row.get(2)?,
        word_forms: schema::split_forms(&forms),
        part_of_speech: row.get(4)?,
        source_language: row.get(5)?,
        target_language: row.get(6)?,
    })
}

fn meanings_for_group(conn: &Connection, word_group_id: i64) -> rusqlite::Result<Vec<MeaningRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, word_group_id, meaning_order, target_meaning, context, part_of_speech, is_primary
         FROM meanings WHERE word_group_id = ?1 ORDER BY meaning_order",
    )?;
    let rows = stmt
        .query_map([word_group_id], |row| {
            Ok(MeaningRow {
                id: row.get(0)?,
                word_group_id: row.get(1)?,
                meaning_order: row.get(2)?,
                target_meaning: row.get(3)?,
                context: row.get(4)?,
                part_of_speech: row.get(5)?,
                is_primary: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn pack_counts_on(conn: &Connection, pack_id: &str) -> rusqlite::Result<PackCounts> {
    let word_groups: i64 = conn.query_row(
        "SELECT COUNT(*) FROM word_groups WHERE pack_id = ?1",
        [pack_id],
        |row| row.get(0),
    )?;
    let meanings: i64 = conn.query_row(
        "SELECT COUNT(*) FROM meanings m JOIN word_groups g ON g.id = m.word_group_id
         WHERE g.pack_id = ?1",
        [pack_id],
        |row| row.get(0),
    )?;
    let reverse_entries: i64 = conn.query_row(
        "SELECT COUNT(*) FROM target_reverse_lookup r
         JOIN word_groups g ON g.id = r.source_word_group_id
         WHERE g.pack_id = ?1",
        [pack_id],
        |row| row.get(0),
    )?;
    Ok(PackCounts {
        word_groups: word_groups as u64,
        meanings: meanings as u64,
        reverse_entries: reverse_entries as u64,
    })
}

/// Delete every word group owned by `pack_id` (cascading) on an open
/// transaction.
pub fn delete_pack_rows(conn: &Connection, pack_id: &str) -> Result<usize, StoreError> {
    Ok(conn.execute("DELETE FROM word_groups WHERE pack_id = ?1", [pack_id])?)
}

/// Insert a word group and its surface-form index rows.
///
/// The base word and every form are indexed lowercased (NFC), deduplicated.
pub fn insert_word_group(conn: &Connection, group: &NewWordGroup<'_>) -> rusqlite::Result<i64> {
    let joined = group.forms.join(&schema::FORM_SEPARATOR.to_string());
    conn.prepare_cached(
        "INSERT INTO word_groups
             (pack_id, base_word, word_forms, part_of_speech, source_language, target_language)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?
    .execute(params![
        group.pack_id,
        group.base_word,
        joined,
        group.part_of_speech,
        group.source_language,
        group.target_language,
    ])?;
    let id = conn.last_insert_rowid();

    let base_key = crate::utils::normalize_form(group.base_word);
    let mut form_stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO surface_forms (form, word_group_id, is_base) VALUES (?1, ?2, ?3)",
    )?;
    form_stmt.execute(params![base_key, id, true])?;
    for form in group.forms {
        let key = crate::utils::normalize_form(form);
        if !key.is_empty() && key != base_key {
            form_stmt.execute(params![key, id, false])?;
        }
    }
    Ok(id)
}

pub fn insert_meaning(
    conn: &Connection,
    word_group_id: i64,
    meaning: &NewMeaning,
) -> rusqlite::Result<i64> {
    conn.prepare_cached(
        "INSERT INTO meanings
             (word_group_id, meaning_order, target_meaning, context, part_of_speech, is_primary)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?
    .execute(params![
        word_group_id,
        meaning.meaning_order,
        meaning.target_meaning,
        meaning.context,
        meaning.part_of_speech,
        meaning.is_primary,
    ])?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_reverse(
    conn: &Connection,
    target_word: &str,
    word_group_id: i64,
    meaning_id: Option<i64>,
    lookup_order: u32,
    quality_score: i64,
) -> rusqlite::Result<i64> {
    conn.prepare_cached(
        "INSERT INTO target_reverse_lookup
             (target_word, source_word_group_id, source_meaning_id, lookup_order, quality_score)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?
    .execute(params![target_word, word_group_id, meaning_id, lookup_order, quality_score])?;
    Ok(conn.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(store: &DictionaryStore, pack_id: &str) {
        store
            .write(|tx| -> Result<(), StoreError> {
                let forms = vec!["aguas".to_string()];
                let gid = insert_word_group(
                    tx,
                    &NewWordGroup {
                        pack_id,
                        base_word: "agua",
                        forms: &forms,
                        part_of_speech: Some("noun"),
                        source_language: "es",
                        target_language: "en",
                    },
                )?;
                for (i, gloss) in ["water", "body of water", "rain"].iter().enumerate() {
                    let mid = insert_meaning(
                        tx,
                        gid,
                        &NewMeaning {
                            meaning_order: i as u32 + 1,
                            target_meaning: gloss.to_string(),
                            context: None,
                            part_of_speech: None,
                            is_primary: i == 0,
                        },
                    )?;
                    insert_reverse(tx, gloss, gid, Some(mid), 1, 100 - 10 * i as i64)?;
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn forward_match_is_case_insensitive_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let store = DictionaryStore::open(dir.path().join("d.sqlite")).unwrap();
        seed(&store, "es-en");

        let hits = store.forward_entries("aguas", "es", "en", "es-en").unwrap();
        assert_eq!(hits.len(), 1);
        let orders: Vec<u32> = hits[0].1.iter().map(|m| m.meaning_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert!(store.forward_entries("agua", "es", "en", "other").unwrap().is_empty());
    }

    #[test]
    fn search_matches_each_group_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = DictionaryStore::open(dir.path().join("d.sqlite")).unwrap();
        seed(&store, "es-en");

        let forms = store.search_forward("agua", "es", "en", "es-en", 10).unwrap();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].form, "agua");
        assert_eq!(forms[0].base_word, "agua");

        let targets = store.search_reverse("water", "es", "en", "es-en", 10).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].target_word, "water");
    }

    #[test]
    fn delete_pack_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let store = DictionaryStore::open(dir.path().join("d.sqlite")).unwrap();
        seed(&store, "es-en");
        assert_eq!(
            store.pack_counts("es-en").unwrap(),
            PackCounts {
                word_groups: 1,
                meanings: 3,
                reverse_entries: 3
            }
        );
        let generation = store.generation();

        assert_eq!(store.delete_pack("es-en").unwrap(), 1);
        assert_eq!(store.pack_counts("es-en").unwrap(), PackCounts::default());
        assert!(store.generation() > generation);
        assert!(store.reverse_entries("water", "es", "en", "es-en").unwrap().is_empty());
    }

    #[test]
    fn failed_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = DictionaryStore::open(dir.path().join("d.sqlite")).unwrap();
        let result: Result<(), StoreError> = store.write(|tx| {
            insert_word_group(
                tx,
                &NewWordGroup {
                    pack_id: "es-en",
                    base_word: "casa",
                    forms: &[],
                    part_of_speech: None,
                    source_language: "es",
                    target_language: "en",
                },
            )?;
            Err(StoreError::Poisoned)
        });
        assert!(result.is_err());
        assert_eq!(store.pack_counts("es-en").unwrap().word_groups, 0);
    }

    #[test]
    fn integrity_flags_sparse_orders() {
        let dir = tempfile::tempdir().unwrap();
        let store = DictionaryStore::open(dir.path().join("d.sqlite")).unwrap();
        seed(&store, "es-en");
        assert!(store.check_integrity("es-en").unwrap().is_ok());

        store
            .write(|tx| -> Result<(), StoreError> {
                tx.execute("DELETE FROM meanings WHERE meaning_order = 2", [])?;
                Ok(())
            })
            .unwrap();
        let report = store.check_integrity("es-en").unwrap();
        assert!(!report.is_ok());
        assert!(report.problems[0].contains("non-dense"));
    }
}
