//! Table layouts for the cycling dictionary.
//!
//! Two sides share the same three core tables:
//! - the pack archive (consumed): `word_groups`, `meanings`,
//!   `target_reverse_lookup` and an optional `pack_metadata` key/value table;
//! - the installed store (produced): the same tables plus a `pack_id` owner
//!   column and a `surface_forms` index for case-insensitive form matching.

use rusqlite::Connection;
use std::collections::HashSet;

pub const WORD_GROUPS: &str = "word_groups";
pub const MEANINGS: &str = "meanings";
pub const REVERSE_LOOKUP: &str = "target_reverse_lookup";
pub const PACK_METADATA: &str = "pack_metadata";

/// Separator for the `word_forms` column.
pub const FORM_SEPARATOR: char = '|';

/// Columns a pack archive must provide, per table.
pub const REQUIRED_ARCHIVE_COLUMNS: &[(&str, &[&str])] = &[
    (
        WORD_GROUPS,
        &[
            "id",
            "base_word",
            "word_forms",
            "part_of_speech",
            "source_language",
            "target_language",
        ],
    ),
    (
        MEANINGS,
        &[
            "id",
            "word_group_id",
            "meaning_order",
            "target_meaning",
            "context",
            "part_of_speech",
            "is_primary",
        ],
    ),
    (
        REVERSE_LOOKUP,
        &[
            "id",
            "target_word",
            "source_word_group_id",
            "source_meaning_id",
            "lookup_order",
            "quality_score",
        ],
    ),
];

/// Installed store layout.
pub const STORE_DDL: &str = "
CREATE TABLE IF NOT EXISTS word_groups (
    id INTEGER PRIMARY KEY,
    pack_id TEXT NOT NULL,
    base_word TEXT NOT NULL,
    word_forms TEXT NOT NULL DEFAULT '',
    part_of_speech TEXT,
    source_language TEXT NOT NULL,
    target_language TEXT NOT NULL,
    UNIQUE (base_word, source_language, target_language)
);
CREATE INDEX IF NOT EXISTS idx_word_groups_pack ON word_groups(pack_id);
CREATE INDEX IF NOT EXISTS idx_word_groups_pair ON word_groups(source_language, target_language);

CREATE TABLE IF NOT EXISTS surface_forms (
    form TEXT NOT NULL,
    word_group_id INTEGER NOT NULL REFERENCES word_groups(id) ON DELETE CASCADE,
    is_base INTEGER NOT NULL DEFAULT 0,
    UNIQUE (form, word_group_id)
);
CREATE INDEX IF NOT EXISTS idx_surface_forms_group ON surface_forms(word_group_id);

CREATE TABLE IF NOT EXISTS meanings (
    id INTEGER PRIMARY KEY,
    word_group_id INTEGER NOT NULL REFERENCES word_groups(id) ON DELETE CASCADE,
    meaning_order INTEGER NOT NULL,
    target_meaning TEXT NOT NULL,
    context TEXT,
    part_of_speech TEXT,
    is_primary INTEGER NOT NULL DEFAULT 0,
    UNIQUE (word_group_id, meaning_order)
);

CREATE TABLE IF NOT EXISTS target_reverse_lookup (
    id INTEGER PRIMARY KEY,
    target_word TEXT NOT NULL,
    source_word_group_id INTEGER NOT NULL REFERENCES word_groups(id) ON DELETE CASCADE,
    source_meaning_id INTEGER REFERENCES meanings(id) ON DELETE CASCADE,
    lookup_order INTEGER NOT NULL,
    quality_score INTEGER NOT NULL DEFAULT 100
);
CREATE INDEX IF NOT EXISTS idx_reverse_target ON target_reverse_lookup(target_word);
CREATE INDEX IF NOT EXISTS idx_reverse_group ON target_reverse_lookup(source_word_group_id);
CREATE INDEX IF NOT EXISTS idx_reverse_meaning ON target_reverse_lookup(source_meaning_id);
";

/// Archive layout, as written by the pack builder.
pub const ARCHIVE_DDL: &str = "
CREATE TABLE word_groups (
    id INTEGER PRIMARY KEY,
    base_word TEXT NOT NULL,
    word_forms TEXT,
    part_of_speech TEXT,
    source_language TEXT NOT NULL,
    target_language TEXT NOT NULL
);
CREATE TABLE meanings (
    id INTEGER PRIMARY KEY,
    word_group_id INTEGER NOT NULL,
    meaning_order INTEGER NOT NULL,
    target_meaning TEXT NOT NULL,
    context TEXT,
    part_of_speech TEXT,
    is_primary INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX idx_meanings_group ON meanings(word_group_id, meaning_order);
CREATE TABLE target_reverse_lookup (
    id INTEGER PRIMARY KEY,
    target_word TEXT NOT NULL,
    source_word_group_id INTEGER NOT NULL,
    source_meaning_id INTEGER,
    lookup_order INTEGER NOT NULL,
    quality_score INTEGER NOT NULL DEFAULT 100
);
CREATE TABLE pack_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Names of all tables in a database.
pub fn table_names(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(names)
}

/// Column names of `table`, empty when the table does not exist.
pub fn column_names(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
    // PRAGMA arguments cannot be bound; `table` only ever comes from the
    // constants above.
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(names)
}

/// Check that `conn` holds a cycling-dictionary archive.
///
/// Returns a human-readable description of the first mismatch.
pub fn verify_archive_schema(conn: &Connection) -> Result<(), String> {
    let tables = table_names(conn).map_err(|e| e.to_string())?;
    for (table, columns) in REQUIRED_ARCHIVE_COLUMNS {
        if !tables.contains(*table) {
            return Err(format!("missing table {table}"));
        }
        let present = column_names(conn, table).map_err(|e| e.to_string())?;
        let mut missing: Vec<&str> = columns
            .iter()
            .copied()
            .filter(|c| !present.contains(*c))
            .collect();
        if !missing.is_empty() {
            missing.sort_unstable();
            return Err(format!("table {table} lacks columns {}", missing.join(", ")));
        }
    }
    Ok(())
}

/// Read the optional `pack_metadata` table as key/value pairs.
pub fn read_pack_metadata(conn: &Connection) -> rusqlite::Result<Vec<(String, String)>> {
    if !table_names(conn)?.contains(PACK_METADATA) {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare("SELECT key, value FROM pack_metadata ORDER BY key")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Split a `word_forms` column value.
pub fn split_forms(raw: &str) -> Vec<String> {
    raw.split(FORM_SEPARATOR)
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}
