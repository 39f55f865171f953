//! Installed-pack records and storage quota.
//!
//! Records live in a redb database, one bincode-encoded `LanguagePackRecord`
//! per pack id. The pack store also owns the runtime bookkeeping that guards
//! eviction: in-use counters taken by lookups and per-id locks taken by
//! install and remove.

use crate::error::{PackError, StoreError};
use crate::manifest::PackManifest;
use crate::store::{DictionaryStore, IntegrityReport, PackCounts};
use ahash::AHashMap;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

const PACKS: TableDefinition<&str, &[u8]> = TableDefinition::new("language_packs");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagePackRecord {
    pub id: String,
    pub name: String,
    pub source_language: String,
    pub target_language: String,
    pub size_bytes: u64,
    pub checksum: String,
    pub version: String,
    /// Unix millis.
    pub installed_at: Option<i64>,
    pub activated_at: Option<i64>,
    /// Strictly increasing across the store, so LRU order is total.
    pub last_used_at: i64,
    pub installed: bool,
    pub active: bool,
    pub broken: bool,
    pub counts: PackCounts,
}

impl LanguagePackRecord {
    /// A registered (not yet installed) record for `manifest`.
    pub fn from_manifest(manifest: &PackManifest) -> Self {
        Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            source_language: manifest.source_language.clone(),
            target_language: manifest.target_language.clone(),
            size_bytes: manifest.size_bytes,
            checksum: manifest
                .files
                .first()
                .map(|f| f.checksum.to_ascii_lowercase())
                .unwrap_or_default(),
            version: manifest.version.clone(),
            installed_at: None,
            activated_at: None,
            last_used_at: 0,
            installed: false,
            active: false,
            broken: false,
            counts: PackCounts::default(),
        }
    }

    /// Installed, not broken and switched on.
    pub fn is_serving(&self) -> bool {
        self.installed && self.active && !self.broken
    }

    pub fn serves(&self, source_language: &str, target_language: &str) -> bool {
        self.source_language == source_language && self.target_language == target_language
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStatistics {
    pub quota_bytes: u64,
    pub used_bytes: u64,
    /// Held by installs in flight.
    pub reserved_bytes: u64,
    pub installed_packs: usize,
    pub active_packs: usize,
    pub broken_packs: usize,
    pub total_word_groups: u64,
    pub total_meanings: u64,
    pub total_reverse_entries: u64,
    pub packs: Vec<LanguagePackRecord>,
}

impl StorageStatistics {
    pub fn available_bytes(&self) -> u64 {
        self.quota_bytes
            .saturating_sub(self.used_bytes)
            .saturating_sub(self.reserved_bytes)
    }
}

/// What a `repair` pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Broken packs reset to not-installed.
    pub cleared: Vec<String>,
    /// Pack ids whose rows had no installed record.
    pub orphans_purged: Vec<String>,
    /// Installed records whose rows had vanished.
    pub records_dropped: Vec<String>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.cleared.is_empty() && self.orphans_purged.is_empty() && self.records_dropped.is_empty()
    }
}

/// In-use marker for a pack. Eviction skips packs with live guards.
pub struct PackUsage<'a> {
    store: &'a PackStore,
    pack_id: String,
}

impl PackUsage<'_> {
    pub fn pack_id(&self) -> &str {
        &self.pack_id
    }
}

impl Drop for PackUsage<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_use) = self.store.in_use.lock() {
            if let Some(count) = in_use.get_mut(&self.pack_id) {
                *count -= 1;
                if *count == 0 {
                    in_use.remove(&self.pack_id);
                }
            }
        }
    }
}

pub struct PackStore {
    db: Database,
    path: PathBuf,
    dictionary: Arc<DictionaryStore>,
    quota_bytes: u64,
    clock: AtomicI64,
    in_use: Mutex<AHashMap<String, usize>>,
    locks: Mutex<AHashMap<String, Arc<Mutex<()>>>>,
    // Bytes held for installs in flight, by pack id. Its lock serializes
    // quota decisions.
    reserved: Mutex<AHashMap<String, u64>>,
}

impl PackStore {
    /// Create or open the pack database at `path`.
    pub fn open<P: AsRef<Path>>(
        path: P,
        dictionary: Arc<DictionaryStore>,
        quota_bytes: u64,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path.as_ref())?;
        let txn = db.begin_write()?;
        {
            txn.open_table(PACKS)?;
        }
        txn.commit()?;

        let store = Self {
            db,
            path: path.as_ref().to_path_buf(),
            dictionary,
            quota_bytes,
            clock: AtomicI64::new(0),
            in_use: Mutex::new(AHashMap::new()),
            locks: Mutex::new(AHashMap::new()),
            reserved: Mutex::new(AHashMap::new()),
        };
        let latest = store
            .list()?
            .iter()
            .map(|r| r.last_used_at)
            .max()
            .unwrap_or(0);
        store.clock.store(latest, Ordering::Release);
        tracing::debug!(path = %store.path.display(), quota_bytes, "opened pack store");
        Ok(store)
    }

    pub fn dictionary(&self) -> &Arc<DictionaryStore> {
        &self.dictionary
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    fn next_stamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let prev = self
            .clock
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| {
                Some(now.max(prev + 1))
            })
            .unwrap_or_else(|prev| prev);
        now.max(prev + 1)
    }

    pub fn get(&self, pack_id: &str) -> Result<Option<LanguagePackRecord>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PACKS)?;
        let record = match table.get(pack_id)? {
            Some(bytes) => Some(bincode::deserialize(bytes.value())?),
            None => None,
        };
        Ok(record)
    }

    /// All records, ordered by id.
    pub fn list(&self) -> Result<Vec<LanguagePackRecord>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PACKS)?;
        let mut out = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            out.push(bincode::deserialize::<LanguagePackRecord>(value.value())?);
        }
        Ok(out)
    }

    fn put(&self, record: &LanguagePackRecord) -> Result<(), StoreError> {
        let bytes = bincode::serialize(record)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(PACKS)?;
            table.insert(record.id.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn delete_record(&self, pack_id: &str) -> Result<bool, StoreError> {
        let txn = self.db.begin_write()?;
        let existed = {
            let mut table = txn.open_table(PACKS)?;
            let removed = table.remove(pack_id)?;
            removed.is_some()
        };
        txn.commit()?;
        Ok(existed)
    }

    /// Read-modify-write one record in a single write transaction.
    fn update<F>(&self, pack_id: &str, f: F) -> Result<Option<LanguagePackRecord>, StoreError>
    where
        F: FnOnce(&mut LanguagePackRecord),
    {
        let txn = self.db.begin_write()?;
        let updated = {
            let mut table = txn.open_table(PACKS)?;
            let current: Option<LanguagePackRecord> = match table.get(pack_id)? {
                Some(bytes) => Some(bincode::deserialize(bytes.value())?),
                None => None,
            };
            match current {
                Some(mut record) => {
                    f(&mut record);
                    let bytes = bincode::serialize(&record)?;
                    table.insert(pack_id, bytes.as_slice())?;
                    Some(record)
                }
                None => None,
            }
        };
        txn.commit()?;
        Ok(updated)
    }

    /// Record `manifest` as available. An existing record is left untouched so
    /// a reinstall keeps serving the previous installation until it succeeds.
    pub fn register(&self, manifest: &PackManifest) -> Result<LanguagePackRecord, StoreError> {
        if let Some(existing) = self.get(&manifest.id)? {
            return Ok(existing);
        }
        let mut record = LanguagePackRecord::from_manifest(manifest);
        record.last_used_at = self.next_stamp();
        self.put(&record)?;
        tracing::debug!(pack_id = %record.id, "registered pack");
        Ok(record)
    }

    /// Write or replace the record of a finished installation.
    pub fn register_installation(&self, mut record: LanguagePackRecord) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp_millis();
        record.installed = true;
        record.broken = false;
        record.installed_at.get_or_insert(now);
        record.last_used_at = self.next_stamp();
        self.put(&record)?;
        self.release_reservation(&record.id);
        tracing::info!(pack_id = %record.id, groups = record.counts.word_groups, "pack installed");
        Ok(())
    }

    /// Switch a pack on or off. Activating deactivates other packs serving
    /// the same pair.
    pub fn set_active(&self, pack_id: &str, active: bool) -> Result<LanguagePackRecord, PackError> {
        let record = self
            .get(pack_id)?
            .ok_or_else(|| PackError::UnknownPack(pack_id.to_string()))?;
        if active && !record.installed {
            return Err(PackError::UnknownPack(pack_id.to_string()));
        }
        if active && record.broken {
            return Err(PackError::Corrupted {
                pack_id: pack_id.to_string(),
                reason: "pack is flagged broken".into(),
            });
        }
        if active {
            for other in self.list()? {
                if other.id != pack_id
                    && other.active
                    && other.serves(&record.source_language, &record.target_language)
                {
                    self.update(&other.id, |r| r.active = false)?;
                    tracing::debug!(pack_id = %other.id, "deactivated in favour of {pack_id}");
                }
            }
        }
        let now = chrono::Utc::now().timestamp_millis();
        let updated = self
            .update(pack_id, |r| {
                r.active = active;
                if active {
                    r.activated_at = Some(now);
                }
            })?
            .ok_or_else(|| PackError::UnknownPack(pack_id.to_string()))?;
        Ok(updated)
    }

    pub fn is_installed(&self, pack_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .get(pack_id)?
            .map(|r| r.installed && !r.broken)
            .unwrap_or(false))
    }

    /// Bump the last-used stamp of `pack_id`. Unknown ids are ignored.
    pub fn update_usage(&self, pack_id: &str) -> Result<(), StoreError> {
        let stamp = self.next_stamp();
        self.update(pack_id, |r| r.last_used_at = stamp)?;
        Ok(())
    }

    /// The serving pack for `source_language -> target_language`, most
    /// recently activated first.
    pub fn active_pack_for(
        &self,
        source_language: &str,
        target_language: &str,
    ) -> Result<Option<LanguagePackRecord>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.is_serving() && r.serves(source_language, target_language))
            .max_by_key(|r| r.activated_at))
    }

    /// Mark `pack_id` in use and bump its last-used stamp.
    pub fn acquire(&self, pack_id: &str) -> Result<PackUsage<'_>, StoreError> {
        {
            let mut in_use = self.in_use.lock().map_err(|_| StoreError::Poisoned)?;
            *in_use.entry(pack_id.to_string()).or_insert(0) += 1;
        }
        let guard = PackUsage {
            store: self,
            pack_id: pack_id.to_string(),
        };
        self.update_usage(pack_id)?;
        Ok(guard)
    }

    pub fn is_in_use(&self, pack_id: &str) -> bool {
        self.in_use
            .lock()
            .map(|m| m.get(pack_id).copied().unwrap_or(0) > 0)
            .unwrap_or(true)
    }

    /// The lock serializing install and remove of `pack_id`.
    pub fn lock_pack(&self, pack_id: &str) -> Result<Arc<Mutex<()>>, StoreError> {
        let mut locks = self.locks.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(locks
            .entry(pack_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    fn used_bytes_excluding(&self, records: &[LanguagePackRecord], pack_id: &str) -> u64 {
        records
            .iter()
            .filter(|r| r.installed && r.id != pack_id)
            .map(|r| r.size_bytes)
            .sum()
    }

    /// Bytes that must be freed before `bytes` more fit for `pack_id`,
    /// counting installed packs and the reservations of other installs.
    fn bytes_to_free(
        &self,
        reserved: &AHashMap<String, u64>,
        records: &[LanguagePackRecord],
        pack_id: &str,
        bytes: u64,
    ) -> Result<u64, PackError> {
        if bytes > self.quota_bytes {
            return Err(PackError::InsufficientStorage {
                required: bytes,
                shortfall: bytes - self.quota_bytes,
            });
        }
        let held: u64 = reserved
            .iter()
            .filter(|(id, _)| id.as_str() != pack_id)
            .map(|(_, b)| *b)
            .sum();
        let used = self.used_bytes_excluding(records, pack_id).saturating_add(held);
        Ok(used.saturating_add(bytes).saturating_sub(self.quota_bytes))
    }

    /// Installed packs that may be evicted for `pack_id`, least recently used
    /// first.
    fn eviction_candidates<'r>(
        &self,
        reserved: &AHashMap<String, u64>,
        records: &'r [LanguagePackRecord],
        pack_id: &str,
    ) -> Vec<&'r LanguagePackRecord> {
        let mut candidates: Vec<&LanguagePackRecord> = records
            .iter()
            .filter(|r| {
                r.installed
                    && r.id != pack_id
                    && !reserved.contains_key(&r.id)
                    && !self.is_in_use(&r.id)
            })
            .collect();
        candidates.sort_by_key(|r| r.last_used_at);
        candidates
    }

    /// Whether `bytes` more fit under the quota without evicting anything.
    pub fn check_space_available(&self, bytes: u64) -> Result<bool, StoreError> {
        let held: u64 = self
            .reserved
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .values()
            .sum();
        let records = self.list()?;
        let used = self.used_bytes_excluding(&records, "").saturating_add(held);
        Ok(used.saturating_add(bytes) <= self.quota_bytes)
    }

    /// Check that `bytes` could be made to fit for `pack_id` without touching
    /// anything. Returns the number of bytes eviction would have to free.
    pub fn plan_space(&self, pack_id: &str, bytes: u64) -> Result<u64, PackError> {
        let reserved = self.reserved.lock().map_err(|_| StoreError::Poisoned)?;
        let records = self.list()?;
        let needed = self.bytes_to_free(&reserved, &records, pack_id, bytes)?;
        if needed == 0 {
            return Ok(0);
        }
        let evictable: u64 = self
            .eviction_candidates(&reserved, &records, pack_id)
            .iter()
            .map(|r| r.size_bytes)
            .sum();
        if evictable < needed {
            return Err(PackError::InsufficientStorage {
                required: bytes,
                shortfall: needed - evictable,
            });
        }
        Ok(needed)
    }

    /// Make room for `bytes` on behalf of `pack_id`, evicting least recently
    /// used packs, and reserve those bytes until the install is registered or
    /// `release_reservation` is called. The pack's own current installation
    /// is not counted since it will be replaced.
    ///
    /// Returns the evicted ids. Fails with `InsufficientStorage`, evicting
    /// nothing, when the request exceeds the quota or when the packs that can
    /// be locked for eviction would still not free enough.
    pub fn ensure_space(&self, pack_id: &str, bytes: u64) -> Result<Vec<String>, PackError> {
        let mut reserved = self.reserved.lock().map_err(|_| StoreError::Poisoned)?;
        let records = self.list()?;
        let needed = self.bytes_to_free(&reserved, &records, pack_id, bytes)?;

        let mut evicted = Vec::new();
        if needed > 0 {
            let candidates = self.eviction_candidates(&reserved, &records, pack_id);
            let locks = candidates
                .iter()
                .map(|r| self.lock_pack(&r.id))
                .collect::<Result<Vec<_>, _>>()?;

            let mut chosen = Vec::new();
            let mut planned = 0u64;
            for (record, lock) in candidates.iter().zip(&locks) {
                if planned >= needed {
                    break;
                }
                // Held by an install or remove of that pack.
                let Ok(held) = lock.try_lock() else {
                    continue;
                };
                if self.is_in_use(&record.id) {
                    continue;
                }
                planned += record.size_bytes;
                chosen.push((*record, held));
            }
            if planned < needed {
                return Err(PackError::InsufficientStorage {
                    required: bytes,
                    shortfall: needed - planned,
                });
            }

            for (record, _held) in chosen {
                self.teardown(&record.id)?;
                evicted.push(record.id.clone());
                tracing::info!(pack_id = %record.id, freed_bytes = record.size_bytes, "evicted pack");
            }
        }

        reserved.insert(pack_id.to_string(), bytes);
        Ok(evicted)
    }

    /// Drop the reservation `ensure_space` made for `pack_id`, if any.
    pub fn release_reservation(&self, pack_id: &str) {
        if let Ok(mut reserved) = self.reserved.lock() {
            reserved.remove(pack_id);
        }
    }

    pub fn reserved_bytes(&self) -> u64 {
        self.reserved
            .lock()
            .map(|r| r.values().sum())
            .unwrap_or(0)
    }

    fn teardown(&self, pack_id: &str) -> Result<usize, PackError> {
        let removed = self.dictionary.delete_pack(pack_id)?;
        self.delete_record(pack_id)?;
        Ok(removed)
    }

    /// Remove a pack's rows (one atomic cascade) and then its record.
    /// Returns the number of word groups removed.
    pub fn remove_language_pack(&self, pack_id: &str) -> Result<usize, PackError> {
        let lock = self.lock_pack(pack_id)?;
        let _held = lock.lock().map_err(|_| StoreError::Poisoned)?;
        if self.get(pack_id)?.is_none() {
            return Err(PackError::UnknownPack(pack_id.to_string()));
        }
        self.teardown(pack_id)
    }

    /// Structural re-check of an installed pack. Failure flags the pack
    /// broken and inactive.
    pub fn verify_pack(&self, pack_id: &str) -> Result<IntegrityReport, PackError> {
        let record = self
            .get(pack_id)?
            .ok_or_else(|| PackError::UnknownPack(pack_id.to_string()))?;
        let mut report = self.dictionary.check_integrity(pack_id)?;
        if record.installed && report.counts.word_groups != record.counts.word_groups {
            report.problems.push(format!(
                "expected {} word groups, found {}",
                record.counts.word_groups, report.counts.word_groups
            ));
        }
        if report.is_ok() {
            return Ok(report);
        }

        let reason = report.problems.join("; ");
        self.update(pack_id, |r| {
            r.broken = true;
            r.active = false;
        })?;
        tracing::warn!(pack_id, %reason, "pack failed verification");
        Err(PackError::Corrupted {
            pack_id: pack_id.to_string(),
            reason,
        })
    }

    /// Startup pass: clear broken packs, purge rows without an installed
    /// record and drop installed records whose rows vanished.
    pub fn repair(&self) -> Result<RepairReport, PackError> {
        let mut report = RepairReport::default();
        let records = self.list()?;

        for record in records.iter().filter(|r| r.broken) {
            self.dictionary.delete_pack(&record.id)?;
            self.update(&record.id, |r| {
                r.installed = false;
                r.active = false;
                r.broken = false;
                r.installed_at = None;
                r.activated_at = None;
                r.counts = PackCounts::default();
            })?;
            report.cleared.push(record.id.clone());
        }

        for pack_id in self.dictionary.pack_ids()? {
            let owned = records
                .iter()
                .any(|r| r.id == pack_id && r.installed && !r.broken);
            if !owned {
                self.dictionary.delete_pack(&pack_id)?;
                report.orphans_purged.push(pack_id);
            }
        }

        for record in records
            .iter()
            .filter(|r| r.installed && !r.broken && r.counts.word_groups > 0)
        {
            if self.dictionary.pack_counts(&record.id)?.word_groups == 0 {
                self.delete_record(&record.id)?;
                report.records_dropped.push(record.id.clone());
            }
        }

        if !report.is_clean() {
            tracing::info!(
                cleared = report.cleared.len(),
                orphans = report.orphans_purged.len(),
                dropped = report.records_dropped.len(),
                "repaired pack store"
            );
        }
        Ok(report)
    }

    pub fn statistics(&self) -> Result<StorageStatistics, StoreError> {
        let packs = self.list()?;
        let installed: Vec<&LanguagePackRecord> = packs.iter().filter(|r| r.installed).collect();
        Ok(StorageStatistics {
            quota_bytes: self.quota_bytes,
            used_bytes: installed.iter().map(|r| r.size_bytes).sum(),
            reserved_bytes: self.reserved_bytes(),
            installed_packs: installed.len(),
            active_packs: installed.iter().filter(|r| r.is_serving()).count(),
            broken_packs: packs.iter().filter(|r| r.broken).count(),
            total_word_groups: installed.iter().map(|r| r.counts.word_groups).sum(),
            total_meanings: installed.iter().map(|r| r.counts.meanings).sum(),
            total_reverse_entries: installed.iter().map(|r| r.counts.reverse_entries).sum(),
            packs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PackFile;

    fn open(dir: &Path, quota: u64) -> PackStore {
        let dictionary = Arc::new(DictionaryStore::open(dir.join("d.sqlite")).unwrap());
        PackStore::open(dir.join("packs.redb"), dictionary, quota).unwrap()
    }

    fn manifest(id: &str, size: u64) -> PackManifest {
        PackManifest {
            id: id.into(),
            name: id.into(),
            source_language: id[..2].into(),
            target_language: id[3..].into(),
            size_bytes: size,
            version: "1".into(),
            files: vec![PackFile {
                name: format!("{id}.sqlite.zip"),
                url: format!("file:///{id}.sqlite.zip"),
                size_bytes: size,
                checksum: "0".repeat(64),
            }],
        }
    }

    fn install(store: &PackStore, id: &str, size: u64) {
        store
            .register_installation(LanguagePackRecord::from_manifest(&manifest(id, size)))
            .unwrap();
    }

    #[test]
    fn register_keeps_existing_installation() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 1000);
        install(&store, "es-en", 100);
        store.register(&manifest("es-en", 200)).unwrap();
        let record = store.get("es-en").unwrap().unwrap();
        assert!(record.installed);
        assert_eq!(record.size_bytes, 100);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn usage_stamps_are_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 1000);
        install(&store, "es-en", 10);
        install(&store, "fr-en", 10);
        store.update_usage("es-en").unwrap();
        store.update_usage("fr-en").unwrap();
        let a = store.get("es-en").unwrap().unwrap().last_used_at;
        let b = store.get("fr-en").unwrap().unwrap().last_used_at;
        assert!(b > a);
    }

    #[test]
    fn eviction_follows_lru_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 300);
        install(&store, "es-en", 100);
        install(&store, "fr-en", 100);
        install(&store, "de-en", 100);
        // es-en becomes the most recently used.
        store.update_usage("es-en").unwrap();

        let evicted = store.ensure_space("it-en", 150).unwrap();
        assert_eq!(evicted, vec!["fr-en".to_string(), "de-en".to_string()]);
        assert!(store.is_installed("es-en").unwrap());
        // it-en now holds 150 of the remaining 200.
        assert!(!store.check_space_available(100).unwrap());
        store.release_reservation("it-en");
        assert!(store.check_space_available(150).unwrap());
    }

    #[test]
    fn reservations_count_against_the_quota() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 200);
        assert!(store.ensure_space("es-en", 150).unwrap().is_empty());
        assert_eq!(store.reserved_bytes(), 150);

        match store.ensure_space("fr-en", 100) {
            Err(PackError::InsufficientStorage { shortfall, .. }) => assert_eq!(shortfall, 50),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            store.plan_space("fr-en", 100),
            Err(PackError::InsufficientStorage { .. })
        ));
        // A retry for the same pack replaces its own reservation.
        assert!(store.ensure_space("es-en", 200).unwrap().is_empty());

        install(&store, "es-en", 150);
        assert_eq!(store.reserved_bytes(), 0);
        assert_eq!(store.statistics().unwrap().available_bytes(), 50);
        assert!(store.ensure_space("fr-en", 50).unwrap().is_empty());
    }

    #[test]
    fn planning_space_evicts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 200);
        install(&store, "es-en", 100);
        install(&store, "fr-en", 100);

        assert_eq!(store.plan_space("de-en", 100).unwrap(), 100);
        assert_eq!(store.plan_space("es-en", 100).unwrap(), 0);
        assert!(store.plan_space("de-en", 300).is_err());
        assert!(store.is_installed("es-en").unwrap());
        assert!(store.is_installed("fr-en").unwrap());
        assert_eq!(store.reserved_bytes(), 0);
    }

    #[test]
    fn short_eviction_leaves_every_pack_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 300);
        install(&store, "es-en", 100);
        install(&store, "fr-en", 100);
        install(&store, "de-en", 100);

        let lock = store.lock_pack("fr-en").unwrap();
        let held = lock.lock().unwrap();
        let err = store.ensure_space("it-en", 250).unwrap_err();
        assert!(matches!(
            err,
            PackError::InsufficientStorage { shortfall: 50, .. }
        ));
        drop(held);

        for id in ["es-en", "fr-en", "de-en"] {
            assert!(store.is_installed(id).unwrap(), "{id} was evicted");
        }
        assert_eq!(store.reserved_bytes(), 0);
    }

    #[test]
    fn in_use_and_locked_packs_are_not_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 200);
        install(&store, "es-en", 100);
        install(&store, "fr-en", 100);

        let usage = store.acquire("es-en").unwrap();
        let lock = store.lock_pack("fr-en").unwrap();
        let held = lock.lock().unwrap();
        let err = store.ensure_space("de-en", 100).unwrap_err();
        assert!(matches!(err, PackError::InsufficientStorage { .. }));
        drop(held);
        drop(usage);

        assert_eq!(store.ensure_space("de-en", 100).unwrap().len(), 1);
    }

    #[test]
    fn oversize_request_evicts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 100);
        install(&store, "es-en", 50);
        match store.ensure_space("fr-en", 150) {
            Err(PackError::InsufficientStorage {
                required,
                shortfall,
            }) => {
                assert_eq!(required, 150);
                assert_eq!(shortfall, 50);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(store.is_installed("es-en").unwrap());
    }

    #[test]
    fn activation_is_exclusive_per_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 1000);
        let mut other = LanguagePackRecord::from_manifest(&manifest("es-en", 10));
        other.id = "es-en-lite".into();
        store.register_installation(other).unwrap();
        install(&store, "es-en", 10);

        store.set_active("es-en-lite", true).unwrap();
        store.set_active("es-en", true).unwrap();
        assert!(!store.get("es-en-lite").unwrap().unwrap().active);
        assert_eq!(
            store.active_pack_for("es", "en").unwrap().unwrap().id,
            "es-en"
        );
        assert!(store.active_pack_for("en", "es").unwrap().is_none());
    }

    #[test]
    fn repair_clears_broken_and_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 1000);
        install(&store, "es-en", 10);
        store.update("es-en", |r| r.broken = true).unwrap();
        let report = store.repair().unwrap();
        assert_eq!(report.cleared, vec!["es-en".to_string()]);
        let record = store.get("es-en").unwrap().unwrap();
        assert!(!record.installed && !record.broken);
        assert!(store.repair().unwrap().is_clean());
    }
}
