//! Pack installation.
//!
//! `PackInstaller::install` drives one attempt through
//!
//! ```text
//! NotInstalled -> Downloading -> Verifying -> Extracting -> Importing -> Installed -> Active
//! ```
//!
//! with `Failed` and `Cancelled` reachable from every non-terminal state.
//! Each attempt works in its own temporary directory under the downloads
//! directory, dropped (and deleted) when the attempt ends however it ends.
//!
//! `InstallManager` runs attempts on worker threads, at most
//! `max_concurrent_installs` at a time, and hands back an `InstallHandle`
//! carrying the attempt's event channel and cancel token.

use crate::archive;
use crate::config::{ArchiveLimits, Config, InstallerConfig};
use crate::download::{self, PackFetcher};
use crate::error::{ErrorCategory, PackError, StoreError};
use crate::import::{self, ImportOptions, ImportStats};
use crate::manifest::PackManifest;
use crate::pack_store::{LanguagePackRecord, PackStore, StorageStatistics};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared between a caller and an attempt.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub category: ErrorCategory,
    pub message: String,
}

impl From<&PackError> for FailureReason {
    fn from(e: &PackError) -> Self {
        Self {
            category: e.category(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallState {
    NotInstalled,
    Downloading,
    Verifying,
    Extracting,
    Importing,
    Installed,
    Active,
    Failed(FailureReason),
    Cancelled,
    Removed,
}

impl InstallState {
    pub fn name(&self) -> &'static str {
        match self {
            InstallState::NotInstalled => "not-installed",
            InstallState::Downloading => "downloading",
            InstallState::Verifying => "verifying",
            InstallState::Extracting => "extracting",
            InstallState::Importing => "importing",
            InstallState::Installed => "installed",
            InstallState::Active => "active",
            InstallState::Failed(_) => "failed",
            InstallState::Cancelled => "cancelled",
            InstallState::Removed => "removed",
        }
    }

    /// Active, failed, cancelled and removed attempts go nowhere else.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstallState::Active
                | InstallState::Failed(_)
                | InstallState::Cancelled
                | InstallState::Removed
        )
    }

    pub fn can_transition_to(&self, next: &InstallState) -> bool {
        use InstallState::*;
        match (self, next) {
            (NotInstalled, Downloading)
            | (Downloading, Verifying)
            | (Verifying, Extracting)
            | (Extracting, Importing)
            | (Importing, Installed)
            | (Installed, Active)
            | (Installed, Removed)
            | (Active, Removed) => true,
            (from, Failed(_) | Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallState::Failed(reason) => write!(f, "failed ({})", reason.message),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    StateChanged {
        pack_id: String,
        state: InstallState,
    },
    Download {
        pack_id: String,
        bytes: u64,
        total: u64,
    },
    Import {
        pack_id: String,
        processed: u64,
        total: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub pack_id: String,
    pub final_state: InstallState,
    pub import: ImportStats,
    /// Packs evicted to make room.
    pub evicted: Vec<String>,
    pub elapsed: Duration,
}

impl InstallReport {
    pub fn succeeded(&self) -> bool {
        self.final_state == InstallState::Active
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.final_state {
            InstallState::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// State and event sink of one attempt.
struct Attempt {
    pack_id: String,
    state: InstallState,
    events: Option<SyncSender<InstallEvent>>,
}

impl Attempt {
    fn new(pack_id: &str, events: Option<SyncSender<InstallEvent>>) -> Self {
        Self {
            pack_id: pack_id.to_string(),
            state: InstallState::NotInstalled,
            events,
        }
    }

    fn transition(&mut self, next: InstallState) -> Result<(), PackError> {
        if !self.state.can_transition_to(&next) {
            return Err(PackError::IllegalTransition {
                from: self.state.name().to_string(),
                to: next.name().to_string(),
            });
        }
        tracing::debug!(pack_id = %self.pack_id, from = self.state.name(), to = next.name(), "install state");
        self.state = next;
        self.emit(InstallEvent::StateChanged {
            pack_id: self.pack_id.clone(),
            state: self.state.clone(),
        });
        Ok(())
    }

    fn progress(&self, event: InstallEvent) {
        self.emit(event);
    }

    /// Events are best effort: dropped when the consumer lags or has gone.
    /// The attempt never waits on its receiver.
    fn emit(&self, event: InstallEvent) {
        if let Some(tx) = &self.events {
            if let Err(TrySendError::Full(_)) = tx.try_send(event) {
                tracing::trace!(pack_id = %self.pack_id, "install event dropped");
            }
        }
    }
}

pub struct PackInstaller {
    packs: Arc<PackStore>,
    fetcher: Arc<dyn PackFetcher>,
    config: InstallerConfig,
    limits: ArchiveLimits,
    downloads_dir: PathBuf,
}

impl PackInstaller {
    pub fn new(packs: Arc<PackStore>, fetcher: Arc<dyn PackFetcher>, config: &Config) -> Self {
        Self {
            packs,
            fetcher,
            config: config.installer.clone(),
            limits: config.archive.clone(),
            downloads_dir: config.downloads_dir(),
        }
    }

    pub fn packs(&self) -> &Arc<PackStore> {
        &self.packs
    }

    /// Run one installation attempt to completion. Never panics on bad
    /// input: every failure ends up in the report's final state.
    pub fn install(
        &self,
        manifest: &PackManifest,
        cancel: &CancelToken,
        events: Option<SyncSender<InstallEvent>>,
    ) -> InstallReport {
        let started = Instant::now();
        let mut attempt = Attempt::new(&manifest.id, events);
        let mut evicted = Vec::new();

        let outcome = self.locked_run(&mut attempt, manifest, cancel, &mut evicted);
        let import = match outcome {
            Ok(stats) => stats,
            Err(e) => {
                let next = if matches!(e, PackError::Cancelled) {
                    tracing::info!(pack_id = %manifest.id, "install cancelled");
                    InstallState::Cancelled
                } else {
                    tracing::warn!(pack_id = %manifest.id, error = %e, category = ?e.category(), "install failed");
                    InstallState::Failed(FailureReason::from(&e))
                };
                if attempt.transition(next.clone()).is_err() {
                    attempt.state = next;
                }
                ImportStats::default()
            }
        };

        InstallReport {
            pack_id: manifest.id.clone(),
            final_state: attempt.state,
            import,
            evicted,
            elapsed: started.elapsed(),
        }
    }

    fn locked_run(
        &self,
        attempt: &mut Attempt,
        manifest: &PackManifest,
        cancel: &CancelToken,
        evicted: &mut Vec<String>,
    ) -> Result<ImportStats, PackError> {
        manifest.validate()?;
        let lock = self.packs.lock_pack(&manifest.id)?;
        let _held = lock.lock().map_err(|_| StoreError::Poisoned)?;
        let outcome = self.run(attempt, manifest, cancel, evicted);
        self.packs.release_reservation(&manifest.id);
        outcome
    }

    fn run(
        &self,
        attempt: &mut Attempt,
        manifest: &PackManifest,
        cancel: &CancelToken,
        evicted: &mut Vec<String>,
    ) -> Result<ImportStats, PackError> {
        let check = |cancel: &CancelToken| {
            if cancel.is_cancelled() {
                Err(PackError::Cancelled)
            } else {
                Ok(())
            }
        };

        self.packs.register(manifest)?;
        check(cancel)?;
        let to_free = self.packs.plan_space(&manifest.id, manifest.size_bytes)?;
        if to_free > 0 {
            tracing::debug!(pack_id = %manifest.id, to_free, "install will need eviction");
        }

        let archive_file = {
            let mut zips = manifest.files.iter().filter(|f| f.name.ends_with(".zip"));
            match (zips.next(), zips.next()) {
                (Some(file), None) => file,
                _ => {
                    return Err(PackError::InvalidManifest(format!(
                        "pack {} must list exactly one .zip archive",
                        manifest.id
                    )))
                }
            }
        };

        // Downloading
        attempt.transition(InstallState::Downloading)?;
        std::fs::create_dir_all(&self.downloads_dir)?;
        let workdir = tempfile::Builder::new()
            .prefix(&format!("{}-", manifest.id))
            .tempdir_in(&self.downloads_dir)?;
        let total = manifest.download_bytes();
        let mut done_before = 0u64;
        let mut downloads = Vec::with_capacity(manifest.files.len());
        for file in &manifest.files {
            let downloaded = download::download_file(
                self.fetcher.as_ref(),
                file,
                workdir.path(),
                self.config.download_chunk_bytes,
                cancel,
                &mut |bytes, _| {
                    attempt.progress(InstallEvent::Download {
                        pack_id: manifest.id.clone(),
                        bytes: done_before + bytes,
                        total,
                    })
                },
            )?;
            done_before += downloaded.bytes;
            downloads.push((file, downloaded));
        }
        check(cancel)?;

        // Verifying
        attempt.transition(InstallState::Verifying)?;
        for (file, downloaded) in &downloads {
            download::verify(file, downloaded)?;
        }
        let archive_path = workdir.path().join(&archive_file.name);
        archive::validate(&archive_path, &self.limits)?;
        check(cancel)?;
        *evicted = self.packs.ensure_space(&manifest.id, manifest.size_bytes)?;

        // Extracting
        attempt.transition(InstallState::Extracting)?;
        let store_file =
            archive::extract_store(&archive_path, &self.limits, &workdir.path().join("extracted"))?;
        check(cancel)?;

        // Importing
        attempt.transition(InstallState::Importing)?;
        let stats = import::import_pack(
            self.packs.dictionary(),
            &store_file,
            manifest,
            ImportOptions {
                batch_size: self.config.import_batch_size,
                progress_every_batches: self.config.progress_every_batches,
            },
            cancel,
            &mut |processed, total| {
                attempt.progress(InstallEvent::Import {
                    pack_id: manifest.id.clone(),
                    processed,
                    total,
                })
            },
        )?;

        // Registration
        let mut record = LanguagePackRecord::from_manifest(manifest);
        record.checksum = archive_file.checksum.to_ascii_lowercase();
        record.installed_at = Some(chrono::Utc::now().timestamp_millis());
        record.counts = self.packs.dictionary().pack_counts(&manifest.id)?;
        self.packs.register_installation(record)?;
        attempt.transition(InstallState::Installed)?;
        self.packs.set_active(&manifest.id, true)?;
        attempt.transition(InstallState::Active)?;

        drop(workdir);
        Ok(stats)
    }
}

/// Counting semaphore for install slots.
struct Slots {
    max: usize,
    used: Mutex<usize>,
    freed: Condvar,
}

impl Slots {
    /// Wait for a slot. Returns false if `cancel` fires while queued.
    fn acquire(&self, cancel: &CancelToken) -> bool {
        let Ok(mut used) = self.used.lock() else {
            return false;
        };
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if *used < self.max {
                *used += 1;
                return true;
            }
            match self.freed.wait_timeout(used, Duration::from_millis(100)) {
                Ok((guard, _)) => used = guard,
                Err(_) => return false,
            }
        }
    }

    fn release(&self) {
        if let Ok(mut used) = self.used.lock() {
            *used = used.saturating_sub(1);
        }
        self.freed.notify_one();
    }
}

/// A running installation.
pub struct InstallHandle {
    pub pack_id: String,
    /// State and progress events. Events that find the channel full are
    /// dropped; the report from `wait` always carries the final state.
    pub events: Receiver<InstallEvent>,
    cancel: CancelToken,
    join: JoinHandle<InstallReport>,
}

impl InstallHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Block until the attempt ends.
    pub fn wait(self) -> InstallReport {
        let pack_id = self.pack_id.clone();
        let report = self.join.join().unwrap_or_else(|_| InstallReport {
            pack_id,
            final_state: InstallState::Failed(FailureReason {
                category: ErrorCategory::Internal,
                message: "installer thread panicked".into(),
            }),
            import: ImportStats::default(),
            evicted: Vec::new(),
            elapsed: Duration::ZERO,
        });
        report
    }
}

pub struct InstallManager {
    installer: Arc<PackInstaller>,
    slots: Arc<Slots>,
    running: Arc<Mutex<AHashMap<String, CancelToken>>>,
    channel_capacity: usize,
}

impl InstallManager {
    pub fn new(installer: PackInstaller) -> Self {
        let max = installer.config.max_concurrent_installs.max(1);
        let channel_capacity = installer.config.event_channel_capacity.max(1);
        Self {
            installer: Arc::new(installer),
            slots: Arc::new(Slots {
                max,
                used: Mutex::new(0),
                freed: Condvar::new(),
            }),
            running: Arc::new(Mutex::new(AHashMap::new())),
            channel_capacity,
        }
    }

    /// Start installing `manifest` on a worker thread. Attempts beyond the
    /// concurrency cap wait for a free slot.
    pub fn install(&self, manifest: PackManifest) -> Result<InstallHandle, PackError> {
        let cancel = CancelToken::new();
        {
            let mut running = self.running.lock().map_err(|_| StoreError::Poisoned)?;
            if running.contains_key(&manifest.id) {
                return Err(PackError::AlreadyInstalling(manifest.id));
            }
            running.insert(manifest.id.clone(), cancel.clone());
        }

        let (tx, rx) = mpsc::sync_channel(self.channel_capacity);
        let installer = Arc::clone(&self.installer);
        let slots = Arc::clone(&self.slots);
        let running = Arc::clone(&self.running);
        let token = cancel.clone();
        let pack_id = manifest.id.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("install-{}", manifest.id))
            .spawn(move || {
                let report = if slots.acquire(&token) {
                    let report = installer.install(&manifest, &token, Some(tx));
                    slots.release();
                    report
                } else {
                    let mut attempt = Attempt::new(&manifest.id, Some(tx));
                    let _ = attempt.transition(InstallState::Cancelled);
                    InstallReport {
                        pack_id: manifest.id.clone(),
                        final_state: InstallState::Cancelled,
                        import: ImportStats::default(),
                        evicted: Vec::new(),
                        elapsed: Duration::ZERO,
                    }
                };
                if let Ok(mut running) = running.lock() {
                    running.remove(&manifest.id);
                }
                report
            });

        match spawned {
            Ok(join) => Ok(InstallHandle {
                pack_id,
                events: rx,
                cancel,
                join,
            }),
            Err(e) => {
                if let Ok(mut running) = self.running.lock() {
                    running.remove(&pack_id);
                }
                Err(PackError::Io(e))
            }
        }
    }

    /// Request cancellation of a running or queued install.
    pub fn cancel(&self, pack_id: &str) -> bool {
        match self.running.lock() {
            Ok(running) => match running.get(pack_id) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn is_installing(&self, pack_id: &str) -> bool {
        self.running
            .lock()
            .map(|r| r.contains_key(pack_id))
            .unwrap_or(false)
    }

    /// Remove an installed pack. Refused while an install of it runs.
    pub fn remove(&self, pack_id: &str) -> Result<usize, PackError> {
        if self.is_installing(pack_id) {
            return Err(PackError::AlreadyInstalling(pack_id.to_string()));
        }
        let removed = self.installer.packs.remove_language_pack(pack_id)?;
        tracing::info!(pack_id, removed, "pack removed");
        Ok(removed)
    }

    pub fn is_installed(&self, pack_id: &str) -> Result<bool, StoreError> {
        self.installer.packs.is_installed(pack_id)
    }

    pub fn statistics(&self) -> Result<StorageStatistics, StoreError> {
        self.installer.packs.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        use InstallState::*;
        let path = [
            NotInstalled,
            Downloading,
            Verifying,
            Extracting,
            Importing,
            Installed,
            Active,
            Removed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn skipping_states_is_illegal() {
        use InstallState::*;
        assert!(!NotInstalled.can_transition_to(&Importing));
        assert!(!Downloading.can_transition_to(&Installed));
        assert!(!Active.can_transition_to(&Cancelled));
        assert!(!Cancelled.can_transition_to(&Downloading));
        assert!(Importing.can_transition_to(&Cancelled));
        assert!(NotInstalled.can_transition_to(&Failed(FailureReason {
            category: ErrorCategory::ResourceExhaustion,
            message: "full".into(),
        })));
    }

    #[test]
    fn attempt_rejects_illegal_transition_and_reports_events() {
        let (tx, rx) = mpsc::sync_channel(8);
        let mut attempt = Attempt::new("es-en", Some(tx));
        attempt.transition(InstallState::Downloading).unwrap();
        let err = attempt.transition(InstallState::Active).unwrap_err();
        assert!(matches!(err, PackError::IllegalTransition { .. }));
        assert_eq!(
            rx.try_recv().unwrap(),
            InstallEvent::StateChanged {
                pack_id: "es-en".into(),
                state: InstallState::Downloading
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn progress_is_dropped_when_channel_is_full() {
        let (tx, rx) = mpsc::sync_channel(1);
        let attempt = Attempt::new("es-en", Some(tx));
        for bytes in 0..5 {
            attempt.progress(InstallEvent::Download {
                pack_id: "es-en".into(),
                bytes,
                total: 5,
            });
        }
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn transitions_do_not_wait_for_a_full_channel() {
        let (tx, rx) = mpsc::sync_channel(1);
        let mut attempt = Attempt::new("es-en", Some(tx));
        attempt.progress(InstallEvent::Download {
            pack_id: "es-en".into(),
            bytes: 1,
            total: 2,
        });
        attempt.transition(InstallState::Downloading).unwrap();
        attempt.transition(InstallState::Verifying).unwrap();
        assert_eq!(attempt.state, InstallState::Verifying);

        let events: Vec<InstallEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], InstallEvent::Download { bytes: 1, .. }));
    }

    #[test]
    fn slots_cap_concurrency() {
        let slots = Slots {
            max: 1,
            used: Mutex::new(0),
            freed: Condvar::new(),
        };
        assert!(slots.acquire(&CancelToken::new()));
        let cancelled = CancelToken::new();
        cancelled.cancel();
        assert!(!slots.acquire(&cancelled));
        slots.release();
        assert!(slots.acquire(&CancelToken::new()));
    }
}
