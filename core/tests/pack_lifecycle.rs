//! Install, reinstall, cancel, verify and evict packs through the public API.

use polyread_core::import::{self, ImportOptions};
use polyread_core::{
    BuilderEntry, BuiltPack, CancelToken, Config, DictionaryEngine, DictionaryStore,
    ErrorCategory, FileFetcher, InstallEvent, InstallState, LookupOutcome, PackBuilder, PackError,
    PackInstaller, PackStore,
};
use std::path::Path;
use std::sync::Arc;

fn build(dir: &Path, id: &str, source: &str, words: &[(&str, &[&str])]) -> BuiltPack {
    let mut builder = PackBuilder::new(id, source, "en");
    for (word, meanings) in words {
        builder.push(BuilderEntry::new(word, meanings.iter().copied()));
    }
    builder.build(&dir.join("out").join(id)).unwrap()
}

fn spanish(dir: &Path) -> BuiltPack {
    build(
        dir,
        "es-en",
        "es",
        &[("agua", &["water"]), ("casa", &["house", "home"]), ("perro", &["dog"])],
    )
}

fn open_engine(dir: &Path) -> DictionaryEngine {
    DictionaryEngine::open(Config::with_data_dir(dir.join("data"))).unwrap()
}

#[test]
fn test_install_reports_states_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let built = spanish(dir.path());
    let engine = open_engine(dir.path());

    let handle = engine.install(built.manifest).unwrap();
    let states: Vec<InstallState> = handle
        .events
        .iter()
        .filter_map(|e| match e {
            InstallEvent::StateChanged { state, .. } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            InstallState::Downloading,
            InstallState::Verifying,
            InstallState::Extracting,
            InstallState::Importing,
            InstallState::Installed,
            InstallState::Active,
        ]
    );
    assert!(engine.is_installed("es-en").unwrap());
}

#[test]
fn test_reinstall_replaces_rows() {
    let dir = tempfile::tempdir().unwrap();
    let built = spanish(dir.path());
    let engine = open_engine(dir.path());

    let first = engine.install_blocking(built.manifest.clone()).unwrap();
    assert!(first.succeeded());
    let counts = engine.pack_store().get("es-en").unwrap().unwrap().counts;
    assert_eq!(counts.word_groups, 3);
    assert_eq!(counts.meanings, 4);

    let second = engine.install_blocking(built.manifest).unwrap();
    assert!(second.succeeded());

    let packs = engine.packs().unwrap();
    assert_eq!(packs.len(), 1);
    assert_eq!(packs[0].counts, counts);
    assert_eq!(engine.store().pack_counts("es-en").unwrap(), counts);
}

#[test]
fn test_cancelled_import_keeps_previous_version() {
    let dir = tempfile::tempdir().unwrap();
    let v1 = spanish(dir.path());
    let engine = open_engine(dir.path());
    assert!(engine.install_blocking(v1.manifest.clone()).unwrap().succeeded());
    let before = engine.store().pack_counts("es-en").unwrap();

    let mut v2 = PackBuilder::new("es-en", "es", "en");
    for i in 0..50 {
        v2.push(BuilderEntry::new(&format!("palabra{i}"), ["word"]));
    }
    let store_file = v2.write_store(&dir.path().join("v2.sqlite")).unwrap();

    let cancel = CancelToken::new();
    let mut reports = 0;
    let err = import::import_pack(
        engine.store(),
        &store_file,
        &v1.manifest,
        ImportOptions {
            batch_size: 5,
            progress_every_batches: 1,
        },
        &cancel,
        &mut |_, _| {
            reports += 1;
            cancel.cancel();
        },
    )
    .unwrap_err();

    assert!(matches!(err, PackError::Cancelled));
    assert_eq!(reports, 1);
    assert_eq!(engine.store().pack_counts("es-en").unwrap(), before);
    let result = engine.lookup("agua", "es", "en").unwrap().into_result().unwrap();
    assert_eq!(result.forward[0].target_meaning, "water");
}

#[test]
fn test_cancel_before_download_ends_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let built = spanish(dir.path());
    let config = Config::with_data_dir(dir.path().join("data"));
    let store = Arc::new(DictionaryStore::open(config.dictionary_path()).unwrap());
    let packs = Arc::new(
        PackStore::open(config.pack_store_path(), Arc::clone(&store), config.storage.quota_bytes)
            .unwrap(),
    );
    let installer = PackInstaller::new(Arc::clone(&packs), Arc::new(FileFetcher), &config);

    let cancel = CancelToken::new();
    cancel.cancel();
    let report = installer.install(&built.manifest, &cancel, None);
    assert_eq!(report.final_state, InstallState::Cancelled);
    assert!(!packs.is_installed("es-en").unwrap());
    assert_eq!(store.pack_counts("es-en").unwrap().word_groups, 0);

    let report = installer.install(&built.manifest, &CancelToken::new(), None);
    assert!(report.succeeded());
    assert_eq!(report.import.inserted, 3);
}

#[test]
fn test_queued_install_can_be_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::with_data_dir(dir.path().join("data"));
    config.installer.max_concurrent_installs = 1;
    let engine = DictionaryEngine::open(config).unwrap();

    let french = build(dir.path(), "fr-en", "fr", &[("eau", &["water"])]);
    let spanish = spanish(dir.path());
    let first = engine.install(french.manifest).unwrap();
    let second = engine.install(spanish.manifest).unwrap();
    assert!(engine.cancel_install("es-en"));

    // Whichever attempt got the slot, the cancelled one never activates.
    assert_eq!(second.wait().final_state, InstallState::Cancelled);
    assert!(first.wait().succeeded());
    assert!(!engine.is_installed("es-en").unwrap());
    assert!(!engine.cancel_install("es-en"));
}

#[test]
fn test_checksum_mismatch_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let mut built = spanish(dir.path());
    built.manifest.files[0].checksum = "0".repeat(64);
    let engine = open_engine(dir.path());

    let report = engine.install_blocking(built.manifest).unwrap();
    let failure = report.failure().expect("install should fail");
    assert_eq!(failure.category, ErrorCategory::Validation);
    assert!(!engine.is_installed("es-en").unwrap());
    assert_eq!(engine.store().pack_counts("es-en").unwrap().word_groups, 0);
}

#[test]
fn test_archive_without_store_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut built = spanish(dir.path());

    // Replace the archive with one holding only a text file.
    let bogus = dir.path().join("bogus.zip");
    {
        let mut writer = zip::ZipWriter::new(std::fs::File::create(&bogus).unwrap());
        writer
            .start_file("readme.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        std::io::Write::write_all(&mut writer, b"not a dictionary").unwrap();
        writer.finish().unwrap();
    }
    std::fs::copy(&bogus, &built.archive_path).unwrap();
    let file = &mut built.manifest.files[0];
    file.size_bytes = std::fs::metadata(&built.archive_path).unwrap().len();
    file.checksum = polyread_core::download::sha256_file(&built.archive_path).unwrap();

    let engine = open_engine(dir.path());
    let report = engine.install_blocking(built.manifest).unwrap();
    assert_eq!(report.failure().unwrap().category, ErrorCategory::Validation);
}

#[test]
fn test_duplicate_install_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let built = spanish(dir.path());
    let engine = open_engine(dir.path());

    let handle = engine.install(built.manifest.clone()).unwrap();
    let second = engine.install(built.manifest);
    // The first attempt may already be done; then the second is a reinstall.
    match second {
        Err(PackError::AlreadyInstalling(id)) => assert_eq!(id, "es-en"),
        Ok(h) => assert!(h.wait().succeeded()),
        Err(e) => panic!("unexpected error: {e}"),
    }
    assert!(handle.wait().succeeded());
}

#[test]
fn test_broken_pack_is_not_served_until_repaired() {
    let dir = tempfile::tempdir().unwrap();
    let built = spanish(dir.path());
    let engine = open_engine(dir.path());
    assert!(engine.install_blocking(built.manifest.clone()).unwrap().succeeded());
    assert!(engine.verify_pack("es-en").unwrap().is_ok());

    engine
        .store()
        .write(|tx| -> Result<usize, PackError> {
            Ok(tx.execute(
                "DELETE FROM meanings WHERE word_group_id IN
                     (SELECT id FROM word_groups WHERE pack_id = 'es-en' AND base_word = 'agua')",
                [],
            )?)
        })
        .unwrap();

    let err = engine.verify_pack("es-en").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Corruption);
    assert!(!engine.is_installed("es-en").unwrap());
    assert!(matches!(
        engine.lookup("casa", "es", "en").unwrap(),
        LookupOutcome::NoData { .. }
    ));

    let report = engine.repair().unwrap();
    assert_eq!(report.cleared, vec!["es-en".to_string()]);
    assert_eq!(engine.store().pack_counts("es-en").unwrap().word_groups, 0);

    assert!(engine.install_blocking(built.manifest).unwrap().succeeded());
    assert!(engine.lookup("agua", "es", "en").unwrap().result().is_some());
}

#[test]
fn test_least_recently_used_pack_is_evicted() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::with_data_dir(dir.path().join("data"));
    config.storage.quota_bytes = 250;
    let engine = DictionaryEngine::open(config).unwrap();

    let mut packs = vec![
        build(dir.path(), "es-en", "es", &[("agua", &["water"])]),
        build(dir.path(), "fr-en", "fr", &[("eau", &["water"])]),
        build(dir.path(), "de-en", "de", &[("wasser", &["water"])]),
    ];
    for pack in &mut packs {
        pack.manifest.size_bytes = 100;
    }

    assert!(engine.install_blocking(packs[0].manifest.clone()).unwrap().succeeded());
    assert!(engine.install_blocking(packs[1].manifest.clone()).unwrap().succeeded());
    // Touch es-en so fr-en becomes the oldest.
    assert!(engine.lookup("agua", "es", "en").unwrap().result().is_some());

    let report = engine.install_blocking(packs[2].manifest.clone()).unwrap();
    assert!(report.succeeded());
    assert_eq!(report.evicted, vec!["fr-en".to_string()]);
    assert!(engine.is_installed("es-en").unwrap());
    assert!(!engine.is_installed("fr-en").unwrap());

    let stats = engine.statistics().unwrap();
    assert_eq!(stats.used_bytes, 200);
    assert_eq!(stats.installed_packs, 2);
}

#[test]
fn test_oversize_pack_fails_without_evicting() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::with_data_dir(dir.path().join("data"));
    config.storage.quota_bytes = 150;
    let engine = DictionaryEngine::open(config).unwrap();

    let mut small = build(dir.path(), "es-en", "es", &[("agua", &["water"])]);
    small.manifest.size_bytes = 100;
    let mut large = build(dir.path(), "fr-en", "fr", &[("eau", &["water"])]);
    large.manifest.size_bytes = 400;

    assert!(engine.install_blocking(small.manifest).unwrap().succeeded());
    let report = engine.install_blocking(large.manifest).unwrap();
    assert_eq!(report.failure().unwrap().category, ErrorCategory::ResourceExhaustion);
    assert!(report.evicted.is_empty());
    assert!(engine.is_installed("es-en").unwrap());
}

#[test]
fn test_failed_verification_evicts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::with_data_dir(dir.path().join("data"));
    config.storage.quota_bytes = 200;
    let engine = DictionaryEngine::open(config).unwrap();

    let mut packs = vec![
        build(dir.path(), "es-en", "es", &[("agua", &["water"])]),
        build(dir.path(), "fr-en", "fr", &[("eau", &["water"])]),
        build(dir.path(), "de-en", "de", &[("wasser", &["water"])]),
    ];
    for pack in &mut packs {
        pack.manifest.size_bytes = 100;
    }
    packs[2].manifest.files[0].checksum = "0".repeat(64);

    assert!(engine.install_blocking(packs[0].manifest.clone()).unwrap().succeeded());
    assert!(engine.install_blocking(packs[1].manifest.clone()).unwrap().succeeded());

    let report = engine.install_blocking(packs[2].manifest.clone()).unwrap();
    assert_eq!(report.failure().unwrap().category, ErrorCategory::Validation);
    assert!(report.evicted.is_empty());
    assert!(engine.is_installed("es-en").unwrap());
    assert!(engine.is_installed("fr-en").unwrap());
    assert!(!engine.is_installed("de-en").unwrap());

    let stats = engine.statistics().unwrap();
    assert_eq!(stats.used_bytes, 200);
    assert_eq!(stats.reserved_bytes, 0);
}

#[test]
fn test_concurrent_installs_stay_under_quota() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::with_data_dir(dir.path().join("data"));
    config.storage.quota_bytes = 150;
    config.installer.max_concurrent_installs = 2;
    let engine = DictionaryEngine::open(config).unwrap();

    let mut spanish = build(dir.path(), "es-en", "es", &[("agua", &["water"])]);
    let mut french = build(dir.path(), "fr-en", "fr", &[("eau", &["water"])]);
    spanish.manifest.size_bytes = 100;
    french.manifest.size_bytes = 100;

    let first = engine.install(spanish.manifest).unwrap();
    let second = engine.install(french.manifest).unwrap();
    let reports = [first.wait(), second.wait()];

    // Either the later attempt saw the other's reservation and failed, or it
    // ran after the first finished and evicted it.
    let stats = engine.statistics().unwrap();
    assert_eq!(stats.installed_packs, 1);
    assert!(stats.used_bytes <= 150);
    assert_eq!(stats.reserved_bytes, 0);
    assert!(reports.iter().any(|r| r.succeeded()));
    for report in reports.iter().filter(|r| !r.succeeded()) {
        assert_eq!(report.failure().unwrap().category, ErrorCategory::ResourceExhaustion);
    }
}

#[test]
fn test_remove_unknown_pack() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    assert!(matches!(
        engine.remove_pack("xx-yy"),
        Err(PackError::UnknownPack(_))
    ));
}
