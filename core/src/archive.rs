//! Pack archive validation and extraction.
//!
//! A pack archive is a zip holding exactly one relational store file. The
//! central directory is checked in full before a single byte is written:
//! entry count, unsafe names, per-file and total uncompressed sizes, and the
//! number of store files.

use crate::config::ArchiveLimits;
use crate::error::PackError;
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use zip::ZipArchive;

/// The store file an archive was validated down to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchivePlan {
    pub index: usize,
    /// Name inside the archive.
    pub name: String,
    pub uncompressed_bytes: u64,
    pub total_uncompressed_bytes: u64,
    pub entries: usize,
}

fn is_traversal(name: &str) -> bool {
    if name.starts_with('/') || name.starts_with('\\') || name.contains(':') {
        return true;
    }
    Path::new(name)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        || name.split(['/', '\\']).any(|part| part == "..")
}

/// Check the central directory of an open archive against `limits`.
pub fn inspect<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    limits: &ArchiveLimits,
) -> Result<ArchivePlan, PackError> {
    let entries = archive.len();
    if entries > limits.max_entries {
        return Err(PackError::InvalidArchive(format!(
            "{entries} entries exceed the limit of {}",
            limits.max_entries
        )));
    }

    let mut total: u64 = 0;
    let mut stores: Vec<(usize, String, u64)> = Vec::new();
    for i in 0..entries {
        let entry = archive.by_index_raw(i)?;
        let name = entry.name().to_string();
        if is_traversal(&name) || entry.enclosed_name().is_none() {
            return Err(PackError::InvalidArchive(format!("unsafe entry name {name:?}")));
        }
        if entry.is_dir() {
            continue;
        }
        let size = entry.size();
        if size > limits.max_file_bytes {
            return Err(PackError::InvalidArchive(format!(
                "{name} is {size} bytes, over the per-file limit of {}",
                limits.max_file_bytes
            )));
        }
        total = total.saturating_add(size);
        if total > limits.max_total_bytes {
            return Err(PackError::InvalidArchive(format!(
                "archive expands past the total limit of {} bytes",
                limits.max_total_bytes
            )));
        }
        if limits.is_store_file(&name) {
            stores.push((i, name, size));
        }
    }

    match stores.len() {
        0 => Err(PackError::InvalidArchive("archive holds no store file".into())),
        1 => {
            let (index, name, uncompressed_bytes) = stores.remove(0);
            Ok(ArchivePlan {
                index,
                name,
                uncompressed_bytes,
                total_uncompressed_bytes: total,
                entries,
            })
        }
        n => Err(PackError::InvalidArchive(format!(
            "archive holds {n} store files, expected exactly one"
        ))),
    }
}

/// Validate the archive at `path` without extracting anything.
pub fn validate(path: &Path, limits: &ArchiveLimits) -> Result<ArchivePlan, PackError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    inspect(&mut archive, limits)
}

/// Validate the archive at `path` and write its store file into `dest_dir`.
///
/// Only the store file is extracted, flattened to its file name. The copy is
/// capped at the declared size so a lying header cannot overrun the limits.
pub fn extract_store(
    path: &Path,
    limits: &ArchiveLimits,
    dest_dir: &Path,
) -> Result<PathBuf, PackError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let plan = inspect(&mut archive, limits)?;

    let mut entry = archive.by_index(plan.index)?;
    let file_name = entry
        .enclosed_name()
        .and_then(|p| p.file_name().map(|n| n.to_owned()))
        .ok_or_else(|| PackError::InvalidArchive(format!("unsafe entry name {:?}", plan.name)))?;

    std::fs::create_dir_all(dest_dir)?;
    let out_path = dest_dir.join(file_name);
    let mut out = File::create(&out_path)?;
    let written = std::io::copy(&mut (&mut entry).take(plan.uncompressed_bytes + 1), &mut out)?;
    out.flush()?;
    drop(out);

    if written != plan.uncompressed_bytes {
        let _ = std::fs::remove_file(&out_path);
        return Err(PackError::InvalidArchive(format!(
            "{} expanded to {written} bytes, header declared {}",
            plan.name, plan.uncompressed_bytes
        )));
    }
    tracing::debug!(entry = %plan.name, bytes = written, "extracted store file");
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn extracts_single_store_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.zip");
        write_zip(&path, &[("es-en.sqlite", b"payload"), ("README", b"hi")]);
        let out = extract_store(&path, &ArchiveLimits::default(), &dir.path().join("x")).unwrap();
        assert_eq!(std::fs::read(out).unwrap(), b"payload");
        assert!(!dir.path().join("x").join("README").exists());
    }

    #[test]
    fn rejects_traversal_and_absolute_names() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["../evil.sqlite", "/abs.sqlite", "a/../../b.sqlite"] {
            let path = dir.path().join("p.zip");
            write_zip(&path, &[(name, b"x")]);
            let err = validate(&path, &ArchiveLimits::default()).unwrap_err();
            assert!(matches!(err, PackError::InvalidArchive(_)), "{name}: {err}");
        }
    }

    #[test]
    fn rejects_zero_or_two_store_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.zip");
        write_zip(&path, &[("notes.txt", b"x")]);
        assert!(validate(&path, &ArchiveLimits::default()).is_err());

        write_zip(&path, &[("a.sqlite", b"x"), ("b.db", b"y")]);
        let err = validate(&path, &ArchiveLimits::default()).unwrap_err();
        assert!(err.to_string().contains("2 store files"));
    }

    #[test]
    fn rejects_oversize_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.zip");
        write_zip(&path, &[("a.sqlite", &[0u8; 100])]);
        let limits = ArchiveLimits {
            max_file_bytes: 10,
            ..ArchiveLimits::default()
        };
        assert!(validate(&path, &limits).is_err());

        let limits = ArchiveLimits {
            max_total_bytes: 50,
            ..ArchiveLimits::default()
        };
        assert!(validate(&path, &limits).is_err());
    }
}
