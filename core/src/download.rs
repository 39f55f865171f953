//! Streamed pack downloads.
//!
//! Fetchers turn a manifest URL into a byte stream. `download_file` drains
//! that stream chunk by chunk into the attempt's temporary directory,
//! hashing as it goes, checking the cancel token before every chunk and
//! reporting progress after each one.

use crate::error::PackError;
use crate::installer::CancelToken;
use crate::manifest::PackFile;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A source of pack bytes.
pub trait PackFetcher: Send + Sync {
    /// Open `url` for reading. Returns the stream and, when known, its length.
    fn open(&self, url: &str) -> Result<(Box<dyn Read + Send>, Option<u64>), PackError>;
}

/// `http://` and `https://` via a blocking reqwest client.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, PackError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PackError::Download {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl PackFetcher for HttpFetcher {
    fn open(&self, url: &str) -> Result<(Box<dyn Read + Send>, Option<u64>), PackError> {
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| PackError::Download {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let length = response.content_length();
        Ok((Box::new(response), length))
    }
}

/// `file://` URLs and plain paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileFetcher;

impl FileFetcher {
    fn path_of(url: &str) -> &str {
        url.strip_prefix("file://").unwrap_or(url)
    }
}

impl PackFetcher for FileFetcher {
    fn open(&self, url: &str) -> Result<(Box<dyn Read + Send>, Option<u64>), PackError> {
        let path = Self::path_of(url);
        let file = File::open(path).map_err(|e| PackError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let length = file.metadata().ok().map(|m| m.len());
        Ok((Box::new(file), length))
    }
}

/// Dispatches on the URL scheme.
pub struct RoutingFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl RoutingFetcher {
    pub fn new(timeout: Duration) -> Result<Self, PackError> {
        Ok(Self {
            http: HttpFetcher::new(timeout)?,
            file: FileFetcher,
        })
    }
}

impl PackFetcher for RoutingFetcher {
    fn open(&self, url: &str) -> Result<(Box<dyn Read + Send>, Option<u64>), PackError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.http.open(url)
        } else {
            self.file.open(url)
        }
    }
}

/// A file fully written to disk, not yet verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub path: PathBuf,
    pub bytes: u64,
    /// Lowercase hex SHA-256.
    pub sha256: String,
}

/// Stream `file` into `dest_dir`.
///
/// `progress` receives (bytes so far, bytes expected). A cancel or a stream
/// longer than declared stops the transfer and deletes the partial file.
pub fn download_file(
    fetcher: &dyn PackFetcher,
    file: &PackFile,
    dest_dir: &Path,
    chunk_bytes: usize,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<Downloaded, PackError> {
    let (mut reader, length) = fetcher.open(&file.url)?;
    let expected = if file.size_bytes > 0 {
        file.size_bytes
    } else {
        length.unwrap_or(0)
    };

    let path = dest_dir.join(&file.name);
    let result = stream_to(&mut reader, &path, chunk_bytes.max(1), expected, cancel, progress);
    match result {
        Ok((bytes, sha256)) => Ok(Downloaded {
            path,
            bytes,
            sha256,
        }),
        Err(e) => {
            let _ = std::fs::remove_file(&path);
            if let PackError::Io(io) = &e {
                return Err(PackError::Download {
                    url: file.url.clone(),
                    reason: io.to_string(),
                });
            }
            Err(e)
        }
    }
}

fn stream_to(
    reader: &mut dyn Read,
    path: &Path,
    chunk_bytes: usize,
    expected: u64,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<(u64, String), PackError> {
    let mut out = BufWriter::new(File::create(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk_bytes];
    let mut written: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(PackError::Cancelled);
        }
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        written += n as u64;
        if expected > 0 && written > expected {
            return Err(PackError::SizeMismatch {
                file: path.display().to_string(),
                declared: expected,
                actual: written,
            });
        }
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n])?;
        progress(written, expected);
    }
    out.flush()?;
    Ok((written, format!("{:x}", hasher.finalize())))
}

/// SHA-256 of a file on disk, lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String, PackError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Check a finished download against its manifest entry.
pub fn verify(file: &PackFile, downloaded: &Downloaded) -> Result<(), PackError> {
    if file.size_bytes > 0 && downloaded.bytes != file.size_bytes {
        return Err(PackError::SizeMismatch {
            file: file.name.clone(),
            declared: file.size_bytes,
            actual: downloaded.bytes,
        });
    }
    if !downloaded.sha256.eq_ignore_ascii_case(&file.checksum) {
        return Err(PackError::ChecksumMismatch {
            file: file.name.clone(),
            expected: file.checksum.to_ascii_lowercase(),
            actual: downloaded.sha256.clone(),
        });
    }
    Ok(())
}
