// src/fetch.rs

//! Release-archive retrieval and verification
//!
//! This module provides functionality for:
//! - Downloading release archives with retry support
//! - Verifying archive digests against the descriptor
//! - Caching fetch metadata next to downloaded archives

use crate::descriptor::ReleaseDescriptor;
use crate::error::{Error, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for failed downloads
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Sidecar metadata written next to a fetched archive
#[derive(Debug, Serialize, Deserialize)]
pub struct FetchRecord {
    pub url: String,
    pub sha256: String,
    pub fetched_at: String,
}

/// HTTP client wrapper with retry support
pub struct FetchClient {
    client: Client,
    max_retries: u32,
}

impl FetchClient {
    /// Create a new fetch client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    /// Download a file to the specified path with retry support
    pub fn download_file(&self, url: &str, dest_path: &Path) -> Result<()> {
        info!("Downloading {} to {}", url, dest_path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(mut response) => {
                    if !response.status().is_success() {
                        return Err(Error::DownloadError(format!(
                            "HTTP {} from {}",
                            response.status(),
                            url
                        )));
                    }

                    // Write to temporary file first
                    let temp_path = dest_path.with_extension("tmp");
                    let mut file = File::create(&temp_path).map_err(|e| {
                        Error::IoError(format!(
                            "Failed to create file {}: {}",
                            temp_path.display(),
                            e
                        ))
                    })?;

                    // Copy response body to file
                    io::copy(&mut response, &mut file).map_err(|e| {
                        Error::IoError(format!("Failed to write downloaded data: {}", e))
                    })?;

                    // Atomic rename from temp to final destination
                    fs::rename(&temp_path, dest_path).map_err(|e| {
                        Error::IoError(format!(
                            "Failed to move {} to {}: {}",
                            temp_path.display(),
                            dest_path.display(),
                            e
                        ))
                    })?;

                    info!("Successfully downloaded to {}", dest_path.display());
                    return Ok(());
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::DownloadError(format!(
                            "Failed to download after {} attempts: {}",
                            attempt, e
                        )));
                    }
                    warn!("Download attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}

/// Fetch a descriptor's release archive into `dest_dir`, verified
///
/// A cached archive whose sidecar digest matches the descriptor is reused
/// without touching the network. A digest mismatch after download aborts
/// and removes the corrupt file.
pub fn fetch_archive(desc: &ReleaseDescriptor, dest_dir: &Path) -> Result<PathBuf> {
    let default_filename = format!("{}-{}.tar.gz", desc.name, desc.version);
    let filename = desc
        .source
        .url
        .split('/')
        .next_back()
        .filter(|s| !s.is_empty())
        .unwrap_or(&default_filename);
    let dest_path = dest_dir.join(format!("{}-{}-{}", desc.name, desc.version, filename));

    if dest_path.exists() {
        if let Some(record) = read_fetch_record(&dest_path) {
            if record.sha256 == desc.source.sha256 && record.url == desc.source.url {
                info!("Using cached archive {}", dest_path.display());
                verify_checksum(&dest_path, &desc.source.sha256)?;
                return Ok(dest_path);
            }
        }
    }

    let client = FetchClient::new()?;
    client.download_file(&desc.source.url, &dest_path)?;

    if let Err(e) = verify_checksum(&dest_path, &desc.source.sha256) {
        // Keep nothing that fails verification
        let _ = fs::remove_file(&dest_path);
        return Err(e);
    }

    write_fetch_record(&dest_path, desc)?;
    Ok(dest_path)
}

/// Verify a file's SHA-256 digest matches the expected value
pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    debug!("Verifying checksum for {}", path.display());

    let mut file = File::open(path)
        .map_err(|e| Error::IoError(format!("Failed to open file for checksum: {}", e)))?;

    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|e| Error::IoError(format!("Failed to read file for checksum: {}", e)))?;

    let actual = format!("{:x}", hasher.finalize());

    if !actual.eq_ignore_ascii_case(expected) {
        return Err(Error::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    debug!("Checksum verified: {}", expected);
    Ok(())
}

/// Compute the SHA-256 digest of a byte slice as lowercase hex
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn record_path(archive_path: &Path) -> PathBuf {
    let mut name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".fetch.json");
    archive_path.with_file_name(name)
}

fn read_fetch_record(archive_path: &Path) -> Option<FetchRecord> {
    let content = fs::read_to_string(record_path(archive_path)).ok()?;
    serde_json::from_str(&content).ok()
}

fn write_fetch_record(archive_path: &Path, desc: &ReleaseDescriptor) -> Result<()> {
    let record = FetchRecord {
        url: desc.source.url.clone(),
        sha256: desc.source.sha256.clone(),
        fetched_at: current_timestamp(),
    };
    let json = serde_json::to_string_pretty(&record)
        .map_err(|e| Error::ParseError(format!("Failed to encode fetch record: {}", e)))?;
    fs::write(record_path(archive_path), json)
        .map_err(|e| Error::IoError(format!("Failed to write fetch record: {}", e)))?;
    Ok(())
}

/// Get current timestamp as ISO 8601 string
pub fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{InstallEntry, InstallKind, Source};

    fn descriptor_for(url: &str, sha256: &str) -> ReleaseDescriptor {
        ReleaseDescriptor {
            name: "tool".to_string(),
            version: "1.0.0".to_string(),
            description: None,
            homepage: None,
            license: "MIT".to_string(),
            source: Source {
                url: url.to_string(),
                sha256: sha256.to_string(),
            },
            dependencies: Vec::new(),
            install: vec![InstallEntry {
                kind: InstallKind::Bin,
                source: "tool.sh".to_string(),
                rename: None,
            }],
            env: Default::default(),
            caveats: None,
            smoke_test: None,
        }
    }

    #[test]
    fn test_verify_checksum_match() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"payload bytes").unwrap();

        let expected = sha256_hex(b"payload bytes");
        assert!(verify_checksum(temp.path(), &expected).is_ok());
    }

    #[test]
    fn test_verify_checksum_mismatch() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"payload bytes").unwrap();

        let result = verify_checksum(temp.path(), &"0".repeat(64));
        match result.unwrap_err() {
            Error::ChecksumMismatch { expected, actual } => {
                assert_eq!(expected, "0".repeat(64));
                assert_eq!(actual, sha256_hex(b"payload bytes"));
            }
            other => panic!("expected ChecksumMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_checksum_accepts_uppercase_expected() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"payload bytes").unwrap();

        let expected = sha256_hex(b"payload bytes").to_uppercase();
        assert!(verify_checksum(temp.path(), &expected).is_ok());
    }

    #[test]
    fn test_cached_archive_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = b"archive contents";
        let digest = sha256_hex(bytes);

        // URL that would fail if the network were hit
        let desc = descriptor_for("http://127.0.0.1:1/tags/v1.0.0.tar.gz", &digest);

        // Seed the cache exactly as fetch_archive lays it out
        let dest_path = dir
            .path()
            .join(format!("{}-{}-v1.0.0.tar.gz", desc.name, desc.version));
        std::fs::write(&dest_path, bytes).unwrap();
        write_fetch_record(&dest_path, &desc).unwrap();

        let fetched = fetch_archive(&desc, dir.path()).unwrap();
        assert_eq!(fetched, dest_path);
    }

    #[test]
    fn test_stale_cache_with_wrong_digest_is_not_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let desc = descriptor_for("http://127.0.0.1:1/tags/v1.0.0.tar.gz", &"0".repeat(64));

        // Cached file exists but its sidecar digest does not match the
        // descriptor, so a (failing) re-download is attempted.
        let other = descriptor_for("http://127.0.0.1:1/tags/v1.0.0.tar.gz", &"1".repeat(64));
        let dest_path = dir
            .path()
            .join(format!("{}-{}-v1.0.0.tar.gz", desc.name, desc.version));
        std::fs::write(&dest_path, b"stale").unwrap();
        write_fetch_record(&dest_path, &other).unwrap();

        let result = fetch_archive(&desc, dir.path());
        assert!(matches!(result.unwrap_err(), Error::DownloadError(_)));
    }

    #[test]
    fn test_fetch_record_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("tool-1.0.0.tar.gz");
        std::fs::write(&archive, b"x").unwrap();

        let desc = descriptor_for("https://example.com/tags/v1.0.0.tar.gz", &"a".repeat(64));
        write_fetch_record(&archive, &desc).unwrap();

        let record = read_fetch_record(&archive).unwrap();
        assert_eq!(record.url, desc.source.url);
        assert_eq!(record.sha256, desc.source.sha256);
        assert!(chrono::DateTime::parse_from_rfc3339(&record.fetched_at).is_ok());
    }
}
