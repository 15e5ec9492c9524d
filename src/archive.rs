// src/archive.rs

//! Release-archive payload access
//!
//! Release archives are gzip tarballs laid out the way tag tarballs are:
//! every entry lives under a single top-level directory named after the
//! tag. Payload paths are always reported with that component stripped so
//! they line up with install-mapping sources.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use tar::Archive;
use tempfile::TempDir;
use tracing::debug;

/// An unpacked archive held in a staging directory
///
/// The staging directory is removed when this is dropped, so it must
/// outlive any install copies made from `root`.
#[derive(Debug)]
pub struct Staging {
    _dir: TempDir,
    root: PathBuf,
}

impl Staging {
    /// Payload root: the directory install-mapping sources are relative to
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// List regular-file paths in the archive payload, top-level dir stripped
pub fn list_payload(archive_path: &Path) -> Result<Vec<String>> {
    let file = File::open(archive_path).map_err(|e| {
        Error::IoError(format!("Failed to open {}: {}", archive_path.display(), e))
    })?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut paths = Vec::new();
    for entry in archive.entries().map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path().map_err(read_error)?;
        if let Some(stripped) = strip_top_component(&path) {
            paths.push(stripped);
        }
    }

    debug!(
        "Listed {} payload files in {}",
        paths.len(),
        archive_path.display()
    );
    Ok(paths)
}

/// Unpack an archive into a fresh staging directory
///
/// When the archive holds a single top-level directory (the tag-tarball
/// convention), the staging root points inside it.
pub fn unpack_to_staging(archive_path: &Path) -> Result<Staging> {
    let dir = TempDir::new()
        .map_err(|e| Error::IoError(format!("Failed to create staging directory: {}", e)))?;

    let file = File::open(archive_path).map_err(|e| {
        Error::IoError(format!("Failed to open {}: {}", archive_path.display(), e))
    })?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.unpack(dir.path()).map_err(|e| {
        Error::ParseError(format!(
            "Failed to unpack {}: {}",
            archive_path.display(),
            e
        ))
    })?;

    let root = payload_root(dir.path())?;
    debug!(
        "Unpacked {} to staging root {}",
        archive_path.display(),
        root.display()
    );

    Ok(Staging { _dir: dir, root })
}

fn read_error(e: std::io::Error) -> Error {
    Error::ParseError(format!("Failed to read archive entry: {}", e))
}

/// Drop the leading path component; None for top-level entries themselves
fn strip_top_component(path: &Path) -> Option<String> {
    let mut components = path.components();
    components.next()?;
    let rest = components.as_path();
    if rest.as_os_str().is_empty() {
        return None;
    }
    Some(rest.to_string_lossy().replace('\\', "/"))
}

/// Resolve the payload root inside an unpacked staging directory
fn payload_root(staging: &Path) -> Result<PathBuf> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(staging)
        .map_err(|e| Error::IoError(format!("Failed to read staging directory: {}", e)))?
    {
        let entry =
            entry.map_err(|e| Error::IoError(format!("Failed to read staging entry: {}", e)))?;
        entries.push(entry.path());
    }

    match entries.as_slice() {
        [] => Err(Error::ParseError("Archive payload is empty".to_string())),
        [single] if single.is_dir() => Ok(single.clone()),
        _ => Ok(staging.to_path_buf()),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::build_archive;
    use super::*;

    #[test]
    fn test_list_payload_strips_top_dir() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("release.tar.gz");
        build_archive(
            &archive,
            "repo-1.3.3",
            &[
                ("bin/repository_backup.sh", b"#!/usr/bin/env bash\n"),
                ("core/backup.sh", b"backup\n"),
                ("README.md", b"# readme\n"),
            ],
        );

        let mut payload = list_payload(&archive).unwrap();
        payload.sort();
        assert_eq!(
            payload,
            vec![
                "README.md".to_string(),
                "bin/repository_backup.sh".to_string(),
                "core/backup.sh".to_string(),
            ]
        );
    }

    #[test]
    fn test_unpack_resolves_payload_root() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("release.tar.gz");
        build_archive(&archive, "repo-1.3.3", &[("bin/tool.sh", b"echo ok\n")]);

        let staging = unpack_to_staging(&archive).unwrap();
        assert!(staging.root().ends_with("repo-1.3.3"));
        assert!(staging.root().join("bin/tool.sh").is_file());
    }

    #[test]
    fn test_unpack_missing_archive() {
        let result = unpack_to_staging(Path::new("/nonexistent/release.tar.gz"));
        assert!(matches!(result.unwrap_err(), Error::IoError(_)));
    }

    #[test]
    fn test_strip_top_component() {
        assert_eq!(
            strip_top_component(Path::new("repo-1.0/bin/tool.sh")),
            Some("bin/tool.sh".to_string())
        );
        assert_eq!(strip_top_component(Path::new("repo-1.0")), None);
        assert_eq!(strip_top_component(Path::new("repo-1.0/")), None);
    }
}
