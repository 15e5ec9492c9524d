// src/descriptor.rs

//! Package Release Descriptor model
//!
//! A descriptor maps one (name, version) pair to everything needed to
//! distribute a release: source archive URL, content hash, license, the
//! install mapping, runtime tool dependencies, caveat text, and a smoke
//! test. A "tap" is a directory holding one JSON descriptor per release.
//!
//! Descriptors are immutable once published: a new release means a new
//! descriptor, never an edit of a shipped hash/version pair. That rule is
//! enforced by the audit in [`crate::lint`], not here.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Canonical name of the shared-data environment variable referenced in
/// caveats. Older revisions used REPOSITORY_BACKUP_HOME; lint flags drift.
pub const CANONICAL_HOME_VAR: &str = "REPO_BACKUP_HOME";

/// Source archive location and integrity digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Full URL of the release tarball
    pub url: String,

    /// SHA-256 digest of the archive bytes, lowercase hex
    pub sha256: String,
}

/// Destination class for one install-mapping entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallKind {
    /// Executable directory (`<prefix>/bin`)
    Bin,

    /// Package-private shared-data directory (`<prefix>/share/<name>`)
    Share,

    /// Documentation directory (`<prefix>/share/doc/<name>`)
    Doc,
}

impl InstallKind {
    pub fn as_str(&self) -> &str {
        match self {
            InstallKind::Bin => "bin",
            InstallKind::Share => "share",
            InstallKind::Doc => "doc",
        }
    }
}

impl std::str::FromStr for InstallKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "bin" => Ok(InstallKind::Bin),
            "share" => Ok(InstallKind::Share),
            "doc" => Ok(InstallKind::Doc),
            _ => Err(format!("Invalid install kind: {}", s)),
        }
    }
}

/// One (source path -> install target) pair of the install mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallEntry {
    pub kind: InstallKind,

    /// Path inside the archive payload, relative to the payload root
    pub source: String,

    /// Optional rename at the destination (e.g. strip a `.sh` suffix)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
}

impl InstallEntry {
    /// File or directory name this entry lands under at its destination
    pub fn target_name(&self) -> &str {
        match &self.rename {
            Some(rename) => rename,
            None => self
                .source
                .rsplit('/')
                .next()
                .unwrap_or(self.source.as_str()),
        }
    }
}

/// Whether an external tool is required or merely recommended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Required,
    Optional,
}

/// An external tool the installed script calls at runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDependency {
    pub name: String,

    #[serde(default = "DependencyKind::required")]
    pub kind: DependencyKind,
}

impl DependencyKind {
    fn required() -> Self {
        DependencyKind::Required
    }
}

impl ToolDependency {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DependencyKind::Required,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DependencyKind::Optional,
        }
    }
}

/// Post-install check: run the installed binary once and inspect the result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmokeTest {
    /// Arguments passed to the installed executable
    pub args: Vec<String>,

    /// Substring that must appear in combined stdout/stderr
    pub expect_substring: String,

    /// Expected process exit code
    #[serde(default)]
    pub expect_exit_code: i32,
}

/// Environment expectations advertised to the user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSettings {
    /// Variable the user should point at the shared-data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_var: Option<String>,
}

/// A Package Release Descriptor: one published release of one tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    pub license: String,

    pub source: Source,

    #[serde(default)]
    pub dependencies: Vec<ToolDependency>,

    /// Ordered install mapping; order is preserved from the descriptor file
    pub install: Vec<InstallEntry>,

    #[serde(default)]
    pub env: EnvSettings,

    /// Caveat template. Placeholders: `${bin}`, `${pkgshare}`, `${home_var}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caveats: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoke_test: Option<SmokeTest>,
}

impl ReleaseDescriptor {
    /// Parse a descriptor from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::ParseError(format!("Invalid descriptor JSON: {}", e)))
    }

    /// Load a descriptor from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading descriptor from {}", path.display());
        let content = fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Name the executable is installed under
    ///
    /// Taken from the first `bin` entry's rename, falling back to the
    /// source file name, falling back to the package name.
    pub fn install_name(&self) -> &str {
        self.install
            .iter()
            .find(|e| e.kind == InstallKind::Bin)
            .map(|e| e.target_name())
            .unwrap_or(self.name.as_str())
    }

    /// Version embedded in the source URL's release tag, if any
    ///
    /// Recognizes GitHub-style tag tarball URLs such as
    /// `.../archive/refs/tags/v1.3.3.tar.gz` and `.../tags/1.3.3.tar.gz`.
    pub fn url_tag_version(&self) -> Option<String> {
        let url = &self.source.url;
        let after_tags = url.split("/tags/").nth(1)?;
        let component = after_tags.split('/').next()?;
        let tag = component
            .trim_end_matches(".tar.gz")
            .trim_end_matches(".tgz");
        let version = tag.strip_prefix('v').unwrap_or(tag);
        if version.is_empty() {
            None
        } else {
            Some(version.to_string())
        }
    }

    /// Render the caveat text with concrete install paths
    ///
    /// Returns None when the descriptor carries no caveats.
    pub fn render_caveats(&self, bin_dir: &Path, pkgshare_dir: &Path) -> Option<String> {
        let template = self.caveats.as_ref()?;
        let home_var = self.env.home_var.as_deref().unwrap_or(CANONICAL_HOME_VAR);

        let rendered = template
            .replace("${bin}", &bin_dir.display().to_string())
            .replace("${pkgshare}", &pkgshare_dir.display().to_string())
            .replace("${home_var}", home_var);

        Some(rendered)
    }
}

/// Load every descriptor in a tap directory, sorted by file name
///
/// Only `*.json` files are considered; subdirectories are ignored.
pub fn load_tap(dir: &Path) -> Result<Vec<(PathBuf, ReleaseDescriptor)>> {
    if !dir.is_dir() {
        return Err(Error::NotFoundError(format!(
            "Tap directory not found: {}",
            dir.display()
        )));
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| Error::IoError(format!("Failed to read {}: {}", dir.display(), e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut descriptors = Vec::with_capacity(paths.len());
    for path in paths {
        let descriptor = ReleaseDescriptor::from_file(&path)?;
        descriptors.push((path, descriptor));
    }

    debug!("Loaded {} descriptors from tap", descriptors.len());
    Ok(descriptors)
}
