// src/install.rs

//! Install-mapping execution
//!
//! Installing a release is a checksum-verified unpack followed by the
//! descriptor's copy mapping: the bin entry lands in `<prefix>/bin` under
//! its install name with the executable bit set, share entries under
//! `<prefix>/share/<name>`, doc entries under `<prefix>/share/doc/<name>`.
//! A missing source path aborts the install. Every installed file is
//! recorded with its content hash inside a changeset transaction, so
//! uninstall and rollback know exactly what to remove.

use crate::archive;
use crate::db;
use crate::db::models::{Changeset, ChangesetStatus, FileRecord, InstalledPackage};
use crate::descriptor::{InstallKind, ReleaseDescriptor};
use crate::error::{Error, Result};
use crate::fetch;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Filesystem layout an install maps into
#[derive(Debug, Clone)]
pub struct InstallPrefix {
    root: PathBuf,
}

impl InstallPrefix {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Executable directory
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    /// Package-private shared-data directory
    pub fn pkgshare_dir(&self, package: &str) -> PathBuf {
        self.root.join("share").join(package)
    }

    /// Documentation directory
    pub fn doc_dir(&self, package: &str) -> PathBuf {
        self.root.join("share").join("doc").join(package)
    }

    fn target_dir(&self, kind: InstallKind, package: &str) -> PathBuf {
        match kind {
            InstallKind::Bin => self.bin_dir(),
            InstallKind::Share => self.pkgshare_dir(package),
            InstallKind::Doc => self.doc_dir(package),
        }
    }
}

/// One file placed on disk by an install
#[derive(Debug, Clone)]
struct PlacedFile {
    path: PathBuf,
    sha256: String,
    size: i64,
    kind: InstallKind,
}

/// Outcome of a successful install
#[derive(Debug)]
pub struct InstallReport {
    pub package_id: i64,
    pub changeset_id: i64,
    pub file_count: usize,
    pub bin_path: PathBuf,
    pub caveats: Option<String>,
}

/// Install a descriptor's release from a local, already-fetched archive
pub fn install(
    conn: &mut Connection,
    desc: &ReleaseDescriptor,
    archive_path: &Path,
    prefix: &InstallPrefix,
) -> Result<InstallReport> {
    info!(
        "Installing {} {} into {}",
        desc.name,
        desc.version,
        prefix.root().display()
    );

    // Pre-transaction validation: refuse a duplicate install
    let prefix_str = prefix.root().display().to_string();
    let existing = InstalledPackage::find_by_name(conn, &desc.name)?;
    if existing
        .iter()
        .any(|p| p.version == desc.version && p.prefix == prefix_str)
    {
        return Err(Error::ConflictError(format!(
            "{} {} is already installed in {}",
            desc.name, desc.version, prefix_str
        )));
    }

    // Hash mismatch aborts before anything touches the prefix
    fetch::verify_checksum(archive_path, &desc.source.sha256)?;

    let staging = archive::unpack_to_staging(archive_path)?;

    let placed = match execute_mapping(desc, staging.root(), prefix) {
        Ok(placed) => placed,
        Err(e) => {
            // A partial install is worse than none
            warn!("Install of {} failed, cleaning up partial copy", desc.name);
            return Err(e);
        }
    };

    let recorded = db::transaction(conn, |tx| {
        let mut changeset = Changeset::new(format!("Install {}-{}", desc.name, desc.version));
        let changeset_id = changeset.insert(tx)?;

        let mut package = InstalledPackage::from_descriptor(desc, &prefix_str);
        package.installed_by_changeset_id = Some(changeset_id);
        let package_id = package.insert(tx)?;

        for file in &placed {
            let mut record = FileRecord::new(
                file.path.display().to_string(),
                file.sha256.clone(),
                file.size,
                file.kind,
                package_id,
            );
            record.insert(tx)?;
        }

        changeset.update_status(tx, ChangesetStatus::Applied)?;
        Ok((package_id, changeset_id))
    });

    // An unrecorded install could never be uninstalled or rolled back, so
    // a failed transaction takes the placed files with it.
    let (package_id, changeset_id) = match recorded {
        Ok(ids) => ids,
        Err(e) => {
            warn!("Recording {} failed, removing placed files", desc.name);
            remove_placed(&placed);
            prune_dirs(prefix, &desc.name);
            return Err(e);
        }
    };

    let bin_path = prefix.bin_dir().join(desc.install_name());
    let caveats = desc.render_caveats(&prefix.bin_dir(), &prefix.pkgshare_dir(&desc.name));

    info!(
        "Installed {} {} ({} files)",
        desc.name,
        desc.version,
        placed.len()
    );

    Ok(InstallReport {
        package_id,
        changeset_id,
        file_count: placed.len(),
        bin_path,
        caveats,
    })
}

/// Copy every mapped source into the prefix, cleaning up on failure
fn execute_mapping(
    desc: &ReleaseDescriptor,
    payload_root: &Path,
    prefix: &InstallPrefix,
) -> Result<Vec<PlacedFile>> {
    let mut placed = Vec::new();

    for entry in &desc.install {
        let source = payload_root.join(&entry.source);
        if !source.exists() {
            remove_placed(&placed);
            return Err(Error::InstallError(format!(
                "install source '{}' is missing from the archive payload",
                entry.source
            )));
        }

        let target_dir = prefix.target_dir(entry.kind, &desc.name);
        let target = target_dir.join(entry.target_name());

        let result = if source.is_dir() {
            copy_tree(&source, &target, entry.kind, &mut placed)
        } else {
            copy_file(&source, &target, entry.kind, &mut placed)
        };

        if let Err(e) = result {
            remove_placed(&placed);
            return Err(e);
        }

        // The bin entry must come out runnable
        if entry.kind == InstallKind::Bin {
            set_executable(&target)?;
        }
    }

    Ok(placed)
}

fn copy_file(
    source: &Path,
    target: &Path,
    kind: InstallKind,
    placed: &mut Vec<PlacedFile>,
) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::InstallError(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let content = fs::read(source).map_err(|e| {
        Error::InstallError(format!("Failed to read {}: {}", source.display(), e))
    })?;
    fs::write(target, &content).map_err(|e| {
        Error::InstallError(format!("Failed to write {}: {}", target.display(), e))
    })?;

    debug!("Installed {}", target.display());
    placed.push(PlacedFile {
        path: target.to_path_buf(),
        sha256: fetch::sha256_hex(&content),
        size: content.len() as i64,
        kind,
    });
    Ok(())
}

fn copy_tree(
    source: &Path,
    target: &Path,
    kind: InstallKind,
    placed: &mut Vec<PlacedFile>,
) -> Result<()> {
    for entry in fs::read_dir(source)
        .map_err(|e| Error::InstallError(format!("Failed to read {}: {}", source.display(), e)))?
    {
        let entry = entry
            .map_err(|e| Error::InstallError(format!("Failed to read directory entry: {}", e)))?;
        let child_source = entry.path();
        let child_target = target.join(entry.file_name());

        if child_source.is_dir() {
            copy_tree(&child_source, &child_target, kind, placed)?;
        } else {
            copy_file(&child_source, &child_target, kind, placed)?;
        }
    }
    Ok(())
}

fn remove_placed(placed: &[PlacedFile]) {
    for file in placed {
        if let Err(e) = fs::remove_file(&file.path) {
            warn!("Failed to remove {}: {}", file.path.display(), e);
        }
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|e| {
        Error::InstallError(format!(
            "Failed to mark {} executable: {}",
            path.display(),
            e
        ))
    })
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Outcome of an uninstall
#[derive(Debug)]
pub struct UninstallReport {
    pub name: String,
    pub version: String,
    pub file_count: usize,
}

/// Remove an installed package and every file it placed
pub fn uninstall(
    conn: &mut Connection,
    name: &str,
    version: Option<&str>,
) -> Result<UninstallReport> {
    info!("Removing package: {}", name);

    let mut packages = InstalledPackage::find_by_name(conn, name)?;
    if let Some(version) = version {
        packages.retain(|p| p.version == version);
    }

    if packages.is_empty() {
        return Err(Error::NotFoundError(format!(
            "Package '{}' is not installed",
            name
        )));
    }
    if packages.len() > 1 {
        let versions: Vec<&str> = packages.iter().map(|p| p.version.as_str()).collect();
        return Err(Error::ConflictError(format!(
            "Multiple versions of '{}' installed ({}); specify one",
            name,
            versions.join(", ")
        )));
    }

    let package = &packages[0];
    let package_id = package
        .id
        .ok_or_else(|| Error::InitError("Package record has no ID".to_string()))?;
    let files = FileRecord::find_by_package(conn, package_id)?;

    db::transaction(conn, |tx| {
        let mut changeset = Changeset::new(format!("Remove {}-{}", package.name, package.version));
        changeset.insert(tx)?;

        // Files cascade-delete with the package row
        InstalledPackage::delete(tx, package_id)?;

        changeset.update_status(tx, ChangesetStatus::Applied)?;
        Ok(())
    })?;

    // Disk removal follows the commit; the database must never claim
    // files that are already gone.
    remove_files_from_disk(&files);
    prune_package_dirs(package);

    info!("Removed {} {} ({} files)", package.name, package.version, files.len());
    Ok(UninstallReport {
        name: package.name.clone(),
        version: package.version.clone(),
        file_count: files.len(),
    })
}

/// Reverse an install changeset, removing the packages it installed
pub fn rollback(conn: &mut Connection, changeset_id: i64) -> Result<usize> {
    info!("Rolling back changeset: {}", changeset_id);

    let changeset = Changeset::find_by_id(conn, changeset_id)?
        .ok_or_else(|| Error::NotFoundError(format!("Changeset {} not found", changeset_id)))?;

    if changeset.status == ChangesetStatus::RolledBack {
        return Err(Error::ConflictError(format!(
            "Changeset {} is already rolled back",
            changeset_id
        )));
    }
    if changeset.status == ChangesetStatus::Pending {
        return Err(Error::ConflictError(format!(
            "Cannot rollback pending changeset {}",
            changeset_id
        )));
    }

    let packages = InstalledPackage::find_by_changeset(conn, changeset_id)?;
    if packages.is_empty() {
        return Err(Error::NotFoundError(format!(
            "Changeset {} installed no packages; only install changesets can be rolled back",
            changeset_id
        )));
    }

    // Collect the on-disk files before the cascade delete drops the records
    let mut removable: Vec<FileRecord> = Vec::new();
    for package in &packages {
        let package_id = package
            .id
            .ok_or_else(|| Error::InitError("Package record has no ID".to_string()))?;
        removable.extend(FileRecord::find_by_package(conn, package_id)?);
    }

    let removed = db::transaction(conn, |tx| {
        let mut rollback_changeset = Changeset::new(format!(
            "Rollback of changeset {} ({})",
            changeset_id, changeset.description
        ));
        let rollback_changeset_id = rollback_changeset.insert(tx)?;

        for package in &packages {
            InstalledPackage::delete(tx, package.id.unwrap())?;
        }

        rollback_changeset.update_status(tx, ChangesetStatus::Applied)?;

        tx.execute(
            "UPDATE changesets
             SET status = 'rolled_back',
                 rolled_back_at = CURRENT_TIMESTAMP,
                 reversed_by_changeset_id = ?1
             WHERE id = ?2",
            [rollback_changeset_id, changeset_id],
        )?;

        Ok(packages.len())
    })?;

    // Disk removal follows the commit, as in uninstall
    remove_files_from_disk(&removable);
    for package in &packages {
        prune_package_dirs(package);
    }

    info!("Rollback complete: {} package(s) removed", removed);
    Ok(removed)
}

fn remove_files_from_disk(files: &[FileRecord]) {
    for file in files {
        match fs::remove_file(&file.path) {
            Ok(()) => debug!("Removed {}", file.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Already gone: {}", file.path)
            }
            Err(e) => warn!("Failed to remove {}: {}", file.path, e),
        }
    }
}

/// Best-effort removal of the package's now-empty private directories
fn prune_package_dirs(package: &InstalledPackage) {
    let prefix = InstallPrefix::new(&package.prefix);
    prune_dirs(&prefix, &package.name);
}

fn prune_dirs(prefix: &InstallPrefix, package: &str) {
    for dir in [prefix.doc_dir(package), prefix.pkgshare_dir(package)] {
        remove_empty_tree(&dir);
    }
}

fn remove_empty_tree(dir: &Path) {
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                remove_empty_tree(&entry.path());
            }
        }
    }
    // Fails while non-empty, which is exactly the behavior wanted
    let _ = fs::remove_dir(dir);
}
