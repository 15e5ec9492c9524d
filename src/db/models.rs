// src/db/models.rs

//! Data models for Tapcask database entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting records.

use crate::descriptor::{InstallKind, ReleaseDescriptor};
use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;

/// An InstalledPackage is one release descriptor realized on disk
#[derive(Debug, Clone)]
pub struct InstalledPackage {
    pub id: Option<i64>,
    pub name: String,
    pub version: String,
    pub license: String,
    pub description: Option<String>,
    pub source_url: String,
    pub sha256: String,
    pub install_name: String,
    pub prefix: String,
    pub installed_at: Option<String>,
    pub installed_by_changeset_id: Option<i64>,
}

impl InstalledPackage {
    /// Build a record from a descriptor and the prefix it was installed into
    pub fn from_descriptor(desc: &ReleaseDescriptor, prefix: &str) -> Self {
        Self {
            id: None,
            name: desc.name.clone(),
            version: desc.version.clone(),
            license: desc.license.clone(),
            description: desc.description.clone(),
            source_url: desc.source.url.clone(),
            sha256: desc.source.sha256.clone(),
            install_name: desc.install_name().to_string(),
            prefix: prefix.to_string(),
            installed_at: None,
            installed_by_changeset_id: None,
        }
    }

    /// Insert this package into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO packages (name, version, license, description, source_url, sha256, install_name, prefix, installed_by_changeset_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &self.name,
                &self.version,
                &self.license,
                &self.description,
                &self.source_url,
                &self.sha256,
                &self.install_name,
                &self.prefix,
                &self.installed_by_changeset_id,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find a package by ID
    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages WHERE id = ?1",
            Self::COLUMNS
        ))?;

        let package = stmt.query_row([id], Self::from_row).optional()?;

        Ok(package)
    }

    /// Find packages by name
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages WHERE name = ?1 ORDER BY version",
            Self::COLUMNS
        ))?;

        let packages = stmt
            .query_map([name], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Find packages installed by a changeset
    pub fn find_by_changeset(conn: &Connection, changeset_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages WHERE installed_by_changeset_id = ?1",
            Self::COLUMNS
        ))?;

        let packages = stmt
            .query_map([changeset_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// List all installed packages
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages ORDER BY name, version",
            Self::COLUMNS
        ))?;

        let packages = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Delete a package by ID
    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        conn.execute("DELETE FROM packages WHERE id = ?1", [id])?;
        Ok(())
    }

    const COLUMNS: &'static str = "id, name, version, license, description, source_url, sha256, install_name, prefix, installed_at, installed_by_changeset_id";

    /// Convert a database row to an InstalledPackage
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            version: row.get(2)?,
            license: row.get(3)?,
            description: row.get(4)?,
            source_url: row.get(5)?,
            sha256: row.get(6)?,
            install_name: row.get(7)?,
            prefix: row.get(8)?,
            installed_at: row.get(9)?,
            installed_by_changeset_id: row.get(10)?,
        })
    }
}

/// A FileRecord tracks one installed path with its content hash
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: Option<i64>,
    pub path: String,
    pub sha256_hash: String,
    pub size: i64,
    pub kind: InstallKind,
    pub package_id: i64,
    pub installed_at: Option<String>,
}

impl FileRecord {
    /// Create a new FileRecord
    pub fn new(path: String, sha256_hash: String, size: i64, kind: InstallKind, package_id: i64) -> Self {
        Self {
            id: None,
            path,
            sha256_hash,
            size,
            kind,
            package_id,
            installed_at: None,
        }
    }

    /// Insert this file record into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO package_files (path, sha256_hash, size, kind, package_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &self.path,
                &self.sha256_hash,
                self.size,
                self.kind.as_str(),
                self.package_id,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find all file records belonging to a package
    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, path, sha256_hash, size, kind, package_id, installed_at
             FROM package_files WHERE package_id = ?1 ORDER BY path",
        )?;

        let files = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(files)
    }

    /// Convert a database row to a FileRecord
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let kind_str: String = row.get(4)?;
        let kind = kind_str.parse::<InstallKind>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            path: row.get(1)?,
            sha256_hash: row.get(2)?,
            size: row.get(3)?,
            kind,
            package_id: row.get(5)?,
            installed_at: row.get(6)?,
        })
    }
}

/// Changeset status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangesetStatus {
    Pending,
    Applied,
    RolledBack,
}

impl ChangesetStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ChangesetStatus::Pending => "pending",
            ChangesetStatus::Applied => "applied",
            ChangesetStatus::RolledBack => "rolled_back",
        }
    }
}

impl FromStr for ChangesetStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChangesetStatus::Pending),
            "applied" => Ok(ChangesetStatus::Applied),
            "rolled_back" => Ok(ChangesetStatus::RolledBack),
            _ => Err(format!("Invalid changeset status: {}", s)),
        }
    }
}

/// A Changeset represents an atomic transactional operation
#[derive(Debug, Clone)]
pub struct Changeset {
    pub id: Option<i64>,
    pub description: String,
    pub status: ChangesetStatus,
    pub created_at: Option<String>,
    pub applied_at: Option<String>,
    pub rolled_back_at: Option<String>,
    pub reversed_by_changeset_id: Option<i64>,
}

impl Changeset {
    /// Create a new Changeset
    pub fn new(description: String) -> Self {
        Self {
            id: None,
            description,
            status: ChangesetStatus::Pending,
            created_at: None,
            applied_at: None,
            rolled_back_at: None,
            reversed_by_changeset_id: None,
        }
    }

    /// Insert this changeset into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO changesets (description, status) VALUES (?1, ?2)",
            params![&self.description, self.status.as_str()],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find a changeset by ID
    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, description, status, created_at, applied_at, rolled_back_at, reversed_by_changeset_id
             FROM changesets WHERE id = ?1",
        )?;

        let changeset = stmt.query_row([id], Self::from_row).optional()?;

        Ok(changeset)
    }

    /// List all changesets
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, description, status, created_at, applied_at, rolled_back_at, reversed_by_changeset_id
             FROM changesets ORDER BY id DESC",
        )?;

        let changesets = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(changesets)
    }

    /// Update changeset status
    pub fn update_status(&mut self, conn: &Connection, new_status: ChangesetStatus) -> Result<()> {
        let id = self.id.ok_or_else(|| {
            crate::error::Error::InitError("Cannot update changeset without ID".to_string())
        })?;

        match new_status {
            ChangesetStatus::Applied => {
                conn.execute(
                    "UPDATE changesets SET status = ?1, applied_at = CURRENT_TIMESTAMP WHERE id = ?2",
                    params![new_status.as_str(), id],
                )?;
            }
            ChangesetStatus::RolledBack => {
                conn.execute(
                    "UPDATE changesets SET status = ?1, rolled_back_at = CURRENT_TIMESTAMP WHERE id = ?2",
                    params![new_status.as_str(), id],
                )?;
            }
            ChangesetStatus::Pending => {
                conn.execute(
                    "UPDATE changesets SET status = ?1 WHERE id = ?2",
                    params![new_status.as_str(), id],
                )?;
            }
        }

        self.status = new_status;
        Ok(())
    }

    /// Convert a database row to a Changeset
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let status_str: String = row.get(2)?;
        let status = status_str.parse::<ChangesetStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            description: row.get(1)?,
            status,
            created_at: row.get(3)?,
            applied_at: row.get(4)?,
            rolled_back_at: row.get(5)?,
            reversed_by_changeset_id: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        schema::migrate(&conn).unwrap();
        (temp_file, conn)
    }

    fn sample_package() -> InstalledPackage {
        InstalledPackage {
            id: None,
            name: "repository-backup-cli".to_string(),
            version: "1.3.3".to_string(),
            license: "MIT".to_string(),
            description: Some("Backs up repositories".to_string()),
            source_url: "https://example.com/archive/refs/tags/v1.3.3.tar.gz".to_string(),
            sha256: "3ef7dc61df01cfa542e21de81a2bbd1ffe0b3be6718190a9adb8914824bdb1a9".to_string(),
            install_name: "repository_backup".to_string(),
            prefix: "/opt/tap".to_string(),
            installed_at: None,
            installed_by_changeset_id: None,
        }
    }

    #[test]
    fn test_package_insert_and_find() {
        let (_temp, conn) = create_test_db();

        let mut package = sample_package();
        let id = package.insert(&conn).unwrap();
        assert_eq!(package.id, Some(id));

        let found = InstalledPackage::find_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(found.name, "repository-backup-cli");
        assert_eq!(found.version, "1.3.3");
        assert_eq!(found.install_name, "repository_backup");
        assert!(found.installed_at.is_some());

        let by_name = InstalledPackage::find_by_name(&conn, "repository-backup-cli").unwrap();
        assert_eq!(by_name.len(), 1);
    }

    #[test]
    fn test_package_delete_cascades_to_files() {
        let (_temp, conn) = create_test_db();

        let mut package = sample_package();
        let package_id = package.insert(&conn).unwrap();

        let mut file = FileRecord::new(
            "/opt/tap/bin/repository_backup".to_string(),
            "abc".to_string(),
            512,
            InstallKind::Bin,
            package_id,
        );
        file.insert(&conn).unwrap();
        assert_eq!(FileRecord::find_by_package(&conn, package_id).unwrap().len(), 1);

        InstalledPackage::delete(&conn, package_id).unwrap();
        assert!(FileRecord::find_by_package(&conn, package_id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_file_record_kind_roundtrip() {
        let (_temp, conn) = create_test_db();

        let mut package = sample_package();
        let package_id = package.insert(&conn).unwrap();

        for (path, kind) in [
            ("/opt/tap/bin/repository_backup", InstallKind::Bin),
            ("/opt/tap/share/repository-backup-cli/core/a.sh", InstallKind::Share),
            ("/opt/tap/share/doc/repository-backup-cli/README.md", InstallKind::Doc),
        ] {
            let mut file =
                FileRecord::new(path.to_string(), "h".to_string(), 1, kind, package_id);
            file.insert(&conn).unwrap();
        }

        let files = FileRecord::find_by_package(&conn, package_id).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.iter().any(|f| f.kind == InstallKind::Doc));
    }

    #[test]
    fn test_changeset_lifecycle() {
        let (_temp, conn) = create_test_db();

        let mut changeset = Changeset::new("Install repository-backup-cli-1.3.3".to_string());
        let id = changeset.insert(&conn).unwrap();
        assert_eq!(changeset.status, ChangesetStatus::Pending);

        changeset
            .update_status(&conn, ChangesetStatus::Applied)
            .unwrap();

        let found = Changeset::find_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(found.status, ChangesetStatus::Applied);
        assert!(found.applied_at.is_some());
        assert!(found.rolled_back_at.is_none());
    }

    #[test]
    fn test_find_by_changeset() {
        let (_temp, conn) = create_test_db();

        let mut changeset = Changeset::new("Install".to_string());
        let changeset_id = changeset.insert(&conn).unwrap();

        let mut package = sample_package();
        package.installed_by_changeset_id = Some(changeset_id);
        package.insert(&conn).unwrap();

        let packages = InstalledPackage::find_by_changeset(&conn, changeset_id).unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "repository-backup-cli");
    }

    #[test]
    fn test_changeset_status_parsing() {
        assert_eq!(
            "applied".parse::<ChangesetStatus>().unwrap(),
            ChangesetStatus::Applied
        );
        assert!("bogus".parse::<ChangesetStatus>().is_err());
        assert_eq!(ChangesetStatus::RolledBack.as_str(), "rolled_back");
    }
}
