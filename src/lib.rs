// src/lib.rs

//! Tapcask
//!
//! Release-descriptor toolkit for tap-distributed CLI tools: lint and audit
//! formula-style Package Release Descriptors, fetch and verify release
//! archives, execute install mappings, and smoke-test installed binaries.
//!
//! # Architecture
//!
//! - Descriptors: one JSON file per release, a tap is a directory of them
//! - Lint/audit: every publish-time invariant is a named, severity-graded check
//! - Install: checksum-verified unpack plus a copy mapping, recorded atomically
//! - Database-first: install state and changeset history live in SQLite

pub mod archive;
pub mod db;
pub mod descriptor;
mod error;
pub mod fetch;
pub mod install;
pub mod lint;
pub mod smoke;

pub use error::{Error, Result};
