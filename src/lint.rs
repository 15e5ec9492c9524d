// src/lint.rs

//! Descriptor lint checks and tap-wide audit
//!
//! Every publish-time invariant is a named check producing findings with a
//! severity. Single-descriptor checks cover digest format, version/tag
//! agreement, install-mapping shape, and smoke-test consistency; the tap
//! audit covers cross-release invariants, chiefly descriptor immutability
//! (a shipped (name, version) pair never changes hash or URL).

use crate::descriptor::{InstallKind, ReleaseDescriptor, CANONICAL_HOME_VAR};
use semver::Version;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

/// Severity of a lint finding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// One lint result
#[derive(Debug, Clone)]
pub struct Finding {
    /// Stable check identifier, e.g. "version-tag"
    pub check: &'static str,
    pub severity: Severity,
    pub message: String,
}

impl Finding {
    fn error(check: &'static str, message: String) -> Self {
        Self {
            check,
            severity: Severity::Error,
            message,
        }
    }

    fn warning(check: &'static str, message: String) -> Self {
        Self {
            check,
            severity: Severity::Warning,
            message,
        }
    }
}

/// True when any finding is an error
pub fn has_errors(findings: &[Finding]) -> bool {
    findings.iter().any(|f| f.severity == Severity::Error)
}

/// Run all single-descriptor checks
pub fn lint_descriptor(desc: &ReleaseDescriptor) -> Vec<Finding> {
    let mut findings = Vec::new();

    check_checksum_format(desc, &mut findings);
    check_version_semver(desc, &mut findings);
    check_version_tag(desc, &mut findings);
    check_install_map(desc, &mut findings);
    check_smoke_test(desc, &mut findings);
    check_env_var(desc, &mut findings);

    debug!(
        "Linted {} {}: {} finding(s)",
        desc.name,
        desc.version,
        findings.len()
    );
    findings
}

/// Check install-mapping sources against an actual archive payload listing
///
/// `payload` holds paths relative to the payload root, as produced by
/// [`crate::archive::list_payload`]. A directory source matches when any
/// payload path lives under it.
pub fn lint_against_payload(desc: &ReleaseDescriptor, payload: &[String]) -> Vec<Finding> {
    let mut findings = Vec::new();

    for entry in &desc.install {
        let dir_prefix = format!("{}/", entry.source);
        let present = payload
            .iter()
            .any(|p| p == &entry.source || p.starts_with(&dir_prefix));

        if !present {
            findings.push(Finding::error(
                "install-map",
                format!(
                    "install source '{}' is not present in the archive payload",
                    entry.source
                ),
            ));
        }
    }

    findings
}

/// Cross-release audit over a whole tap
///
/// Descriptors are immutable once published: the same (name, version) pair
/// must never reappear with a different digest or URL. Home-variable drift
/// across revisions of one package is reported as a warning.
pub fn audit_tap(tap: &[(PathBuf, ReleaseDescriptor)]) -> Vec<Finding> {
    let mut findings = Vec::new();

    // (name, version) -> first-seen (sha256, url, file)
    let mut releases: HashMap<(String, String), (&str, &str, &PathBuf)> = HashMap::new();
    for (path, desc) in tap {
        let key = (desc.name.clone(), desc.version.clone());
        match releases.get(&key) {
            None => {
                releases.insert(key, (desc.source.sha256.as_str(), desc.source.url.as_str(), path));
            }
            Some((sha256, url, first_path)) => {
                if *sha256 != desc.source.sha256 || *url != desc.source.url {
                    findings.push(Finding::error(
                        "immutability",
                        format!(
                            "{} {} is declared with conflicting source in {} and {}",
                            desc.name,
                            desc.version,
                            first_path.display(),
                            path.display()
                        ),
                    ));
                }
            }
        }
    }

    // name -> distinct home vars seen
    let mut home_vars: HashMap<&str, Vec<&str>> = HashMap::new();
    for (_, desc) in tap {
        if let Some(var) = desc.env.home_var.as_deref() {
            let seen = home_vars.entry(desc.name.as_str()).or_default();
            if !seen.contains(&var) {
                seen.push(var);
            }
        }
    }
    for (name, vars) in home_vars {
        if vars.len() > 1 {
            findings.push(Finding::warning(
                "env-var",
                format!(
                    "{} uses inconsistent home variables across releases: {}",
                    name,
                    vars.join(", ")
                ),
            ));
        }
    }

    findings
}

fn check_checksum_format(desc: &ReleaseDescriptor, findings: &mut Vec<Finding>) {
    let sha256 = &desc.source.sha256;
    let is_hex = sha256.chars().all(|c| c.is_ascii_hexdigit());
    let is_lower = !sha256.chars().any(|c| c.is_ascii_uppercase());

    if sha256.len() != 64 || !is_hex {
        findings.push(Finding::error(
            "checksum-format",
            format!(
                "sha256 must be 64 hexadecimal characters, got {} ('{}')",
                sha256.len(),
                sha256
            ),
        ));
    } else if !is_lower {
        findings.push(Finding::warning(
            "checksum-format",
            "sha256 should be lowercase hex".to_string(),
        ));
    }
}

fn check_version_semver(desc: &ReleaseDescriptor, findings: &mut Vec<Finding>) {
    if let Err(e) = Version::parse(&desc.version) {
        findings.push(Finding::error(
            "version-semver",
            format!("version '{}' is not valid semver: {}", desc.version, e),
        ));
    }
}

/// The declared version must equal the version embedded in the URL's tag.
/// One shipped release had its URL tagged v1.1.0 while the version field
/// still said 1.0.6; this check exists to catch that class of mistake.
fn check_version_tag(desc: &ReleaseDescriptor, findings: &mut Vec<Finding>) {
    match desc.url_tag_version() {
        Some(tag_version) => {
            if tag_version != desc.version {
                findings.push(Finding::error(
                    "version-tag",
                    format!(
                        "declared version {} but source URL is tagged {}",
                        desc.version, tag_version
                    ),
                ));
            }
        }
        None => {
            findings.push(Finding::warning(
                "version-tag",
                "source URL carries no recognizable release tag".to_string(),
            ));
        }
    }
}

fn check_install_map(desc: &ReleaseDescriptor, findings: &mut Vec<Finding>) {
    if !desc.install.iter().any(|e| e.kind == InstallKind::Bin) {
        findings.push(Finding::error(
            "install-map",
            "install mapping has no bin entry; nothing would be executable".to_string(),
        ));
    }

    let mut targets: Vec<(InstallKind, String)> = Vec::new();
    for entry in &desc.install {
        if entry.source.starts_with('/') {
            findings.push(Finding::error(
                "install-map",
                format!("install source '{}' must be relative", entry.source),
            ));
        }
        if entry.source.split('/').any(|c| c == "..") || entry.source.is_empty() {
            findings.push(Finding::error(
                "install-map",
                format!("install source '{}' escapes the payload root", entry.source),
            ));
        }
        if entry.rename.as_deref().is_some_and(|r| r.contains('/')) {
            findings.push(Finding::error(
                "install-map",
                format!(
                    "rename '{}' must be a bare name, not a path",
                    entry.rename.as_deref().unwrap_or_default()
                ),
            ));
        }

        let target = (entry.kind, entry.target_name().to_string());
        if targets.contains(&target) {
            findings.push(Finding::error(
                "install-map",
                format!(
                    "duplicate install target '{}' under {}",
                    target.1,
                    target.0.as_str()
                ),
            ));
        } else {
            targets.push(target);
        }
    }
}

/// A smoke test expecting the normal output of --version/--help while also
/// expecting a nonzero exit is self-contradictory; one shipped revision did
/// exactly that and masked a broken install.
fn check_smoke_test(desc: &ReleaseDescriptor, findings: &mut Vec<Finding>) {
    let Some(smoke) = &desc.smoke_test else {
        findings.push(Finding::warning(
            "smoke-test",
            "descriptor has no smoke test".to_string(),
        ));
        return;
    };

    if smoke.expect_substring.is_empty() {
        findings.push(Finding::warning(
            "smoke-test",
            "smoke test expects no output substring".to_string(),
        ));
    }

    let informational = smoke
        .args
        .iter()
        .any(|a| a == "--version" || a == "--help");
    if informational && smoke.expect_exit_code != 0 {
        findings.push(Finding::error(
            "smoke-test",
            format!(
                "smoke test runs {} but expects exit code {}",
                smoke.args.join(" "),
                smoke.expect_exit_code
            ),
        ));
    }
}

fn check_env_var(desc: &ReleaseDescriptor, findings: &mut Vec<Finding>) {
    if let Some(var) = desc.env.home_var.as_deref() {
        if var != CANONICAL_HOME_VAR {
            findings.push(Finding::warning(
                "env-var",
                format!(
                    "home variable '{}' differs from the canonical '{}'",
                    var, CANONICAL_HOME_VAR
                ),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{EnvSettings, InstallEntry, SmokeTest, Source};

    fn clean_descriptor() -> ReleaseDescriptor {
        ReleaseDescriptor {
            name: "repository-backup-cli".to_string(),
            version: "1.3.3".to_string(),
            description: None,
            homepage: None,
            license: "MIT".to_string(),
            source: Source {
                url: "https://example.com/archive/refs/tags/v1.3.3.tar.gz".to_string(),
                sha256: "3ef7dc61df01cfa542e21de81a2bbd1ffe0b3be6718190a9adb8914824bdb1a9"
                    .to_string(),
            },
            dependencies: Vec::new(),
            install: vec![
                InstallEntry {
                    kind: InstallKind::Bin,
                    source: "bin/repository_backup.sh".to_string(),
                    rename: Some("repository_backup".to_string()),
                },
                InstallEntry {
                    kind: InstallKind::Share,
                    source: "core".to_string(),
                    rename: None,
                },
            ],
            env: EnvSettings {
                home_var: Some(CANONICAL_HOME_VAR.to_string()),
            },
            caveats: None,
            smoke_test: Some(SmokeTest {
                args: vec!["--version".to_string()],
                expect_substring: "repository_backup".to_string(),
                expect_exit_code: 0,
            }),
        }
    }

    #[test]
    fn test_clean_descriptor_has_no_errors() {
        let findings = lint_descriptor(&clean_descriptor());
        assert!(!has_errors(&findings), "unexpected: {:?}", findings);
    }

    #[test]
    fn test_checksum_wrong_length() {
        let mut desc = clean_descriptor();
        desc.source.sha256 = "abc123".to_string();

        let findings = lint_descriptor(&desc);
        assert!(findings
            .iter()
            .any(|f| f.check == "checksum-format" && f.severity == Severity::Error));
    }

    #[test]
    fn test_checksum_uppercase_is_warning() {
        let mut desc = clean_descriptor();
        desc.source.sha256 = desc.source.sha256.to_uppercase();

        let findings = lint_descriptor(&desc);
        let finding = findings
            .iter()
            .find(|f| f.check == "checksum-format")
            .unwrap();
        assert_eq!(finding.severity, Severity::Warning);
    }

    #[test]
    fn test_version_tag_mismatch_is_error() {
        // The real regression: URL tagged v1.1.0, version field stuck at 1.0.6
        let mut desc = clean_descriptor();
        desc.version = "1.0.6".to_string();
        desc.source.url = "https://example.com/archive/refs/tags/v1.1.0.tar.gz".to_string();

        let findings = lint_descriptor(&desc);
        let finding = findings.iter().find(|f| f.check == "version-tag").unwrap();
        assert_eq!(finding.severity, Severity::Error);
        assert!(finding.message.contains("1.0.6"));
        assert!(finding.message.contains("1.1.0"));
    }

    #[test]
    fn test_untagged_url_is_warning() {
        let mut desc = clean_descriptor();
        desc.source.url = "https://example.com/releases/latest.tar.gz".to_string();

        let findings = lint_descriptor(&desc);
        let finding = findings.iter().find(|f| f.check == "version-tag").unwrap();
        assert_eq!(finding.severity, Severity::Warning);
    }

    #[test]
    fn test_invalid_semver() {
        let mut desc = clean_descriptor();
        desc.version = "1.3".to_string();
        desc.source.url = "https://example.com/archive/refs/tags/v1.3.tar.gz".to_string();

        let findings = lint_descriptor(&desc);
        assert!(findings.iter().any(|f| f.check == "version-semver"));
    }

    #[test]
    fn test_missing_bin_entry() {
        let mut desc = clean_descriptor();
        desc.install.retain(|e| e.kind != InstallKind::Bin);

        let findings = lint_descriptor(&desc);
        assert!(findings
            .iter()
            .any(|f| f.check == "install-map" && f.message.contains("no bin entry")));
    }

    #[test]
    fn test_absolute_and_escaping_sources() {
        let mut desc = clean_descriptor();
        desc.install.push(InstallEntry {
            kind: InstallKind::Doc,
            source: "/etc/passwd".to_string(),
            rename: None,
        });
        desc.install.push(InstallEntry {
            kind: InstallKind::Doc,
            source: "../outside".to_string(),
            rename: None,
        });

        let findings = lint_descriptor(&desc);
        assert!(findings
            .iter()
            .any(|f| f.message.contains("must be relative")));
        assert!(findings
            .iter()
            .any(|f| f.message.contains("escapes the payload root")));
    }

    #[test]
    fn test_duplicate_install_target() {
        let mut desc = clean_descriptor();
        desc.install.push(InstallEntry {
            kind: InstallKind::Share,
            source: "other/core".to_string(),
            rename: None,
        });

        let findings = lint_descriptor(&desc);
        assert!(findings
            .iter()
            .any(|f| f.check == "install-map" && f.message.contains("duplicate install target")));
    }

    #[test]
    fn test_version_flag_with_nonzero_exit_is_error() {
        // The shipped --version / exit-code-1 anomaly
        let mut desc = clean_descriptor();
        desc.smoke_test.as_mut().unwrap().expect_exit_code = 1;

        let findings = lint_descriptor(&desc);
        let finding = findings.iter().find(|f| f.check == "smoke-test").unwrap();
        assert_eq!(finding.severity, Severity::Error);
    }

    #[test]
    fn test_missing_smoke_test_is_warning() {
        let mut desc = clean_descriptor();
        desc.smoke_test = None;

        let findings = lint_descriptor(&desc);
        let finding = findings.iter().find(|f| f.check == "smoke-test").unwrap();
        assert_eq!(finding.severity, Severity::Warning);
    }

    #[test]
    fn test_noncanonical_home_var_is_warning() {
        let mut desc = clean_descriptor();
        desc.env.home_var = Some("REPOSITORY_BACKUP_HOME".to_string());

        let findings = lint_descriptor(&desc);
        let finding = findings.iter().find(|f| f.check == "env-var").unwrap();
        assert_eq!(finding.severity, Severity::Warning);
    }

    #[test]
    fn test_payload_check_matches_files_and_directories() {
        let desc = clean_descriptor();
        let payload = vec![
            "bin/repository_backup.sh".to_string(),
            "core/backup.sh".to_string(),
            "README.md".to_string(),
        ];

        let findings = lint_against_payload(&desc, &payload);
        assert!(findings.is_empty(), "unexpected: {:?}", findings);
    }

    #[test]
    fn test_payload_check_flags_missing_source() {
        let desc = clean_descriptor();
        let payload = vec!["bin/repository_backup.sh".to_string()];

        let findings = lint_against_payload(&desc, &payload);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("'core'"));
    }

    #[test]
    fn test_audit_flags_republished_hash() {
        let a = clean_descriptor();
        let mut b = clean_descriptor();
        b.source.sha256 = "0".repeat(64);

        let tap = vec![
            (PathBuf::from("tap/a.json"), a),
            (PathBuf::from("tap/b.json"), b),
        ];
        let findings = audit_tap(&tap);
        assert!(findings
            .iter()
            .any(|f| f.check == "immutability" && f.severity == Severity::Error));
    }

    #[test]
    fn test_audit_accepts_identical_republication() {
        let tap = vec![
            (PathBuf::from("tap/a.json"), clean_descriptor()),
            (PathBuf::from("tap/b.json"), clean_descriptor()),
        ];
        assert!(audit_tap(&tap).is_empty());
    }

    #[test]
    fn test_audit_flags_home_var_drift() {
        let a = clean_descriptor();
        let mut b = clean_descriptor();
        b.version = "1.3.4".to_string();
        b.source.url = "https://example.com/archive/refs/tags/v1.3.4.tar.gz".to_string();
        b.env.home_var = Some("REPOSITORY_BACKUP_HOME".to_string());

        let tap = vec![
            (PathBuf::from("tap/a.json"), a),
            (PathBuf::from("tap/b.json"), b),
        ];
        let findings = audit_tap(&tap);
        assert!(findings
            .iter()
            .any(|f| f.check == "env-var" && f.message.contains("inconsistent")));
    }
}
