// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use tapcask::descriptor::{self, ReleaseDescriptor};
use tapcask::install::InstallPrefix;
use tapcask::lint::{self, Finding};
use tapcask::{archive, db, fetch, install, smoke};
use tracing::info;

const DEFAULT_DB_PATH: &str = "/var/lib/tapcask/tapcask.db";
const DEFAULT_PREFIX: &str = "/usr/local";

#[derive(Parser)]
#[command(name = "tapcask")]
#[command(author, version, about = "Release-descriptor toolkit: lint, fetch, verify, install", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the Tapcask install-state database
    Init {
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Lint a descriptor file or every descriptor in a tap directory
    Lint {
        /// Descriptor file or tap directory
        path: String,
        /// Local release archive to check the install mapping against
        #[arg(short, long)]
        archive: Option<String>,
    },
    /// Run cross-release audit checks over a tap directory
    Audit {
        /// Tap directory
        tap_dir: String,
    },
    /// Download and verify a descriptor's release archive
    Fetch {
        /// Descriptor file
        descriptor: String,
        /// Directory to place the archive in
        #[arg(short, long, default_value = ".")]
        dest: String,
    },
    /// Install a descriptor's release
    Install {
        /// Descriptor file
        descriptor: String,
        /// Local archive to install from (fetched when omitted)
        #[arg(short, long)]
        archive: Option<String>,
        /// Install prefix
        #[arg(short, long, default_value = DEFAULT_PREFIX)]
        prefix: String,
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Remove an installed package
    Uninstall {
        /// Package name to remove
        name: String,
        /// Version to remove (required when several are installed)
        #[arg(short = 'V', long)]
        version: Option<String>,
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Smoke-test an installed package against its descriptor
    Test {
        /// Descriptor file
        descriptor: String,
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Show descriptor metadata and rendered caveats
    Info {
        /// Descriptor file
        descriptor: String,
        /// Install prefix used for rendering paths
        #[arg(short, long, default_value = DEFAULT_PREFIX)]
        prefix: String,
    },
    /// Query installed packages
    Query {
        /// Package name (optional, shows all if omitted)
        name: Option<String>,
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Show changeset history
    History {
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Rollback an install changeset
    Rollback {
        /// Changeset ID to rollback
        changeset_id: i64,
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate for
        shell: Shell,
    },
}

/// Print findings for one source, returning whether any were errors
fn report_findings(source: &str, findings: &[Finding]) -> bool {
    for finding in findings {
        println!(
            "{}: {} [{}] {}",
            source,
            finding.severity.as_str(),
            finding.check,
            finding.message
        );
    }
    lint::has_errors(findings)
}

fn lint_one(path: &Path, archive_path: Option<&Path>) -> Result<bool> {
    let desc = ReleaseDescriptor::from_file(path)?;
    let mut findings = lint::lint_descriptor(&desc);

    if let Some(archive_path) = archive_path {
        let payload = archive::list_payload(archive_path)?;
        findings.extend(lint::lint_against_payload(&desc, &payload));
    }

    if findings.is_empty() {
        println!("{}: ok", path.display());
    }
    Ok(report_findings(&path.display().to_string(), &findings))
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { db_path }) => {
            info!("Initializing Tapcask database at: {}", db_path);
            db::init(&db_path)?;
            println!("Database initialized successfully at: {}", db_path);
            Ok(())
        }
        Some(Commands::Lint { path, archive }) => {
            let path = PathBuf::from(path);
            let archive_path = archive.map(PathBuf::from);

            let mut failed = false;
            if path.is_dir() {
                if archive_path.is_some() {
                    return Err(anyhow::anyhow!(
                        "--archive applies to a single descriptor, not a tap directory"
                    ));
                }
                let tap = descriptor::load_tap(&path)?;
                if tap.is_empty() {
                    return Err(anyhow::anyhow!("No descriptors found in {}", path.display()));
                }
                for (file, desc) in &tap {
                    let findings = lint::lint_descriptor(desc);
                    if findings.is_empty() {
                        println!("{}: ok", file.display());
                    }
                    failed |= report_findings(&file.display().to_string(), &findings);
                }
                failed |= report_findings("tap", &lint::audit_tap(&tap));
            } else {
                failed = lint_one(&path, archive_path.as_deref())?;
            }

            if failed {
                return Err(anyhow::anyhow!("lint found errors"));
            }
            Ok(())
        }
        Some(Commands::Audit { tap_dir }) => {
            let tap = descriptor::load_tap(Path::new(&tap_dir))?;
            if tap.is_empty() {
                return Err(anyhow::anyhow!("No descriptors found in {}", tap_dir));
            }

            let findings = lint::audit_tap(&tap);
            if findings.is_empty() {
                println!("Audit passed: {} descriptor(s), no findings", tap.len());
                return Ok(());
            }
            if report_findings("tap", &findings) {
                return Err(anyhow::anyhow!("audit found errors"));
            }
            Ok(())
        }
        Some(Commands::Fetch { descriptor, dest }) => {
            let desc = ReleaseDescriptor::from_file(Path::new(&descriptor))?;
            info!("Fetching {} {}", desc.name, desc.version);

            let archive_path = fetch::fetch_archive(&desc, Path::new(&dest))?;
            println!("Fetched and verified: {}", archive_path.display());
            Ok(())
        }
        Some(Commands::Install {
            descriptor,
            archive,
            prefix,
            db_path,
        }) => {
            let desc = ReleaseDescriptor::from_file(Path::new(&descriptor))?;
            info!("Installing {} {}", desc.name, desc.version);

            // A descriptor that fails lint never reaches the filesystem
            let findings = lint::lint_descriptor(&desc);
            if report_findings(&descriptor, &findings) {
                return Err(anyhow::anyhow!(
                    "refusing to install a descriptor with lint errors"
                ));
            }

            let archive_path = match archive {
                Some(archive) => PathBuf::from(archive),
                None => {
                    let cache_dir = std::env::temp_dir().join("tapcask");
                    fetch::fetch_archive(&desc, &cache_dir)?
                }
            };

            let mut conn = db::open(&db_path)?;
            let install_prefix = InstallPrefix::new(&prefix);
            let report = install::install(&mut conn, &desc, &archive_path, &install_prefix)?;

            println!("Installed package: {} version {}", desc.name, desc.version);
            println!("  Executable: {}", report.bin_path.display());
            println!("  Files: {}", report.file_count);
            for dep in &desc.dependencies {
                println!("  Requires: {} ({:?})", dep.name, dep.kind);
            }
            if let Some(caveats) = report.caveats {
                println!("\n{}", caveats);
            }
            Ok(())
        }
        Some(Commands::Uninstall {
            name,
            version,
            db_path,
        }) => {
            let mut conn = db::open(&db_path)?;
            let report = install::uninstall(&mut conn, &name, version.as_deref())?;

            println!("Removed package: {} version {}", report.name, report.version);
            println!("  Files removed: {}", report.file_count);
            Ok(())
        }
        Some(Commands::Test {
            descriptor,
            db_path,
        }) => {
            let desc = ReleaseDescriptor::from_file(Path::new(&descriptor))?;
            let smoke_test = desc.smoke_test.as_ref().ok_or_else(|| {
                anyhow::anyhow!("descriptor for {} declares no smoke test", desc.name)
            })?;

            let conn = db::open(&db_path)?;
            let installed = db::models::InstalledPackage::find_by_name(&conn, &desc.name)?;
            let package = installed
                .iter()
                .find(|p| p.version == desc.version)
                .ok_or_else(|| {
                    anyhow::anyhow!("{} {} is not installed", desc.name, desc.version)
                })?;

            let bin_path = InstallPrefix::new(&package.prefix)
                .bin_dir()
                .join(&package.install_name);
            let report = smoke::run(&bin_path, smoke_test)?;

            println!(
                "Smoke test passed: {} {} (exit code {})",
                desc.name, desc.version, report.exit_code
            );
            Ok(())
        }
        Some(Commands::Info { descriptor, prefix }) => {
            let desc = ReleaseDescriptor::from_file(Path::new(&descriptor))?;
            let install_prefix = InstallPrefix::new(&prefix);

            println!("{} {}", desc.name, desc.version);
            if let Some(description) = &desc.description {
                println!("  {}", description);
            }
            if let Some(homepage) = &desc.homepage {
                println!("  Homepage: {}", homepage);
            }
            println!("  License: {}", desc.license);
            println!("  Source: {}", desc.source.url);
            println!("  SHA-256: {}", desc.source.sha256);
            for dep in &desc.dependencies {
                println!("  Depends on: {} ({:?})", dep.name, dep.kind);
            }
            for entry in &desc.install {
                println!(
                    "  Installs: {} -> {}/{}",
                    entry.source,
                    entry.kind.as_str(),
                    entry.target_name()
                );
            }
            if let Some(caveats) = desc.render_caveats(
                &install_prefix.bin_dir(),
                &install_prefix.pkgshare_dir(&desc.name),
            ) {
                println!("\n{}", caveats);
            }
            Ok(())
        }
        Some(Commands::Query { name, db_path }) => {
            let conn = db::open(&db_path)?;

            let packages = if let Some(name) = name {
                db::models::InstalledPackage::find_by_name(&conn, &name)?
            } else {
                db::models::InstalledPackage::list_all(&conn)?
            };

            if packages.is_empty() {
                println!("No packages found.");
            } else {
                println!("Installed packages:");
                for package in &packages {
                    println!(
                        "  {} {} ({}) in {}",
                        package.name, package.version, package.install_name, package.prefix
                    );
                }
                println!("\nTotal: {} package(s)", packages.len());
            }

            Ok(())
        }
        Some(Commands::History { db_path }) => {
            let conn = db::open(&db_path)?;

            let changesets = db::models::Changeset::list_all(&conn)?;

            if changesets.is_empty() {
                println!("No changeset history.");
            } else {
                println!("Changeset history:");
                for changeset in &changesets {
                    let timestamp = changeset
                        .applied_at
                        .as_ref()
                        .or(changeset.rolled_back_at.as_ref())
                        .or(changeset.created_at.as_ref())
                        .map(|s| s.as_str())
                        .unwrap_or("pending");

                    println!(
                        "  [{}] {} - {} ({:?})",
                        changeset.id.unwrap_or(0),
                        timestamp,
                        changeset.description,
                        changeset.status
                    );
                }
                println!("\nTotal: {} changeset(s)", changesets.len());
            }

            Ok(())
        }
        Some(Commands::Rollback {
            changeset_id,
            db_path,
        }) => {
            let mut conn = db::open(&db_path)?;
            let removed = install::rollback(&mut conn, changeset_id)?;

            println!(
                "Rollback complete. Changeset {} has been reversed ({} package(s) removed).",
                changeset_id, removed
            );
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "tapcask", &mut std::io::stdout());
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("Tapcask v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'tapcask --help' for usage information");
            Ok(())
        }
    }
}
