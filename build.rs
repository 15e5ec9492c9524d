// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("tapcask")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Tapcask Contributors")
        .about("Release-descriptor toolkit: lint, fetch, verify, install")
        .subcommand_required(false)
        .subcommand(
            Command::new("init")
                .about("Initialize the Tapcask install-state database")
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .value_name("PATH")
                        .default_value("/var/lib/tapcask/tapcask.db")
                        .help("Database path"),
                ),
        )
        .subcommand(
            Command::new("lint")
                .about("Lint a descriptor file or every descriptor in a tap directory")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .help("Descriptor file or tap directory"),
                )
                .arg(
                    Arg::new("archive")
                        .short('a')
                        .long("archive")
                        .help("Local release archive to check the install mapping against"),
                ),
        )
        .subcommand(
            Command::new("audit")
                .about("Run cross-release audit checks over a tap directory")
                .arg(Arg::new("tap_dir").required(true).help("Tap directory")),
        )
        .subcommand(
            Command::new("fetch")
                .about("Download and verify a descriptor's release archive")
                .arg(Arg::new("descriptor").required(true).help("Descriptor file"))
                .arg(
                    Arg::new("dest")
                        .short('d')
                        .long("dest")
                        .default_value(".")
                        .help("Directory to place the archive in"),
                ),
        )
        .subcommand(
            Command::new("install")
                .about("Install a descriptor's release")
                .arg(Arg::new("descriptor").required(true).help("Descriptor file"))
                .arg(
                    Arg::new("archive")
                        .short('a')
                        .long("archive")
                        .help("Local archive to install from (fetched when omitted)"),
                )
                .arg(
                    Arg::new("prefix")
                        .short('p')
                        .long("prefix")
                        .default_value("/usr/local")
                        .help("Install prefix"),
                )
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("/var/lib/tapcask/tapcask.db"),
                ),
        )
        .subcommand(
            Command::new("uninstall")
                .about("Remove an installed package")
                .arg(Arg::new("name").required(true).help("Package name to remove"))
                .arg(
                    Arg::new("version")
                        .short('V')
                        .long("version")
                        .help("Version to remove (required when several are installed)"),
                )
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("/var/lib/tapcask/tapcask.db"),
                ),
        )
        .subcommand(
            Command::new("test")
                .about("Smoke-test an installed package against its descriptor")
                .arg(Arg::new("descriptor").required(true).help("Descriptor file"))
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("/var/lib/tapcask/tapcask.db"),
                ),
        )
        .subcommand(
            Command::new("info")
                .about("Show descriptor metadata and rendered caveats")
                .arg(Arg::new("descriptor").required(true).help("Descriptor file"))
                .arg(
                    Arg::new("prefix")
                        .short('p')
                        .long("prefix")
                        .default_value("/usr/local")
                        .help("Install prefix used for rendering paths"),
                ),
        )
        .subcommand(
            Command::new("query")
                .about("Query installed packages")
                .arg(Arg::new("name").help("Package name (optional)"))
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("/var/lib/tapcask/tapcask.db"),
                ),
        )
        .subcommand(
            Command::new("history")
                .about("Show changeset history")
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("/var/lib/tapcask/tapcask.db"),
                ),
        )
        .subcommand(
            Command::new("rollback")
                .about("Rollback an install changeset")
                .arg(
                    Arg::new("changeset_id")
                        .required(true)
                        .help("Changeset ID to rollback"),
                )
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("/var/lib/tapcask/tapcask.db"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell to generate for"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("tapcask.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
