// src/smoke.rs

//! Post-install smoke testing
//!
//! Runs the installed executable once with the descriptor's smoke-test
//! arguments and checks the exit code and output substring. A failed smoke
//! test marks the release broken; nothing is retried.

use crate::descriptor::SmokeTest;
use crate::error::{Error, Result};
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// What the smoke-tested process actually did
#[derive(Debug)]
pub struct SmokeReport {
    pub exit_code: i32,
    /// Combined stdout and stderr
    pub output: String,
}

/// Run a smoke test against an installed executable
///
/// Returns the report on success; a wrong exit code or missing output
/// substring is an error.
pub fn run(bin_path: &Path, smoke: &SmokeTest) -> Result<SmokeReport> {
    if !bin_path.exists() {
        return Err(Error::SmokeTestError(format!(
            "installed executable {} does not exist",
            bin_path.display()
        )));
    }

    debug!(
        "Running smoke test: {} {}",
        bin_path.display(),
        smoke.args.join(" ")
    );

    let output = Command::new(bin_path)
        .args(&smoke.args)
        .output()
        .map_err(|e| {
            Error::SmokeTestError(format!("failed to run {}: {}", bin_path.display(), e))
        })?;

    let exit_code = output.status.code().unwrap_or(-1);
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if exit_code != smoke.expect_exit_code {
        return Err(Error::SmokeTestError(format!(
            "expected exit code {}, got {}",
            smoke.expect_exit_code, exit_code
        )));
    }

    if !combined.contains(&smoke.expect_substring) {
        return Err(Error::SmokeTestError(format!(
            "output does not contain '{}'",
            smoke.expect_substring
        )));
    }

    info!("Smoke test passed for {}", bin_path.display());
    Ok(SmokeReport {
        exit_code,
        output: combined,
    })
}
