//! Pre-flight sanity checks for the local environment
//!
//! Verifies that the client-side tools a command shells out to are on PATH
//! before anything touches the remote host:
//! - `ssh` and `scp` for every command that talks to the host
//! - `aws` and `ssh-keygen` for the cloud commands

use anyhow::Result;
use std::process::Command;
use tracing::{debug, info};

use crate::error::DeployError;
use crate::process_guard::CommandProcessGroup;

/// Which local tools a command needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// SSH and SCP to the database host
    Remote,
    /// The AWS CLI plus SSH to the freshly launched instance
    Cloud,
}

impl Requirement {
    pub fn binaries(self) -> &'static [&'static str] {
        match self {
            Self::Remote => &["ssh", "scp"],
            Self::Cloud => &["aws", "ssh", "ssh-keygen"],
        }
    }
}

/// Result of environment verification
#[derive(Debug)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
}

impl SanityCheckResult {
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty()
    }
}

/// Check if a binary is available in PATH
fn binary_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .in_new_process_group()
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

pub fn verify_environment(requirement: Requirement) -> SanityCheckResult {
    let missing_binaries = requirement
        .binaries()
        .iter()
        .filter(|binary| !binary_exists(binary))
        .map(|binary| binary.to_string())
        .collect();

    SanityCheckResult { missing_binaries }
}

/// Package that provides a binary on common distributions
fn get_package_for_binary(binary: &str) -> &'static str {
    match binary {
        "ssh" | "scp" | "ssh-keygen" => "openssh-client / openssh-clients",
        "aws" => "awscli",
        _ => "unknown",
    }
}

/// Print the failure report to stderr
pub fn print_report(result: &SanityCheckResult) {
    eprintln!();
    eprintln!("╔══════════════════════════════════════════════════════════════════╗");
    eprintln!("║                 oradeploy - Pre-flight Check Failed              ║");
    eprintln!("╚══════════════════════════════════════════════════════════════════╝");
    eprintln!();
    eprintln!("❌ ERROR: Missing required binaries");
    eprintln!();
    for binary in &result.missing_binaries {
        eprintln!("   • {} (package: {})", binary, get_package_for_binary(binary));
    }
    eprintln!();
}

/// Verify the environment for `requirement`, printing a report on failure
pub fn run_preflight_checks(requirement: Requirement) -> Result<()> {
    debug!("Running pre-flight sanity checks for {:?}", requirement);

    let result = verify_environment(requirement);
    if !result.is_ok() {
        print_report(&result);
        anyhow::bail!(DeployError::config(format!(
            "Missing required binaries: {}",
            result.missing_binaries.join(", ")
        )));
    }

    info!("Pre-flight checks passed");
    Ok(())
}
