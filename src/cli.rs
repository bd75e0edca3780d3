use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::types::{OracleVersion, TaskSelector};

const DEFAULT_CONFIG: &str = "deploy.json";

/// oradeploy - Oracle Database single-instance deployment over SSH
#[derive(Parser)]
#[command(name = "oradeploy")]
#[command(about = "Deploy Oracle Database 11gR2/12c on a single Linux host over SSH")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: show what would be executed without making changes.
    ///
    /// Commands that change the host or the cloud account are logged and
    /// skipped. Read-only probes (sysctl reads, instance status) still run
    /// so the preview is realistic.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
    /// Write a starter configuration
    Init {
        /// Where to write the configuration
        path: PathBuf,
        /// Oracle release (11gR2 or 12c)
        #[arg(long = "version", default_value = "11gR2")]
        oracle_version: OracleVersion,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the commands a run would execute
    Plan {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Phase (prepare, install, configure, verify, all) or task name
        #[arg(default_value = "all")]
        selector: TaskSelector,
    },
    /// Full deployment through every stage
    Deploy {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Permit the package upgrade stage to reboot the host
        #[arg(long)]
        allow_reboot: bool,
    },
    /// Run one task or phase
    Run {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Phase (prepare, install, configure, verify, all) or task name
        selector: TaskSelector,
    },
    /// Check that the host answers over SSH
    TestSsh {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Connect timeout in seconds (default: host.connect_timeout_secs)
        #[arg(long)]
        timeout: Option<u32>,
        /// Connection attempts (default: host.connection_attempts)
        #[arg(long)]
        attempts: Option<u32>,
    },
    /// EC2 provisioning
    Cloud {
        #[command(subcommand)]
        cloud_command: CloudCommands,
    },
}

#[derive(Subcommand)]
pub enum CloudCommands {
    /// Create the security group and open the SSH and Enterprise Manager ports
    CreateSecurityGroup {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Launch the database instance and wait for SSH
    Launch {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Store the instance's public DNS name as host.address
        #[arg(long)]
        write_config: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Phase, Task};
    use clap::Parser;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["oradeploy"]).is_err());
    }

    #[test]
    fn test_cli_validate_command() {
        let cli = Cli::try_parse_from(["oradeploy", "validate", "/path/to/deploy.json"]).unwrap();
        match cli.command {
            Commands::Validate { config } => {
                assert_eq!(config.to_str().unwrap(), "/path/to/deploy.json");
            }
            _ => panic!("Expected Validate command"),
        }
    }

    #[test]
    fn test_cli_init_version() {
        let cli =
            Cli::try_parse_from(["oradeploy", "init", "db.json", "--version", "12c", "--force"]).unwrap();
        match cli.command {
            Commands::Init {
                oracle_version,
                force,
                ..
            } => {
                assert_eq!(oracle_version, OracleVersion::V12c);
                assert!(force);
            }
            _ => panic!("Expected Init command"),
        }

        assert!(Cli::try_parse_from(["oradeploy", "init", "db.json", "--version", "10g"]).is_err());
    }

    #[test]
    fn test_cli_run_selector() {
        let cli = Cli::try_parse_from(["oradeploy", "run", "install"]).unwrap();
        match cli.command {
            Commands::Run { config, selector } => {
                assert_eq!(config, PathBuf::from("deploy.json"));
                assert_eq!(selector, TaskSelector::Phase(Phase::Install));
            }
            _ => panic!("Expected Run command"),
        }

        let cli = Cli::try_parse_from(["oradeploy", "run", "-c", "x.json", "tune-kernel"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Run {
                selector: TaskSelector::Task(Task::TuneKernel),
                ..
            }
        ));

        assert!(Cli::try_parse_from(["oradeploy", "run", "bogus"]).is_err());
        assert!(Cli::try_parse_from(["oradeploy", "run"]).is_err());
    }

    #[test]
    fn test_cli_plan_defaults_to_all() {
        let cli = Cli::try_parse_from(["oradeploy", "plan"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Plan {
                selector: TaskSelector::Phase(Phase::All),
                ..
            }
        ));
    }

    #[test]
    fn test_cli_global_flags() {
        let cli =
            Cli::try_parse_from(["oradeploy", "deploy", "--allow-reboot", "--dry-run", "-v"]).unwrap();
        assert!(cli.dry_run);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Deploy { allow_reboot: true, .. }));
    }

    #[test]
    fn test_cli_test_ssh_overrides() {
        let cli =
            Cli::try_parse_from(["oradeploy", "test-ssh", "--timeout", "5", "--attempts", "3"]).unwrap();
        match cli.command {
            Commands::TestSsh {
                timeout, attempts, ..
            } => {
                assert_eq!(timeout, Some(5));
                assert_eq!(attempts, Some(3));
            }
            _ => panic!("Expected TestSsh command"),
        }
    }

    #[test]
    fn test_cli_cloud_commands() {
        let cli = Cli::try_parse_from(["oradeploy", "cloud", "launch", "--write-config"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cloud {
                cloud_command: CloudCommands::Launch {
                    write_config: true,
                    ..
                }
            }
        ));

        let cli = Cli::try_parse_from(["oradeploy", "cloud", "create-security-group"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cloud {
                cloud_command: CloudCommands::CreateSecurityGroup { .. }
            }
        ));
    }
}
