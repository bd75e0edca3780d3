//! oradeploy - Main entry point

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use oradeploy::cli::{Cli, CloudCommands, Commands};
use oradeploy::cloud::{Provisioner, write_launched_address};
use oradeploy::command_traits::enable_dry_run;
use oradeploy::config_file::DeploymentConfig;
use oradeploy::deployer::{Deployer, plan};
use oradeploy::process_guard::{self, ProcessGuard};
use oradeploy::sanity::{Requirement, run_preflight_checks};
use oradeploy::ssh_runner::{LocalToolRunner, RemoteExecutor, SshSession, SshTarget};
use oradeploy::types::OracleVersion;

/// Initialize the logger: level, file and line on every record
fn init_logger(verbose: bool) {
    let default = if verbose {
        "oradeploy=debug"
    } else {
        "oradeploy=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse_args();
    init_logger(cli.verbose);
    info!("oradeploy {} starting up", env!("CARGO_PKG_VERSION"));

    // Tracked ssh/scp/aws children are terminated on SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = ProcessGuard::new();

    if cli.dry_run {
        enable_dry_run();
        info!("Dry-run mode enabled: mutating commands will be logged, not executed");
    }

    if let Err(e) = run(cli.command) {
        error!("{:#}", e);
        eprintln!("✗ {:#}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Validate { config } => validate(&config),
        Commands::Init {
            path,
            oracle_version,
            force,
        } => init(&path, oracle_version, force),
        Commands::Plan { config, selector } => {
            let config = load(&config)?;
            for line in plan(&config, selector)? {
                println!("{}", line);
            }
            Ok(())
        }
        Commands::Deploy {
            config,
            allow_reboot,
        } => {
            let mut deployer = connect(&config)?;
            deployer.deploy(allow_reboot)?;
            println!("✓ Deployment complete ({})", deployer.config().oracle.global_db_name);
            Ok(())
        }
        Commands::Run { config, selector } => {
            let mut deployer = connect(&config)?;
            deployer.run_selector(selector)?;
            println!("✓ {} complete", selector);
            Ok(())
        }
        Commands::TestSsh {
            config,
            timeout,
            attempts,
        } => {
            let config = load(&config)?;
            config.validate()?;
            run_preflight_checks(Requirement::Remote)?;
            test_ssh(&config, timeout, attempts)
        }
        Commands::Cloud { cloud_command } => cloud(cloud_command),
    }
}

fn load(path: &Path) -> Result<DeploymentConfig> {
    info!("Loading configuration file: {:?}", path);
    DeploymentConfig::load_from_file(path)
}

fn validate(path: &Path) -> Result<()> {
    let config = load(path)?;
    config
        .validate()
        .with_context(|| format!("Configuration {:?} is invalid", path))?;
    info!("Configuration validation successful");
    println!(
        "✓ Configuration file is valid: {} {} on {}@{}",
        config.oracle.version, config.oracle.edition, config.host.user, config.host.address
    );
    Ok(())
}

fn init(path: &Path, version: OracleVersion, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{:?} already exists (use --force to overwrite)", path);
    }
    DeploymentConfig::starter(version).save_to_file(path)?;
    println!("✓ Wrote starter configuration for Oracle {} to {:?}", version, path);
    println!("  Set host.address, the passwords and oracle.media before deploying.");
    Ok(())
}

fn connect(path: &Path) -> Result<Deployer<SshSession>> {
    let config = load(path)?;
    config.validate()?;
    run_preflight_checks(Requirement::Remote)?;

    let target = SshTarget::from_config(&config)?;
    debug!("SSH target {}", target.destination());
    Ok(Deployer::new(config, SshSession::new(target)))
}

fn test_ssh(config: &DeploymentConfig, timeout: Option<u32>, attempts: Option<u32>) -> Result<()> {
    let target = SshTarget::from_config(config)?;
    let timeout = timeout.unwrap_or(target.connect_timeout_secs);
    let attempts = attempts.unwrap_or(target.connection_attempts);
    let destination = target.destination();

    let output = SshSession::new(target).probe(timeout, attempts)?;
    if !output.success {
        anyhow::bail!("SSH to {} failed: {}", destination, output.stderr.trim());
    }
    println!("✓ SSH to {} works", destination);
    println!("  {}", output.stdout.trim());
    Ok(())
}

fn cloud(command: CloudCommands) -> Result<()> {
    match command {
        CloudCommands::CreateSecurityGroup { config } => {
            let config = load(&config)?;
            run_preflight_checks(Requirement::Cloud)?;

            let mut provisioner = Provisioner::new(config, LocalToolRunner::new())?;
            let group_id = provisioner.create_security_group()?;
            println!("✓ Security group ready: {}", group_id);
            Ok(())
        }
        CloudCommands::Launch {
            config: path,
            write_config,
        } => {
            let config = load(&path)?;
            run_preflight_checks(Requirement::Cloud)?;
            let base_target = SshTarget::from_config(&config)?;

            let mut provisioner = Provisioner::new(config, LocalToolRunner::new())?;
            let instance = provisioner.launch_instance(|dns, timeout, attempts| {
                let target = SshTarget {
                    address: dns.to_string(),
                    ..base_target.clone()
                };
                SshSession::new(target).probe(timeout, attempts)
            })?;
            println!("✓ Instance {} running at {}", instance.instance_id, instance.public_dns);

            if write_config {
                let mut config = provisioner.config().clone();
                write_launched_address(&mut config, &instance, &path)?;
                println!("✓ Updated host.address in {:?}", path);
            }
            Ok(())
        }
    }
}
