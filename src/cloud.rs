//! EC2 provisioning through the `aws` CLI
//!
//! Two operations: create the security group the database host lives in, and
//! launch one instance into it. Both go through a `ToolRunner` so tests can
//! script the CLI's answers.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::commands::cloud::{
    AuthorizeIngress, AwsCredentials, AwsEnv, CreateSecurityGroup, DescribeInstance,
    DescribeSecurityGroups, RunInstances, SshKeygenRemove, TagInstance, parse_instance_state,
};
use crate::config_file::{CloudConfig, DeploymentConfig};
use crate::error::DeployError;
use crate::ssh_runner::{CommandOutput, ToolRunner};

pub const SSH_PORT: u16 = 22;
pub const LISTENER_PORT: u16 = 1521;

const STATE_PENDING: &str = "pending";
const STATE_RUNNING: &str = "running";

#[derive(Debug, Deserialize)]
struct CredentialRow {
    #[serde(rename = "Access Key Id")]
    access_key_id: String,
    #[serde(rename = "Secret Access Key")]
    secret_access_key: String,
}

/// Read an AWS console credential export. When the file holds several rows
/// the last one is used.
pub fn parse_credentials(path: &Path) -> Result<AwsCredentials> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open credentials file {:?}", path))?;

    let mut last = None;
    for row in reader.deserialize::<CredentialRow>() {
        let row = row.with_context(|| {
            format!(
                "Failed to parse credentials file {:?} (expected 'Access Key Id' and 'Secret Access Key' columns)",
                path
            )
        })?;
        last = Some(row);
    }

    let row = last.ok_or_else(|| {
        DeployError::config(format!("Credentials file {:?} contains no keys", path))
    })?;
    debug!("Using access key {} from {:?}", row.access_key_id, path);

    Ok(AwsCredentials {
        access_key_id: row.access_key_id,
        secret_access_key: row.secret_access_key,
    })
}

/// Region and credentials for every `aws` call
pub fn aws_env(config: &DeploymentConfig, cloud: &CloudConfig) -> Result<AwsEnv> {
    let credentials = match &cloud.credentials_file {
        Some(file) => Some(parse_credentials(&config.resolve_path(file))?),
        None => {
            debug!("No credentials file configured, using the aws CLI credential chain");
            None
        }
    };
    Ok(AwsEnv {
        region: cloud.region.clone(),
        credentials,
    })
}

/// Instance returned by a successful launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedInstance {
    pub instance_id: String,
    pub public_dns: String,
}

pub struct Provisioner<R: ToolRunner> {
    config: DeploymentConfig,
    cloud: CloudConfig,
    env: AwsEnv,
    runner: R,
    sleeper: fn(Duration),
}

impl<R: ToolRunner> Provisioner<R> {
    /// Fails if the configuration has no `cloud` section
    pub fn new(config: DeploymentConfig, runner: R) -> Result<Self> {
        let cloud = config.cloud.clone().ok_or_else(|| {
            DeployError::config("The configuration has no \"cloud\" section")
        })?;
        let env = aws_env(&config, &cloud)?;
        Ok(Self {
            config,
            cloud,
            env,
            runner,
            sleeper: std::thread::sleep,
        })
    }

    pub fn with_sleeper(mut self, sleeper: fn(Duration)) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    /// Ports opened by `create_security_group`
    pub fn ingress_ports(&self) -> Vec<u16> {
        let mut ports = vec![SSH_PORT, self.config.oracle.version.em_port()];
        if self.cloud.open_listener_port {
            ports.push(LISTENER_PORT);
        }
        ports
    }

    /// Create the security group and open the SSH and Enterprise Manager
    /// ports. Returns the group id.
    pub fn create_security_group(&mut self) -> Result<String> {
        let name = self.cloud.security_group_name.clone();

        let existing = self.runner.run_tool(&DescribeSecurityGroups {
            env: self.env.clone(),
            group_name: name.clone(),
        })?;
        existing.ensure_success("List security groups")?;
        if !existing.stdout.trim().is_empty() {
            anyhow::bail!(DeployError::cloud(format!(
                "Security group already exists: {} ({})",
                name,
                existing.stdout.trim()
            )));
        }

        let created = self.runner.run_tool(&CreateSecurityGroup {
            env: self.env.clone(),
            group_name: name.clone(),
            description: format!("Security group for {}", name),
        })?;
        created.ensure_success("Create security group")?;
        let group_id = if created.dry_run {
            format!("<{}>", name)
        } else {
            created.stdout.trim().to_string()
        };
        if group_id.is_empty() {
            anyhow::bail!(DeployError::cloud("create-security-group returned no group id"));
        }
        info!("Created security group {} ({})", name, group_id);

        for port in self.ingress_ports() {
            self.runner
                .run_tool(&AuthorizeIngress {
                    env: self.env.clone(),
                    group_id: group_id.clone(),
                    port,
                    cidr: self.cloud.ingress_cidr.clone(),
                })?
                .ensure_success(&format!("Authorize TCP {}", port))?;
            println!("  ✓ TCP {} open to {}", port, self.cloud.ingress_cidr);
        }

        Ok(group_id)
    }

    /// Launch one instance, wait for it to run and for SSH to answer.
    /// `probe` receives the public DNS name and checks SSH reachability.
    pub fn launch_instance<P>(&mut self, mut probe: P) -> Result<LaunchedInstance>
    where
        P: FnMut(&str, u32, u32) -> Result<CommandOutput>,
    {
        let key_name = self.config.key_pair_name();
        if key_name.is_empty() {
            anyhow::bail!(DeployError::config(
                "host.key_file must name the EC2 key pair (e.g. oracle-database.pem)"
            ));
        }

        let launched = self.runner.run_tool(&RunInstances {
            env: self.env.clone(),
            ami_id: self.cloud.ami_id.clone(),
            instance_type: self.cloud.instance_type.clone(),
            key_name,
            security_group: self.cloud.security_group_name.clone(),
        })?;
        launched.ensure_success("Launch instance")?;

        if launched.dry_run {
            info!("[DRY RUN] Instance not launched; skipping state polling");
            return Ok(LaunchedInstance {
                instance_id: "<instance-id>".to_string(),
                public_dns: "<public-dns>".to_string(),
            });
        }

        let instance_id = launched.stdout.trim().to_string();
        if instance_id.is_empty() {
            anyhow::bail!(DeployError::cloud("run-instances returned no instance id"));
        }
        println!("  Launched {}", instance_id);

        let (state, public_dns) = self.wait_until_started(&instance_id)?;
        if state != STATE_RUNNING {
            anyhow::bail!(DeployError::cloud(format!(
                "Instance {} did not start (state: {})",
                instance_id, state
            )));
        }
        if public_dns.is_empty() {
            anyhow::bail!(DeployError::cloud(format!(
                "Instance {} is running but has no public DNS name",
                instance_id
            )));
        }
        println!("  Public DNS: {}", public_dns);

        match self.runner.run_tool(&SshKeygenRemove {
            host: public_dns.clone(),
        }) {
            Ok(output) if output.success => {}
            Ok(output) => warn!("ssh-keygen -R {} failed: {}", public_dns, output.stderr.trim()),
            Err(e) => warn!("ssh-keygen -R {} failed: {:#}", public_dns, e),
        }

        let reachable = probe(
            &public_dns,
            self.cloud.ssh_wait_timeout_secs,
            self.cloud.ssh_wait_attempts,
        )?;
        if !reachable.success {
            anyhow::bail!(DeployError::connection(format!(
                "Instance {} is running but SSH to {} did not answer: {}",
                instance_id,
                public_dns,
                reachable.stderr.trim()
            )));
        }

        Ok(LaunchedInstance {
            instance_id,
            public_dns,
        })
    }

    /// Poll while the instance is pending, tagging it as soon as the API
    /// accepts the tag. Returns the first non-pending state.
    fn wait_until_started(&mut self, instance_id: &str) -> Result<(String, String)> {
        let mut tagged = false;
        loop {
            let described = self.runner.run_tool(&DescribeInstance {
                env: self.env.clone(),
                instance_id: instance_id.to_string(),
            })?;
            described.ensure_success("Describe instance")?;
            let (state, dns) = parse_instance_state(&described.stdout).ok_or_else(|| {
                DeployError::cloud(format!("Could not read the state of instance {}", instance_id))
            })?;

            if state != STATE_PENDING {
                if !tagged {
                    self.try_tag(instance_id);
                }
                return Ok((state, dns));
            }

            if !tagged {
                tagged = self.try_tag(instance_id);
            }
            debug!("Instance {} is pending", instance_id);
            (self.sleeper)(Duration::from_secs(self.cloud.poll_interval_secs));
        }
    }

    fn try_tag(&mut self, instance_id: &str) -> bool {
        let tag = TagInstance {
            env: self.env.clone(),
            instance_id: instance_id.to_string(),
            name: self.cloud.instance_name.clone(),
        };
        match self.runner.run_tool(&tag) {
            Ok(output) if output.success => {
                info!("Tagged {} as {}", instance_id, self.cloud.instance_name);
                true
            }
            Ok(output) => {
                warn!("Tagging {} failed, will retry: {}", instance_id, output.stderr.trim());
                false
            }
            Err(e) => {
                warn!("Tagging {} failed, will retry: {:#}", instance_id, e);
                false
            }
        }
    }
}

/// Point `host.address` at the launched instance and save the file
pub fn write_launched_address(
    config: &mut DeploymentConfig,
    instance: &LaunchedInstance,
    path: &Path,
) -> Result<()> {
    config.host.address = instance.public_dns.clone();
    config.save_to_file(path)?;
    info!("Wrote host.address = {} to {:?}", instance.public_dns, path);
    Ok(())
}
