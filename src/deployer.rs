//! Task runner
//!
//! Expands a task or phase into ordered `Step`s and executes them against a
//! `RemoteExecutor`. The first failing step aborts the run; nothing is
//! retried or rolled back.
//!
//! `deploy` walks every task through the `DeployContext` state machine.
//! `run` executes a selection directly. `plan` renders the same steps
//! without connecting to anything.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::command_traits::{RemoteCommand, redact};
use crate::commands::oracle::{
    CheckInstance, CreateDatabase, MakeStagingDir, RunInstaller, RunRootScript, StartListener,
    UnzipMedia, parse_instance_status,
};
use crate::commands::packages::{YumInstall, YumMakecache, YumUpgrade};
use crate::commands::system::{
    ChownTree, EnsureGroup, EnsureUser, GetSysctl, MakeDirectories, Reboot, SetSysctl, WriteFile,
};
use crate::config_file::DeploymentConfig;
use crate::deploy_state::{DeployContext, DeployStage, StageTransitionError};
use crate::error::DeployError;
use crate::ssh_runner::RemoteExecutor;
use crate::templates::{
    LIMITS_CONF_PATH, SYSCTL_CONF_PATH, limits_conf, needs_update, render_response_file,
    sysctl_conf,
};
use crate::types::{Task, TaskSelector};

/// SSH probe settings while waiting for the host to come back from a reboot
pub const REBOOT_PROBE_TIMEOUT_SECS: u32 = 15;
pub const REBOOT_PROBE_ATTEMPTS: u32 = 12;

/// One unit of work inside a task
pub enum Step {
    Remote(Box<dyn RemoteCommand>),
    Upload { local: PathBuf, remote: String },
    WaitForReboot { secs: u64 },
    Probe { timeout_secs: u32, attempts: u32 },
}

impl Step {
    fn remote(command: impl RemoteCommand + 'static) -> Self {
        Self::Remote(Box::new(command))
    }

    /// Plan line for this step, secrets redacted
    pub fn render(&self, login_user: &str) -> String {
        match self {
            Self::Remote(cmd) => format!(
                "{}\n      $ {}",
                cmd.describe(),
                redact(&cmd.wrapped(login_user), &cmd.secrets())
            ),
            Self::Upload { local, remote } => {
                format!("Upload {}\n      $ scp {} {}", local.display(), local.display(), remote)
            }
            Self::WaitForReboot { secs } => format!("Wait {}s for the host to reboot", secs),
            Self::Probe {
                timeout_secs,
                attempts,
            } => format!(
                "Probe SSH (timeout {}s, {} attempt(s))\n      $ uname -a",
                timeout_secs, attempts
            ),
        }
    }
}

/// Ordered steps for `task`. For `tune-kernel` this lists every possible
/// change; at run time parameters already at or above target are skipped.
pub fn task_steps(config: &DeploymentConfig, task: Task) -> Result<Vec<Step>> {
    let oracle = &config.oracle;
    let home = config.oracle_home();
    let mut steps = Vec::new();

    match task {
        Task::CheckSsh => steps.push(Step::Probe {
            timeout_secs: config.host.connect_timeout_secs,
            attempts: config.host.connection_attempts,
        }),

        Task::InstallPackages => {
            if config.packages.refresh_cache {
                steps.push(Step::remote(YumMakecache));
            }
            steps.push(Step::remote(YumInstall {
                packages: config.package_list()?,
            }));
        }

        Task::UpgradeHost => {
            if config.system.upgrade_packages {
                steps.push(Step::remote(YumMakecache));
                steps.push(Step::remote(YumUpgrade));
                steps.push(Step::remote(Reboot));
                steps.push(Step::WaitForReboot {
                    secs: config.system.reboot_wait_secs,
                });
                steps.push(Step::Probe {
                    timeout_secs: REBOOT_PROBE_TIMEOUT_SECS,
                    attempts: REBOOT_PROBE_ATTEMPTS,
                });
            }
        }

        Task::TuneKernel => {
            let params = config.kernel_parameters();
            for (key, value) in &params {
                steps.push(Step::remote(GetSysctl { key: key.clone() }));
                steps.push(Step::remote(SetSysctl {
                    key: key.clone(),
                    value: value.clone(),
                }));
            }
            steps.extend(kernel_file_steps(config, &params));
        }

        Task::CreateOracleUser => {
            steps.push(Step::remote(EnsureGroup {
                name: oracle.install_group.clone(),
            }));
            if oracle.dba_group != oracle.install_group {
                steps.push(Step::remote(EnsureGroup {
                    name: oracle.dba_group.clone(),
                }));
            }
            steps.push(Step::remote(EnsureUser {
                name: oracle.os_user.clone(),
                primary_group: oracle.install_group.clone(),
                secondary_group: oracle.dba_group.clone(),
            }));
            steps.push(Step::remote(MakeDirectories {
                paths: vec![
                    oracle.oracle_base.clone(),
                    home.clone(),
                    oracle.inventory_dir.clone(),
                ],
                owner: oracle.os_user.clone(),
                group: oracle.install_group.clone(),
                mode: "775".to_string(),
            }));
        }

        Task::StageMedia => {
            if oracle.media.is_empty() {
                anyhow::bail!(DeployError::validation(
                    "oracle.media must list at least one installer archive"
                ));
            }
            let staging = oracle.staging_dir.trim_end_matches('/').to_string();

            steps.push(Step::remote(MakeStagingDir {
                path: staging.clone(),
                login_user: config.host.user.clone(),
            }));

            let mut archives = Vec::with_capacity(oracle.media.len());
            for media in &oracle.media {
                let name = media
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .ok_or_else(|| {
                        DeployError::validation(format!("oracle.media entry {:?} has no file name", media))
                    })?;
                steps.push(Step::Upload {
                    local: config.resolve_path(media),
                    remote: format!("{}/{}", staging, name),
                });
                archives.push(name);
            }

            steps.push(Step::remote(ChownTree {
                path: staging.clone(),
                owner: oracle.os_user.clone(),
                group: oracle.install_group.clone(),
            }));
            for archive in archives {
                steps.push(Step::remote(UnzipMedia {
                    staging_dir: staging.clone(),
                    archive,
                    os_user: oracle.os_user.clone(),
                }));
            }
            steps.push(Step::remote(WriteFile {
                path: config.remote_response_file(),
                content: render_response_file(config)?,
                mode: "644".to_string(),
            }));
        }

        Task::InstallSoftware => steps.push(Step::remote(RunInstaller {
            staging_dir: oracle.staging_dir.clone(),
            response_file: config.remote_response_file(),
            os_user: oracle.os_user.clone(),
        })),

        Task::RunRootScripts => {
            for script in RunRootScript::for_config(config) {
                steps.push(Step::remote(script));
            }
        }

        Task::CreateDatabase => {
            steps.push(Step::remote(StartListener {
                oracle_home: home.clone(),
                sid: oracle.sid.clone(),
                os_user: oracle.os_user.clone(),
            }));
            steps.push(Step::remote(CreateDatabase::from_config(config)));
        }

        Task::Verify => steps.push(Step::remote(check_instance(config))),
    }

    Ok(steps)
}

fn kernel_file_steps(config: &DeploymentConfig, params: &BTreeMap<String, String>) -> [Step; 2] {
    [
        Step::remote(WriteFile {
            path: SYSCTL_CONF_PATH.to_string(),
            content: sysctl_conf(params),
            mode: "644".to_string(),
        }),
        Step::remote(WriteFile {
            path: LIMITS_CONF_PATH.to_string(),
            content: limits_conf(&config.oracle.os_user),
            mode: "644".to_string(),
        }),
    ]
}

fn check_instance(config: &DeploymentConfig) -> CheckInstance {
    CheckInstance {
        oracle_home: config.oracle_home(),
        sid: config.oracle.sid.clone(),
        os_user: config.oracle.os_user.clone(),
    }
}

/// Human-readable plan for `selector`. Does not connect to the host.
pub fn plan(config: &DeploymentConfig, selector: TaskSelector) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for task in selector.tasks() {
        lines.push(format!("[{}] {}", task, task.description()));
        let steps = task_steps(config, task).with_context(|| format!("Cannot plan task '{}'", task))?;
        if steps.is_empty() {
            lines.push("  (skipped: system.upgrade_packages is false)".to_string());
        }
        for (i, step) in steps.iter().enumerate() {
            lines.push(format!("  {:>2}. {}", i + 1, step.render(&config.host.user)));
        }
        if task == Task::TuneKernel {
            lines.push("  (parameters already at or above target are left unchanged)".to_string());
        }
    }
    Ok(lines)
}

/// Runs deployment tasks against one host
pub struct Deployer<E: RemoteExecutor> {
    config: DeploymentConfig,
    executor: E,
    context: DeployContext,
    sleeper: fn(Duration),
}

impl<E: RemoteExecutor> Deployer<E> {
    pub fn new(config: DeploymentConfig, executor: E) -> Self {
        Self {
            config,
            executor,
            context: DeployContext::new(),
            sleeper: std::thread::sleep,
        }
    }

    /// Replace the function used to wait for reboots
    pub fn with_sleeper(mut self, sleeper: fn(Duration)) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// State of the last `deploy` run
    pub fn context(&self) -> &DeployContext {
        &self.context
    }

    /// Run every task of `selector` in order, stopping at the first failure
    pub fn run_selector(&mut self, selector: TaskSelector) -> Result<()> {
        let tasks = selector.tasks();
        let total = tasks.len();
        for (i, task) in tasks.into_iter().enumerate() {
            println!("==> [{}/{}] {}", i + 1, total, task.description());
            self.run_task(task)?;
        }
        Ok(())
    }

    /// Run a single task
    pub fn run_task(&mut self, task: Task) -> Result<()> {
        info!("Running task {}", task);
        let result = match task {
            Task::CheckSsh => self.check_ssh(),
            Task::TuneKernel => self.tune_kernel(),
            Task::Verify => self.verify(),
            _ => self.run_steps(task),
        };
        result.with_context(|| format!("Task '{}' failed", task))?;
        println!("  ✓ {}", task);
        Ok(())
    }

    /// Full deployment through the stage machine. Entering the reboot stage
    /// needs `allow_reboot` unless package upgrades are disabled.
    pub fn deploy(&mut self, allow_reboot: bool) -> Result<()> {
        self.context = DeployContext::new();
        if allow_reboot || !self.config.system.upgrade_packages {
            self.context.confirm_disruptive_operations();
        }

        self.enter(DeployStage::ValidatingConfig)?;
        let validated = self.config.validate_values().and_then(|()| {
            if self.context.is_disruptive_confirmed() {
                return Ok(());
            }
            Err(DeployError::from(StageTransitionError::MissingConfirmation {
                stage: DeployStage::UpgradingHost,
            })
            .into())
        });
        if let Err(e) = validated {
            let _ = self.context.fail();
            return Err(e.context("Deployment failed at stage 'Validating configuration'"));
        }

        let tasks = Task::all();
        let total = tasks.len();
        for (i, task) in tasks.into_iter().enumerate() {
            let stage = DeployStage::for_task(task);
            self.enter(stage)?;
            println!(
                "==> [{}/{}] {} ({}%)",
                i + 1,
                total,
                task.description(),
                self.context.progress_percent()
            );
            if let Err(e) = self.run_task(task) {
                let _ = self.context.fail();
                return Err(e.context(format!("Deployment failed at stage '{}'", stage)));
            }
        }

        self.enter(DeployStage::Completed)?;
        info!("Deployment of {} complete", self.config.oracle.global_db_name);
        Ok(())
    }

    fn enter(&mut self, stage: DeployStage) -> Result<()> {
        if let Err(e) = self.context.transition_to(stage) {
            let _ = self.context.fail();
            anyhow::bail!(DeployError::from(e));
        }
        debug!("Entered stage {}", stage);
        Ok(())
    }

    fn run_steps(&mut self, task: Task) -> Result<()> {
        let steps = task_steps(&self.config, task)?;
        if steps.is_empty() {
            info!("Nothing to do for {}", task);
            println!("  - skipped (system.upgrade_packages is false)");
        }
        for step in &steps {
            self.execute_step(step)?;
        }
        Ok(())
    }

    fn execute_step(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Remote(cmd) => {
                let output = self.executor.execute(&**cmd)?;
                output.ensure_success(&cmd.describe())
            }
            Step::Upload { local, remote } => {
                let output = self.executor.upload(local, remote)?;
                output.ensure_success(&format!("Upload of {}", local.display()))
            }
            Step::WaitForReboot { secs } => {
                if self.executor.is_dry_run() {
                    info!("[DRY RUN] Would wait {}s for reboot", secs);
                } else {
                    info!("Waiting {}s for the host to reboot", secs);
                    (self.sleeper)(Duration::from_secs(*secs));
                }
                Ok(())
            }
            Step::Probe {
                timeout_secs,
                attempts,
            } => {
                let output = self.executor.probe(*timeout_secs, *attempts)?;
                output.ensure_success("SSH probe")
            }
        }
    }

    fn check_ssh(&mut self) -> Result<()> {
        let host = &self.config.host;
        let output = self
            .executor
            .probe(host.connect_timeout_secs, host.connection_attempts)?;
        if !output.success {
            anyhow::bail!(DeployError::connection(format!(
                "Cannot reach {}@{}:{}: {}",
                host.user,
                host.address,
                host.port,
                output.stderr.trim()
            )));
        }
        println!("  {}", output.stdout.trim());
        Ok(())
    }

    fn tune_kernel(&mut self) -> Result<()> {
        let desired = self.config.kernel_parameters();
        let mut effective = BTreeMap::new();

        for (key, value) in &desired {
            let current = self.executor.execute(&GetSysctl { key: key.clone() })?;
            let current_value = current
                .success
                .then(|| current.stdout.split_whitespace().collect::<Vec<_>>().join(" "));

            match current_value {
                Some(cur) if !needs_update(&cur, value) => {
                    debug!("{} = {} already satisfies {}", key, cur, value);
                    effective.insert(key.clone(), cur);
                }
                other => {
                    if other.is_none() {
                        warn!("Could not read {}: {}", key, current.stderr.trim());
                    }
                    let set = SetSysctl {
                        key: key.clone(),
                        value: value.clone(),
                    };
                    self.executor.execute(&set)?.ensure_success(&set.describe())?;
                    effective.insert(key.clone(), value.clone());
                }
            }
        }

        for step in kernel_file_steps(&self.config, &effective) {
            self.execute_step(&step)?;
        }
        Ok(())
    }

    fn verify(&mut self) -> Result<()> {
        let cmd = check_instance(&self.config);
        let output = self.executor.execute(&cmd)?;
        let status = if output.success {
            parse_instance_status(&output.stdout)
        } else {
            None
        };

        match status.as_deref() {
            Some("OPEN") => {
                println!("  Instance {} is OPEN", self.config.oracle.sid);
                Ok(())
            }
            other => {
                let detail = match other {
                    Some(status) => status.to_string(),
                    None if !output.stderr.trim().is_empty() => output.stderr.trim().to_string(),
                    None => "unknown".to_string(),
                };
                let message = format!(
                    "Instance {} is not open (status: {})",
                    self.config.oracle.sid, detail
                );
                if self.executor.is_dry_run() {
                    warn!("[DRY RUN] {}", message);
                    return Ok(());
                }
                anyhow::bail!(DeployError::remote(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh_runner::{CommandOutput, RecordingExecutor};
    use crate::types::Phase;
    use std::fs;
    use tempfile::TempDir;

    fn no_sleep(_: Duration) {}

    fn test_config(dir: &TempDir) -> DeploymentConfig {
        fs::write(dir.path().join("db.zip"), "zip").unwrap();
        let mut config = DeploymentConfig::default().with_base_dir(dir.path());
        config.host.address = "db.example.com".to_string();
        config.host.user = "ec2-user".to_string();
        config.oracle.sys_password = "SysPass1".to_string();
        config.oracle.system_password = "SystemPass1".to_string();
        config.oracle.media = vec![PathBuf::from("db.zip")];
        config.packages.extra = vec!["libaio".to_string()];
        config
    }

    fn deployer(config: DeploymentConfig, executor: RecordingExecutor) -> Deployer<RecordingExecutor> {
        Deployer::new(config, executor).with_sleeper(no_sleep)
    }

    #[test]
    fn test_install_packages_sequence() {
        let dir = TempDir::new().unwrap();
        let mut d = deployer(test_config(&dir), RecordingExecutor::new("ec2-user"));
        d.run_task(Task::InstallPackages).unwrap();
        assert_eq!(d.executor().commands, vec!["yum -y makecache", "yum -y install libaio"]);
        assert_eq!(d.executor().wrapped[0], "sudo -n bash -c 'yum -y makecache'");
    }

    #[test]
    fn test_upgrade_host_skipped_by_default() {
        let dir = TempDir::new().unwrap();
        let mut d = deployer(test_config(&dir), RecordingExecutor::new("root"));
        d.run_task(Task::UpgradeHost).unwrap();
        assert!(d.executor().commands.is_empty());
        assert!(d.executor().probes.is_empty());
    }

    #[test]
    fn test_upgrade_host_reboots_and_probes() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.system.upgrade_packages = true;
        let mut d = deployer(config, RecordingExecutor::new("root"));
        d.run_task(Task::UpgradeHost).unwrap();

        let ex = d.executor();
        assert_eq!(ex.commands.len(), 3);
        assert!(ex.position("makecache") < ex.position("upgrade"));
        assert!(ex.position("upgrade") < ex.position("reboot"));
        assert_eq!(ex.probes, vec![(REBOOT_PROBE_TIMEOUT_SECS, REBOOT_PROBE_ATTEMPTS)]);
    }

    #[test]
    fn test_kernel_tuning_only_raises_lower_values() {
        let dir = TempDir::new().unwrap();
        let executor = RecordingExecutor::new("root")
            .respond("sysctl -n kernel.shmmax", CommandOutput::success("68719476736\n"))
            .respond("sysctl -n fs.file-max", CommandOutput::success("65536\n"))
            .respond("sysctl -n kernel.sem", CommandOutput::success("250\t32000\t100\t128\n"))
            .respond("sysctl -n", CommandOutput::success("0\n"));
        let mut d = deployer(test_config(&dir), executor);
        d.run_task(Task::TuneKernel).unwrap();

        let ex = d.executor();
        assert!(!ex.ran("sysctl -w kernel.shmmax"));
        assert!(!ex.ran("sysctl -w 'kernel.sem"));
        assert!(ex.ran("sysctl -w fs.file-max=6815744"));
        assert!(ex.ran("sysctl -w fs.aio-max-nr=1048576"));

        // The persisted file keeps the higher live value
        let sysctl_file = ex
            .commands
            .iter()
            .find(|c| c.contains(SYSCTL_CONF_PATH))
            .unwrap();
        assert!(sysctl_file.contains("kernel.shmmax = 68719476736"));
        assert!(ex.ran(LIMITS_CONF_PATH));
    }

    #[test]
    fn test_stage_media_order() {
        let dir = TempDir::new().unwrap();
        let mut d = deployer(test_config(&dir), RecordingExecutor::new("ec2-user"));
        d.run_task(Task::StageMedia).unwrap();

        let ex = d.executor();
        assert_eq!(
            ex.uploads,
            vec![(dir.path().join("db.zip"), "/tmp/oracle-media/db.zip".to_string())]
        );
        let mkdir = ex.position("mkdir -p /tmp/oracle-media").unwrap();
        let chown = ex.position("chown -R oracle:oinstall").unwrap();
        let unzip = ex.position("unzip -o -q db.zip").unwrap();
        let rsp = ex.position("db_install.rsp").unwrap();
        assert!(mkdir < chown && chown < unzip && unzip < rsp);
    }

    #[test]
    fn test_stage_media_rerun_reclaims_uploads() {
        let dir = TempDir::new().unwrap();
        let mut d = deployer(test_config(&dir), RecordingExecutor::new("ec2-user"));
        d.run_task(Task::StageMedia).unwrap();
        d.run_task(Task::StageMedia).unwrap();

        // Each run hands the tree back to the login user before uploading
        let ex = d.executor();
        let reclaims: Vec<usize> = ex
            .commands
            .iter()
            .enumerate()
            .filter(|(_, c)| c.contains("chown -R ec2-user /tmp/oracle-media"))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(reclaims.len(), 2);
        let second_chown_to_oracle = ex
            .commands
            .iter()
            .rposition(|c| c.contains("chown -R oracle:oinstall"))
            .unwrap();
        assert!(reclaims[1] < second_chown_to_oracle);
        assert_eq!(ex.uploads.len(), 2);
    }

    #[test]
    fn test_stage_media_requires_archives() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.oracle.media.clear();
        let mut d = deployer(config, RecordingExecutor::new("root"));
        let err = d.run_task(Task::StageMedia).unwrap_err();
        assert!(format!("{:#}", err).contains("oracle.media"));
    }

    #[test]
    fn test_installer_warning_exit_code_accepted() {
        let dir = TempDir::new().unwrap();
        let executor = RecordingExecutor::new("root")
            .respond("runInstaller", CommandOutput::failure(6, "[WARNING] prerequisites"));
        let mut d = deployer(test_config(&dir), executor);
        assert!(d.run_task(Task::InstallSoftware).is_ok());
    }

    #[test]
    fn test_failure_names_task_and_stops() {
        let dir = TempDir::new().unwrap();
        let executor = RecordingExecutor::new("root")
            .respond("orainstRoot.sh", CommandOutput::failure(1, "permission denied"));
        let mut d = deployer(test_config(&dir), executor);

        let err = d.run_selector(TaskSelector::Phase(Phase::Install)).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("Task 'run-root-scripts' failed"));
        assert!(msg.contains("permission denied"));
        assert!(!d.executor().commands.iter().any(|c| c.ends_with("/root.sh")));
    }

    #[test]
    fn test_verify_requires_open() {
        let dir = TempDir::new().unwrap();
        let executor = RecordingExecutor::new("root")
            .respond("v$instance", CommandOutput::success("MOUNTED\n"));
        let mut d = deployer(test_config(&dir), executor);
        let err = d.run_task(Task::Verify).unwrap_err();
        assert!(format!("{:#}", err).contains("status: MOUNTED"));

        let executor = RecordingExecutor::new("root")
            .respond("v$instance", CommandOutput::success("OPEN\n"));
        let mut d = deployer(test_config(&dir), executor);
        assert!(d.run_task(Task::Verify).is_ok());
    }

    #[test]
    fn test_check_ssh_failure_is_connection_error() {
        let dir = TempDir::new().unwrap();
        let executor = RecordingExecutor::new("root")
            .with_probe_result(CommandOutput::failure(255, "Connection timed out"));
        let mut d = deployer(test_config(&dir), executor);
        let err = d.run_task(Task::CheckSsh).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::Connection(_))
        ));
    }

    #[test]
    fn test_dry_run_skips_mutating_commands() {
        let dir = TempDir::new().unwrap();
        let executor = RecordingExecutor::new("root").with_dry_run(true);
        let mut d = deployer(test_config(&dir), executor);
        d.run_selector(TaskSelector::Phase(Phase::Install)).unwrap();

        let ex = d.executor();
        assert!(ex.commands.is_empty());
        assert!(ex.uploads.is_empty());
        assert!(ex.skipped.iter().any(|c| c.contains("runInstaller")));
    }

    #[test]
    fn test_deploy_runs_every_task_and_completes() {
        let dir = TempDir::new().unwrap();
        let executor = RecordingExecutor::new("root")
            .respond("v$instance", CommandOutput::success("OPEN\n"))
            .respond("sysctl -n", CommandOutput::success("0\n"));
        let mut d = deployer(test_config(&dir), executor);
        d.deploy(false).unwrap();

        assert!(d.context().is_complete());
        let ex = d.executor();
        assert!(ex.position("yum -y install") < ex.position("runInstaller"));
        assert!(ex.position("runInstaller") < ex.position("dbca"));
        assert!(ex.position("dbca") < ex.position("v$instance"));
    }

    #[test]
    fn test_deploy_with_upgrade_requires_allow_reboot() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.system.upgrade_packages = true;
        let mut d = deployer(config, RecordingExecutor::new("root"));

        let err = d.deploy(false).unwrap_err();
        assert!(format!("{:#}", err).contains("--allow-reboot"));
        assert_eq!(d.context().failed_at(), Some(DeployStage::ValidatingConfig));
        assert!(d.executor().commands.is_empty());
        assert!(d.executor().probes.is_empty());

        let mut d = deployer(d.config().clone(), RecordingExecutor::new("root"));
        d.deploy(true).unwrap_err();
        assert!(d.executor().ran("yum -y upgrade"));
    }

    #[test]
    fn test_deploy_failure_records_stage() {
        let dir = TempDir::new().unwrap();
        let executor = RecordingExecutor::new("root")
            .respond("sysctl -n", CommandOutput::success("0\n"))
            .respond("dbca", CommandOutput::failure(1, "DBT-06103"));
        let mut d = deployer(test_config(&dir), executor);

        let err = d.deploy(false).unwrap_err();
        assert!(format!("{:#}", err).contains("Creating database"));
        assert!(d.context().is_failed());
        assert_eq!(d.context().failed_at(), Some(DeployStage::CreatingDatabase));
        assert!(!d.executor().ran("v$instance"));
    }

    #[test]
    fn test_deploy_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.oracle.sid = "not valid".to_string();
        let mut d = deployer(config, RecordingExecutor::new("root"));
        assert!(d.deploy(false).is_err());
        assert_eq!(d.context().failed_at(), Some(DeployStage::ValidatingConfig));
        assert!(d.executor().probes.is_empty());
    }

    #[test]
    fn test_plan_redacts_and_covers_selection() {
        let dir = TempDir::new().unwrap();
        let lines = plan(&test_config(&dir), TaskSelector::Phase(Phase::Configure)).unwrap();
        let text = lines.join("\n");
        assert!(text.starts_with("[create-database]"));
        assert!(text.contains("lsnrctl"));
        assert!(!text.contains("SysPass1"));
        assert!(text.contains("-sysPassword ******"));
    }

    #[test]
    fn test_plan_marks_skipped_upgrade() {
        let dir = TempDir::new().unwrap();
        let lines = plan(&test_config(&dir), TaskSelector::Task(Task::UpgradeHost)).unwrap();
        assert!(lines[1].contains("skipped"));
    }
}
