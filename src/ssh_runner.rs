//! Remote and local command execution
//!
//! Every child process oradeploy starts goes through `spawn_tracked`, which:
//!
//! - isolates the child in its own process group (see `process_guard`)
//! - registers the PID for cleanup while the child runs
//! - redacts secrets from everything it logs or returns
//!
//! `SshSession` drives the target host through `ssh`/`scp`. `LocalToolRunner`
//! runs local tools such as the `aws` CLI. Both sit behind traits so the task
//! runner can be exercised without a real host.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

use crate::command_traits::{RemoteCommand, ToolArgs, is_dry_run, redact, shell_quote};
use crate::config_file::DeploymentConfig;
use crate::error::DeployError;
use crate::process_guard::{CommandProcessGroup, TrackedChild};

/// ssh exits with 255 when the connection itself fails
pub const SSH_CONNECTION_FAILURE: i32 = 255;

/// Output from a command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    /// Whether the exit code was one the command accepts
    pub success: bool,
    /// True if the command was skipped because of dry-run mode
    pub dry_run: bool,
}

impl CommandOutput {
    /// Synthetic successful output for a command skipped in dry-run mode
    pub fn skipped(description: &str) -> Self {
        Self {
            stdout: format!("[DRY RUN] Skipped: {}\n", description),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
            dry_run: true,
        }
    }

    /// Successful output with the given stdout
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
            dry_run: false,
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            success: false,
            dry_run: false,
        }
    }

    pub fn is_connection_failure(&self) -> bool {
        self.exit_code == Some(SSH_CONNECTION_FAILURE)
    }

    /// Turn an unsuccessful output into an error naming `context`
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            return Ok(());
        }
        let code = self.exit_code.unwrap_or(-1);
        let detail = if self.stderr.trim().is_empty() {
            last_lines(&self.stdout, 5)
        } else {
            self.stderr.trim().to_string()
        };
        let message = format!("{} failed (exit code {}): {}", context, code, detail);
        if self.is_connection_failure() {
            anyhow::bail!(DeployError::connection(message))
        }
        anyhow::bail!(DeployError::remote(message))
    }
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}

/// Connection parameters for the single target host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub address: String,
    pub user: String,
    pub port: u16,
    pub key_file: PathBuf,
    pub connect_timeout_secs: u32,
    pub connection_attempts: u32,
}

impl SshTarget {
    /// Build the target from configuration, resolving the key file
    pub fn from_config(config: &DeploymentConfig) -> Result<Self> {
        let key_file = config.resolve_key_file()?;
        Ok(Self {
            address: config.host.address.clone(),
            user: config.host.user.clone(),
            port: config.host.port,
            key_file,
            connect_timeout_secs: config.host.connect_timeout_secs,
            connection_attempts: config.host.connection_attempts,
        })
    }

    /// Copy of this target with different connect timeout/attempts
    pub fn with_probe_settings(&self, timeout_secs: u32, attempts: u32) -> Self {
        Self {
            connect_timeout_secs: timeout_secs,
            connection_attempts: attempts.max(1),
            ..self.clone()
        }
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }

    /// Options shared by ssh and scp
    fn common_options(&self) -> Vec<String> {
        let mut args = vec!["-i".to_string(), self.key_file.display().to_string()];
        for option in [
            "StrictHostKeyChecking=no".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "LogLevel=ERROR".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            format!("ConnectionAttempts={}", self.connection_attempts),
            "BatchMode=yes".to_string(),
        ] {
            args.push("-o".to_string());
            args.push(option);
        }
        args
    }

    /// Arguments for `ssh` running `remote_command` on the host
    pub fn ssh_args(&self, remote_command: &str) -> Vec<String> {
        let mut args = self.common_options();
        args.push("-p".to_string());
        args.push(self.port.to_string());
        args.push(self.destination());
        args.push("--".to_string());
        args.push(remote_command.to_string());
        args
    }

    /// Arguments for `scp` copying `local` to `remote` on the host
    pub fn scp_args(&self, local: &Path, remote: &str) -> Vec<String> {
        let mut args = self.common_options();
        args.push("-P".to_string());
        args.push(self.port.to_string());
        args.push(local.display().to_string());
        args.push(format!("{}:{}", self.destination(), remote));
        args
    }
}

/// Executes commands against the target host
pub trait RemoteExecutor {
    /// Run a typed remote command. A non-accepted exit code is reported in
    /// the output, not as an error.
    fn execute(&mut self, command: &dyn RemoteCommand) -> Result<CommandOutput>;

    /// Copy a local file to `remote` as the login user
    fn upload(&mut self, local: &Path, remote: &str) -> Result<CommandOutput>;

    /// Connectivity probe (`uname -a`) with its own timeout and attempt count.
    /// Failure is reported in the output so the caller decides.
    fn probe(&mut self, timeout_secs: u32, attempts: u32) -> Result<CommandOutput>;

    /// The SSH login user, needed to decide privilege wrapping
    fn login_user(&self) -> &str;

    /// True when mutating commands are skipped
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// `RemoteExecutor` backed by the local OpenSSH client
#[derive(Debug, Clone)]
pub struct SshSession {
    target: SshTarget,
    dry_run: bool,
}

impl SshSession {
    /// New session honouring the process-wide dry-run switch
    pub fn new(target: SshTarget) -> Self {
        Self::with_dry_run(target, is_dry_run())
    }

    pub fn with_dry_run(target: SshTarget, dry_run: bool) -> Self {
        Self { target, dry_run }
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }
}

impl RemoteExecutor for SshSession {
    fn execute(&mut self, command: &dyn RemoteCommand) -> Result<CommandOutput> {
        let description = command.describe();
        let secrets = command.secrets();
        let wrapped = command.wrapped(&self.target.user);

        if self.dry_run && !command.is_read_only() {
            info!(
                "[DRY RUN] {} on {}: {}",
                description,
                self.target.address,
                redact(&wrapped, &secrets)
            );
            return Ok(CommandOutput::skipped(&description));
        }

        info!("{} on {}", description, self.target.address);
        debug!("remote command: {}", redact(&wrapped, &secrets));

        let args = self.target.ssh_args(&wrapped);
        spawn_tracked(
            "ssh",
            &args,
            &[],
            &secrets,
            command.accepted_exit_codes(),
        )
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<CommandOutput> {
        let description = format!("Upload {} to {}", local.display(), remote);
        if self.dry_run {
            info!("[DRY RUN] {}", description);
            return Ok(CommandOutput::skipped(&description));
        }
        if !local.exists() {
            anyhow::bail!(DeployError::config(format!(
                "Local file {:?} does not exist",
                local
            )));
        }

        info!("{}", description);
        let args = self.target.scp_args(local, remote);
        spawn_tracked("scp", &args, &[], &[], &[0])
    }

    fn probe(&mut self, timeout_secs: u32, attempts: u32) -> Result<CommandOutput> {
        let target = self.target.with_probe_settings(timeout_secs, attempts);
        info!(
            "Probing SSH on {} (timeout {}s, {} attempt(s))",
            target.destination(),
            timeout_secs,
            attempts
        );
        let args = target.ssh_args("uname -a");
        let output = spawn_tracked("ssh", &args, &[], &[], &[0])?;
        if !output.success {
            warn!(
                "SSH probe to {} failed: {}",
                target.destination(),
                output.stderr.trim()
            );
        }
        Ok(output)
    }

    fn login_user(&self) -> &str {
        &self.target.user
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// `RemoteExecutor` that records what it is asked to do and answers from
/// canned responses. Backs `oradeploy` tests and anything else that needs
/// to drive the task runner without a host.
#[derive(Debug, Clone)]
pub struct RecordingExecutor {
    login_user: String,
    dry_run: bool,
    /// `command_line()` of every executed command, in order
    pub commands: Vec<String>,
    /// Fully wrapped form of every executed command
    pub wrapped: Vec<String>,
    /// `command_line()` of commands skipped in dry-run mode
    pub skipped: Vec<String>,
    pub uploads: Vec<(PathBuf, String)>,
    /// `(timeout_secs, attempts)` of every probe
    pub probes: Vec<(u32, u32)>,
    responses: Vec<(String, CommandOutput)>,
    probe_result: CommandOutput,
}

impl RecordingExecutor {
    pub fn new(login_user: impl Into<String>) -> Self {
        Self {
            login_user: login_user.into(),
            dry_run: false,
            commands: Vec::new(),
            wrapped: Vec::new(),
            skipped: Vec::new(),
            uploads: Vec::new(),
            probes: Vec::new(),
            responses: Vec::new(),
            probe_result: CommandOutput::success("Linux db 2.6.32 x86_64 GNU/Linux\n"),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Answer commands whose line contains `pattern` with `output`.
    /// Earlier registrations win.
    pub fn respond(mut self, pattern: impl Into<String>, output: CommandOutput) -> Self {
        self.responses.push((pattern.into(), output));
        self
    }

    pub fn with_probe_result(mut self, output: CommandOutput) -> Self {
        self.probe_result = output;
        self
    }

    /// Position of the first executed command containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.commands.iter().position(|c| c.contains(pattern))
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.position(pattern).is_some()
    }
}

impl RemoteExecutor for RecordingExecutor {
    fn execute(&mut self, command: &dyn RemoteCommand) -> Result<CommandOutput> {
        let line = command.command_line();
        if self.dry_run && !command.is_read_only() {
            self.skipped.push(line);
            return Ok(CommandOutput::skipped(&command.describe()));
        }

        self.wrapped.push(command.wrapped(&self.login_user));
        let output = self
            .responses
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::success(""));
        self.commands.push(line);

        let success = output
            .exit_code
            .is_some_and(|code| command.accepted_exit_codes().contains(&code));
        Ok(CommandOutput { success, ..output })
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<CommandOutput> {
        if self.dry_run {
            return Ok(CommandOutput::skipped("upload"));
        }
        self.uploads.push((local.to_path_buf(), remote.to_string()));
        Ok(CommandOutput::success(""))
    }

    fn probe(&mut self, timeout_secs: u32, attempts: u32) -> Result<CommandOutput> {
        self.probes.push((timeout_secs, attempts));
        Ok(self.probe_result.clone())
    }

    fn login_user(&self) -> &str {
        &self.login_user
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Runs local tools (the `aws` CLI, `ssh-keygen`)
pub trait ToolRunner {
    fn run_tool(&mut self, args: &dyn ToolArgs) -> Result<CommandOutput>;
}

/// `ToolRunner` that spawns real processes
#[derive(Debug, Clone)]
pub struct LocalToolRunner {
    dry_run: bool,
}

impl LocalToolRunner {
    pub fn new() -> Self {
        Self::with_dry_run(is_dry_run())
    }

    pub fn with_dry_run(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl Default for LocalToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRunner for LocalToolRunner {
    fn run_tool(&mut self, args: &dyn ToolArgs) -> Result<CommandOutput> {
        let program = args.program();
        let cli_args = args.to_cli_args();
        let secrets = args.secrets();
        let rendered = redact(
            &format!(
                "{} {}",
                program,
                cli_args
                    .iter()
                    .map(|a| shell_quote(a))
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
            &secrets,
        );

        if self.dry_run && !args.is_read_only() {
            info!("[DRY RUN] {}", rendered);
            return Ok(CommandOutput::skipped(&rendered));
        }

        debug!("local command: {}", rendered);
        spawn_tracked(program, &cli_args, &args.get_env_vars(), &secrets, &[0])
    }
}

/// Spawn `program` in its own process group, track it until it exits and
/// collect its output with secrets redacted
fn spawn_tracked(
    program: &str,
    args: &[String],
    env: &[(String, String)],
    secrets: &[String],
    accepted_exit_codes: &[i32],
) -> Result<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group();
    for (key, value) in env {
        cmd.env(key, value);
    }

    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {} (is it installed and on PATH?)", program))?;
    let tracked = TrackedChild::register(child.id());

    let output = child
        .wait_with_output()
        .with_context(|| format!("Failed waiting for {}", program))?;
    drop(tracked);

    let stdout = redact(&String::from_utf8_lossy(&output.stdout), secrets);
    let stderr = redact(&String::from_utf8_lossy(&output.stderr), secrets);
    let exit_code = output.status.code();
    let success = exit_code.is_some_and(|code| accepted_exit_codes.contains(&code));

    if success {
        debug!("{} exited with {:?}", program, exit_code);
    } else {
        debug!("{} failed with exit code {:?}", program, exit_code);
    }

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code,
        success,
        dry_run: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SshTarget {
        SshTarget {
            address: "db.example.com".to_string(),
            user: "ec2-user".to_string(),
            port: 2222,
            key_file: PathBuf::from("/keys/oracle.pem"),
            connect_timeout_secs: 5,
            connection_attempts: 1,
        }
    }

    struct Sh {
        script: &'static str,
        read_only: bool,
        secret: Option<&'static str>,
    }

    impl ToolArgs for Sh {
        fn program(&self) -> &'static str {
            "sh"
        }
        fn to_cli_args(&self) -> Vec<String> {
            vec!["-c".to_string(), self.script.to_string()]
        }
        fn get_env_vars(&self) -> Vec<(String, String)> {
            vec![("GREETING".to_string(), "hello".to_string())]
        }
        fn is_read_only(&self) -> bool {
            self.read_only
        }
        fn secrets(&self) -> Vec<String> {
            self.secret.map(|s| vec![s.to_string()]).unwrap_or_default()
        }
    }

    #[test]
    fn test_ssh_args_shape() {
        let args = target().ssh_args("uname -a");
        assert_eq!(args[0], "-i");
        assert_eq!(args[1], "/keys/oracle.pem");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(args.contains(&"ConnectTimeout=5".to_string()));
        assert!(args.contains(&"ConnectionAttempts=1".to_string()));

        let n = args.len();
        assert_eq!(&args[n - 5..], &["-p", "2222", "ec2-user@db.example.com", "--", "uname -a"]);
    }

    #[test]
    fn test_scp_args_use_capital_p() {
        let args = target().scp_args(Path::new("/tmp/db.zip"), "/tmp/oracle-media/db.zip");
        let n = args.len();
        assert_eq!(
            &args[n - 4..],
            &[
                "-P",
                "2222",
                "/tmp/db.zip",
                "ec2-user@db.example.com:/tmp/oracle-media/db.zip"
            ]
        );
    }

    #[test]
    fn test_probe_settings_override() {
        let probe = target().with_probe_settings(15, 12);
        assert_eq!(probe.connect_timeout_secs, 15);
        assert_eq!(probe.connection_attempts, 12);
        assert_eq!(probe.address, "db.example.com");
        assert_eq!(target().with_probe_settings(1, 0).connection_attempts, 1);
    }

    #[test]
    fn test_ensure_success_messages() {
        let failed = CommandOutput {
            stdout: String::new(),
            stderr: "No package foo available.\n".to_string(),
            exit_code: Some(1),
            success: false,
            dry_run: false,
        };
        let err = failed.ensure_success("install-packages").unwrap_err();
        assert!(err.to_string().contains("install-packages failed (exit code 1)"));
        assert!(err.to_string().contains("No package foo"));
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::Remote(_))
        ));
    }

    #[test]
    fn test_ensure_success_connection_failure() {
        let failed = CommandOutput {
            stdout: String::new(),
            stderr: "ssh: connect to host x port 22: Connection refused".to_string(),
            exit_code: Some(255),
            success: false,
            dry_run: false,
        };
        let err = failed.ensure_success("check-ssh").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::Connection(_))
        ));
    }

    #[test]
    fn test_ensure_success_falls_back_to_stdout_tail() {
        let failed = CommandOutput {
            stdout: "line1\nline2\n[FATAL] [INS-30131] Initial setup failed\n".to_string(),
            stderr: String::new(),
            exit_code: Some(254),
            success: false,
            dry_run: false,
        };
        let err = failed.ensure_success("install-software").unwrap_err();
        assert!(err.to_string().contains("INS-30131"));
    }

    #[test]
    fn test_local_runner_captures_output_and_env() {
        let mut runner = LocalToolRunner::with_dry_run(false);
        let output = runner
            .run_tool(&Sh {
                script: "echo $GREETING; echo oops >&2",
                read_only: false,
                secret: None,
            })
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert!(!output.dry_run);
    }

    #[test]
    fn test_local_runner_reports_failure_without_error() {
        let mut runner = LocalToolRunner::with_dry_run(false);
        let output = runner
            .run_tool(&Sh {
                script: "exit 3",
                read_only: false,
                secret: None,
            })
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(3));
    }

    #[test]
    fn test_local_runner_redacts_output() {
        let mut runner = LocalToolRunner::with_dry_run(false);
        let output = runner
            .run_tool(&Sh {
                script: "echo token=abc123",
                read_only: true,
                secret: Some("abc123"),
            })
            .unwrap();
        assert_eq!(output.stdout.trim(), "token=******");
    }

    #[test]
    fn test_dry_run_skips_mutating_tool() {
        let mut runner = LocalToolRunner::with_dry_run(true);
        let output = runner
            .run_tool(&Sh {
                script: "exit 1",
                read_only: false,
                secret: None,
            })
            .unwrap();
        assert!(output.dry_run);
        assert!(output.success);
        assert!(output.stdout.contains("DRY RUN"));
    }

    #[test]
    fn test_dry_run_still_runs_read_only_tool() {
        let mut runner = LocalToolRunner::with_dry_run(true);
        let output = runner
            .run_tool(&Sh {
                script: "echo real",
                read_only: true,
                secret: None,
            })
            .unwrap();
        assert!(!output.dry_run);
        assert_eq!(output.stdout.trim(), "real");
    }

    #[test]
    fn test_missing_program_is_error() {
        struct Missing;
        impl ToolArgs for Missing {
            fn program(&self) -> &'static str {
                "oradeploy-definitely-missing-tool"
            }
            fn to_cli_args(&self) -> Vec<String> {
                vec![]
            }
        }
        let mut runner = LocalToolRunner::with_dry_run(false);
        assert!(runner.run_tool(&Missing).is_err());
    }

    #[test]
    fn test_upload_missing_local_file() {
        let mut session = SshSession::with_dry_run(target(), false);
        let err = session
            .upload(Path::new("/nonexistent/media.zip"), "/tmp/media.zip")
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
