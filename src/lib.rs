//! oradeploy Library
//!
//! Deploys a single-instance Oracle Database (11gR2 or 12c) to one Linux host
//! over SSH, and optionally launches that host on EC2 first.

pub mod cli;
pub mod cloud;
pub mod command_traits;
pub mod commands;
pub mod config_file;
pub mod deploy_state;
pub mod deployer;
pub mod error;
pub mod process_guard;
pub mod sanity;
pub mod ssh_runner;
pub mod templates;
pub mod types;

// Re-export main types for convenience
pub use cloud::{LaunchedInstance, Provisioner};
pub use command_traits::{
    Privilege, RemoteCommand, ToolArgs, disable_dry_run, enable_dry_run, is_dry_run,
};
pub use config_file::DeploymentConfig;
pub use deploy_state::{DeployContext, DeployStage, StageTransitionError};
pub use deployer::{Deployer, Step, plan, task_steps};
pub use error::DeployError;
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use ssh_runner::{
    CommandOutput, LocalToolRunner, RecordingExecutor, RemoteExecutor, SshSession, SshTarget,
    ToolRunner,
};
pub use types::{DatabaseEdition, OracleVersion, Phase, Task, TaskSelector};
