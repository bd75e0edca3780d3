//! Deployment State Machine
//!
//! `DeployContext` owns the current stage of a full `deploy` run and rejects
//! any transition that is not the immediate next stage.
//!
//! # Stage Flow
//!
//! ```text
//! NotStarted
//!     ↓
//! ValidatingConfig
//!     ↓
//! CheckingConnectivity
//!     ↓
//! PreparingHost
//!     ↓
//! UpgradingHost        (disruptive: reboots the host)
//!     ↓
//! TuningKernel
//!     ↓
//! ProvisioningUser
//!     ↓
//! StagingMedia
//!     ↓
//! InstallingSoftware
//!     ↓
//! RunningRootScripts
//!     ↓
//! CreatingDatabase
//!     ↓
//! Verifying
//!     ↓
//! Completed
//!
//! (Any non-terminal stage can transition to Failed)
//! ```

use std::fmt;
use thiserror::Error;

use crate::types::Task;

/// Deployment stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeployStage {
    NotStarted = 0,
    ValidatingConfig = 1,
    CheckingConnectivity = 2,
    /// Package cache refresh and prerequisite install
    PreparingHost = 3,
    /// Full package upgrade followed by a reboot.
    /// This stage is DISRUPTIVE and requires explicit confirmation.
    UpgradingHost = 4,
    TuningKernel = 5,
    ProvisioningUser = 6,
    StagingMedia = 7,
    InstallingSoftware = 8,
    RunningRootScripts = 9,
    CreatingDatabase = 10,
    Verifying = 11,
    /// Terminal: deployment finished
    Completed = 12,
    /// Terminal: the stage where it stopped is kept in `DeployContext::failed_at`
    Failed = 255,
}

impl DeployStage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// True for stages that interrupt service on the host
    #[inline]
    pub const fn is_disruptive(self) -> bool {
        matches!(self, Self::UpgradingHost)
    }

    pub const fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::ValidatingConfig),
            Self::ValidatingConfig => Some(Self::CheckingConnectivity),
            Self::CheckingConnectivity => Some(Self::PreparingHost),
            Self::PreparingHost => Some(Self::UpgradingHost),
            Self::UpgradingHost => Some(Self::TuningKernel),
            Self::TuningKernel => Some(Self::ProvisioningUser),
            Self::ProvisioningUser => Some(Self::StagingMedia),
            Self::StagingMedia => Some(Self::InstallingSoftware),
            Self::InstallingSoftware => Some(Self::RunningRootScripts),
            Self::RunningRootScripts => Some(Self::CreatingDatabase),
            Self::CreatingDatabase => Some(Self::Verifying),
            Self::Verifying => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Stage that runs `task` during a full deployment
    pub const fn for_task(task: Task) -> Self {
        match task {
            Task::CheckSsh => Self::CheckingConnectivity,
            Task::InstallPackages => Self::PreparingHost,
            Task::UpgradeHost => Self::UpgradingHost,
            Task::TuneKernel => Self::TuningKernel,
            Task::CreateOracleUser => Self::ProvisioningUser,
            Task::StageMedia => Self::StagingMedia,
            Task::InstallSoftware => Self::InstallingSoftware,
            Task::RunRootScripts => Self::RunningRootScripts,
            Task::CreateDatabase => Self::CreatingDatabase,
            Task::Verify => Self::Verifying,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::ValidatingConfig => "Validating configuration",
            Self::CheckingConnectivity => "Checking connectivity",
            Self::PreparingHost => "Preparing host",
            Self::UpgradingHost => "Upgrading host",
            Self::TuningKernel => "Tuning kernel",
            Self::ProvisioningUser => "Provisioning Oracle user",
            Self::StagingMedia => "Staging media",
            Self::InstallingSoftware => "Installing software",
            Self::RunningRootScripts => "Running root scripts",
            Self::CreatingDatabase => "Creating database",
            Self::Verifying => "Verifying",
            Self::Completed => "Deployment complete",
            Self::Failed => "Deployment failed",
        }
    }

    /// Approximate progress; dominated by the installer and dbca
    pub const fn progress_percent(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::ValidatingConfig => 2,
            Self::CheckingConnectivity => 4,
            Self::PreparingHost => 8,
            Self::UpgradingHost => 15,
            Self::TuningKernel => 22,
            Self::ProvisioningUser => 25,
            Self::StagingMedia => 30,
            Self::InstallingSoftware => 45,
            Self::RunningRootScripts => 65,
            Self::CreatingDatabase => 70,
            Self::Verifying => 97,
            Self::Completed => 100,
            Self::Failed => 0,
        }
    }

    /// All stages in order (excluding Failed)
    pub const fn all_stages() -> &'static [Self] {
        &[
            Self::NotStarted,
            Self::ValidatingConfig,
            Self::CheckingConnectivity,
            Self::PreparingHost,
            Self::UpgradingHost,
            Self::TuningKernel,
            Self::ProvisioningUser,
            Self::StagingMedia,
            Self::InstallingSoftware,
            Self::RunningRootScripts,
            Self::CreatingDatabase,
            Self::Verifying,
            Self::Completed,
        ]
    }
}

impl fmt::Display for DeployStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageTransitionError {
    #[error("Cannot skip from {from} to {to} (must transition through intermediate stages)")]
    SkippedStage { from: DeployStage, to: DeployStage },

    #[error("Cannot go backwards from {from} to {to} (deployment is forward-only)")]
    BackwardTransition { from: DeployStage, to: DeployStage },

    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: DeployStage },

    #[error("Stage {stage} requires explicit confirmation (it reboots the host; pass --allow-reboot)")]
    MissingConfirmation { stage: DeployStage },

    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: DeployStage },
}

/// Tracks the progress of one `deploy` run
#[derive(Debug, Clone)]
pub struct DeployContext {
    current: DeployStage,
    failed_at: Option<DeployStage>,
    /// (stage, unix timestamp) for every transition taken
    stage_history: Vec<(DeployStage, u64)>,
    disruptive_confirmed: bool,
}

impl Default for DeployContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DeployContext {
    pub fn new() -> Self {
        Self {
            current: DeployStage::NotStarted,
            failed_at: None,
            stage_history: Vec::with_capacity(DeployStage::all_stages().len()),
            disruptive_confirmed: false,
        }
    }

    #[inline]
    pub fn current_stage(&self) -> DeployStage {
        self.current
    }

    #[inline]
    pub fn failed_at(&self) -> Option<DeployStage> {
        self.failed_at
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current == DeployStage::Completed
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.current == DeployStage::Failed
    }

    #[inline]
    pub fn progress_percent(&self) -> u8 {
        self.current.progress_percent()
    }

    pub fn stage_history(&self) -> &[(DeployStage, u64)] {
        &self.stage_history
    }

    /// Authorize disruptive stages. One-way: cannot be revoked.
    pub fn confirm_disruptive_operations(&mut self) {
        self.disruptive_confirmed = true;
    }

    #[inline]
    pub fn is_disruptive_confirmed(&self) -> bool {
        self.disruptive_confirmed
    }

    /// Advance to the next stage in sequence
    pub fn advance(&mut self) -> Result<DeployStage, StageTransitionError> {
        let next_stage = match self.current.next() {
            Some(stage) => stage,
            None => return Err(StageTransitionError::FromTerminalState { from: self.current }),
        };
        self.transition_to(next_stage)
    }

    /// Transition to `target`, which must be the immediate next stage
    pub fn transition_to(&mut self, target: DeployStage) -> Result<DeployStage, StageTransitionError> {
        if self.current.is_terminal() {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        }

        if target == self.current {
            return Err(StageTransitionError::AlreadyAtStage { stage: target });
        }

        // Failed is only reachable through fail()
        if target == DeployStage::Failed {
            return Err(StageTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }

        if target.order() < self.current.order() {
            return Err(StageTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }

        if self.current.next() != Some(target) {
            return Err(StageTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }

        if target.is_disruptive() && !self.disruptive_confirmed {
            return Err(StageTransitionError::MissingConfirmation { stage: target });
        }

        self.record_stage_transition(target);
        self.current = target;
        Ok(target)
    }

    /// Mark the deployment as failed at the current stage
    pub fn fail(&mut self) -> Result<(), StageTransitionError> {
        if self.current.is_terminal() {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        }

        self.failed_at = Some(self.current);
        self.record_stage_transition(DeployStage::Failed);
        self.current = DeployStage::Failed;
        Ok(())
    }

    fn record_stage_transition(&mut self, stage: DeployStage) {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        self.stage_history.push((stage, timestamp));
    }
}

impl From<StageTransitionError> for crate::error::DeployError {
    fn from(err: StageTransitionError) -> Self {
        crate::error::DeployError::StageTransition(err.to_string())
    }
}
