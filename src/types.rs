//! Type-safe configuration and task types for oradeploy
//!
//! Version selectors, editions and task names are enums rather than strings
//! so that a typo in a config file or on the command line fails at parse time.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;

/// Oracle Database release line to deploy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum OracleVersion {
    /// 11g Release 2 (11.2.0.x), DB Control era
    #[default]
    #[serde(rename = "11gR2", alias = "11g")]
    #[strum(to_string = "11gR2", serialize = "11g")]
    V11gR2,
    /// 12c Release 1 (12.1.0.x), EM Express era
    #[serde(rename = "12c", alias = "12cR1")]
    #[strum(to_string = "12c", serialize = "12cR1")]
    V12c,
}

impl OracleVersion {
    /// Release directory used under `$ORACLE_BASE/product`
    pub fn release(self) -> &'static str {
        match self {
            Self::V11gR2 => "11.2.0",
            Self::V12c => "12.1.0",
        }
    }

    /// Default ORACLE_HOME relative to ORACLE_BASE
    pub fn default_home_suffix(self) -> String {
        format!("product/{}/dbhome_1", self.release())
    }

    /// `oracle.install.responseFileVersion` value expected by runInstaller
    pub fn response_schema(self) -> &'static str {
        match self {
            Self::V11gR2 => "/oracle/install/rspfmt_dbinstall_response_schema_v11_2_0",
            Self::V12c => "/oracle/install/rspfmt_dbinstall_response_schema_v12.1.0",
        }
    }

    /// HTTPS port of the Enterprise Manager console for this release
    pub fn em_port(self) -> u16 {
        match self {
            Self::V11gR2 => 1158,
            Self::V12c => 5500,
        }
    }

    /// Built-in prerequisite package list, used when the config names none
    pub fn prerequisite_packages(self) -> &'static [&'static str] {
        match self {
            Self::V11gR2 => &[
                "binutils",
                "compat-libcap1",
                "compat-libstdc++-33",
                "elfutils-libelf-devel",
                "gcc",
                "gcc-c++",
                "glibc",
                "glibc-devel",
                "ksh",
                "libaio",
                "libaio-devel",
                "libgcc",
                "libstdc++",
                "libstdc++-devel",
                "libXi",
                "libXtst",
                "make",
                "sysstat",
                "unzip",
            ],
            Self::V12c => &[
                "binutils",
                "compat-libcap1",
                "compat-libstdc++-33",
                "gcc",
                "gcc-c++",
                "glibc",
                "glibc-devel",
                "ksh",
                "libaio",
                "libaio-devel",
                "libgcc",
                "libstdc++",
                "libstdc++-devel",
                "libXi",
                "libXtst",
                "make",
                "net-tools",
                "smartmontools",
                "sysstat",
                "unzip",
            ],
        }
    }
}

/// Database edition passed to the installer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum DatabaseEdition {
    /// Enterprise Edition
    #[default]
    #[serde(rename = "EE")]
    #[strum(serialize = "EE")]
    Enterprise,
    /// Standard Edition
    #[serde(rename = "SE")]
    #[strum(serialize = "SE")]
    Standard,
}

/// A single deployment task, in deployment order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Task {
    CheckSsh,
    InstallPackages,
    UpgradeHost,
    TuneKernel,
    CreateOracleUser,
    StageMedia,
    InstallSoftware,
    RunRootScripts,
    CreateDatabase,
    Verify,
}

impl Task {
    /// All tasks in the order a full deployment runs them
    pub fn all() -> Vec<Self> {
        Self::iter().collect()
    }

    /// The phase this task belongs to
    pub fn phase(self) -> Phase {
        match self {
            Self::CheckSsh
            | Self::InstallPackages
            | Self::UpgradeHost
            | Self::TuneKernel
            | Self::CreateOracleUser => Phase::Prepare,
            Self::StageMedia | Self::InstallSoftware | Self::RunRootScripts => Phase::Install,
            Self::CreateDatabase => Phase::Configure,
            Self::Verify => Phase::Verify,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::CheckSsh => "Check SSH connectivity",
            Self::InstallPackages => "Install prerequisite packages",
            Self::UpgradeHost => "Upgrade packages and reboot",
            Self::TuneKernel => "Tune kernel parameters and limits",
            Self::CreateOracleUser => "Create Oracle OS user and directories",
            Self::StageMedia => "Stage installation media",
            Self::InstallSoftware => "Install Oracle Database software",
            Self::RunRootScripts => "Run root configuration scripts",
            Self::CreateDatabase => "Create database",
            Self::Verify => "Verify instance is open",
        }
    }
}

/// Group of tasks selectable by name (`install`, `configure`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Prepare,
    Install,
    Configure,
    Verify,
    All,
}

impl Phase {
    /// Tasks in this phase, in deployment order
    pub fn tasks(self) -> Vec<Task> {
        match self {
            Self::All => Task::all(),
            phase => Task::iter().filter(|t| t.phase() == phase).collect(),
        }
    }
}

/// Error for selector strings that name neither a phase nor a task
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown task or phase '{input}'. Phases: {phases}. Tasks: {tasks}")]
pub struct SelectorError {
    pub input: String,
    phases: String,
    tasks: String,
}

/// What a `run` or `plan` invocation targets: a whole phase or one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSelector {
    Phase(Phase),
    Task(Task),
}

impl TaskSelector {
    pub fn tasks(self) -> Vec<Task> {
        match self {
            Self::Phase(phase) => phase.tasks(),
            Self::Task(task) => vec![task],
        }
    }
}

impl Default for TaskSelector {
    fn default() -> Self {
        Self::Phase(Phase::All)
    }
}

impl std::fmt::Display for TaskSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Phase(phase) => write!(f, "{}", phase),
            Self::Task(task) => write!(f, "{}", task),
        }
    }
}

impl std::str::FromStr for TaskSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        // "verify" is both a phase and a task; both select the same work
        if let Ok(phase) = normalized.parse::<Phase>() {
            return Ok(Self::Phase(phase));
        }
        if let Ok(task) = normalized.parse::<Task>() {
            return Ok(Self::Task(task));
        }
        Err(SelectorError {
            input: s.to_string(),
            phases: Phase::iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", "),
            tasks: Task::iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", "),
        })
    }
}
