//! Deployment configuration file handling.
//!
//! The configuration is a single JSON document describing the target host,
//! the Oracle installation and (optionally) the EC2 settings used to launch
//! the host. Relative paths inside it resolve against the directory that
//! holds the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::DeployError;
use crate::types::{DatabaseEdition, OracleVersion};

/// Oracle's documented kernel parameter minimums for a single-instance install
pub const DEFAULT_KERNEL_PARAMETERS: &[(&str, &str)] = &[
    ("fs.aio-max-nr", "1048576"),
    ("fs.file-max", "6815744"),
    ("kernel.shmall", "2097152"),
    ("kernel.shmmax", "4294967295"),
    ("kernel.shmmni", "4096"),
    ("kernel.sem", "250 32000 100 128"),
    ("net.ipv4.ip_local_port_range", "9000 65500"),
    ("net.core.rmem_default", "262144"),
    ("net.core.rmem_max", "4194304"),
    ("net.core.wmem_default", "262144"),
    ("net.core.wmem_max", "1048576"),
];

/// Characters that break dbca/sqlplus password handling
const FORBIDDEN_PASSWORD_CHARS: &[char] = &['\'', '"', '@', '/'];

/// Target host connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub address: String,
    #[serde(default = "default_ssh_user")]
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub key_file: PathBuf,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u32,
    #[serde(default = "default_connection_attempts")]
    pub connection_attempts: u32,
}

/// Oracle software and database options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    pub version: OracleVersion,
    #[serde(default)]
    pub edition: DatabaseEdition,
    #[serde(default = "default_oracle_base")]
    pub oracle_base: String,
    /// Defaults to `<oracle_base>/product/<release>/dbhome_1`
    #[serde(default)]
    pub oracle_home: Option<String>,
    #[serde(default = "default_inventory_dir")]
    pub inventory_dir: String,
    #[serde(default = "default_os_user")]
    pub os_user: String,
    #[serde(default = "default_install_group")]
    pub install_group: String,
    #[serde(default = "default_dba_group")]
    pub dba_group: String,
    pub sid: String,
    pub global_db_name: String,
    #[serde(default = "default_character_set")]
    pub character_set: String,
    #[serde(default = "default_memory_percentage")]
    pub memory_percentage: u8,
    pub sys_password: String,
    pub system_password: String,
    #[serde(default = "default_true")]
    pub enterprise_manager: bool,
    /// DBSNMP/SYSMAN password for 11gR2 DB Control; falls back to `sys_password`
    #[serde(default)]
    pub em_password: Option<String>,
    /// Local installer archives, uploaded and unzipped in order
    #[serde(default)]
    pub media: Vec<PathBuf>,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
    /// Custom response file template with `{{NAME}}` placeholders
    #[serde(default)]
    pub response_template: Option<PathBuf>,
}

/// Package installation options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagesConfig {
    /// CSV file whose first column lists yum packages
    #[serde(default)]
    pub requirements_file: Option<PathBuf>,
    #[serde(default)]
    pub extra: Vec<String>,
    #[serde(default = "default_true")]
    pub refresh_cache: bool,
}

/// Host-level system options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub upgrade_packages: bool,
    #[serde(default = "default_reboot_wait")]
    pub reboot_wait_secs: u64,
    /// Overrides or additions to `DEFAULT_KERNEL_PARAMETERS`
    #[serde(default)]
    pub kernel_parameters: BTreeMap<String, String>,
}

/// EC2 provisioning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default = "default_region")]
    pub region: String,
    /// AWS console credential export (CSV); default credential chain if unset
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    #[serde(default = "default_ami_id")]
    pub ami_id: String,
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    #[serde(default = "default_instance_name")]
    pub security_group_name: String,
    #[serde(default = "default_ingress_cidr")]
    pub ingress_cidr: String,
    #[serde(default)]
    pub open_listener_port: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_ssh_wait_timeout")]
    pub ssh_wait_timeout_secs: u32,
    #[serde(default = "default_ssh_wait_attempts")]
    pub ssh_wait_attempts: u32,
}

/// Complete deployment configuration that can be saved/loaded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub host: HostConfig,
    pub oracle: OracleConfig,
    #[serde(default)]
    pub packages: PackagesConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub cloud: Option<CloudConfig>,
    /// Directory relative paths resolve against (the config file's directory)
    #[serde(skip)]
    base_dir: PathBuf,
}

fn default_ssh_user() -> String {
    "root".to_string()
}
fn default_ssh_port() -> u16 {
    22
}
fn default_connect_timeout() -> u32 {
    5
}
fn default_connection_attempts() -> u32 {
    1
}
fn default_oracle_base() -> String {
    "/u01/app/oracle".to_string()
}
fn default_inventory_dir() -> String {
    "/u01/app/oraInventory".to_string()
}
fn default_os_user() -> String {
    "oracle".to_string()
}
fn default_install_group() -> String {
    "oinstall".to_string()
}
fn default_dba_group() -> String {
    "dba".to_string()
}
fn default_character_set() -> String {
    "AL32UTF8".to_string()
}
fn default_memory_percentage() -> u8 {
    40
}
fn default_true() -> bool {
    true
}
fn default_staging_dir() -> String {
    "/tmp/oracle-media".to_string()
}
fn default_reboot_wait() -> u64 {
    180
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_ami_id() -> String {
    "ami-3109d958".to_string()
}
fn default_instance_name() -> String {
    "oracle-database".to_string()
}
fn default_instance_type() -> String {
    "m2.2xlarge".to_string()
}
fn default_ingress_cidr() -> String {
    "0.0.0.0/0".to_string()
}
fn default_poll_interval() -> u64 {
    10
}
fn default_ssh_wait_timeout() -> u32 {
    15
}
fn default_ssh_wait_attempts() -> u32 {
    12
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            user: default_ssh_user(),
            port: default_ssh_port(),
            key_file: PathBuf::from("oracle-database.pem"),
            connect_timeout_secs: default_connect_timeout(),
            connection_attempts: default_connection_attempts(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            version: OracleVersion::default(),
            edition: DatabaseEdition::default(),
            oracle_base: default_oracle_base(),
            oracle_home: None,
            inventory_dir: default_inventory_dir(),
            os_user: default_os_user(),
            install_group: default_install_group(),
            dba_group: default_dba_group(),
            sid: "orcl".to_string(),
            global_db_name: "orcl.localdomain".to_string(),
            character_set: default_character_set(),
            memory_percentage: default_memory_percentage(),
            sys_password: String::new(),
            system_password: String::new(),
            enterprise_manager: true,
            em_password: None,
            media: Vec::new(),
            staging_dir: default_staging_dir(),
            response_template: None,
        }
    }
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            requirements_file: None,
            extra: Vec::new(),
            refresh_cache: true,
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            upgrade_packages: false,
            reboot_wait_secs: default_reboot_wait(),
            kernel_parameters: BTreeMap::new(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            credentials_file: None,
            ami_id: default_ami_id(),
            instance_name: default_instance_name(),
            instance_type: default_instance_type(),
            security_group_name: default_instance_name(),
            ingress_cidr: default_ingress_cidr(),
            open_listener_port: false,
            poll_interval_secs: default_poll_interval(),
            ssh_wait_timeout_secs: default_ssh_wait_timeout(),
            ssh_wait_attempts: default_ssh_wait_attempts(),
        }
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            host: HostConfig::default(),
            oracle: OracleConfig::default(),
            packages: PackagesConfig::default(),
            system: SystemConfig::default(),
            cloud: None,
            base_dir: PathBuf::from("."),
        }
    }
}

impl DeploymentConfig {
    /// Starter configuration written by `oradeploy init`
    pub fn starter(version: OracleVersion) -> Self {
        let mut config = Self::default();
        config.oracle.version = version;
        config.packages.requirements_file = Some(PathBuf::from("yum-requirements.txt"));
        config.cloud = Some(CloudConfig {
            credentials_file: Some(PathBuf::from("aws-credentials.txt")),
            ..CloudConfig::default()
        });
        config
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration from {:?}", path))?;

        let mut config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        config.base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        debug!("Configuration loaded from {:?} (base dir {:?})", path, config.base_dir);

        Ok(config)
    }

    /// Directory that relative paths resolve against
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Resolve a config-relative path
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Locate the SSH private key, falling back to `~/.ssh/<key_file>`
    pub fn resolve_key_file(&self) -> Result<PathBuf> {
        self.resolve_key_file_in(dirs::home_dir().as_deref())
    }

    /// Same as `resolve_key_file` with an explicit home directory
    pub fn resolve_key_file_in(&self, home: Option<&Path>) -> Result<PathBuf> {
        let key = &self.host.key_file;
        if key.as_os_str().is_empty() {
            anyhow::bail!(DeployError::config("host.key_file must be specified"));
        }

        let direct = self.resolve_path(key);
        if direct.exists() {
            return Ok(direct);
        }

        if let Some(home) = home {
            let fallback = home.join(".ssh").join(key);
            if fallback.exists() {
                debug!("Key file resolved via ~/.ssh: {:?}", fallback);
                return Ok(fallback);
            }
        }

        anyhow::bail!(DeployError::config(format!(
            "Unable to locate host.key_file {:?} (looked in {:?} and ~/.ssh)",
            key, direct
        )))
    }

    /// EC2 key pair name: the key file's base name without `.pem`
    pub fn key_pair_name(&self) -> String {
        let name = self
            .host
            .key_file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        name.strip_suffix(".pem").map(str::to_string).unwrap_or(name)
    }

    /// Effective ORACLE_HOME
    pub fn oracle_home(&self) -> String {
        match &self.oracle.oracle_home {
            Some(home) if !home.trim().is_empty() => home.trim_end_matches('/').to_string(),
            _ => format!(
                "{}/{}",
                self.oracle.oracle_base.trim_end_matches('/'),
                self.oracle.version.default_home_suffix()
            ),
        }
    }

    /// Password used for the Enterprise Manager accounts
    pub fn em_password(&self) -> &str {
        self.oracle
            .em_password
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.oracle.sys_password)
    }

    /// Remote path of the uploaded response file
    pub fn remote_response_file(&self) -> String {
        format!("{}/db_install.rsp", self.oracle.staging_dir.trim_end_matches('/'))
    }

    /// Kernel parameters to enforce: defaults overlaid with config overrides
    pub fn kernel_parameters(&self) -> BTreeMap<String, String> {
        let mut params: BTreeMap<String, String> = DEFAULT_KERNEL_PARAMETERS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        for (key, value) in &self.system.kernel_parameters {
            params.insert(key.clone(), value.clone());
        }
        params
    }

    /// Package list: `extra`, then the requirements file, de-duplicated.
    /// Falls back to the version's prerequisite list when both are empty.
    pub fn package_list(&self) -> Result<Vec<String>> {
        let mut packages: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            let name = name.trim();
            if !name.is_empty() && !name.starts_with('#') && !packages.iter().any(|p| p == name) {
                packages.push(name.to_string());
            }
        };

        for name in &self.packages.extra {
            push(name);
        }

        if let Some(file) = &self.packages.requirements_file {
            let path = self.resolve_path(file);
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_path(&path)
                .with_context(|| format!("Failed to open requirements file {:?}", path))?;
            for record in reader.records() {
                let record =
                    record.with_context(|| format!("Failed to parse requirements file {:?}", path))?;
                if let Some(name) = record.get(0) {
                    push(name);
                }
            }
        }

        if packages.is_empty() {
            debug!(
                "No packages configured, using {} prerequisite list",
                self.oracle.version
            );
            packages = self
                .oracle
                .version
                .prerequisite_packages()
                .iter()
                .map(|p| p.to_string())
                .collect();
        }

        Ok(packages)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_values()?;
        self.resolve_key_file()?;
        Ok(())
    }

    /// Validate field values without touching the filesystem
    pub fn validate_values(&self) -> Result<()> {
        let host = &self.host;
        if host.address.trim().is_empty() {
            anyhow::bail!(DeployError::validation("host.address must be specified"));
        }
        if host.address.contains(char::is_whitespace) {
            anyhow::bail!(DeployError::validation("host.address cannot contain whitespace"));
        }
        if host.user.trim().is_empty() {
            anyhow::bail!(DeployError::validation("host.user must be specified"));
        }
        if host.port == 0 {
            anyhow::bail!(DeployError::validation("host.port must be non-zero"));
        }
        if host.connection_attempts == 0 {
            anyhow::bail!(DeployError::validation(
                "host.connection_attempts must be at least 1"
            ));
        }

        let oracle = &self.oracle;

        // SID: 1-8 chars, starts with a letter, alphanumeric only
        let sid = oracle.sid.as_str();
        if sid.trim().is_empty() {
            anyhow::bail!(DeployError::validation("oracle.sid must be specified"));
        }
        if sid.contains(char::is_whitespace) {
            anyhow::bail!(DeployError::validation("oracle.sid cannot contain whitespace"));
        }
        if sid.len() > 8 {
            anyhow::bail!(DeployError::validation("oracle.sid must be 1-8 characters long"));
        }
        if !sid.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            anyhow::bail!(DeployError::validation("oracle.sid must start with a letter"));
        }
        if !sid.chars().all(|c| c.is_ascii_alphanumeric()) {
            anyhow::bail!(DeployError::validation(
                "oracle.sid can only contain letters and numbers"
            ));
        }

        if oracle.global_db_name.trim().is_empty() {
            anyhow::bail!(DeployError::validation("oracle.global_db_name must be specified"));
        }

        for (field, value) in [
            ("oracle.os_user", &oracle.os_user),
            ("oracle.install_group", &oracle.install_group),
            ("oracle.dba_group", &oracle.dba_group),
        ] {
            if value.is_empty()
                || !value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                anyhow::bail!(DeployError::validation(format!(
                    "{} must be a non-empty name of letters, numbers, '_' or '-'",
                    field
                )));
            }
        }

        // dbca -characterSet takes Oracle names such as AL32UTF8 or WE8ISO8859P1
        if oracle.character_set.is_empty()
            || !oracle.character_set.chars().all(|c| c.is_ascii_alphanumeric())
        {
            anyhow::bail!(DeployError::validation(
                "oracle.character_set must be an Oracle character set name (e.g. AL32UTF8)"
            ));
        }

        validate_password("oracle.sys_password", &oracle.sys_password)?;
        validate_password("oracle.system_password", &oracle.system_password)?;
        if let Some(em) = oracle.em_password.as_deref().filter(|p| !p.is_empty()) {
            validate_password("oracle.em_password", em)?;
        }

        if !(10..=80).contains(&oracle.memory_percentage) {
            anyhow::bail!(DeployError::validation(
                "oracle.memory_percentage must be between 10 and 80"
            ));
        }

        let home = self.oracle_home();
        for (field, value) in [
            ("oracle.oracle_base", oracle.oracle_base.as_str()),
            ("oracle.oracle_home", home.as_str()),
            ("oracle.inventory_dir", oracle.inventory_dir.as_str()),
            ("oracle.staging_dir", oracle.staging_dir.as_str()),
        ] {
            if !value.starts_with('/') {
                anyhow::bail!(DeployError::validation(format!(
                    "{} must be an absolute path",
                    field
                )));
            }
            if value.contains(char::is_whitespace) {
                anyhow::bail!(DeployError::validation(format!(
                    "{} cannot contain whitespace",
                    field
                )));
            }
        }

        if oracle.media.is_empty() {
            warn!("oracle.media is empty; stage-media expects the installer to be staged already");
        }

        if let Some(cloud) = &self.cloud {
            if cloud.ami_id.trim().is_empty() {
                anyhow::bail!(DeployError::validation("cloud.ami_id must be specified"));
            }
            if cloud.instance_type.trim().is_empty() {
                anyhow::bail!(DeployError::validation("cloud.instance_type must be specified"));
            }
            if cloud.security_group_name.trim().is_empty() {
                anyhow::bail!(DeployError::validation(
                    "cloud.security_group_name must be specified"
                ));
            }
            if !cloud.ingress_cidr.contains('/') {
                anyhow::bail!(DeployError::validation(
                    "cloud.ingress_cidr must be in CIDR notation (e.g. 0.0.0.0/0)"
                ));
            }
        }

        Ok(())
    }
}

fn validate_password(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        anyhow::bail!(DeployError::validation(format!("{} must be specified", field)));
    }
    if value.contains(char::is_whitespace) {
        anyhow::bail!(DeployError::validation(format!(
            "{} cannot contain whitespace",
            field
        )));
    }
    if value.contains(FORBIDDEN_PASSWORD_CHARS) {
        anyhow::bail!(DeployError::validation(format!(
            "{} cannot contain quotes, '@' or '/'",
            field
        )));
    }
    Ok(())
}
