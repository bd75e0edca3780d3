//! Oracle installer and database commands.
//!
//! Everything the installer or the database owns runs as the Oracle OS user
//! (`Privilege::As`). Only the post-install root scripts and the staging
//! directory setup run as root.

use crate::command_traits::{Privilege, RemoteCommand, shell_quote};
use crate::config_file::DeploymentConfig;
use crate::types::OracleVersion;

/// Installer exit code for "completed with warnings"
pub const INSTALLER_WARNINGS_EXIT_CODE: i32 = 6;

fn oracle_env(oracle_home: &str, sid: &str) -> Vec<(String, String)> {
    vec![
        ("ORACLE_HOME".to_string(), oracle_home.to_string()),
        ("ORACLE_SID".to_string(), sid.to_string()),
    ]
}

/// Create the upload directory and hand it back to the SSH login user.
///
/// Recursive so archives left by an earlier run can be overwritten by `scp`.
#[derive(Debug, Clone)]
pub struct MakeStagingDir {
    pub path: String,
    pub login_user: String,
}

impl RemoteCommand for MakeStagingDir {
    fn command_line(&self) -> String {
        let path = shell_quote(&self.path);
        format!("mkdir -p {} && chown -R {} {}", path, shell_quote(&self.login_user), path)
    }

    fn describe(&self) -> String {
        format!("Create staging directory {}", self.path)
    }
}

/// Unpack an uploaded installer archive in place
#[derive(Debug, Clone)]
pub struct UnzipMedia {
    pub staging_dir: String,
    pub archive: String,
    pub os_user: String,
}

impl RemoteCommand for UnzipMedia {
    fn command_line(&self) -> String {
        format!(
            "cd {} && unzip -o -q {}",
            shell_quote(&self.staging_dir),
            shell_quote(&self.archive)
        )
    }

    fn privilege(&self) -> Privilege {
        Privilege::As(self.os_user.clone())
    }

    fn describe(&self) -> String {
        format!("Unzip {}", self.archive)
    }
}

/// Silent software-only install with the uploaded response file
#[derive(Debug, Clone)]
pub struct RunInstaller {
    pub staging_dir: String,
    pub response_file: String,
    pub os_user: String,
}

impl RemoteCommand for RunInstaller {
    fn command_line(&self) -> String {
        format!(
            "cd {}/database && ./runInstaller -silent -ignorePrereq -waitforcompletion -responseFile {}",
            shell_quote(self.staging_dir.trim_end_matches('/')),
            shell_quote(&self.response_file)
        )
    }

    fn privilege(&self) -> Privilege {
        Privilege::As(self.os_user.clone())
    }

    fn describe(&self) -> String {
        "Run Oracle Universal Installer (silent)".to_string()
    }

    fn accepted_exit_codes(&self) -> &'static [i32] {
        &[0, INSTALLER_WARNINGS_EXIT_CODE]
    }
}

/// `orainstRoot.sh` or `root.sh`
#[derive(Debug, Clone)]
pub struct RunRootScript {
    pub script: String,
}

impl RunRootScript {
    /// Both scripts in the order the installer asks for them
    pub fn for_config(config: &DeploymentConfig) -> [Self; 2] {
        [
            Self {
                script: format!(
                    "{}/orainstRoot.sh",
                    config.oracle.inventory_dir.trim_end_matches('/')
                ),
            },
            Self {
                script: format!("{}/root.sh", config.oracle_home()),
            },
        ]
    }
}

impl RemoteCommand for RunRootScript {
    fn command_line(&self) -> String {
        shell_quote(&self.script)
    }

    fn describe(&self) -> String {
        format!("Run {}", self.script)
    }
}

/// Start the default listener unless it already answers
#[derive(Debug, Clone)]
pub struct StartListener {
    pub oracle_home: String,
    pub sid: String,
    pub os_user: String,
}

impl RemoteCommand for StartListener {
    fn command_line(&self) -> String {
        let lsnrctl = shell_quote(&format!("{}/bin/lsnrctl", self.oracle_home));
        format!("{lsnrctl} status > /dev/null 2>&1 || {lsnrctl} start")
    }

    fn privilege(&self) -> Privilege {
        Privilege::As(self.os_user.clone())
    }

    fn environment(&self) -> Vec<(String, String)> {
        oracle_env(&self.oracle_home, &self.sid)
    }

    fn describe(&self) -> String {
        "Start listener if not running".to_string()
    }
}

/// Enterprise Manager option passed to dbca
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmConfiguration {
    None,
    /// 11gR2 DB Control, with the DBSNMP/SYSMAN password
    DbControl { password: String },
    /// 12c EM Express on the given HTTPS port
    Express { port: u16 },
}

/// `dbca -silent -createDatabase` from the General Purpose template
#[derive(Debug, Clone)]
pub struct CreateDatabase {
    pub oracle_home: String,
    pub oracle_base: String,
    pub os_user: String,
    pub version: OracleVersion,
    pub sid: String,
    pub global_db_name: String,
    pub character_set: String,
    pub memory_percentage: u8,
    pub sys_password: String,
    pub system_password: String,
    pub em: EmConfiguration,
}

impl CreateDatabase {
    pub fn from_config(config: &DeploymentConfig) -> Self {
        let oracle = &config.oracle;
        let em = match (oracle.enterprise_manager, oracle.version) {
            (false, _) => EmConfiguration::None,
            (true, OracleVersion::V11gR2) => EmConfiguration::DbControl {
                password: config.em_password().to_string(),
            },
            (true, OracleVersion::V12c) => EmConfiguration::Express {
                port: oracle.version.em_port(),
            },
        };

        Self {
            oracle_home: config.oracle_home(),
            oracle_base: oracle.oracle_base.trim_end_matches('/').to_string(),
            os_user: oracle.os_user.clone(),
            version: oracle.version,
            sid: oracle.sid.clone(),
            global_db_name: oracle.global_db_name.clone(),
            character_set: oracle.character_set.clone(),
            memory_percentage: oracle.memory_percentage,
            sys_password: oracle.sys_password.clone(),
            system_password: oracle.system_password.clone(),
            em,
        }
    }

    /// dbca arguments after `-silent -createDatabase`
    pub fn dbca_args(&self) -> Vec<String> {
        let mut args = vec![
            "-templateName".to_string(),
            "General_Purpose.dbc".to_string(),
            "-gdbName".to_string(),
            self.global_db_name.clone(),
            "-sid".to_string(),
            self.sid.clone(),
            "-sysPassword".to_string(),
            self.sys_password.clone(),
            "-systemPassword".to_string(),
            self.system_password.clone(),
            "-characterSet".to_string(),
            self.character_set.clone(),
            "-memoryPercentage".to_string(),
            self.memory_percentage.to_string(),
            "-datafileDestination".to_string(),
            format!("{}/oradata", self.oracle_base),
        ];

        if self.version == OracleVersion::V12c {
            args.extend(["-createAsContainerDatabase".to_string(), "false".to_string()]);
        }

        match &self.em {
            EmConfiguration::None => {
                args.extend(["-emConfiguration".to_string(), "NONE".to_string()]);
            }
            EmConfiguration::DbControl { password } => {
                args.extend([
                    "-emConfiguration".to_string(),
                    "LOCAL".to_string(),
                    "-dbsnmpPassword".to_string(),
                    password.clone(),
                    "-sysmanPassword".to_string(),
                    password.clone(),
                ]);
            }
            EmConfiguration::Express { port } => {
                args.extend([
                    "-emConfiguration".to_string(),
                    "DBEXPRESS".to_string(),
                    "-emExpressPort".to_string(),
                    port.to_string(),
                ]);
            }
        }

        args
    }
}

impl RemoteCommand for CreateDatabase {
    fn command_line(&self) -> String {
        let args: Vec<String> = self.dbca_args().iter().map(|a| shell_quote(a)).collect();
        format!(
            "{} -silent -createDatabase {}",
            shell_quote(&format!("{}/bin/dbca", self.oracle_home)),
            args.join(" ")
        )
    }

    fn privilege(&self) -> Privilege {
        Privilege::As(self.os_user.clone())
    }

    fn environment(&self) -> Vec<(String, String)> {
        oracle_env(&self.oracle_home, &self.sid)
    }

    fn describe(&self) -> String {
        format!("Create database {} ({})", self.global_db_name, self.sid)
    }

    fn secrets(&self) -> Vec<String> {
        let mut secrets = vec![self.sys_password.clone(), self.system_password.clone()];
        if let EmConfiguration::DbControl { password } = &self.em {
            secrets.push(password.clone());
        }
        secrets
    }
}

/// Query `v$instance` through a local SYSDBA connection
#[derive(Debug, Clone)]
pub struct CheckInstance {
    pub oracle_home: String,
    pub sid: String,
    pub os_user: String,
}

impl RemoteCommand for CheckInstance {
    fn command_line(&self) -> String {
        format!(
            "printf 'set heading off feedback off pagesize 0\\nselect status from v$instance;\\nexit;\\n' | {} -S '/ as sysdba'",
            shell_quote(&format!("{}/bin/sqlplus", self.oracle_home))
        )
    }

    fn privilege(&self) -> Privilege {
        Privilege::As(self.os_user.clone())
    }

    fn environment(&self) -> Vec<(String, String)> {
        oracle_env(&self.oracle_home, &self.sid)
    }

    fn describe(&self) -> String {
        format!("Check instance {} status", self.sid)
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

/// Instance status from `CheckInstance` output; `None` if sqlplus reported
/// an error instead of a status
pub fn parse_instance_status(stdout: &str) -> Option<String> {
    let lines: Vec<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines
        .iter()
        .any(|l| l.starts_with("ORA-") || l.starts_with("SP2-") || l.starts_with("ERROR"))
    {
        return None;
    }
    lines.first().map(|l| l.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_traits::redact;

    fn config(version: OracleVersion) -> DeploymentConfig {
        let mut config = DeploymentConfig::default();
        config.oracle.version = version;
        config.oracle.sys_password = "SysPass1".to_string();
        config.oracle.system_password = "SystemPass1".to_string();
        config
    }

    #[test]
    fn test_staging_dir_reclaimed_recursively() {
        let cmd = MakeStagingDir {
            path: "/tmp/oracle-media".to_string(),
            login_user: "ec2-user".to_string(),
        };
        assert_eq!(
            cmd.command_line(),
            "mkdir -p /tmp/oracle-media && chown -R ec2-user /tmp/oracle-media"
        );
        assert_eq!(cmd.privilege(), Privilege::Root);
    }

    #[test]
    fn test_installer_accepts_warnings_exit_code() {
        let cmd = RunInstaller {
            staging_dir: "/tmp/oracle-media/".to_string(),
            response_file: "/tmp/oracle-media/db_install.rsp".to_string(),
            os_user: "oracle".to_string(),
        };
        assert_eq!(
            cmd.command_line(),
            "cd /tmp/oracle-media/database && ./runInstaller -silent -ignorePrereq \
             -waitforcompletion -responseFile /tmp/oracle-media/db_install.rsp"
        );
        assert_eq!(cmd.accepted_exit_codes(), &[0, 6]);
        assert_eq!(cmd.privilege(), Privilege::As("oracle".to_string()));
    }

    #[test]
    fn test_root_scripts_paths() {
        let [inventory, home] = RunRootScript::for_config(&config(OracleVersion::V11gR2));
        assert_eq!(inventory.command_line(), "/u01/app/oraInventory/orainstRoot.sh");
        assert_eq!(home.command_line(), "/u01/app/oracle/product/11.2.0/dbhome_1/root.sh");
        assert_eq!(home.privilege(), Privilege::Root);
    }

    #[test]
    fn test_dbca_11g_db_control() {
        let cmd = CreateDatabase::from_config(&config(OracleVersion::V11gR2));
        let args = cmd.dbca_args().join(" ");
        assert!(args.contains("-emConfiguration LOCAL -dbsnmpPassword SysPass1 -sysmanPassword SysPass1"));
        assert!(!args.contains("createAsContainerDatabase"));
        assert!(args.contains("-datafileDestination /u01/app/oracle/oradata"));
    }

    #[test]
    fn test_dbca_12c_em_express() {
        let cmd = CreateDatabase::from_config(&config(OracleVersion::V12c));
        let args = cmd.dbca_args().join(" ");
        assert!(args.contains("-createAsContainerDatabase false"));
        assert!(args.contains("-emConfiguration DBEXPRESS -emExpressPort 5500"));
    }

    #[test]
    fn test_dbca_without_em() {
        let mut config = config(OracleVersion::V12c);
        config.oracle.enterprise_manager = false;
        let cmd = CreateDatabase::from_config(&config);
        assert_eq!(cmd.em, EmConfiguration::None);
        assert!(cmd.dbca_args().join(" ").ends_with("-emConfiguration NONE"));
    }

    #[test]
    fn test_dbca_secrets_are_redacted() {
        let mut config = config(OracleVersion::V11gR2);
        config.oracle.em_password = Some("EmPass1".to_string());
        let cmd = CreateDatabase::from_config(&config);
        let logged = redact(&cmd.wrapped("ec2-user"), &cmd.secrets());
        assert!(!logged.contains("SysPass1"));
        assert!(!logged.contains("SystemPass1"));
        assert!(!logged.contains("EmPass1"));
        assert!(logged.contains("-sysPassword ******"));
    }

    #[test]
    fn test_listener_start_is_conditional() {
        let cmd = StartListener {
            oracle_home: "/u01/home".to_string(),
            sid: "orcl".to_string(),
            os_user: "oracle".to_string(),
        };
        assert_eq!(
            cmd.command_line(),
            "/u01/home/bin/lsnrctl status > /dev/null 2>&1 || /u01/home/bin/lsnrctl start"
        );
        assert!(cmd.environment().contains(&("ORACLE_SID".to_string(), "orcl".to_string())));
    }

    #[test]
    fn test_check_instance_is_read_only_sysdba() {
        let cmd = CheckInstance {
            oracle_home: "/u01/home".to_string(),
            sid: "orcl".to_string(),
            os_user: "oracle".to_string(),
        };
        assert!(cmd.is_read_only());
        assert!(cmd.command_line().contains("select status from v$instance;"));
        assert!(cmd.command_line().ends_with("/u01/home/bin/sqlplus -S '/ as sysdba'"));
    }

    #[test]
    fn test_parse_instance_status() {
        assert_eq!(parse_instance_status("\nOPEN\n\n").as_deref(), Some("OPEN"));
        assert_eq!(parse_instance_status("MOUNTED\n").as_deref(), Some("MOUNTED"));
        assert_eq!(
            parse_instance_status("ERROR:\nORA-01034: ORACLE not available\n"),
            None
        );
        assert_eq!(parse_instance_status(""), None);
    }

    #[test]
    fn test_unzip_runs_as_os_user() {
        let cmd = UnzipMedia {
            staging_dir: "/tmp/oracle-media".to_string(),
            archive: "linux_11gR2_database_1of2.zip".to_string(),
            os_user: "oracle".to_string(),
        };
        assert_eq!(
            cmd.wrapped("root"),
            "sudo -n -u oracle -H bash -lc 'cd /tmp/oracle-media && unzip -o -q linux_11gR2_database_1of2.zip'"
        );
    }
}
