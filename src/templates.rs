//! Rendering of files pushed to the host
//!
//! - the installer response file, generated from the configuration or rendered
//!   from a custom template with `{{NAME}}` placeholders
//! - the sysctl and limits drop-ins written by `tune-kernel`

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use thiserror::Error;
use tracing::debug;

use crate::config_file::DeploymentConfig;
use crate::types::OracleVersion;

/// Drop-in written under /etc/sysctl.d
pub const SYSCTL_CONF_PATH: &str = "/etc/sysctl.d/97-oracle-database.conf";

/// Drop-in written under /etc/security/limits.d
pub const LIMITS_CONF_PATH: &str = "/etc/security/limits.d/97-oracle-database.conf";

const PLACEHOLDER_PATTERN: &str = r"\{\{\s*([A-Za-z0-9_]*)\s*\}\}";

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Unknown placeholder {{{{{name}}}}} on line {line}")]
    UnknownPlaceholder { name: String, line: usize },

    #[error("Unterminated placeholder on line {line}")]
    Unterminated { line: usize },

    #[error("Invalid placeholder pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl From<TemplateError> for crate::error::DeployError {
    fn from(err: TemplateError) -> Self {
        crate::error::DeployError::Template(err.to_string())
    }
}

/// Values available to `{{NAME}}` placeholders
pub fn template_context(config: &DeploymentConfig) -> BTreeMap<&'static str, String> {
    let oracle = &config.oracle;
    BTreeMap::from([
        ("ORACLE_BASE", oracle.oracle_base.clone()),
        ("ORACLE_HOME", config.oracle_home()),
        ("INVENTORY_DIR", oracle.inventory_dir.clone()),
        ("INSTALL_GROUP", oracle.install_group.clone()),
        ("DBA_GROUP", oracle.dba_group.clone()),
        ("EDITION", oracle.edition.to_string()),
        ("SID", oracle.sid.clone()),
        ("GLOBAL_DB_NAME", oracle.global_db_name.clone()),
        ("CHARACTER_SET", oracle.character_set.clone()),
        ("HOSTNAME", config.host.address.clone()),
        ("ORACLE_VERSION", oracle.version.to_string()),
    ])
}

/// Substitute every `{{NAME}}` in `text`. Unknown names and a `{{` without
/// a closing `}}` are errors.
pub fn render_template(
    text: &str,
    context: &BTreeMap<&'static str, String>,
) -> std::result::Result<String, TemplateError> {
    let pattern = Regex::new(PLACEHOLDER_PATTERN)?;
    let mut rendered = String::with_capacity(text.len());

    for (index, line) in text.split_inclusive('\n').enumerate() {
        let line_no = index + 1;

        if pattern.replace_all(line, "").contains("{{") {
            return Err(TemplateError::Unterminated { line: line_no });
        }

        let mut last = 0;
        for caps in pattern.captures_iter(line) {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let value = context
                .get(name)
                .ok_or_else(|| TemplateError::UnknownPlaceholder {
                    name: name.to_string(),
                    line: line_no,
                })?;
            rendered.push_str(&line[last..whole.start]);
            rendered.push_str(value);
            last = whole.end;
        }
        rendered.push_str(&line[last..]);
    }

    Ok(rendered)
}

/// Response file for a software-only install, built from the configuration
pub fn default_response_file(config: &DeploymentConfig) -> String {
    let oracle = &config.oracle;
    let mut lines = vec![
        format!("oracle.install.responseFileVersion={}", oracle.version.response_schema()),
        "oracle.install.option=INSTALL_DB_SWONLY".to_string(),
        format!("UNIX_GROUP_NAME={}", oracle.install_group),
        format!("INVENTORY_LOCATION={}", oracle.inventory_dir),
        "SELECTED_LANGUAGES=en".to_string(),
        format!("ORACLE_HOME={}", config.oracle_home()),
        format!("ORACLE_BASE={}", oracle.oracle_base),
        format!("oracle.install.db.InstallEdition={}", oracle.edition),
        format!("oracle.install.db.DBA_GROUP={}", oracle.dba_group),
        format!("oracle.install.db.OPER_GROUP={}", oracle.dba_group),
    ];
    if oracle.version == OracleVersion::V12c {
        for group in ["BACKUPDBA_GROUP", "DGDBA_GROUP", "KMDBA_GROUP"] {
            lines.push(format!("oracle.install.db.{}={}", group, oracle.dba_group));
        }
    }
    lines.push("SECURITY_UPDATES_VIA_MYORACLESUPPORT=false".to_string());
    lines.push("DECLINE_SECURITY_UPDATES=true".to_string());
    lines.push("oracle.installer.autoupdates.option=SKIP_UPDATES".to_string());

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Response file to upload: the custom template if one is configured,
/// otherwise the generated default
pub fn render_response_file(config: &DeploymentConfig) -> Result<String> {
    let Some(template) = &config.oracle.response_template else {
        return Ok(default_response_file(config));
    };

    let path = config.resolve_path(template);
    debug!("Rendering response file template {:?}", path);
    let text = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read response template {:?}", path))?;

    render_template(&text, &template_context(config))
        .map_err(crate::error::DeployError::from)
        .with_context(|| format!("Failed to render response template {:?}", path))
}

/// sysctl drop-in persisting the given parameters
pub fn sysctl_conf(params: &BTreeMap<String, String>) -> String {
    let mut out = String::from("# Managed by oradeploy: Oracle Database kernel parameters\n");
    for (key, value) in params {
        out.push_str(&format!("{} = {}\n", key, value));
    }
    out
}

/// limits.d drop-in for the Oracle OS user
pub fn limits_conf(os_user: &str) -> String {
    let mut out = String::from("# Managed by oradeploy: Oracle Database shell limits\n");
    for (kind, item, value) in [
        ("soft", "nofile", 1024),
        ("hard", "nofile", 65536),
        ("soft", "nproc", 2047),
        ("hard", "nproc", 16384),
        ("soft", "stack", 10240),
        ("hard", "stack", 32768),
    ] {
        out.push_str(&format!("{:<10} {:<6} {:<8} {}\n", os_user, kind, item, value));
    }
    out
}

/// Whether a kernel parameter with value `current` must be set to `desired`.
///
/// Single numeric values are only ever raised. Multi-valued parameters
/// (`kernel.sem`, port ranges) are set when any field differs.
pub fn needs_update(current: &str, desired: &str) -> bool {
    let current_fields: Vec<&str> = current.split_whitespace().collect();
    let desired_fields: Vec<&str> = desired.split_whitespace().collect();

    if current_fields.len() != desired_fields.len() {
        return true;
    }

    if let ([cur], [want]) = (current_fields.as_slice(), desired_fields.as_slice()) {
        return match (cur.parse::<u64>(), want.parse::<u64>()) {
            (Ok(cur), Ok(want)) => cur < want,
            _ => cur != want,
        };
    }

    current_fields != desired_fields
}
