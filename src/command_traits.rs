//! Type-safe command contracts.
//!
//! Remote actions and local tool invocations are typed structs rather than
//! ad-hoc strings. The struct definition is the contract: it decides the exact
//! shell text, the privilege it runs with, the environment it needs and which
//! values must never show up in a log line.

use std::sync::atomic::{AtomicBool, Ordering};

static DRY_RUN: AtomicBool = AtomicBool::new(false);

/// Log mutating commands instead of executing them
pub fn enable_dry_run() {
    DRY_RUN.store(true, Ordering::SeqCst);
}

pub fn disable_dry_run() {
    DRY_RUN.store(false, Ordering::SeqCst);
}

pub fn is_dry_run() -> bool {
    DRY_RUN.load(Ordering::SeqCst)
}

/// Who a remote command runs as
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Privilege {
    /// The SSH login user, unwrapped
    User,
    /// root via `sudo -n bash -c`
    Root,
    /// Another account via `sudo -n -u <user> -H bash -lc`
    As(String),
}

/// A command executed on the target host.
///
/// # Contract
///
/// - `command_line()` is plain shell text. Wrapping for privilege and
///   environment happens in `wrap_for_login`.
/// - `secrets()` values are replaced with `******` wherever the command
///   is logged or reported.
/// - Read-only commands still execute in dry-run mode so plans can report
///   real host state.
pub trait RemoteCommand {
    fn command_line(&self) -> String;

    fn privilege(&self) -> Privilege {
        Privilege::Root
    }

    /// Variables exported inline before the command
    fn environment(&self) -> Vec<(String, String)> {
        vec![]
    }

    /// One-line description for plans and logs
    fn describe(&self) -> String;

    fn is_read_only(&self) -> bool {
        false
    }

    fn secrets(&self) -> Vec<String> {
        vec![]
    }

    fn accepted_exit_codes(&self) -> &'static [i32] {
        &[0]
    }

    /// Full command as sent over SSH for `login_user`
    fn wrapped(&self, login_user: &str) -> String {
        wrap_for_login(
            &self.command_line(),
            &self.environment(),
            &self.privilege(),
            login_user,
        )
    }
}

/// Arguments for a local tool invocation (the `aws` CLI, `ssh-keygen`).
///
/// - `to_cli_args()`: arguments exactly as the tool expects them
/// - `get_env_vars()`: environment for the child, e.g. AWS credentials
/// - `program()`: the executable name, resolved through `PATH`
pub trait ToolArgs {
    fn program(&self) -> &'static str;

    fn to_cli_args(&self) -> Vec<String>;

    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![]
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn secrets(&self) -> Vec<String> {
        vec![]
    }
}

/// Quote a string for POSIX `sh` using single quotes
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r#"'\''"#))
}

/// Build the shell text sent to the host: inline env exports, then the
/// privilege wrapper
pub fn wrap_for_login(
    command: &str,
    env: &[(String, String)],
    privilege: &Privilege,
    login_user: &str,
) -> String {
    let body = if env.is_empty() {
        command.to_string()
    } else {
        let exports: Vec<String> = env
            .iter()
            .map(|(k, v)| format!("export {}={};", k, shell_quote(v)))
            .collect();
        format!("{} {}", exports.join(" "), command)
    };

    match privilege {
        Privilege::User => body,
        Privilege::Root if login_user == "root" => body,
        Privilege::Root => format!("sudo -n bash -c {}", shell_quote(&body)),
        Privilege::As(user) if user == login_user => body,
        Privilege::As(user) => format!(
            "sudo -n -u {} -H bash -lc {}",
            shell_quote(user),
            shell_quote(&body)
        ),
    }
}

/// Replace every secret occurrence in `text`. The quoted form is replaced
/// too, since secrets are embedded through `shell_quote`.
pub fn redact(text: &str, secrets: &[String]) -> String {
    let mut out = text.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        let quoted = shell_quote(secret);
        if quoted != *secret {
            out = out.replace(&quoted, "******");
        }
        out = out.replace(secret.as_str(), "******");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        privilege: Privilege,
    }

    impl RemoteCommand for Echo {
        fn command_line(&self) -> String {
            "echo $ORACLE_SID".to_string()
        }
        fn privilege(&self) -> Privilege {
            self.privilege.clone()
        }
        fn environment(&self) -> Vec<(String, String)> {
            vec![("ORACLE_SID".to_string(), "orcl".to_string())]
        }
        fn describe(&self) -> String {
            "echo sid".to_string()
        }
    }

    #[test]
    fn test_shell_quote_plain_words_untouched() {
        assert_eq!(shell_quote("/u01/app/oracle"), "/u01/app/oracle");
        assert_eq!(shell_quote("kernel.sem=250"), "kernel.sem=250");
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r#"'it'\''s'"#);
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_wrap_root_for_non_root_login() {
        let wrapped = wrap_for_login("yum -y makecache", &[], &Privilege::Root, "ec2-user");
        assert_eq!(wrapped, "sudo -n bash -c 'yum -y makecache'");
    }

    #[test]
    fn test_wrap_root_for_root_login_is_plain() {
        let wrapped = wrap_for_login("yum -y makecache", &[], &Privilege::Root, "root");
        assert_eq!(wrapped, "yum -y makecache");
    }

    #[test]
    fn test_wrap_as_other_user_with_env() {
        let cmd = Echo {
            privilege: Privilege::As("oracle".to_string()),
        };
        assert_eq!(
            cmd.wrapped("root"),
            r#"sudo -n -u oracle -H bash -lc 'export ORACLE_SID=orcl; echo $ORACLE_SID'"#
        );
    }

    #[test]
    fn test_wrap_as_login_user_skips_sudo() {
        let cmd = Echo {
            privilege: Privilege::As("oracle".to_string()),
        };
        assert_eq!(cmd.wrapped("oracle"), "export ORACLE_SID=orcl; echo $ORACLE_SID");
    }

    #[test]
    fn test_redact_plain_and_quoted() {
        let secrets = vec!["s3cr3t".to_string(), "a b".to_string()];
        let text = "dbca -sysPassword s3cr3t -x 'a b'";
        assert_eq!(redact(text, &secrets), "dbca -sysPassword ****** -x ******");
    }

    #[test]
    fn test_redact_ignores_empty_secret() {
        assert_eq!(redact("abc", &[String::new()]), "abc");
    }

    #[test]
    fn test_dry_run_toggle() {
        enable_dry_run();
        assert!(is_dry_run());
        disable_dry_run();
        assert!(!is_dry_run());
    }
}
