//! Host-level commands: probing, kernel parameters, files, accounts, reboot.
//!
//! | Struct            | Shell                                            | Runs as |
//! |-------------------|--------------------------------------------------|---------|
//! | `Uname`           | `uname -a`                                       | login   |
//! | `GetSysctl`       | `sysctl -n <key>`                                | login   |
//! | `SetSysctl`       | `sysctl -w <key>=<value>`                        | root    |
//! | `WriteFile`       | `printf '%s' <content> > <path> && chmod ...`    | root    |
//! | `EnsureGroup`     | `getent group <g> \|\| groupadd <g>`             | root    |
//! | `EnsureUser`      | `id -u <u> \|\| useradd -m -g <g> -G <dba> <u>`  | root    |
//! | `MakeDirectories` | `mkdir -p`, `chown -R`, `chmod -R`               | root    |
//! | `ChownTree`       | `chown -R <owner>:<group> <path>`                | root    |
//! | `Reboot`          | detached `reboot`                                | root    |

use crate::command_traits::{Privilege, RemoteCommand, shell_quote};

fn quote_all(values: &[String]) -> String {
    values.iter().map(|v| shell_quote(v)).collect::<Vec<_>>().join(" ")
}

/// Connectivity probe
#[derive(Debug, Clone, Default)]
pub struct Uname;

impl RemoteCommand for Uname {
    fn command_line(&self) -> String {
        "uname -a".to_string()
    }

    fn privilege(&self) -> Privilege {
        Privilege::User
    }

    fn describe(&self) -> String {
        "Print kernel and host information".to_string()
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

/// Read the current value of a kernel parameter
#[derive(Debug, Clone)]
pub struct GetSysctl {
    pub key: String,
}

impl RemoteCommand for GetSysctl {
    fn command_line(&self) -> String {
        format!("sysctl -n {}", shell_quote(&self.key))
    }

    fn privilege(&self) -> Privilege {
        Privilege::User
    }

    fn describe(&self) -> String {
        format!("Read {}", self.key)
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

/// Set a kernel parameter on the running system
#[derive(Debug, Clone)]
pub struct SetSysctl {
    pub key: String,
    pub value: String,
}

impl RemoteCommand for SetSysctl {
    fn command_line(&self) -> String {
        format!("sysctl -w {}", shell_quote(&format!("{}={}", self.key, self.value)))
    }

    fn describe(&self) -> String {
        format!("Set {} = {}", self.key, self.value)
    }
}

/// Replace a file's content
#[derive(Debug, Clone)]
pub struct WriteFile {
    pub path: String,
    pub content: String,
    /// Octal mode, e.g. `644`
    pub mode: String,
}

impl RemoteCommand for WriteFile {
    fn command_line(&self) -> String {
        let path = shell_quote(&self.path);
        format!(
            "printf '%s' {} > {} && chmod {} {}",
            shell_quote(&self.content),
            path,
            shell_quote(&self.mode),
            path
        )
    }

    fn describe(&self) -> String {
        format!("Write {}", self.path)
    }
}

/// Create a group unless it exists
#[derive(Debug, Clone)]
pub struct EnsureGroup {
    pub name: String,
}

impl RemoteCommand for EnsureGroup {
    fn command_line(&self) -> String {
        let name = shell_quote(&self.name);
        format!("getent group {} > /dev/null || groupadd {}", name, name)
    }

    fn describe(&self) -> String {
        format!("Ensure group {} exists", self.name)
    }
}

/// Create the OS user unless it exists
#[derive(Debug, Clone)]
pub struct EnsureUser {
    pub name: String,
    pub primary_group: String,
    pub secondary_group: String,
}

impl RemoteCommand for EnsureUser {
    fn command_line(&self) -> String {
        let name = shell_quote(&self.name);
        format!(
            "id -u {} > /dev/null 2>&1 || useradd -m -g {} -G {} {}",
            name,
            shell_quote(&self.primary_group),
            shell_quote(&self.secondary_group),
            name
        )
    }

    fn describe(&self) -> String {
        format!(
            "Ensure user {} exists ({}:{})",
            self.name, self.primary_group, self.secondary_group
        )
    }
}

/// Create directories with ownership and mode applied recursively
#[derive(Debug, Clone)]
pub struct MakeDirectories {
    pub paths: Vec<String>,
    pub owner: String,
    pub group: String,
    pub mode: String,
}

impl RemoteCommand for MakeDirectories {
    fn command_line(&self) -> String {
        let paths = quote_all(&self.paths);
        format!(
            "mkdir -p {paths} && chown -R {}:{} {paths} && chmod -R {} {paths}",
            shell_quote(&self.owner),
            shell_quote(&self.group),
            shell_quote(&self.mode),
        )
    }

    fn describe(&self) -> String {
        format!(
            "Create {} owned by {}:{}",
            self.paths.join(", "),
            self.owner,
            self.group
        )
    }
}

/// Hand a directory tree to another owner
#[derive(Debug, Clone)]
pub struct ChownTree {
    pub path: String,
    pub owner: String,
    pub group: String,
}

impl RemoteCommand for ChownTree {
    fn command_line(&self) -> String {
        format!(
            "chown -R {}:{} {}",
            shell_quote(&self.owner),
            shell_quote(&self.group),
            shell_quote(&self.path)
        )
    }

    fn describe(&self) -> String {
        format!("Give {} to {}:{}", self.path, self.owner, self.group)
    }
}

/// Reboot the host without holding the SSH session open
#[derive(Debug, Clone, Default)]
pub struct Reboot;

impl RemoteCommand for Reboot {
    fn command_line(&self) -> String {
        "nohup sh -c 'sleep 2 && reboot' > /dev/null 2>&1 &".to_string()
    }

    fn describe(&self) -> String {
        "Reboot host".to_string()
    }

    /// The session may be torn down by the reboot itself
    fn accepted_exit_codes(&self) -> &'static [i32] {
        &[0, 255]
    }
}
