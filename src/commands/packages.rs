//! yum commands for the `install-packages` and `upgrade-host` tasks.

use crate::command_traits::{RemoteCommand, shell_quote};

/// `yum -y makecache`
#[derive(Debug, Clone, Default)]
pub struct YumMakecache;

impl RemoteCommand for YumMakecache {
    fn command_line(&self) -> String {
        "yum -y makecache".to_string()
    }

    fn describe(&self) -> String {
        "Refresh yum metadata cache".to_string()
    }
}

/// `yum -y install <packages...>`
#[derive(Debug, Clone)]
pub struct YumInstall {
    pub packages: Vec<String>,
}

impl RemoteCommand for YumInstall {
    fn command_line(&self) -> String {
        let packages: Vec<String> = self.packages.iter().map(|p| shell_quote(p)).collect();
        format!("yum -y install {}", packages.join(" "))
    }

    fn describe(&self) -> String {
        format!("Install {} package(s)", self.packages.len())
    }
}

/// `yum -y upgrade`
#[derive(Debug, Clone, Default)]
pub struct YumUpgrade;

impl RemoteCommand for YumUpgrade {
    fn command_line(&self) -> String {
        "yum -y upgrade".to_string()
    }

    fn describe(&self) -> String {
        "Upgrade all packages".to_string()
    }
}
