//! Typed `aws ec2` and `ssh-keygen` invocations for provisioning.
//!
//! All EC2 calls ask for `--output text` with a `--query`, so the parsing on
//! our side is a matter of splitting whitespace.
//!
//! # Environment Contract
//!
//! | Variable                | Source                                  |
//! |-------------------------|-----------------------------------------|
//! | `AWS_DEFAULT_REGION`    | `cloud.region`                          |
//! | `AWS_ACCESS_KEY_ID`     | credentials file (if configured)        |
//! | `AWS_SECRET_ACCESS_KEY` | credentials file (if configured)        |

use crate::command_traits::ToolArgs;

/// Access key pair read from an AWS console export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Region and optional explicit credentials shared by every call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsEnv {
    pub region: String,
    pub credentials: Option<AwsCredentials>,
}

impl AwsEnv {
    fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![("AWS_DEFAULT_REGION".to_string(), self.region.clone())];
        if let Some(creds) = &self.credentials {
            vars.push(("AWS_ACCESS_KEY_ID".to_string(), creds.access_key_id.clone()));
            vars.push((
                "AWS_SECRET_ACCESS_KEY".to_string(),
                creds.secret_access_key.clone(),
            ));
        }
        vars
    }

    fn secrets(&self) -> Vec<String> {
        self.credentials
            .as_ref()
            .map(|c| vec![c.secret_access_key.clone()])
            .unwrap_or_default()
    }
}

fn ec2_args(subcommand: &str, rest: &[&str]) -> Vec<String> {
    let mut args = vec!["ec2".to_string(), subcommand.to_string()];
    args.extend(rest.iter().map(|s| s.to_string()));
    args
}

/// Implements the shared parts of `ToolArgs` for an `aws` call
macro_rules! aws_tool {
    ($ty:ty, read_only = $ro:expr) => {
        impl ToolArgs for $ty {
            fn program(&self) -> &'static str {
                "aws"
            }
            fn to_cli_args(&self) -> Vec<String> {
                self.args()
            }
            fn get_env_vars(&self) -> Vec<(String, String)> {
                self.env.env_vars()
            }
            fn is_read_only(&self) -> bool {
                $ro
            }
            fn secrets(&self) -> Vec<String> {
                self.env.secrets()
            }
        }
    };
}

/// Group ids of security groups with the given name
#[derive(Debug, Clone)]
pub struct DescribeSecurityGroups {
    pub env: AwsEnv,
    pub group_name: String,
}

impl DescribeSecurityGroups {
    fn args(&self) -> Vec<String> {
        let filter = format!("Name=group-name,Values={}", self.group_name);
        ec2_args(
            "describe-security-groups",
            &[
                "--filters",
                filter.as_str(),
                "--query",
                "SecurityGroups[].GroupId",
                "--output",
                "text",
            ],
        )
    }
}

aws_tool!(DescribeSecurityGroups, read_only = true);

#[derive(Debug, Clone)]
pub struct CreateSecurityGroup {
    pub env: AwsEnv,
    pub group_name: String,
    pub description: String,
}

impl CreateSecurityGroup {
    fn args(&self) -> Vec<String> {
        ec2_args(
            "create-security-group",
            &[
                "--group-name",
                self.group_name.as_str(),
                "--description",
                self.description.as_str(),
                "--query",
                "GroupId",
                "--output",
                "text",
            ],
        )
    }
}

aws_tool!(CreateSecurityGroup, read_only = false);

/// Allow inbound TCP on one port
#[derive(Debug, Clone)]
pub struct AuthorizeIngress {
    pub env: AwsEnv,
    pub group_id: String,
    pub port: u16,
    pub cidr: String,
}

impl AuthorizeIngress {
    fn args(&self) -> Vec<String> {
        let port = self.port.to_string();
        ec2_args(
            "authorize-security-group-ingress",
            &[
                "--group-id",
                self.group_id.as_str(),
                "--protocol",
                "tcp",
                "--port",
                port.as_str(),
                "--cidr",
                self.cidr.as_str(),
            ],
        )
    }
}

aws_tool!(AuthorizeIngress, read_only = false);

/// Launch exactly one instance and print its id
#[derive(Debug, Clone)]
pub struct RunInstances {
    pub env: AwsEnv,
    pub ami_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_group: String,
}

impl RunInstances {
    fn args(&self) -> Vec<String> {
        ec2_args(
            "run-instances",
            &[
                "--image-id",
                self.ami_id.as_str(),
                "--instance-type",
                self.instance_type.as_str(),
                "--key-name",
                self.key_name.as_str(),
                "--security-groups",
                self.security_group.as_str(),
                "--count",
                "1",
                "--query",
                "Instances[0].InstanceId",
                "--output",
                "text",
            ],
        )
    }
}

aws_tool!(RunInstances, read_only = false);

/// Set the `Name` tag
#[derive(Debug, Clone)]
pub struct TagInstance {
    pub env: AwsEnv,
    pub instance_id: String,
    pub name: String,
}

impl TagInstance {
    fn args(&self) -> Vec<String> {
        let tag = format!("Key=Name,Value={}", self.name);
        ec2_args(
            "create-tags",
            &["--resources", self.instance_id.as_str(), "--tags", tag.as_str()],
        )
    }
}

aws_tool!(TagInstance, read_only = false);

/// State name and public DNS name of one instance
#[derive(Debug, Clone)]
pub struct DescribeInstance {
    pub env: AwsEnv,
    pub instance_id: String,
}

impl DescribeInstance {
    fn args(&self) -> Vec<String> {
        ec2_args(
            "describe-instances",
            &[
                "--instance-ids",
                self.instance_id.as_str(),
                "--query",
                "Reservations[0].Instances[0].[State.Name,PublicDnsName]",
                "--output",
                "text",
            ],
        )
    }
}

aws_tool!(DescribeInstance, read_only = true);

/// `(state, public_dns)` from `DescribeInstance` output. An empty DNS name
/// (shown as `None` by the CLI) comes back as an empty string.
pub fn parse_instance_state(stdout: &str) -> Option<(String, String)> {
    let mut fields = stdout.split_whitespace();
    let state = fields.next()?.to_string();
    let dns = match fields.next() {
        Some("None") | None => String::new(),
        Some(dns) => dns.to_string(),
    };
    Some((state, dns))
}

/// Forget a host key in `~/.ssh/known_hosts`
#[derive(Debug, Clone)]
pub struct SshKeygenRemove {
    pub host: String,
}

impl ToolArgs for SshKeygenRemove {
    fn program(&self) -> &'static str {
        "ssh-keygen"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-R".to_string(), self.host.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(with_creds: bool) -> AwsEnv {
        AwsEnv {
            region: "us-east-1".to_string(),
            credentials: with_creds.then(|| AwsCredentials {
                access_key_id: "AKIAEXAMPLE".to_string(),
                secret_access_key: "wJalrXUtnFEMI".to_string(),
            }),
        }
    }

    #[test]
    fn test_env_vars_with_and_without_credentials() {
        let cmd = DescribeSecurityGroups {
            env: env(false),
            group_name: "oracle-database".to_string(),
        };
        assert_eq!(
            cmd.get_env_vars(),
            vec![("AWS_DEFAULT_REGION".to_string(), "us-east-1".to_string())]
        );
        assert!(cmd.secrets().is_empty());

        let cmd = DescribeSecurityGroups {
            env: env(true),
            group_name: "oracle-database".to_string(),
        };
        let vars = cmd.get_env_vars();
        assert!(vars.contains(&("AWS_ACCESS_KEY_ID".to_string(), "AKIAEXAMPLE".to_string())));
        assert_eq!(cmd.secrets(), vec!["wJalrXUtnFEMI".to_string()]);
    }

    #[test]
    fn test_credentials_never_on_command_line() {
        let cmd = RunInstances {
            env: env(true),
            ami_id: "ami-3109d958".to_string(),
            instance_type: "m2.2xlarge".to_string(),
            key_name: "oracle-database".to_string(),
            security_group: "oracle-database".to_string(),
        };
        let args = cmd.to_cli_args().join(" ");
        assert!(!args.contains("wJalrXUtnFEMI"));
        assert!(args.starts_with("ec2 run-instances --image-id ami-3109d958"));
        assert!(args.contains("--key-name oracle-database"));
    }

    #[test]
    fn test_read_only_flags() {
        let describe = DescribeInstance {
            env: env(false),
            instance_id: "i-1".to_string(),
        };
        assert!(describe.is_read_only());
        let tag = TagInstance {
            env: env(false),
            instance_id: "i-1".to_string(),
            name: "oracle-database".to_string(),
        };
        assert!(!tag.is_read_only());
        assert_eq!(
            tag.to_cli_args(),
            vec!["ec2", "create-tags", "--resources", "i-1", "--tags", "Key=Name,Value=oracle-database"]
        );
    }

    #[test]
    fn test_authorize_ingress_args() {
        let cmd = AuthorizeIngress {
            env: env(false),
            group_id: "sg-123".to_string(),
            port: 1158,
            cidr: "0.0.0.0/0".to_string(),
        };
        assert_eq!(
            cmd.to_cli_args().join(" "),
            "ec2 authorize-security-group-ingress --group-id sg-123 --protocol tcp --port 1158 --cidr 0.0.0.0/0"
        );
    }

    #[test]
    fn test_parse_instance_state() {
        assert_eq!(
            parse_instance_state("running\tec2-1-2-3-4.compute-1.amazonaws.com\n"),
            Some(("running".to_string(), "ec2-1-2-3-4.compute-1.amazonaws.com".to_string()))
        );
        assert_eq!(
            parse_instance_state("pending\tNone\n"),
            Some(("pending".to_string(), String::new()))
        );
        assert_eq!(parse_instance_state("  \n"), None);
    }

    #[test]
    fn test_ssh_keygen_remove() {
        let cmd = SshKeygenRemove {
            host: "ec2-1-2-3-4.compute-1.amazonaws.com".to_string(),
        };
        assert_eq!(cmd.program(), "ssh-keygen");
        assert_eq!(cmd.to_cli_args(), vec!["-R", "ec2-1-2-3-4.compute-1.amazonaws.com"]);
    }
}
