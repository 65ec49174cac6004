//! Where a role process runs.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::record::Role;

/// Execution target of one role, fixed for the lifetime of a suite.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionTarget {
    #[default]
    Local,
    Remote {
        host: String,
    },
}

impl ExecutionTarget {
    /// `Remote` for `Some(host)`, `Local` otherwise.
    pub fn from_host(host: Option<String>) -> Self {
        match host {
            Some(host) if !host.trim().is_empty() => ExecutionTarget::Remote { host },
            _ => ExecutionTarget::Local,
        }
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            ExecutionTarget::Local => None,
            ExecutionTarget::Remote { host } => Some(host),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ExecutionTarget::Remote { .. })
    }

    /// Wrap a command line for this target.
    ///
    /// Local commands pass through. Remote commands become
    /// `ssh <host> '<quoted command>'`; `privileged` prefixes `sudo`.
    pub fn wrap(&self, argv: &[String], privileged: bool) -> Vec<String> {
        match self {
            ExecutionTarget::Local => argv.to_vec(),
            ExecutionTarget::Remote { host } => {
                let mut remote = argv.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ");
                if privileged {
                    remote = format!("sudo {}", remote);
                }
                vec!["ssh".to_string(), host.clone(), remote]
            }
        }
    }
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionTarget::Local => f.write_str("local"),
            ExecutionTarget::Remote { host } => write!(f, "ssh://{}", host),
        }
    }
}

/// Per-role targets of a suite.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleTargets {
    pub server: ExecutionTarget,
    pub client: ExecutionTarget,
}

impl RoleTargets {
    pub fn for_role(&self, role: Role) -> &ExecutionTarget {
        match role {
            Role::Server => &self.server,
            Role::Client => &self.client,
        }
    }

    /// Distinct remote targets, server first.
    pub fn remotes(&self) -> Vec<&ExecutionTarget> {
        let mut remotes: Vec<&ExecutionTarget> = Vec::new();
        for target in [&self.server, &self.client] {
            if target.is_remote() && !remotes.contains(&target) {
                remotes.push(target);
            }
        }
        remotes
    }
}

/// Quote one argument for a POSIX shell. Plain words pass through.
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_=./:,@%+".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_local_passthrough() {
        let cmd = argv(&["nperf", "server", "--port", "45001"]);
        assert_eq!(ExecutionTarget::Local.wrap(&cmd, true), cmd);
    }

    #[test]
    fn test_remote_wrap_unprivileged() {
        let target = ExecutionTarget::Remote {
            host: "bench-01".to_string(),
        };
        let wrapped = target.wrap(&argv(&["nperf", "client", "--time", "10"]), false);
        assert_eq!(wrapped, argv(&["ssh", "bench-01", "nperf client --time 10"]));
    }

    #[test]
    fn test_remote_wrap_privileged() {
        let target = ExecutionTarget::Remote {
            host: "bench-02".to_string(),
        };
        let wrapped = target.wrap(&argv(&["nperf", "server"]), true);
        assert_eq!(wrapped[2], "sudo nperf server");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("--label-run=1472"), "--label-run=1472");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_from_host() {
        assert_eq!(ExecutionTarget::from_host(None), ExecutionTarget::Local);
        assert_eq!(ExecutionTarget::from_host(Some(" ".to_string())), ExecutionTarget::Local);
        assert_eq!(
            ExecutionTarget::from_host(Some("h".to_string())).host(),
            Some("h")
        );
    }

    #[test]
    fn test_remotes_deduplicated() {
        let host = ExecutionTarget::Remote {
            host: "same".to_string(),
        };
        let targets = RoleTargets {
            server: host.clone(),
            client: host,
        };
        assert_eq!(targets.remotes().len(), 1);
        assert!(RoleTargets::default().remotes().is_empty());
    }
}
