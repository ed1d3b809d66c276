// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host system interaction.
//!
//! Everything the provisioning pipeline asks of the operating system besides
//! plain file I/O: who is running us, which tools are installed, which
//! numeric ids an account maps to, and how to drive the service manager.
//!
//! The production implementation [`HostSystem`] shells out to the usual
//! userland tools (`id`, `getent`, `systemctl`, `nginx`, `php`) rather than
//! binding libc, so what it does can be reproduced by hand from a terminal.

use std::{
    env,
    ffi::OsStr,
    process::{Command, Output},
};
use tracing::{debug, info, instrument};

/// Numeric owner of provisioned files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    /// User id.
    pub uid: u32,

    /// Group id.
    pub gid: u32,
}

/// Layer of indirection for host system access.
pub trait System {
    /// Check if current process runs with elevated privileges.
    fn is_elevated(&self) -> Result<bool>;

    /// Name of the original non-elevated user that invoked us.
    fn invoking_user(&self) -> Option<String>;

    /// Check if user is a member of group.
    fn user_in_group(&self, user: &str, group: &str) -> Result<bool>;

    /// Version of installed Nginx, if any.
    fn nginx_version(&self) -> Option<String>;

    /// Version of installed PHP as "major.minor", if any.
    fn php_version(&self) -> Option<String>;

    /// Resolve user and group names to numeric ids.
    fn resolve_owner(&self, user: &str, group: &str) -> Result<Owner>;

    /// Check if service reports an active state.
    fn service_active(&self, service: &str) -> Result<bool>;

    /// Stop a service.
    fn stop_service(&self, service: &str) -> Result<()>;

    /// Reload configuration of a running service.
    fn reload_service(&self, service: &str) -> Result<()>;

    /// Restart a service, starting it if stopped.
    fn restart_service(&self, service: &str) -> Result<()>;

    /// Validate web server configuration syntax.
    fn test_web_server_config(&self) -> Result<()>;
}

/// The machine we are running on.
#[derive(Debug, Default, Clone)]
pub struct HostSystem;

impl HostSystem {
    /// Construct new host system handle.
    pub fn new() -> Self {
        Self
    }

    fn systemctl(&self, action: &str, service: &str) -> Result<()> {
        let output = syscall_checked("systemctl", [action, service])?;
        if !output.is_empty() {
            debug!("{output}");
        }

        Ok(())
    }
}

impl System for HostSystem {
    fn is_elevated(&self) -> Result<bool> {
        Ok(syscall_checked("id", ["-u"])?.trim() == "0")
    }

    fn invoking_user(&self) -> Option<String> {
        ["SUDO_USER", "USER"]
            .into_iter()
            .filter_map(|key| env::var(key).ok())
            .find(|user| !user.is_empty())
    }

    #[instrument(skip(self), level = "debug")]
    fn user_in_group(&self, user: &str, group: &str) -> Result<bool> {
        let groups = syscall_checked("id", ["-nG", user])?;
        Ok(groups.split_whitespace().any(|name| name == group))
    }

    #[instrument(skip(self), level = "debug")]
    fn nginx_version(&self) -> Option<String> {
        let binary = which::which("nginx").ok()?;
        debug!("found nginx at {:?}", binary.display());

        // INVARIANT: Nginx prints its version to stderr.
        let output = syscall(&binary, ["-v"]).ok()?;
        let text = String::from_utf8_lossy(&output.stderr);
        Some(parse_nginx_version(&text).unwrap_or_else(|| "unknown".into()))
    }

    #[instrument(skip(self), level = "debug")]
    fn php_version(&self) -> Option<String> {
        let binary = which::which("php").ok()?;
        debug!("found php at {:?}", binary.display());

        let output = syscall(&binary, ["-v"]).ok()?;
        parse_php_version(&String::from_utf8_lossy(&output.stdout))
    }

    #[instrument(skip(self), level = "debug")]
    fn resolve_owner(&self, user: &str, group: &str) -> Result<Owner> {
        let uid_text = syscall_checked("id", ["-u", user])?;
        let uid = uid_text.trim().parse().map_err(|_| SystemError::Parse {
            what: format!("user id of {user:?}"),
            output: uid_text.clone(),
        })?;

        let group_text = syscall_checked("getent", ["group", group])?;
        let gid = parse_group_id(&group_text).ok_or_else(|| SystemError::Parse {
            what: format!("group id of {group:?}"),
            output: group_text.clone(),
        })?;

        Ok(Owner { uid, gid })
    }

    fn service_active(&self, service: &str) -> Result<bool> {
        // INVARIANT: is-active exits non-zero for inactive units, so only
        //   stdout decides.
        let output = syscall("systemctl", ["is-active", service])?;
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "active")
    }

    #[instrument(skip(self), level = "debug")]
    fn stop_service(&self, service: &str) -> Result<()> {
        info!("stop {service}");
        self.systemctl("stop", service)
    }

    #[instrument(skip(self), level = "debug")]
    fn reload_service(&self, service: &str) -> Result<()> {
        info!("reload {service}");
        self.systemctl("reload", service)
    }

    #[instrument(skip(self), level = "debug")]
    fn restart_service(&self, service: &str) -> Result<()> {
        info!("restart {service}");
        self.systemctl("restart", service)
    }

    fn test_web_server_config(&self) -> Result<()> {
        syscall_checked("nginx", ["-t"]).map(|_| ())
    }
}

/// Extract version from `nginx -v` output.
pub fn parse_nginx_version(text: &str) -> Option<String> {
    let (_, rest) = text.split_once("nginx/")?;
    rest.split_whitespace().next().map(ToString::to_string)
}

/// Extract "major.minor" from `php -v` output.
pub fn parse_php_version(text: &str) -> Option<String> {
    let full = text.lines().next()?.strip_prefix("PHP ")?.split_whitespace().next()?;
    let mut parts = full.split('.');
    let major = parts.next().filter(|part| part.chars().all(|c| c.is_ascii_digit()))?;
    let minor = parts.next().filter(|part| part.chars().all(|c| c.is_ascii_digit()))?;
    if major.is_empty() || minor.is_empty() {
        return None;
    }

    Some(format!("{major}.{minor}"))
}

/// Extract group id from a `getent group` record.
pub fn parse_group_id(record: &str) -> Option<u32> {
    record.trim().split(':').nth(2)?.parse().ok()
}

fn syscall(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<Output> {
    Command::new(cmd.as_ref())
        .args(args)
        .output()
        .map_err(|err| SystemError::Syscall {
            source: err,
            program: cmd.as_ref().to_string_lossy().into_owned(),
        })
}

fn syscall_checked(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<String> {
    let output = syscall(cmd.as_ref(), args)?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();

    if !output.status.success() {
        let mut message = stderr.trim_end().to_string();
        if message.is_empty() {
            message = stdout.trim_end().to_string();
        }

        return Err(SystemError::CommandFailed {
            program: cmd.as_ref().to_string_lossy().into_owned(),
            message,
        });
    }

    Ok(stdout)
}

/// Host system interaction error types.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// External program cannot be spawned.
    #[error("failed to run {program:?}")]
    Syscall {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// External program exits unsuccessfully.
    #[error("command {program:?} failed: {message}")]
    CommandFailed { program: String, message: String },

    /// Output of external program cannot be understood.
    #[error("cannot determine {what} from {output:?}")]
    Parse { what: String, output: String },
}

/// Friendly result alias :3
pub type Result<T, E = SystemError> = std::result::Result<T, E>;
