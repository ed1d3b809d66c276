// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use crate::{config::ProvisionConfig, host::HostName};

use std::path::PathBuf;

/// Name of the index page placed in every web root.
pub const INDEX_FILE_NAME: &str = "index.html";

/// Every path a single provisioning run touches.
///
/// Derived deterministically from a hostname and the active configuration.
/// Nothing here checks whether the paths exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionPaths {
    /// Server block in the sites-available directory.
    pub config_file: PathBuf,

    /// Symlink in the sites-enabled directory.
    pub enabled_link: PathBuf,

    /// Document root of the virtual host.
    pub web_root: PathBuf,

    /// Index page inside the document root.
    pub index_file: PathBuf,

    /// Directory receiving hosts file backups.
    pub hosts_backup_dir: PathBuf,
}

impl ProvisionPaths {
    /// Derive provisioning paths for target hostname.
    pub fn derive(config: &ProvisionConfig, host: &HostName) -> Self {
        let file_name = config_file_name(host);
        let web_root = config.web.root.join(host.as_str());

        Self {
            config_file: config.nginx.sites_available.join(&file_name),
            enabled_link: config.nginx.sites_enabled.join(&file_name),
            index_file: web_root.join(INDEX_FILE_NAME),
            web_root,
            hosts_backup_dir: config.hosts.backup_dir.clone(),
        }
    }
}

/// File name of the server block for target hostname.
pub fn config_file_name(host: &HostName) -> String {
    format!("{host}.conf")
}

/// Determine default absolute path to configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/vhostup/config.toml` as
/// the default absolute path. Does not check if the path returned actually
/// exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if configuration directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_file() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("vhostup").join("config.toml"))
        .ok_or(NoWayHome)
}

/// No way to determine user's configuration directory.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's configuration directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
