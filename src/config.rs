// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the configuration file that Vhostup uses to decide
//! where things live on the host system. Every field has a default matching a
//! stock Debian style Nginx install, so an empty file, or no file at all, is a
//! valid configuration. File I/O is left to the caller to figure out.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Placeholder in [`NginxSettings::fastcgi_socket`] replaced by PHP version.
pub const PHP_VERSION_PLACEHOLDER: &str = "{version}";

/// Provisioning configuration layout.
///
/// # General Layout
///
/// The configuration is split into four tables: `nginx` for the web server
/// itself, `hosts` for the hosts file and its backups, `web` for the web root
/// tree, and `verify` for the final reachability probe.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Web server settings.
    pub nginx: NginxSettings,

    /// Hosts file settings.
    pub hosts: HostsSettings,

    /// Web root settings.
    pub web: WebSettings,

    /// Reachability probe settings.
    pub verify: VerifySettings,
}

impl ProvisionConfig {
    /// Resolve FastCGI socket path for a detected PHP version.
    pub fn fastcgi_socket(&self, php_version: impl AsRef<str>) -> String {
        self.nginx
            .fastcgi_socket
            .replace(PHP_VERSION_PLACEHOLDER, php_version.as_ref())
    }
}

impl FromStr for ProvisionConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: ProvisionConfig = toml::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        config.nginx.sites_available = expand_path(&config.nginx.sites_available)?;
        config.nginx.sites_enabled = expand_path(&config.nginx.sites_enabled)?;
        config.nginx.error_log = expand_path(&config.nginx.error_log)?;
        config.hosts.path = expand_path(&config.hosts.path)?;
        config.hosts.backup_dir = expand_path(&config.hosts.backup_dir)?;
        config.web.root = expand_path(&config.web.root)?;

        Ok(config)
    }
}

impl Display for ProvisionConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Nginx settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NginxSettings {
    /// Directory holding every server block configuration.
    pub sites_available: PathBuf,

    /// Directory holding symlinks to active server block configurations.
    pub sites_enabled: PathBuf,

    /// Service unit name of the web server.
    pub service: String,

    /// Service unit name of a conflicting web server to stop first.
    pub legacy_service: Option<String>,

    /// FastCGI socket path, `{version}` expands to PHP "major.minor".
    pub fastcgi_socket: String,

    /// Error log to point the operator at when verification fails.
    pub error_log: PathBuf,
}

impl Default for NginxSettings {
    fn default() -> Self {
        Self {
            sites_available: PathBuf::from("/etc/nginx/sites-available"),
            sites_enabled: PathBuf::from("/etc/nginx/sites-enabled"),
            service: "nginx".into(),
            legacy_service: Some("apache2".into()),
            fastcgi_socket: "/run/php/php{version}-fpm.sock".into(),
            error_log: PathBuf::from("/var/log/nginx/error.log"),
        }
    }
}

/// Hosts file settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostsSettings {
    /// Path to system hosts file.
    pub path: PathBuf,

    /// Directory that receives timestamped hosts file backups.
    pub backup_dir: PathBuf,

    /// Address every provisioned hostname maps to.
    pub address: String,
}

impl Default for HostsSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/etc/hosts"),
            backup_dir: PathBuf::from("/var/backups/vhostup"),
            address: "127.0.0.1".into(),
        }
    }
}

/// Web root settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSettings {
    /// Base directory under which each host gets its own web root.
    pub root: PathBuf,

    /// Group the web server runs as, and that owns every web root.
    pub group: String,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/www"),
            group: "www-data".into(),
        }
    }
}

/// Reachability probe settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VerifySettings {
    /// Seconds to wait on the HTTP probe before giving up.
    pub timeout_secs: u64,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(raw.as_ref()).map_err(ConfigError::ShellExpansion)?;
    Ok(PathBuf::from(expanded.into_owned()))
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
