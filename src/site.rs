// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Server block registry.
//!
//! Nginx on Debian style systems keeps every server block in a
//! __sites-available__ directory, and activates a subset of them by
//! symlinking into a __sites-enabled__ directory. [`SiteRegistry`] models that
//! pair of directories.
//!
//! # No-Clobber Installation
//!
//! A server block is first written to a hidden candidate file next to its
//! final location, then hard linked into place. Hard linking fails if the
//! target already exists, which makes the existence check and the move a
//! single atomic operation. A plain rename would silently replace whatever
//! was there.

use crate::{host::HostName, path::config_file_name};

use std::{
    fs::{hard_link, remove_file, symlink_metadata, write},
    io::ErrorKind,
    os::unix::fs::symlink,
    path::{absolute, Path, PathBuf},
    process,
};
use tracing::{debug, info, instrument};

/// Layer of indirection for server block management.
pub trait SiteRegistry {
    /// Path of server block for target host.
    fn config_path(&self, host: &HostName) -> PathBuf;

    /// Path of enabled symlink for target host.
    fn link_path(&self, host: &HostName) -> PathBuf;

    /// Install server block for target host, never replacing an existing one.
    fn install(&self, host: &HostName, contents: &str) -> Result<PathBuf>;

    /// Enable server block of target host.
    fn enable(&self, host: &HostName) -> Result<PathBuf>;

    /// Remove enabled symlink of target host, if present.
    fn disable(&self, host: &HostName) -> Result<Option<PathBuf>>;

    /// Remove server block of target host, if present.
    fn uninstall(&self, host: &HostName) -> Result<Option<PathBuf>>;

    /// Remove enabled symlink and server block, returning what was removed.
    ///
    /// Missing files are not an error.
    fn remove(&self, host: &HostName) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        removed.extend(self.disable(host)?);
        removed.extend(self.uninstall(host)?);

        Ok(removed)
    }
}

/// Server block registry on the local file system.
#[derive(Debug, Clone)]
pub struct FsSiteRegistry {
    available_dir: PathBuf,
    enabled_dir: PathBuf,
}

impl FsSiteRegistry {
    /// Construct new server block registry.
    pub fn new(available_dir: impl Into<PathBuf>, enabled_dir: impl Into<PathBuf>) -> Self {
        Self {
            available_dir: available_dir.into(),
            enabled_dir: enabled_dir.into(),
        }
    }

    fn candidate_path(&self, host: &HostName) -> PathBuf {
        self.available_dir
            .join(format!(".{}.{}.tmp", config_file_name(host), process::id()))
    }
}

impl SiteRegistry for FsSiteRegistry {
    fn config_path(&self, host: &HostName) -> PathBuf {
        self.available_dir.join(config_file_name(host))
    }

    fn link_path(&self, host: &HostName) -> PathBuf {
        self.enabled_dir.join(config_file_name(host))
    }

    #[instrument(skip(self, contents), level = "debug")]
    fn install(&self, host: &HostName, contents: &str) -> Result<PathBuf> {
        let config_path = self.config_path(host);
        if exists(&config_path) {
            return Err(SiteError::ConfigExists { config_path });
        }

        let candidate = self.candidate_path(host);
        write(&candidate, contents).map_err(|err| SiteError::WriteConfig {
            source: err,
            config_path: candidate.clone(),
        })?;
        debug!("wrote candidate server block {:?}", candidate.display());

        let linked = hard_link(&candidate, &config_path);
        remove_file(&candidate).map_err(|err| SiteError::WriteConfig {
            source: err,
            config_path: candidate.clone(),
        })?;

        match linked {
            Ok(()) => {
                info!("install server block {:?}", config_path.display());
                Ok(config_path)
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(SiteError::ConfigExists { config_path })
            }
            Err(err) => Err(SiteError::WriteConfig {
                source: err,
                config_path,
            }),
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn enable(&self, host: &HostName) -> Result<PathBuf> {
        let link_path = self.link_path(host);
        let config_path = self.config_path(host);

        // INVARIANT: Symlink target must not depend on the link's directory.
        let target = absolute(&config_path).map_err(|err| SiteError::Link {
            source: err,
            link_path: link_path.clone(),
            config_path: config_path.clone(),
        })?;

        symlink(&target, &link_path).map_err(|err| SiteError::Link {
            source: err,
            link_path: link_path.clone(),
            config_path: target.clone(),
        })?;
        info!("enable {:?} -> {:?}", link_path.display(), target.display());

        Ok(link_path)
    }

    #[instrument(skip(self), level = "debug")]
    fn disable(&self, host: &HostName) -> Result<Option<PathBuf>> {
        remove_if_present(self.link_path(host))
    }

    #[instrument(skip(self), level = "debug")]
    fn uninstall(&self, host: &HostName) -> Result<Option<PathBuf>> {
        remove_if_present(self.config_path(host))
    }
}

fn remove_if_present(path: PathBuf) -> Result<Option<PathBuf>> {
    match remove_file(&path) {
        Ok(()) => {
            info!("remove {:?}", path.display());
            Ok(Some(path))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("{:?} already gone", path.display());
            Ok(None)
        }
        Err(err) => Err(SiteError::Remove { source: err, path }),
    }
}

/// Check existence without following symlinks.
///
/// A dangling symlink still counts as existing.
pub(crate) fn exists(path: &Path) -> bool {
    symlink_metadata(path).is_ok()
}

/// Server block registry error types.
#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    /// Server block already exists.
    #[error("server block already exists at {:?}", config_path.display())]
    ConfigExists { config_path: PathBuf },

    /// Server block cannot be written.
    #[error("failed to write server block at {:?}", config_path.display())]
    WriteConfig {
        #[source]
        source: std::io::Error,
        config_path: PathBuf,
    },

    /// Enabled symlink cannot be created.
    #[error(
        "failed to link {:?} to {:?}",
        link_path.display(),
        config_path.display()
    )]
    Link {
        #[source]
        source: std::io::Error,
        link_path: PathBuf,
        config_path: PathBuf,
    },

    /// Server block or symlink cannot be removed.
    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = SiteError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs::{create_dir_all, read_dir, read_link, read_to_string};

    fn registry() -> anyhow::Result<FsSiteRegistry> {
        create_dir_all("available")?;
        create_dir_all("enabled")?;
        Ok(FsSiteRegistry::new("available", "enabled"))
    }

    #[sealed_test]
    fn install_server_block() -> anyhow::Result<()> {
        let registry = registry()?;
        let host = HostName::new("test.local")?;
        let path = registry.install(&host, "server {}\n")?;

        assert_eq!(path, PathBuf::from("available/test.local.conf"));
        assert_eq!(read_to_string(&path)?, "server {}\n");

        // No candidate files left behind.
        assert_eq!(read_dir("available")?.count(), 1);

        Ok(())
    }

    #[sealed_test]
    fn install_refuses_to_clobber() -> anyhow::Result<()> {
        let registry = registry()?;
        let host = HostName::new("test.local")?;
        registry.install(&host, "first\n")?;
        let result = registry.install(&host, "second\n");

        assert!(matches!(result, Err(SiteError::ConfigExists { .. })));
        assert_eq!(read_to_string("available/test.local.conf")?, "first\n");
        assert_eq!(read_dir("available")?.count(), 1);

        Ok(())
    }

    #[sealed_test]
    fn enable_links_to_absolute_config_path() -> anyhow::Result<()> {
        let registry = registry()?;
        let host = HostName::new("test.local")?;
        registry.install(&host, "server {}\n")?;
        let link = registry.enable(&host)?;

        let target = read_link(&link)?;
        assert!(target.is_absolute());
        assert_eq!(read_to_string(&link)?, "server {}\n");

        Ok(())
    }

    #[sealed_test]
    fn enable_twice_fails() -> anyhow::Result<()> {
        let registry = registry()?;
        let host = HostName::new("test.local")?;
        registry.install(&host, "server {}\n")?;
        registry.enable(&host)?;

        assert!(matches!(registry.enable(&host), Err(SiteError::Link { .. })));

        Ok(())
    }

    #[sealed_test]
    fn remove_tolerates_missing_files() -> anyhow::Result<()> {
        let registry = registry()?;
        let host = HostName::new("test.local")?;
        registry.install(&host, "server {}\n")?;

        let removed = registry.remove(&host)?;
        assert_eq!(removed, vec![PathBuf::from("available/test.local.conf")]);
        assert!(registry.remove(&host)?.is_empty());

        Ok(())
    }

    #[sealed_test]
    fn disable_keeps_server_block() -> anyhow::Result<()> {
        let registry = registry()?;
        let host = HostName::new("test.local")?;
        registry.install(&host, "server {}\n")?;
        registry.enable(&host)?;

        assert_eq!(
            registry.disable(&host)?,
            Some(PathBuf::from("enabled/test.local.conf"))
        );
        assert_eq!(read_to_string("available/test.local.conf")?, "server {}\n");
        assert_eq!(registry.disable(&host)?, None);

        Ok(())
    }
}
