// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Web root provisioning.
//!
//! Each host gets a document root owned by the invoking user and the web
//! server group. The web server can read everything, the owner can write, and
//! everyone else gets nothing.
//!
//! # Permission Layout
//!
//! | Kind      | Mode   | Meaning              |
//! |-----------|--------|----------------------|
//! | directory | `2750` | `rwxr-s---` with SGID |
//! | file      | `0640` | `rw-r-----`          |
//!
//! The SGID bit on directories makes files created later inherit the web
//! server group.

use crate::{host::HostName, site::exists, system::Owner, template::render_index_page};

use std::{
    fs::{create_dir_all, remove_dir_all, set_permissions, write, Permissions},
    io::ErrorKind,
    os::unix::fs::{chown, PermissionsExt},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

/// Mode of every directory under a web root.
pub const DIR_MODE: u32 = 0o2750;

/// Mode of every file under a web root.
pub const FILE_MODE: u32 = 0o640;

/// Create web root with index page for target host.
///
/// # Errors
///
/// - Return [`WebRootError::Exists`] if web root is already present.
/// - Return [`WebRootError::Io`] if directory or index page cannot be created.
#[instrument(skip(web_root, index_file), level = "debug")]
pub fn create_web_root(host: &HostName, web_root: &Path, index_file: &Path) -> Result<()> {
    if exists(web_root) {
        return Err(WebRootError::Exists {
            web_root: web_root.into(),
        });
    }

    create_dir_all(web_root).map_err(|err| WebRootError::Io {
        source: err,
        path: web_root.into(),
    })?;
    write(index_file, render_index_page(host)).map_err(|err| WebRootError::Io {
        source: err,
        path: index_file.into(),
    })?;
    info!("create web root {:?}", web_root.display());

    Ok(())
}

/// Recursively apply ownership and permission layout to web root.
///
/// Ownership is applied before modes, since changing ownership can clear the
/// SGID bit.
#[instrument(skip(web_root), level = "debug")]
pub fn secure_web_root(web_root: &Path, owner: Owner) -> Result<()> {
    for entry in WalkDir::new(web_root) {
        let entry = entry.map_err(|err| WebRootError::Walk {
            source: err,
            web_root: web_root.into(),
        })?;
        let path = entry.path();
        let mode = if entry.file_type().is_dir() {
            DIR_MODE
        } else {
            FILE_MODE
        };

        chown(path, Some(owner.uid), Some(owner.gid)).map_err(|err| WebRootError::Io {
            source: err,
            path: path.into(),
        })?;
        set_permissions(path, Permissions::from_mode(mode)).map_err(|err| WebRootError::Io {
            source: err,
            path: path.into(),
        })?;
        debug!("secure {:?} as {mode:o}", path.display());
    }

    Ok(())
}

/// Remove web root, returning true if anything was removed.
pub fn remove_web_root(web_root: &Path) -> Result<bool> {
    match remove_dir_all(web_root) {
        Ok(()) => {
            info!("remove web root {:?}", web_root.display());
            Ok(true)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(WebRootError::Io {
            source: err,
            path: web_root.into(),
        }),
    }
}

/// Web root provisioning error types.
#[derive(Debug, thiserror::Error)]
pub enum WebRootError {
    /// Web root is already present.
    #[error("web root already exists at {:?}", web_root.display())]
    Exists { web_root: PathBuf },

    /// Web root tree cannot be traversed.
    #[error("failed to walk web root at {:?}", web_root.display())]
    Walk {
        #[source]
        source: walkdir::Error,
        web_root: PathBuf,
    },

    /// File system operation on web root fails.
    #[error("failed to provision {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = WebRootError> = std::result::Result<T, E>;
