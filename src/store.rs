// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Hosts file management.
//!
//! The system hosts file is shared mutable state that every provisioning run
//! touches. Access goes through [`HostsFileStore`] so the pipeline can be
//! pointed at something other than `/etc/hosts`.
//!
//! # Entry Layout
//!
//! Each provisioned hostname gets its own line of the form
//! `<address>\t\t<hostname>`. Appending is not idempotent. Running twice for
//! the same hostname leaves two identical lines, and no attempt is made to
//! deduplicate them.
//!
//! # Backups
//!
//! Every mutation is preceded by a backup into a dedicated directory, named
//! `hosts.<YYYYmmdd-HHMMSS>`. Backups are never overwritten. When two land in
//! the same second the later one gets a numeric suffix.

use crate::host::HostName;

use chrono::Local;
use std::{
    fs::{copy, read, read_to_string, write, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Separator between address and hostname in appended entries.
pub const ENTRY_SEPARATOR: &str = "\t\t";

/// Layer of indirection for hosts file access.
pub trait HostsFileStore {
    /// Path of the hosts file being managed.
    fn path(&self) -> &Path;

    /// Copy current hosts file into backup directory, returning backup path.
    fn backup(&self) -> Result<PathBuf>;

    /// Append mapping of address to hostname.
    fn append_entry(&self, address: &str, host: &HostName) -> Result<()>;

    /// Strip hostname from hosts file, returning number of lines touched.
    fn remove_host(&self, host: &HostName) -> Result<usize>;
}

/// Hosts file living on the local file system.
#[derive(Debug, Clone)]
pub struct FsHostsFile {
    hosts_path: PathBuf,
    backup_dir: PathBuf,
}

impl FsHostsFile {
    /// Construct new hosts file store.
    pub fn new(hosts_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            hosts_path: hosts_path.into(),
            backup_dir: backup_dir.into(),
        }
    }

    fn free_backup_path(&self) -> PathBuf {
        let stem = format!("hosts.{}", Local::now().format("%Y%m%d-%H%M%S"));
        let mut candidate = self.backup_dir.join(&stem);
        let mut suffix = 1;
        while candidate.exists() {
            candidate = self.backup_dir.join(format!("{stem}.{suffix}"));
            suffix += 1;
        }

        candidate
    }

    fn read_error(&self, source: std::io::Error) -> StoreError {
        StoreError::ReadHostsFile {
            source,
            hosts_path: self.hosts_path.clone(),
        }
    }

    fn write_error(&self, source: std::io::Error) -> StoreError {
        StoreError::WriteHostsFile {
            source,
            hosts_path: self.hosts_path.clone(),
        }
    }
}

impl HostsFileStore for FsHostsFile {
    fn path(&self) -> &Path {
        self.hosts_path.as_path()
    }

    #[instrument(skip(self), level = "debug")]
    fn backup(&self) -> Result<PathBuf> {
        mkdirp::mkdirp(&self.backup_dir).map_err(|err| StoreError::CreateBackupDir {
            source: err,
            backup_dir: self.backup_dir.clone(),
        })?;

        let backup_path = self.free_backup_path();
        copy(&self.hosts_path, &backup_path).map_err(|err| StoreError::Backup {
            source: err,
            hosts_path: self.hosts_path.clone(),
            backup_path: backup_path.clone(),
        })?;
        info!("backup {:?} to {:?}", self.hosts_path.display(), backup_path.display());

        Ok(backup_path)
    }

    #[instrument(skip(self), level = "debug")]
    fn append_entry(&self, address: &str, host: &HostName) -> Result<()> {
        let current = read(&self.hosts_path).map_err(|err| self.read_error(err))?;
        let mut entry = String::new();

        // INVARIANT: New entry always lands on its own line.
        if current.last().is_some_and(|byte| *byte != b'\n') {
            entry.push('\n');
        }
        entry.push_str(&format_entry(address, host));
        entry.push('\n');

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.hosts_path)
            .map_err(|err| self.write_error(err))?;
        file.write_all(entry.as_bytes())
            .map_err(|err| self.write_error(err))?;
        info!("map {host} to {address} in {:?}", self.hosts_path.display());

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn remove_host(&self, host: &HostName) -> Result<usize> {
        let content = read_to_string(&self.hosts_path).map_err(|err| self.read_error(err))?;
        let (stripped, touched) = strip_host(&content, host);
        if touched == 0 {
            debug!("{host} not found in {:?}", self.hosts_path.display());
            return Ok(0);
        }

        write(&self.hosts_path, stripped).map_err(|err| self.write_error(err))?;
        info!("strip {host} from {:?}", self.hosts_path.display());

        Ok(touched)
    }
}

/// Format a hosts file entry without trailing newline.
pub fn format_entry(address: &str, host: &HostName) -> String {
    format!("{address}{ENTRY_SEPARATOR}{host}")
}

/// Strip hostname from hosts file content.
///
/// Returns new content, and the number of lines that were dropped or
/// rewritten.
///
/// # Invariant
///
/// - Lines that do not map the hostname are kept byte for byte.
/// - A line mapping only the hostname is dropped.
/// - A line mapping the hostname among others keeps the others.
pub fn strip_host(content: &str, host: &HostName) -> (String, usize) {
    let mut out = String::with_capacity(content.len());
    let mut touched = 0;

    for line in content.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        let ending = &line[body.len()..];
        let (entry, comment) = match body.find('#') {
            Some(idx) => body.split_at(idx),
            None => (body, ""),
        };

        let mut fields = entry.split_whitespace();
        let Some(address) = fields.next() else {
            out.push_str(line);
            continue;
        };
        let names = fields.collect::<Vec<_>>();
        if !names.contains(&host.as_str()) {
            out.push_str(line);
            continue;
        }

        touched += 1;
        let kept = names
            .into_iter()
            .filter(|name| *name != host.as_str())
            .collect::<Vec<_>>();
        if kept.is_empty() {
            continue;
        }

        out.push_str(address);
        out.push_str(ENTRY_SEPARATOR);
        out.push_str(&kept.join(" "));
        if !comment.is_empty() {
            out.push(' ');
            out.push_str(comment);
        }
        out.push_str(ending);
    }

    (out, touched)
}

/// Hosts file management error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Hosts file cannot be read from.
    #[error("failed to read from hosts file at {:?}", hosts_path.display())]
    ReadHostsFile {
        #[source]
        source: std::io::Error,
        hosts_path: PathBuf,
    },

    /// Hosts file cannot be written to.
    #[error("failed to write to hosts file at {:?}", hosts_path.display())]
    WriteHostsFile {
        #[source]
        source: std::io::Error,
        hosts_path: PathBuf,
    },

    /// Backup directory cannot be created.
    #[error("failed to create hosts backup directory at {:?}", backup_dir.display())]
    CreateBackupDir {
        #[source]
        source: std::io::Error,
        backup_dir: PathBuf,
    },

    /// Hosts file cannot be copied into backup directory.
    #[error(
        "failed to backup hosts file {:?} to {:?}",
        hosts_path.display(),
        backup_path.display()
    )]
    Backup {
        #[source]
        source: std::io::Error,
        hosts_path: PathBuf,
        backup_path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
