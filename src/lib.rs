// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Local Nginx virtual host provisioning.
//!
//! Vhostup turns a bare hostname into a working local site. It writes a
//! server block, enables it, registers the hostname in the hosts file, lays
//! out a web root with the right ownership, reloads Nginx, and finally checks
//! that the new site actually answers.
//!
//! # Provisioning Pipeline
//!
//! The work is an ordered pipeline of [`Step`]s driven by
//! [`VhostProvisioner`]. Steps run strictly in order and the first failure
//! halts the run. From the config step onward a failure also comes with a
//! rollback offer that removes everything created for the hostname so far.
//!
//! # Collaborators
//!
//! Everything that touches shared system state sits behind a trait so the
//! pipeline can be exercised against fakes:
//!
//! - [`HostsFileStore`] for the hosts file.
//! - [`SiteRegistry`] for the sites-available/sites-enabled pair.
//! - [`System`] for privileges, tool detection, and service control.
//! - [`HttpProbe`] for the final reachability check.
//! - [`Operator`] for progress hooks and the rollback confirmation.

pub mod config;
pub mod host;
pub mod path;
pub mod probe;
pub mod provision;
pub mod report;
pub mod site;
pub mod store;
pub mod system;
pub mod template;
pub mod webroot;

pub use crate::{
    config::ProvisionConfig,
    host::HostName,
    path::ProvisionPaths,
    probe::{HttpProbe, HttpReply, UreqProbe},
    provision::{
        Operator, ProvisionError, ProvisionResult, RollbackReport, Step, StepOutcome,
        VhostProvisioner,
    },
    site::{FsSiteRegistry, SiteRegistry},
    store::{FsHostsFile, HostsFileStore},
    system::{HostSystem, Owner, System},
};
