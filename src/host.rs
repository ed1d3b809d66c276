// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Hostname requests.
//!
//! The hostname is substituted verbatim into paths, the server block, and the
//! hosts file. It only has to be present and must not look like a command
//! line flag. Nothing else about hostname syntax is enforced.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Validated hostname of the virtual host to provision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostName(String);

impl HostName {
    /// Validate and wrap a hostname.
    ///
    /// # Errors
    ///
    /// - Return [`HostNameError::Empty`] if name is empty or blank.
    /// - Return [`HostNameError::FlagLike`] if name starts with '-'.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(HostNameError::Empty);
        }

        if name.starts_with('-') {
            return Err(HostNameError::FlagLike(name));
        }

        Ok(Self(name))
    }

    /// Treat hostname as string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for HostName {
    type Err = HostNameError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::new(name)
    }
}

impl Display for HostName {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl AsRef<str> for HostName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Hostname validation error types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HostNameError {
    /// No hostname was given.
    #[error("host name must not be empty")]
    Empty,

    /// Hostname looks like a command line flag.
    #[error("host name {0:?} must not start with '-'")]
    FlagLike(String),
}

/// Friendly result alias :3
type Result<T, E = HostNameError> = std::result::Result<T, E>;
