// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! HTTP reachability probing.
//!
//! A freshly provisioned host is only considered reachable if it answers with
//! status 200, and the first line of the body is the hostname itself. A 200
//! alone could come from the default server catching a request whose hostname
//! never made it into the hosts file, or whose server block never loaded.

use crate::host::HostName;

use std::time::Duration;
use tracing::{debug, instrument};

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// Status code.
    pub status: u16,

    /// Response body.
    pub body: String,
}

impl HttpReply {
    /// Check if reply was served by the virtual host of target hostname.
    pub fn served_by(&self, host: &HostName) -> bool {
        self.status == 200 && self.body.lines().next() == Some(host.as_str())
    }
}

/// Layer of indirection for HTTP access.
pub trait HttpProbe {
    /// Issue GET request to target URL.
    ///
    /// Non-success status codes are a reply, not an error.
    fn get(&self, url: &str) -> Result<HttpReply>;
}

/// HTTP probe through ureq.
#[derive(Debug, Clone)]
pub struct UreqProbe {
    agent: ureq::Agent,
}

impl UreqProbe {
    /// Construct new probe giving up after timeout.
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }
}

impl HttpProbe for UreqProbe {
    #[instrument(skip(self), level = "debug")]
    fn get(&self, url: &str) -> Result<HttpReply> {
        let response = match self.agent.get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => {
                return Err(ProbeError::Transport {
                    source: Box::new(err),
                    url: url.into(),
                })
            }
        };

        let status = response.status();
        let body = response
            .into_string()
            .map_err(|err| ProbeError::ReadBody {
                source: err,
                url: url.into(),
            })?;
        debug!("GET {url} -> {status}");

        Ok(HttpReply { status, body })
    }
}

/// URL probed to verify target host.
pub fn probe_url(host: &HostName) -> String {
    format!("http://{host}/")
}

/// HTTP probing error types.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Request never produced a response.
    #[error("request to {url} failed")]
    Transport {
        #[source]
        source: Box<ureq::Error>,
        url: String,
    },

    /// Response body cannot be read.
    #[error("failed to read response body from {url}")]
    ReadBody {
        #[source]
        source: std::io::Error,
        url: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ProbeError> = std::result::Result<T, E>;
