//! Tunnel descriptor

use crate::Protocol;
use serde::{Deserialize, Serialize};

/// A requested or active tunnel.
///
/// `remote_address` is non-empty exactly when `created` is true. Both are only
/// changed through [`TunnelDescriptor::mark_created`] and
/// [`TunnelDescriptor::mark_closed`], which the lifecycle client calls after a
/// successful create or destroy. The name is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelDescriptor {
    name: String,
    #[serde(rename = "proto")]
    protocol: Protocol,
    /// `host:port` or a bare port
    #[serde(rename = "addr")]
    local_address: String,
    /// Basic auth credentials as `user:password`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth: Option<String>,
    #[serde(default)]
    inspect: bool,
    #[serde(default, skip_deserializing, skip_serializing_if = "String::is_empty")]
    remote_address: String,
    #[serde(default, skip_deserializing)]
    created: bool,
}

impl TunnelDescriptor {
    pub fn new(
        name: impl Into<String>,
        protocol: Protocol,
        local_address: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            protocol,
            local_address: local_address.into(),
            auth: None,
            inspect: false,
            remote_address: String::new(),
            created: false,
        }
    }

    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    pub fn with_inspect(mut self, inspect: bool) -> Self {
        self.inspect = inspect;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    pub fn auth(&self) -> Option<&str> {
        self.auth.as_deref()
    }

    pub fn inspect(&self) -> bool {
        self.inspect
    }

    /// Public URL assigned by the agent, empty until created
    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Record a successful create.
    ///
    /// An empty URL leaves the descriptor untouched and returns false, since a
    /// created tunnel must always carry its public address.
    pub fn mark_created(&mut self, remote_address: impl Into<String>) -> bool {
        let remote_address = remote_address.into();
        if remote_address.is_empty() {
            return false;
        }
        self.remote_address = remote_address;
        self.created = true;
        true
    }

    /// Record a successful destroy
    pub fn mark_closed(&mut self) {
        self.remote_address.clear();
        self.created = false;
    }
}

impl std::fmt::Display for TunnelDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.created {
            write!(
                f,
                "{} ({}) {} -> {}",
                self.name, self.protocol, self.remote_address, self.local_address
            )
        } else {
            write!(
                f,
                "{} ({}) {} [not connected]",
                self.name, self.protocol, self.local_address
            )
        }
    }
}
