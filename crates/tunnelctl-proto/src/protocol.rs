//! Tunnel protocols understood by the agent

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol a tunnel exposes on the public side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// HTTP tunnel, always bound with TLS on the public side
    Http,
    /// Raw TCP forwarding
    Tcp,
    /// TLS passthrough
    Tls,
}

/// Returned when a protocol name is not recognised
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown tunnel protocol: {0}")]
pub struct ProtocolParseError(pub String);

impl Protocol {
    /// Name used on the wire by the control API
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Tcp => "tcp",
            Protocol::Tls => "tls",
        }
    }

    /// HTTP tunnels are created with `bind_tls` forced on
    pub fn binds_tls(&self) -> bool {
        matches!(self, Protocol::Http)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = ProtocolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "tcp" => Ok(Protocol::Tcp),
            "tls" => Ok(Protocol::Tls),
            _ => Err(ProtocolParseError(s.to_string())),
        }
    }
}
