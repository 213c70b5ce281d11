//! Tunnel data model
//!
//! This crate defines the tunnel descriptor kept by a controller session and the
//! JSON messages exchanged with the agent's local control API.

pub mod api;
pub mod protocol;
pub mod tunnel;

pub use api::{CreateTunnelRequest, CreateTunnelResponse, TunnelInfo, TunnelList, TUNNELS_PATH};
pub use protocol::{Protocol, ProtocolParseError};
pub use tunnel::TunnelDescriptor;
