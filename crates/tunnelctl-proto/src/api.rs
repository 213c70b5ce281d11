//! Control API messages
//!
//! The agent serves these under `http://{control_address}/api/tunnels`.

use crate::TunnelDescriptor;
use serde::{Deserialize, Serialize};

/// Path of the tunnels collection on the control API
pub const TUNNELS_PATH: &str = "/api/tunnels";

/// Body of `POST /api/tunnels`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTunnelRequest {
    pub addr: String,
    pub proto: String,
    pub name: String,
    pub inspect: bool,
    pub auth: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_tls: Option<bool>,
}

impl From<&TunnelDescriptor> for CreateTunnelRequest {
    fn from(tunnel: &TunnelDescriptor) -> Self {
        let protocol = tunnel.protocol();
        Self {
            addr: tunnel.local_address().to_string(),
            proto: protocol.to_string(),
            name: tunnel.name().to_string(),
            inspect: tunnel.inspect(),
            auth: tunnel.auth().unwrap_or_default().to_string(),
            bind_tls: protocol.binds_tls().then_some(true),
        }
    }
}

/// Successful response to `POST /api/tunnels`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTunnelResponse {
    pub public_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,
}

/// One entry of `GET /api/tunnels`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelInfo {
    pub name: String,
    pub public_url: String,
    #[serde(default)]
    pub proto: String,
}

/// Response to `GET /api/tunnels`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelList {
    #[serde(default)]
    pub tunnels: Vec<TunnelInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Protocol;
    use serde_json::json;

    #[test]
    fn test_http_request_forces_bind_tls() {
        let tunnel = TunnelDescriptor::new("a", Protocol::Http, "127.0.0.1:4040")
            .with_auth("user:pass")
            .with_inspect(true);

        let body = serde_json::to_value(CreateTunnelRequest::from(&tunnel)).unwrap();

        assert_eq!(
            body,
            json!({
                "addr": "127.0.0.1:4040",
                "proto": "http",
                "name": "a",
                "inspect": true,
                "auth": "user:pass",
                "bind_tls": true,
            })
        );
    }

    #[test]
    fn test_tcp_request_omits_bind_tls() {
        let tunnel = TunnelDescriptor::new("b", Protocol::Tcp, "127.0.0.1:22");

        let body = serde_json::to_value(CreateTunnelRequest::from(&tunnel)).unwrap();

        assert_eq!(body["proto"], "tcp");
        assert_eq!(body["auth"], "");
        assert_eq!(body["inspect"], false);
        assert!(body.get("bind_tls").is_none());
    }

    #[test]
    fn test_create_response_tolerates_extra_fields() {
        let raw = r#"{"name":"a","uri":"/api/tunnels/a","public_url":"https://a.example.io","proto":"https","config":{"addr":"localhost:4040","inspect":true}}"#;
        let response: CreateTunnelResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.public_url, "https://a.example.io");
        assert_eq!(response.name.as_deref(), Some("a"));
    }
}
