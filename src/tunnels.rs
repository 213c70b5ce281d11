//! Tunnel declarations for the CLI
//!
//! Tunnels come from a YAML file with a top-level `tunnels:` list, from
//! repeated `--tunnel name=proto:addr` flags, or both.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tunnelctl_client::{Protocol, TunnelDescriptor};

/// Tunnels file format
#[derive(Debug, Default, Deserialize)]
pub struct TunnelsFile {
    #[serde(default)]
    pub tunnels: Vec<TunnelDescriptor>,
}

impl TunnelsFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tunnels file: {:?}", path))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse YAML tunnels file")
    }
}

/// Parse a `name=proto:addr` flag value.
///
/// The address may itself contain colons (`http:127.0.0.1:8080`), only the
/// first one separates the protocol.
pub fn parse_tunnel_flag(value: &str) -> Result<TunnelDescriptor> {
    let (name, rest) = value
        .split_once('=')
        .with_context(|| format!("Invalid tunnel '{}': expected name=proto:addr", value))?;
    let (proto, addr) = rest
        .split_once(':')
        .with_context(|| format!("Invalid tunnel '{}': expected name=proto:addr", value))?;

    if name.is_empty() || addr.is_empty() {
        anyhow::bail!("Invalid tunnel '{}': name and address are required", value);
    }

    let protocol: Protocol = proto
        .parse()
        .with_context(|| format!("Invalid tunnel '{}'", value))?;

    Ok(TunnelDescriptor::new(name, protocol, addr))
}

/// Merge file and flag tunnels, rejecting duplicate names
pub fn collect(file: Option<&Path>, flags: &[String]) -> Result<Vec<TunnelDescriptor>> {
    let mut tunnels = match file {
        Some(path) => TunnelsFile::load(path)?.tunnels,
        None => Vec::new(),
    };
    for flag in flags {
        tunnels.push(parse_tunnel_flag(flag)?);
    }

    let mut names = HashSet::new();
    for tunnel in &tunnels {
        if !names.insert(tunnel.name()) {
            anyhow::bail!("Duplicate tunnel name: {}", tunnel.name());
        }
    }

    Ok(tunnels)
}
