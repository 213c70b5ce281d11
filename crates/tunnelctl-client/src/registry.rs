//! Tunnels registered with a controller session

use crate::ApiClient;
use futures::future::join_all;
use thiserror::Error;
use tracing::{error, info};
use tunnelctl_proto::TunnelDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("need at least 1 tunnel to {0}")]
    NoTunnels(&'static str),
}

/// Per-tunnel outcome of a bulk connect or disconnect.
///
/// Only tunnels that were actually attempted appear here. A failed entry
/// carries the error left after the retry policy was exhausted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    outcomes: Vec<(String, Result<(), String>)>,
}

impl BulkReport {
    pub fn outcomes(&self) -> &[(String, Result<(), String>)] {
        &self.outcomes
    }

    /// Number of tunnels attempted
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_ok())
            .map(|(name, _)| name.as_str())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|(name, outcome)| match outcome {
            Ok(()) => None,
            Err(e) => Some((name.as_str(), e.as_str())),
        })
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| outcome.is_ok())
    }
}

/// Ordered tunnel list owned by one session.
///
/// Names are not checked for uniqueness here; a duplicate is rejected by the
/// agent when it is created.
#[derive(Debug, Default)]
pub struct TunnelRegistry {
    tunnels: Vec<TunnelDescriptor>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tunnel without connecting it
    pub fn add(&mut self, tunnel: TunnelDescriptor) {
        info!("Add tunnel {}", tunnel.name());
        self.tunnels.push(tunnel);
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    pub fn tunnels(&self) -> &[TunnelDescriptor] {
        &self.tunnels
    }

    pub fn iter(&self) -> impl Iterator<Item = &TunnelDescriptor> {
        self.tunnels.iter()
    }

    /// First tunnel registered under `name`
    pub fn get(&self, name: &str) -> Option<&TunnelDescriptor> {
        self.tunnels.iter().find(|t| t.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TunnelDescriptor> {
        self.tunnels.iter_mut().find(|t| t.name() == name)
    }

    /// Create every tunnel that is not created yet, all at once.
    ///
    /// Returns `Ok` once every attempt has finished, whether or not each one
    /// succeeded; the report and the descriptors' `created` flags tell which.
    pub async fn connect_all(&mut self, client: &ApiClient) -> Result<BulkReport, RegistryError> {
        if self.tunnels.is_empty() {
            return Err(RegistryError::NoTunnels("connect"));
        }
        info!("Connecting");

        let pending = self
            .tunnels
            .iter_mut()
            .filter(|t| !t.is_created())
            .map(|tunnel| async move {
                let outcome = client.create(tunnel).await.map_err(|e| {
                    error!("Failed to create tunnel {}: {}", tunnel.name(), e);
                    e.to_string()
                });
                (tunnel.name().to_string(), outcome)
            });

        let outcomes = join_all(pending).await;
        Ok(BulkReport { outcomes })
    }

    /// Destroy every created tunnel, all at once.
    ///
    /// Same contract as [`TunnelRegistry::connect_all`].
    pub async fn disconnect_all(
        &mut self,
        client: &ApiClient,
    ) -> Result<BulkReport, RegistryError> {
        if self.tunnels.is_empty() {
            return Err(RegistryError::NoTunnels("disconnect"));
        }
        info!("Disconnecting");

        let pending = self
            .tunnels
            .iter_mut()
            .filter(|t| t.is_created())
            .map(|tunnel| async move {
                let outcome = client.destroy(tunnel).await.map_err(|e| {
                    error!("Failed to close tunnel {}: {}", tunnel.name(), e);
                    e.to_string()
                });
                (tunnel.name().to_string(), outcome)
            });

        let outcomes = join_all(pending).await;
        Ok(BulkReport { outcomes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnelctl_proto::Protocol;

    #[test]
    fn test_add_keeps_order_and_duplicates() {
        let mut registry = TunnelRegistry::new();
        registry.add(TunnelDescriptor::new("a", Protocol::Http, "8080"));
        registry.add(TunnelDescriptor::new("b", Protocol::Tcp, "22"));
        registry.add(TunnelDescriptor::new("a", Protocol::Tls, "443"));

        let names: Vec<_> = registry.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["a", "b", "a"]);
        assert_eq!(registry.get("a").unwrap().protocol(), Protocol::Http);
    }

    #[tokio::test]
    async fn test_empty_registry_is_rejected() {
        let mut registry = TunnelRegistry::new();
        let client = ApiClient::new("127.0.0.1:4040");

        assert_eq!(
            registry.connect_all(&client).await,
            Err(RegistryError::NoTunnels("connect"))
        );
        assert_eq!(
            registry.disconnect_all(&client).await,
            Err(RegistryError::NoTunnels("disconnect"))
        );
    }

    #[tokio::test]
    async fn test_disconnect_skips_tunnels_never_created() {
        let mut registry = TunnelRegistry::new();
        registry.add(TunnelDescriptor::new("a", Protocol::Http, "8080"));
        let client = ApiClient::new("127.0.0.1:4040");

        let report = registry.disconnect_all(&client).await.unwrap();

        assert!(report.is_empty());
        assert!(report.all_succeeded());
    }

    #[test]
    fn test_report_partitions_outcomes() {
        let report = BulkReport {
            outcomes: vec![
                ("a".to_string(), Ok(())),
                ("b".to_string(), Err("Control API error (500): boom".to_string())),
            ],
        };

        assert_eq!(report.len(), 2);
        assert!(!report.all_succeeded());
        assert_eq!(report.succeeded().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(
            report.failed().collect::<Vec<_>>(),
            vec![("b", "Control API error (500): boom")]
        );
    }
}
