//! Control API client
//!
//! The agent's control API is often not usable for a moment after its port
//! shows up in the log, so create and destroy are retried with a fixed delay.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use tunnelctl_proto::{
    CreateTunnelRequest, CreateTunnelResponse, TunnelDescriptor, TunnelInfo, TunnelList,
    TUNNELS_PATH,
};

/// Timeout for a single control API request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Control API errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Control API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Control API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Invalid control API response: {0}")]
    Decode(String),
}

/// Bounded retry with a fixed delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Pause before each create attempt, and between failed destroy attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 100,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Total attempts, including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Client for one agent's control API
#[derive(Debug, Clone)]
pub struct ApiClient {
    control_address: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    log_api: bool,
}

impl ApiClient {
    /// `control_address` is the `host:port` found in the agent output
    pub fn new(control_address: impl Into<String>) -> Self {
        Self {
            control_address: control_address.into(),
            http: reqwest::Client::new(),
            retry: RetryPolicy::default(),
            log_api: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Log every failed attempt at warn level instead of debug
    pub fn with_logging(mut self, log_api: bool) -> Self {
        self.log_api = log_api;
        self
    }

    pub fn control_address(&self) -> &str {
        &self.control_address
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn tunnels_url(&self) -> String {
        format!("http://{}{}", self.control_address, TUNNELS_PATH)
    }

    /// Create `tunnel` on the agent.
    ///
    /// On success the public URL is stored in the descriptor and it is marked
    /// created. After the last failed attempt the descriptor is left untouched
    /// and the final error is returned.
    pub async fn create(&self, tunnel: &mut TunnelDescriptor) -> Result<(), ApiError> {
        let request = CreateTunnelRequest::from(&*tunnel);
        let request = &request;

        let public_url = self
            .retry("create", tunnel.name(), true, move || self.create_once(request))
            .await?;

        tunnel.mark_created(public_url);
        info!(
            "Tunnel {} is created using {} address",
            tunnel.name(),
            tunnel.remote_address()
        );
        Ok(())
    }

    /// Remove `tunnel` from the agent and clear its public URL
    pub async fn destroy(&self, tunnel: &mut TunnelDescriptor) -> Result<(), ApiError> {
        info!("Closing tunnel {} at {}", tunnel.name(), tunnel.remote_address());
        let name = tunnel.name();

        self.retry("close", name, false, move || self.destroy_once(name))
            .await?;

        tunnel.mark_closed();
        info!("Tunnel {} successfully closed", tunnel.name());
        Ok(())
    }

    /// Tunnels the agent currently serves (single attempt)
    pub async fn list(&self) -> Result<Vec<TunnelInfo>, ApiError> {
        let response = self
            .http
            .get(self.tunnels_url())
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let list: TunnelList = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(list.tunnels)
    }

    async fn create_once(&self, request: &CreateTunnelRequest) -> Result<String, ApiError> {
        let response = self
            .http
            .post(self.tunnels_url())
            .json(request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let created: CreateTunnelResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        if created.public_url.is_empty() {
            return Err(ApiError::Decode("response has no public_url".to_string()));
        }
        Ok(created.public_url)
    }

    async fn destroy_once(&self, name: &str) -> Result<(), ApiError> {
        let url = format!("{}/{}", self.tunnels_url(), name);
        let response = self
            .http
            .delete(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Run `attempt` until it succeeds or the policy is exhausted
    async fn retry<T, F, Fut>(
        &self,
        action: &str,
        name: &str,
        delay_first: bool,
        mut attempt: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let max_attempts = self.retry.max_attempts();
        let mut current = 1;

        loop {
            if delay_first || current > 1 {
                tokio::time::sleep(self.retry.delay).await;
            }

            debug!(
                "{} tunnel {}: attempt {}/{}",
                action, name, current, max_attempts
            );

            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if self.log_api {
                        warn!("Failed to {} tunnel {}: {}", action, name, e);
                    } else {
                        debug!("Failed to {} tunnel {}: {}", action, name, e);
                    }

                    if current >= max_attempts {
                        return Err(e);
                    }
                }
            }

            current += 1;
        }
    }
}
