//! Agent launch options

use crate::AgentError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Region used when none is configured
pub const DEFAULT_REGION: &str = "us";

/// Options used to launch and talk to the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOptions {
    /// Agent executable
    pub binary_path: PathBuf,
    /// Region the agent tunnels through
    #[serde(default = "default_region")]
    pub region: String,
    /// Reserved subdomain (paid plans only)
    #[serde(default)]
    pub subdomain: Option<String>,
    /// Agent config file, where the token and web port live
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    /// Token provisioned with `authtoken` before the session starts
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Log every chunk the agent writes to stdout
    #[serde(default)]
    pub log_output: bool,
    /// Log failed control API attempts
    #[serde(default)]
    pub log_api: bool,
    /// Start the agent in its own process group
    #[serde(default)]
    pub isolate_signals: bool,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::new(),
            region: default_region(),
            subdomain: None,
            config_path: None,
            auth_token: None,
            log_output: false,
            log_api: false,
            isolate_signals: false,
        }
    }
}

impl AgentOptions {
    pub fn builder() -> AgentOptionsBuilder {
        AgentOptionsBuilder::default()
    }

    /// Check required fields and fill in defaults
    pub fn validate(mut self) -> Result<Self, AgentError> {
        if self.binary_path.as_os_str().is_empty() {
            return Err(AgentError::Config("binary path is required".to_string()));
        }
        if self.region.trim().is_empty() {
            self.region = default_region();
        }
        Ok(self)
    }

    /// Arguments for `start`, which runs the agent with no tunnels and logs to stdout
    pub fn start_args(&self) -> Vec<String> {
        let mut args = vec![
            "start".to_string(),
            "--none".to_string(),
            "--log=stdout".to_string(),
            format!("--region={}", self.region),
        ];

        if let Some(config) = &self.config_path {
            args.push(format!("--config={}", config.display()));
        }

        if let Some(subdomain) = self.subdomain.as_deref().filter(|s| !s.is_empty()) {
            args.push(format!("-subdomain={}", subdomain));
        }

        args
    }

    /// Arguments for `authtoken`, or `None` when no token is configured
    pub fn authtoken_args(&self) -> Option<Vec<String>> {
        let token = self.auth_token.as_deref().filter(|t| !t.is_empty())?;
        let mut args = vec!["authtoken".to_string(), token.to_string()];

        if let Some(config) = &self.config_path {
            args.push(format!("--config={}", config.display()));
        }

        Some(args)
    }
}

/// Builder for AgentOptions
#[derive(Default)]
pub struct AgentOptionsBuilder {
    options: AgentOptions,
}

impl AgentOptionsBuilder {
    pub fn binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.binary_path = path.into();
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.options.region = region.into();
        self
    }

    pub fn subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.options.subdomain = Some(subdomain.into());
        self
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.options.auth_token = Some(token.into());
        self
    }

    pub fn log_output(mut self, enabled: bool) -> Self {
        self.options.log_output = enabled;
        self
    }

    pub fn log_api(mut self, enabled: bool) -> Self {
        self.options.log_api = enabled;
        self
    }

    pub fn isolate_signals(mut self, enabled: bool) -> Self {
        self.options.isolate_signals = enabled;
        self
    }

    pub fn build(self) -> Result<AgentOptions, AgentError> {
        self.options.validate()
    }
}
