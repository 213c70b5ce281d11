//! Controller session
//!
//! A [`TunnelController`] owns everything one agent session needs: the launch
//! options, the running agent process, the control address discovered from
//! its output, and the registered tunnels. Construction provisions the auth
//! token, [`TunnelController::start`] launches the agent and waits for it, and
//! [`TunnelController::close`] kills it.

use crate::{ApiClient, ApiError, BulkReport, RegistryError, RetryPolicy, TunnelRegistry};
use std::process::ExitStatus;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tunnelctl_agent::{
    provision_auth_token, spawn_scanner, AgentError, AgentOptions, AgentProcess, FatalCondition,
    Signal,
};
use tunnelctl_proto::{TunnelDescriptor, TunnelInfo};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Agent control API is not ready, start the agent first")]
    NotReady,

    #[error("Agent session already started")]
    AlreadyStarted,

    #[error("No tunnel named '{0}'")]
    UnknownTunnel(String),
}

/// How an agent session ended without being closed
enum AgentEvent {
    Exited(Result<ExitStatus, AgentError>),
    OutputEnded(Result<(), FatalCondition>),
}

fn agent_not_running() -> AgentError {
    AgentError::Process("agent is not running".to_string())
}

pub struct TunnelController {
    /// `None` for sessions attached to an agent started elsewhere
    options: Option<AgentOptions>,
    control_address: Option<String>,
    process: Option<AgentProcess>,
    output_task: Option<JoinHandle<Result<(), FatalCondition>>>,
    registry: TunnelRegistry,
    retry: RetryPolicy,
    log_api: bool,
}

impl TunnelController {
    /// Validate `options` and provision the auth token if one is set
    pub async fn new(options: AgentOptions) -> Result<Self, ControllerError> {
        info!("Creating controller session");
        let options = options.validate()?;

        if options.authtoken_args().is_some() {
            provision_auth_token(&options).await?;
        }

        Ok(Self {
            log_api: options.log_api,
            options: Some(options),
            control_address: None,
            process: None,
            output_task: None,
            registry: TunnelRegistry::new(),
            retry: RetryPolicy::default(),
        })
    }

    /// Session for an agent that is already running and serving its control
    /// API on `control_address`
    pub fn attach(control_address: impl Into<String>) -> Self {
        Self {
            options: None,
            control_address: Some(control_address.into()),
            process: None,
            output_task: None,
            registry: TunnelRegistry::new(),
            retry: RetryPolicy::default(),
            log_api: false,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_api_logging(mut self, log_api: bool) -> Self {
        self.log_api = log_api;
        self
    }

    /// Launch the agent and wait until its control API is listening.
    ///
    /// Returns the control address. If the agent reports a fatal condition or
    /// its output ends first, the agent is killed and the condition returned.
    /// The agent is owned by the session as soon as it is spawned, so if this
    /// future is dropped early [`TunnelController::close`] still kills it.
    pub async fn start(&mut self) -> Result<String, ControllerError> {
        if self.control_address.is_some() || self.process.is_some() {
            return Err(ControllerError::AlreadyStarted);
        }
        let options = self
            .options
            .as_ref()
            .ok_or(ControllerError::AlreadyStarted)?;

        info!("Launching agent");
        let (process, stdout) = AgentProcess::spawn(options)?;
        let mut watch = spawn_scanner(stdout, options.log_output);
        self.process = Some(process);

        match watch.wait().await {
            Ok(address) => {
                info!("Agent session ready at {}", address);
                self.control_address = Some(address.clone());
                self.output_task = Some(watch.into_task());
                Ok(address)
            }
            Err(condition) => {
                self.kill_agent(&condition).await;
                Err(AgentError::Readiness(condition).into())
            }
        }
    }

    async fn kill_agent(&mut self, condition: &FatalCondition) {
        self.output_task = None;
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.terminate().await {
                warn!("Failed to stop agent after {}: {}", condition, e);
            }
        }
    }

    pub fn control_address(&self) -> Option<&str> {
        self.control_address.as_deref()
    }

    /// Agent process id while this session owns a running agent
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.pid())
    }

    pub fn add_tunnel(&mut self, tunnel: TunnelDescriptor) {
        self.registry.add(tunnel);
    }

    pub fn tunnels(&self) -> &[TunnelDescriptor] {
        self.registry.tunnels()
    }

    pub fn tunnel(&self, name: &str) -> Option<&TunnelDescriptor> {
        self.registry.get(name)
    }

    fn api_client(&self) -> Result<ApiClient, ControllerError> {
        let address = self
            .control_address
            .as_deref()
            .ok_or(ControllerError::NotReady)?;
        Ok(ApiClient::new(address)
            .with_retry(self.retry)
            .with_logging(self.log_api))
    }

    /// Connect every registered tunnel that is not connected yet
    pub async fn connect_all(&mut self) -> Result<BulkReport, ControllerError> {
        if self.registry.is_empty() {
            return Err(RegistryError::NoTunnels("connect").into());
        }
        let client = self.api_client()?;
        Ok(self.registry.connect_all(&client).await?)
    }

    /// Disconnect every connected tunnel
    pub async fn disconnect_all(&mut self) -> Result<BulkReport, ControllerError> {
        if self.registry.is_empty() {
            return Err(RegistryError::NoTunnels("disconnect").into());
        }
        let client = self.api_client()?;
        Ok(self.registry.disconnect_all(&client).await?)
    }

    /// Create the registered tunnel called `name`
    pub async fn create_tunnel(&mut self, name: &str) -> Result<(), ControllerError> {
        let client = self.api_client()?;
        let tunnel = self
            .registry
            .get_mut(name)
            .ok_or_else(|| ControllerError::UnknownTunnel(name.to_string()))?;
        Ok(client.create(tunnel).await?)
    }

    /// Destroy the registered tunnel called `name`
    pub async fn close_tunnel(&mut self, name: &str) -> Result<(), ControllerError> {
        let client = self.api_client()?;
        let tunnel = self
            .registry
            .get_mut(name)
            .ok_or_else(|| ControllerError::UnknownTunnel(name.to_string()))?;
        Ok(client.destroy(tunnel).await?)
    }

    /// Tunnels the agent reports, including ones this session did not create
    pub async fn list_remote(&self) -> Result<Vec<TunnelInfo>, ControllerError> {
        Ok(self.api_client()?.list().await?)
    }

    /// Forward `signal` to the agent
    pub fn signal(&self, signal: Signal) -> Result<(), ControllerError> {
        let process = self.process.as_ref().ok_or_else(agent_not_running)?;
        Ok(process.signal(signal)?)
    }

    /// Wait until the agent session ends by itself.
    ///
    /// Returns the exit status if the agent exits. If its output reports a
    /// fatal condition first, the agent is killed and the condition returned.
    /// Either way the session no longer owns an agent afterwards. Cancel safe.
    pub async fn wait_agent_exit(&mut self) -> Result<ExitStatus, ControllerError> {
        let process = self.process.as_mut().ok_or_else(agent_not_running)?;

        let event = match self.output_task.as_mut() {
            Some(task) => tokio::select! {
                status = process.wait() => AgentEvent::Exited(status),
                joined = task => AgentEvent::OutputEnded(
                    joined.unwrap_or_else(|e| Err(FatalCondition::Read(e.to_string()))),
                ),
            },
            None => AgentEvent::Exited(process.wait().await),
        };

        let status = match event {
            AgentEvent::Exited(status) => status,
            AgentEvent::OutputEnded(Ok(())) => {
                self.output_task = None;
                let process = self.process.as_mut().ok_or_else(agent_not_running)?;
                process.wait().await
            }
            AgentEvent::OutputEnded(Err(condition)) => {
                error!("Ending agent session: {}", condition);
                self.kill_agent(&condition).await;
                return Err(AgentError::Readiness(condition).into());
            }
        }?;
        warn!("Agent exited with {}", status);

        self.process = None;
        self.output_task = None;
        Ok(status)
    }

    /// Kill the agent owned by this session
    pub async fn close(&mut self) -> Result<(), ControllerError> {
        let mut process = self.process.take().ok_or_else(agent_not_running)?;
        process.terminate().await?;

        // The output task ends by itself once the agent's stdout closes
        self.output_task.take();
        Ok(())
    }
}
