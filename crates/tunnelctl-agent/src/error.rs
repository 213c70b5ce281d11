use thiserror::Error;

/// Conditions in the agent output that end a session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalCondition {
    #[error("Agent control address already in use")]
    AddressInUse,

    #[error("Account is limited to {limit} simultaneous agent session(s)")]
    SessionLimit { limit: u32 },

    #[error("Agent output closed before the control API was ready")]
    StreamClosed,

    #[error("Failed to read agent output: {0}")]
    Read(String),
}

/// Errors raised while configuring, launching or controlling the agent
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid agent configuration: {0}")]
    Config(String),

    #[error("Failed to launch agent {binary}: {reason}")]
    Launch { binary: String, reason: String },

    #[error("Agent process error: {0}")]
    Process(String),

    #[error("Agent readiness failed: {0}")]
    Readiness(#[from] FatalCondition),
}
