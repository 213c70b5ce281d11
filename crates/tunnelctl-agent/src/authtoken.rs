//! Auth-token provisioning
//!
//! Runs `authtoken <token>` once so the agent stores the token in its config
//! file before a session is started.

use crate::{AgentError, AgentOptions};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

pub async fn provision_auth_token(options: &AgentOptions) -> Result<(), AgentError> {
    if options.binary_path.as_os_str().is_empty() {
        return Err(AgentError::Config("binary path is required".to_string()));
    }

    let args = options
        .authtoken_args()
        .ok_or_else(|| AgentError::Config("auth token is missing".to_string()))?;

    let binary = options.binary_path.display().to_string();
    info!("Provisioning auth token with {}", binary);

    let mut command = Command::new(&options.binary_path);
    command.args(&args).stdin(Stdio::null());
    if options.isolate_signals {
        command.process_group(0);
    }

    let output = command.output().await.map_err(|e| AgentError::Launch {
        binary: binary.clone(),
        reason: e.to_string(),
    })?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        return Err(AgentError::Launch {
            binary,
            reason: format!("authtoken exited with {}: {}", output.status, stderr.trim()),
        });
    }

    if !stderr.trim().is_empty() {
        warn!("authtoken: {}", stderr.trim());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        info!("{}", stdout.trim());
    }

    Ok(())
}
