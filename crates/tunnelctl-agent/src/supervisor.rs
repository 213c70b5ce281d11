//! Agent process lifetime

use crate::{AgentError, AgentOptions};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info};

/// The running agent.
///
/// Owns the child process; only this handle may kill or signal it. Dropping the
/// handle leaves the agent running, so sessions end through
/// [`AgentProcess::terminate`].
#[derive(Debug)]
pub struct AgentProcess {
    child: Child,
    binary: String,
}

impl AgentProcess {
    /// Launch `binary_path start ...` with stdout piped.
    ///
    /// Returns the handle together with the agent's stdout, which is meant for
    /// the readiness scanner.
    pub fn spawn(options: &AgentOptions) -> Result<(Self, ChildStdout), AgentError> {
        let binary = options.binary_path.display().to_string();
        let args = options.start_args();
        info!("Starting agent: {} {}", binary, args.join(" "));

        let mut command = Command::new(&options.binary_path);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(false);

        if options.isolate_signals {
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|e| AgentError::Launch {
            binary: binary.clone(),
            reason: e.to_string(),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| AgentError::Launch {
            binary: binary.clone(),
            reason: "stdout was not captured".to_string(),
        })?;

        debug!("Agent started with pid {:?}", child.id());
        Ok((Self { child, binary }, stdout))
    }

    /// Process id, `None` once the process has been reaped
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn running_pid(&self) -> Result<u32, AgentError> {
        self.child
            .id()
            .ok_or_else(|| AgentError::Process("agent is not running".to_string()))
    }

    /// Kill the agent and reap it
    pub async fn terminate(&mut self) -> Result<(), AgentError> {
        let pid = self.running_pid()?;
        info!("Killing agent {} (pid {})", self.binary, pid);
        self.child
            .kill()
            .await
            .map_err(|e| AgentError::Process(format!("failed to kill agent (pid {}): {}", pid, e)))
    }

    /// Deliver `signal` to the agent
    pub fn signal(&self, signal: Signal) -> Result<(), AgentError> {
        let pid = self.running_pid()?;
        debug!("Sending {} to agent (pid {})", signal, pid);
        signal::kill(Pid::from_raw(pid as i32), signal).map_err(|e| {
            AgentError::Process(format!(
                "failed to send {} to agent (pid {}): {}",
                signal, pid, e
            ))
        })
    }

    /// Wait for the agent to exit on its own
    pub async fn wait(&mut self) -> Result<ExitStatus, AgentError> {
        self.child
            .wait()
            .await
            .map_err(|e| AgentError::Process(e.to_string()))
    }
}
