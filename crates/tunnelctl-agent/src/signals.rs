//! Signal handling around an agent session
//!
//! With `isolate_signals` the agent runs in its own process group and no
//! longer sees signals sent to the terminal's foreground group. The controlling
//! program listens for them with a [`SignalSet`] and either ends the session or
//! forwards them.

use futures::future::select_all;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::signal::unix::{signal as listen, Signal as SignalStream, SignalKind};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Signals that normally end a foreground process
pub const TERMINATION_SIGNALS: [Signal; 4] = [
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGQUIT,
];

/// Listeners for a fixed set of signals.
///
/// Handlers are installed by [`SignalSet::new`], so a signal that arrives
/// before the first [`SignalSet::recv`] is still delivered and no longer
/// triggers the default action.
pub struct SignalSet {
    listeners: Vec<(Signal, SignalStream)>,
}

impl SignalSet {
    pub fn new(signals: &[Signal]) -> std::io::Result<Self> {
        let mut listeners = Vec::with_capacity(signals.len());
        for &sig in signals {
            listeners.push((sig, listen(SignalKind::from_raw(sig as i32))?));
        }
        Ok(Self { listeners })
    }

    /// Next signal received by this process.
    ///
    /// `None` for an empty set. Cancel safe.
    pub async fn recv(&mut self) -> Option<Signal> {
        if self.listeners.is_empty() {
            return None;
        }

        let pending = self.listeners.iter_mut().map(|(sig, stream)| {
            let sig = *sig;
            Box::pin(async move { stream.recv().await.map(|()| sig) })
        });
        let (received, _, _) = select_all(pending).await;
        received
    }
}

/// Forward each of `signals` received by this process to `pid`.
///
/// Listeners are installed before this returns. The task runs until the
/// target no longer exists.
pub fn forward_signals(pid: u32, signals: &[Signal]) -> std::io::Result<JoinHandle<()>> {
    let mut set = SignalSet::new(signals)?;

    Ok(tokio::spawn(async move {
        let target = Pid::from_raw(pid as i32);
        while let Some(sig) = set.recv().await {
            info!("Forwarding {} to agent (pid {})", sig, pid);
            match signal::kill(target, sig) {
                Ok(()) => {}
                Err(Errno::ESRCH) => {
                    debug!("Agent (pid {}) is gone, no longer forwarding {}", pid, sig);
                    break;
                }
                Err(e) => warn!("Failed to forward {} to agent: {}", sig, e),
            }
        }
    }))
}
