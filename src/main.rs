//! tunnelctl - drive a local tunnel agent from the command line
//!
//! Launches the agent binary, waits for its control API and opens or closes
//! tunnels through it.

mod tunnels;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tunnelctl_agent::{provision_auth_token, Signal, SignalSet, TERMINATION_SIGNALS};
use tunnelctl_client::{AgentOptions, BulkReport, ControllerError, RetryPolicy, TunnelController};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// tunnelctl - Expose local services through a tunnel agent
#[derive(Parser, Debug)]
#[command(name = "tunnelctl")]
#[command(about = "tunnelctl - Expose local services through a tunnel agent")]
#[command(version = VERSION)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store an auth token in the agent's configuration file
    #[command(long_about = r#"
Run `<binary> authtoken <token>` so that later agent sessions are
authenticated.

EXAMPLES:
  tunnelctl authtoken --binary /usr/local/bin/ngrok --authtoken $TOKEN

ENVIRONMENT VARIABLES:
  TUNNELCTL_BINARY     Path to the agent binary
  TUNNELCTL_AUTHTOKEN  Auth token
  TUNNELCTL_CONFIG     Agent configuration file
    "#)]
    Authtoken {
        /// Path to the agent binary
        #[arg(long, env = "TUNNELCTL_BINARY")]
        binary: PathBuf,

        /// Auth token to store
        #[arg(long, env = "TUNNELCTL_AUTHTOKEN")]
        authtoken: String,

        /// Agent configuration file
        #[arg(long, env = "TUNNELCTL_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Launch the agent and keep tunnels open until Ctrl+C
    #[command(long_about = r#"
Launch the agent, wait until its control API is listening, then create
every declared tunnel. Tunnels are closed and the agent is stopped on
Ctrl+C.

EXAMPLES:
  # Expose a local web server and SSH
  tunnelctl start --binary ./ngrok \
    --tunnel web=http:8080 \
    --tunnel ssh=tcp:22

  # Tunnels from a file, agent in its own process group
  tunnelctl start --binary ./ngrok --tunnels tunnels.yml --isolate-signals

TUNNELS FILE:
  tunnels:
    - name: web
      proto: http
      addr: "8080"
      inspect: true
      auth: "user:secret"

ENVIRONMENT VARIABLES:
  TUNNELCTL_BINARY     Path to the agent binary
  TUNNELCTL_AUTHTOKEN  Auth token provisioned before launch
  TUNNELCTL_REGION     Agent region (default: us)
  TUNNELCTL_SUBDOMAIN  Requested subdomain
  TUNNELCTL_CONFIG     Agent configuration file
  TUNNELCTL_TUNNELS    Tunnels file
    "#)]
    Start {
        /// Path to the agent binary
        #[arg(long, env = "TUNNELCTL_BINARY")]
        binary: PathBuf,

        /// Auth token provisioned before launch
        #[arg(long, env = "TUNNELCTL_AUTHTOKEN")]
        authtoken: Option<String>,

        /// Agent region
        #[arg(long, env = "TUNNELCTL_REGION", default_value = "us")]
        region: String,

        /// Requested subdomain
        #[arg(long, env = "TUNNELCTL_SUBDOMAIN")]
        subdomain: Option<String>,

        /// Agent configuration file
        #[arg(long, env = "TUNNELCTL_CONFIG")]
        config: Option<PathBuf>,

        /// Echo the agent's output
        #[arg(long)]
        log_agent_output: bool,

        /// Run the agent in its own process group
        #[arg(long)]
        isolate_signals: bool,

        #[command(flatten)]
        tunnels: TunnelArgs,

        #[command(flatten)]
        retry: RetryArgs,
    },

    /// Open tunnels through an agent that is already running
    #[command(long_about = r#"
Create tunnels through the control API of an agent started elsewhere.
Tunnels are closed on Ctrl+C; the agent keeps running.

EXAMPLES:
  tunnelctl attach --addr 127.0.0.1:4040 --tunnel web=http:8080
    "#)]
    Attach {
        /// Control API address of the running agent
        #[arg(long, env = "TUNNELCTL_ADDR", default_value = "127.0.0.1:4040")]
        addr: String,

        #[command(flatten)]
        tunnels: TunnelArgs,

        #[command(flatten)]
        retry: RetryArgs,
    },

    /// List the tunnels a running agent reports
    List {
        /// Control API address of the running agent
        #[arg(long, env = "TUNNELCTL_ADDR", default_value = "127.0.0.1:4040")]
        addr: String,
    },
}

#[derive(Args, Debug)]
struct TunnelArgs {
    /// Tunnels file (YAML with a `tunnels:` list)
    #[arg(long = "tunnels", env = "TUNNELCTL_TUNNELS")]
    file: Option<PathBuf>,

    /// Tunnel as name=proto:addr (repeatable)
    #[arg(long = "tunnel")]
    tunnel: Vec<String>,
}

#[derive(Args, Debug)]
struct RetryArgs {
    /// Retries per control API request
    #[arg(long, default_value = "100")]
    retries: u32,

    /// Delay between control API attempts in milliseconds
    #[arg(long, default_value = "1000")]
    retry_delay_ms: u64,

    /// Log control API requests and responses
    #[arg(long)]
    log_api: bool,
}

impl RetryArgs {
    fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_millis(self.retry_delay_ms))
    }
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn print_report(action: &str, report: &BulkReport) {
    for (name, outcome) in report.outcomes() {
        match outcome {
            Ok(()) => info!("{} {}: ok", action, name),
            Err(e) => error!("{} {}: {}", action, name, e),
        }
    }
}

fn print_tunnels(controller: &TunnelController) {
    for tunnel in controller.tunnels().iter().filter(|t| t.is_created()) {
        println!(
            "{:<16} {} -> {}",
            tunnel.name(),
            tunnel.remote_address(),
            tunnel.local_address()
        );
    }
}

async fn open_tunnels(controller: &mut TunnelController, args: &TunnelArgs) -> Result<()> {
    for tunnel in tunnels::collect(args.file.as_deref(), &args.tunnel)? {
        controller.add_tunnel(tunnel);
    }

    let report = controller
        .connect_all()
        .await
        .context("Failed to open tunnels")?;
    print_report("open", &report);
    print_tunnels(controller);

    if report.succeeded().next().is_none() {
        anyhow::bail!("No tunnel could be opened");
    }
    Ok(())
}

async fn close_tunnels(controller: &mut TunnelController) {
    match controller.disconnect_all().await {
        Ok(report) => print_report("close", &report),
        Err(e) => error!("Failed to close tunnels: {}", e),
    }
}

async fn stop_agent(controller: &mut TunnelController) {
    if let Err(e) = controller.close().await {
        warn!("Failed to stop agent: {}", e);
    }
}

/// Run `step` unless a termination signal arrives first
async fn unless_signalled<T>(signals: &mut SignalSet, step: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        output = step => Some(output),
        received = signals.recv() => {
            if let Some(sig) = received {
                info!("Received {}, shutting down...", sig);
            }
            None
        }
    }
}

enum SessionEvent {
    Signal(Option<Signal>),
    AgentEnded(Result<ExitStatus, ControllerError>),
}

async fn run_start(options: AgentOptions, tunnels: TunnelArgs, retry: RetryArgs) -> Result<()> {
    let isolated = options.isolate_signals;

    // Installed before the agent exists: from here on no termination signal
    // can end tunnelctl while it still owns the agent
    let mut signals =
        SignalSet::new(&TERMINATION_SIGNALS).context("Failed to install signal handlers")?;

    let mut controller = TunnelController::new(options)
        .await
        .context("Failed to create controller session")?
        .with_retry_policy(retry.policy())
        .with_api_logging(retry.log_api);

    let Some(started) = unless_signalled(&mut signals, controller.start()).await else {
        stop_agent(&mut controller).await;
        return Ok(());
    };
    let address = started.context("Agent failed to start")?;
    info!("Agent control API: {}", address);

    match unless_signalled(&mut signals, open_tunnels(&mut controller, &tunnels)).await {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            stop_agent(&mut controller).await;
            return Err(e);
        }
        None => {
            stop_agent(&mut controller).await;
            return Ok(());
        }
    }

    loop {
        let event = tokio::select! {
            received = signals.recv() => SessionEvent::Signal(received),
            ended = controller.wait_agent_exit() => SessionEvent::AgentEnded(ended),
        };

        match event {
            SessionEvent::Signal(Some(sig)) if isolated && sig != Signal::SIGINT => {
                // The agent's own process group never sees this one
                match controller.signal(sig) {
                    Ok(()) => info!("Forwarded {} to agent", sig),
                    Err(e) => warn!("Failed to forward {} to agent: {}", sig, e),
                }
            }
            SessionEvent::Signal(received) => {
                if let Some(sig) = received {
                    info!("Received {}, shutting down...", sig);
                }
                // Without isolation the agent may already be exiting, and
                // killing it takes its tunnels down anyway
                if isolated {
                    close_tunnels(&mut controller).await;
                }
                stop_agent(&mut controller).await;
                break;
            }
            SessionEvent::AgentEnded(Ok(status)) => {
                warn!("Agent stopped unexpectedly ({})", status);
                break;
            }
            SessionEvent::AgentEnded(Err(e)) => {
                error!("Agent session ended: {}", e);
                return Err(e.into());
            }
        }
    }

    info!("tunnelctl stopped");
    Ok(())
}

async fn run_attach(addr: String, tunnels: TunnelArgs, retry: RetryArgs) -> Result<()> {
    let mut controller = TunnelController::attach(addr)
        .with_retry_policy(retry.policy())
        .with_api_logging(retry.log_api);

    open_tunnels(&mut controller, &tunnels).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, closing tunnels...");
    close_tunnels(&mut controller).await;
    Ok(())
}

async fn run_list(addr: String) -> Result<()> {
    let controller = TunnelController::attach(addr);
    let tunnels = controller
        .list_remote()
        .await
        .context("Failed to list tunnels")?;

    if tunnels.is_empty() {
        println!("No tunnels");
    }
    for tunnel in tunnels {
        println!("{:<16} {:<6} {}", tunnel.name, tunnel.proto, tunnel.public_url);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Authtoken {
            binary,
            authtoken,
            config,
        } => {
            let mut builder = AgentOptions::builder()
                .binary_path(binary)
                .auth_token(authtoken);
            if let Some(config) = config {
                builder = builder.config_path(config);
            }
            let options = builder.build()?;

            provision_auth_token(&options)
                .await
                .context("Failed to store auth token")?;
            info!("Auth token saved");
            Ok(())
        }
        Commands::Start {
            binary,
            authtoken,
            region,
            subdomain,
            config,
            log_agent_output,
            isolate_signals,
            tunnels,
            retry,
        } => {
            let mut builder = AgentOptions::builder()
                .binary_path(binary)
                .region(region)
                .log_output(log_agent_output)
                .log_api(retry.log_api)
                .isolate_signals(isolate_signals);
            if let Some(token) = authtoken {
                builder = builder.auth_token(token);
            }
            if let Some(subdomain) = subdomain {
                builder = builder.subdomain(subdomain);
            }
            if let Some(config) = config {
                builder = builder.config_path(config);
            }

            run_start(builder.build()?, tunnels, retry).await
        }
        Commands::Attach {
            addr,
            tunnels,
            retry,
        } => run_attach(addr, tunnels, retry).await,
        Commands::List { addr } => run_list(addr).await,
    }
}
