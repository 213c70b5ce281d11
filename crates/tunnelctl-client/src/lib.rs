//! Tunnel lifecycle client
//!
//! Drives tunnel creation and teardown against the agent's control API and
//! ties the agent process, its readiness and the registered tunnels together in
//! a [`TunnelController`] session.
//!
//! ```ignore
//! use tunnelctl_client::{AgentOptions, Protocol, TunnelController, TunnelDescriptor};
//!
//! let options = AgentOptions::builder()
//!     .binary_path("/usr/local/bin/ngrok")
//!     .region("eu")
//!     .build()?;
//!
//! let mut controller = TunnelController::new(options).await?;
//! controller.start().await?;
//! controller.add_tunnel(TunnelDescriptor::new("web", Protocol::Http, "8080"));
//! controller.connect_all().await?;
//!
//! for tunnel in controller.tunnels() {
//!     println!("{}", tunnel);
//! }
//!
//! controller.disconnect_all().await?;
//! controller.close().await?;
//! ```

pub mod api;
pub mod controller;
pub mod registry;

pub use api::{ApiClient, ApiError, RetryPolicy};
pub use controller::{ControllerError, TunnelController};
pub use registry::{BulkReport, RegistryError, TunnelRegistry};

pub use tunnelctl_agent::{AgentError, AgentOptions, FatalCondition, Signal};
pub use tunnelctl_proto::{Protocol, TunnelDescriptor, TunnelInfo};
