//! Agent process supervision
//!
//! Launches the external tunneling agent, watches its log output for the point
//! where its control API is listening, and offers kill/signal primitives for the
//! running process.

pub mod authtoken;
pub mod config;
pub mod error;
pub mod readiness;
pub mod signals;
pub mod supervisor;

pub use authtoken::provision_auth_token;
pub use config::{AgentOptions, AgentOptionsBuilder, DEFAULT_REGION};
pub use error::{AgentError, FatalCondition};
pub use readiness::{spawn_scanner, OutputScanner, ReadinessWatch, ScanEvent, CHUNK_SIZE};
pub use signals::{forward_signals, SignalSet, TERMINATION_SIGNALS};
pub use supervisor::AgentProcess;

pub use nix::sys::signal::Signal;
