//! Engine-side plugin host: spawns subprocess plugins, verifies their
//! handshake, and routes capability requests to them.
//!
//! For engine processes that want to call capabilities implemented
//! in-process (no subprocess, no serialization) rather than routing to an
//! external plugin, see [`InProcessPluginHost`].

mod config;
mod error;
mod host;
mod in_process;
mod registry;

pub use config::HostConfig;
pub use error::HostError;
pub use host::{PluginHost, PluginId};
pub use in_process::{new_with_identity, InProcessHandler, InProcessPluginHost};
