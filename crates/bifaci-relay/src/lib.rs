//! Relay switch: attaches upstream master relays, verifies their
//! identity, aggregates their capability manifests, and forwards REQs to
//! whichever master serves the requested capability.

mod config;
mod error;
mod relay;

pub use config::RelayConfig;
pub use error::RelayError;
pub use relay::{MasterId, RelaySwitch};
