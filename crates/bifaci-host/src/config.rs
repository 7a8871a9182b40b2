//! Local, non-negotiated configuration for a [`crate::PluginHost`].

use bifaci_proto::Limits;

/// Settings a `PluginHost` owns outright rather than negotiating with a
/// peer: the limits it offers during the plugin handshake. The
/// capability matcher is a separate, compile-time choice (the `M` type
/// parameter on [`crate::PluginHost`]) rather than a field here, since it
/// has no runtime-varying state of its own.
#[derive(Debug, Clone, Copy)]
pub struct HostConfig {
    /// Limits offered as this host's side of the HELLO handshake.
    pub limits: Limits,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self { limits: Limits::default() }
    }
}

impl HostConfig {
    /// Build a config that offers `limits` during handshake.
    #[must_use]
    pub const fn new(limits: Limits) -> Self {
        Self { limits }
    }
}

impl From<Limits> for HostConfig {
    fn from(limits: Limits) -> Self {
        Self::new(limits)
    }
}
