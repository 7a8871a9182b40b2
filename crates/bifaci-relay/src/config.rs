//! Local, non-negotiated configuration for a [`crate::RelaySwitch`].

use bifaci_proto::Limits;

/// Settings a `RelaySwitch` owns outright rather than negotiating with a
/// master: the limits it starts from before any master has attached. Like
/// [`bifaci_host::HostConfig`], the capability matcher is a compile-time
/// choice (the `M` type parameter on [`crate::RelaySwitch`]), not a field
/// here.
#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    /// Limits this switch starts negotiation from before any master
    /// attaches.
    pub limits: Limits,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { limits: Limits::default() }
    }
}

impl RelayConfig {
    /// Build a config starting from `limits`.
    #[must_use]
    pub const fn new(limits: Limits) -> Self {
        Self { limits }
    }
}

impl From<Limits> for RelayConfig {
    fn from(limits: Limits) -> Self {
        Self::new(limits)
    }
}
