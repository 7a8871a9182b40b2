//! Capability-to-plugin index.
//!
//! Mirrors the session/room index pattern used for connection bookkeeping:
//! a plain `HashMap`-backed lookup table, updated as plugins register and
//! die, with no locking of its own (the owning [`crate::host::PluginHost`]
//! guards it).

use std::collections::HashMap;

use bifaci_core::CapabilityMatcher;

use crate::host::PluginId;

/// Tracks which plugin offers which capability URNs.
///
/// When two plugins both offer a capability a matcher accepts, the most
/// specific offered URN wins; ties go to whichever plugin registered
/// first.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    offers: HashMap<PluginId, Vec<String>>,
}

impl PluginRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self { offers: HashMap::new() }
    }

    /// Record the capabilities `plugin` offers, from its handshake
    /// manifest.
    pub fn register(&mut self, plugin: PluginId, manifest: Vec<String>) {
        self.offers.insert(plugin, manifest);
    }

    /// Drop a plugin and its offered capabilities, e.g. once it has died.
    pub fn remove(&mut self, plugin: PluginId) {
        self.offers.remove(&plugin);
    }

    /// Find the best plugin to serve `requested`, if any is registered.
    pub fn resolve(
        &self,
        requested: &str,
        matcher: &dyn CapabilityMatcher,
    ) -> Option<PluginId> {
        let mut best: Option<(PluginId, usize)> = None;
        // HashMap iteration order isn't insertion order; iterate plugin ids
        // ascending so "first registered wins" ties are deterministic.
        let mut ids: Vec<&PluginId> = self.offers.keys().collect();
        ids.sort_unstable();
        for &id in ids {
            let offered = &self.offers[&id];
            for cap in offered {
                if matcher.accepts(cap, requested) {
                    let specificity = matcher.specificity(cap);
                    match best {
                        Some((_, best_specificity)) if best_specificity >= specificity => {},
                        _ => best = Some((id, specificity)),
                    }
                }
            }
        }
        best.map(|(id, _)| id)
    }

    /// All capabilities currently offered by any live plugin.
    pub fn all_capabilities(&self) -> Vec<String> {
        let mut caps: Vec<String> = self.offers.values().flatten().cloned().collect();
        caps.sort_unstable();
        caps.dedup();
        caps
    }
}
