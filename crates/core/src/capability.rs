use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TOOLS: &str = "tools";
pub const RESOURCES: &str = "resources";
pub const BATCH: &str = "batch";
pub const STREAMING: &str = "streaming";
pub const SUBSCRIPTIONS: &str = "subscriptions";
pub const COMPRESSION: &str = "compression";
pub const RANGE_REQUESTS: &str = "range_requests";

/// Feature flags a server declares during negotiation.
///
/// Unknown flags are carried through untouched; a flag that is absent reads as
/// unsupported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeMap<String, bool>);

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything this workspace knows how to serve
    pub fn full() -> Self {
        [
            TOOLS,
            RESOURCES,
            BATCH,
            STREAMING,
            SUBSCRIPTIONS,
            COMPRESSION,
            RANGE_REQUESTS,
        ]
        .into_iter()
        .fold(Self::new(), |caps, name| caps.with(name))
    }

    pub fn with(mut self, name: impl Into<String>) -> Self {
        self.0.insert(name.into(), true);
        self
    }

    pub fn without(mut self, name: impl Into<String>) -> Self {
        self.0.insert(name.into(), false);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, enabled: bool) {
        self.0.insert(name.into(), enabled);
    }

    pub fn supports(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(false)
    }

    /// Flags enabled on both sides
    pub fn intersect(&self, other: &Capabilities) -> Capabilities {
        Capabilities(
            self.0
                .iter()
                .filter(|(name, enabled)| **enabled && other.supports(name))
                .map(|(name, _)| (name.clone(), true))
                .collect(),
        )
    }

    pub fn enabled(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(name, _)| name.as_str())
    }
}
