//! Interfaces routes are bound to.
//!
//! Routes reference their interface by [`InterfaceId`] (the kernel ifindex)
//! and look it up in an [`InterfaceTable`] when they need its name, metric or
//! options. Routes never own interfaces.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Base of the default interface metric.
pub const METRIC_BASE: u32 = 1000;
/// Added to the default metric of wireless interfaces.
pub const METRIC_WIRELESS: u32 = 2000;
/// Added to the metric of every route on a roaming interface without carrier.
pub const ROAM_METRIC_PENALTY: u32 = 2_000_000;
/// Added to the metric of IPv4 link-local routes.
pub const IPV4LL_METRIC_PENALTY: u32 = 1_000_000;

/// Stable interface handle (the kernel interface index).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InterfaceId(pub u32);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// Link carrier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Carrier {
    Up,
    #[default]
    Unknown,
    Down,
}

impl Carrier {
    /// Rank used by producer-priority ordering: up, unknown, then down.
    pub(crate) fn rank(self) -> u8 {
        match self {
            Carrier::Up => 0,
            Carrier::Unknown => 1,
            Carrier::Down => 2,
        }
    }
}

/// Per-interface options consulted by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceOptions {
    /// Install default routes.
    pub gateway: bool,
    /// Leave our routes in the kernel when exiting.
    pub persistent: bool,
    /// Manage routes on this interface at all.
    pub configure: bool,
}

impl Default for InterfaceOptions {
    fn default() -> Self {
        Self {
            gateway: true,
            persistent: false,
            configure: true,
        }
    }
}

/// A network interface as seen by the route engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub index: InterfaceId,
    pub metric: u32,
    pub carrier: Carrier,
    /// Wireless interface allowed to roam between access points.
    pub roaming: bool,
    pub wireless: bool,
    pub options: InterfaceOptions,
}

impl Interface {
    /// Create an interface with the default metric for its index.
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index: InterfaceId(index),
            metric: default_metric(index, false),
            carrier: Carrier::Unknown,
            roaming: false,
            wireless: false,
            options: InterfaceOptions::default(),
        }
    }

    pub fn with_metric(mut self, metric: u32) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_carrier(mut self, carrier: Carrier) -> Self {
        self.carrier = carrier;
        self
    }

    pub fn with_roaming(mut self, roaming: bool) -> Self {
        self.roaming = roaming;
        self
    }

    pub fn with_options(mut self, options: InterfaceOptions) -> Self {
        self.options = options;
        self
    }

    /// Roaming between access points with carrier currently lost.
    pub fn is_roaming(&self) -> bool {
        self.roaming && self.carrier == Carrier::Down
    }

    /// Metric given to new routes on this interface.
    pub fn route_metric(&self) -> u32 {
        if self.is_roaming() {
            self.metric.saturating_add(ROAM_METRIC_PENALTY)
        } else {
            self.metric
        }
    }
}

/// Default metric for an interface: a base plus its index, wireless last.
pub fn default_metric(index: u32, wireless: bool) -> u32 {
    let metric = METRIC_BASE.saturating_add(index);
    if wireless {
        metric.saturating_add(METRIC_WIRELESS)
    } else {
        metric
    }
}

/// All known interfaces, keyed by index.
#[derive(Debug, Clone, Default)]
pub struct InterfaceTable {
    by_index: BTreeMap<InterfaceId, Interface>,
}

impl InterfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an interface, returning the previous entry.
    pub fn insert(&mut self, iface: Interface) -> Option<Interface> {
        self.by_index.insert(iface.index, iface)
    }

    pub fn remove(&mut self, id: InterfaceId) -> Option<Interface> {
        self.by_index.remove(&id)
    }

    pub fn get(&self, id: InterfaceId) -> Option<&Interface> {
        self.by_index.get(&id)
    }

    pub fn get_mut(&mut self, id: InterfaceId) -> Option<&mut Interface> {
        self.by_index.get_mut(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Interface> {
        self.by_index.values().find(|iface| iface.name == name)
    }

    /// Name for logging; unknown indexes render as `ifN`.
    pub fn name_of(&self, id: InterfaceId) -> String {
        self.get(id)
            .map(|iface| iface.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.by_index.values()
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}

impl FromIterator<Interface> for InterfaceTable {
    fn from_iter<I: IntoIterator<Item = Interface>>(iter: I) -> Self {
        let mut table = Self::new();
        for iface in iter {
            table.insert(iface);
        }
        table
    }
}
