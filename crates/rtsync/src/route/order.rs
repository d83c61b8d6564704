//! Ordering policies for route collections.
//!
//! Each policy is a key type; an ordered collection of routes is a
//! `BTreeMap<Key, RouteId>`.
//!
//! - [`KernelKey`]: the order the kernel keeps routes in. Masked destination,
//!   then normalised netmask, then metric when the platform has metrics.
//! - [`IdentityKey`]: kernel order without the metric; one entry per prefix.
//! - [`Seq`]: insertion order.
//! - [`PriorityKey`]: which producer's route wins when several want the same
//!   prefix.

use std::fmt;

use crate::addr::{SockAddr, apply_mask};
use crate::interface::Interface;

use super::Route;

/// Monotonic insertion sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Seq(pub u64);

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The prefix a route covers.
///
/// An `Unspec` destination or netmask is replaced by the unspecified address
/// of the route's family, and host routes always use the all-ones mask, so
/// routes that compare equal under [`route_identity_equal`] get equal keys.
///
/// [`route_identity_equal`]: super::route_identity_equal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentityKey {
    pub dest: SockAddr,
    pub mask: SockAddr,
}

impl IdentityKey {
    pub fn new(route: &Route) -> Self {
        let family = route.family();
        let dest = apply_mask(&route.dest.or_unspecified(family), &route.netmask);
        let mask = if route.is_host() {
            family.all_ones()
        } else {
            route.netmask.or_unspecified(family)
        };
        Self { dest, mask }
    }
}

/// Kernel ordering: prefix, then metric when the backend supports metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelKey {
    pub identity: IdentityKey,
    pub metric: u32,
}

impl KernelKey {
    pub fn new(route: &Route, supports_metric: bool) -> Self {
        Self {
            identity: IdentityKey::new(route),
            metric: if supports_metric { route.metric } else { 0 },
        }
    }
}

/// Producer-priority ordering.
///
/// Carrier up before unknown before down. Among interfaces without carrier,
/// roaming ones come first. IPv4LL routes lose to everything else. Then the
/// lower interface metric wins, and finally the earlier route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PriorityKey {
    carrier: u8,
    roam: u8,
    ipv4ll: bool,
    metric: u32,
    seq: Seq,
}

impl PriorityKey {
    pub fn new(route: &Route, iface: &Interface) -> Self {
        let carrier = iface.carrier.rank();
        let roam = if iface.is_roaming() || carrier < 2 { 0 } else { 1 };
        Self {
            carrier,
            roam,
            ipv4ll: route.origin.ipv4ll,
            metric: iface.metric,
            seq: route.seq,
        }
    }

    pub fn seq(&self) -> Seq {
        self.seq
    }
}
