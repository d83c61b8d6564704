//! The route entity.
//!
//! A [`Route`] is one routing-table entry plus its provenance. Records live
//! in a [`RouteArena`] and are referenced by [`RouteId`]; ordered structures
//! (the store, the candidate set, the kernel snapshot) hold ids under keys
//! from [`order`].

pub mod arena;
pub mod order;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::addr::{self, Family, SockAddr, apply_mask, sa_equal};
use crate::interface::InterfaceId;

pub use arena::{RouteArena, RouteId};
pub use order::{IdentityKey, KernelKey, PriorityKey, Seq};

/// Raw kernel route flag values (BSD `RTF_*` layout).
pub mod route_flags {
    pub const HOST: u32 = 0x4;
    pub const REJECT: u32 = 0x8;
    pub const GATEWAY: u32 = 0x2;
    pub const STATIC: u32 = 0x800;
    pub const CLONING: u32 = 0x100;
}

/// Raw origin flag values.
pub mod origin_flags {
    pub const ADDRESS: u16 = 0x01;
    pub const FAKE: u16 = 0x02;
    pub const IPV4LL: u16 = 0x04;
    pub const RA: u16 = 0x08;
    pub const DHCP: u16 = 0x10;
    pub const STATIC: u16 = 0x20;
    pub const ONLINK: u16 = 0x40;
}

/// Kernel flags of a route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteFlags {
    /// Destination is a single host.
    pub host: bool,
    /// Matching packets are rejected (unreachable).
    pub reject: bool,
    /// Destination is reached through a gateway.
    pub gateway: bool,
    /// Route clones host routes on use (BSD).
    pub cloning: bool,
    /// Manually added.
    pub static_: bool,
}

impl RouteFlags {
    pub fn from_raw(flags: u32) -> Self {
        Self {
            host: flags & route_flags::HOST != 0,
            reject: flags & route_flags::REJECT != 0,
            gateway: flags & route_flags::GATEWAY != 0,
            cloning: flags & route_flags::CLONING != 0,
            static_: flags & route_flags::STATIC != 0,
        }
    }

    pub fn to_raw(self) -> u32 {
        let mut flags = 0u32;
        if self.host {
            flags |= route_flags::HOST;
        }
        if self.reject {
            flags |= route_flags::REJECT;
        }
        if self.gateway {
            flags |= route_flags::GATEWAY;
        }
        if self.cloning {
            flags |= route_flags::CLONING;
        }
        if self.static_ {
            flags |= route_flags::STATIC;
        }
        flags
    }
}

/// Which part of the daemon asked for a route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Origin {
    /// Subnet route derived from an assigned address.
    pub address: bool,
    /// Believed installed by a previous instance; never touch the kernel for it.
    pub fake: bool,
    pub ipv4ll: bool,
    pub ra: bool,
    pub dhcp: bool,
    pub static_: bool,
    /// Gateway is directly reachable on the link.
    pub onlink: bool,
}

impl Origin {
    pub fn from_raw(flags: u16) -> Self {
        Self {
            address: flags & origin_flags::ADDRESS != 0,
            fake: flags & origin_flags::FAKE != 0,
            ipv4ll: flags & origin_flags::IPV4LL != 0,
            ra: flags & origin_flags::RA != 0,
            dhcp: flags & origin_flags::DHCP != 0,
            static_: flags & origin_flags::STATIC != 0,
            onlink: flags & origin_flags::ONLINK != 0,
        }
    }

    pub fn to_raw(self) -> u16 {
        let mut flags = 0u16;
        for (set, bit) in [
            (self.address, origin_flags::ADDRESS),
            (self.fake, origin_flags::FAKE),
            (self.ipv4ll, origin_flags::IPV4LL),
            (self.ra, origin_flags::RA),
            (self.dhcp, origin_flags::DHCP),
            (self.static_, origin_flags::STATIC),
            (self.onlink, origin_flags::ONLINK),
        ] {
            if set {
                flags |= bit;
            }
        }
        flags
    }
}

/// IPv6 router preference (RFC 4191).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutePreference {
    Low,
    Medium,
    High,
}

impl fmt::Display for RoutePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RoutePreference::Low => "low",
            RoutePreference::Medium => "medium",
            RoutePreference::High => "high",
        })
    }
}

/// One routing-table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub dest: SockAddr,
    pub netmask: SockAddr,
    /// `Unspec` for on-link routes.
    pub gateway: SockAddr,
    pub ifp: InterfaceId,
    /// Preferred source address, `Unspec` when not specified.
    pub pref_src: SockAddr,
    pub flags: RouteFlags,
    /// 0 means no explicit MTU.
    pub mtu: u32,
    /// Ignored by backends without per-route metrics.
    pub metric: u32,
    pub pref: Option<RoutePreference>,
    pub origin: Origin,
    pub seq: Seq,
}

impl Route {
    /// An empty route bound to `ifp`.
    pub fn new(ifp: InterfaceId) -> Self {
        Self {
            dest: SockAddr::Unspec,
            netmask: SockAddr::Unspec,
            gateway: SockAddr::Unspec,
            ifp,
            pref_src: SockAddr::Unspec,
            flags: RouteFlags::default(),
            mtu: 0,
            metric: 0,
            pref: None,
            origin: Origin::default(),
            seq: Seq::default(),
        }
    }

    /// Set destination and prefix length. A full-length prefix marks a host route.
    pub fn set_destination(&mut self, dest: SockAddr, prefix_len: u8) -> addr::Result<()> {
        let family = dest.family();
        self.netmask = addr::mask_of(family, prefix_len)?;
        self.dest = apply_mask(&dest, &self.netmask);
        self.flags.host = prefix_len == family.max_prefix();
        Ok(())
    }

    /// Make this the default route of `family`.
    pub fn set_default(&mut self, family: Family) {
        self.dest = family.unspecified();
        self.netmask = family.unspecified();
        self.flags.host = false;
    }

    /// Set the gateway; an unspecified gateway makes the route on-link.
    pub fn set_gateway(&mut self, gateway: SockAddr) {
        self.flags.gateway = !gateway.is_unspecified();
        self.gateway = gateway;
    }

    /// Family of the route: that of its destination, else of its gateway.
    pub fn family(&self) -> Family {
        match self.dest.family() {
            Family::Unspec => self.gateway.family(),
            family => family,
        }
    }

    /// Destination and netmask both unspecified.
    pub fn is_default(&self) -> bool {
        self.dest.is_unspecified() && self.netmask.is_unspecified() && !self.flags.host
    }

    pub fn is_host(&self) -> bool {
        self.flags.host
    }

    pub fn is_reject(&self) -> bool {
        self.flags.reject
    }

    pub fn is_fake(&self) -> bool {
        self.origin.fake
    }

    /// Prefix length of the destination, when the mask is known and contiguous.
    pub fn prefix_len(&self) -> Option<u8> {
        if self.is_host() {
            return Some(self.family().max_prefix());
        }
        let family = self.family();
        addr::prefix_length_of(&self.netmask.or_unspecified(family)).ok()
    }

    /// Log line for an action on this route, e.g.
    /// `eth0: adding default route via 192.0.2.1`.
    pub fn describe(&self, action: &str, ifname: &str) -> String {
        let mut out = format!("{}: {} ", ifname, action);
        let gateway_unspec = self.gateway.is_unspecified();
        let gateway_is_dest = !gateway_unspec && sa_equal(&self.gateway, &self.dest);

        if self.is_default() {
            out.push_str("default route");
        } else if self.is_host() {
            if self.is_reject() {
                out.push_str("reject ");
            }
            out.push_str(&format!("host route to {}", self.dest));
        } else {
            if self.is_reject() {
                out.push_str("reject ");
            }
            match self.prefix_len() {
                Some(len) => out.push_str(&format!("route to {}/{}", self.dest, len)),
                None => out.push_str(&format!("route to {}", self.dest)),
            }
        }

        if !gateway_unspec && !gateway_is_dest && !self.gateway.is_loopback() {
            out.push_str(&format!(" via {}", self.gateway));
        } else if !self.is_reject() && (gateway_unspec || gateway_is_dest) && !self.is_host() {
            out.push_str(" via link");
        }
        out
    }

    /// Compact form without interface, used in errors: `10.0.0.0/8 via 192.0.2.1`.
    pub fn summary(&self) -> String {
        let mut out = if self.is_default() {
            "default".to_string()
        } else {
            match self.prefix_len() {
                Some(len) => format!("{}/{}", self.dest, len),
                None => self.dest.to_string(),
            }
        };
        if !self.gateway.is_unspecified() {
            out.push_str(&format!(" via {}", self.gateway));
        }
        out
    }
}

/// True when two routes describe the same destination prefix.
///
/// Masked destinations must compare equal, and either both are host routes
/// or their netmasks compare equal.
pub fn route_identity_equal(a: &Route, b: &Route) -> bool {
    let da = apply_mask(&a.dest, &a.netmask);
    let db = apply_mask(&b.dest, &b.netmask);
    if !sa_equal(&da, &db) {
        return false;
    }
    (a.is_host() && b.is_host()) || sa_equal(&a.netmask, &b.netmask)
}
