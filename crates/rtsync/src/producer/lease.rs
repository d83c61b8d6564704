//! Routes from DHCPv4 leases.
//!
//! Route options are decoded from their raw payloads:
//!
//! - option 121 (RFC 3442 classless static routes), or its Microsoft twin
//!   249. When either decodes, nothing else is used.
//! - option 33 (RFC 2132 static routes), classful netmasks.
//! - option 3 routers, as default routes.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use tracing::{debug, warn};
use winnow::binary::{be_u16, le_u8};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take;

use crate::addr::{Family, SockAddr, classful_netmask, prefix_length_of};
use crate::error::Result;
use crate::interface::{InterfaceId, InterfaceTable};
use crate::route::Route;

use super::{RouteProducer, RouteSink};

/// Result type for winnow parsers.
pub type PResult<T> = core::result::Result<T, ErrMode<ContextError>>;

/// DHCP option codes used for routing.
pub mod dho {
    pub const SUBNETMASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const MTU: u8 = 26;
    pub const STATICROUTE: u8 = 33;
    pub const CSR: u8 = 121;
    pub const MSCSR: u8 = 249;
}

/// Smallest MTU a lease may set.
pub const MTU_MIN: u16 = 576;

/// A route decoded from a lease option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedRoute {
    pub dest: Ipv4Addr,
    pub prefix_len: u8,
    /// `0.0.0.0` when on-link.
    pub gateway: Ipv4Addr,
    pub host: bool,
}

/// Why an option payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionError {
    #[error("option {code}: payload too short ({len} bytes)")]
    TooShort { code: u8, len: usize },
    #[error("option {code}: prefix length {cidr} out of range")]
    BadPrefix { code: u8, cidr: u8 },
    #[error("option {code}: route overruns payload")]
    Overrun { code: u8 },
    #[error("option {code}: length {len} is not a multiple of {unit}")]
    BadLength { code: u8, len: usize, unit: usize },
}

fn ipv4(input: &mut &[u8]) -> PResult<Ipv4Addr> {
    let bytes: &[u8] = take(4usize).parse_next(input)?;
    Ok(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
}

fn option_u16(input: &mut &[u8]) -> PResult<u16> {
    be_u16.parse_next(input)
}

/// One RFC 3442 entry: width byte, significant destination octets, router.
fn classless_entry(input: &mut &[u8]) -> PResult<(u8, Ipv4Addr, Ipv4Addr)> {
    let cidr = le_u8.parse_next(input)?;
    if cidr > 32 {
        return Err(ErrMode::Cut(ContextError::new()));
    }
    let ocets = usize::from(cidr).div_ceil(8);
    let significant: &[u8] = take(ocets).parse_next(input)?;
    let mut dest = [0u8; 4];
    dest[..ocets].copy_from_slice(significant);
    let gateway = ipv4(input)?;
    Ok((cidr, Ipv4Addr::from(dest), gateway))
}

/// A gateway pointing at the destination or at one of our own addresses
/// makes the route an on-link host route.
fn is_host_gateway(gateway: Ipv4Addr, dest: Ipv4Addr, yiaddr: Ipv4Addr, ciaddr: Ipv4Addr) -> bool {
    gateway == dest || gateway == yiaddr || gateway == ciaddr
}

/// Decode an RFC 3442 classless static route payload.
pub fn decode_classless(
    code: u8,
    data: &[u8],
    yiaddr: Ipv4Addr,
    ciaddr: Ipv4Addr,
) -> std::result::Result<Vec<ParsedRoute>, OptionError> {
    if data.len() < 5 {
        return Err(OptionError::TooShort {
            code,
            len: data.len(),
        });
    }

    let mut input = data;
    let mut routes = Vec::new();
    while !input.is_empty() {
        let cidr = input[0];
        if cidr > 32 {
            return Err(OptionError::BadPrefix { code, cidr });
        }
        let (cidr, dest, gateway) =
            classless_entry(&mut input).map_err(|_| OptionError::Overrun { code })?;

        let route = if is_host_gateway(gateway, dest, yiaddr, ciaddr) {
            ParsedRoute {
                dest,
                prefix_len: 32,
                gateway: Ipv4Addr::UNSPECIFIED,
                host: true,
            }
        } else {
            ParsedRoute {
                dest,
                prefix_len: cidr,
                gateway,
                host: cidr == 32,
            }
        };
        routes.push(route);
    }
    Ok(routes)
}

/// Decode an option 33 payload of destination/router pairs.
///
/// Pairs with an unspecified router are illegal and skipped.
pub fn decode_static_routes(
    data: &[u8],
    yiaddr: Ipv4Addr,
    ciaddr: Ipv4Addr,
) -> std::result::Result<Vec<ParsedRoute>, OptionError> {
    if data.len() % 8 != 0 {
        return Err(OptionError::BadLength {
            code: dho::STATICROUTE,
            len: data.len(),
            unit: 8,
        });
    }

    let mut input = data;
    let mut routes = Vec::new();
    while !input.is_empty() {
        let (dest, gateway) = (ipv4, ipv4)
            .parse_next(&mut input)
            .map_err(|_| OptionError::Overrun {
                code: dho::STATICROUTE,
            })?;
        if gateway.is_unspecified() {
            continue;
        }

        if is_host_gateway(gateway, dest, yiaddr, ciaddr) {
            routes.push(ParsedRoute {
                dest,
                prefix_len: 32,
                gateway: Ipv4Addr::UNSPECIFIED,
                host: true,
            });
        } else {
            let mask = SockAddr::V4(classful_netmask(dest));
            let prefix_len = prefix_length_of(&mask).unwrap_or(32);
            routes.push(ParsedRoute {
                dest,
                prefix_len,
                gateway,
                host: prefix_len == 32,
            });
        }
    }
    Ok(routes)
}

/// Decode an option 3 router list into default routes.
pub fn decode_routers(data: &[u8]) -> std::result::Result<Vec<ParsedRoute>, OptionError> {
    if data.len() % 4 != 0 {
        return Err(OptionError::BadLength {
            code: dho::ROUTER,
            len: data.len(),
            unit: 4,
        });
    }

    let mut input = data;
    let mut routes = Vec::new();
    while !input.is_empty() {
        let gateway = ipv4(&mut input).map_err(|_| OptionError::Overrun { code: dho::ROUTER })?;
        routes.push(ParsedRoute {
            dest: Ipv4Addr::UNSPECIFIED,
            prefix_len: 0,
            gateway,
            host: false,
        });
    }
    Ok(routes)
}

/// A bound DHCPv4 lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpLease {
    pub ifp: InterfaceId,
    /// Assigned address.
    pub yiaddr: Ipv4Addr,
    /// Client address from the message, `0.0.0.0` when absent.
    pub ciaddr: Ipv4Addr,
    pub prefix_len: u8,
    /// Raw option payloads by code.
    pub options: BTreeMap<u8, Vec<u8>>,
    /// Lease recovered at restart; its routes are assumed installed.
    pub fake: bool,
}

impl DhcpLease {
    pub fn new(ifp: InterfaceId, yiaddr: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            ifp,
            yiaddr,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            prefix_len,
            options: BTreeMap::new(),
            fake: false,
        }
    }

    pub fn with_option(mut self, code: u8, payload: impl Into<Vec<u8>>) -> Self {
        self.options.insert(code, payload.into());
        self
    }

    /// MTU from option 26, when present and sane.
    pub fn mtu(&self) -> Option<u32> {
        let mut input = self.options.get(&dho::MTU)?.as_slice();
        let mtu = option_u16(&mut input).ok()?;
        (mtu >= MTU_MIN).then_some(u32::from(mtu))
    }

    /// Routes the lease options ask for, classless routes taking precedence.
    pub fn option_routes(&self, ifname: &str) -> Vec<ParsedRoute> {
        for (code, label) in [(dho::CSR, ""), (dho::MSCSR, "MS ")] {
            let Some(data) = self.options.get(&code) else {
                continue;
            };
            match decode_classless(code, data, self.yiaddr, self.ciaddr) {
                Ok(routes) => {
                    debug!("{}: using {}Classless Static Routes", ifname, label);
                    return routes;
                }
                Err(e) => warn!("{}: {}", ifname, e),
            }
            break;
        }

        let mut routes = Vec::new();
        if let Some(data) = self.options.get(&dho::STATICROUTE) {
            match decode_static_routes(data, self.yiaddr, self.ciaddr) {
                Ok(mut static_routes) => routes.append(&mut static_routes),
                Err(e) => warn!("{}: {}", ifname, e),
            }
        }
        if let Some(data) = self.options.get(&dho::ROUTER) {
            match decode_routers(data) {
                Ok(mut routers) => routes.append(&mut routers),
                Err(e) => warn!("{}: {}", ifname, e),
            }
        }
        routes
    }

    /// Whether `addr` is inside the assigned subnet.
    fn on_subnet(&self, addr: Ipv4Addr) -> bool {
        let shift = 32u32.saturating_sub(u32::from(self.prefix_len));
        let mask = if shift >= 32 { 0 } else { u32::MAX << shift };
        u32::from(addr) & mask == u32::from(self.yiaddr) & mask
    }
}

/// Produces the routes of every bound DHCPv4 lease.
#[derive(Debug, Clone, Default)]
pub struct LeaseRoutes {
    leases: Vec<DhcpLease>,
}

impl LeaseRoutes {
    pub fn new(leases: Vec<DhcpLease>) -> Self {
        Self { leases }
    }

    pub fn leases(&self) -> &[DhcpLease] {
        &self.leases
    }

    /// Replace the lease for its interface, or add it.
    pub fn bind(&mut self, lease: DhcpLease) {
        self.leases.retain(|l| l.ifp != lease.ifp);
        self.leases.push(lease);
    }

    /// Drop the lease of an interface.
    pub fn release(&mut self, ifp: InterfaceId) -> Option<DhcpLease> {
        let pos = self.leases.iter().position(|l| l.ifp == ifp)?;
        Some(self.leases.remove(pos))
    }

    fn lease_routes(
        lease: &DhcpLease,
        interfaces: &InterfaceTable,
        sink: &mut RouteSink<'_>,
    ) -> Result<()> {
        let ifname = interfaces.name_of(lease.ifp);
        let mtu = lease.mtu().unwrap_or(0);
        let src = SockAddr::V4(lease.yiaddr);
        let fake = lease.fake;

        if lease.prefix_len < 32 {
            sink.try_push(lease.ifp, |rt| {
                rt.set_destination(src, lease.prefix_len)?;
                rt.pref_src = src;
                rt.mtu = mtu;
                rt.origin.address = true;
                rt.origin.dhcp = true;
                rt.origin.fake = fake;
                Ok(())
            })?;
        }

        let parsed = lease.option_routes(&ifname);
        for route in &parsed {
            let gateway = route.gateway;
            let is_default = route.prefix_len == 0 && !route.host;

            // A router outside our subnet needs a host route to reach it.
            if is_default
                && !gateway.is_unspecified()
                && !lease.on_subnet(gateway)
                && !parsed.iter().any(|p| p.host && p.dest == gateway)
            {
                sink.try_push(lease.ifp, |rt| {
                    rt.set_destination(SockAddr::V4(gateway), 32)?;
                    rt.pref_src = src;
                    rt.mtu = mtu;
                    rt.origin.dhcp = true;
                    rt.origin.onlink = true;
                    rt.origin.fake = fake;
                    Ok(())
                })?;
            }

            sink.try_push(lease.ifp, |rt| {
                apply_parsed(rt, route)?;
                rt.pref_src = src;
                rt.mtu = mtu;
                rt.origin.dhcp = true;
                rt.origin.fake = fake;
                Ok(())
            })?;
        }
        Ok(())
    }
}

fn apply_parsed(rt: &mut Route, parsed: &ParsedRoute) -> Result<()> {
    if parsed.prefix_len == 0 && !parsed.host {
        rt.set_default(Family::Inet);
    } else {
        rt.set_destination(SockAddr::V4(parsed.dest), parsed.prefix_len)?;
    }
    rt.flags.host = parsed.host;
    rt.set_gateway(SockAddr::V4(parsed.gateway));
    Ok(())
}

impl RouteProducer for LeaseRoutes {
    fn name(&self) -> &str {
        "dhcp"
    }

    fn routes(
        &self,
        family: Family,
        interfaces: &InterfaceTable,
        sink: &mut RouteSink<'_>,
    ) -> Result<()> {
        if family != Family::Inet {
            return Ok(());
        }
        for lease in &self.leases {
            Self::lease_routes(lease, interfaces, sink)?;
        }
        Ok(())
    }
}
