//! Unreachable routes for DHCPv6 delegated prefixes.
//!
//! A prefix delegated to us is split onto downstream interfaces. Whatever is
//! not assigned downstream must not leak back out the upstream default
//! route, so the whole prefix gets a reject route on the delegating
//! interface.

use std::net::Ipv6Addr;

use crate::addr::{Family, SockAddr};
use crate::error::Result;
use crate::interface::{InterfaceId, InterfaceTable};

use super::{RouteProducer, RouteSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegatedPrefix {
    /// Interface the prefix was delegated on.
    pub ifp: InterfaceId,
    pub prefix: Ipv6Addr,
    pub prefix_len: u8,
    /// Delegated with the same length it is used at, so nothing is left over.
    pub no_reject: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DelegatedPrefixes {
    prefixes: Vec<DelegatedPrefix>,
}

impl DelegatedPrefixes {
    pub fn new(prefixes: Vec<DelegatedPrefix>) -> Self {
        Self { prefixes }
    }

    pub fn delegate(&mut self, prefix: DelegatedPrefix) {
        self.prefixes.push(prefix);
    }

    pub fn expire(&mut self, prefix: Ipv6Addr, prefix_len: u8) {
        self.prefixes
            .retain(|p| !(p.prefix == prefix && p.prefix_len == prefix_len));
    }
}

impl RouteProducer for DelegatedPrefixes {
    fn name(&self) -> &str {
        "dhcp6"
    }

    fn routes(
        &self,
        family: Family,
        _interfaces: &InterfaceTable,
        sink: &mut RouteSink<'_>,
    ) -> Result<()> {
        if family != Family::Inet6 {
            return Ok(());
        }

        for pd in self.prefixes.iter().filter(|p| !p.no_reject) {
            sink.try_push(pd.ifp, |rt| {
                rt.set_destination(SockAddr::V6(pd.prefix), pd.prefix_len)?;
                rt.set_gateway(SockAddr::V6(Ipv6Addr::LOCALHOST));
                rt.flags.reject = true;
                rt.origin.dhcp = true;
                Ok(())
            })?;
        }
        Ok(())
    }
}
