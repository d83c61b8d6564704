//! IPv4 link-local (RFC 3927) routes.

use std::net::Ipv4Addr;

use crate::addr::{Family, SockAddr};
use crate::error::Result;
use crate::interface::{IPV4LL_METRIC_PENALTY, InterfaceId, InterfaceTable};

use super::{RouteProducer, RouteSink};

/// The link-local network, 169.254.0.0/16.
pub const LINKLOCAL_PREFIX: (Ipv4Addr, u8) = (Ipv4Addr::new(169, 254, 0, 0), 16);

/// A link-local address claimed on an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4llState {
    pub ifp: InterfaceId,
    pub addr: Ipv4Addr,
    /// Also offer an on-link default route. It sorts after every other
    /// default, so it is only installed when nothing else offers one.
    pub default_route: bool,
}

/// Produces link-local subnet and default routes.
#[derive(Debug, Clone, Default)]
pub struct Ipv4llRoutes {
    states: Vec<Ipv4llState>,
}

impl Ipv4llRoutes {
    pub fn new(states: Vec<Ipv4llState>) -> Self {
        Self { states }
    }

    pub fn claim(&mut self, state: Ipv4llState) {
        self.states.retain(|s| s.ifp != state.ifp);
        self.states.push(state);
    }

    pub fn drop_interface(&mut self, ifp: InterfaceId) {
        self.states.retain(|s| s.ifp != ifp);
    }
}

impl RouteProducer for Ipv4llRoutes {
    fn name(&self) -> &str {
        "ipv4ll"
    }

    fn routes(
        &self,
        family: Family,
        _interfaces: &InterfaceTable,
        sink: &mut RouteSink<'_>,
    ) -> Result<()> {
        if family != Family::Inet {
            return Ok(());
        }

        for state in &self.states {
            let src = SockAddr::V4(state.addr);
            let (net, len) = LINKLOCAL_PREFIX;
            sink.try_push(state.ifp, |rt| {
                rt.set_destination(SockAddr::V4(net), len)?;
                rt.pref_src = src;
                rt.metric = rt.metric.saturating_add(IPV4LL_METRIC_PENALTY);
                rt.origin.ipv4ll = true;
                rt.origin.address = true;
                Ok(())
            })?;

            if state.default_route {
                sink.push(state.ifp, |rt| {
                    rt.set_default(Family::Inet);
                    rt.pref_src = src;
                    rt.metric = rt.metric.saturating_add(IPV4LL_METRIC_PENALTY);
                    rt.origin.ipv4ll = true;
                })?;
            }
        }
        Ok(())
    }
}
