//! Routes learned from IPv6 Router Advertisements.

use std::net::Ipv6Addr;

use crate::addr::{Family, SockAddr};
use crate::error::Result;
use crate::interface::{InterfaceId, InterfaceTable};
use crate::route::RoutePreference;

use super::{RouteProducer, RouteSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaRouter {
    /// Link-local address of the router.
    pub addr: Ipv6Addr,
    pub preference: RoutePreference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaPrefix {
    pub prefix: Ipv6Addr,
    pub prefix_len: u8,
    /// On-link flag (L) of the prefix information option.
    pub onlink: bool,
}

/// Everything usable from the advertisements heard on one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterAdvert {
    pub ifp: InterfaceId,
    pub routers: Vec<RaRouter>,
    pub prefixes: Vec<RaPrefix>,
    /// From the MTU option, 0 when absent.
    pub mtu: u32,
}

/// Produces on-link prefix routes and default routes via advertising routers.
#[derive(Debug, Clone, Default)]
pub struct RaRoutes {
    adverts: Vec<RouterAdvert>,
}

impl RaRoutes {
    pub fn new(adverts: Vec<RouterAdvert>) -> Self {
        Self { adverts }
    }

    pub fn update(&mut self, advert: RouterAdvert) {
        self.adverts.retain(|a| a.ifp != advert.ifp);
        self.adverts.push(advert);
    }
}

impl RouteProducer for RaRoutes {
    fn name(&self) -> &str {
        "ra"
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

        for advert in &self.adverts {
            for prefix in advert.prefixes.iter().filter(|p| p.onlink) {
                sink.try_push(advert.ifp, |rt| {
                    rt.set_destination(SockAddr::V6(prefix.prefix), prefix.prefix_len)?;
                    rt.mtu = advert.mtu;
                    rt.origin.ra = true;
                    Ok(())
                })?;
            }

            for router in &advert.routers {
                sink.push(advert.ifp, |rt| {
                    rt.set_default(Family::Inet6);
                    rt.set_gateway(SockAddr::V6(router.addr));
                    rt.mtu = advert.mtu;
                    rt.pref = Some(router.preference);
                    rt.origin.ra = true;
                })?;
            }
        }
        Ok(())
    }
}
