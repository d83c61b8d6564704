//! Routes declared in configuration.

use std::fmt;
use std::str::FromStr;

use crate::addr::{Family, SockAddr, parse_prefix};
use crate::error::{Error, Result};
use crate::interface::{InterfaceId, InterfaceTable};
use crate::route::Route;

use super::{RouteProducer, RouteSink};

/// A route written the way `ip route` takes it:
/// `[unreachable] (default | PREFIX) [via ADDR] [dev NAME] [src ADDR] [mtu N] [metric N]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRoute {
    pub family: Family,
    /// `None` for the default route.
    pub dest: Option<(SockAddr, u8)>,
    pub gateway: SockAddr,
    pub dev: Option<String>,
    pub src: SockAddr,
    pub mtu: u32,
    pub metric: Option<u32>,
    pub reject: bool,
}

impl StaticRoute {
    /// Fill in a route record from this declaration.
    pub fn apply_to(&self, rt: &mut Route) -> Result<()> {
        match self.dest {
            Some((dest, prefix_len)) => rt.set_destination(dest, prefix_len)?,
            None => rt.set_default(self.family),
        }
        rt.set_gateway(self.gateway);
        rt.pref_src = self.src;
        rt.mtu = self.mtu;
        if let Some(metric) = self.metric {
            rt.metric = metric;
        }
        rt.flags.reject = self.reject;
        rt.flags.static_ = true;
        rt.origin.static_ = true;
        Ok(())
    }
}

fn invalid(s: &str, what: impl fmt::Display) -> Error {
    Error::Config(format!("route \"{}\": {}", s, what))
}

fn parse_u32(s: &str, keyword: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| invalid(s, format!("invalid {} value {}", keyword, value)))
}

impl FromStr for StaticRoute {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut tokens = s.split_whitespace().peekable();

        let reject = matches!(tokens.peek(), Some(&"unreachable") | Some(&"reject"));
        if reject {
            tokens.next();
        }

        let destination = tokens.next().ok_or_else(|| invalid(s, "missing destination"))?;
        let dest = if destination == "default" {
            None
        } else {
            Some(parse_prefix(destination)?)
        };

        let mut route = StaticRoute {
            family: Family::Unspec,
            dest,
            gateway: SockAddr::Unspec,
            dev: None,
            src: SockAddr::Unspec,
            mtu: 0,
            metric: None,
            reject,
        };

        while let Some(keyword) = tokens.next() {
            let value = tokens
                .next()
                .ok_or_else(|| invalid(s, format!("{} needs a value", keyword)))?;
            match keyword {
                "via" => route.gateway = value.parse()?,
                "dev" => route.dev = Some(value.to_string()),
                "src" => route.src = value.parse()?,
                "mtu" => route.mtu = parse_u32(s, keyword, value)?,
                "metric" => route.metric = Some(parse_u32(s, keyword, value)?),
                other => return Err(invalid(s, format!("unknown keyword {}", other))),
            }
        }

        route.family = match route.dest {
            Some((addr, _)) => addr.family(),
            None if route.gateway.family() != Family::Unspec => route.gateway.family(),
            None => Family::Inet,
        };

        for (what, addr) in [("gateway", route.gateway), ("source", route.src)] {
            if addr.family() != Family::Unspec && addr.family() != route.family {
                return Err(invalid(s, format!("{} {} is not {}", what, addr, route.family)));
            }
        }

        Ok(route)
    }
}

impl fmt::Display for StaticRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reject {
            f.write_str("unreachable ")?;
        }
        match self.dest {
            Some((addr, len)) => write!(f, "{}/{}", addr, len)?,
            None => f.write_str("default")?,
        }
        if self.gateway.family() != Family::Unspec {
            write!(f, " via {}", self.gateway)?;
        }
        if let Some(dev) = &self.dev {
            write!(f, " dev {}", dev)?;
        }
        if self.src.family() != Family::Unspec {
            write!(f, " src {}", self.src)?;
        }
        if self.mtu != 0 {
            write!(f, " mtu {}", self.mtu)?;
        }
        if let Some(metric) = self.metric {
            write!(f, " metric {}", metric)?;
        }
        Ok(())
    }
}

/// Produces configured static routes.
#[derive(Debug, Clone, Default)]
pub struct StaticRoutes {
    routes: Vec<(InterfaceId, StaticRoute)>,
}

impl StaticRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, ifp: InterfaceId, route: StaticRoute) {
        self.routes.push((ifp, route));
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RouteProducer for StaticRoutes {
    fn name(&self) -> &str {
        "static"
    }

    fn routes(
        &self,
        family: Family,
        _interfaces: &InterfaceTable,
        sink: &mut RouteSink<'_>,
    ) -> Result<()> {
        for (ifp, route) in self.routes.iter().filter(|(_, r)| r.family == family) {
            sink.try_push(*ifp, |rt| route.apply_to(rt))?;
        }
        Ok(())
    }
}
