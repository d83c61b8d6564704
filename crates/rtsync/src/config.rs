//! YAML configuration.
//!
//! ```yaml
//! options:
//!   gateway: true
//!   persistent: false
//! interfaces:
//!   - name: eth0
//!     index: 2
//!     metric: 100
//!     carrier: up
//!     routes:
//!       - "10.0.0.0/8 via 192.0.2.1 mtu 1400"
//! leases:
//!   - interface: eth0
//!     address: 192.0.2.10/24
//!     routers: [192.0.2.1]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::addr::{Family, SockAddr, parse_prefix};
use crate::error::{Error, Result};
use crate::interface::{Carrier, Interface, InterfaceId, InterfaceOptions, InterfaceTable, default_metric};
use crate::producer::{
    DelegatedPrefix, DelegatedPrefixes, DhcpLease, Ipv4llRoutes, Ipv4llState, LeaseRoutes, RaPrefix,
    RaRouter, RaRoutes, RouteProducer, RouterAdvert, StaticRoute, StaticRoutes, dho,
};
use crate::reconcile::ReconcilerOptions;
use crate::route::RoutePreference;

fn yes() -> bool {
    true
}

fn default_pool_size() -> usize {
    64
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub options: GlobalOptions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<InterfaceConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub leases: Vec<LeaseConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ipv4ll: Vec<Ipv4llConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ra: Vec<RaConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub delegated: Vec<DelegatedConfig>,
}

/// Defaults for every interface, plus engine limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalOptions {
    #[serde(default = "yes")]
    pub gateway: bool,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default = "yes")]
    pub configure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_routes: Option<usize>,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            gateway: true,
            persistent: false,
            configure: true,
            max_routes: None,
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceConfig {
    pub name: String,
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<u32>,
    #[serde(default)]
    pub carrier: Carrier,
    #[serde(default)]
    pub roaming: bool,
    #[serde(default)]
    pub wireless: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configure: Option<bool>,
    /// Static routes, `ip route` style.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeaseConfig {
    pub interface: String,
    /// Assigned address with prefix length, e.g. `192.0.2.10/24`.
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciaddr: Option<Ipv4Addr>,
    /// Option 3.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routers: Vec<Ipv4Addr>,
    /// Option 26.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
    /// Raw option payloads as hex, by option code.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<u8, String>,
    #[serde(default)]
    pub fake: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ipv4llConfig {
    pub interface: String,
    pub address: Ipv4Addr,
    #[serde(default)]
    pub default_route: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RaRouterConfig {
    pub address: Ipv6Addr,
    #[serde(default = "medium")]
    pub preference: RoutePreference,
}

fn medium() -> RoutePreference {
    RoutePreference::Medium
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RaConfig {
    pub interface: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routers: Vec<RaRouterConfig>,
    /// On-link prefixes in CIDR form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prefixes: Vec<String>,
    #[serde(default)]
    pub mtu: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelegatedConfig {
    pub interface: String,
    /// Delegated prefix in CIDR form.
    pub prefix: String,
    #[serde(default)]
    pub no_reject: bool,
}

fn ipv6_prefix(s: &str) -> Result<(Ipv6Addr, u8)> {
    match parse_prefix(s)? {
        (SockAddr::V6(addr), len) => Ok((addr, len)),
        _ => Err(Error::Config(format!("{} is not an IPv6 prefix", s))),
    }
}

impl Config {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check names, indexes and every embedded route or prefix string.
    pub fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        let mut indexes = BTreeSet::new();
        for iface in &self.interfaces {
            if iface.name.is_empty() {
                return Err(Error::Config("interface with empty name".into()));
            }
            if !names.insert(iface.name.as_str()) {
                return Err(Error::Config(format!("duplicate interface {}", iface.name)));
            }
            if iface.index == 0 || !indexes.insert(iface.index) {
                return Err(Error::Config(format!(
                    "{}: index {} is zero or already used",
                    iface.name, iface.index
                )));
            }
            for route in &iface.routes {
                let parsed: StaticRoute = route.parse()?;
                if let Some(dev) = &parsed.dev
                    && dev != &iface.name
                {
                    return Err(Error::Config(format!(
                        "{}: route \"{}\" names device {}",
                        iface.name, route, dev
                    )));
                }
            }
        }

        let known = |name: &str| -> Result<()> {
            if names.contains(name) {
                Ok(())
            } else {
                Err(Error::InterfaceNotFound {
                    name: name.to_string(),
                })
            }
        };

        for lease in &self.leases {
            known(&lease.interface)?;
            lease.to_lease(InterfaceId(0))?;
        }
        for ll in &self.ipv4ll {
            known(&ll.interface)?;
            if !ll.address.is_link_local() {
                return Err(Error::Config(format!(
                    "{}: {} is not a link-local address",
                    ll.interface, ll.address
                )));
            }
        }
        for ra in &self.ra {
            known(&ra.interface)?;
            for prefix in &ra.prefixes {
                ipv6_prefix(prefix)?;
            }
        }
        for pd in &self.delegated {
            known(&pd.interface)?;
            ipv6_prefix(&pd.prefix)?;
        }

        if self.options.max_routes == Some(0) {
            return Err(Error::Config("max_routes must be positive".into()));
        }
        Ok(())
    }

    /// Build the interface table.
    pub fn interface_table(&self) -> InterfaceTable {
        self.interfaces
            .iter()
            .map(|cfg| Interface {
                name: cfg.name.clone(),
                index: InterfaceId(cfg.index),
                metric: cfg
                    .metric
                    .unwrap_or_else(|| default_metric(cfg.index, cfg.wireless)),
                carrier: cfg.carrier,
                roaming: cfg.roaming,
                wireless: cfg.wireless,
                options: InterfaceOptions {
                    gateway: cfg.gateway.unwrap_or(self.options.gateway),
                    persistent: cfg.persistent.unwrap_or(self.options.persistent),
                    configure: cfg.configure.unwrap_or(self.options.configure),
                },
            })
            .collect()
    }

    pub fn reconciler_options(&self) -> ReconcilerOptions {
        ReconcilerOptions {
            max_routes: self.options.max_routes,
            pool_size: self.options.pool_size,
            persistent: self.options.persistent,
            ..Default::default()
        }
    }

    /// Build every producer the configuration describes.
    pub fn producers(&self, interfaces: &InterfaceTable) -> Result<Vec<Box<dyn RouteProducer>>> {
        let lookup = |name: &str| -> Result<InterfaceId> {
            interfaces
                .by_name(name)
                .map(|iface| iface.index)
                .ok_or_else(|| Error::InterfaceNotFound {
                    name: name.to_string(),
                })
        };

        let mut statics = StaticRoutes::new();
        for iface in &self.interfaces {
            let ifp = lookup(&iface.name)?;
            for route in &iface.routes {
                statics.add(ifp, route.parse()?);
            }
        }

        let mut leases = Vec::new();
        for lease in &self.leases {
            leases.push(lease.to_lease(lookup(&lease.interface)?)?);
        }

        let mut ipv4ll = Vec::new();
        for ll in &self.ipv4ll {
            ipv4ll.push(Ipv4llState {
                ifp: lookup(&ll.interface)?,
                addr: ll.address,
                default_route: ll.default_route,
            });
        }

        let mut adverts = Vec::new();
        for ra in &self.ra {
            let mut prefixes = Vec::new();
            for prefix in &ra.prefixes {
                let (prefix, prefix_len) = ipv6_prefix(prefix)?;
                prefixes.push(RaPrefix {
                    prefix,
                    prefix_len,
                    onlink: true,
                });
            }
            adverts.push(RouterAdvert {
                ifp: lookup(&ra.interface)?,
                routers: ra
                    .routers
                    .iter()
                    .map(|r| RaRouter {
                        addr: r.address,
                        preference: r.preference,
                    })
                    .collect(),
                prefixes,
                mtu: ra.mtu,
            });
        }

        let mut delegated = Vec::new();
        for pd in &self.delegated {
            let (prefix, prefix_len) = ipv6_prefix(&pd.prefix)?;
            delegated.push(DelegatedPrefix {
                ifp: lookup(&pd.interface)?,
                prefix,
                prefix_len,
                no_reject: pd.no_reject,
            });
        }

        Ok(vec![
            Box::new(statics),
            Box::new(LeaseRoutes::new(leases)),
            Box::new(Ipv4llRoutes::new(ipv4ll)),
            Box::new(RaRoutes::new(adverts)),
            Box::new(DelegatedPrefixes::new(delegated)),
        ])
    }
}

impl LeaseConfig {
    /// Convert to a lease bound to `ifp`.
    pub fn to_lease(&self, ifp: InterfaceId) -> Result<DhcpLease> {
        let (addr, prefix_len) = parse_prefix(&self.address)?;
        let SockAddr::V4(yiaddr) = addr else {
            return Err(Error::Config(format!(
                "{}: lease address {} is not {}",
                self.interface,
                self.address,
                Family::Inet
            )));
        };

        let mut lease = DhcpLease::new(ifp, yiaddr, prefix_len);
        lease.ciaddr = self.ciaddr.unwrap_or(Ipv4Addr::UNSPECIFIED);
        lease.fake = self.fake;

        if !self.routers.is_empty() {
            let payload: Vec<u8> = self.routers.iter().flat_map(|r| r.octets()).collect();
            lease.options.insert(dho::ROUTER, payload);
        }
        if let Some(mtu) = self.mtu {
            lease.options.insert(dho::MTU, mtu.to_be_bytes().to_vec());
        }
        for (code, payload) in &self.options {
            let bytes = hex::decode(payload.trim_start_matches("0x")).map_err(|e| {
                Error::Config(format!(
                    "{}: option {} payload {}: {}",
                    self.interface, code, payload, e
                ))
            })?;
            lease.options.insert(*code, bytes);
        }
        Ok(lease)
    }
}
