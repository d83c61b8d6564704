//! Scenario files: a configuration, a simulated platform and a list of steps.
//!
//! ```yaml
//! platform: linux
//! kernel:
//!   - interface: eth0
//!     route: "203.0.113.5/32 via 192.0.2.1 mtu 1500"
//! config:
//!   interfaces: [...]
//! steps:
//!   - action: rebuild
//!   - action: carrier
//!     interface: eth0
//!     state: down
//!   - action: exit
//! ```

use std::path::Path;

use anyhow::{Context, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use rtsync::producer::StaticRoute;
use rtsync::{
    Capabilities, Carrier, Config, DaemonEvent, Family, InterfaceTable, Originator, Route, RouteOp,
    SimKernel,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    #[default]
    Linux,
    Bsd,
    BsdMultipath,
}

impl Platform {
    pub fn capabilities(self) -> Capabilities {
        match self {
            Platform::Linux => Capabilities::linux(),
            Platform::Bsd => Capabilities::bsd(),
            Platform::BsdMultipath => Capabilities::bsd_multipath(),
        }
    }
}

/// A route already in the kernel when the scenario starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KernelRoute {
    pub interface: String,
    pub route: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalOp {
    Add,
    Change,
    Delete,
}

impl From<ExternalOp> for RouteOp {
    fn from(op: ExternalOp) -> Self {
        match op {
            ExternalOp::Add => RouteOp::Add,
            ExternalOp::Change => RouteOp::Change,
            ExternalOp::Delete => RouteOp::Delete,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Step {
    Rebuild {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        family: Option<Family>,
    },
    Carrier {
        interface: String,
        state: Carrier,
    },
    Roaming {
        interface: String,
        roaming: bool,
    },
    /// The link goes away, taking its kernel routes with it.
    Depart {
        interface: String,
    },
    /// A route change made by someone else. The kernel table is updated
    /// before the notification is delivered.
    External {
        op: ExternalOp,
        interface: String,
        route: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
    },
    Exit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kernel: Vec<KernelRoute>,
    pub config: Config,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let scenario: Scenario = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        scenario.config.validate()?;
        Ok(scenario)
    }

    /// The simulated kernel, with the scenario's pre-existing routes.
    pub fn kernel(&self, interfaces: &InterfaceTable) -> anyhow::Result<SimKernel> {
        let mut kernel = SimKernel::new(self.platform.capabilities());
        for entry in &self.kernel {
            kernel.install(route_on(interfaces, &entry.interface, &entry.route)?);
        }
        Ok(kernel)
    }

    /// The daemon event for one step. External changes are made to `kernel`
    /// here, since the daemon only sees the notification.
    pub fn event(
        step: &Step,
        interfaces: &InterfaceTable,
        kernel: &mut SimKernel,
    ) -> anyhow::Result<DaemonEvent> {
        let index = |name: &str| {
            interfaces
                .by_name(name)
                .map(|iface| iface.index)
                .with_context(|| format!("unknown interface {}", name))
        };

        let event = match step {
            Step::Rebuild { family: Some(family) } => DaemonEvent::Rebuild(*family),
            Step::Rebuild { family: None } => DaemonEvent::RebuildAll,
            Step::Carrier { interface, state } => DaemonEvent::Carrier {
                ifp: index(interface)?,
                carrier: *state,
            },
            Step::Roaming { interface, roaming } => DaemonEvent::Roaming {
                ifp: index(interface)?,
                roaming: *roaming,
            },
            Step::Depart { interface } => {
                let ifp = index(interface)?;
                kernel.remove_interface(ifp);
                DaemonEvent::InterfaceDeparted(ifp)
            }
            Step::External {
                op,
                interface,
                route,
                pid,
            } => {
                let route = route_on(interfaces, interface, route)?;
                match op {
                    ExternalOp::Delete => {
                        if kernel.remove(&route) == 0 {
                            bail!("external delete of {}: no such route", route.summary());
                        }
                    }
                    ExternalOp::Add | ExternalOp::Change => {
                        kernel.remove(&route);
                        kernel.install(route.clone());
                    }
                }
                DaemonEvent::ExternalRoute {
                    op: (*op).into(),
                    route,
                    originator: pid.map_or(Originator::Kernel, Originator::Process),
                }
            }
            Step::Exit => DaemonEvent::Exit,
        };
        Ok(event)
    }
}

/// Build a kernel-style route on a named interface from `ip route` syntax.
fn route_on(interfaces: &InterfaceTable, name: &str, text: &str) -> anyhow::Result<Route> {
    let iface = interfaces
        .by_name(name)
        .with_context(|| format!("unknown interface {}", name))?;
    let parsed: StaticRoute = text.parse()?;
    let mut route = Route::new(iface.index);
    route.metric = iface.route_metric();
    parsed.apply_to(&mut route)?;
    route.flags.static_ = false;
    route.origin = Default::default();
    Ok(route)
}
