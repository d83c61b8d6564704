//! Text and JSON rendering of kernel state.

use std::fmt;

use serde::Serialize;

use rtsync::{BuildReport, Family, InterfaceTable, Route, SimKernel};

use crate::scenario::{Platform, Step};

/// One kernel route, `ip route` style.
#[derive(Debug, Clone, Serialize)]
pub struct RouteView {
    pub family: Family,
    pub dst: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    pub dev: String,
    pub metric: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub unreachable: bool,
}

impl RouteView {
    pub fn new(route: &Route, interfaces: &InterfaceTable) -> Self {
        let dst = if route.is_default() {
            "default".to_string()
        } else {
            match route.prefix_len() {
                Some(len) => format!("{}/{}", route.dest, len),
                None => route.dest.to_string(),
            }
        };
        let present = |addr: &rtsync::SockAddr| (!addr.is_unspecified()).then(|| addr.to_string());
        Self {
            family: route.family(),
            dst,
            gateway: present(&route.gateway),
            dev: interfaces.name_of(route.ifp),
            metric: route.metric,
            mtu: (route.mtu != 0).then_some(route.mtu),
            src: present(&route.pref_src),
            unreachable: route.is_reject(),
        }
    }
}

impl fmt::Display for RouteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unreachable {
            f.write_str("unreachable ")?;
        }
        f.write_str(&self.dst)?;
        if let Some(gateway) = &self.gateway {
            write!(f, " via {}", gateway)?;
        }
        write!(f, " dev {} metric {}", self.dev, self.metric)?;
        if let Some(src) = &self.src {
            write!(f, " src {}", src)?;
        }
        if let Some(mtu) = self.mtu {
            write!(f, " mtu {}", mtu)?;
        }
        Ok(())
    }
}

/// Every route in the simulated kernel, IPv4 first.
pub fn routes(kernel: &SimKernel, interfaces: &InterfaceTable) -> Vec<RouteView> {
    [Family::Inet, Family::Inet6]
        .into_iter()
        .flat_map(|family| kernel.routes_of(family))
        .map(|route| RouteView::new(route, interfaces))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct CallView {
    pub op: String,
    pub route: RouteView,
    pub ok: bool,
}

/// What one scenario step did.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutput {
    pub step: usize,
    pub action: Step,
    pub calls: Vec<CallView>,
    pub table: Vec<RouteView>,
}

impl StepOutput {
    pub fn new(step: usize, action: &Step, kernel: &SimKernel, interfaces: &InterfaceTable) -> Self {
        let calls = kernel
            .calls()
            .iter()
            .map(|call| CallView {
                op: call.op.to_string(),
                route: RouteView::new(&call.route, interfaces),
                ok: call.ok,
            })
            .collect();
        Self {
            step,
            action: action.clone(),
            calls,
            table: routes(kernel, interfaces),
        }
    }

    fn action_name(&self) -> String {
        // Internally tagged, so the tag is always present.
        serde_json::to_value(&self.action)
            .ok()
            .and_then(|v| v.get("action").and_then(|a| a.as_str()).map(str::to_string))
            .unwrap_or_default()
    }
}

impl fmt::Display for StepOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}] {}", self.step, self.action_name())?;
        for call in &self.calls {
            let failed = if call.ok { "" } else { " (failed)" };
            writeln!(f, "  {} {}{}", call.op, call.route, failed)?;
        }
        writeln!(f, "  table:")?;
        if self.table.is_empty() {
            writeln!(f, "    (empty)")?;
        }
        for route in &self.table {
            writeln!(f, "    {}", route)?;
        }
        Ok(())
    }
}

/// Whole-run output for `--format json`.
#[derive(Debug, Serialize)]
pub struct Rendered {
    pub platform: Platform,
    pub steps: Vec<StepOutput>,
    pub totals: BuildReport,
}

impl Rendered {
    pub fn totals_line(&self) -> String {
        let t = &self.totals;
        format!(
            "added {} changed {} deleted {} unchanged {} rejected {} failed {} ({} kernel calls)",
            t.added, t.changed, t.deleted, t.unchanged, t.rejected, t.failed, t.kernel_calls
        )
    }
}
