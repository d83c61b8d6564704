//! In-memory kernel routing table.
//!
//! Behaves like a kernel route table with configurable [`Capabilities`]:
//! ADD conflicts on an existing prefix (and metric, when metrics are
//! supported), CHANGE and DELETE of an absent route fail with `ESRCH`.
//! Every call is logged, and failures can be injected per operation.

use crate::addr::{Family, SockAddr, sa_equal};
use crate::interface::InterfaceId;
use crate::route::{KernelKey, Origin, Route, Seq};

use super::{BackendError, BackendResult, Capabilities, KernelBackend, RouteOp};

/// One recorded `apply` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelCall {
    pub op: RouteOp,
    pub route: Route,
    pub ok: bool,
}

/// Simulated kernel.
#[derive(Debug, Clone)]
pub struct SimKernel {
    caps: Capabilities,
    table: Vec<Route>,
    calls: Vec<KernelCall>,
    faults: Vec<(RouteOp, i32)>,
    dump_faults: Vec<i32>,
    miss_filter: Option<Vec<SockAddr>>,
    miss_filter_supported: bool,
}

impl SimKernel {
    pub fn new(caps: Capabilities) -> Self {
        Self {
            caps,
            table: Vec::new(),
            calls: Vec::new(),
            faults: Vec::new(),
            dump_faults: Vec::new(),
            miss_filter: None,
            miss_filter_supported: false,
        }
    }

    pub fn linux() -> Self {
        Self::new(Capabilities::linux())
    }

    pub fn bsd() -> Self {
        Self::new(Capabilities::bsd())
    }

    /// Accept miss filters instead of reporting them unsupported.
    pub fn with_miss_filter(mut self) -> Self {
        self.miss_filter_supported = true;
        self
    }

    /// Put a route in the table without logging a call, as a third party would.
    pub fn install(&mut self, route: Route) {
        self.table.push(kernel_view(&route));
    }

    /// Remove matching routes without logging a call. Returns how many went.
    pub fn remove(&mut self, route: &Route) -> usize {
        let key = KernelKey::new(route, self.caps.supports_metric);
        let before = self.table.len();
        self.table
            .retain(|r| KernelKey::new(r, self.caps.supports_metric) != key);
        before - self.table.len()
    }

    /// Drop every route on `ifp` without logging a call, as the kernel does
    /// when the link goes away.
    pub fn remove_interface(&mut self, ifp: InterfaceId) -> usize {
        let before = self.table.len();
        self.table.retain(|r| r.ifp != ifp);
        before - self.table.len()
    }

    /// Current table contents.
    pub fn routes(&self) -> &[Route] {
        &self.table
    }

    /// Routes of one family.
    pub fn routes_of(&self, family: Family) -> impl Iterator<Item = &Route> {
        self.table.iter().filter(move |r| r.family() == family)
    }

    /// Every `apply` call so far, failed ones included.
    pub fn calls(&self) -> &[KernelCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Fail the next `op` with the given positive errno.
    pub fn fail_next(&mut self, op: RouteOp, errno: i32) {
        self.faults.push((op, errno));
    }

    /// Fail the next dump with the given positive errno.
    pub fn fail_dump(&mut self, errno: i32) {
        self.dump_faults.push(errno);
    }

    /// Gateways passed to the last successful miss-filter install.
    pub fn miss_filter(&self) -> Option<&[SockAddr]> {
        self.miss_filter.as_deref()
    }

    fn key(&self, route: &Route) -> KernelKey {
        KernelKey::new(route, self.caps.supports_metric)
    }

    fn conflicts(&self, existing: &Route, route: &Route) -> bool {
        self.key(existing) == self.key(route)
            && (!self.caps.allows_multiple_gateways || sa_equal(&existing.gateway, &route.gateway))
    }

    fn find(&self, route: &Route) -> Option<usize> {
        let key = self.key(route);
        let exact = self
            .table
            .iter()
            .position(|r| self.key(r) == key && sa_equal(&r.gateway, &route.gateway));
        exact.or_else(|| self.table.iter().position(|r| self.key(r) == key))
    }

    fn take_fault(&mut self, op: RouteOp) -> Option<i32> {
        let pos = self.faults.iter().position(|(o, _)| *o == op)?;
        Some(self.faults.remove(pos).1)
    }

    fn execute(&mut self, op: RouteOp, route: &Route) -> BackendResult<()> {
        if let Some(errno) = self.take_fault(op) {
            return Err(BackendError::from_errno(-errno));
        }

        match op {
            RouteOp::Add => {
                if self.table.iter().any(|r| self.conflicts(r, route)) {
                    return Err(BackendError::from_errno(-libc::EEXIST));
                }
                self.table.push(kernel_view(route));
            }
            RouteOp::Change => {
                let pos = self
                    .find(route)
                    .ok_or_else(|| BackendError::from_errno(-libc::ESRCH))?;
                self.table[pos] = kernel_view(route);
            }
            RouteOp::Delete => {
                let pos = self
                    .find(route)
                    .ok_or_else(|| BackendError::from_errno(-libc::ESRCH))?;
                self.table.remove(pos);
            }
        }
        Ok(())
    }
}

impl Default for SimKernel {
    fn default() -> Self {
        Self::linux()
    }
}

/// What the kernel remembers of a route: no provenance.
fn kernel_view(route: &Route) -> Route {
    let mut rt = route.clone();
    rt.origin = Origin::default();
    rt.seq = Seq::default();
    rt
}

impl KernelBackend for SimKernel {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn dump_routes(&mut self, family: Family) -> BackendResult<Vec<Route>> {
        if !self.dump_faults.is_empty() {
            let errno = self.dump_faults.remove(0);
            return Err(BackendError::from_errno(-errno));
        }
        Ok(self.routes_of(family).cloned().collect())
    }

    fn apply(&mut self, op: RouteOp, route: &Route) -> BackendResult<()> {
        let result = self.execute(op, route);
        self.calls.push(KernelCall {
            op,
            route: route.clone(),
            ok: result.is_ok(),
        });
        result
    }

    fn install_miss_filter(&mut self, gateways: &[SockAddr]) -> BackendResult<()> {
        if !self.miss_filter_supported {
            return Err(BackendError::NotSupported("route miss filter".into()));
        }
        self.miss_filter = Some(gateways.to_vec());
        Ok(())
    }
}
