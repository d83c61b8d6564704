//! Installing one candidate route with the fewest kernel operations.

use std::collections::BTreeMap;

use tracing::{debug, error, info};

use crate::addr::{Family, sa_equal};
use crate::backend::{BackendError, Capabilities, KernelBackend, RouteOp};
use crate::error::Error;
use crate::interface::InterfaceTable;
use crate::route::{KernelKey, Route, RouteArena, RouteId};

use super::BuildReport;

/// Upper bound on repeated deletes when draining per-gateway routes.
const MAX_GATEWAY_DELETES: usize = 64;

/// Whether a candidate made it into the new store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Accepted,
    Rejected,
}

/// Interface, metric (when the platform has metrics) and gateway agree.
pub(crate) fn same_path(caps: &Capabilities, a: &Route, b: &Route) -> bool {
    a.ifp == b.ifp
        && (!caps.supports_metric || a.metric == b.metric)
        && sa_equal(&a.gateway, &b.gateway)
}

/// MTU agrees, and the preferred source too when the candidate names one.
pub(crate) fn same_attrs(candidate: &Route, other: &Route) -> bool {
    candidate.mtu == other.mtu
        && (candidate.pref_src.family() == Family::Unspec
            || sa_equal(&candidate.pref_src, &other.pref_src))
}

/// State for one reconciliation pass over one family.
pub(crate) struct Pass<'a, B: ?Sized> {
    backend: &'a mut B,
    caps: Capabilities,
    interfaces: &'a InterfaceTable,
    kernel: BTreeMap<KernelKey, RouteId>,
    pub(crate) report: BuildReport,
}

impl<'a, B: KernelBackend + ?Sized> Pass<'a, B> {
    pub(crate) fn new(
        backend: &'a mut B,
        caps: Capabilities,
        interfaces: &'a InterfaceTable,
        kernel: BTreeMap<KernelKey, RouteId>,
    ) -> Self {
        Self {
            backend,
            caps,
            interfaces,
            kernel,
            report: BuildReport::default(),
        }
    }

    /// Hand back what is left of the kernel snapshot.
    pub(crate) fn finish(self, arena: &mut RouteArena) -> BuildReport {
        for id in self.kernel.into_values() {
            arena.release(id);
        }
        self.report
    }

    pub(crate) fn backend(&mut self) -> &mut B {
        &mut *self.backend
    }

    fn call(&mut self, op: RouteOp, route: &Route) -> Result<(), BackendError> {
        self.report.kernel_calls += 1;
        debug!(op = %op, route = %route.summary(), "kernel call");
        self.backend.apply(op, route)
    }

    fn log_failure(&self, op: RouteOp, route: &Route, source: BackendError) {
        let err = Error::Apply {
            op,
            route: route.summary(),
            source,
        };
        error!("{}: {}", self.interfaces.name_of(route.ifp), err);
    }

    fn release_snapshot_entry(&mut self, arena: &mut RouteArena, key: &KernelKey) {
        if let Some(id) = self.kernel.remove(key) {
            arena.release(id);
        }
    }

    /// Decide what to do with candidate `id` given the previous store.
    pub(crate) fn do_route(
        &mut self,
        arena: &mut RouteArena,
        store: &BTreeMap<KernelKey, RouteId>,
        id: RouteId,
    ) -> Verdict {
        let Some(cand) = arena.get(id).cloned() else {
            return Verdict::Rejected;
        };
        let key = KernelKey::new(&cand, self.caps.supports_metric);
        let managed = store.get(&key).and_then(|m| arena.get(*m)).cloned();

        match managed {
            Some(_) if cand.is_fake() => {
                self.report.unchanged += 1;
                Verdict::Accepted
            }
            Some(old)
                if !old.is_fake()
                    && same_path(&self.caps, &cand, &old)
                    && same_attrs(&cand, &old) =>
            {
                self.report.unchanged += 1;
                Verdict::Accepted
            }
            Some(old) => self.add_route(arena, &cand, Some(old)),
            None if cand.is_fake() => {
                let installed = self
                    .kernel
                    .get(&key)
                    .and_then(|k| arena.get(*k))
                    .is_some_and(|k| same_path(&self.caps, &cand, k));
                if installed {
                    self.report.unchanged += 1;
                    Verdict::Accepted
                } else {
                    debug!(
                        "{}: assumed route not in kernel",
                        cand.describe("skipping", &self.interfaces.name_of(cand.ifp))
                    );
                    self.report.rejected += 1;
                    Verdict::Rejected
                }
            }
            None => self.add_route(arena, &cand, None),
        }
    }

    /// Install `nrt`, replacing `managed` (the route we installed last time)
    /// or whatever the kernel has under the same key.
    fn add_route(&mut self, arena: &mut RouteArena, nrt: &Route, managed: Option<Route>) -> Verdict {
        let ifname = self.interfaces.name_of(nrt.ifp);

        let gateway_allowed = self
            .interfaces
            .get(nrt.ifp)
            .is_some_and(|iface| iface.options.gateway);
        if nrt.is_default() && !gateway_allowed {
            debug!("{}: not installing default route", ifname);
            self.report.rejected += 1;
            return Verdict::Rejected;
        }

        let key = KernelKey::new(nrt, self.caps.supports_metric);
        let mut change = false;
        let mut from_kernel = false;

        let ort = match managed {
            Some(old) => {
                let path = same_path(&self.caps, nrt, &old) || (nrt.is_reject() && old.is_reject());
                if path && old.is_fake() && same_attrs(nrt, &old) {
                    self.report.unchanged += 1;
                    return Verdict::Accepted;
                }
                change = path;
                Some(old)
            }
            None => match self.kernel.get(&key).and_then(|k| arena.get(*k)).cloned() {
                Some(kroute) => {
                    from_kernel = true;
                    if (kroute.is_reject() && nrt.is_reject()) || same_path(&self.caps, nrt, &kroute)
                    {
                        if same_attrs(nrt, &kroute) {
                            self.report.unchanged += 1;
                            return Verdict::Accepted;
                        }
                        change = true;
                    }
                    Some(kroute)
                }
                None => None,
            },
        };

        if change
            && ort.as_ref().is_some_and(|o| o.flags.cloning)
            && !self.caps.supports_change_on_cloning
        {
            change = false;
        }

        let action = if ort.is_some() { "changing" } else { "adding" };
        info!("{}", nrt.describe(action, &ifname));

        if change {
            match self.call(RouteOp::Change, nrt) {
                Ok(()) => {
                    self.report.changed += 1;
                    if from_kernel {
                        self.release_snapshot_entry(arena, &key);
                    }
                    return Verdict::Accepted;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => self.log_failure(RouteOp::Change, nrt, e),
            }
        }

        if self.caps.supports_metric {
            match self.call(RouteOp::Add, nrt) {
                Ok(()) => {
                    if let Some(old) = &ort {
                        match self.call(RouteOp::Delete, old) {
                            Ok(()) => {}
                            Err(e) if e.is_not_found() => {}
                            Err(e) => self.log_failure(RouteOp::Delete, old, e),
                        }
                    }
                    return self.installed(arena, &key, from_kernel);
                }
                Err(e) if e.is_already_exists() && ort.is_some() => {}
                Err(e) => {
                    self.log_failure(RouteOp::Add, nrt, e);
                    self.report.failed += 1;
                    return Verdict::Rejected;
                }
            }
        }

        if let Some(old) = &ort {
            match self.call(RouteOp::Delete, old) {
                Ok(()) if self.caps.allows_multiple_gateways => {
                    for _ in 0..MAX_GATEWAY_DELETES {
                        if self.call(RouteOp::Delete, old).is_err() {
                            break;
                        }
                    }
                }
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => self.log_failure(RouteOp::Delete, old, e),
            }
        }

        // An existing route we did not replace belongs to someone else.
        match self.call(RouteOp::Add, nrt) {
            Ok(()) => self.installed(arena, &key, from_kernel),
            Err(e) if e.is_already_exists() && ort.is_some() => {
                self.installed(arena, &key, from_kernel)
            }
            Err(e) => {
                self.log_failure(RouteOp::Add, nrt, e);
                self.report.failed += 1;
                Verdict::Rejected
            }
        }
    }

    fn installed(&mut self, arena: &mut RouteArena, key: &KernelKey, from_kernel: bool) -> Verdict {
        self.report.added += 1;
        if from_kernel {
            self.release_snapshot_entry(arena, key);
        }
        Verdict::Accepted
    }

    /// Remove a route we no longer want.
    pub(crate) fn delete(&mut self, route: &Route) -> bool {
        info!(
            "{}",
            route.describe("deleting", &self.interfaces.name_of(route.ifp))
        );
        match self.call(RouteOp::Delete, route) {
            Ok(()) => {
                self.report.deleted += 1;
                true
            }
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                self.log_failure(RouteOp::Delete, route, e);
                self.report.failed += 1;
                false
            }
        }
    }
}
