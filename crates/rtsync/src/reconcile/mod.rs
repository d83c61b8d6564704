//! Reconciliation driver.
//!
//! A [`Reconciler`] owns the route store: per family, the routes it last
//! installed (or found already installed) on behalf of the producers. Each
//! call to [`Reconciler::build`] recomputes the desired set, diffs it against
//! the kernel and the store, applies the difference, and replaces the store.
//!
//! # Example
//!
//! ```
//! use rtsync::{Family, Interface, InterfaceTable, Reconciler, SimKernel};
//! use rtsync::producer::{RouteProducer, StaticRoute, StaticRoutes};
//!
//! let interfaces: InterfaceTable = [Interface::new("eth0", 2)].into_iter().collect();
//! let mut statics = StaticRoutes::new();
//! statics.add(
//!     interfaces.by_name("eth0").unwrap().index,
//!     "default via 192.0.2.1".parse::<StaticRoute>().unwrap(),
//! );
//!
//! let mut kernel = SimKernel::linux();
//! let mut reconciler = Reconciler::default();
//! let producers: [&dyn RouteProducer; 1] = [&statics];
//! let report = reconciler
//!     .build(Family::Inet, &mut kernel, &producers, &interfaces)
//!     .unwrap();
//! assert_eq!(report.added, 1);
//! assert_eq!(kernel.routes().len(), 1);
//! ```

mod apply;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::addr::{Family, SockAddr, sa_equal};
use crate::backend::{KernelBackend, RouteOp};
use crate::error::{Error, Result};
use crate::interface::{InterfaceId, InterfaceTable};
use crate::producer::{RouteProducer, RouteSink};
use crate::route::{IdentityKey, KernelKey, PriorityKey, Route, RouteArena, RouteId};

use apply::{Pass, Verdict};

/// Reconciler settings.
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    /// Cap on live route records, `None` for no cap.
    pub max_routes: Option<usize>,
    /// Vacant record slots kept for reuse.
    pub pool_size: usize,
    /// Leave routes installed on exit for interfaces that are gone from the table.
    pub persistent: bool,
    /// Our process id; route notifications we caused ourselves are ignored.
    pub pid: u32,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            max_routes: None,
            pool_size: 64,
            persistent: false,
            pid: std::process::id(),
        }
    }
}

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub added: usize,
    pub changed: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Dropped by policy (gateway disabled, assumed route missing).
    pub rejected: usize,
    pub failed: usize,
    /// `apply` calls made against the backend.
    pub kernel_calls: usize,
}

impl BuildReport {
    /// Accumulate another pass.
    pub fn merge(&mut self, other: &BuildReport) {
        self.added += other.added;
        self.changed += other.changed;
        self.deleted += other.deleted;
        self.unchanged += other.unchanged;
        self.rejected += other.rejected;
        self.failed += other.failed;
        self.kernel_calls += other.kernel_calls;
    }
}

/// Who changed a route behind our back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Originator {
    Kernel,
    Process(u32),
}

impl fmt::Display for Originator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Originator::Kernel => f.write_str("kernel"),
            Originator::Process(pid) => write!(f, "pid {}", pid),
        }
    }
}

/// How an external route notification affected the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalChange {
    /// Caused by us.
    Ignored,
    /// Not a route we manage, or consistent with ours.
    Unrelated,
    /// Our route was deleted; the store entry is gone.
    Removed,
    /// Our route was replaced with something else; the store entry is gone.
    Superseded,
}

/// Keeps the kernel routing table in line with what producers want.
#[derive(Debug)]
pub struct Reconciler {
    arena: RouteArena,
    stores: BTreeMap<Family, BTreeMap<KernelKey, RouteId>>,
    next_seq: u64,
    exiting: bool,
    persistent: bool,
    pid: u32,
    metric_keys: bool,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(ReconcilerOptions::default())
    }
}

impl Reconciler {
    pub fn new(options: ReconcilerOptions) -> Self {
        Self {
            arena: RouteArena::new(options.max_routes, options.pool_size),
            stores: BTreeMap::new(),
            next_seq: 0,
            exiting: false,
            persistent: options.persistent,
            pid: options.pid,
            metric_keys: true,
        }
    }

    /// Run one reconciliation pass for `family`.
    ///
    /// Fails only when the kernel table cannot be read or the candidate set
    /// cannot be built; the store is untouched in both cases. Individual
    /// route failures are logged and counted in the report.
    pub fn build<B>(
        &mut self,
        family: Family,
        backend: &mut B,
        producers: &[&dyn RouteProducer],
        interfaces: &InterfaceTable,
    ) -> Result<BuildReport>
    where
        B: KernelBackend + ?Sized,
    {
        let caps = backend.capabilities();
        if caps.supports_metric != self.metric_keys {
            self.rekey(caps.supports_metric);
        }

        let kroutes = backend
            .dump_routes(family)
            .map_err(|source| Error::Snapshot { family, source })?;
        let kernel = self.snapshot(kroutes, caps.supports_metric, interfaces)?;

        let candidates = match self.collect(family, producers, interfaces) {
            Ok(candidates) => candidates,
            Err(e) => {
                for id in kernel.into_values() {
                    self.arena.release(id);
                }
                return Err(e);
            }
        };

        let mut pass = Pass::new(backend, caps, interfaces, kernel);
        let mut store = self.stores.remove(&family).unwrap_or_default();
        let mut accepted: BTreeMap<KernelKey, RouteId> = BTreeMap::new();
        let mut identities: BTreeSet<IdentityKey> = BTreeSet::new();
        let mut miss_filter: Vec<SockAddr> = Vec::new();

        for id in candidates.into_values() {
            let Some(route) = self.arena.get(id) else {
                continue;
            };
            let configure = interfaces
                .get(route.ifp)
                .is_some_and(|iface| iface.options.configure);
            if !configure {
                debug!("{}: not configuring routes", interfaces.name_of(route.ifp));
                self.arena.release(id);
                continue;
            }

            if route.is_default()
                && route.gateway.family() == family
                && !route.gateway.is_unspecified()
            {
                miss_filter.push(route.gateway);
            }

            if !in_family(route, family) {
                self.arena.release(id);
                continue;
            }

            let identity = IdentityKey::new(route);
            if identities.contains(&identity) {
                self.arena.release(id);
                continue;
            }

            match pass.do_route(&mut self.arena, &store, id) {
                Verdict::Accepted => {
                    let Some(route) = self.arena.get(id) else {
                        continue;
                    };
                    let key = KernelKey::new(route, caps.supports_metric);
                    if let Some(old) = store.remove(&key) {
                        self.arena.release(old);
                    }
                    accepted.insert(key, id);
                    identities.insert(identity);
                }
                Verdict::Rejected => {
                    self.arena.release(id);
                }
            }
        }

        // Whatever is left in the old store is no longer wanted.
        for (key, id) in store.into_iter().rev() {
            if !accepted.contains_key(&key)
                && let Some(route) = self.arena.get(id).cloned()
            {
                let keep = self.exiting
                    && interfaces
                        .get(route.ifp)
                        .map_or(self.persistent, |iface| iface.options.persistent);
                if keep {
                    debug!(
                        "{}",
                        route.describe("keeping", &interfaces.name_of(route.ifp))
                    );
                } else {
                    pass.delete(&route);
                }
            }
            self.arena.release(id);
        }

        self.stores.insert(family, accepted);

        match pass.backend().install_miss_filter(&miss_filter) {
            Ok(()) => {}
            Err(e) if e.is_not_supported() => {}
            Err(e) => warn!("failed to install route miss filter: {}", e),
        }

        let report = pass.finish(&mut self.arena);
        debug!(
            family = %family,
            added = report.added,
            changed = report.changed,
            deleted = report.deleted,
            unchanged = report.unchanged,
            failed = report.failed,
            "route pass complete"
        );
        Ok(report)
    }

    /// Run a pass for every family, stopping at the first hard failure.
    pub fn build_all<B>(
        &mut self,
        backend: &mut B,
        producers: &[&dyn RouteProducer],
        interfaces: &InterfaceTable,
    ) -> Result<BuildReport>
    where
        B: KernelBackend + ?Sized,
    {
        let mut total = BuildReport::default();
        for family in Family::ALL {
            let report = self.build(family, backend, producers, interfaces)?;
            total.merge(&report);
        }
        Ok(total)
    }

    /// Load the kernel table into the arena, one record per kernel key.
    /// Routes on interfaces we do not know about are not ours to touch.
    fn snapshot(
        &mut self,
        kroutes: Vec<Route>,
        supports_metric: bool,
        interfaces: &InterfaceTable,
    ) -> Result<BTreeMap<KernelKey, RouteId>> {
        let mut kernel = BTreeMap::new();
        for route in kroutes {
            if interfaces.get(route.ifp).is_none() {
                continue;
            }
            let key = KernelKey::new(&route, supports_metric);
            if kernel.contains_key(&key) {
                continue;
            }
            match self.arena.insert(route) {
                Ok(id) => {
                    kernel.insert(key, id);
                }
                Err(e) => {
                    for id in kernel.into_values() {
                        self.arena.release(id);
                    }
                    return Err(e);
                }
            }
        }
        Ok(kernel)
    }

    fn collect(
        &mut self,
        family: Family,
        producers: &[&dyn RouteProducer],
        interfaces: &InterfaceTable,
    ) -> Result<BTreeMap<PriorityKey, RouteId>> {
        let mut sink = RouteSink::new(&mut self.arena, interfaces, &mut self.next_seq);
        for producer in producers {
            if let Err(e) = producer.routes(family, interfaces, &mut sink) {
                sink.abandon();
                return Err(match e {
                    e @ (Error::AllocationFailure { .. } | Error::Producer { .. }) => e,
                    other => Error::producer(producer.name(), other.to_string()),
                });
            }
        }
        Ok(sink.into_candidates())
    }

    fn rekey(&mut self, supports_metric: bool) {
        for store in self.stores.values_mut() {
            let ids: Vec<RouteId> = std::mem::take(store).into_values().collect();
            for id in ids {
                match self.arena.get(id) {
                    Some(route) => {
                        let key = KernelKey::new(route, supports_metric);
                        if let Some(dup) = store.insert(key, id) {
                            self.arena.release(dup);
                        }
                    }
                    None => continue,
                }
            }
        }
        self.metric_keys = supports_metric;
    }

    /// Account for a route change we did not make.
    ///
    /// Deletion of a managed route drops it from the store, so the next pass
    /// installs it again. An add or change that disagrees with the managed
    /// route also drops it, so the next pass puts ours back.
    pub fn on_external_route_change(
        &mut self,
        op: RouteOp,
        route: &Route,
        originator: Originator,
        interfaces: &InterfaceTable,
    ) -> ExternalChange {
        if originator == Originator::Process(self.pid) {
            return ExternalChange::Ignored;
        }

        let key = KernelKey::new(route, self.metric_keys);
        let Some(store) = self.stores.get_mut(&route.family()) else {
            return ExternalChange::Unrelated;
        };
        let Some(&id) = store.get(&key) else {
            return ExternalChange::Unrelated;
        };
        let Some(ours) = self.arena.get(id) else {
            store.remove(&key);
            return ExternalChange::Unrelated;
        };
        let ifname = interfaces.name_of(ours.ifp);

        let outcome = match op {
            RouteOp::Delete => {
                info!("{}: {} deleted {}", ifname, originator, ours.summary());
                ExternalChange::Removed
            }
            RouteOp::Add | RouteOp::Change => {
                let consistent = ours.ifp == route.ifp
                    && sa_equal(&ours.gateway, &route.gateway)
                    && ours.mtu == route.mtu;
                if consistent {
                    return ExternalChange::Unrelated;
                }
                info!("{}: {} replaced {}", ifname, originator, ours.summary());
                ExternalChange::Superseded
            }
        };

        store.remove(&key);
        self.arena.release(id);
        outcome
    }

    /// Drop every store entry on a departed interface. No kernel calls are
    /// made; the kernel removes routes along with the link.
    pub fn forget_interface(&mut self, ifp: InterfaceId) -> usize {
        let mut forgotten = 0;
        for store in self.stores.values_mut() {
            let gone: Vec<KernelKey> = store
                .iter()
                .filter(|(_, id)| self.arena.get(**id).is_some_and(|r| r.ifp == ifp))
                .map(|(key, _)| *key)
                .collect();
            for key in gone {
                if let Some(id) = store.remove(&key) {
                    self.arena.release(id);
                    forgotten += 1;
                }
            }
        }
        forgotten
    }

    /// Forget every managed route of a family.
    pub fn clear(&mut self, family: Family) {
        if let Some(store) = self.stores.remove(&family) {
            for id in store.into_values() {
                self.arena.release(id);
            }
        }
    }

    /// Mark the daemon as shutting down; persistent routes then survive passes.
    pub fn set_exiting(&mut self, exiting: bool) {
        self.exiting = exiting;
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting
    }

    /// Managed routes of a family, in kernel order.
    pub fn routes(&self, family: Family) -> impl Iterator<Item = &Route> {
        self.stores
            .get(&family)
            .into_iter()
            .flat_map(|store| store.values())
            .filter_map(|id| self.arena.get(*id))
    }

    pub fn arena(&self) -> &RouteArena {
        &self.arena
    }
}

/// Destination and gateway are of `family`, or unspecified.
fn in_family(route: &Route, family: Family) -> bool {
    let ok = |addr: &SockAddr| matches!(addr.family(), Family::Unspec) || addr.family() == family;
    ok(&route.dest) && ok(&route.gateway) && route.family() == family
}
