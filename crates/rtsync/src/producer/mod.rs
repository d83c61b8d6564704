//! Protocol route producers.
//!
//! Each protocol module that wants routes implements [`RouteProducer`] and
//! pushes candidates into a [`RouteSink`] during a reconciliation pass. The
//! sink allocates the record, stamps it with a sequence number and files it
//! under its priority key.

mod delegated;
mod ipv4ll;
mod lease;
mod ra;
mod static_routes;

use std::collections::BTreeMap;

use tracing::debug;

use crate::addr::Family;
use crate::error::{Error, Result};
use crate::interface::{InterfaceId, InterfaceTable};
use crate::route::{PriorityKey, Route, RouteArena, RouteId, Seq};

pub use delegated::{DelegatedPrefix, DelegatedPrefixes};
pub use ipv4ll::{Ipv4llRoutes, Ipv4llState, LINKLOCAL_PREFIX};
pub use lease::{
    DhcpLease, LeaseRoutes, OptionError, ParsedRoute, decode_classless, decode_routers,
    decode_static_routes, dho,
};
pub use ra::{RaPrefix, RaRouter, RaRoutes, RouterAdvert};
pub use static_routes::{StaticRoute, StaticRoutes};

/// A source of candidate routes.
pub trait RouteProducer {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Push every route this producer wants for `family`.
    ///
    /// Producers may push routes of other families; the reconciler filters.
    fn routes(
        &self,
        family: Family,
        interfaces: &InterfaceTable,
        sink: &mut RouteSink<'_>,
    ) -> Result<()>;
}

/// Collects candidate routes for one pass in priority order.
pub struct RouteSink<'a> {
    arena: &'a mut RouteArena,
    interfaces: &'a InterfaceTable,
    next_seq: &'a mut u64,
    candidates: BTreeMap<PriorityKey, RouteId>,
}

impl<'a> RouteSink<'a> {
    pub(crate) fn new(
        arena: &'a mut RouteArena,
        interfaces: &'a InterfaceTable,
        next_seq: &'a mut u64,
    ) -> Self {
        Self {
            arena,
            interfaces,
            next_seq,
            candidates: BTreeMap::new(),
        }
    }

    /// Allocate a route on `ifp`, let `build` fill it in, and queue it.
    ///
    /// Routes on interfaces missing from the table are skipped and yield
    /// `None`; only allocation failure is an error.
    pub fn push<F>(&mut self, ifp: InterfaceId, build: F) -> Result<Option<RouteId>>
    where
        F: FnOnce(&mut Route),
    {
        let interfaces = self.interfaces;
        let Some(iface) = interfaces.get(ifp) else {
            debug!("{}: interface not in table, skipping route", ifp);
            return Ok(None);
        };
        let id = self.arena.new_route(iface)?;

        *self.next_seq += 1;
        let seq = Seq(*self.next_seq);
        let Some(route) = self.arena.get_mut(id) else {
            return Err(Error::AllocationFailure {
                limit: self.arena.len(),
            });
        };
        build(route);
        route.seq = seq;

        let key = PriorityKey::new(route, iface);
        self.candidates.insert(key, id);
        Ok(Some(id))
    }

    /// Like [`push`](Self::push) but for a builder that can fail. A failed
    /// build releases the record.
    pub fn try_push<F>(&mut self, ifp: InterfaceId, build: F) -> Result<Option<RouteId>>
    where
        F: FnOnce(&mut Route) -> Result<()>,
    {
        let mut outcome = Ok(());
        let Some(id) = self.push(ifp, |rt| outcome = build(rt))? else {
            return Ok(None);
        };
        if let Err(e) = outcome {
            self.discard(id);
            return Err(e);
        }
        Ok(Some(id))
    }

    fn discard(&mut self, id: RouteId) {
        self.candidates.retain(|_, v| *v != id);
        self.arena.release(id);
    }

    /// Number of queued candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub(crate) fn into_candidates(self) -> BTreeMap<PriorityKey, RouteId> {
        self.candidates
    }

    /// Release every queued candidate.
    pub(crate) fn abandon(self) {
        for id in self.candidates.into_values() {
            self.arena.release(id);
        }
    }
}
