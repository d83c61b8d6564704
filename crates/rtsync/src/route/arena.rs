//! Route record storage with bounded slot recycling.

use std::fmt;

use crate::error::{Error, Result};
use crate::interface::Interface;

use super::Route;

/// Handle to a route record in a [`RouteArena`].
///
/// Every allocation gets a fresh generation, so an id kept past
/// [`RouteArena::release`] resolves to `None` rather than to whatever
/// record reused the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteId {
    index: u32,
    generation: u64,
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
enum Slot {
    Occupied { generation: u64, route: Route },
    Vacant,
}

/// Owns every route record.
#[derive(Debug)]
pub struct RouteArena {
    slots: Vec<Slot>,
    vacant: Vec<u32>,
    live: usize,
    next_generation: u64,
    max_routes: Option<usize>,
    pool_size: usize,
}

impl RouteArena {
    /// `max_routes` caps live records; `pool_size` caps recycled vacant slots.
    pub fn new(max_routes: Option<usize>, pool_size: usize) -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            live: 0,
            next_generation: 0,
            max_routes,
            pool_size,
        }
    }

    /// Allocate a route bound to `iface` with its default metric.
    pub fn new_route(&mut self, iface: &Interface) -> Result<RouteId> {
        let mut route = Route::new(iface.index);
        route.metric = iface.route_metric();
        self.insert(route)
    }

    /// Store an already-built route.
    pub fn insert(&mut self, route: Route) -> Result<RouteId> {
        if let Some(limit) = self.max_routes
            && self.live >= limit
        {
            return Err(Error::AllocationFailure { limit });
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let slot = Slot::Occupied { generation, route };

        let index = match self.vacant.pop() {
            Some(index) => {
                self.slots[index as usize] = slot;
                index
            }
            None => {
                self.slots.push(slot);
                (self.slots.len() - 1) as u32
            }
        };
        self.live += 1;
        Ok(RouteId { index, generation })
    }

    /// Release a record, returning it. Stale ids return `None`.
    pub fn release(&mut self, id: RouteId) -> Option<Route> {
        let slot = self.slots.get_mut(id.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == id.generation => {}
            _ => return None,
        }

        let Slot::Occupied { route, .. } = std::mem::replace(slot, Slot::Vacant) else {
            return None;
        };
        self.live -= 1;
        self.vacant.push(id.index);
        self.trim();
        Some(route)
    }

    /// Drop vacant slots from the tail while more than `pool_size` are kept.
    fn trim(&mut self) {
        while self.vacant.len() > self.pool_size
            && matches!(self.slots.last(), Some(Slot::Vacant))
        {
            self.slots.pop();
            let tail = self.slots.len() as u32;
            self.vacant.retain(|&index| index != tail);
        }
    }

    /// Rebind a record to `iface`, re-deriving its default metric.
    pub fn rebind_interface(&mut self, id: RouteId, iface: &Interface) -> bool {
        match self.get_mut(id) {
            Some(route) => {
                route.ifp = iface.index;
                route.metric = iface.route_metric();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: RouteId) -> Option<&Route> {
        match self.slots.get(id.index as usize)? {
            Slot::Occupied { generation, route } if *generation == id.generation => Some(route),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: RouteId) -> Option<&mut Route> {
        match self.slots.get_mut(id.index as usize)? {
            Slot::Occupied { generation, route } if *generation == id.generation => Some(route),
            _ => None,
        }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of vacant slots waiting for reuse.
    pub fn vacant_len(&self) -> usize {
        self.vacant.len()
    }
}

impl Default for RouteArena {
    fn default() -> Self {
        Self::new(None, 64)
    }
}
