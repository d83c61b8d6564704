//! Daemon event loop.
//!
//! Every trigger that can change the wanted route set is delivered as a
//! [`DaemonEvent`] on one channel and handled to completion before the next
//! one is read, so the reconciler is never re-entered.
//!
//! ```
//! use rtsync::events::{DaemonEvent, EventLoop};
//! use rtsync::{Interface, InterfaceTable, Reconciler, SimKernel};
//! use tokio::sync::mpsc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let interfaces: InterfaceTable = [Interface::new("eth0", 2)].into_iter().collect();
//! let daemon = EventLoop::new(Reconciler::default(), SimKernel::linux(), interfaces);
//!
//! let (tx, rx) = mpsc::channel(16);
//! tx.send(DaemonEvent::RebuildAll).await.unwrap();
//! tx.send(DaemonEvent::Exit).await.unwrap();
//!
//! let daemon = daemon.run(rx).await;
//! assert!(daemon.reconciler().is_exiting());
//! # }
//! ```

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

use crate::addr::Family;
use crate::backend::{KernelBackend, RouteOp};
use crate::error::Result;
use crate::interface::{Carrier, InterfaceId, InterfaceTable};
use crate::producer::RouteProducer;
use crate::reconcile::{BuildReport, ExternalChange, Originator, Reconciler};
use crate::route::Route;

/// Something the daemon has to react to.
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    /// Recompute routes for one family.
    Rebuild(Family),
    /// Recompute routes for every family.
    RebuildAll,
    /// Link carrier changed.
    Carrier { ifp: InterfaceId, carrier: Carrier },
    /// Wireless roaming started or finished.
    Roaming { ifp: InterfaceId, roaming: bool },
    /// Link removed from the system.
    InterfaceDeparted(InterfaceId),
    /// Route notification from the kernel.
    ExternalRoute {
        op: RouteOp,
        route: Route,
        originator: Originator,
    },
    /// Shut down, removing routes that are not persistent.
    Exit,
}

/// Whether the loop keeps going after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Owns the reconciler, the kernel backend and everything producers need.
pub struct EventLoop<B> {
    reconciler: Reconciler,
    backend: B,
    producers: Vec<Box<dyn RouteProducer>>,
    interfaces: InterfaceTable,
    totals: BuildReport,
}

impl<B: KernelBackend> EventLoop<B> {
    pub fn new(reconciler: Reconciler, backend: B, interfaces: InterfaceTable) -> Self {
        Self {
            reconciler,
            backend,
            producers: Vec::new(),
            interfaces,
            totals: BuildReport::default(),
        }
    }

    /// Register a producer; producers are consulted in registration order.
    pub fn with_producer(mut self, producer: Box<dyn RouteProducer>) -> Self {
        self.producers.push(producer);
        self
    }

    pub fn with_producers(mut self, producers: Vec<Box<dyn RouteProducer>>) -> Self {
        self.producers.extend(producers);
        self
    }

    pub fn producers_mut(&mut self) -> &mut Vec<Box<dyn RouteProducer>> {
        &mut self.producers
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn interfaces(&self) -> &InterfaceTable {
        &self.interfaces
    }

    /// Sum of every pass report so far.
    pub fn totals(&self) -> &BuildReport {
        &self.totals
    }

    fn rebuild(&mut self, family: Option<Family>) -> Result<BuildReport> {
        let producers: Vec<&dyn RouteProducer> = self.producers.iter().map(|p| p.as_ref()).collect();
        let report = match family {
            Some(family) => {
                self.reconciler
                    .build(family, &mut self.backend, &producers, &self.interfaces)?
            }
            None => self
                .reconciler
                .build_all(&mut self.backend, &producers, &self.interfaces)?,
        };
        self.totals.merge(&report);
        Ok(report)
    }

    /// Handle one event to completion.
    pub fn handle(&mut self, event: DaemonEvent) -> Result<Flow> {
        match event {
            DaemonEvent::Rebuild(family) => {
                self.rebuild(Some(family))?;
            }
            DaemonEvent::RebuildAll => {
                self.rebuild(None)?;
            }
            DaemonEvent::Carrier { ifp, carrier } => {
                let Some(iface) = self.interfaces.get_mut(ifp) else {
                    debug!("{}: carrier change for unknown interface", ifp);
                    return Ok(Flow::Continue);
                };
                if iface.carrier == carrier {
                    return Ok(Flow::Continue);
                }
                info!("{}: carrier {:?}", iface.name, carrier);
                iface.carrier = carrier;
                self.rebuild(None)?;
            }
            DaemonEvent::Roaming { ifp, roaming } => {
                let Some(iface) = self.interfaces.get_mut(ifp) else {
                    return Ok(Flow::Continue);
                };
                if iface.roaming == roaming {
                    return Ok(Flow::Continue);
                }
                iface.roaming = roaming;
                self.rebuild(None)?;
            }
            DaemonEvent::InterfaceDeparted(ifp) => {
                let forgotten = self.reconciler.forget_interface(ifp);
                if let Some(iface) = self.interfaces.remove(ifp) {
                    info!("{}: departed, forgetting {} routes", iface.name, forgotten);
                }
                self.rebuild(None)?;
            }
            DaemonEvent::ExternalRoute {
                op,
                route,
                originator,
            } => {
                let change = self.reconciler.on_external_route_change(
                    op,
                    &route,
                    originator,
                    &self.interfaces,
                );
                if matches!(change, ExternalChange::Removed | ExternalChange::Superseded) {
                    debug!("{}: store entry dropped", route.summary());
                }
            }
            DaemonEvent::Exit => {
                self.reconciler.set_exiting(true);
                let producers: [&dyn RouteProducer; 0] = [];
                for family in Family::ALL {
                    let report =
                        self.reconciler
                            .build(family, &mut self.backend, &producers, &self.interfaces)?;
                    self.totals.merge(&report);
                }
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    /// Consume events until [`DaemonEvent::Exit`] or the sender goes away.
    ///
    /// Pass failures are logged and the loop keeps running.
    pub async fn run(mut self, rx: mpsc::Receiver<DaemonEvent>) -> Self {
        let mut events = ReceiverStream::new(rx);
        while let Some(event) = events.next().await {
            match self.handle(event) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) => error!("route pass failed: {}", e),
            }
        }
        self
    }
}
