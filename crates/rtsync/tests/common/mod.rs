//! Shared fixtures for integration tests.

#![allow(dead_code)]

use rtsync::producer::{RouteProducer, RouteSink, StaticRoute, StaticRoutes};
use rtsync::{
    BuildReport, Carrier, Family, Interface, InterfaceId, InterfaceTable, Reconciler,
    ReconcilerOptions, Result, Route, RouteOp, SimKernel,
};

/// Process id the test reconcilers pretend to run as.
pub const TEST_PID: u32 = 4242;

pub const ETH0: InterfaceId = InterfaceId(2);
pub const ETH1: InterfaceId = InterfaceId(3);

/// eth0 (metric 100) and eth1 (metric 200), both with carrier.
pub fn two_links() -> InterfaceTable {
    [
        Interface::new("eth0", 2).with_metric(100).with_carrier(Carrier::Up),
        Interface::new("eth1", 3).with_metric(200).with_carrier(Carrier::Up),
    ]
    .into_iter()
    .collect()
}

pub fn reconciler() -> Reconciler {
    Reconciler::new(ReconcilerOptions {
        pid: TEST_PID,
        ..Default::default()
    })
}

/// Static routes from `(interface, "ip route" string)` pairs.
pub fn statics(routes: &[(InterfaceId, &str)]) -> StaticRoutes {
    let mut producer = StaticRoutes::new();
    for (ifp, route) in routes {
        let route: StaticRoute = route.parse().expect("valid static route");
        producer.add(*ifp, route);
    }
    producer
}

/// One IPv4 pass with a single producer.
pub fn build_v4(
    reconciler: &mut Reconciler,
    kernel: &mut SimKernel,
    producer: &dyn RouteProducer,
    interfaces: &InterfaceTable,
) -> Result<BuildReport> {
    reconciler.build(Family::Inet, kernel, &[producer], interfaces)
}

/// `(interface, gateway)` of every default route in the kernel.
pub fn default_routes(kernel: &SimKernel, family: Family) -> Vec<(InterfaceId, String)> {
    kernel
        .routes_of(family)
        .filter(|r| r.is_default())
        .map(|r| (r.ifp, r.gateway.to_string()))
        .collect()
}

/// Operations issued since the last `clear_calls`.
pub fn ops(kernel: &SimKernel) -> Vec<RouteOp> {
    kernel.calls().iter().map(|c| c.op).collect()
}

/// A route the way the kernel would report it.
pub fn kernel_route(ifp: InterfaceId, text: &str, metric: u32) -> Route {
    let parsed: StaticRoute = text.parse().expect("valid route");
    let mut route = Route::new(ifp);
    parsed.apply_to(&mut route).expect("applicable route");
    route.origin = Default::default();
    route.metric = parsed.metric.unwrap_or(metric);
    route
}

/// Producer that always fails.
pub struct Broken;

impl RouteProducer for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn routes(
        &self,
        _family: Family,
        _interfaces: &InterfaceTable,
        _sink: &mut RouteSink<'_>,
    ) -> Result<()> {
        Err(rtsync::Error::Config("lease state corrupt".into()))
    }
}
