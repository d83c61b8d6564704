//! Platform quirks: metric support, cloning routes, multipath, miss filters.

use rtsync::{Capabilities, Family, InterfaceId, Result, RouteOp, SimKernel};

use crate::common::{
    ETH0, build_v4, default_routes, kernel_route, ops, reconciler, statics, two_links,
};

#[test]
fn test_linux_changes_route_in_place() -> Result<()> {
    let interfaces = two_links();
    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    build_v4(
        &mut reconciler,
        &mut kernel,
        &statics(&[(ETH0, "10.0.0.0/8 via 192.0.2.1")]),
        &interfaces,
    )?;

    kernel.clear_calls();
    let report = build_v4(
        &mut reconciler,
        &mut kernel,
        &statics(&[(ETH0, "10.0.0.0/8 via 192.0.2.1 mtu 1400")]),
        &interfaces,
    )?;

    assert_eq!(ops(&kernel), [RouteOp::Change]);
    assert_eq!(report.changed, 1);
    assert_eq!(kernel.routes()[0].mtu, 1400);
    Ok(())
}

#[test]
fn test_change_of_vanished_route_falls_back() -> Result<()> {
    let interfaces = two_links();
    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    build_v4(
        &mut reconciler,
        &mut kernel,
        &statics(&[(ETH0, "10.0.0.0/8 via 192.0.2.1")]),
        &interfaces,
    )?;

    kernel.clear_calls();
    kernel.fail_next(RouteOp::Change, 3);
    let report = build_v4(
        &mut reconciler,
        &mut kernel,
        &statics(&[(ETH0, "10.0.0.0/8 via 192.0.2.1 mtu 1400")]),
        &interfaces,
    )?;

    // ADD collides with the old route, so it is deleted and added again.
    assert_eq!(
        ops(&kernel),
        [RouteOp::Change, RouteOp::Add, RouteOp::Delete, RouteOp::Add]
    );
    assert_eq!(report.added, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(kernel.routes().len(), 1);
    assert_eq!(kernel.routes()[0].mtu, 1400);
    Ok(())
}

#[test]
fn test_linux_adds_new_metric_before_delete() -> Result<()> {
    let mut interfaces = two_links();
    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    let producer = statics(&[(ETH0, "default via 192.0.2.1")]);
    build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;

    if let Some(eth0) = interfaces.get_mut(ETH0) {
        eth0.metric = 50;
    }
    kernel.clear_calls();
    build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;

    // New metric, new kernel key: add first, then drop the old one.
    assert_eq!(ops(&kernel), [RouteOp::Add, RouteOp::Delete]);
    let routes = kernel.routes();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].metric, 50);
    Ok(())
}

#[test]
fn test_bsd_deletes_then_adds() -> Result<()> {
    let interfaces = two_links();
    let mut kernel = SimKernel::bsd();
    let mut reconciler = reconciler();
    build_v4(
        &mut reconciler,
        &mut kernel,
        &statics(&[(ETH0, "default via 192.0.2.1")]),
        &interfaces,
    )?;

    kernel.clear_calls();
    let report = build_v4(
        &mut reconciler,
        &mut kernel,
        &statics(&[(ETH0, "default via 192.0.2.2")]),
        &interfaces,
    )?;

    assert_eq!(ops(&kernel), [RouteOp::Delete, RouteOp::Add]);
    assert_eq!(report.added, 1);
    assert_eq!(
        default_routes(&kernel, Family::Inet),
        [(ETH0, "192.0.2.2".to_string())]
    );
    Ok(())
}

#[test]
fn test_bsd_conflict_with_foreign_route_not_adopted() -> Result<()> {
    let interfaces = two_links();
    let mut kernel = SimKernel::bsd();
    kernel.install(kernel_route(InterfaceId(9), "default via 203.0.113.1", 0));

    let mut reconciler = reconciler();
    let report = build_v4(
        &mut reconciler,
        &mut kernel,
        &statics(&[(ETH0, "default via 192.0.2.1")]),
        &interfaces,
    )?;
    assert_eq!(ops(&kernel), [RouteOp::Add]);
    assert_eq!(report.added, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(reconciler.routes(Family::Inet).count(), 0);

    // Nothing of ours to remove on the way out.
    reconciler.set_exiting(true);
    kernel.clear_calls();
    reconciler.build(Family::Inet, &mut kernel, &[], &interfaces)?;
    assert!(kernel.calls().is_empty());
    assert_eq!(
        default_routes(&kernel, Family::Inet),
        [(InterfaceId(9), "203.0.113.1".to_string())]
    );
    Ok(())
}

#[test]
fn test_bsd_metric_is_not_a_difference() -> Result<()> {
    let mut interfaces = two_links();
    let mut kernel = SimKernel::bsd();
    let mut reconciler = reconciler();
    let producer = statics(&[(ETH0, "default via 192.0.2.1")]);
    build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;

    if let Some(eth0) = interfaces.get_mut(ETH0) {
        eth0.metric = 50;
    }
    kernel.clear_calls();
    let report = build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;

    assert!(kernel.calls().is_empty());
    assert_eq!(report.unchanged, 1);
    Ok(())
}

#[test]
fn test_cloning_route_is_replaced_not_changed() -> Result<()> {
    let interfaces = two_links();
    let mut cloning = kernel_route(ETH0, "192.0.2.0/24", 0);
    cloning.flags.cloning = true;

    let mut kernel = SimKernel::bsd();
    kernel.install(cloning.clone());
    let mut reconciler = reconciler();
    build_v4(
        &mut reconciler,
        &mut kernel,
        &statics(&[(ETH0, "192.0.2.0/24 mtu 1400")]),
        &interfaces,
    )?;
    assert_eq!(ops(&kernel), [RouteOp::Delete, RouteOp::Add]);

    let caps = Capabilities {
        supports_change_on_cloning: true,
        ..Capabilities::bsd()
    };
    let mut kernel = SimKernel::new(caps);
    kernel.install(cloning);
    let mut fresh = crate::common::reconciler();
    build_v4(
        &mut fresh,
        &mut kernel,
        &statics(&[(ETH0, "192.0.2.0/24 mtu 1400")]),
        &interfaces,
    )?;
    assert_eq!(ops(&kernel), [RouteOp::Change]);
    Ok(())
}

#[test]
fn test_multipath_drains_every_gateway() -> Result<()> {
    let interfaces = two_links();
    let mut kernel = SimKernel::new(Capabilities::bsd_multipath());
    kernel.install(kernel_route(ETH0, "10.0.0.0/8 via 192.0.2.1", 0));
    kernel.install(kernel_route(ETH0, "10.0.0.0/8 via 192.0.2.2", 0));

    let mut reconciler = reconciler();
    build_v4(
        &mut reconciler,
        &mut kernel,
        &statics(&[(ETH0, "10.0.0.0/8 via 192.0.2.3")]),
        &interfaces,
    )?;

    assert_eq!(
        ops(&kernel),
        [RouteOp::Delete, RouteOp::Delete, RouteOp::Delete, RouteOp::Add]
    );
    let gateways: Vec<String> = kernel.routes().iter().map(|r| r.gateway.to_string()).collect();
    assert_eq!(gateways, ["192.0.2.3"]);
    Ok(())
}

#[test]
fn test_miss_filter_lists_default_gateways() -> Result<()> {
    let interfaces = two_links();
    let mut kernel = SimKernel::linux().with_miss_filter();
    let mut reconciler = reconciler();
    build_v4(
        &mut reconciler,
        &mut kernel,
        &statics(&[
            (ETH0, "default via 192.0.2.1"),
            (ETH0, "10.0.0.0/8 via 192.0.2.254"),
        ]),
        &interfaces,
    )?;

    let filter: Vec<String> = kernel
        .miss_filter()
        .unwrap_or_default()
        .iter()
        .map(|a| a.to_string())
        .collect();
    assert_eq!(filter, ["192.0.2.1"]);
    Ok(())
}
