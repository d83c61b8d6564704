//! Reconciliation pass properties against the simulated Linux kernel.

use std::collections::BTreeSet;

use rtsync::producer::RouteProducer;
use rtsync::route::IdentityKey;
use rtsync::{
    Carrier, Error, Family, InterfaceId, Reconciler, ReconcilerOptions, Result, RouteOp, SimKernel,
};

use crate::common::{
    Broken, ETH0, ETH1, TEST_PID, build_v4, default_routes, kernel_route, ops, reconciler,
    statics, two_links,
};

#[test]
fn test_second_pass_issues_no_calls() -> Result<()> {
    let interfaces = two_links();
    let producer = statics(&[
        (ETH0, "default via 192.0.2.1"),
        (ETH0, "10.0.0.0/8 via 192.0.2.254 mtu 1400"),
        (ETH1, "198.51.100.0/24 src 198.51.100.7"),
    ]);
    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();

    let first = build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;
    assert_eq!(first.added, 3);
    assert_eq!(kernel.routes().len(), 3);

    kernel.clear_calls();
    let second = build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;
    assert_eq!(second.kernel_calls, 0);
    assert_eq!(second.unchanged, 3);
    assert!(kernel.calls().is_empty());
    Ok(())
}

#[test]
fn test_lowest_metric_default_wins() -> Result<()> {
    let interfaces = two_links();
    // Registration order must not matter: eth1 comes first here.
    let producer = statics(&[
        (ETH1, "default via 198.51.100.1"),
        (ETH0, "default via 192.0.2.1"),
    ]);
    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();

    build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;
    assert_eq!(
        default_routes(&kernel, Family::Inet),
        [(ETH0, "192.0.2.1".to_string())]
    );
    Ok(())
}

#[test]
fn test_carrier_loss_moves_default_route() -> Result<()> {
    let mut interfaces = two_links();
    let producer = statics(&[
        (ETH0, "default via 192.0.2.1"),
        (ETH1, "default via 198.51.100.1"),
    ]);
    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;

    if let Some(eth0) = interfaces.get_mut(ETH0) {
        eth0.carrier = Carrier::Down;
    }
    kernel.clear_calls();
    let report = build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;

    assert_eq!(
        default_routes(&kernel, Family::Inet),
        [(ETH1, "198.51.100.1".to_string())]
    );
    assert_eq!(report.added, 1);
    assert_eq!(report.deleted, 1);
    let deleted: Vec<_> = kernel
        .calls()
        .iter()
        .filter(|c| c.op == RouteOp::Delete)
        .map(|c| c.route.ifp)
        .collect();
    assert_eq!(deleted, [ETH0]);
    Ok(())
}

#[test]
fn test_installed_host_route_left_alone() -> Result<()> {
    let interfaces = two_links();
    let mut kernel = SimKernel::linux();
    kernel.install(kernel_route(ETH0, "203.0.113.5/32 via 192.0.2.1 mtu 1500", 100));

    let producer = statics(&[(ETH0, "203.0.113.5/32 via 192.0.2.1 mtu 1500")]);
    let mut reconciler = reconciler();
    let report = build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;

    assert!(kernel.calls().is_empty());
    assert_eq!(report.unchanged, 1);
    assert_eq!(reconciler.routes(Family::Inet).count(), 1);
    Ok(())
}

#[test]
fn test_one_store_entry_per_prefix() -> Result<()> {
    let interfaces = two_links();
    let producer = statics(&[
        (ETH0, "10.0.0.0/8 via 192.0.2.1"),
        (ETH1, "10.0.0.0/8 via 198.51.100.1"),
        (ETH0, "default via 192.0.2.1"),
        (ETH1, "default via 198.51.100.1"),
        (ETH0, "0.0.0.0/0 via 192.0.2.2"),
    ]);
    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;

    let keys: Vec<IdentityKey> = reconciler.routes(Family::Inet).map(IdentityKey::new).collect();
    let unique: BTreeSet<_> = keys.iter().copied().collect();
    assert_eq!(keys.len(), unique.len());
    assert_eq!(keys.len(), 2);
    assert!(
        reconciler
            .routes(Family::Inet)
            .all(|r| r.ifp == ETH0 && r.gateway.to_string() == "192.0.2.1")
    );
    Ok(())
}

#[test]
fn test_withdrawn_route_is_deleted() -> Result<()> {
    let interfaces = two_links();
    let both = statics(&[
        (ETH0, "default via 192.0.2.1"),
        (ETH0, "10.0.0.0/8 via 192.0.2.254"),
    ]);
    let one = statics(&[(ETH0, "default via 192.0.2.1")]);
    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();

    build_v4(&mut reconciler, &mut kernel, &both, &interfaces)?;
    kernel.clear_calls();
    let report = build_v4(&mut reconciler, &mut kernel, &one, &interfaces)?;

    assert_eq!(ops(&kernel), [RouteOp::Delete]);
    assert_eq!(report.deleted, 1);
    assert_eq!(kernel.routes().len(), 1);
    assert_eq!(reconciler.routes(Family::Inet).count(), 1);
    Ok(())
}

#[test]
fn test_persistent_routes_survive_exit() -> Result<()> {
    let mut interfaces = two_links();
    if let Some(eth0) = interfaces.get_mut(ETH0) {
        eth0.options.persistent = true;
    }
    let producer = statics(&[
        (ETH0, "default via 192.0.2.1"),
        (ETH1, "198.51.100.0/24"),
    ]);
    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;

    reconciler.set_exiting(true);
    kernel.clear_calls();
    let none: [&dyn RouteProducer; 0] = [];
    let report = reconciler.build(Family::Inet, &mut kernel, &none, &interfaces)?;

    // eth0 is persistent, eth1 is not.
    assert_eq!(report.deleted, 1);
    assert_eq!(ops(&kernel), [RouteOp::Delete]);
    assert_eq!(
        default_routes(&kernel, Family::Inet),
        [(ETH0, "192.0.2.1".to_string())]
    );
    assert_eq!(reconciler.routes(Family::Inet).count(), 0);
    assert!(reconciler.arena().is_empty());
    Ok(())
}

#[test]
fn test_snapshot_failure_keeps_store() -> Result<()> {
    let interfaces = two_links();
    let producer = statics(&[(ETH0, "default via 192.0.2.1")]);
    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;

    kernel.fail_dump(5);
    kernel.clear_calls();
    let err = build_v4(&mut reconciler, &mut kernel, &producer, &interfaces).unwrap_err();
    assert!(matches!(err, Error::Snapshot { family: Family::Inet, .. }));
    assert_eq!(err.errno(), Some(5));
    assert!(kernel.calls().is_empty());
    assert_eq!(reconciler.routes(Family::Inet).count(), 1);

    let report = build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;
    assert_eq!(report.kernel_calls, 0);
    Ok(())
}

#[test]
fn test_allocation_limit_aborts_pass() -> Result<()> {
    let interfaces = two_links();
    let producer = statics(&[
        (ETH0, "default via 192.0.2.1"),
        (ETH0, "10.0.0.0/8 via 192.0.2.254"),
    ]);
    let mut kernel = SimKernel::linux();
    let mut reconciler = Reconciler::new(ReconcilerOptions {
        max_routes: Some(1),
        pid: TEST_PID,
        ..Default::default()
    });

    let err = build_v4(&mut reconciler, &mut kernel, &producer, &interfaces).unwrap_err();
    assert!(matches!(err, Error::AllocationFailure { limit: 1 }));
    assert!(kernel.calls().is_empty());
    assert!(reconciler.arena().is_empty());
    assert_eq!(reconciler.routes(Family::Inet).count(), 0);
    Ok(())
}

#[test]
fn test_producer_failure_keeps_store() -> Result<()> {
    let interfaces = two_links();
    let good = statics(&[(ETH0, "default via 192.0.2.1")]);
    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    build_v4(&mut reconciler, &mut kernel, &good, &interfaces)?;

    kernel.clear_calls();
    let producers: [&dyn RouteProducer; 2] = [&good, &Broken];
    let err = reconciler
        .build(Family::Inet, &mut kernel, &producers, &interfaces)
        .unwrap_err();
    match err {
        Error::Producer { producer, .. } => assert_eq!(producer, "broken"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(kernel.calls().is_empty());
    assert_eq!(reconciler.routes(Family::Inet).count(), 1);
    Ok(())
}

#[test]
fn test_failed_add_retried_next_pass() -> Result<()> {
    let interfaces = two_links();
    let producer = statics(&[(ETH0, "default via 192.0.2.1")]);
    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();

    kernel.fail_next(RouteOp::Add, 1);
    let report = build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;
    assert_eq!(report.failed, 1);
    assert!(kernel.routes().is_empty());
    assert_eq!(reconciler.routes(Family::Inet).count(), 0);

    let report = build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;
    assert_eq!(report.added, 1);
    assert_eq!(kernel.routes().len(), 1);
    Ok(())
}

#[test]
fn test_gateway_option_blocks_default_route() -> Result<()> {
    let mut interfaces = two_links();
    if let Some(eth0) = interfaces.get_mut(ETH0) {
        eth0.options.gateway = false;
    }
    let producer = statics(&[
        (ETH0, "default via 192.0.2.1"),
        (ETH0, "10.0.0.0/8 via 192.0.2.1"),
    ]);
    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    let report = build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;

    assert_eq!(report.rejected, 1);
    assert_eq!(report.added, 1);
    assert!(default_routes(&kernel, Family::Inet).is_empty());
    Ok(())
}

#[test]
fn test_unconfigured_interface_ignored() -> Result<()> {
    let mut interfaces = two_links();
    if let Some(eth1) = interfaces.get_mut(ETH1) {
        eth1.options.configure = false;
    }
    let producer = statics(&[(ETH1, "default via 198.51.100.1")]);
    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;

    assert!(kernel.calls().is_empty());
    assert!(reconciler.arena().is_empty());
    Ok(())
}

#[test]
fn test_foreign_interface_routes_untouched() -> Result<()> {
    let interfaces = two_links();
    let mut kernel = SimKernel::linux();
    kernel.install(kernel_route(InterfaceId(9), "default via 203.0.113.1", 0));

    let producer = statics(&[(ETH0, "10.0.0.0/8 via 192.0.2.1")]);
    let mut reconciler = reconciler();
    build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;

    assert_eq!(ops(&kernel), [RouteOp::Add]);
    assert_eq!(kernel.routes().len(), 2);
    Ok(())
}
