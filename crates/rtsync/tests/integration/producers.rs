//! Protocol producers driven through full passes.

use std::net::{Ipv4Addr, Ipv6Addr};

use rtsync::producer::{
    DelegatedPrefix, DelegatedPrefixes, DhcpLease, Ipv4llRoutes, Ipv4llState, LeaseRoutes,
    RaPrefix, RaRouter, RaRoutes, RouteProducer, RouterAdvert, dho,
};
use rtsync::route::RoutePreference;
use rtsync::{Family, Result, SimKernel};

use crate::common::{ETH0, ETH1, build_v4, default_routes, reconciler, two_links};

fn summaries(kernel: &SimKernel, family: Family) -> Vec<String> {
    let mut out: Vec<String> = kernel.routes_of(family).map(|r| r.summary()).collect();
    out.sort();
    out
}

fn eth0_lease() -> DhcpLease {
    let mut lease = DhcpLease::new(ETH0, Ipv4Addr::new(192, 0, 2, 10), 24);
    lease.options.insert(dho::MTU, 1480u16.to_be_bytes().to_vec());
    lease
}

#[test]
fn test_classless_routes_override_routers() -> Result<()> {
    let interfaces = two_links();
    let mut lease = eth0_lease();
    // 10/8 via our own address, then default via 192.0.2.1.
    lease.options.insert(
        dho::CSR,
        vec![8, 10, 192, 0, 2, 10, 0, 192, 0, 2, 1],
    );
    lease.options.insert(dho::ROUTER, vec![192, 0, 2, 99]);
    let producer = LeaseRoutes::new(vec![lease]);

    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    let report = build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;

    assert_eq!(report.added, 3);
    assert_eq!(
        summaries(&kernel, Family::Inet),
        ["10.0.0.0/32", "192.0.2.0/24", "default via 192.0.2.1"]
    );
    for route in kernel.routes() {
        assert_eq!(route.mtu, 1480);
        assert_eq!(route.pref_src.to_string(), "192.0.2.10");
    }
    let host = kernel
        .routes()
        .iter()
        .find(|r| r.is_host())
        .expect("host route installed");
    assert!(host.gateway.is_unspecified());
    Ok(())
}

#[test]
fn test_bad_classless_option_falls_back_to_routers() -> Result<()> {
    let interfaces = two_links();
    let mut lease = eth0_lease();
    // Prefix length 33 is invalid.
    lease.options.insert(dho::CSR, vec![33, 10, 0, 0, 0, 192, 0, 2, 1]);
    lease.options.insert(dho::ROUTER, vec![192, 0, 2, 1]);
    let producer = LeaseRoutes::new(vec![lease]);

    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;

    assert_eq!(
        summaries(&kernel, Family::Inet),
        ["192.0.2.0/24", "default via 192.0.2.1"]
    );
    Ok(())
}

#[test]
fn test_off_subnet_router_gets_host_route() -> Result<()> {
    let interfaces = two_links();
    let mut lease = eth0_lease();
    lease.options.insert(dho::ROUTER, vec![203, 0, 113, 1]);
    let producer = LeaseRoutes::new(vec![lease]);

    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    build_v4(&mut reconciler, &mut kernel, &producer, &interfaces)?;

    assert_eq!(
        summaries(&kernel, Family::Inet),
        ["192.0.2.0/24", "203.0.113.1/32", "default via 203.0.113.1"]
    );
    Ok(())
}

#[test]
fn test_fake_lease_never_touches_kernel() -> Result<()> {
    let interfaces = two_links();
    let mut lease = eth0_lease();
    lease.options.insert(dho::ROUTER, vec![192, 0, 2, 1]);
    let real = LeaseRoutes::new(vec![lease.clone()]);
    lease.fake = true;
    let fake = LeaseRoutes::new(vec![lease]);

    // Nothing installed: assumed routes are dropped.
    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    let report = build_v4(&mut reconciler, &mut kernel, &fake, &interfaces)?;
    assert!(kernel.calls().is_empty());
    assert_eq!(report.rejected, 2);
    assert_eq!(reconciler.routes(Family::Inet).count(), 0);

    // Installed by a previous run: adopted as is.
    let mut previous = crate::common::reconciler();
    build_v4(&mut previous, &mut kernel, &real, &interfaces)?;
    kernel.clear_calls();

    let mut restarted = crate::common::reconciler();
    let report = build_v4(&mut restarted, &mut kernel, &fake, &interfaces)?;
    assert!(kernel.calls().is_empty());
    assert_eq!(report.unchanged, 2);
    assert_eq!(restarted.routes(Family::Inet).count(), 2);

    // Once the lease is confirmed nothing changes either.
    let report = build_v4(&mut restarted, &mut kernel, &real, &interfaces)?;
    assert!(kernel.calls().is_empty());
    assert_eq!(report.unchanged, 2);
    Ok(())
}

#[test]
fn test_link_local_default_sorts_last() -> Result<()> {
    let interfaces = two_links();
    let ipv4ll = Ipv4llRoutes::new(vec![Ipv4llState {
        ifp: ETH0,
        addr: Ipv4Addr::new(169, 254, 7, 7),
        default_route: true,
    }]);
    let mut lease = DhcpLease::new(ETH1, Ipv4Addr::new(198, 51, 100, 10), 24);
    lease.options.insert(dho::ROUTER, vec![198, 51, 100, 1]);
    let dhcp = LeaseRoutes::new(vec![lease]);

    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    let producers: [&dyn RouteProducer; 2] = [&ipv4ll, &dhcp];
    reconciler.build(Family::Inet, &mut kernel, &producers, &interfaces)?;

    // eth0 has the better metric, but its default is link-local only.
    assert_eq!(
        default_routes(&kernel, Family::Inet),
        [(ETH1, "198.51.100.1".to_string())]
    );
    let linklocal = kernel
        .routes()
        .iter()
        .find(|r| r.summary() == "169.254.0.0/16")
        .expect("link-local subnet route");
    assert_eq!(linklocal.ifp, ETH0);
    assert_eq!(linklocal.metric, 100 + 1_000_000);
    Ok(())
}

#[test]
fn test_link_local_default_used_when_alone() -> Result<()> {
    let interfaces = two_links();
    let ipv4ll = Ipv4llRoutes::new(vec![Ipv4llState {
        ifp: ETH1,
        addr: Ipv4Addr::new(169, 254, 7, 7),
        default_route: true,
    }]);

    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    build_v4(&mut reconciler, &mut kernel, &ipv4ll, &interfaces)?;

    let default = kernel
        .routes_of(Family::Inet)
        .find(|r| r.is_default())
        .expect("link-local default route");
    assert_eq!(default.ifp, ETH1);
    assert!(default.gateway.is_unspecified());
    Ok(())
}

#[test]
fn test_ipv6_router_and_delegated_prefix() -> Result<()> {
    let interfaces = two_links();
    let ra = RaRoutes::new(vec![RouterAdvert {
        ifp: ETH0,
        routers: vec![RaRouter {
            addr: "fe80::1".parse::<Ipv6Addr>().expect("address"),
            preference: RoutePreference::High,
        }],
        prefixes: vec![RaPrefix {
            prefix: "2001:db8:1::".parse().expect("address"),
            prefix_len: 64,
            onlink: true,
        }],
        mtu: 1500,
    }]);
    let pd = DelegatedPrefixes::new(vec![DelegatedPrefix {
        ifp: ETH1,
        prefix: "2001:db8:100::".parse().expect("address"),
        prefix_len: 48,
        no_reject: false,
    }]);
    let producers: [&dyn RouteProducer; 2] = [&ra, &pd];

    let mut kernel = SimKernel::linux();
    let mut reconciler = reconciler();
    let v4 = reconciler.build(Family::Inet, &mut kernel, &producers, &interfaces)?;
    assert_eq!(v4.kernel_calls, 0);

    let v6 = reconciler.build(Family::Inet6, &mut kernel, &producers, &interfaces)?;
    assert_eq!(v6.added, 3);
    assert_eq!(
        summaries(&kernel, Family::Inet6),
        ["2001:db8:100::/48 via ::1", "2001:db8:1::/64", "default via fe80::1"]
    );

    let default = kernel
        .routes_of(Family::Inet6)
        .find(|r| r.is_default())
        .expect("default route");
    assert_eq!(default.pref, Some(RoutePreference::High));
    let reject = kernel
        .routes_of(Family::Inet6)
        .find(|r| r.is_reject())
        .expect("reject route");
    assert_eq!(reject.ifp, ETH1);
    Ok(())
}
