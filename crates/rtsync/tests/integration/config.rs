//! Configuration files driving full passes.

use rtsync::producer::RouteProducer;
use rtsync::{Config, Family, Reconciler, Result, SimKernel};

const HOME_ROUTER: &str = r#"
options:
  persistent: false
interfaces:
  - name: eth0
    index: 2
    metric: 100
    carrier: up
    routes:
      - "10.0.0.0/8 via 192.0.2.254 mtu 1400"
  - name: wlan0
    index: 3
    wireless: true
    carrier: up
leases:
  - interface: eth0
    address: 192.0.2.10/24
    routers: [192.0.2.1]
  - interface: wlan0
    address: 198.51.100.20/24
    routers: [198.51.100.1]
ra:
  - interface: eth0
    routers:
      - address: "fe80::1"
        preference: high
    prefixes: ["2001:db8:1::/64"]
delegated:
  - interface: eth0
    prefix: "2001:db8:100::/48"
"#;

#[test]
fn test_config_builds_expected_table() -> Result<()> {
    let config = Config::from_yaml_str(HOME_ROUTER)?;
    let interfaces = config.interface_table();
    let producers = config.producers(&interfaces)?;
    let producers: Vec<&dyn RouteProducer> = producers.iter().map(|p| p.as_ref()).collect();

    let mut kernel = SimKernel::linux();
    let mut reconciler = Reconciler::new(config.reconciler_options());
    let report = reconciler.build_all(&mut kernel, &producers, &interfaces)?;

    // eth0: 10/8, subnet, default. wlan0: subnet only, its default loses.
    // IPv6: on-link prefix, default, reject.
    assert_eq!(report.added, 7);
    assert_eq!(kernel.routes_of(Family::Inet).count(), 4);
    assert_eq!(kernel.routes_of(Family::Inet6).count(), 3);

    let default = kernel
        .routes_of(Family::Inet)
        .find(|r| r.is_default())
        .expect("IPv4 default");
    assert_eq!(default.gateway.to_string(), "192.0.2.1");

    let again = reconciler.build_all(&mut kernel, &producers, &interfaces)?;
    assert_eq!(again.kernel_calls, 0);
    Ok(())
}

#[test]
fn test_config_round_trips_through_json() -> Result<()> {
    let config = Config::from_yaml_str(HOME_ROUTER)?;
    let json = config.to_json()?;
    let parsed: Config = serde_json::from_str(&json)?;
    assert_eq!(parsed, config);
    Ok(())
}
