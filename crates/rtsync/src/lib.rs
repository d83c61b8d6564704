//! Route reconciliation engine for a network configuration daemon.
//!
//! Protocol modules (static configuration, DHCPv4 leases, IPv4 link-local,
//! router advertisements, DHCPv6 prefix delegation) each say which routes
//! they want. The [`Reconciler`] merges their wishes by priority, compares
//! them against the kernel table and the routes it installed last time, and
//! issues the fewest kernel operations needed to make the kernel match.
//!
//! The kernel is reached through the [`KernelBackend`] trait. [`SimKernel`]
//! is an in-memory implementation that can mimic Linux or BSD semantics and
//! inject failures.
//!
//! # Modules
//!
//! - [`addr`] - address families, masks and prefix arithmetic
//! - [`interface`] - the interface table routes point into
//! - [`route`] - route records, ordering keys and the record arena
//! - [`backend`] - kernel backend trait and the simulated kernel
//! - [`producer`] - route producers
//! - [`reconcile`] - the reconciliation driver
//! - [`events`] - the daemon event loop
//! - [`config`] - YAML configuration

pub mod addr;
pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod interface;
pub mod producer;
pub mod reconcile;
pub mod route;

pub use addr::{Family, SockAddr};
pub use backend::{BackendError, Capabilities, KernelBackend, RouteOp, SimKernel};
pub use config::Config;
pub use error::{Error, Result};
pub use events::{DaemonEvent, EventLoop};
pub use interface::{Carrier, Interface, InterfaceId, InterfaceTable};
pub use reconcile::{BuildReport, ExternalChange, Originator, Reconciler, ReconcilerOptions};
pub use route::Route;
