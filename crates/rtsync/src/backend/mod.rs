//! Kernel routing-table backends.
//!
//! The reconciler talks to the kernel only through [`KernelBackend`]: dump the
//! table for a family, apply one operation, report platform quirks. The wire
//! format behind that is the backend's business.

mod sim;

use std::fmt;
use std::io;

use crate::addr::{Family, SockAddr};
use crate::route::Route;

pub use sim::{KernelCall, SimKernel};

/// A single routing-table mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteOp {
    Add,
    Change,
    Delete,
}

impl fmt::Display for RouteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RouteOp::Add => "ADD",
            RouteOp::Change => "CHANGE",
            RouteOp::Delete => "DELETE",
        })
    }
}

/// Platform quirks that change how routes are replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Routes carry a metric, and routes differing only by metric coexist.
    pub supports_metric: bool,
    /// CHANGE may be used on routes carrying the cloning flag.
    pub supports_change_on_cloning: bool,
    /// Several routes to one destination may exist with different gateways.
    pub allows_multiple_gateways: bool,
}

impl Capabilities {
    /// Linux: metrics, no cloning routes, one gateway per prefix and metric.
    pub const fn linux() -> Self {
        Self {
            supports_metric: true,
            supports_change_on_cloning: true,
            allows_multiple_gateways: false,
        }
    }

    /// BSD routing sockets without multipath.
    pub const fn bsd() -> Self {
        Self {
            supports_metric: false,
            supports_change_on_cloning: false,
            allows_multiple_gateways: false,
        }
    }

    /// BSD with one route per gateway (multipath).
    pub const fn bsd_multipath() -> Self {
        Self {
            supports_metric: false,
            supports_change_on_cloning: false,
            allows_multiple_gateways: true,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::linux()
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Errors reported by a backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// I/O error talking to the kernel.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Kernel returned an error code.
    #[error("kernel error: {message} (errno {errno})")]
    Kernel {
        /// The errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// Operation not supported by this backend.
    #[error("operation not supported: {0}")]
    NotSupported(String),
}

impl BackendError {
    /// Create a kernel error from a negated errno value, as kernels report them.
    pub fn from_errno(errno: i32) -> Self {
        let message = io::Error::from_raw_os_error(-errno).to_string();
        Self::Kernel {
            errno: -errno,
            message,
        }
    }

    /// The route was not there (ENOENT, ESRCH).
    pub fn is_not_found(&self) -> bool {
        match self.errno() {
            Some(errno) => errno == libc::ENOENT || errno == libc::ESRCH,
            None => false,
        }
    }

    /// The route is already there (EEXIST).
    pub fn is_already_exists(&self) -> bool {
        self.errno() == Some(libc::EEXIST)
    }

    pub fn is_not_supported(&self) -> bool {
        match self {
            Self::NotSupported(_) => true,
            _ => matches!(self.errno(), Some(e) if e == libc::EOPNOTSUPP || e == libc::ENOTSUP),
        }
    }

    /// Get the errno value if this is a kernel error.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { errno, .. } => Some(*errno),
            Self::Io(e) => e.raw_os_error(),
            Self::NotSupported(_) => None,
        }
    }
}

/// Access to a kernel routing table.
pub trait KernelBackend {
    /// Platform quirks. Queried once per reconciliation pass.
    fn capabilities(&self) -> Capabilities;

    /// Every route of `family` currently in the kernel table.
    fn dump_routes(&mut self, family: Family) -> BackendResult<Vec<Route>>;

    /// Apply one mutation.
    fn apply(&mut self, op: RouteOp, route: &Route) -> BackendResult<()>;

    /// Ask the kernel to report lookups that miss for these gateways.
    fn install_miss_filter(&mut self, gateways: &[SockAddr]) -> BackendResult<()> {
        let _ = gateways;
        Err(BackendError::NotSupported("route miss filter".into()))
    }
}

impl<B: KernelBackend + ?Sized> KernelBackend for Box<B> {
    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn dump_routes(&mut self, family: Family) -> BackendResult<Vec<Route>> {
        (**self).dump_routes(family)
    }

    fn apply(&mut self, op: RouteOp, route: &Route) -> BackendResult<()> {
        (**self).apply(op, route)
    }

    fn install_miss_filter(&mut self, gateways: &[SockAddr]) -> BackendResult<()> {
        (**self).install_miss_filter(gateways)
    }
}
