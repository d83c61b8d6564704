//! Family-polymorphic address and prefix primitives.
//!
//! Routes carry their destination, netmask, gateway and preferred source as
//! [`SockAddr`] values. A `SockAddr` may be [`SockAddr::Unspec`], which is how
//! "no gateway" or "no mask known" is expressed; the comparison helpers treat
//! that as equal to any unspecified address of a real family.

use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error type for address and prefix handling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddrError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid prefix length: {0}")]
    InvalidPrefixLength(String),

    #[error("non-contiguous netmask: {0}")]
    InvalidMask(String),

    #[error("address family {0} has no prefix form")]
    UnsupportedFamily(Family),
}

pub type Result<T> = std::result::Result<T, AddrError>;

/// Address family.
///
/// Ordered `Unspec < Inet < Inet6`, which is the order routes of different
/// families sort in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    #[default]
    Unspec,
    Inet,
    Inet6,
}

impl Family {
    /// Both real families, in processing order.
    pub const ALL: [Family; 2] = [Family::Inet, Family::Inet6];

    /// Address width in bits (0 for `Unspec`).
    pub const fn max_prefix(self) -> u8 {
        match self {
            Family::Unspec => 0,
            Family::Inet => 32,
            Family::Inet6 => 128,
        }
    }

    /// The `AF_*` constant for this family.
    pub fn as_raw(self) -> i32 {
        match self {
            Family::Unspec => libc::AF_UNSPEC,
            Family::Inet => libc::AF_INET,
            Family::Inet6 => libc::AF_INET6,
        }
    }

    /// Map an `AF_*` constant back to a family.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            libc::AF_UNSPEC => Some(Family::Unspec),
            libc::AF_INET => Some(Family::Inet),
            libc::AF_INET6 => Some(Family::Inet6),
            _ => None,
        }
    }

    /// The all-zero address of this family.
    pub fn unspecified(self) -> SockAddr {
        match self {
            Family::Unspec => SockAddr::Unspec,
            Family::Inet => SockAddr::V4(Ipv4Addr::UNSPECIFIED),
            Family::Inet6 => SockAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    /// The all-ones address of this family (the host-route netmask).
    pub fn all_ones(self) -> SockAddr {
        match self {
            Family::Unspec => SockAddr::Unspec,
            Family::Inet => SockAddr::V4(Ipv4Addr::BROADCAST),
            Family::Inet6 => SockAddr::V6(Ipv6Addr::from(u128::MAX)),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Family::Unspec => "unspec",
            Family::Inet => "inet",
            Family::Inet6 => "inet6",
        })
    }
}

impl FromStr for Family {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inet" | "ipv4" | "4" => Ok(Family::Inet),
            "inet6" | "ipv6" | "6" => Ok(Family::Inet6),
            "unspec" => Ok(Family::Unspec),
            _ => Err(AddrError::InvalidAddress(format!("unknown family {}", s))),
        }
    }
}

/// A network address of any family, or none at all.
///
/// The derived `Eq`/`Ord` are structural (family first, then bytes) and are
/// what ordered maps use. For route semantics use [`sa_cmp`] / [`sa_equal`],
/// which also let `Unspec` match an unspecified address of a real family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SockAddr {
    #[default]
    Unspec,
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl SockAddr {
    pub fn family(&self) -> Family {
        match self {
            SockAddr::Unspec => Family::Unspec,
            SockAddr::V4(_) => Family::Inet,
            SockAddr::V6(_) => Family::Inet6,
        }
    }

    /// True for `Unspec`, `0.0.0.0` and `::`.
    pub fn is_unspecified(&self) -> bool {
        match self {
            SockAddr::Unspec => true,
            SockAddr::V4(a) => a.is_unspecified(),
            SockAddr::V6(a) => a.is_unspecified(),
        }
    }

    /// True when every address bit is set.
    pub fn is_all_ones(&self) -> bool {
        match self {
            SockAddr::Unspec => false,
            SockAddr::V4(a) => u32::from(*a) == u32::MAX,
            SockAddr::V6(a) => u128::from(*a) == u128::MAX,
        }
    }

    /// True for `127.0.0.1` and `::1`.
    pub fn is_loopback(&self) -> bool {
        match self {
            SockAddr::Unspec => false,
            SockAddr::V4(a) => *a == Ipv4Addr::LOCALHOST,
            SockAddr::V6(a) => *a == Ipv6Addr::LOCALHOST,
        }
    }

    /// Substitute the unspecified address of `family` for `Unspec`.
    pub fn or_unspecified(self, family: Family) -> SockAddr {
        match self {
            SockAddr::Unspec => family.unspecified(),
            other => other,
        }
    }

    /// Convert to a std address, if this has a family.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            SockAddr::Unspec => None,
            SockAddr::V4(a) => Some(IpAddr::V4(*a)),
            SockAddr::V6(a) => Some(IpAddr::V6(*a)),
        }
    }

    /// Address bytes, padded to 16, together with the meaningful length.
    fn octets(&self) -> ([u8; 16], usize) {
        let mut buf = [0u8; 16];
        match self {
            SockAddr::Unspec => (buf, 0),
            SockAddr::V4(a) => {
                buf[..4].copy_from_slice(&a.octets());
                (buf, 4)
            }
            SockAddr::V6(a) => {
                buf.copy_from_slice(&a.octets());
                (buf, 16)
            }
        }
    }

    fn from_octets(family: Family, buf: &[u8; 16]) -> SockAddr {
        match family {
            Family::Unspec => SockAddr::Unspec,
            Family::Inet => SockAddr::V4(Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3])),
            Family::Inet6 => SockAddr::V6(Ipv6Addr::from(*buf)),
        }
    }
}

impl fmt::Display for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SockAddr::Unspec => f.write_str("unspec"),
            SockAddr::V4(a) => a.fmt(f),
            SockAddr::V6(a) => a.fmt(f),
        }
    }
}

impl FromStr for SockAddr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "unspec" {
            return Ok(SockAddr::Unspec);
        }
        parse_addr(s).map(SockAddr::from)
    }
}

impl From<IpAddr> for SockAddr {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(a) => SockAddr::V4(a),
            IpAddr::V6(a) => SockAddr::V6(a),
        }
    }
}

impl From<Ipv4Addr> for SockAddr {
    fn from(addr: Ipv4Addr) -> Self {
        SockAddr::V4(addr)
    }
}

impl From<Ipv6Addr> for SockAddr {
    fn from(addr: Ipv6Addr) -> Self {
        SockAddr::V6(addr)
    }
}

impl Serialize for SockAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SockAddr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Compare two addresses the way routes compare them.
///
/// When either side is `Unspec` and both are unspecified they are equal, so
/// "no gateway" matches `0.0.0.0` or `::`. Otherwise addresses sort by family
/// and then by bytes.
pub fn sa_cmp(a: &SockAddr, b: &SockAddr) -> Ordering {
    if (a.family() == Family::Unspec || b.family() == Family::Unspec)
        && a.is_unspecified()
        && b.is_unspecified()
    {
        return Ordering::Equal;
    }
    a.cmp(b)
}

/// `sa_cmp(a, b) == Equal`.
pub fn sa_equal(a: &SockAddr, b: &SockAddr) -> bool {
    sa_cmp(a, b) == Ordering::Equal
}

/// Count the leading one bits of a netmask.
///
/// Fails with [`AddrError::InvalidMask`] when the one bits are not contiguous.
pub fn prefix_length_of(mask: &SockAddr) -> Result<u8> {
    let (bits, width) = match mask {
        SockAddr::Unspec => return Err(AddrError::UnsupportedFamily(Family::Unspec)),
        SockAddr::V4(a) => (u128::from(u32::from(*a)) << 96, 32u32),
        SockAddr::V6(a) => (u128::from(*a), 128u32),
    };

    let ones = bits.leading_ones().min(width);
    if bits != prefix_bits(ones) {
        return Err(AddrError::InvalidMask(mask.to_string()));
    }
    let prefix = ones as u8;

    #[cfg(debug_assertions)]
    {
        let back = mask_of(mask.family(), prefix);
        debug_assert_eq!(back.as_ref(), Ok(mask), "netmask round-trip mismatch");
    }

    Ok(prefix)
}

/// Build the netmask with `prefix_len` leading one bits.
pub fn mask_of(family: Family, prefix_len: u8) -> Result<SockAddr> {
    if family == Family::Unspec {
        return Err(AddrError::UnsupportedFamily(family));
    }
    if prefix_len > family.max_prefix() {
        return Err(AddrError::InvalidPrefixLength(format!(
            "{} exceeds maximum {} for {}",
            prefix_len,
            family.max_prefix(),
            family
        )));
    }

    let bits = prefix_bits(u32::from(prefix_len));
    Ok(match family {
        Family::Inet => SockAddr::V4(Ipv4Addr::from((bits >> 96) as u32)),
        _ => SockAddr::V6(Ipv6Addr::from(bits)),
    })
}

/// Left-aligned 128-bit mask with `ones` leading one bits.
fn prefix_bits(ones: u32) -> u128 {
    if ones == 0 {
        0
    } else {
        u128::MAX << (128 - ones)
    }
}

/// The network address of `dest` under `mask`.
///
/// An `Unspec` mask means no mask is known (some platforms omit it for host
/// routes), so the address is returned unchanged. A mask shorter than the
/// address zero-fills the remaining bytes.
pub fn apply_mask(dest: &SockAddr, mask: &SockAddr) -> SockAddr {
    if mask.family() == Family::Unspec || dest.family() == Family::Unspec {
        return *dest;
    }

    let (addr, addr_len) = dest.octets();
    let (netmask, mask_len) = mask.octets();
    let mut out = [0u8; 16];
    for i in 0..addr_len.min(mask_len) {
        out[i] = addr[i] & netmask[i];
    }
    SockAddr::from_octets(dest.family(), &out)
}

/// The natural netmask for an RFC 2132 static route destination.
///
/// Starts from the class A/B/C network mask and narrows the host part until
/// no set bit of the destination falls in it. Class D/E destinations get a
/// host mask.
pub fn classful_netmask(dest: Ipv4Addr) -> Ipv4Addr {
    let p = u32::from(dest);
    let mut t: u32 = if p & 0x8000_0000 == 0 {
        0x00ff_ffff
    } else if p & 0xc000_0000 == 0x8000_0000 {
        0x0000_ffff
    } else if p & 0xe000_0000 == 0xc000_0000 {
        0x0000_00ff
    } else {
        0
    };

    while t & p != 0 {
        t >>= 1;
    }

    Ipv4Addr::from(!t)
}

/// Parse an IP address from string.
pub fn parse_addr(s: &str) -> Result<IpAddr> {
    s.parse()
        .map_err(|_| AddrError::InvalidAddress(s.to_string()))
}

/// Parse an address with optional prefix length (CIDR notation).
///
/// Without a `/len` suffix the full host length is assumed.
pub fn parse_prefix(s: &str) -> Result<(SockAddr, u8)> {
    if let Some((addr_str, prefix_str)) = s.split_once('/') {
        let addr = SockAddr::from(parse_addr(addr_str)?);
        let prefix: u8 = prefix_str
            .parse()
            .map_err(|_| AddrError::InvalidPrefixLength(prefix_str.to_string()))?;

        let max_prefix = addr.family().max_prefix();
        if prefix > max_prefix {
            return Err(AddrError::InvalidPrefixLength(format!(
                "{} exceeds maximum {} for address family",
                prefix, max_prefix
            )));
        }

        Ok((addr, prefix))
    } else {
        let addr = SockAddr::from(parse_addr(s)?);
        Ok((addr, addr.family().max_prefix()))
    }
}
