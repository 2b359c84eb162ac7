//! Address ranges: an IP address paired with a network prefix length
//!
//! Unlike a plain CIDR network, an [`AddressRange`] keeps the host bits of the
//! address it was created with (`10.0.0.2/24` stays `10.0.0.2/24`). The masked
//! network address is available separately via [`AddressRange::masked_address`].

use crate::error::{Result, TunnelError};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Address family tag, fixed at ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

/// An IP address with a prefix length
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressRange(IpNet);

impl AddressRange {
    /// Create a range, validating the prefix length against the address family.
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self> {
        IpNet::new(address, prefix_len).map(Self).map_err(|_| {
            TunnelError::InvalidAddressRange(format!(
                "prefix length {prefix_len} is too long for {address}"
            ))
        })
    }

    /// A single-host range (/32 or /128).
    pub fn host(address: IpAddr) -> Self {
        Self(match address {
            IpAddr::V4(v4) => IpNet::V4(Ipv4Net::from(v4)),
            IpAddr::V6(v6) => IpNet::V6(Ipv6Net::from(v6)),
        })
    }

    pub fn family(&self) -> AddressFamily {
        match self.0 {
            IpNet::V4(_) => AddressFamily::V4,
            IpNet::V6(_) => AddressFamily::V6,
        }
    }

    pub fn is_ipv4(&self) -> bool {
        self.family() == AddressFamily::V4
    }

    pub fn is_ipv6(&self) -> bool {
        self.family() == AddressFamily::V6
    }

    /// The address exactly as configured, host bits included.
    pub fn address(&self) -> IpAddr {
        self.0.addr()
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    /// The subnet mask for the prefix length (e.g. `255.255.255.0` for /24).
    pub fn subnet_mask(&self) -> IpAddr {
        self.0.netmask()
    }

    /// The network address: the configured address with host bits cleared.
    pub fn masked_address(&self) -> IpAddr {
        self.0.network()
    }

    /// The IPv4 view of this range, if it is IPv4.
    pub fn as_ipv4(&self) -> Option<Ipv4Net> {
        match self.0 {
            IpNet::V4(net) => Some(net),
            IpNet::V6(_) => None,
        }
    }

    /// The IPv6 view of this range, if it is IPv6.
    pub fn as_ipv6(&self) -> Option<Ipv6Net> {
        match self.0 {
            IpNet::V6(net) => Some(net),
            IpNet::V4(_) => None,
        }
    }
}

/// Mask an IPv6 address down to `prefix_len` bits.
pub(crate) fn mask_ipv6(address: Ipv6Addr, prefix_len: u8) -> Ipv6Addr {
    Ipv6Net::new(address, prefix_len.min(128))
        .map(|net| net.network())
        .unwrap_or(address)
}

/// Subnet mask for an IPv4 prefix length.
pub(crate) fn ipv4_mask(prefix_len: u8) -> Ipv4Addr {
    Ipv4Net::new(Ipv4Addr::UNSPECIFIED, prefix_len.min(32))
        .map(|net| net.netmask())
        .unwrap_or(Ipv4Addr::BROADCAST)
}

impl FromStr for AddressRange {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.split_once('/') {
            Some((addr, prefix)) => {
                let address: IpAddr = addr
                    .parse()
                    .map_err(|e| TunnelError::InvalidAddressRange(format!("{s}: {e}")))?;
                let prefix_len: u8 = prefix
                    .parse()
                    .map_err(|e| TunnelError::InvalidAddressRange(format!("{s}: {e}")))?;
                Self::new(address, prefix_len)
            }
            None => s
                .parse::<IpAddr>()
                .map(Self::host)
                .map_err(|e| TunnelError::InvalidAddressRange(format!("{s}: {e}"))),
        }
    }
}

impl From<IpNet> for AddressRange {
    fn from(net: IpNet) -> Self {
        Self(net)
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0.addr(), self.0.prefix_len())
    }
}

impl fmt::Debug for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AddressRange({self})")
    }
}

impl Serialize for AddressRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AddressRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
