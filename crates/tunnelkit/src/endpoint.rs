//! Peer endpoints: a host (name or concrete address) plus a UDP port

use crate::error::{Result, TunnelError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

/// Endpoint host. `Name` is unresolved; the address variants are resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Name(String),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
}

impl Host {
    /// The concrete address, if this host is already resolved.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Host::Name(_) => None,
            Host::Ipv4(v4) => Some(IpAddr::V4(*v4)),
            Host::Ipv6(v6) => Some(IpAddr::V6(*v6)),
        }
    }
}

impl From<IpAddr> for Host {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Host::Ipv4(v4),
            IpAddr::V6(v6) => Host::Ipv6(v6),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Name(name) => f.write_str(name),
            Host::Ipv4(v4) => write!(f, "{v4}"),
            Host::Ipv6(v6) => write!(f, "{v6}"),
        }
    }
}

/// A peer endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: Host,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: Host, port: u16) -> Self {
        Self { host, port }
    }

    /// Whether the host is a concrete address rather than a name.
    pub fn is_resolved(&self) -> bool {
        !matches!(self.host, Host::Name(_))
    }

    /// The socket address, if resolved.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.host.ip().map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(Host::from(addr.ip()), addr.port())
    }
}

impl FromStr for Endpoint {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = |reason: &str| TunnelError::InvalidEndpoint(format!("{s}: {reason}"));

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| invalid("missing closing bracket"))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| invalid("missing port"))?;
            let v6: Ipv6Addr = host
                .parse()
                .map_err(|_| invalid("bracketed host is not an IPv6 address"))?;
            (Host::Ipv6(v6), port)
        } else {
            let (host, port) = s.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
            if host.is_empty() {
                return Err(invalid("empty host"));
            }
            if host.contains(':') {
                return Err(invalid("IPv6 hosts must be bracketed"));
            }
            let host = match host.parse::<Ipv4Addr>() {
                Ok(v4) => Host::Ipv4(v4),
                Err(_) => Host::Name(host.to_string()),
            };
            (host, port)
        };

        let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Host::Ipv6(v6) => write!(f, "[{v6}]:{}", self.port),
            host => write!(f, "{host}:{}", self.port),
        }
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
