//! Declarative tunnel configuration
//!
//! A [`TunnelConfiguration`] is one [`InterfaceConfiguration`] plus an ordered
//! list of [`PeerConfiguration`]s. Peer order is significant: it is the order
//! peers are emitted to the backend and the index space shared with resolved
//! endpoints and resolution outcomes.

use crate::address::{AddressFamily, AddressRange};
use crate::endpoint::Endpoint;
use crate::error::{Result, TunnelError};
use crate::key::{PreSharedKey, PrivateKey, PublicKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;

/// A DNS server address pushed to the OS while the tunnel is up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DnsServer(pub IpAddr);

impl DnsServer {
    pub fn address(&self) -> IpAddr {
        self.0
    }
}

impl fmt::Display for DnsServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local interface description
///
/// The obfuscation fields (`jc` through `itime`) belong to the AmneziaWG
/// dialect. Each one is optional and emitted only when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfiguration {
    pub private_key: PrivateKey,

    #[serde(default)]
    pub addresses: Vec<AddressRange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,

    /// Zero or absent means "automatic"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,

    #[serde(default)]
    pub dns: Vec<DnsServer>,

    #[serde(default)]
    pub dns_search: Vec<String>,

    /// Junk packet count
    #[serde(default, alias = "jc", skip_serializing_if = "Option::is_none")]
    pub junk_packet_count: Option<u16>,
    #[serde(default, alias = "jmin", skip_serializing_if = "Option::is_none")]
    pub junk_packet_min_size: Option<u16>,
    #[serde(default, alias = "jmax", skip_serializing_if = "Option::is_none")]
    pub junk_packet_max_size: Option<u16>,
    #[serde(default, alias = "s1", skip_serializing_if = "Option::is_none")]
    pub init_packet_junk_size: Option<u16>,
    #[serde(default, alias = "s2", skip_serializing_if = "Option::is_none")]
    pub response_packet_junk_size: Option<u16>,
    #[serde(default, alias = "s3", skip_serializing_if = "Option::is_none")]
    pub cookie_reply_packet_junk_size: Option<u16>,
    #[serde(default, alias = "s4", skip_serializing_if = "Option::is_none")]
    pub transport_packet_junk_size: Option<u16>,

    #[serde(default, alias = "h1", skip_serializing_if = "Option::is_none")]
    pub init_packet_magic_header: Option<u32>,
    #[serde(default, alias = "h2", skip_serializing_if = "Option::is_none")]
    pub response_packet_magic_header: Option<u32>,
    #[serde(default, alias = "h3", skip_serializing_if = "Option::is_none")]
    pub underload_packet_magic_header: Option<u32>,
    #[serde(default, alias = "h4", skip_serializing_if = "Option::is_none")]
    pub transport_packet_magic_header: Option<u32>,

    #[serde(default, alias = "i1", skip_serializing_if = "Option::is_none")]
    pub special_junk_1: Option<String>,
    #[serde(default, alias = "i2", skip_serializing_if = "Option::is_none")]
    pub special_junk_2: Option<String>,
    #[serde(default, alias = "i3", skip_serializing_if = "Option::is_none")]
    pub special_junk_3: Option<String>,
    #[serde(default, alias = "i4", skip_serializing_if = "Option::is_none")]
    pub special_junk_4: Option<String>,
    #[serde(default, alias = "i5", skip_serializing_if = "Option::is_none")]
    pub special_junk_5: Option<String>,

    #[serde(default, alias = "j1", skip_serializing_if = "Option::is_none")]
    pub controlled_junk_1: Option<String>,
    #[serde(default, alias = "j2", skip_serializing_if = "Option::is_none")]
    pub controlled_junk_2: Option<String>,
    #[serde(default, alias = "j3", skip_serializing_if = "Option::is_none")]
    pub controlled_junk_3: Option<String>,

    /// Special handshake timeout in seconds
    #[serde(default, alias = "itime", skip_serializing_if = "Option::is_none")]
    pub special_handshake_timeout: Option<u32>,
}

impl InterfaceConfiguration {
    /// A bare interface with only a private key set.
    pub fn new(private_key: PrivateKey) -> Self {
        Self {
            private_key,
            addresses: Vec::new(),
            listen_port: None,
            mtu: None,
            dns: Vec::new(),
            dns_search: Vec::new(),
            junk_packet_count: None,
            junk_packet_min_size: None,
            junk_packet_max_size: None,
            init_packet_junk_size: None,
            response_packet_junk_size: None,
            cookie_reply_packet_junk_size: None,
            transport_packet_junk_size: None,
            init_packet_magic_header: None,
            response_packet_magic_header: None,
            underload_packet_magic_header: None,
            transport_packet_magic_header: None,
            special_junk_1: None,
            special_junk_2: None,
            special_junk_3: None,
            special_junk_4: None,
            special_junk_5: None,
            controlled_junk_1: None,
            controlled_junk_2: None,
            controlled_junk_3: None,
            special_handshake_timeout: None,
        }
    }

    /// Addresses in canonical order: IPv4 before IPv6, each family sorted.
    pub fn canonical_addresses(&self) -> Vec<AddressRange> {
        let mut v4: Vec<AddressRange> = self
            .addresses
            .iter()
            .filter(|a| a.family() == AddressFamily::V4)
            .copied()
            .collect();
        let mut v6: Vec<AddressRange> = self
            .addresses
            .iter()
            .filter(|a| a.family() == AddressFamily::V6)
            .copied()
            .collect();
        v4.sort();
        v6.sort();
        v4.extend(v6);
        v4
    }
}

impl PartialEq for InterfaceConfiguration {
    fn eq(&self, other: &Self) -> bool {
        self.private_key == other.private_key
            && self.canonical_addresses() == other.canonical_addresses()
            && self.listen_port == other.listen_port
            && self.mtu == other.mtu
            && self.dns == other.dns
            && self.dns_search == other.dns_search
            && self.junk_packet_count == other.junk_packet_count
            && self.junk_packet_min_size == other.junk_packet_min_size
            && self.junk_packet_max_size == other.junk_packet_max_size
            && self.init_packet_junk_size == other.init_packet_junk_size
            && self.response_packet_junk_size == other.response_packet_junk_size
            && self.cookie_reply_packet_junk_size == other.cookie_reply_packet_junk_size
            && self.transport_packet_junk_size == other.transport_packet_junk_size
            && self.init_packet_magic_header == other.init_packet_magic_header
            && self.response_packet_magic_header == other.response_packet_magic_header
            && self.underload_packet_magic_header == other.underload_packet_magic_header
            && self.transport_packet_magic_header == other.transport_packet_magic_header
            && self.special_junk_1 == other.special_junk_1
            && self.special_junk_2 == other.special_junk_2
            && self.special_junk_3 == other.special_junk_3
            && self.special_junk_4 == other.special_junk_4
            && self.special_junk_5 == other.special_junk_5
            && self.controlled_junk_1 == other.controlled_junk_1
            && self.controlled_junk_2 == other.controlled_junk_2
            && self.controlled_junk_3 == other.controlled_junk_3
            && self.special_handshake_timeout == other.special_handshake_timeout
    }
}

impl Eq for InterfaceConfiguration {}

/// A remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfiguration {
    pub public_key: PublicKey,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_shared_key: Option<PreSharedKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,

    #[serde(default)]
    pub allowed_ips: Vec<AddressRange>,

    /// Ranges kept outside the tunnel (split-tunnel carve-outs)
    #[serde(default)]
    pub exclude_ips: Vec<AddressRange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_keepalive: Option<u16>,
}

impl PeerConfiguration {
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            pre_shared_key: None,
            endpoint: None,
            allowed_ips: Vec::new(),
            exclude_ips: Vec::new(),
            persistent_keepalive: None,
        }
    }
}

/// A complete tunnel description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub interface: InterfaceConfiguration,

    #[serde(default)]
    pub peers: Vec<PeerConfiguration>,
}

impl TunnelConfiguration {
    pub fn new(interface: InterfaceConfiguration, peers: Vec<PeerConfiguration>) -> Self {
        Self {
            name: None,
            interface,
            peers,
        }
    }

    /// Parse and validate a JSON tunnel description.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON tunnel description from disk.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_json(&contents)
    }

    /// Reject duplicate peers and peers that are the interface itself.
    pub fn validate(&self) -> Result<()> {
        let own_key = self.interface.private_key.public_key();
        let mut seen = HashSet::with_capacity(self.peers.len());

        for (index, peer) in self.peers.iter().enumerate() {
            if peer.public_key == own_key {
                return Err(TunnelError::Config(format!(
                    "peer {index} has the interface's own public key"
                )));
            }
            if !seen.insert(peer.public_key) {
                return Err(TunnelError::Config(format!(
                    "peer {index} duplicates public key {}",
                    peer.public_key
                )));
            }
        }
        Ok(())
    }

    /// Each peer's configured endpoint, in peer order.
    pub fn endpoints(&self) -> Vec<Option<Endpoint>> {
        self.peers.iter().map(|p| p.endpoint.clone()).collect()
    }
}
