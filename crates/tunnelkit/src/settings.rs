//! Network settings derivation
//!
//! Produces the address, route and DNS model the OS needs to steer traffic into
//! the tunnel interface. This is a pure transform over the configuration and
//! the endpoints already resolved for it; nothing here touches the network.
//!
//! Three route sets are derived, each split by address family:
//!
//! - interface addresses become device addresses, plus an included route for
//!   their subnet with the address itself as gateway
//! - every peer's allowed IPs become included routes, verbatim
//! - every resolved peer endpoint becomes an excluded host route, so traffic
//!   to the server itself never loops back through the tunnel; each peer's
//!   exclude IPs are added verbatim

use crate::address::{ipv4_mask, mask_ipv6, AddressRange};
use crate::endpoint::Host;
use crate::uapi::PeerSlots;
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};

/// Shortest IPv6 prefix that still takes effect on the mobile network stack.
///
/// Interface address prefixes shorter than this are clamped when emitted as
/// routes. This works around a platform limitation; it is not a general
/// networking rule.
pub const IPV6_MIN_EFFECTIVE_PREFIX: u8 = 120;

/// MTU used when the configuration leaves it automatic
pub const FALLBACK_MTU: u16 = 1280;

/// Per-packet overhead handed to platforms that compute MTU themselves
pub const TUNNEL_OVERHEAD_BYTES: u16 = 80;

/// Placeholder remote address; a tunnel may have zero or many endpoints.
pub const TUNNEL_REMOTE_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// How to fill in an automatic MTU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtuFallback {
    /// Pin the MTU to [`FALLBACK_MTU`]
    Fixed,
    /// Let the OS derive the MTU from [`TUNNEL_OVERHEAD_BYTES`]
    Overhead,
}

impl MtuFallback {
    pub fn for_current_platform() -> Self {
        if cfg!(target_os = "macos") {
            MtuFallback::Overhead
        } else {
            MtuFallback::Fixed
        }
    }
}

/// MTU as handed to the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MtuSetting {
    Mtu(u16),
    TunnelOverhead(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ipv4Route {
    pub destination: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Ipv4Addr>,
}

impl Ipv4Route {
    pub fn new(destination: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            destination,
            subnet_mask: ipv4_mask(prefix_len),
            gateway: None,
        }
    }

    pub fn prefix_len(&self) -> u8 {
        u32::from(self.subnet_mask).count_ones() as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ipv6Route {
    pub destination: Ipv6Addr,
    pub prefix_len: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Ipv6Addr>,
}

impl Ipv6Route {
    pub fn new(destination: Ipv6Addr, prefix_len: u8) -> Self {
        Self {
            destination,
            prefix_len,
            gateway: None,
        }
    }
}

/// Addresses and routes for one address family
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FamilySettings<R> {
    pub addresses: Vec<R>,
    pub included_routes: Vec<R>,
    pub excluded_routes: Vec<R>,
}

impl<R> Default for FamilySettings<R> {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            included_routes: Vec::new(),
            excluded_routes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsSettings {
    pub servers: Vec<IpAddr>,
    pub search_domains: Vec<String>,
    /// `[""]` sends every lookup through the tunnel's resolvers
    pub match_domains: Vec<String>,
}

impl DnsSettings {
    pub fn matches_all_domains(&self) -> bool {
        self.match_domains.iter().any(String::is_empty)
    }
}

/// Everything the OS needs to bring the tunnel interface up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkSettings {
    pub tunnel_remote_address: IpAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsSettings>,
    pub mtu: MtuSetting,
    pub ipv4: FamilySettings<Ipv4Route>,
    pub ipv6: FamilySettings<Ipv6Route>,
}

impl PeerSlots<'_> {
    /// Derive network settings with the current platform's MTU fallback.
    pub fn network_settings(&self) -> NetworkSettings {
        self.network_settings_with(MtuFallback::for_current_platform())
    }

    /// Derive network settings with an explicit MTU fallback.
    pub fn network_settings_with(&self, fallback: MtuFallback) -> NetworkSettings {
        let interface = &self.configuration().interface;
        let mut ipv4 = FamilySettings::<Ipv4Route>::default();
        let mut ipv6 = FamilySettings::<Ipv6Route>::default();

        for range in &interface.addresses {
            if let Some(net) = range.as_ipv4() {
                ipv4.addresses.push(Ipv4Route::new(net.addr(), net.prefix_len()));
                ipv4.included_routes.push(Ipv4Route {
                    gateway: Some(net.addr()),
                    ..Ipv4Route::new(net.network(), net.prefix_len())
                });
            } else if let Some(net) = range.as_ipv6() {
                let address = net.addr();
                let prefix_len = net.prefix_len().min(IPV6_MIN_EFFECTIVE_PREFIX);
                ipv6.addresses.push(Ipv6Route::new(address, prefix_len));
                ipv6.included_routes.push(Ipv6Route {
                    gateway: Some(address),
                    ..Ipv6Route::new(mask_ipv6(address, prefix_len), prefix_len)
                });
            }
        }

        for slot in self.iter() {
            for range in &slot.peer.allowed_ips {
                push_verbatim(range, &mut ipv4.included_routes, &mut ipv6.included_routes);
            }
        }

        for (index, slot) in self.iter().enumerate() {
            let Some(endpoint) = slot.resolved_endpoint else {
                continue;
            };
            match &endpoint.host {
                Host::Ipv4(address) => ipv4.excluded_routes.push(Ipv4Route::new(*address, 32)),
                Host::Ipv6(address) => ipv6.excluded_routes.push(Ipv6Route::new(*address, 128)),
                Host::Name(name) => {
                    warn!(peer = index, hostname = %name, "Skipping excluded route for unresolved endpoint");
                }
            }
        }

        for slot in self.iter() {
            for range in &slot.peer.exclude_ips {
                push_verbatim(range, &mut ipv4.excluded_routes, &mut ipv6.excluded_routes);
            }
        }

        let mtu = match interface.mtu {
            Some(mtu) if mtu > 0 => MtuSetting::Mtu(mtu),
            _ => match fallback {
                MtuFallback::Fixed => MtuSetting::Mtu(FALLBACK_MTU),
                MtuFallback::Overhead => MtuSetting::TunnelOverhead(TUNNEL_OVERHEAD_BYTES),
            },
        };

        let dns = if interface.dns.is_empty() && interface.dns_search.is_empty() {
            None
        } else {
            Some(DnsSettings {
                servers: interface.dns.iter().map(|d| d.address()).collect(),
                search_domains: interface.dns_search.clone(),
                match_domains: if interface.dns.is_empty() {
                    Vec::new()
                } else {
                    vec![String::new()]
                },
            })
        };

        debug!(
            v4_included = ipv4.included_routes.len(),
            v4_excluded = ipv4.excluded_routes.len(),
            v6_included = ipv6.included_routes.len(),
            v6_excluded = ipv6.excluded_routes.len(),
            "Derived network settings"
        );

        NetworkSettings {
            tunnel_remote_address: TUNNEL_REMOTE_ADDRESS,
            dns,
            mtu,
            ipv4,
            ipv6,
        }
    }
}

fn push_verbatim(range: &AddressRange, v4: &mut Vec<Ipv4Route>, v6: &mut Vec<Ipv6Route>) {
    match range.address() {
        IpAddr::V4(address) => v4.push(Ipv4Route::new(address, range.prefix_len())),
        IpAddr::V6(address) => v6.push(Ipv6Route::new(address, range.prefix_len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DnsServer, InterfaceConfiguration, PeerConfiguration, TunnelConfiguration};
    use crate::endpoint::Endpoint;
    use crate::key::{PrivateKey, PublicKey};

    fn tunnel(addresses: &[&str], peers: Vec<PeerConfiguration>) -> TunnelConfiguration {
        let mut iface = InterfaceConfiguration::new(PrivateKey::from_bytes([1; 32]));
        iface.addresses = addresses.iter().map(|a| a.parse().unwrap()).collect();
        TunnelConfiguration::new(iface, peers)
    }

    fn peer(allowed: &[&str], exclude: &[&str]) -> PeerConfiguration {
        let mut p = PeerConfiguration::new(PublicKey::from_bytes([2; 32]));
        p.allowed_ips = allowed.iter().map(|a| a.parse().unwrap()).collect();
        p.exclude_ips = exclude.iter().map(|a| a.parse().unwrap()).collect();
        p
    }

    fn derive(config: &TunnelConfiguration, endpoints: &[Option<Endpoint>]) -> NetworkSettings {
        PeerSlots::new(config, endpoints).network_settings_with(MtuFallback::Fixed)
    }

    #[test]
    fn test_ipv4_interface_address_routes() {
        let cfg = tunnel(&["10.8.0.2/24"], vec![]);
        let settings = derive(&cfg, &[]);

        assert_eq!(
            settings.ipv4.addresses,
            vec![Ipv4Route::new(Ipv4Addr::new(10, 8, 0, 2), 24)]
        );
        assert_eq!(
            settings.ipv4.included_routes,
            vec![Ipv4Route {
                destination: Ipv4Addr::new(10, 8, 0, 0),
                subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
                gateway: Some(Ipv4Addr::new(10, 8, 0, 2)),
            }]
        );
    }

    #[test]
    fn test_ipv4_route_destination_clears_host_bits() {
        let cfg = tunnel(&["10.1.2.3/16", "fd00::1/64"], vec![]);
        let settings = derive(&cfg, &[]);

        assert_eq!(settings.ipv4.addresses.len(), 1);
        assert_eq!(settings.ipv6.addresses.len(), 1);
        assert_eq!(
            settings.ipv4.included_routes,
            vec![Ipv4Route {
                destination: Ipv4Addr::new(10, 1, 0, 0),
                subnet_mask: Ipv4Addr::new(255, 255, 0, 0),
                gateway: Some(Ipv4Addr::new(10, 1, 2, 3)),
            }]
        );
        assert_eq!(settings.ipv6.included_routes.len(), 1);
    }

    #[test]
    fn test_ipv6_prefix_clamped_to_120() {
        let cfg = tunnel(&["fd00:1::5/64"], vec![]);
        let settings = derive(&cfg, &[]);

        assert_eq!(settings.ipv6.addresses[0].prefix_len, 120);
        let route = &settings.ipv6.included_routes[0];
        assert_eq!(route.prefix_len, 120);
        assert_eq!(route.destination, "fd00:1::".parse::<Ipv6Addr>().unwrap());
        assert_eq!(route.gateway, Some("fd00:1::5".parse().unwrap()));
        // The stored range keeps its own prefix.
        assert_eq!(cfg.interface.addresses[0].prefix_len(), 64);
    }

    #[test]
    fn test_ipv6_long_prefix_not_lengthened() {
        let cfg = tunnel(&["fd00::5/125"], vec![]);
        let settings = derive(&cfg, &[]);
        assert_eq!(settings.ipv6.addresses[0].prefix_len, 125);
        assert_eq!(settings.ipv6.included_routes[0].prefix_len, 125);
        assert_eq!(
            settings.ipv6.included_routes[0].destination,
            "fd00::".parse::<Ipv6Addr>().unwrap()
        );
    }

    #[test]
    fn test_allowed_ips_become_included_routes_verbatim() {
        let cfg = tunnel(&[], vec![peer(&["192.168.1.7/24", "2001:db8::1/48"], &[])]);
        let settings = derive(&cfg, &[None]);

        assert_eq!(
            settings.ipv4.included_routes,
            vec![Ipv4Route::new(Ipv4Addr::new(192, 168, 1, 7), 24)]
        );
        assert_eq!(
            settings.ipv6.included_routes,
            vec![Ipv6Route::new("2001:db8::1".parse().unwrap(), 48)]
        );
        assert!(settings.ipv4.included_routes[0].gateway.is_none());
    }

    #[test]
    fn test_endpoints_and_exclude_ips_become_excluded_routes() {
        let cfg = tunnel(
            &[],
            vec![
                peer(&["0.0.0.0/0"], &["192.168.0.0/16"]),
                peer(&["::/0"], &["fe80::/10"]),
            ],
        );
        let endpoints = vec![
            Some("203.0.113.9:51820".parse().unwrap()),
            Some("[2001:db8::9]:51820".parse().unwrap()),
        ];
        let settings = derive(&cfg, &endpoints);

        assert_eq!(
            settings.ipv4.excluded_routes,
            vec![
                Ipv4Route::new(Ipv4Addr::new(203, 0, 113, 9), 32),
                Ipv4Route::new(Ipv4Addr::new(192, 168, 0, 0), 16),
            ]
        );
        assert_eq!(settings.ipv4.excluded_routes[0].subnet_mask, Ipv4Addr::BROADCAST);
        assert_eq!(
            settings.ipv6.excluded_routes,
            vec![
                Ipv6Route::new("2001:db8::9".parse().unwrap(), 128),
                Ipv6Route::new("fe80::".parse().unwrap(), 10),
            ]
        );
    }

    #[test]
    fn test_unresolved_endpoint_is_skipped() {
        let cfg = tunnel(&[], vec![peer(&[], &[])]);
        let settings = derive(&cfg, &[Some("vpn.example.com:51820".parse().unwrap())]);
        assert!(settings.ipv4.excluded_routes.is_empty());
        assert!(settings.ipv6.excluded_routes.is_empty());
    }

    #[test]
    fn test_mtu_fallbacks() {
        let mut cfg = tunnel(&[], vec![]);
        cfg.interface.mtu = Some(0);
        let slots = PeerSlots::new(&cfg, &[]);
        assert_eq!(
            slots.network_settings_with(MtuFallback::Fixed).mtu,
            MtuSetting::Mtu(FALLBACK_MTU)
        );
        assert_eq!(
            slots.network_settings_with(MtuFallback::Overhead).mtu,
            MtuSetting::TunnelOverhead(TUNNEL_OVERHEAD_BYTES)
        );

        cfg.interface.mtu = None;
        assert_eq!(derive(&cfg, &[]).mtu, MtuSetting::Mtu(1280));

        cfg.interface.mtu = Some(1420);
        let slots = PeerSlots::new(&cfg, &[]);
        assert_eq!(
            slots.network_settings_with(MtuFallback::Overhead).mtu,
            MtuSetting::Mtu(1420)
        );
    }

    #[test]
    fn test_dns_absent_when_unconfigured() {
        let cfg = tunnel(&[], vec![]);
        assert!(derive(&cfg, &[]).dns.is_none());
    }

    #[test]
    fn test_dns_servers_match_all_domains() {
        let mut cfg = tunnel(&[], vec![]);
        cfg.interface.dns = vec![DnsServer("1.1.1.1".parse().unwrap())];
        cfg.interface.dns_search = vec!["corp.example".to_string()];
        let dns = derive(&cfg, &[]).dns.unwrap();
        assert_eq!(dns.servers, vec!["1.1.1.1".parse::<IpAddr>().unwrap()]);
        assert_eq!(dns.search_domains, vec!["corp.example".to_string()]);
        assert!(dns.matches_all_domains());
    }

    #[test]
    fn test_search_domains_alone_do_not_match_all() {
        let mut cfg = tunnel(&[], vec![]);
        cfg.interface.dns_search = vec!["corp.example".to_string()];
        let dns = derive(&cfg, &[]).dns.unwrap();
        assert!(dns.servers.is_empty());
        assert!(!dns.matches_all_domains());
    }

    #[test]
    fn test_placeholder_remote_address() {
        let cfg = tunnel(&[], vec![]);
        assert_eq!(
            derive(&cfg, &[]).tunnel_remote_address,
            "127.0.0.1".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_route_prefix_len_from_mask() {
        assert_eq!(Ipv4Route::new(Ipv4Addr::new(10, 0, 0, 0), 8).prefix_len(), 8);
        assert_eq!(Ipv4Route::new(Ipv4Addr::new(10, 0, 0, 1), 32).prefix_len(), 32);
    }
}
