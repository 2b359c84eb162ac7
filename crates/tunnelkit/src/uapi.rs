//! UAPI configuration compiler
//!
//! Turns a [`TunnelConfiguration`] plus its resolved endpoints into the
//! newline-delimited `key=value` body of a UAPI `set` operation. Line order is
//! part of the protocol: interface fields first, then `replace_peers`, then one
//! block per peer in configuration order.

use crate::config::{InterfaceConfiguration, PeerConfiguration, TunnelConfiguration};
use crate::endpoint::Endpoint;
use crate::resolver::{reresolve, ResolutionResult};
use std::fmt::{Display, Write as _};
use tracing::{debug, error};

/// One peer together with the endpoint resolved for it
#[derive(Debug, Clone, Copy)]
pub struct PeerSlot<'a> {
    pub peer: &'a PeerConfiguration,
    pub resolved_endpoint: Option<&'a Endpoint>,
}

/// A configuration's peers zipped with their resolved endpoints
///
/// Built once at the boundary so the compiler and the route deriver walk a
/// single sequence instead of two index-aligned lists.
#[derive(Debug, Clone)]
pub struct PeerSlots<'a> {
    config: &'a TunnelConfiguration,
    slots: Vec<PeerSlot<'a>>,
}

impl<'a> PeerSlots<'a> {
    /// Pair every peer with its resolved-endpoint slot.
    ///
    /// # Panics
    ///
    /// Panics if `resolved_endpoints` does not have exactly one slot per peer.
    /// A mismatch is a caller bug; no payload is produced for it.
    pub fn new(config: &'a TunnelConfiguration, resolved_endpoints: &'a [Option<Endpoint>]) -> Self {
        assert_eq!(
            config.peers.len(),
            resolved_endpoints.len(),
            "peer count and resolved endpoint count must match"
        );

        let slots = config
            .peers
            .iter()
            .zip(resolved_endpoints)
            .map(|(peer, endpoint)| PeerSlot {
                peer,
                resolved_endpoint: endpoint.as_ref(),
            })
            .collect();

        Self { config, slots }
    }

    pub fn configuration(&self) -> &'a TunnelConfiguration {
        self.config
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerSlot<'a>> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Full `set` body: interface, `replace_peers`, and every peer block.
    pub fn uapi_configuration(&self) -> UapiConfiguration {
        let interface = &self.config.interface;
        let mut out = UapiWriter::default();

        out.line("private_key", interface.private_key.hex_key());
        for (key, value) in interface_fields(interface) {
            if let Some(value) = value {
                out.line(key, value);
            }
        }

        if !self.is_empty() {
            out.line("replace_peers", "true");
        }

        let mut outcomes = Vec::with_capacity(self.len());
        for (index, slot) in self.slots.iter().enumerate() {
            let peer = slot.peer;
            out.line("public_key", peer.public_key.hex_key());
            if let Some(psk) = &peer.pre_shared_key {
                out.line("preshared_key", psk.hex_key());
            }

            outcomes.push(emit_endpoint(&mut out, index, slot));

            out.line(
                "persistent_keepalive_interval",
                peer.persistent_keepalive.unwrap_or(0),
            );
            if !peer.allowed_ips.is_empty() {
                out.line("replace_allowed_ips", "true");
                for range in &peer.allowed_ips {
                    out.line("allowed_ip", range);
                }
            }
        }

        debug!(peers = self.len(), "Compiled UAPI configuration");
        out.finish(outcomes)
    }

    /// Endpoint-only `set` body used to re-point peers after a network change.
    ///
    /// Emits `public_key` and, where resolution succeeded, `endpoint` for each
    /// peer. Keys, allowed IPs and interface fields are left untouched.
    pub fn endpoint_uapi_configuration(&self) -> UapiConfiguration {
        let mut out = UapiWriter::default();
        let mut outcomes = Vec::with_capacity(self.len());

        for (index, slot) in self.slots.iter().enumerate() {
            out.line("public_key", slot.peer.public_key.hex_key());
            outcomes.push(emit_endpoint(&mut out, index, slot));
        }

        debug!(peers = self.len(), "Compiled endpoint UAPI configuration");
        out.finish(outcomes)
    }
}

/// Compile a configuration and its per-peer resolved endpoints.
///
/// # Panics
///
/// Panics if `resolved_endpoints.len() != config.peers.len()`.
pub fn compile(config: &TunnelConfiguration, resolved_endpoints: &[Option<Endpoint>]) -> UapiConfiguration {
    PeerSlots::new(config, resolved_endpoints).uapi_configuration()
}

/// A compiled UAPI body with one resolution outcome slot per peer
#[derive(Debug, Clone)]
pub struct UapiConfiguration {
    /// `key=value` lines, each terminated by `\n`
    pub payload: String,
    /// Outcome `i` belongs to peer `i`; `None` where no endpoint was supplied
    pub outcomes: Vec<Option<ResolutionResult>>,
}

fn emit_endpoint(out: &mut UapiWriter, index: usize, slot: &PeerSlot<'_>) -> Option<ResolutionResult> {
    let outcome = slot.resolved_endpoint.map(reresolve);
    match &outcome {
        Some(Ok(resolved)) => out.line("endpoint", &resolved.resolved),
        Some(Err(e)) => {
            error!(peer = index, hostname = %e.address, "Endpoint reached the compiler unresolved");
        }
        None => {}
    }
    outcome
}

/// Optional interface lines in protocol order. MTU is not a UAPI field; it
/// travels through network settings.
fn interface_fields(iface: &InterfaceConfiguration) -> [(&'static str, Option<String>); 21] {
    fn num<T: ToString>(value: Option<T>) -> Option<String> {
        value.map(|v| v.to_string())
    }

    [
        ("listen_port", num(iface.listen_port)),
        ("jc", num(iface.junk_packet_count)),
        ("jmin", num(iface.junk_packet_min_size)),
        ("jmax", num(iface.junk_packet_max_size)),
        ("s1", num(iface.init_packet_junk_size)),
        ("s2", num(iface.response_packet_junk_size)),
        ("s3", num(iface.cookie_reply_packet_junk_size)),
        ("s4", num(iface.transport_packet_junk_size)),
        ("h1", num(iface.init_packet_magic_header)),
        ("h2", num(iface.response_packet_magic_header)),
        ("h3", num(iface.underload_packet_magic_header)),
        ("h4", num(iface.transport_packet_magic_header)),
        ("i1", iface.special_junk_1.clone()),
        ("i2", iface.special_junk_2.clone()),
        ("i3", iface.special_junk_3.clone()),
        ("i4", iface.special_junk_4.clone()),
        ("i5", iface.special_junk_5.clone()),
        ("j1", iface.controlled_junk_1.clone()),
        ("j2", iface.controlled_junk_2.clone()),
        ("j3", iface.controlled_junk_3.clone()),
        ("itime", num(iface.special_handshake_timeout)),
    ]
}

#[derive(Default)]
struct UapiWriter {
    buf: String,
}

impl UapiWriter {
    fn line(&mut self, key: &str, value: impl Display) {
        // Writing to a String cannot fail.
        let _ = writeln!(self.buf, "{key}={value}");
    }

    fn finish(self, outcomes: Vec<Option<ResolutionResult>>) -> UapiConfiguration {
        UapiConfiguration {
            payload: self.buf,
            outcomes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{PreSharedKey, PrivateKey, PublicKey};

    fn peer(byte: u8) -> PeerConfiguration {
        PeerConfiguration::new(PublicKey::from_bytes([byte; 32]))
    }

    fn config(peers: Vec<PeerConfiguration>) -> TunnelConfiguration {
        TunnelConfiguration::new(
            InterfaceConfiguration::new(PrivateKey::from_bytes([0x11; 32])),
            peers,
        )
    }

    fn lines(payload: &str) -> Vec<&str> {
        payload.lines().collect()
    }

    #[test]
    fn test_minimal_interface_without_peers() {
        let cfg = config(vec![]);
        let compiled = compile(&cfg, &[]);
        assert_eq!(compiled.payload, format!("private_key={}\n", "11".repeat(32)));
        assert!(compiled.outcomes.is_empty());
    }

    #[test]
    fn test_full_peer_block_order() {
        let mut p = peer(0x22);
        p.pre_shared_key = Some(PreSharedKey::from_bytes([0x33; 32]));
        p.persistent_keepalive = Some(25);
        p.allowed_ips = vec!["0.0.0.0/0".parse().unwrap(), "::/0".parse().unwrap()];
        let mut cfg = config(vec![p]);
        cfg.interface.listen_port = Some(51820);

        let endpoints = vec![Some("203.0.113.5:51820".parse().unwrap())];
        let compiled = compile(&cfg, &endpoints);

        assert_eq!(
            lines(&compiled.payload),
            vec![
                format!("private_key={}", "11".repeat(32)).as_str(),
                "listen_port=51820",
                "replace_peers=true",
                format!("public_key={}", "22".repeat(32)).as_str(),
                format!("preshared_key={}", "33".repeat(32)).as_str(),
                "endpoint=203.0.113.5:51820",
                "persistent_keepalive_interval=25",
                "replace_allowed_ips=true",
                "allowed_ip=0.0.0.0/0",
                "allowed_ip=::/0",
            ]
        );
        assert!(matches!(compiled.outcomes[0], Some(Ok(_))));
    }

    #[test]
    fn test_obfuscation_fields_in_fixed_order() {
        let mut cfg = config(vec![]);
        let iface = &mut cfg.interface;
        // Assigned out of protocol order on purpose.
        iface.special_handshake_timeout = Some(120);
        iface.controlled_junk_3 = Some("<r 10>".to_string());
        iface.transport_packet_magic_header = Some(4);
        iface.junk_packet_count = Some(5);
        iface.special_junk_1 = Some("<b 0xf6ab>".to_string());
        iface.init_packet_junk_size = Some(15);
        iface.junk_packet_max_size = Some(1000);
        iface.junk_packet_min_size = Some(50);
        iface.transport_packet_junk_size = Some(20);
        iface.init_packet_magic_header = Some(1);

        let compiled = compile(&cfg, &[]);
        let keys: Vec<&str> = compiled
            .payload
            .lines()
            .map(|l| l.split_once('=').unwrap().0)
            .collect();
        assert_eq!(
            keys,
            vec!["private_key", "jc", "jmin", "jmax", "s1", "s4", "h1", "h4", "i1", "j3", "itime"]
        );
        assert!(compiled.payload.contains("i1=<b 0xf6ab>\n"));
        assert!(compiled.payload.contains("itime=120\n"));
    }

    #[test]
    fn test_absent_optionals_never_leak() {
        let cfg = config(vec![peer(1)]);
        let compiled = compile(&cfg, &[None]);
        for key in ["listen_port=", "preshared_key=", "endpoint=", "allowed_ip=", "replace_allowed_ips=", "mtu", "jc="] {
            assert!(!compiled.payload.contains(key), "{key} leaked into {}", compiled.payload);
        }
        assert!(compiled.payload.contains("persistent_keepalive_interval=0\n"));
    }

    #[test]
    fn test_mtu_is_not_a_uapi_field() {
        let mut cfg = config(vec![]);
        cfg.interface.mtu = Some(0);
        assert!(!compile(&cfg, &[]).payload.contains("mtu"));
        cfg.interface.mtu = Some(1420);
        assert!(!compile(&cfg, &[]).payload.contains("mtu"));
    }

    #[test]
    fn test_one_public_key_per_peer_in_order() {
        let cfg = config((1..=5).map(peer).collect());
        let endpoints = vec![None; 5];
        let compiled = compile(&cfg, &endpoints);

        let keys: Vec<String> = compiled
            .payload
            .lines()
            .filter_map(|l| l.strip_prefix("public_key="))
            .map(str::to_string)
            .collect();
        let expected: Vec<String> = (1..=5u8).map(|b| hex::encode([b; 32])).collect();
        assert_eq!(keys, expected);
        assert_eq!(compiled.outcomes.len(), 5);
        assert!(compiled.outcomes.iter().all(Option::is_none));
    }

    #[test]
    #[should_panic(expected = "peer count and resolved endpoint count must match")]
    fn test_length_mismatch_panics() {
        let cfg = config(vec![peer(1), peer(2)]);
        let _ = compile(&cfg, &[None]);
    }

    #[test]
    fn test_unresolved_endpoint_is_reported_not_emitted() {
        let cfg = config(vec![peer(1), peer(2)]);
        let endpoints = vec![
            Some("vpn.example.com:51820".parse().unwrap()),
            Some("[2001:db8::7]:51820".parse().unwrap()),
        ];
        let compiled = compile(&cfg, &endpoints);

        assert_eq!(compiled.payload.matches("endpoint=").count(), 1);
        assert!(compiled.payload.contains("endpoint=[2001:db8::7]:51820\n"));
        let err = compiled.outcomes[0].as_ref().unwrap().as_ref().unwrap_err();
        assert_eq!(err.address, "vpn.example.com");
    }

    #[test]
    fn test_endpoint_only_configuration() {
        let mut p = peer(1);
        p.allowed_ips = vec!["10.0.0.0/8".parse().unwrap()];
        p.persistent_keepalive = Some(25);
        let mut cfg = config(vec![p, peer(2)]);
        cfg.interface.listen_port = Some(1234);

        let endpoints = vec![Some("192.0.2.1:51820".parse().unwrap()), None];
        let compiled = PeerSlots::new(&cfg, &endpoints).endpoint_uapi_configuration();

        assert_eq!(
            lines(&compiled.payload),
            vec![
                format!("public_key={}", hex::encode([1u8; 32])).as_str(),
                "endpoint=192.0.2.1:51820",
                format!("public_key={}", hex::encode([2u8; 32])).as_str(),
            ]
        );
        assert_eq!(compiled.outcomes.len(), 2);
        assert!(compiled.outcomes[1].is_none());
    }

    #[test]
    fn test_no_whitespace_around_equals() {
        let mut p = peer(1);
        p.allowed_ips = vec!["10.0.0.0/8".parse().unwrap()];
        let cfg = config(vec![p]);
        let compiled = compile(&cfg, &[Some("192.0.2.1:1".parse().unwrap())]);
        for line in compiled.payload.lines() {
            assert!(!line.contains(" ="), "{line}");
            assert!(!line.contains("= "), "{line}");
        }
        assert!(compiled.payload.ends_with('\n'));
    }
}
