//! Runtime status and handshake freshness
//!
//! Parses the backend's UAPI `get` response into per-peer status records and
//! decides whether the tunnel is actually passing traffic.

use crate::key::PublicKey;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Received bytes that count as live traffic when handshake telemetry is missing
pub const RX_BYTES_FRESHNESS_THRESHOLD: u64 = 4096;

/// Runtime view of one peer, as reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeerRuntimeStatus {
    /// Base64 public key (hex text kept as-is if it does not decode)
    pub public_key: String,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<String>,
    /// `None` when the peer has never completed a handshake
    pub last_handshake_time: Option<SystemTime>,
    pub rx_bytes: Option<u64>,
    pub tx_bytes: Option<u64>,
    pub persistent_keepalive: Option<u16>,
}

impl PeerRuntimeStatus {
    /// Seconds elapsed since the last handshake, relative to `now`.
    pub fn handshake_age(&self, now: SystemTime) -> Option<Duration> {
        self.last_handshake_time
            .map(|t| now.duration_since(t).unwrap_or_default())
    }
}

/// Parsed UAPI `get` response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeConfiguration {
    pub listen_port: Option<u16>,
    pub peers: Vec<PeerRuntimeStatus>,
}

impl RuntimeConfiguration {
    /// Parse a UAPI `get` response.
    ///
    /// Interface-level fields come first; each `public_key=` line opens a new
    /// peer block. Unknown keys, malformed lines and `errno=` are ignored.
    pub fn parse(response: &str) -> Self {
        let mut config = Self::default();
        let mut current: Option<PeerRuntimeStatus> = None;

        for line in response.lines() {
            let line = line.trim();
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };

            if key == "public_key" {
                if let Some(peer) = current.take() {
                    config.peers.push(peer);
                }
                current = Some(PeerRuntimeStatus {
                    public_key: hex_key_to_base64(value),
                    ..Default::default()
                });
                continue;
            }

            let Some(peer) = current.as_mut() else {
                if key == "listen_port" {
                    config.listen_port = value.parse().ok();
                }
                continue;
            };

            match key {
                "endpoint" if value != "(none)" => peer.endpoint = Some(value.to_string()),
                "allowed_ip" => peer.allowed_ips.push(value.to_string()),
                "last_handshake_time_sec" => {
                    peer.last_handshake_time = value
                        .parse::<u64>()
                        .ok()
                        .filter(|&secs| secs > 0)
                        .and_then(|secs| UNIX_EPOCH.checked_add(Duration::from_secs(secs)));
                }
                "last_handshake_time_nsec" => {
                    if let (Some(t), Ok(nanos)) = (peer.last_handshake_time, value.parse::<u32>()) {
                        peer.last_handshake_time =
                            t.checked_add(Duration::from_nanos(u64::from(nanos)));
                    }
                }
                "rx_bytes" => peer.rx_bytes = value.parse().ok(),
                "tx_bytes" => peer.tx_bytes = value.parse().ok(),
                "persistent_keepalive_interval" => peer.persistent_keepalive = value.parse().ok(),
                _ => {}
            }
        }

        if let Some(peer) = current {
            config.peers.push(peer);
        }
        config
    }

    /// Whether any peer shows evidence of a live tunnel.
    pub fn has_fresh_handshake(&self, cutoff: SystemTime) -> bool {
        contains_fresh_handshake(&self.peers, cutoff)
    }
}

/// Decide whether a tunnel is live.
///
/// Fresh when any peer reports a handshake time, or has received at least
/// [`RX_BYTES_FRESHNESS_THRESHOLD`] bytes. `cutoff` is accepted for recency
/// filtering but is not applied: any handshake counts regardless of age.
pub fn contains_fresh_handshake(peers: &[PeerRuntimeStatus], cutoff: SystemTime) -> bool {
    let _ = cutoff;
    peers.iter().any(|peer| {
        peer.last_handshake_time.is_some()
            || peer
                .rx_bytes
                .is_some_and(|rx| rx >= RX_BYTES_FRESHNESS_THRESHOLD)
    })
}

/// Compact per-peer counters pulled out of a UAPI `get` response for logging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeSummary {
    pub peer_count: usize,
    pub last_handshake_time_sec: Vec<String>,
    pub rx_bytes: Vec<String>,
    pub tx_bytes: Vec<String>,
}

impl RuntimeSummary {
    pub fn from_uapi(response: &str) -> Self {
        let mut summary = Self::default();
        for line in response.lines() {
            if line.starts_with("public_key=") {
                summary.peer_count += 1;
            } else if let Some(v) = line.strip_prefix("last_handshake_time_sec=") {
                summary.last_handshake_time_sec.push(v.to_string());
            } else if let Some(v) = line.strip_prefix("rx_bytes=") {
                summary.rx_bytes.push(v.to_string());
            } else if let Some(v) = line.strip_prefix("tx_bytes=") {
                summary.tx_bytes.push(v.to_string());
            }
        }
        summary
    }
}

impl fmt::Display for RuntimeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "peers={} last_handshake_time_sec={:?} rx_bytes={:?} tx_bytes={:?}",
            self.peer_count, self.last_handshake_time_sec, self.rx_bytes, self.tx_bytes
        )
    }
}

/// Convert a hex-encoded key (from UAPI) to standard base64.
fn hex_key_to_base64(hex_key: &str) -> String {
    PublicKey::from_hex(hex_key)
        .map(|key| key.base64_key())
        .unwrap_or_else(|_| hex_key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    fn status(handshake: Option<u64>, rx: Option<u64>) -> PeerRuntimeStatus {
        PeerRuntimeStatus {
            last_handshake_time: handshake.map(|s| UNIX_EPOCH + Duration::from_secs(s)),
            rx_bytes: rx,
            ..Default::default()
        }
    }

    #[test]
    fn test_low_traffic_without_handshake_is_not_fresh() {
        let peers = vec![status(None, Some(2000)), status(None, Some(2000))];
        assert!(!contains_fresh_handshake(&peers, SystemTime::now()));
    }

    #[test]
    fn test_traffic_over_threshold_is_fresh() {
        let peers = vec![status(None, Some(2000)), status(None, Some(5000))];
        assert!(contains_fresh_handshake(&peers, SystemTime::now()));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(contains_fresh_handshake(&[status(None, Some(4096))], SystemTime::now()));
        assert!(!contains_fresh_handshake(&[status(None, Some(4095))], SystemTime::now()));
    }

    #[test]
    fn test_any_handshake_is_fresh_regardless_of_age() {
        // Handshake long before the cutoff still counts.
        let peers = vec![status(Some(1), Some(0))];
        assert!(contains_fresh_handshake(&peers, SystemTime::now()));
    }

    #[test]
    fn test_empty_and_unknown_counters() {
        assert!(!contains_fresh_handshake(&[], SystemTime::now()));
        assert!(!contains_fresh_handshake(&[status(None, None)], SystemTime::now()));
    }

    #[test]
    fn test_parse_uapi_get_response() {
        let key_bytes = [0xABu8; 32];
        let hex_key = hex::encode(key_bytes);
        let expected_b64 = STANDARD.encode(key_bytes);

        let response = format!(
            "private_key=0000000000000000000000000000000000000000000000000000000000000000\n\
             listen_port=51820\n\
             public_key={hex_key}\n\
             endpoint=192.168.1.5:51820\n\
             allowed_ip=10.200.0.2/32\n\
             last_handshake_time_sec=1700000000\n\
             last_handshake_time_nsec=500\n\
             rx_bytes=12345\n\
             tx_bytes=67890\n\
             persistent_keepalive_interval=25\n\
             protocol_version=1\n\
             errno=0\n"
        );

        let runtime = RuntimeConfiguration::parse(&response);
        assert_eq!(runtime.listen_port, Some(51820));
        assert_eq!(runtime.peers.len(), 1);

        let peer = &runtime.peers[0];
        assert_eq!(peer.public_key, expected_b64);
        assert_eq!(peer.endpoint.as_deref(), Some("192.168.1.5:51820"));
        assert_eq!(peer.allowed_ips, vec!["10.200.0.2/32".to_string()]);
        assert_eq!(
            peer.last_handshake_time,
            Some(UNIX_EPOCH + Duration::new(1_700_000_000, 500))
        );
        assert_eq!(peer.rx_bytes, Some(12345));
        assert_eq!(peer.tx_bytes, Some(67890));
        assert_eq!(peer.persistent_keepalive, Some(25));
    }

    #[test]
    fn test_parse_multiple_peers_and_never_handshaked() {
        let key1 = hex::encode([0x01u8; 32]);
        let key2 = hex::encode([0x02u8; 32]);
        let response = format!(
            "public_key={key1}\n\
             endpoint=(none)\n\
             last_handshake_time_sec=0\n\
             last_handshake_time_nsec=0\n\
             rx_bytes=100\n\
             public_key={key2}\n\
             allowed_ip=10.200.0.3/32\n\
             allowed_ip=10.200.1.0/24\n\
             rx_bytes=300\n\
             errno=0\n"
        );

        let runtime = RuntimeConfiguration::parse(&response);
        assert_eq!(runtime.peers.len(), 2);
        assert_eq!(runtime.peers[0].endpoint, None);
        assert_eq!(runtime.peers[0].last_handshake_time, None);
        assert_eq!(runtime.peers[1].rx_bytes, Some(300));
        assert_eq!(runtime.peers[1].allowed_ips.len(), 2);
        assert!(!runtime.has_fresh_handshake(SystemTime::now()));
    }

    #[test]
    fn test_parse_tolerates_garbage() {
        let response = "garbage line\nlisten_port=abc\nwho_knows=1\nerrno=0\n";
        let runtime = RuntimeConfiguration::parse(response);
        assert!(runtime.peers.is_empty());
        assert_eq!(runtime.listen_port, None);
    }

    #[test]
    fn test_overflowing_handshake_time_is_ignored() {
        let response = "public_key=aa\n\
                        last_handshake_time_sec=18446744073709551615\n\
                        last_handshake_time_nsec=999999999\n\
                        rx_bytes=10\n";
        let runtime = RuntimeConfiguration::parse(response);

        assert_eq!(runtime.peers.len(), 1);
        assert_eq!(runtime.peers[0].last_handshake_time, None);
        assert_eq!(runtime.peers[0].rx_bytes, Some(10));
        assert!(!runtime.has_fresh_handshake(SystemTime::now()));
    }

    #[test]
    fn test_undecodable_key_kept_verbatim() {
        let runtime = RuntimeConfiguration::parse("public_key=nothex\n");
        assert_eq!(runtime.peers[0].public_key, "nothex");
    }

    #[test]
    fn test_runtime_summary() {
        let response = "listen_port=1\npublic_key=aa\nlast_handshake_time_sec=5\nrx_bytes=10\ntx_bytes=20\npublic_key=bb\nrx_bytes=30\n";
        let summary = RuntimeSummary::from_uapi(response);
        assert_eq!(summary.peer_count, 2);
        assert_eq!(summary.last_handshake_time_sec, vec!["5"]);
        assert_eq!(summary.rx_bytes, vec!["10", "30"]);
        assert_eq!(summary.tx_bytes, vec!["20"]);
        assert!(summary.to_string().starts_with("peers=2 "));
    }

    #[test]
    fn test_handshake_age() {
        let peer = status(Some(100), None);
        let now = UNIX_EPOCH + Duration::from_secs(160);
        assert_eq!(peer.handshake_age(now), Some(Duration::from_secs(60)));
        assert_eq!(status(None, None).handshake_age(now), None);
    }
}
