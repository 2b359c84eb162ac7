//! TunnelKit - WireGuard / AmneziaWG tunnel configuration compiler
//!
//! Turns a declarative tunnel description into the two artifacts a running
//! tunnel needs: the UAPI `set` payload for the packet-forwarding backend, and
//! the address/route/DNS settings for the OS network stack. Peer endpoints
//! given by hostname are resolved per peer, so one bad name never takes down
//! its siblings.
//!
//! The backend is opaque and reached only through UAPI text; the obfuscation
//! fields (`jc`, `jmin`, `s1`..`s4`, `h1`..`h4`, `i1`..`i5`, `j1`..`j3`,
//! `itime`) are emitted only when set, so a plain WireGuard configuration
//! compiles to plain WireGuard UAPI.
//!
//! # Modules
//!
//! - [`key`] - Curve25519 key newtypes (base64 / hex)
//! - [`address`] - CIDR address ranges
//! - [`endpoint`] - Peer endpoints (`host:port`)
//! - [`config`] - Tunnel, interface and peer configuration
//! - [`resolver`] - Per-peer endpoint resolution
//! - [`uapi`] - UAPI payload compiler
//! - [`settings`] - Route and DNS derivation
//! - [`health`] - Runtime status parsing and handshake freshness
//! - [`transport`] - Backend trait and UAPI socket backend
//! - [`adapter`] - Tunnel lifecycle orchestration
//! - [`provider`] - Host-facing facade with stable error codes
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```ignore
//! use tunnelkit::{EndpointResolver, PeerSlots, TunnelConfiguration};
//! use tunnelkit::resolver::{resolution_failures, resolved_endpoints};
//! use std::path::Path;
//!
//! let config = TunnelConfiguration::load(Path::new("wg0.json")).await?;
//! let outcomes = EndpointResolver::system().resolve_all(&config.endpoints()).await;
//! for failure in resolution_failures(&outcomes) {
//!     eprintln!("could not resolve {}", failure.address);
//! }
//!
//! let resolved = resolved_endpoints(&outcomes);
//! let slots = PeerSlots::new(&config, &resolved);
//! println!("{}", slots.uapi_configuration().payload);
//! println!("{:?}", slots.network_settings());
//! ```
//!
//! ## Driving a live backend
//!
//! ```ignore
//! use tunnelkit::{TunnelAdapter, UapiSocketBackend};
//!
//! let adapter = TunnelAdapter::new(UapiSocketBackend::for_interface("wg0"), device);
//! adapter.start(config).await?;
//! let fresh = adapter.has_fresh_handshake(std::time::SystemTime::now()).await;
//! ```

pub mod adapter;
pub mod address;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod key;
pub mod provider;
pub mod resolver;
pub mod settings;
pub mod transport;
pub mod uapi;

// Re-export commonly used types
pub use adapter::{AdapterError, AdapterState, TunnelAdapter, TunnelDevice};
pub use address::{AddressFamily, AddressRange};
pub use config::{DnsServer, InterfaceConfiguration, PeerConfiguration, TunnelConfiguration};
pub use endpoint::{Endpoint, Host};
pub use error::{Result, TunnelError};
pub use health::{
    contains_fresh_handshake, PeerRuntimeStatus, RuntimeConfiguration, RuntimeSummary,
    RX_BYTES_FRESHNESS_THRESHOLD,
};
pub use key::{PreSharedKey, PrivateKey, PublicKey, KEY_LEN};
pub use provider::{ProviderError, TunnelProvider};
pub use resolver::{
    DnsResolutionError, EndpointResolver, Resolve, ResolutionResult, ResolvedEndpoint,
    SystemResolver,
};
pub use settings::{
    DnsSettings, FamilySettings, Ipv4Route, Ipv6Route, MtuFallback, MtuSetting, NetworkSettings,
};
pub use transport::{Backend, BackendHandle, UapiSocketBackend};
pub use uapi::{compile, PeerSlot, PeerSlots, UapiConfiguration};
