//! Provider facade
//!
//! The outermost layer an OS extension host talks to. Wraps a
//! [`TunnelAdapter`], maps its failures to stable error codes and answers
//! app messages.

use crate::adapter::{join_hostnames, AdapterError, TunnelAdapter, TunnelDevice};
use crate::config::TunnelConfiguration;
use crate::health::RuntimeSummary;
use crate::resolver::Resolve;
use crate::transport::Backend;
use thiserror::Error;
use tracing::{error, info};

/// App message requesting the runtime configuration
pub const MESSAGE_GET_RUNTIME_CONFIGURATION: u8 = 0;

/// Failures reported to the host, each with a stable code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("saved protocol configuration is invalid")]
    SavedProtocolConfigurationIsInvalid,

    #[error("DNS resolution failure")]
    DnsResolutionFailure,

    #[error("could not start backend")]
    CouldNotStartBackend,

    #[error("could not determine file descriptor")]
    CouldNotDetermineFileDescriptor,

    #[error("could not set network settings")]
    CouldNotSetNetworkSettings,

    #[error("invalid state")]
    InvalidState,
}

impl ProviderError {
    /// Stable numeric code for the host.
    pub fn code(&self) -> i32 {
        match self {
            Self::SavedProtocolConfigurationIsInvalid => 1,
            Self::DnsResolutionFailure => 2,
            Self::CouldNotStartBackend => 3,
            Self::CouldNotDetermineFileDescriptor => 4,
            Self::CouldNotSetNetworkSettings => 5,
            Self::InvalidState => 6,
        }
    }
}

impl From<&AdapterError> for ProviderError {
    fn from(err: &AdapterError) -> Self {
        match err {
            AdapterError::CannotLocateTunnelFileDescriptor => Self::CouldNotDetermineFileDescriptor,
            AdapterError::DnsResolution(_) => Self::DnsResolutionFailure,
            AdapterError::SetNetworkSettings(_) => Self::CouldNotSetNetworkSettings,
            AdapterError::StartBackend(_) | AdapterError::SetBackendConfiguration(_) => {
                Self::CouldNotStartBackend
            }
            AdapterError::InvalidState => Self::InvalidState,
        }
    }
}

/// Host-facing wrapper around a [`TunnelAdapter`]
pub struct TunnelProvider<B, D, R> {
    adapter: TunnelAdapter<B, D, R>,
}

impl<B: Backend, D: TunnelDevice, R: Resolve> TunnelProvider<B, D, R> {
    pub fn new(adapter: TunnelAdapter<B, D, R>) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &TunnelAdapter<B, D, R> {
        &self.adapter
    }

    /// Validate and start `config`.
    pub async fn start_tunnel(&self, config: TunnelConfiguration) -> Result<(), ProviderError> {
        if let Err(e) = config.validate() {
            error!(error = %e, "Refusing to start invalid configuration");
            return Err(ProviderError::SavedProtocolConfigurationIsInvalid);
        }

        let name = config.name.clone().unwrap_or_default();
        info!(tunnel = %name, "Starting tunnel");
        log_configuration_summary(&config);

        match self.adapter.start(config).await {
            Ok(()) => {
                info!(tunnel = %name, "Tunnel started");
                Ok(())
            }
            Err(e) => {
                match &e {
                    AdapterError::DnsResolution(failures) => {
                        error!(hostnames = %join_hostnames(failures), "DNS resolution failed");
                    }
                    AdapterError::StartBackend(code) => {
                        error!(code, "Backend failed to start");
                    }
                    other => error!(error = %other, "Tunnel failed to start"),
                }
                Err(ProviderError::from(&e))
            }
        }
    }

    pub async fn stop_tunnel(&self) -> Result<(), ProviderError> {
        info!("Stopping tunnel");
        self.adapter.stop().await.map_err(|e| {
            error!(error = %e, "Failed to stop tunnel");
            ProviderError::from(&e)
        })
    }

    /// Answer a message from the host app.
    ///
    /// `[0]` returns the runtime configuration as UTF-8; anything else yields
    /// `None`.
    pub async fn handle_app_message(&self, message: &[u8]) -> Option<Vec<u8>> {
        if message != [MESSAGE_GET_RUNTIME_CONFIGURATION] {
            return None;
        }
        let runtime = self.adapter.runtime_configuration().await?;
        info!(summary = %RuntimeSummary::from_uapi(&runtime), "Serving runtime configuration");
        Some(runtime.into_bytes())
    }
}

fn log_configuration_summary(config: &TunnelConfiguration) {
    let iface = &config.interface;
    let addresses: Vec<String> = iface.addresses.iter().map(ToString::to_string).collect();
    let dns: Vec<String> = iface.dns.iter().map(ToString::to_string).collect();
    let mtu = iface
        .mtu
        .filter(|&m| m > 0)
        .map_or_else(|| "auto".to_string(), |m| m.to_string());

    info!(
        addresses = %addresses.join(", "),
        dns = %dns.join(", "),
        mtu = %mtu,
        peers = config.peers.len(),
        "Interface configuration"
    );
    for (index, peer) in config.peers.iter().enumerate() {
        let endpoint = peer
            .endpoint
            .as_ref()
            .map_or_else(|| "none".to_string(), ToString::to_string);
        info!(
            peer = index,
            endpoint = %endpoint,
            allowed_ips = peer.allowed_ips.len(),
            exclude_ips = peer.exclude_ips.len(),
            keepalive = peer.persistent_keepalive.unwrap_or(0),
            "Peer configuration"
        );
    }
}
