//! Tunnel adapter
//!
//! Orchestrates one tunnel: resolves peer endpoints, applies network settings
//! to the tunnel device, compiles the UAPI payload and drives the backend.

use crate::config::TunnelConfiguration;
use crate::health::RuntimeConfiguration;
use crate::resolver::{
    resolution_failures, resolved_endpoints, DnsResolutionError, EndpointResolver, Resolve,
    SystemResolver,
};
use crate::settings::{MtuFallback, NetworkSettings};
use crate::transport::{Backend, BackendHandle};
use crate::uapi::PeerSlots;
use async_trait::async_trait;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// The OS side of a tunnel: its packet file descriptor and routing sink
#[async_trait]
pub trait TunnelDevice: Send + Sync {
    /// File descriptor of the tunnel interface, if one exists yet.
    async fn tunnel_file_descriptor(&self) -> Option<i32>;

    /// Apply network settings; `None` clears them.
    async fn set_network_settings(&self, settings: Option<NetworkSettings>) -> Result<(), String>;
}

/// Errors raised while driving a tunnel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("cannot locate tunnel file descriptor")]
    CannotLocateTunnelFileDescriptor,

    #[error("DNS resolution failed for {}", join_hostnames(.0))]
    DnsResolution(Vec<DnsResolutionError>),

    #[error("failed to set network settings: {0}")]
    SetNetworkSettings(String),

    #[error("backend failed to start (code {0})")]
    StartBackend(i32),

    #[error("backend rejected configuration (code {0})")]
    SetBackendConfiguration(i32),

    #[error("adapter is in an invalid state for this operation")]
    InvalidState,
}

impl AdapterError {
    /// Hostnames that failed to resolve, for DNS failures.
    pub fn failed_hostnames(&self) -> Vec<&str> {
        match self {
            Self::DnsResolution(errors) => errors.iter().map(|e| e.address.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

/// Join failing hostnames for display, in peer order.
pub fn join_hostnames(errors: &[DnsResolutionError]) -> String {
    errors
        .iter()
        .map(|e| e.address.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Lifecycle state of a [`TunnelAdapter`]
#[derive(Debug, Clone, Default)]
pub enum AdapterState {
    #[default]
    Stopped,
    Started {
        handle: BackendHandle,
        config: TunnelConfiguration,
        settings: NetworkSettings,
    },
}

/// Drives a backend and a tunnel device from a [`TunnelConfiguration`]
pub struct TunnelAdapter<B, D, R = SystemResolver> {
    backend: B,
    device: D,
    resolver: EndpointResolver<R>,
    mtu_fallback: MtuFallback,
    state: Mutex<AdapterState>,
}

impl<B: Backend, D: TunnelDevice> TunnelAdapter<B, D, SystemResolver> {
    pub fn new(backend: B, device: D) -> Self {
        Self::with_resolver(backend, device, EndpointResolver::system())
    }
}

impl<B: Backend, D: TunnelDevice, R: Resolve> TunnelAdapter<B, D, R> {
    pub fn with_resolver(backend: B, device: D, resolver: EndpointResolver<R>) -> Self {
        Self {
            backend,
            device,
            resolver,
            mtu_fallback: MtuFallback::for_current_platform(),
            state: Mutex::new(AdapterState::Stopped),
        }
    }

    /// Override how an automatic MTU is filled in.
    pub fn with_mtu_fallback(mut self, fallback: MtuFallback) -> Self {
        self.mtu_fallback = fallback;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub async fn is_started(&self) -> bool {
        matches!(*self.state.lock().await, AdapterState::Started { .. })
    }

    /// Network settings currently applied, if started.
    pub async fn network_settings(&self) -> Option<NetworkSettings> {
        match &*self.state.lock().await {
            AdapterState::Started { settings, .. } => Some(settings.clone()),
            AdapterState::Stopped => None,
        }
    }

    /// Bring the tunnel up.
    ///
    /// Every hostname must resolve; any failure aborts before the device or
    /// backend is touched.
    pub async fn start(&self, config: TunnelConfiguration) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        if matches!(*state, AdapterState::Started { .. }) {
            return Err(AdapterError::InvalidState);
        }

        let outcomes = self.resolver.resolve_all(&config.endpoints()).await;
        let failures = resolution_failures(&outcomes);
        if !failures.is_empty() {
            return Err(AdapterError::DnsResolution(failures));
        }
        let resolved = resolved_endpoints(&outcomes);
        let slots = PeerSlots::new(&config, &resolved);

        let settings = slots.network_settings_with(self.mtu_fallback);
        self.device
            .set_network_settings(Some(settings.clone()))
            .await
            .map_err(AdapterError::SetNetworkSettings)?;

        let Some(fd) = self.device.tunnel_file_descriptor().await else {
            self.clear_network_settings().await;
            return Err(AdapterError::CannotLocateTunnelFileDescriptor);
        };

        let uapi = slots.uapi_configuration();
        let handle = match self.backend.turn_on(&uapi.payload, fd).await {
            Ok(handle) => handle,
            Err(code) => {
                self.clear_network_settings().await;
                return Err(AdapterError::StartBackend(code));
            }
        };

        info!(handle = handle.0, tunnel_fd = fd, peers = config.peers.len(), "Tunnel started");
        *state = AdapterState::Started {
            handle,
            config,
            settings,
        };
        Ok(())
    }

    /// Tear the tunnel down and clear its network settings.
    pub async fn stop(&self) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        let AdapterState::Started { handle, .. } = std::mem::take(&mut *state) else {
            return Err(AdapterError::InvalidState);
        };

        self.backend.turn_off(handle).await;
        self.clear_network_settings().await;
        info!(handle = handle.0, "Tunnel stopped");
        Ok(())
    }

    async fn clear_network_settings(&self) {
        if let Err(e) = self.device.set_network_settings(None).await {
            warn!(error = %e, "Failed to clear network settings");
        }
    }

    /// Replace the running configuration.
    ///
    /// Unlike [`start`](Self::start), peers whose endpoint fails to resolve
    /// are kept and compiled without an endpoint line.
    pub async fn update(&self, config: TunnelConfiguration) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        let AdapterState::Started { handle, .. } = &*state else {
            return Err(AdapterError::InvalidState);
        };
        let handle = *handle;

        let outcomes = self.resolver.resolve_all(&config.endpoints()).await;
        for failure in resolution_failures(&outcomes) {
            warn!(hostname = %failure.address, "Keeping peer without endpoint after failed resolution");
        }
        let resolved = resolved_endpoints(&outcomes);
        let slots = PeerSlots::new(&config, &resolved);

        let settings = slots.network_settings_with(self.mtu_fallback);
        self.device
            .set_network_settings(Some(settings.clone()))
            .await
            .map_err(AdapterError::SetNetworkSettings)?;

        let uapi = slots.uapi_configuration();
        self.backend
            .set_config(handle, &uapi.payload)
            .await
            .map_err(AdapterError::SetBackendConfiguration)?;

        debug!(handle = handle.0, peers = config.peers.len(), "Tunnel configuration updated");
        *state = AdapterState::Started {
            handle,
            config,
            settings,
        };
        Ok(())
    }

    /// Re-resolve endpoints after a network path change and re-point peers.
    ///
    /// Only `public_key`/`endpoint` pairs are pushed; keys, allowed IPs and
    /// network settings stay as they are.
    pub async fn refresh_endpoints(&self) -> Result<(), AdapterError> {
        let state = self.state.lock().await;
        let AdapterState::Started { handle, config, .. } = &*state else {
            return Err(AdapterError::InvalidState);
        };

        let outcomes = self.resolver.resolve_all(&config.endpoints()).await;
        for failure in resolution_failures(&outcomes) {
            warn!(hostname = %failure.address, "Endpoint re-resolution failed");
        }
        let resolved = resolved_endpoints(&outcomes);
        let uapi = PeerSlots::new(config, &resolved).endpoint_uapi_configuration();

        self.backend
            .set_config(*handle, &uapi.payload)
            .await
            .map_err(|code| {
                error!(handle = handle.0, code, "Backend rejected endpoint refresh");
                AdapterError::SetBackendConfiguration(code)
            })
    }

    /// The backend's UAPI `get` response, if started.
    pub async fn runtime_configuration(&self) -> Option<String> {
        let handle = match &*self.state.lock().await {
            AdapterState::Started { handle, .. } => *handle,
            AdapterState::Stopped => return None,
        };
        self.backend.get_config(handle).await
    }

    /// Whether the running tunnel shows a handshake or meaningful traffic.
    pub async fn has_fresh_handshake(&self, cutoff: SystemTime) -> bool {
        match self.runtime_configuration().await {
            Some(text) => RuntimeConfiguration::parse(&text).has_fresh_handshake(cutoff),
            None => false,
        }
    }
}
