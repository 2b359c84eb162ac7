use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::ExitCode;
use tracing::info;

use tunnelkit::resolver::{resolution_failures, resolved_endpoints};
use tunnelkit::{
    EndpointResolver, PeerSlots, ResolutionResult, TunnelConfiguration, UapiSocketBackend,
};

/// Exit code when the output was produced but some hostnames did not resolve
const EXIT_PARTIAL: u8 = 2;

struct Loaded {
    config: TunnelConfiguration,
    outcomes: Vec<Option<ResolutionResult>>,
}

async fn load_and_resolve(path: &Path) -> Result<Loaded> {
    let config = TunnelConfiguration::load(path)
        .await
        .with_context(|| format!("Failed to load tunnel description {}", path.display()))?;
    let outcomes = EndpointResolver::system()
        .resolve_all(&config.endpoints())
        .await;
    Ok(Loaded { config, outcomes })
}

/// Report unresolved hostnames on stderr; the exit code reflects them.
fn report_failures(outcomes: &[Option<ResolutionResult>]) -> ExitCode {
    let failures = resolution_failures(outcomes);
    if failures.is_empty() {
        return ExitCode::SUCCESS;
    }
    for failure in &failures {
        eprintln!("Unresolved endpoint: {}", failure.address);
    }
    ExitCode::from(EXIT_PARTIAL)
}

/// Print the UAPI `set` payload.
pub(crate) async fn uapi(path: &Path, endpoints_only: bool) -> Result<ExitCode> {
    let loaded = load_and_resolve(path).await?;
    let resolved = resolved_endpoints(&loaded.outcomes);
    let slots = PeerSlots::new(&loaded.config, &resolved);

    let compiled = if endpoints_only {
        slots.endpoint_uapi_configuration()
    } else {
        slots.uapi_configuration()
    };
    print!("{}", compiled.payload);

    Ok(report_failures(&loaded.outcomes))
}

/// Print derived network settings as JSON.
pub(crate) async fn settings(path: &Path) -> Result<ExitCode> {
    let loaded = load_and_resolve(path).await?;
    let resolved = resolved_endpoints(&loaded.outcomes);
    let settings = PeerSlots::new(&loaded.config, &resolved).network_settings();

    println!(
        "{}",
        serde_json::to_string_pretty(&settings).context("Failed to serialize network settings")?
    );

    Ok(report_failures(&loaded.outcomes))
}

/// Push the compiled payload to a running backend.
pub(crate) async fn apply(path: &Path, socket: &Path) -> Result<ExitCode> {
    let loaded = load_and_resolve(path).await?;
    let resolved = resolved_endpoints(&loaded.outcomes);
    let compiled = PeerSlots::new(&loaded.config, &resolved).uapi_configuration();

    let backend = UapiSocketBackend::new(socket);
    let errno = backend
        .uapi_set(&compiled.payload)
        .await
        .with_context(|| format!("Failed to reach backend at {}", socket.display()))?;
    if errno != 0 {
        bail!("Backend rejected configuration (errno={errno})");
    }

    info!(
        socket = %socket.display(),
        peers = loaded.config.peers.len(),
        "Configuration applied"
    );
    println!("Applied {} peer(s) to {}", loaded.config.peers.len(), socket.display());

    Ok(report_failures(&loaded.outcomes))
}
