use anyhow::{Context, Result};
use std::path::Path;
use std::process::ExitCode;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncReadExt;
use tunnelkit::RuntimeConfiguration;

async fn read_runtime(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("Failed to read runtime configuration from stdin")?;
        Ok(text)
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}

/// Print per-peer status and whether the tunnel is live. Exits non-zero when
/// it is not.
pub(crate) async fn freshness(path: &Path, max_age_secs: u64) -> Result<ExitCode> {
    let runtime = RuntimeConfiguration::parse(&read_runtime(path).await?);
    let now = SystemTime::now();
    let max_age = Duration::from_secs(max_age_secs);
    let cutoff = now.checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);

    for peer in &runtime.peers {
        let handshake = match peer.handshake_age(now) {
            Some(age) if age <= max_age => format!("{}s ago", age.as_secs()),
            Some(age) => format!("{}s ago (stale)", age.as_secs()),
            None => "never".to_string(),
        };
        println!(
            "{}  handshake: {}  rx: {}  tx: {}",
            peer.public_key,
            handshake,
            peer.rx_bytes.map_or_else(|| "-".to_string(), |b| b.to_string()),
            peer.tx_bytes.map_or_else(|| "-".to_string(), |b| b.to_string()),
        );
    }

    if runtime.has_fresh_handshake(cutoff) {
        println!("fresh");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("stale");
        Ok(ExitCode::FAILURE)
    }
}
