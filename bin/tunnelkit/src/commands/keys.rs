use anyhow::{Context, Result};
use std::process::ExitCode;
use tunnelkit::PrivateKey;

pub(crate) fn genkey() -> Result<ExitCode> {
    println!("{}", PrivateKey::generate().base64_key());
    Ok(ExitCode::SUCCESS)
}

pub(crate) fn pubkey(private_key: &str) -> Result<ExitCode> {
    let key = PrivateKey::from_base64(private_key.trim()).context("Invalid private key")?;
    println!("{}", key.public_key());
    Ok(ExitCode::SUCCESS)
}
