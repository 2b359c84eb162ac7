//! Curve25519 key material
//!
//! Keys are carried as raw 32-byte values. Configuration files use the
//! standard base64 form (44 characters); the UAPI protocol uses lowercase hex.

use crate::error::{Result, TunnelError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length in bytes of every key type
pub const KEY_LEN: usize = 32;

fn decode_base64(value: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|e| TunnelError::InvalidKey(format!("not valid base64: {e}")))?;
    to_array(&bytes)
}

fn decode_hex(value: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = hex::decode(value.trim())
        .map_err(|e| TunnelError::InvalidKey(format!("not valid hex: {e}")))?;
    to_array(&bytes)
}

fn to_array(bytes: &[u8]) -> Result<[u8; KEY_LEN]> {
    <[u8; KEY_LEN]>::try_from(bytes).map_err(|_| {
        TunnelError::InvalidKey(format!(
            "Invalid key length: expected {KEY_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

macro_rules! key_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name([u8; KEY_LEN]);

        impl $name {
            /// Wrap raw key bytes
            pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
                Self(bytes)
            }

            /// Parse a standard base64 key
            pub fn from_base64(value: &str) -> Result<Self> {
                decode_base64(value).map(Self)
            }

            /// Parse a hex key as found in UAPI responses
            pub fn from_hex(value: &str) -> Result<Self> {
                decode_hex(value).map(Self)
            }

            /// Raw key bytes
            pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
                &self.0
            }

            /// Standard base64 encoding
            pub fn base64_key(&self) -> String {
                STANDARD.encode(self.0)
            }

            /// Lowercase hex encoding, the UAPI wire form
            pub fn hex_key(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl FromStr for $name {
            type Err = TunnelError;

            fn from_str(s: &str) -> Result<Self> {
                Self::from_base64(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.base64_key())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_base64(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

key_type!(
    /// A peer's (or our own) public key
    PublicKey
);

key_type!(
    /// Optional symmetric key mixed into the handshake
    PreSharedKey
);

key_type!(
    /// The interface's private key
    PrivateKey
);

impl PrivateKey {
    /// Generate a fresh private key from the OS RNG.
    pub fn generate() -> Self {
        use rand::rngs::OsRng;
        use x25519_dalek::StaticSecret;

        Self(StaticSecret::random_from_rng(OsRng).to_bytes())
    }

    /// Derive the x25519 public key for this private key.
    pub fn public_key(&self) -> PublicKey {
        use x25519_dalek::{PublicKey as DalekPublic, StaticSecret};

        let secret = StaticSecret::from(self.0);
        PublicKey(*DalekPublic::from(&secret).as_bytes())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base64_key())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.base64_key())
    }
}

// Secrets never appear in logs or debug output.
impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

impl fmt::Debug for PreSharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PreSharedKey(<redacted>)")
    }
}
