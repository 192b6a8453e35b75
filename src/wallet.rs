//! Wallet loading
//!
//! Keys come from an environment variable or a keypair file. Secret bytes
//! are wiped after the keypair is built and never logged.

use anyhow::{bail, Context, Result};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use zeroize::Zeroizing;

const KEYPAIR_LEN: usize = 64;

/// Where a signing key is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeypairSource {
    /// Variable holding a JSON byte array or a base58 string
    Env(String),
    /// File holding a JSON byte array or 64 raw bytes
    File(PathBuf),
}

impl fmt::Display for KeypairSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeypairSource::Env(name) => write!(f, "env:{name}"),
            KeypairSource::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

fn keypair_from_bytes(bytes: &[u8]) -> Result<Keypair> {
    if bytes.len() != KEYPAIR_LEN {
        bail!(
            "Invalid keypair length: expected {} bytes, got {}",
            KEYPAIR_LEN,
            bytes.len()
        );
    }
    if bytes.iter().all(|&b| b == 0) {
        bail!("Invalid keypair: all-zero key rejected");
    }
    Keypair::try_from(bytes).context("Invalid keypair bytes")
}

/// Decode a secret given as text: a JSON array of bytes or base58
fn keypair_from_text(text: &str) -> Result<Keypair> {
    let text = text.trim();
    let bytes: Zeroizing<Vec<u8>> = if text.starts_with('[') {
        Zeroizing::new(serde_json::from_str(text).context("Failed to parse keypair JSON")?)
    } else {
        Zeroizing::new(
            bs58::decode(text)
                .into_vec()
                .context("Failed to decode base58 keypair")?,
        )
    };
    keypair_from_bytes(&bytes)
}

/// Load a signing key from `source`
pub fn load_keypair(source: &KeypairSource) -> Result<Keypair> {
    match source {
        KeypairSource::Env(name) => {
            let value = Zeroizing::new(
                std::env::var(name)
                    .with_context(|| format!("Environment variable {name} is not set"))?,
            );
            keypair_from_text(&value)
        }
        KeypairSource::File(path) => {
            let bytes = Zeroizing::new(
                std::fs::read(path)
                    .with_context(|| format!("Failed to read keypair file: {}", path.display()))?,
            );
            if bytes.len() == KEYPAIR_LEN {
                keypair_from_bytes(&bytes)
            } else {
                let text = std::str::from_utf8(&bytes).context("Keypair file is not UTF-8")?;
                keypair_from_text(text)
            }
        }
    }
}

/// Loaded signing key shared between operations
#[derive(Clone)]
pub struct Wallet {
    keypair: Arc<Keypair>,
}

impl Wallet {
    pub fn load(source: &KeypairSource) -> Result<Self> {
        Ok(Self::from_keypair(load_keypair(source)?))
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("pubkey", &self.pubkey())
            .finish()
    }
}
