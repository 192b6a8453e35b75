//! Configuration for token-forge
//!
//! Loaded from a TOML file, with a `.env` file and environment variables
//! able to override the RPC endpoint and the wallet source.

use crate::extensions::{
    Extension, MetadataPointerParams, MintConfiguration, TokenMetadata, TransferFeeParams,
    TransferHookParams, MAX_FEE_BASIS_POINTS,
};
use crate::tx_builder::withheld::DEFAULT_MAX_ACCOUNTS_PER_WITHDRAWAL;
use crate::wallet::KeypairSource;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable overriding `rpc.url`
pub const RPC_URL_ENV: &str = "TOKEN_FORGE_RPC_URL";
/// Environment variable overriding the wallet keypair file
pub const KEYPAIR_PATH_ENV: &str = "TOKEN_FORGE_KEYPAIR_PATH";

/// Decimals above this are almost certainly a typo
pub const MAX_DECIMALS: u8 = 18;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub wallet: WalletConfig,

    /// Mint to create with `create-mint`
    #[serde(default)]
    pub mint: MintSettings,

    #[serde(default)]
    pub withdraw: WithdrawConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// processed, confirmed or finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,

    /// How long a submission may take to confirm
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Environment variable holding the secret key (JSON array or base58)
    #[serde(default = "default_keypair_env")]
    pub keypair_env: String,

    /// Keypair file, used when the environment variable is unset
    #[serde(default)]
    pub keypair_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintSettings {
    #[serde(default = "default_decimals")]
    pub decimals: u8,

    #[serde(default)]
    pub freeze_authority: Option<String>,

    #[serde(default)]
    pub transfer_fee: Option<TransferFeeSettings>,

    /// Program invoked on every transfer
    #[serde(default)]
    pub transfer_hook_program: Option<String>,

    #[serde(default)]
    pub metadata: Option<MetadataSettings>,

    #[serde(default)]
    pub non_transferable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferFeeSettings {
    pub basis_points: u16,
    pub maximum_fee: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataSettings {
    pub name: String,
    pub symbol: String,
    pub uri: String,

    /// Applied in order; a repeated key keeps its last value
    #[serde(default)]
    pub additional: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawConfig {
    /// Source accounts named by one withdrawal transaction
    #[serde(default = "default_max_accounts_per_tx")]
    pub max_accounts_per_tx: usize,
}

// Default value functions
fn default_rpc_url() -> String {
    "http://127.0.0.1:8899".to_string()
}
fn default_commitment() -> String {
    "confirmed".to_string()
}
fn default_confirm_timeout() -> u64 {
    60
}
fn default_keypair_env() -> String {
    "PRIVATE_KEY".to_string()
}
fn default_decimals() -> u8 {
    9
}
fn default_max_accounts_per_tx() -> usize {
    DEFAULT_MAX_ACCOUNTS_PER_WITHDRAWAL
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            commitment: default_commitment(),
            confirm_timeout_secs: default_confirm_timeout(),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keypair_env: default_keypair_env(),
            keypair_path: None,
        }
    }
}

impl Default for MintSettings {
    fn default() -> Self {
        Self {
            decimals: default_decimals(),
            freeze_authority: None,
            transfer_fee: None,
            transfer_hook_program: None,
            metadata: None,
            non_transferable: false,
        }
    }
}

impl Default for WithdrawConfig {
    fn default() -> Self {
        Self {
            max_accounts_per_tx: default_max_accounts_per_tx(),
        }
    }
}

impl RpcConfig {
    pub fn commitment_config(&self) -> anyhow::Result<CommitmentConfig> {
        CommitmentConfig::from_str(&self.commitment)
            .map_err(|_| anyhow::anyhow!("unknown commitment level '{}'", self.commitment))
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }
}

impl WalletConfig {
    /// Environment variable if set, keypair file otherwise
    pub fn source(&self) -> KeypairSource {
        match &self.keypair_path {
            Some(path) if std::env::var_os(&self.keypair_env).is_none() => {
                KeypairSource::File(path.clone())
            }
            _ => KeypairSource::Env(self.keypair_env.clone()),
        }
    }
}

fn parse_pubkey(field: &str, value: &str) -> anyhow::Result<Pubkey> {
    Pubkey::from_str(value).with_context(|| format!("{field}: invalid address '{value}'"))
}

impl MintSettings {
    /// Build the mint description. The metadata pointer targets the mint
    /// itself, and `authority` holds every extension authority.
    pub fn to_mint_configuration(
        &self,
        mint: Pubkey,
        authority: Pubkey,
    ) -> anyhow::Result<MintConfiguration> {
        let mut config = MintConfiguration::new(mint, self.decimals, authority);
        if let Some(freeze) = &self.freeze_authority {
            config = config.with_freeze_authority(parse_pubkey("mint.freeze_authority", freeze)?);
        }
        if let Some(fee) = &self.transfer_fee {
            config = config.with_extension(Extension::TransferFeeConfig(TransferFeeParams {
                fee_basis_points: fee.basis_points,
                maximum_fee: fee.maximum_fee,
                transfer_fee_config_authority: Some(authority),
                withdraw_withheld_authority: Some(authority),
            }))?;
        }
        if let Some(program) = &self.transfer_hook_program {
            config = config.with_extension(Extension::TransferHook(TransferHookParams {
                authority: Some(authority),
                program_id: Some(parse_pubkey("mint.transfer_hook_program", program)?),
            }))?;
        }
        if self.non_transferable {
            config = config.with_extension(Extension::NonTransferable)?;
        }
        if let Some(meta) = &self.metadata {
            let mut metadata = TokenMetadata::new(&meta.name, &meta.symbol, &meta.uri)
                .with_update_authority(authority);
            for (key, value) in &meta.additional {
                metadata = metadata.with_field(key, value);
            }
            config = config
                .with_extension(Extension::MetadataPointer(MetadataPointerParams {
                    authority: Some(authority),
                    metadata_address: Some(mint),
                }))?
                .with_extension(Extension::TokenMetadata(metadata))?;
        }
        Ok(config)
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration, then apply `.env` and environment overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(RPC_URL_ENV) {
            self.rpc.url = url;
        }
        if let Ok(path) = std::env::var(KEYPAIR_PATH_ENV) {
            self.wallet.keypair_path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rpc.url.trim().is_empty() {
            bail!("rpc.url must not be empty");
        }
        self.rpc.commitment_config()?;
        if self.mint.decimals > MAX_DECIMALS {
            bail!(
                "mint.decimals {} above {}",
                self.mint.decimals,
                MAX_DECIMALS
            );
        }
        if let Some(fee) = &self.mint.transfer_fee {
            if fee.basis_points > MAX_FEE_BASIS_POINTS {
                bail!(
                    "mint.transfer_fee.basis_points {} above {}",
                    fee.basis_points,
                    MAX_FEE_BASIS_POINTS
                );
            }
        }
        if self.withdraw.max_accounts_per_tx == 0 {
            bail!("withdraw.max_accounts_per_tx must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::ExtensionKind;
    use std::io::Write;

    const SAMPLE: &str = r#"
[rpc]
url = "http://localhost:8899"
commitment = "finalized"

[mint]
decimals = 6
transfer_hook_program = "11111111111111111111111111111111"

[mint.transfer_fee]
basis_points = 50
maximum_fee = 5000

[mint.metadata]
name = "Forge"
symbol = "FRG"
uri = "https://example.com/frg.json"
additional = [["site", "a"], ["site", "b"]]

[withdraw]
max_accounts_per_tx = 10
"#;

    #[test]
    fn test_parse_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.rpc.url, "http://localhost:8899");
        assert_eq!(
            config.rpc.commitment_config().unwrap(),
            CommitmentConfig::finalized()
        );
        assert_eq!(config.rpc.confirm_timeout_secs, 60);
        assert_eq!(config.mint.decimals, 6);
        assert_eq!(config.withdraw.max_accounts_per_tx, 10);
        assert_eq!(config.wallet.keypair_env, "PRIVATE_KEY");
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(
            config.withdraw.max_accounts_per_tx,
            DEFAULT_MAX_ACCOUNTS_PER_WITHDRAWAL
        );
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.mint.transfer_fee = Some(TransferFeeSettings {
            basis_points: 10_001,
            maximum_fee: 1,
        });
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rpc.url = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.withdraw.max_accounts_per_tx = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mint.decimals = 19;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rpc.commitment = "eventually".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mint_configuration_from_settings() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let mint = Pubkey::new_unique();
        let authority = Pubkey::new_unique();
        let mint_config = config.mint.to_mint_configuration(mint, authority).unwrap();

        let kinds: Vec<_> = mint_config.extensions().kinds().collect();
        assert_eq!(
            kinds,
            vec![
                ExtensionKind::MetadataPointer,
                ExtensionKind::TransferFeeConfig,
                ExtensionKind::TransferHook,
                ExtensionKind::TokenMetadata,
            ]
        );
        let metadata = mint_config.extensions().token_metadata().unwrap();
        assert_eq!(metadata.update_authority, Some(authority));
        assert_eq!(metadata.mint, mint);
        assert_eq!(
            mint_config.extensions().metadata_pointer().unwrap().metadata_address,
            Some(mint)
        );
    }

    #[test]
    fn test_bad_address_rejected() {
        let mut settings = MintSettings::default();
        settings.freeze_authority = Some("not-an-address".to_string());
        assert!(settings
            .to_mint_configuration(Pubkey::new_unique(), Pubkey::new_unique())
            .is_err());
    }
}
