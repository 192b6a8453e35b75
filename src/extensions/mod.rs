//! Mint extension model
//!
//! A [`MintConfiguration`] holds the requested extensions as a map keyed by
//! [`ExtensionKind`]. The kind ordering is the initialization dependency
//! order, so iterating the map always yields extensions in the order the
//! token program accepts them, whatever order the caller added them in.

pub mod metadata;
pub mod tlv;

pub use metadata::TokenMetadata;

use crate::tx_builder::errors::{ForgeError, Stage};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::collections::BTreeMap;
use std::fmt;

/// Upper bound for transfer fee basis points (100%)
pub const MAX_FEE_BASIS_POINTS: u16 = 10_000;

/// Mint extension kinds supported by the orchestrator.
///
/// Declaration order is initialization order: fixed-size extensions that
/// must precede the final mint initialization come first, the variable
/// metadata content last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExtensionKind {
    MetadataPointer,
    TransferFeeConfig,
    TransferHook,
    NonTransferable,
    TokenMetadata,
}

impl ExtensionKind {
    pub const ALL: [ExtensionKind; 5] = [
        ExtensionKind::MetadataPointer,
        ExtensionKind::TransferFeeConfig,
        ExtensionKind::TransferHook,
        ExtensionKind::NonTransferable,
        ExtensionKind::TokenMetadata,
    ];

    /// Two-byte type tag used in the account's TLV area
    pub fn tag(&self) -> u16 {
        match self {
            ExtensionKind::TransferFeeConfig => tlv::tags::TRANSFER_FEE_CONFIG,
            ExtensionKind::NonTransferable => tlv::tags::NON_TRANSFERABLE,
            ExtensionKind::TransferHook => tlv::tags::TRANSFER_HOOK,
            ExtensionKind::MetadataPointer => tlv::tags::METADATA_POINTER,
            ExtensionKind::TokenMetadata => tlv::tags::TOKEN_METADATA,
        }
    }

    /// Value length for fixed-size extensions, `None` for variable ones
    pub fn fixed_len(&self) -> Option<usize> {
        match self {
            ExtensionKind::MetadataPointer => Some(tlv::METADATA_POINTER_LEN),
            ExtensionKind::TransferFeeConfig => Some(tlv::TRANSFER_FEE_CONFIG_LEN),
            ExtensionKind::TransferHook => Some(tlv::TRANSFER_HOOK_LEN),
            ExtensionKind::NonTransferable => Some(0),
            ExtensionKind::TokenMetadata => None,
        }
    }

    pub fn is_fixed_size(&self) -> bool {
        self.fixed_len().is_some()
    }

    pub fn from_tag(tag: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionKind::MetadataPointer => "metadata_pointer",
            ExtensionKind::TransferFeeConfig => "transfer_fee_config",
            ExtensionKind::TransferHook => "transfer_hook",
            ExtensionKind::NonTransferable => "non_transferable",
            ExtensionKind::TokenMetadata => "token_metadata",
        }
    }
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPointerParams {
    /// Authority allowed to move the pointer
    pub authority: Option<Pubkey>,
    /// Account holding the metadata; the mint itself when metadata is embedded
    pub metadata_address: Option<Pubkey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFeeParams {
    pub fee_basis_points: u16,
    pub maximum_fee: u64,
    pub transfer_fee_config_authority: Option<Pubkey>,
    pub withdraw_withheld_authority: Option<Pubkey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferHookParams {
    pub authority: Option<Pubkey>,
    pub program_id: Option<Pubkey>,
}

/// A requested extension with its parameter bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Extension {
    MetadataPointer(MetadataPointerParams),
    TransferFeeConfig(TransferFeeParams),
    TransferHook(TransferHookParams),
    NonTransferable,
    TokenMetadata(TokenMetadata),
}

impl Extension {
    pub fn kind(&self) -> ExtensionKind {
        match self {
            Extension::MetadataPointer(_) => ExtensionKind::MetadataPointer,
            Extension::TransferFeeConfig(_) => ExtensionKind::TransferFeeConfig,
            Extension::TransferHook(_) => ExtensionKind::TransferHook,
            Extension::NonTransferable => ExtensionKind::NonTransferable,
            Extension::TokenMetadata(_) => ExtensionKind::TokenMetadata,
        }
    }
}

/// Set of requested extensions, at most one per kind, iterated in
/// initialization order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionSet {
    entries: BTreeMap<ExtensionKind, Extension>,
}

impl ExtensionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, extension: Extension) -> Result<(), ForgeError> {
        let kind = extension.kind();
        if self.entries.contains_key(&kind) {
            return Err(ForgeError::DuplicateExtension(kind));
        }
        self.entries.insert(kind, extension);
        Ok(())
    }

    pub fn get(&self, kind: ExtensionKind) -> Option<&Extension> {
        self.entries.get(&kind)
    }

    pub fn contains(&self, kind: ExtensionKind) -> bool {
        self.entries.contains_key(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ExtensionKind> + '_ {
        self.entries.keys().copied()
    }

    /// Extensions in initialization order
    pub fn iter(&self) -> impl Iterator<Item = &Extension> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn token_metadata(&self) -> Option<&TokenMetadata> {
        match self.entries.get(&ExtensionKind::TokenMetadata) {
            Some(Extension::TokenMetadata(metadata)) => Some(metadata),
            _ => None,
        }
    }

    pub fn metadata_pointer(&self) -> Option<&MetadataPointerParams> {
        match self.entries.get(&ExtensionKind::MetadataPointer) {
            Some(Extension::MetadataPointer(params)) => Some(params),
            _ => None,
        }
    }

    pub fn transfer_fee(&self) -> Option<&TransferFeeParams> {
        match self.entries.get(&ExtensionKind::TransferFeeConfig) {
            Some(Extension::TransferFeeConfig(params)) => Some(params),
            _ => None,
        }
    }

    pub fn transfer_hook(&self) -> Option<&TransferHookParams> {
        match self.entries.get(&ExtensionKind::TransferHook) {
            Some(Extension::TransferHook(params)) => Some(params),
            _ => None,
        }
    }
}

/// Complete description of a mint to be created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintConfiguration {
    pub mint: Pubkey,
    pub decimals: u8,
    pub mint_authority: Pubkey,
    pub freeze_authority: Option<Pubkey>,
    extensions: ExtensionSet,
}

impl MintConfiguration {
    pub fn new(mint: Pubkey, decimals: u8, mint_authority: Pubkey) -> Self {
        Self {
            mint,
            decimals,
            mint_authority,
            freeze_authority: None,
            extensions: ExtensionSet::new(),
        }
    }

    pub fn with_freeze_authority(mut self, freeze_authority: Pubkey) -> Self {
        self.freeze_authority = Some(freeze_authority);
        self
    }

    /// Add an extension. Fails on duplicates and out-of-range parameters.
    ///
    /// Token metadata is bound to this mint: its `mint` field is overwritten
    /// with the configuration's mint address.
    pub fn with_extension(mut self, extension: Extension) -> Result<Self, ForgeError> {
        let extension = match extension {
            Extension::TransferFeeConfig(params) => {
                if params.fee_basis_points > MAX_FEE_BASIS_POINTS {
                    return Err(ForgeError::invalid_config(
                        Stage::Sequencing,
                        format!(
                            "fee basis points {} above {}",
                            params.fee_basis_points, MAX_FEE_BASIS_POINTS
                        ),
                    ));
                }
                Extension::TransferFeeConfig(params)
            }
            Extension::TokenMetadata(mut metadata) => {
                metadata.mint = self.mint;
                Extension::TokenMetadata(metadata)
            }
            other => other,
        };
        self.extensions.insert(extension)?;
        Ok(self)
    }

    pub fn extensions(&self) -> &ExtensionSet {
        &self.extensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fee_params(bps: u16) -> TransferFeeParams {
        TransferFeeParams {
            fee_basis_points: bps,
            maximum_fee: 5_000,
            transfer_fee_config_authority: None,
            withdraw_withheld_authority: None,
        }
    }

    #[test]
    fn test_iteration_follows_dependency_order() {
        let mint = Pubkey::new_unique();
        let config = MintConfiguration::new(mint, 6, Pubkey::new_unique())
            .with_extension(Extension::TokenMetadata(TokenMetadata::new("A", "B", "C")))
            .unwrap()
            .with_extension(Extension::TransferHook(TransferHookParams {
                authority: None,
                program_id: Some(Pubkey::new_unique()),
            }))
            .unwrap()
            .with_extension(Extension::TransferFeeConfig(fee_params(50)))
            .unwrap()
            .with_extension(Extension::MetadataPointer(MetadataPointerParams {
                authority: None,
                metadata_address: Some(mint),
            }))
            .unwrap();

        let kinds: Vec<_> = config.extensions().kinds().collect();
        assert_eq!(
            kinds,
            vec![
                ExtensionKind::MetadataPointer,
                ExtensionKind::TransferFeeConfig,
                ExtensionKind::TransferHook,
                ExtensionKind::TokenMetadata,
            ]
        );
        assert_eq!(config.extensions().token_metadata().unwrap().mint, mint);
    }

    #[test]
    fn test_duplicate_extension_rejected() {
        let result = MintConfiguration::new(Pubkey::new_unique(), 6, Pubkey::new_unique())
            .with_extension(Extension::NonTransferable)
            .unwrap()
            .with_extension(Extension::NonTransferable);
        assert!(matches!(
            result,
            Err(ForgeError::DuplicateExtension(ExtensionKind::NonTransferable))
        ));
    }

    #[test]
    fn test_fee_basis_points_bound() {
        let result = MintConfiguration::new(Pubkey::new_unique(), 6, Pubkey::new_unique())
            .with_extension(Extension::TransferFeeConfig(fee_params(10_001)));
        assert!(matches!(
            result,
            Err(ForgeError::InvalidConfiguration { .. })
        ));

        let result = MintConfiguration::new(Pubkey::new_unique(), 6, Pubkey::new_unique())
            .with_extension(Extension::TransferFeeConfig(fee_params(10_000)));
        assert!(result.is_ok());
    }

    #[test]
    fn test_tag_roundtrip() {
        for kind in ExtensionKind::ALL {
            assert_eq!(ExtensionKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(ExtensionKind::from_tag(0), None);
    }
}
