//! Token metadata content
//!
//! [`TokenMetadata`] is the configuration-facing form. Packing, sizing and
//! field updates go through the metadata interface's own
//! [`StoredMetadata`], which is what the token program keeps in the
//! mint's `TokenMetadata` TLV entry.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use spl_token_metadata_interface::state::{Field, TokenMetadata as StoredMetadata};
use std::io;

/// Name, symbol, uri and ordered additional fields of a token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub update_authority: Option<Pubkey>,
    pub mint: Pubkey,
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub additional_metadata: Vec<(String, String)>,
}

impl From<StoredMetadata> for TokenMetadata {
    fn from(stored: StoredMetadata) -> Self {
        Self {
            update_authority: stored.update_authority.into(),
            mint: stored.mint,
            name: stored.name,
            symbol: stored.symbol,
            uri: stored.uri,
            additional_metadata: stored.additional_metadata,
        }
    }
}

impl TokenMetadata {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            uri: uri.into(),
            ..Self::default()
        }
    }

    pub fn with_update_authority(mut self, authority: Pubkey) -> Self {
        self.update_authority = Some(authority);
        self
    }

    /// Append an additional field as requested at creation time.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_metadata.push((key.into(), value.into()));
        self
    }

    /// Interface form; an update authority of all zeroes cannot be stored
    pub fn to_stored(&self) -> io::Result<StoredMetadata> {
        let update_authority = self.update_authority.try_into().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "update authority must not be the default address",
            )
        })?;
        Ok(StoredMetadata {
            update_authority,
            mint: self.mint,
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            uri: self.uri.clone(),
            additional_metadata: self.additional_metadata.clone(),
        })
    }

    /// Apply one field update with the token program's semantics: an
    /// existing key is overwritten in place, a new key is appended.
    pub fn apply_update(&mut self, field: Field, value: String) -> io::Result<()> {
        let mut stored = self.to_stored()?;
        stored.update(field, value);
        *self = stored.into();
        Ok(())
    }

    /// Additional fields with repeated keys collapsed, last write winning,
    /// in first-appearance order.
    pub fn effective_fields(&self) -> Vec<(String, String)> {
        let mut applied = StoredMetadata::default();
        for (key, value) in &self.additional_metadata {
            applied.update(Field::Key(key.clone()), value.clone());
        }
        applied.additional_metadata
    }

    /// Byte length of the packed form, without the TLV header
    pub fn packed_len(&self) -> io::Result<usize> {
        borsh::object_length(&self.to_stored()?)
    }

    pub fn pack(&self) -> io::Result<Vec<u8>> {
        borsh::to_vec(&self.to_stored()?)
    }

    pub fn unpack(data: &[u8]) -> io::Result<Self> {
        borsh::from_slice::<StoredMetadata>(data).map(Self::from)
    }
}
