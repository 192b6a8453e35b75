//! Account size and rent funding for a requested extension set
//!
//! The fixed-size extensions decide how many bytes the raw account is
//! allocated with; the token program's mint initializer rejects an account
//! whose length differs from that. Token metadata is written after the mint
//! is initialized and grows the account, so it only adds to the funding:
//! rent is requested for the final size up front because storage cannot
//! silently grow without lamports to back it.

use crate::extensions::tlv::{
    tags, BASE_ACCOUNT_LEN, BASE_MINT_LEN, TLV_HEADER_LEN, TLV_START, TRANSFER_FEE_AMOUNT_LEN,
    TRANSFER_HOOK_ACCOUNT_LEN,
};
use crate::extensions::{ExtensionKind, ExtensionSet, TokenMetadata};
use crate::ledger::Ledger;
use crate::tx_builder::errors::{ForgeError, Stage};
use serde::Serialize;
use tracing::debug;

/// Largest account the ledger allows
pub const MAX_ACCOUNT_SIZE: usize = 10 * 1024 * 1024;

/// TLV values carry a 2-byte length
pub const MAX_TLV_VALUE_LEN: usize = u16::MAX as usize;

/// Multisig accounts are told apart by length; extended accounts must not
/// collide with it.
const MULTISIG_LEN: usize = 355;

/// Size and funding for a mint about to be created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MintLayout {
    /// Bytes allocated by the create-account instruction
    pub allocation_size: usize,
    /// TLV header plus packed metadata, appended by the metadata write
    pub metadata_size: usize,
    /// Final account size once all content is written
    pub account_size: usize,
    /// Rent-exempt balance for `account_size`
    pub minimum_funding: u64,
}

fn extended_len(value_lens: impl IntoIterator<Item = usize>) -> usize {
    let tlv: usize = value_lens.into_iter().map(|len| TLV_HEADER_LEN + len).sum();
    let len = TLV_START + tlv;
    if len == MULTISIG_LEN {
        len + std::mem::size_of::<u16>()
    } else {
        len
    }
}

/// Length of a mint carrying the given fixed-size extensions
pub fn fixed_mint_len(kinds: impl IntoIterator<Item = ExtensionKind>) -> usize {
    let lens: Vec<usize> = kinds.into_iter().filter_map(|k| k.fixed_len()).collect();
    if lens.is_empty() {
        BASE_MINT_LEN
    } else {
        extended_len(lens)
    }
}

/// Value length of a token account extension
pub fn account_extension_len(tag: u16) -> usize {
    match tag {
        tags::TRANSFER_FEE_AMOUNT => TRANSFER_FEE_AMOUNT_LEN,
        tags::TRANSFER_HOOK_ACCOUNT => TRANSFER_HOOK_ACCOUNT_LEN,
        _ => 0,
    }
}

/// Length of a token account carrying the given account extension tags
pub fn token_account_len(extension_tags: &[u16]) -> usize {
    if extension_tags.is_empty() {
        return BASE_ACCOUNT_LEN;
    }
    extended_len(extension_tags.iter().copied().map(account_extension_len))
}

/// Extensions a token account of this mint is created with
pub fn required_account_extensions(
    mint_kinds: impl IntoIterator<Item = ExtensionKind>,
    immutable_owner: bool,
) -> Vec<u16> {
    let mut out = Vec::new();
    for kind in mint_kinds {
        match kind {
            ExtensionKind::TransferFeeConfig => out.push(tags::TRANSFER_FEE_AMOUNT),
            ExtensionKind::TransferHook => out.push(tags::TRANSFER_HOOK_ACCOUNT),
            ExtensionKind::NonTransferable => out.push(tags::NON_TRANSFERABLE_ACCOUNT),
            _ => {}
        }
    }
    if immutable_owner || out.contains(&tags::NON_TRANSFERABLE_ACCOUNT) {
        out.push(tags::IMMUTABLE_OWNER);
    }
    out
}

/// Space the metadata entry adds: TLV header plus packed content with
/// repeated keys collapsed the way the field updates leave them.
pub fn metadata_space(metadata: &TokenMetadata) -> Result<usize, ForgeError> {
    let applied = TokenMetadata {
        additional_metadata: metadata.effective_fields(),
        ..metadata.clone()
    };
    let packed = applied
        .packed_len()
        .map_err(|e| ForgeError::invalid_config(Stage::Layout, e.to_string()))?;
    if packed > MAX_TLV_VALUE_LEN {
        return Err(ForgeError::LayoutTooLarge {
            size: packed,
            limit: MAX_TLV_VALUE_LEN,
            what: "packed token metadata",
        });
    }
    Ok(TLV_HEADER_LEN + packed)
}

/// Sizes without funding; pure and deterministic
pub fn compute_space(extensions: &ExtensionSet) -> Result<(usize, usize), ForgeError> {
    let allocation_size = fixed_mint_len(extensions.kinds());
    let metadata_size = match extensions.token_metadata() {
        Some(metadata) => metadata_space(metadata)?,
        None => 0,
    };
    let account_size = allocation_size + metadata_size;
    if account_size > MAX_ACCOUNT_SIZE {
        return Err(ForgeError::LayoutTooLarge {
            size: account_size,
            limit: MAX_ACCOUNT_SIZE,
            what: "mint account",
        });
    }
    Ok((allocation_size, metadata_size))
}

/// Compute the layout and ask the ledger for the rent-exempt balance.
pub async fn compute_layout<L: Ledger + ?Sized>(
    ledger: &L,
    extensions: &ExtensionSet,
) -> Result<MintLayout, ForgeError> {
    let (allocation_size, metadata_size) = compute_space(extensions)?;
    let account_size = allocation_size + metadata_size;
    let minimum_funding = ledger
        .minimum_funding(account_size)
        .await
        .map_err(|e| ForgeError::from_ledger(Stage::Layout, e))?;

    debug!(
        allocation_size,
        metadata_size, account_size, minimum_funding, "Computed mint layout"
    );

    Ok(MintLayout {
        allocation_size,
        metadata_size,
        account_size,
        minimum_funding,
    })
}
