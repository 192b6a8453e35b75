//! Account state codec for extension-bearing mints and token accounts
//!
//! Layout owned by the token program:
//!
//! ```text
//! [0..82)    base mint            (or [0..165) base token account)
//! [82..165)  zero padding         (mints only)
//! [165]      account type         (1 = mint, 2 = token account)
//! [166..)    TLV entries: u16 type | u16 length | value
//! ```
//!
//! A mint without extensions is exactly 82 bytes and has no account-type
//! byte. Decoding keeps TLV entries in stored order so re-encoding is
//! byte-stable.

use super::metadata::TokenMetadata;
use bytes::{Buf, BufMut};
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

pub const BASE_MINT_LEN: usize = 82;
pub const BASE_ACCOUNT_LEN: usize = 165;
pub const ACCOUNT_TYPE_LEN: usize = 1;
/// Offset of the first TLV entry in an extended account
pub const TLV_START: usize = BASE_ACCOUNT_LEN + ACCOUNT_TYPE_LEN;

pub const TYPE_SIZE: usize = 2;
pub const LENGTH_SIZE: usize = 2;
/// Header in front of every extension value
pub const TLV_HEADER_LEN: usize = TYPE_SIZE + LENGTH_SIZE;

pub const TRANSFER_FEE_LEN: usize = 18;
pub const TRANSFER_FEE_CONFIG_LEN: usize = 32 + 32 + 8 + 2 * TRANSFER_FEE_LEN;
pub const TRANSFER_FEE_AMOUNT_LEN: usize = 8;
pub const METADATA_POINTER_LEN: usize = 64;
pub const TRANSFER_HOOK_LEN: usize = 64;
pub const TRANSFER_HOOK_ACCOUNT_LEN: usize = 1;

/// Extension type tags as assigned by the token program
pub mod tags {
    pub const UNINITIALIZED: u16 = 0;
    pub const TRANSFER_FEE_CONFIG: u16 = 1;
    pub const TRANSFER_FEE_AMOUNT: u16 = 2;
    pub const IMMUTABLE_OWNER: u16 = 7;
    pub const NON_TRANSFERABLE: u16 = 9;
    pub const NON_TRANSFERABLE_ACCOUNT: u16 = 13;
    pub const TRANSFER_HOOK: u16 = 14;
    pub const TRANSFER_HOOK_ACCOUNT: u16 = 15;
    pub const METADATA_POINTER: u16 = 18;
    pub const TOKEN_METADATA: u16 = 19;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AccountType {
    Uninitialized = 0,
    Mint = 1,
    Account = 2,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("data too short: need {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("unexpected account type {found}")]
    WrongAccountType { found: u8 },

    #[error("account is not initialized")]
    Uninitialized,

    #[error("truncated TLV entry at offset {offset}")]
    Truncated { offset: usize },

    #[error("invalid option tag {0}")]
    InvalidOption(u32),

    #[error("extension {tag} has length {actual}, expected {expected}")]
    BadExtensionLength {
        tag: u16,
        expected: usize,
        actual: usize,
    },

    #[error("encoded state needs {needed} bytes, account holds {capacity}")]
    NoSpace { needed: usize, capacity: usize },

    #[error("token metadata: {0}")]
    Metadata(String),
}

/// One TLV entry, value kept raw
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvEntry {
    pub tag: u16,
    pub value: Vec<u8>,
}

impl TlvEntry {
    pub fn new(tag: u16, value: Vec<u8>) -> Self {
        Self { tag, value }
    }

    pub fn encoded_len(&self) -> usize {
        TLV_HEADER_LEN + self.value.len()
    }
}

/// Parse the TLV area. Stops at the first uninitialized (zero) tag.
pub fn parse_tlv(data: &[u8]) -> Result<Vec<TlvEntry>, DecodeError> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        if data.len() - offset < TYPE_SIZE {
            return Err(DecodeError::Truncated { offset });
        }
        let mut header = &data[offset..];
        let tag = header.get_u16_le();
        if tag == tags::UNINITIALIZED {
            break;
        }
        if header.len() < LENGTH_SIZE {
            return Err(DecodeError::Truncated { offset });
        }
        let len = header.get_u16_le() as usize;
        let start = offset + TLV_HEADER_LEN;
        let end = start + len;
        if end > data.len() {
            return Err(DecodeError::Truncated { offset });
        }
        entries.push(TlvEntry::new(tag, data[start..end].to_vec()));
        offset = end;
    }
    Ok(entries)
}

/// Serialize entries back to back
pub fn write_tlv(entries: &[TlvEntry], out: &mut Vec<u8>) {
    for entry in entries {
        out.put_u16_le(entry.tag);
        out.put_u16_le(entry.value.len() as u16);
        out.put_slice(&entry.value);
    }
}

fn find(entries: &[TlvEntry], tag: u16) -> Option<&TlvEntry> {
    entries.iter().find(|entry| entry.tag == tag)
}

/// Insert or replace an entry, keeping the position of a replaced one
fn upsert(entries: &mut Vec<TlvEntry>, entry: TlvEntry) {
    match entries.iter_mut().find(|e| e.tag == entry.tag) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
}

fn expect_len(entry: &TlvEntry, expected: usize) -> Result<(), DecodeError> {
    if entry.value.len() != expected {
        return Err(DecodeError::BadExtensionLength {
            tag: entry.tag,
            expected,
            actual: entry.value.len(),
        });
    }
    Ok(())
}

fn get_pubkey(buf: &mut &[u8]) -> Pubkey {
    let mut key = [0u8; 32];
    buf.copy_to_slice(&mut key);
    Pubkey::new_from_array(key)
}

/// Fixed 32-byte field where all zeroes means "none"
fn get_optional_nonzero_pubkey(buf: &mut &[u8]) -> Option<Pubkey> {
    let key = get_pubkey(buf);
    (key != Pubkey::default()).then_some(key)
}

fn put_optional_nonzero_pubkey(out: &mut Vec<u8>, key: Option<Pubkey>) {
    out.put_slice(key.unwrap_or_default().as_ref());
}

/// 4-byte tag followed by a 32-byte key
fn get_coption_pubkey(buf: &mut &[u8]) -> Result<Option<Pubkey>, DecodeError> {
    let tag = buf.get_u32_le();
    let key = get_pubkey(buf);
    match tag {
        0 => Ok(None),
        1 => Ok(Some(key)),
        other => Err(DecodeError::InvalidOption(other)),
    }
}

fn put_coption_pubkey(out: &mut Vec<u8>, key: Option<Pubkey>) {
    out.put_u32_le(key.is_some() as u32);
    out.put_slice(key.unwrap_or_default().as_ref());
}

fn check_min_len(data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::TooShort {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Base mint fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MintState {
    pub mint_authority: Option<Pubkey>,
    pub supply: u64,
    pub decimals: u8,
    pub is_initialized: bool,
    pub freeze_authority: Option<Pubkey>,
}

impl MintState {
    fn unpack(data: &[u8]) -> Result<Self, DecodeError> {
        check_min_len(data, BASE_MINT_LEN)?;
        let mut buf = &data[..BASE_MINT_LEN];
        let mint_authority = get_coption_pubkey(&mut buf)?;
        let supply = buf.get_u64_le();
        let decimals = buf.get_u8();
        let is_initialized = buf.get_u8() != 0;
        let freeze_authority = get_coption_pubkey(&mut buf)?;
        Ok(Self {
            mint_authority,
            supply,
            decimals,
            is_initialized,
            freeze_authority,
        })
    }

    fn pack(&self, out: &mut Vec<u8>) {
        put_coption_pubkey(out, self.mint_authority);
        out.put_u64_le(self.supply);
        out.put_u8(self.decimals);
        out.put_u8(self.is_initialized as u8);
        put_coption_pubkey(out, self.freeze_authority);
    }
}

/// Base token account fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenAccountState {
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
    pub delegate: Option<Pubkey>,
    /// 0 uninitialized, 1 initialized, 2 frozen
    pub state: u8,
    pub is_native: Option<u64>,
    pub delegated_amount: u64,
    pub close_authority: Option<Pubkey>,
}

impl TokenAccountState {
    fn unpack(data: &[u8]) -> Result<Self, DecodeError> {
        check_min_len(data, BASE_ACCOUNT_LEN)?;
        let mut buf = &data[..BASE_ACCOUNT_LEN];
        let mint = get_pubkey(&mut buf);
        let owner = get_pubkey(&mut buf);
        let amount = buf.get_u64_le();
        let delegate = get_coption_pubkey(&mut buf)?;
        let state = buf.get_u8();
        let native_tag = buf.get_u32_le();
        let native_amount = buf.get_u64_le();
        let is_native = match native_tag {
            0 => None,
            1 => Some(native_amount),
            other => return Err(DecodeError::InvalidOption(other)),
        };
        let delegated_amount = buf.get_u64_le();
        let close_authority = get_coption_pubkey(&mut buf)?;
        Ok(Self {
            mint,
            owner,
            amount,
            delegate,
            state,
            is_native,
            delegated_amount,
            close_authority,
        })
    }

    fn pack(&self, out: &mut Vec<u8>) {
        out.put_slice(self.mint.as_ref());
        out.put_slice(self.owner.as_ref());
        out.put_u64_le(self.amount);
        put_coption_pubkey(out, self.delegate);
        out.put_u8(self.state);
        out.put_u32_le(self.is_native.is_some() as u32);
        out.put_u64_le(self.is_native.unwrap_or_default());
        out.put_u64_le(self.delegated_amount);
        put_coption_pubkey(out, self.close_authority);
    }
}

/// One fee schedule entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TransferFee {
    /// First epoch at which this schedule applies
    pub epoch: u64,
    pub maximum_fee: u64,
    pub transfer_fee_basis_points: u16,
}

impl TransferFee {
    fn unpack(buf: &mut &[u8]) -> Self {
        Self {
            epoch: buf.get_u64_le(),
            maximum_fee: buf.get_u64_le(),
            transfer_fee_basis_points: buf.get_u16_le(),
        }
    }

    fn pack(&self, out: &mut Vec<u8>) {
        out.put_u64_le(self.epoch);
        out.put_u64_le(self.maximum_fee);
        out.put_u16_le(self.transfer_fee_basis_points);
    }
}

/// Transfer fee extension of a mint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TransferFeeState {
    pub transfer_fee_config_authority: Option<Pubkey>,
    pub withdraw_withheld_authority: Option<Pubkey>,
    /// Fees already harvested to the mint
    pub withheld_amount: u64,
    pub older_transfer_fee: TransferFee,
    pub newer_transfer_fee: TransferFee,
}

impl TransferFeeState {
    /// State written by the initializer: both schedules equal, epoch taken
    /// from the ledger at initialization.
    pub fn initial(
        transfer_fee_config_authority: Option<Pubkey>,
        withdraw_withheld_authority: Option<Pubkey>,
        basis_points: u16,
        maximum_fee: u64,
        epoch: u64,
    ) -> Self {
        let fee = TransferFee {
            epoch,
            maximum_fee,
            transfer_fee_basis_points: basis_points,
        };
        Self {
            transfer_fee_config_authority,
            withdraw_withheld_authority,
            withheld_amount: 0,
            older_transfer_fee: fee,
            newer_transfer_fee: fee,
        }
    }

    pub fn unpack(value: &[u8]) -> Result<Self, DecodeError> {
        check_min_len(value, TRANSFER_FEE_CONFIG_LEN)?;
        let mut buf = value;
        Ok(Self {
            transfer_fee_config_authority: get_optional_nonzero_pubkey(&mut buf),
            withdraw_withheld_authority: get_optional_nonzero_pubkey(&mut buf),
            withheld_amount: buf.get_u64_le(),
            older_transfer_fee: TransferFee::unpack(&mut buf),
            newer_transfer_fee: TransferFee::unpack(&mut buf),
        })
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TRANSFER_FEE_CONFIG_LEN);
        put_optional_nonzero_pubkey(&mut out, self.transfer_fee_config_authority);
        put_optional_nonzero_pubkey(&mut out, self.withdraw_withheld_authority);
        out.put_u64_le(self.withheld_amount);
        self.older_transfer_fee.pack(&mut out);
        self.newer_transfer_fee.pack(&mut out);
        out
    }
}

/// Two optional keys: metadata pointer and transfer hook share this shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct AuthorityAndAddress {
    pub authority: Option<Pubkey>,
    pub address: Option<Pubkey>,
}

impl AuthorityAndAddress {
    pub fn unpack(value: &[u8]) -> Result<Self, DecodeError> {
        check_min_len(value, 64)?;
        let mut buf = value;
        Ok(Self {
            authority: get_optional_nonzero_pubkey(&mut buf),
            address: get_optional_nonzero_pubkey(&mut buf),
        })
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        put_optional_nonzero_pubkey(&mut out, self.authority);
        put_optional_nonzero_pubkey(&mut out, self.address);
        out
    }
}

/// Decoded mint account: base state plus raw extension entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MintAccount {
    pub base: MintState,
    pub extensions: Vec<TlvEntry>,
}

impl MintAccount {
    /// Decode an initialized mint
    pub fn unpack(data: &[u8]) -> Result<Self, DecodeError> {
        let account = Self::unpack_uninitialized(data)?;
        if !account.base.is_initialized {
            return Err(DecodeError::Uninitialized);
        }
        if data.len() > BASE_MINT_LEN && data[BASE_ACCOUNT_LEN] != AccountType::Mint as u8 {
            return Err(DecodeError::WrongAccountType {
                found: data[BASE_ACCOUNT_LEN],
            });
        }
        Ok(account)
    }

    /// Decode a mint that may still be waiting for its final initialization
    pub fn unpack_uninitialized(data: &[u8]) -> Result<Self, DecodeError> {
        let base = MintState::unpack(data)?;
        if data.len() == BASE_MINT_LEN {
            return Ok(Self {
                base,
                extensions: Vec::new(),
            });
        }
        check_min_len(data, TLV_START)?;
        let account_type = data[BASE_ACCOUNT_LEN];
        if account_type != AccountType::Uninitialized as u8 && account_type != AccountType::Mint as u8
        {
            return Err(DecodeError::WrongAccountType {
                found: account_type,
            });
        }
        Ok(Self {
            base,
            extensions: parse_tlv(&data[TLV_START..])?,
        })
    }

    /// Encode into an account of `capacity` bytes, zero-filling the rest
    pub fn pack(&self, capacity: usize) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::with_capacity(capacity);
        self.base.pack(&mut out);
        if capacity > BASE_MINT_LEN || !self.extensions.is_empty() {
            out.resize(BASE_ACCOUNT_LEN, 0);
            let account_type = if self.base.is_initialized {
                AccountType::Mint
            } else {
                AccountType::Uninitialized
            };
            out.put_u8(account_type as u8);
            write_tlv(&self.extensions, &mut out);
        }
        if out.len() > capacity {
            return Err(DecodeError::NoSpace {
                needed: out.len(),
                capacity,
            });
        }
        out.resize(capacity, 0);
        Ok(out)
    }

    /// Bytes needed to hold the current base and extensions
    pub fn required_len(&self) -> usize {
        if self.extensions.is_empty() {
            return BASE_MINT_LEN;
        }
        TLV_START + self.extensions.iter().map(TlvEntry::encoded_len).sum::<usize>()
    }

    pub fn entry(&self, tag: u16) -> Option<&TlvEntry> {
        find(&self.extensions, tag)
    }

    pub fn set_entry(&mut self, entry: TlvEntry) {
        upsert(&mut self.extensions, entry);
    }

    pub fn transfer_fee_config(&self) -> Result<Option<TransferFeeState>, DecodeError> {
        match self.entry(tags::TRANSFER_FEE_CONFIG) {
            Some(entry) => {
                expect_len(entry, TRANSFER_FEE_CONFIG_LEN)?;
                TransferFeeState::unpack(&entry.value).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn metadata_pointer(&self) -> Result<Option<AuthorityAndAddress>, DecodeError> {
        match self.entry(tags::METADATA_POINTER) {
            Some(entry) => {
                expect_len(entry, METADATA_POINTER_LEN)?;
                AuthorityAndAddress::unpack(&entry.value).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn transfer_hook(&self) -> Result<Option<AuthorityAndAddress>, DecodeError> {
        match self.entry(tags::TRANSFER_HOOK) {
            Some(entry) => {
                expect_len(entry, TRANSFER_HOOK_LEN)?;
                AuthorityAndAddress::unpack(&entry.value).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn token_metadata(&self) -> Result<Option<TokenMetadata>, DecodeError> {
        match self.entry(tags::TOKEN_METADATA) {
            Some(entry) => TokenMetadata::unpack(&entry.value)
                .map(Some)
                .map_err(|e| DecodeError::Metadata(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn is_non_transferable(&self) -> bool {
        self.entry(tags::NON_TRANSFERABLE).is_some()
    }
}

/// Decoded token account: base state plus raw extension entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenAccount {
    pub base: TokenAccountState,
    pub extensions: Vec<TlvEntry>,
}

impl TokenAccount {
    pub fn unpack(data: &[u8]) -> Result<Self, DecodeError> {
        let base = TokenAccountState::unpack(data)?;
        if base.state == 0 {
            return Err(DecodeError::Uninitialized);
        }
        if data.len() == BASE_ACCOUNT_LEN {
            return Ok(Self {
                base,
                extensions: Vec::new(),
            });
        }
        check_min_len(data, TLV_START)?;
        if data[BASE_ACCOUNT_LEN] != AccountType::Account as u8 {
            return Err(DecodeError::WrongAccountType {
                found: data[BASE_ACCOUNT_LEN],
            });
        }
        Ok(Self {
            base,
            extensions: parse_tlv(&data[TLV_START..])?,
        })
    }

    pub fn pack(&self, capacity: usize) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::with_capacity(capacity);
        self.base.pack(&mut out);
        if capacity > BASE_ACCOUNT_LEN || !self.extensions.is_empty() {
            out.put_u8(AccountType::Account as u8);
            write_tlv(&self.extensions, &mut out);
        }
        if out.len() > capacity {
            return Err(DecodeError::NoSpace {
                needed: out.len(),
                capacity,
            });
        }
        out.resize(capacity, 0);
        Ok(out)
    }

    pub fn entry(&self, tag: u16) -> Option<&TlvEntry> {
        find(&self.extensions, tag)
    }

    pub fn set_entry(&mut self, entry: TlvEntry) {
        upsert(&mut self.extensions, entry);
    }

    /// Withheld fee balance, `None` when the account has no fee extension
    pub fn withheld_amount(&self) -> Result<Option<u64>, DecodeError> {
        match self.entry(tags::TRANSFER_FEE_AMOUNT) {
            Some(entry) => {
                expect_len(entry, TRANSFER_FEE_AMOUNT_LEN)?;
                let mut buf = entry.value.as_slice();
                Ok(Some(buf.get_u64_le()))
            }
            None => Ok(None),
        }
    }

    pub fn set_withheld_amount(&mut self, amount: u64) {
        self.set_entry(TlvEntry::new(
            tags::TRANSFER_FEE_AMOUNT,
            amount.to_le_bytes().to_vec(),
        ));
    }
}
