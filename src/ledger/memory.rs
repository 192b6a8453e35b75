//! In-process ledger
//!
//! Executes the system, associated-token-account and Token-2022
//! instructions the orchestrator emits, with the token program's ordering,
//! sizing and fee rules. A submission runs against a copy of the state
//! that replaces the live state only if every instruction succeeds, so a
//! failed transaction leaves nothing behind.

use super::{AccountFilter, Ledger, LedgerError};
use crate::extensions::tlv::{
    tags, AuthorityAndAddress, DecodeError, MintAccount, MintState, TlvEntry, TokenAccount,
    TokenAccountState, TransferFeeState,
};
use crate::extensions::{ExtensionKind, TokenMetadata, MAX_FEE_BASIS_POINTS};
use crate::hook;
use crate::tx_builder::fee;
use crate::tx_builder::layout::{
    account_extension_len, fixed_mint_len, required_account_extensions, token_account_len,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::{
    instruction::Instruction,
    pubkey::Pubkey,
    rent::Rent,
    signature::{Keypair, Signature, Signer},
    system_instruction::SystemInstruction,
    system_program,
};
use spl_token_2022::error::TokenError;
use spl_token_2022::extension::transfer_fee::instruction::TransferFeeInstruction;
use spl_token_2022::instruction::TokenInstruction;
use spl_token_metadata_interface::instruction::TokenMetadataInstruction;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, trace};

/// Charged to the payer for every signature on a transaction
pub const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAccount {
    pub owner: Pubkey,
    pub lamports: u64,
    pub data: Vec<u8>,
    pub executable: bool,
}

#[derive(Debug, Clone, Default)]
struct State {
    accounts: BTreeMap<Pubkey, StoredAccount>,
    epoch: u64,
}

#[derive(Debug, Default)]
struct Inner {
    state: State,
    submissions: u64,
    stall_confirmations: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: Mutex<Inner>,
    rent: Rent,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_epoch(epoch: u64) -> Self {
        let ledger = Self::new();
        ledger.set_epoch(epoch);
        ledger
    }

    pub fn set_epoch(&self, epoch: u64) {
        self.inner.lock().state.epoch = epoch;
    }

    /// Credit lamports to a system account, creating it if needed
    pub fn airdrop(&self, address: &Pubkey, lamports: u64) {
        let mut inner = self.inner.lock();
        let account = inner
            .state
            .accounts
            .entry(*address)
            .or_insert_with(|| StoredAccount {
                owner: system_program::id(),
                lamports: 0,
                data: Vec::new(),
                executable: false,
            });
        account.lamports = account.lamports.saturating_add(lamports);
    }

    /// Register a program whose instructions succeed without effect
    pub fn deploy_program(&self, program_id: &Pubkey) {
        self.inner.lock().state.accounts.insert(
            *program_id,
            StoredAccount {
                owner: solana_sdk::bpf_loader_upgradeable::id(),
                lamports: 1,
                data: Vec::new(),
                executable: true,
            },
        );
    }

    pub fn account(&self, address: &Pubkey) -> Option<StoredAccount> {
        self.inner.lock().state.accounts.get(address).cloned()
    }

    pub fn balance(&self, address: &Pubkey) -> u64 {
        self.account(address).map_or(0, |a| a.lamports)
    }

    /// Transactions handed to `submit_transaction`, including failed ones
    pub fn submission_count(&self) -> u64 {
        self.inner.lock().submissions
    }

    /// When set, submissions are dropped and reported as unconfirmed
    pub fn stall_confirmations(&self, stall: bool) {
        self.inner.lock().stall_confirmations = stall;
    }
}

/// Executes one transaction's instructions against a working copy
struct Processor<'a> {
    state: &'a mut State,
    rent: &'a Rent,
    index: usize,
}

impl<'a> Processor<'a> {
    fn fail(&self, message: impl std::fmt::Display) -> LedgerError {
        LedgerError::rejected(format!("instruction {}: {message}", self.index))
    }

    fn token_error(&self, err: TokenError) -> LedgerError {
        let message = format!("instruction {}: {err}", self.index);
        LedgerError::rejected_with_code(message, err as u32)
    }

    fn decode_failure(&self, address: &Pubkey, err: DecodeError) -> LedgerError {
        match err {
            DecodeError::Uninitialized => self.token_error(TokenError::UninitializedState),
            other => self.fail(format!("invalid account data for {address}: {other}")),
        }
    }

    fn key(&self, ix: &Instruction, position: usize) -> Result<Pubkey, LedgerError> {
        ix.accounts
            .get(position)
            .map(|meta| meta.pubkey)
            .ok_or_else(|| self.fail("not enough account keys"))
    }

    fn debit(&mut self, address: &Pubkey, lamports: u64) -> Result<(), LedgerError> {
        let index = self.index;
        let account = self.state.accounts.get_mut(address).ok_or_else(|| {
            LedgerError::rejected(format!("instruction {index}: account {address} not found"))
        })?;
        account.lamports = account.lamports.checked_sub(lamports).ok_or_else(|| {
            LedgerError::rejected(format!(
                "instruction {index}: insufficient lamports in {address}, need {lamports}"
            ))
        })?;
        Ok(())
    }

    fn token_account_data(&self, address: &Pubkey) -> Result<&[u8], LedgerError> {
        match self.state.accounts.get(address) {
            Some(account) if account.owner == spl_token_2022::id() => Ok(&account.data),
            Some(_) => Err(self.fail(format!("{address} is not owned by the token program"))),
            None => Err(self.fail(format!("account {address} not found"))),
        }
    }

    fn load_mint(&self, address: &Pubkey) -> Result<(MintAccount, usize), LedgerError> {
        let data = self.token_account_data(address)?;
        let mint = MintAccount::unpack(data).map_err(|e| self.decode_failure(address, e))?;
        Ok((mint, data.len()))
    }

    fn load_uninitialized_mint(&self, address: &Pubkey) -> Result<(MintAccount, usize), LedgerError> {
        let data = self.token_account_data(address)?;
        let mint =
            MintAccount::unpack_uninitialized(data).map_err(|e| self.decode_failure(address, e))?;
        if mint.base.is_initialized {
            return Err(self.token_error(TokenError::AlreadyInUse));
        }
        Ok((mint, data.len()))
    }

    fn store_mint(
        &mut self,
        address: &Pubkey,
        mint: &MintAccount,
        capacity: usize,
    ) -> Result<(), LedgerError> {
        let data = mint
            .pack(capacity)
            .map_err(|e| self.fail(format!("invalid account data for {address}: {e}")))?;
        if let Some(account) = self.state.accounts.get_mut(address) {
            account.data = data;
        }
        Ok(())
    }

    fn load_token_account(&self, address: &Pubkey) -> Result<TokenAccount, LedgerError> {
        let data = self.token_account_data(address)?;
        TokenAccount::unpack(data).map_err(|e| self.decode_failure(address, e))
    }

    fn store_token_account(
        &mut self,
        address: &Pubkey,
        account: &TokenAccount,
    ) -> Result<(), LedgerError> {
        let capacity = self.token_account_data(address)?.len();
        let data = account
            .pack(capacity)
            .map_err(|e| self.fail(format!("invalid account data for {address}: {e}")))?;
        if let Some(stored) = self.state.accounts.get_mut(address) {
            stored.data = data;
        }
        Ok(())
    }

    fn process(&mut self, ix: &Instruction) -> Result<(), LedgerError> {
        let program = ix.program_id;
        if program == system_program::id() {
            self.process_system(ix)
        } else if program == spl_associated_token_account::id() {
            self.process_associated_account(ix)
        } else if program == spl_token_2022::id() {
            self.process_token(ix)
        } else if self
            .state
            .accounts
            .get(&program)
            .is_some_and(|account| account.executable)
        {
            if ix.data.starts_with(&hook::initialize_discriminator()) {
                return self.initialize_hook_validation(ix);
            }
            trace!(%program, "Instruction for deployed program");
            Ok(())
        } else {
            Err(self.fail(format!("program {program} is not deployed")))
        }
    }

    /// Hook programs are otherwise opaque; their setup instruction leaves
    /// a validation account that declares no extra accounts.
    fn initialize_hook_validation(&mut self, ix: &Instruction) -> Result<(), LedgerError> {
        let payer = self.key(ix, 0)?;
        let validation = self.key(ix, 1)?;
        let mint = self.key(ix, 2)?;
        if validation != hook::extra_account_metas_address(&mint, &ix.program_id) {
            return Err(self.fail("validation account does not match the derived address"));
        }
        if self.state.accounts.contains_key(&validation) {
            return Err(self.fail(format!("account {validation} already in use")));
        }
        let data = hook::empty_extra_account_meta_list();
        let lamports = self.rent.minimum_balance(data.len());
        self.debit(&payer, lamports)?;
        self.state.accounts.insert(
            validation,
            StoredAccount {
                owner: ix.program_id,
                lamports,
                data,
                executable: false,
            },
        );
        Ok(())
    }

    fn process_system(&mut self, ix: &Instruction) -> Result<(), LedgerError> {
        let instruction: SystemInstruction = bincode::deserialize(&ix.data)
            .map_err(|e| self.fail(format!("invalid system instruction: {e}")))?;
        match instruction {
            SystemInstruction::CreateAccount {
                lamports,
                space,
                owner,
            } => {
                let from = self.key(ix, 0)?;
                let to = self.key(ix, 1)?;
                if self.state.accounts.get(&to).is_some_and(|a| a.lamports > 0) {
                    return Err(self.fail(format!("account {to} already in use")));
                }
                self.debit(&from, lamports)?;
                self.state.accounts.insert(
                    to,
                    StoredAccount {
                        owner,
                        lamports,
                        data: vec![0; space as usize],
                        executable: false,
                    },
                );
                Ok(())
            }
            SystemInstruction::Transfer { lamports } => {
                let from = self.key(ix, 0)?;
                let to = self.key(ix, 1)?;
                self.debit(&from, lamports)?;
                let account = self.state.accounts.entry(to).or_insert_with(|| StoredAccount {
                    owner: system_program::id(),
                    lamports: 0,
                    data: Vec::new(),
                    executable: false,
                });
                account.lamports = account.lamports.saturating_add(lamports);
                Ok(())
            }
            other => Err(self.fail(format!("unsupported system instruction {other:?}"))),
        }
    }

    fn process_associated_account(&mut self, ix: &Instruction) -> Result<(), LedgerError> {
        let idempotent = match ix.data.first() {
            None | Some(0) => false,
            Some(1) => true,
            Some(other) => {
                return Err(self.fail(format!("unsupported associated account instruction {other}")))
            }
        };
        let funder = self.key(ix, 0)?;
        let address = self.key(ix, 1)?;
        let wallet = self.key(ix, 2)?;
        let mint_key = self.key(ix, 3)?;
        let token_program = self.key(ix, 5)?;
        if token_program != spl_token_2022::id() {
            return Err(self.fail(format!("unsupported token program {token_program}")));
        }
        let expected = spl_associated_token_account::get_associated_token_address_with_program_id(
            &wallet,
            &mint_key,
            &token_program,
        );
        if address != expected {
            return Err(self.fail("provided address does not match the derived address"));
        }

        if let Some(existing) = self.state.accounts.get(&address) {
            if existing.owner == spl_token_2022::id() {
                let account = self.load_token_account(&address)?;
                if idempotent && account.base.owner == wallet && account.base.mint == mint_key {
                    return Ok(());
                }
                return Err(self.fail(format!("account {address} already in use")));
            }
        }

        let (mint, _) = self.load_mint(&mint_key)?;
        let mint_kinds = mint
            .extensions
            .iter()
            .filter_map(|entry| ExtensionKind::from_tag(entry.tag));
        let extension_tags = required_account_extensions(mint_kinds, true);
        let size = token_account_len(&extension_tags);
        let lamports = self.rent.minimum_balance(size);
        self.debit(&funder, lamports)?;

        let account = TokenAccount {
            base: TokenAccountState {
                mint: mint_key,
                owner: wallet,
                state: 1,
                ..TokenAccountState::default()
            },
            extensions: extension_tags
                .iter()
                .map(|tag| TlvEntry::new(*tag, vec![0; account_extension_len(*tag)]))
                .collect(),
        };
        let data = account
            .pack(size)
            .map_err(|e| self.fail(format!("invalid account data for {address}: {e}")))?;
        let stored = self.state.accounts.entry(address).or_insert_with(|| StoredAccount {
            owner: spl_token_2022::id(),
            lamports: 0,
            data: Vec::new(),
            executable: false,
        });
        stored.owner = spl_token_2022::id();
        stored.lamports = stored.lamports.saturating_add(lamports);
        stored.data = data;
        Ok(())
    }

    fn process_token(&mut self, ix: &Instruction) -> Result<(), LedgerError> {
        if let Ok(instruction) = TokenMetadataInstruction::unpack(&ix.data) {
            return self.process_metadata(ix, instruction);
        }
        let instruction = TokenInstruction::unpack(&ix.data)
            .map_err(|e| self.fail(format!("invalid token instruction: {e}")))?;
        match instruction {
            TokenInstruction::InitializeMint {
                decimals,
                mint_authority,
                freeze_authority,
            } => self.initialize_mint(ix, decimals, mint_authority, freeze_authority.into()),
            TokenInstruction::MintTo { amount } => self.mint_to(ix, amount),
            TokenInstruction::TransferFeeExtension => self.process_transfer_fee(ix),
            TokenInstruction::MetadataPointerExtension => {
                self.initialize_pointer_like(ix, tags::METADATA_POINTER)
            }
            TokenInstruction::TransferHookExtension => {
                self.initialize_pointer_like(ix, tags::TRANSFER_HOOK)
            }
            TokenInstruction::InitializeNonTransferableMint => {
                let mint_key = self.key(ix, 0)?;
                self.initialize_extension(&mint_key, TlvEntry::new(tags::NON_TRANSFERABLE, Vec::new()))
            }
            other => Err(self.fail(format!("unsupported token instruction {other:?}"))),
        }
    }

    fn initialize_extension(&mut self, mint_key: &Pubkey, entry: TlvEntry) -> Result<(), LedgerError> {
        let (mut mint, capacity) = self.load_uninitialized_mint(mint_key)?;
        mint.set_entry(entry);
        self.store_mint(mint_key, &mint, capacity)
    }

    /// Metadata pointer and transfer hook share the initialize payload shape
    fn initialize_pointer_like(&mut self, ix: &Instruction, tag: u16) -> Result<(), LedgerError> {
        if ix.data.get(1) != Some(&0) {
            return Err(self.fail(format!("unsupported sub-instruction for extension {tag}")));
        }
        let value = AuthorityAndAddress::unpack(&ix.data[2..])
            .map_err(|e| self.fail(format!("invalid instruction data: {e}")))?;
        if value.authority.is_none() && value.address.is_none() {
            return Err(self.token_error(TokenError::InvalidInstruction));
        }
        let mint_key = self.key(ix, 0)?;
        self.initialize_extension(&mint_key, TlvEntry::new(tag, value.pack()))
    }

    fn initialize_mint(
        &mut self,
        ix: &Instruction,
        decimals: u8,
        mint_authority: Pubkey,
        freeze_authority: Option<Pubkey>,
    ) -> Result<(), LedgerError> {
        let mint_key = self.key(ix, 0)?;
        let (mut mint, capacity) = self.load_uninitialized_mint(&mint_key)?;

        let expected = fixed_mint_len(
            mint.extensions
                .iter()
                .filter_map(|entry| ExtensionKind::from_tag(entry.tag)),
        );
        if expected != capacity {
            return Err(self.fail(format!(
                "invalid account data: mint holds {capacity} bytes, initialized extensions need {expected}"
            )));
        }
        let lamports = self.state.accounts.get(&mint_key).map_or(0, |a| a.lamports);
        if !self.rent.is_exempt(lamports, capacity) {
            return Err(self.token_error(TokenError::NotRentExempt));
        }

        mint.base = MintState {
            mint_authority: Some(mint_authority),
            supply: 0,
            decimals,
            is_initialized: true,
            freeze_authority,
        };
        self.store_mint(&mint_key, &mint, capacity)
    }

    fn mint_to(&mut self, ix: &Instruction, amount: u64) -> Result<(), LedgerError> {
        let mint_key = self.key(ix, 0)?;
        let destination = self.key(ix, 1)?;
        let authority = self.key(ix, 2)?;

        let (mut mint, capacity) = self.load_mint(&mint_key)?;
        match mint.base.mint_authority {
            None => return Err(self.token_error(TokenError::FixedSupply)),
            Some(expected) if expected != authority => {
                return Err(self.token_error(TokenError::OwnerMismatch))
            }
            Some(_) => {}
        }
        let mut account = self.load_token_account(&destination)?;
        if account.base.mint != mint_key {
            return Err(self.token_error(TokenError::MintMismatch));
        }

        mint.base.supply = mint
            .base
            .supply
            .checked_add(amount)
            .ok_or_else(|| self.token_error(TokenError::Overflow))?;
        account.base.amount = account
            .base
            .amount
            .checked_add(amount)
            .ok_or_else(|| self.token_error(TokenError::Overflow))?;
        self.store_mint(&mint_key, &mint, capacity)?;
        self.store_token_account(&destination, &account)
    }

    fn process_transfer_fee(&mut self, ix: &Instruction) -> Result<(), LedgerError> {
        let instruction = TransferFeeInstruction::unpack(&ix.data[1..])
            .map_err(|e| self.fail(format!("invalid transfer fee instruction: {e}")))?;
        match instruction {
            TransferFeeInstruction::InitializeTransferFeeConfig {
                transfer_fee_config_authority,
                withdraw_withheld_authority,
                transfer_fee_basis_points,
                maximum_fee,
            } => {
                if transfer_fee_basis_points > MAX_FEE_BASIS_POINTS {
                    return Err(self.token_error(TokenError::TransferFeeExceedsMaximum));
                }
                let state = TransferFeeState::initial(
                    transfer_fee_config_authority.into(),
                    withdraw_withheld_authority.into(),
                    transfer_fee_basis_points,
                    maximum_fee,
                    self.state.epoch,
                );
                let mint_key = self.key(ix, 0)?;
                self.initialize_extension(
                    &mint_key,
                    TlvEntry::new(tags::TRANSFER_FEE_CONFIG, state.pack()),
                )
            }
            TransferFeeInstruction::TransferCheckedWithFee {
                amount,
                decimals,
                fee,
            } => self.transfer_checked_with_fee(ix, amount, decimals, fee),
            TransferFeeInstruction::WithdrawWithheldTokensFromAccounts { num_token_accounts } => {
                self.withdraw_withheld(ix, num_token_accounts as usize)
            }
            other => Err(self.fail(format!("unsupported transfer fee instruction {other:?}"))),
        }
    }

    fn transfer_checked_with_fee(
        &mut self,
        ix: &Instruction,
        amount: u64,
        decimals: u8,
        fee: u64,
    ) -> Result<(), LedgerError> {
        let source_key = self.key(ix, 0)?;
        let mint_key = self.key(ix, 1)?;
        let destination_key = self.key(ix, 2)?;
        let authority = self.key(ix, 3)?;

        let (mint, _) = self.load_mint(&mint_key)?;
        if mint.base.decimals != decimals {
            return Err(self.token_error(TokenError::MintDecimalsMismatch));
        }
        if mint.is_non_transferable() {
            return Err(self.token_error(TokenError::NonTransferable));
        }
        let hook = mint
            .transfer_hook()
            .map_err(|e| self.decode_failure(&mint_key, e))?;
        if let Some(program) = hook.and_then(|h| h.address) {
            if !ix.accounts.iter().any(|meta| meta.pubkey == program) {
                return Err(self.fail(format!("transfer hook program {program} not provided")));
            }
        }

        let fee_state = mint
            .transfer_fee_config()
            .map_err(|e| self.decode_failure(&mint_key, e))?;
        let expected = match fee_state {
            Some(state) => fee::compute_fee(&state, self.state.epoch, amount),
            None => 0,
        };
        if fee != expected {
            debug!(expected, supplied = fee, "Rejecting transfer with mismatched fee");
            return Err(self.token_error(TokenError::FeeMismatch));
        }

        let mut source = self.load_token_account(&source_key)?;
        if source.base.mint != mint_key {
            return Err(self.token_error(TokenError::MintMismatch));
        }
        if source.base.owner != authority {
            return Err(self.token_error(TokenError::OwnerMismatch));
        }
        source.base.amount = source
            .base
            .amount
            .checked_sub(amount)
            .ok_or_else(|| self.token_error(TokenError::InsufficientFunds))?;
        self.store_token_account(&source_key, &source)?;

        // Reloaded after the debit so a self-transfer sees its own update
        let mut destination = self.load_token_account(&destination_key)?;
        if destination.base.mint != mint_key {
            return Err(self.token_error(TokenError::MintMismatch));
        }
        let net = amount
            .checked_sub(fee)
            .ok_or_else(|| self.token_error(TokenError::FeeMismatch))?;
        destination.base.amount = destination
            .base
            .amount
            .checked_add(net)
            .ok_or_else(|| self.token_error(TokenError::Overflow))?;
        if fee > 0 {
            let withheld = destination
                .withheld_amount()
                .map_err(|e| self.decode_failure(&destination_key, e))?
                .ok_or_else(|| self.token_error(TokenError::InvalidState))?;
            let withheld = withheld
                .checked_add(fee)
                .ok_or_else(|| self.token_error(TokenError::Overflow))?;
            destination.set_withheld_amount(withheld);
        }
        self.store_token_account(&destination_key, &destination)
    }

    fn withdraw_withheld(&mut self, ix: &Instruction, count: usize) -> Result<(), LedgerError> {
        let mint_key = self.key(ix, 0)?;
        let destination_key = self.key(ix, 1)?;
        let authority = self.key(ix, 2)?;
        let sources: Vec<Pubkey> = ix
            .accounts
            .get(3..3 + count)
            .ok_or_else(|| self.fail("not enough account keys"))?
            .iter()
            .map(|meta| meta.pubkey)
            .collect();

        let (mint, _) = self.load_mint(&mint_key)?;
        let fee_state = mint
            .transfer_fee_config()
            .map_err(|e| self.decode_failure(&mint_key, e))?
            .ok_or_else(|| self.token_error(TokenError::InvalidState))?;
        if fee_state.withdraw_withheld_authority != Some(authority) {
            return Err(self.token_error(TokenError::OwnerMismatch));
        }

        let mut total: u64 = 0;
        for source_key in &sources {
            let mut source = self.load_token_account(source_key)?;
            if source.base.mint != mint_key {
                return Err(self.token_error(TokenError::MintMismatch));
            }
            let withheld = source
                .withheld_amount()
                .map_err(|e| self.decode_failure(source_key, e))?
                .unwrap_or(0);
            if withheld == 0 {
                continue;
            }
            total = total
                .checked_add(withheld)
                .ok_or_else(|| self.token_error(TokenError::Overflow))?;
            source.set_withheld_amount(0);
            self.store_token_account(source_key, &source)?;
        }

        let mut destination = self.load_token_account(&destination_key)?;
        if destination.base.mint != mint_key {
            return Err(self.token_error(TokenError::MintMismatch));
        }
        destination.base.amount = destination
            .base
            .amount
            .checked_add(total)
            .ok_or_else(|| self.token_error(TokenError::Overflow))?;
        self.store_token_account(&destination_key, &destination)
    }

    fn process_metadata(
        &mut self,
        ix: &Instruction,
        instruction: TokenMetadataInstruction,
    ) -> Result<(), LedgerError> {
        match instruction {
            TokenMetadataInstruction::Initialize(data) => {
                let metadata_key = self.key(ix, 0)?;
                let update_authority = self.key(ix, 1)?;
                let mint_key = self.key(ix, 2)?;
                let mint_authority = self.key(ix, 3)?;
                if metadata_key != mint_key {
                    return Err(self.fail("token metadata must be stored in the mint"));
                }
                let (mint, _) = self.load_mint(&mint_key)?;
                if mint.base.mint_authority != Some(mint_authority) {
                    return Err(self.token_error(TokenError::OwnerMismatch));
                }
                let pointer = mint
                    .metadata_pointer()
                    .map_err(|e| self.decode_failure(&mint_key, e))?;
                if pointer.and_then(|p| p.address) != Some(mint_key) {
                    return Err(self.token_error(TokenError::InvalidExtensionCombination));
                }
                if mint.entry(tags::TOKEN_METADATA).is_some() {
                    return Err(self.fail("token metadata already initialized"));
                }
                let metadata = TokenMetadata {
                    update_authority: Some(update_authority),
                    mint: mint_key,
                    name: data.name,
                    symbol: data.symbol,
                    uri: data.uri,
                    additional_metadata: Vec::new(),
                };
                self.write_metadata(&mint_key, mint, &metadata)
            }
            TokenMetadataInstruction::UpdateField(data) => {
                let metadata_key = self.key(ix, 0)?;
                let update_authority = self.key(ix, 1)?;
                let (mint, _) = self.load_mint(&metadata_key)?;
                let mut metadata = mint
                    .token_metadata()
                    .map_err(|e| self.decode_failure(&metadata_key, e))?
                    .ok_or_else(|| self.fail("token metadata not initialized"))?;
                if metadata.update_authority != Some(update_authority) {
                    return Err(self.fail("incorrect metadata update authority"));
                }
                metadata
                    .apply_update(data.field, data.value)
                    .map_err(|e| self.fail(format!("invalid metadata update: {e}")))?;
                self.write_metadata(&metadata_key, mint, &metadata)
            }
            other => Err(self.fail(format!("unsupported token metadata instruction {other:?}"))),
        }
    }

    /// Store metadata content, resizing the mint to fit it
    fn write_metadata(
        &mut self,
        mint_key: &Pubkey,
        mut mint: MintAccount,
        metadata: &TokenMetadata,
    ) -> Result<(), LedgerError> {
        let packed = metadata
            .pack()
            .map_err(|e| self.fail(format!("failed to pack token metadata: {e}")))?;
        mint.set_entry(TlvEntry::new(tags::TOKEN_METADATA, packed));
        let capacity = mint.required_len();
        self.store_mint(mint_key, &mint, capacity)
    }
}

impl InMemoryLedger {
    fn execute(
        &self,
        state: &mut State,
        instructions: &[Instruction],
        payer: &Pubkey,
        signers: &HashSet<Pubkey>,
    ) -> Result<(), LedgerError> {
        if instructions.is_empty() {
            return Err(LedgerError::rejected("transaction has no instructions"));
        }
        if !signers.contains(payer) {
            return Err(LedgerError::rejected(format!("payer {payer} did not sign")));
        }

        let mut touched: HashSet<Pubkey> = HashSet::from([*payer]);
        for ix in instructions {
            for meta in &ix.accounts {
                if meta.is_signer && !signers.contains(&meta.pubkey) {
                    return Err(LedgerError::rejected(format!(
                        "missing required signature for {}",
                        meta.pubkey
                    )));
                }
                if meta.is_writable {
                    touched.insert(meta.pubkey);
                }
            }
        }

        let mut processor = Processor {
            state,
            rent: &self.rent,
            index: 0,
        };
        processor.debit(payer, LAMPORTS_PER_SIGNATURE * signers.len() as u64)?;
        for (index, ix) in instructions.iter().enumerate() {
            processor.index = index;
            processor.process(ix)?;
        }

        for address in &touched {
            if let Some(account) = state.accounts.get(address) {
                if !account.data.is_empty()
                    && !self.rent.is_exempt(account.lamports, account.data.len())
                {
                    return Err(LedgerError::rejected(format!(
                        "insufficient funds for rent: {address} holds {} lamports for {} bytes",
                        account.lamports,
                        account.data.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn minimum_funding(&self, size: usize) -> Result<u64, LedgerError> {
        Ok(self.rent.minimum_balance(size))
    }

    async fn current_epoch(&self) -> Result<u64, LedgerError> {
        Ok(self.inner.lock().state.epoch)
    }

    async fn submit_transaction(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
        signers: &[&Keypair],
    ) -> Result<Signature, LedgerError> {
        let signer_keys: HashSet<Pubkey> = signers.iter().map(|k| k.pubkey()).collect();
        let mut inner = self.inner.lock();
        inner.submissions += 1;
        if inner.stall_confirmations {
            return Err(LedgerError::TimedOut { timeout_secs: 0 });
        }

        let mut working = inner.state.clone();
        if let Err(err) = self.execute(&mut working, instructions, payer, &signer_keys) {
            debug!(error = %err, "In-memory transaction rejected");
            return Err(err);
        }
        inner.state = working;

        let signature = Signature::new_unique();
        trace!(%signature, instructions = instructions.len(), "In-memory transaction applied");
        Ok(signature)
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Vec<u8>, LedgerError> {
        self.inner
            .lock()
            .state
            .accounts
            .get(address)
            .map(|account| account.data.clone())
            .ok_or(LedgerError::NotFound { address: *address })
    }

    async fn accounts_by_owner_and_filter(
        &self,
        owner: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<Vec<(Pubkey, Vec<u8>)>, LedgerError> {
        let inner = self.inner.lock();
        Ok(inner
            .state
            .accounts
            .iter()
            .filter(|(_, account)| account.owner == *owner)
            .filter(|(_, account)| filters.iter().all(|f| f.matches(&account.data)))
            .map(|(address, account)| (*address, account.data.clone()))
            .collect())
    }
}
