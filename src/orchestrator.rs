//! End-to-end mint flows
//!
//! [`MintOrchestrator`] strings the pure builders of [`crate::tx_builder`]
//! together with a [`Ledger`]: layout and sequencing for mint creation, fee
//! quotes for transfers, and the withheld scan for withdrawals. Every call
//! runs under its own [`OperationContext`], and every submission is a
//! single atomic transaction that is never retried here.

use crate::extensions::tlv::{AuthorityAndAddress, DecodeError, MintAccount, TransferFeeState};
use crate::extensions::{MintConfiguration, TokenMetadata};
use crate::hook;
use crate::ledger::{Ledger, LedgerError};
use crate::metrics::{metrics, Timer};
use crate::structured_logging::OperationContext;
use crate::tx_builder::errors::{ForgeError, Stage};
use crate::tx_builder::fee::{self, FeeQuote};
use crate::tx_builder::instructions::{
    build_mint_creation_sequence, create_token_account_instruction, mint_to_instruction, StepKind,
};
use crate::tx_builder::layout::{compute_layout, MintLayout};
use crate::tx_builder::withheld::{
    self, build_withdraw_instruction, withdrawal_batches, WithheldAccountRecord,
    DEFAULT_MAX_ACCOUNTS_PER_WITHDRAWAL,
};
use crate::wallet::Wallet;
use serde::Serialize;
use solana_sdk::{
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use spl_token_2022::extension::transfer_fee::instruction::transfer_checked_with_fee;
use std::fmt;
use tracing::{debug, info, warn};

/// Result of a successful mint creation
#[derive(Debug, Clone)]
pub struct CreatedMint {
    pub mint: Pubkey,
    pub signature: Signature,
    pub layout: MintLayout,
    pub steps: Vec<StepKind>,
}

/// Decoded view of a mint and its extensions
#[derive(Debug, Clone, Serialize)]
pub struct MintInfo {
    pub address: Pubkey,
    pub decimals: u8,
    pub supply: u64,
    pub mint_authority: Option<Pubkey>,
    pub freeze_authority: Option<Pubkey>,
    pub transfer_fee: Option<TransferFeeState>,
    pub metadata_pointer: Option<AuthorityAndAddress>,
    pub transfer_hook: Option<AuthorityAndAddress>,
    pub non_transferable: bool,
    pub metadata: Option<TokenMetadata>,
    pub account_size: usize,
}

fn opt_key(key: &Option<Pubkey>) -> String {
    key.map_or_else(|| "none".to_string(), |k| k.to_string())
}

impl fmt::Display for MintInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mint:             {}", self.address)?;
        writeln!(f, "account size:     {} bytes", self.account_size)?;
        writeln!(f, "decimals:         {}", self.decimals)?;
        writeln!(f, "supply:           {}", self.supply)?;
        writeln!(f, "mint authority:   {}", opt_key(&self.mint_authority))?;
        writeln!(f, "freeze authority: {}", opt_key(&self.freeze_authority))?;
        if let Some(fee) = &self.transfer_fee {
            writeln!(
                f,
                "transfer fee:     {} bps, max {} (from epoch {}); before: {} bps, max {}",
                fee.newer_transfer_fee.transfer_fee_basis_points,
                fee.newer_transfer_fee.maximum_fee,
                fee.newer_transfer_fee.epoch,
                fee.older_transfer_fee.transfer_fee_basis_points,
                fee.older_transfer_fee.maximum_fee,
            )?;
            writeln!(f, "  config authority:   {}", opt_key(&fee.transfer_fee_config_authority))?;
            writeln!(f, "  withdraw authority: {}", opt_key(&fee.withdraw_withheld_authority))?;
            writeln!(f, "  withheld on mint:   {}", fee.withheld_amount)?;
        }
        if let Some(pointer) = &self.metadata_pointer {
            writeln!(f, "metadata pointer: {}", opt_key(&pointer.address))?;
        }
        if let Some(hook) = &self.transfer_hook {
            writeln!(f, "transfer hook:    {}", opt_key(&hook.address))?;
        }
        if self.non_transferable {
            writeln!(f, "non-transferable")?;
        }
        if let Some(metadata) = &self.metadata {
            writeln!(f, "name:             {}", metadata.name)?;
            writeln!(f, "symbol:           {}", metadata.symbol)?;
            writeln!(f, "uri:              {}", metadata.uri)?;
            for (key, value) in &metadata.additional_metadata {
                writeln!(f, "  {key}: {value}")?;
            }
        }
        Ok(())
    }
}

/// A confirmed fee-bearing transfer
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub signature: Signature,
    pub source: Pubkey,
    pub destination: Pubkey,
    pub quote: FeeQuote,
}

/// Result of a withheld-fee withdrawal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// No account of the mint holds withheld fees
    NothingToWithdraw,
    Withdrawn {
        /// One per batch, in submission order
        signatures: Vec<Signature>,
        accounts: usize,
        total: u128,
    },
}

pub struct MintOrchestrator<L: Ledger> {
    ledger: L,
    payer: Wallet,
    max_accounts_per_tx: usize,
}

impl<L: Ledger> MintOrchestrator<L> {
    /// `payer` funds every transaction and acts as mint, fee and hook
    /// authority for the mints this orchestrator creates.
    pub fn new(ledger: L, payer: Wallet) -> Self {
        Self {
            ledger,
            payer,
            max_accounts_per_tx: DEFAULT_MAX_ACCOUNTS_PER_WITHDRAWAL,
        }
    }

    pub fn with_max_accounts_per_tx(mut self, max_accounts_per_tx: usize) -> Self {
        self.max_accounts_per_tx = max_accounts_per_tx;
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn payer(&self) -> Pubkey {
        self.payer.pubkey()
    }

    pub fn payer_keypair(&self) -> &Keypair {
        self.payer.keypair()
    }

    /// Payer first, other signers after it, each key once
    fn signer_set<'a>(&'a self, extra: &[&'a Keypair]) -> Vec<&'a Keypair> {
        let mut signers = vec![self.payer.keypair()];
        for keypair in extra {
            if !signers.iter().any(|s| s.pubkey() == keypair.pubkey()) {
                signers.push(*keypair);
            }
        }
        signers
    }

    async fn submit(
        &self,
        ctx: &OperationContext,
        instructions: &[Instruction],
        signers: &[&Keypair],
        map_err: impl FnOnce(LedgerError) -> ForgeError,
    ) -> Result<Signature, ForgeError> {
        ctx.log_submission(instructions.len(), signers.len());
        let m = metrics();
        m.transactions_submitted.inc();
        let timer = Timer::new();

        let signature = self
            .ledger
            .submit_transaction(instructions, &self.payer.pubkey(), signers)
            .await
            .map_err(map_err)?;

        timer.observe_duration(&m.submission_latency);
        m.transactions_confirmed.inc();
        ctx.log_success(&signature.to_string());
        Ok(signature)
    }

    fn finish<T>(ctx: &OperationContext, result: Result<T, ForgeError>) -> Result<T, ForgeError> {
        if let Err(err) = &result {
            metrics().record_failure(err.stage());
            ctx.log_failure(err);
        }
        result
    }

    async fn load_mint(&self, mint: &Pubkey, stage: Stage) -> Result<MintAccount, ForgeError> {
        let data = self
            .ledger
            .account_data(mint)
            .await
            .map_err(|e| ForgeError::from_ledger(stage, e))?;
        MintAccount::unpack(&data).map_err(|e| ForgeError::decode(stage, *mint, e))
    }

    /// Create the mint described by `config` in one transaction.
    ///
    /// `mint_keypair` must match `config.mint`; it co-signs the account
    /// allocation. Every other signer the sequence needs must be the payer.
    pub async fn create_mint(
        &self,
        config: &MintConfiguration,
        mint_keypair: &Keypair,
    ) -> Result<CreatedMint, ForgeError> {
        let ctx = OperationContext::new("create_mint");
        let result = self.create_mint_inner(&ctx, config, mint_keypair).await;
        Self::finish(&ctx, result)
    }

    async fn create_mint_inner(
        &self,
        ctx: &OperationContext,
        config: &MintConfiguration,
        mint_keypair: &Keypair,
    ) -> Result<CreatedMint, ForgeError> {
        if mint_keypair.pubkey() != config.mint {
            return Err(ForgeError::invalid_config(
                Stage::Sequencing,
                format!(
                    "mint keypair {} does not match configured mint {}",
                    mint_keypair.pubkey(),
                    config.mint
                ),
            ));
        }

        let layout = compute_layout(&self.ledger, config.extensions()).await?;
        ctx.log_stage(Stage::Layout, &format!("{} bytes", layout.account_size));

        let payer = self.payer.pubkey();
        let plan = build_mint_creation_sequence(config, &payer, &layout)?;
        let signers = self.signer_set(&[mint_keypair]);
        if let Some(missing) = plan
            .signers
            .iter()
            .find(|key| !signers.iter().any(|s| s.pubkey() == **key))
        {
            return Err(ForgeError::invalid_config(
                Stage::Sequencing,
                format!("no keypair available for required signer {missing}"),
            ));
        }
        ctx.log_stage(Stage::Sequencing, &format!("{} instructions", plan.len()));

        let signature = self
            .submit(ctx, &plan.instructions(), &signers, |e| {
                ForgeError::from_ledger(Stage::Submission, e)
            })
            .await?;

        info!(mint = %config.mint, %signature, size = layout.account_size, "Mint created");
        Ok(CreatedMint {
            mint: config.mint,
            signature,
            layout,
            steps: plan.step_kinds(),
        })
    }

    /// Decode a mint and every extension this crate understands
    pub async fn inspect_mint(&self, mint: &Pubkey) -> Result<MintInfo, ForgeError> {
        let ctx = OperationContext::new("inspect_mint");
        let result = self.inspect_mint_inner(mint).await;
        Self::finish(&ctx, result)
    }

    async fn inspect_mint_inner(&self, mint: &Pubkey) -> Result<MintInfo, ForgeError> {
        let data = self
            .ledger
            .account_data(mint)
            .await
            .map_err(|e| ForgeError::from_ledger(Stage::Scan, e))?;
        let account =
            MintAccount::unpack(&data).map_err(|e| ForgeError::decode(Stage::Scan, *mint, e))?;
        let decode = |e: DecodeError| ForgeError::decode(Stage::Scan, *mint, e);
        Ok(MintInfo {
            address: *mint,
            decimals: account.base.decimals,
            supply: account.base.supply,
            mint_authority: account.base.mint_authority,
            freeze_authority: account.base.freeze_authority,
            transfer_fee: account.transfer_fee_config().map_err(decode)?,
            metadata_pointer: account.metadata_pointer().map_err(decode)?,
            transfer_hook: account.transfer_hook().map_err(decode)?,
            non_transferable: account.is_non_transferable(),
            metadata: account.token_metadata().map_err(decode)?,
            account_size: data.len(),
        })
    }

    /// Create `owner`'s associated token account for `mint` unless it
    /// already exists. Returns its address.
    pub async fn ensure_token_account(
        &self,
        mint: &Pubkey,
        owner: &Pubkey,
    ) -> Result<Pubkey, ForgeError> {
        let ctx = OperationContext::new("ensure_token_account");
        let (address, instruction) =
            create_token_account_instruction(&self.payer.pubkey(), owner, mint);
        let signers = self.signer_set(&[]);
        let result = self
            .submit(&ctx, &[instruction], &signers, |e| {
                ForgeError::from_ledger(Stage::Submission, e)
            })
            .await
            .map(|_| address);
        Self::finish(&ctx, result)
    }

    /// Issue `amount` base units into `destination`, a token account
    pub async fn mint_to(
        &self,
        mint: &Pubkey,
        destination: &Pubkey,
        amount: u64,
    ) -> Result<Signature, ForgeError> {
        let ctx = OperationContext::new("mint_to");
        let result = async {
            let instruction =
                mint_to_instruction(mint, destination, &self.payer.pubkey(), amount)?;
            let signers = self.signer_set(&[]);
            self.submit(&ctx, &[instruction], &signers, |e| {
                ForgeError::from_ledger(Stage::Submission, e)
            })
            .await
        }
        .await;
        Self::finish(&ctx, result)
    }

    async fn quote_from_ledger(
        &self,
        mint: &Pubkey,
        amount: u64,
    ) -> Result<(MintAccount, FeeQuote), ForgeError> {
        let account = self.load_mint(mint, Stage::FeeCheck).await?;
        let epoch = self
            .ledger
            .current_epoch()
            .await
            .map_err(|e| ForgeError::from_ledger(Stage::FeeCheck, e))?;
        let quote = fee::quote(mint, &account, epoch, amount)?;
        debug!(%mint, amount, fee = quote.fee, epoch, "Quoted transfer fee");
        Ok((account, quote))
    }

    /// Fee the token program will charge for transferring `amount` now
    pub async fn quote_fee(&self, mint: &Pubkey, amount: u64) -> Result<FeeQuote, ForgeError> {
        let ctx = OperationContext::new("quote_fee");
        let result = self.quote_from_ledger(mint, amount).await.map(|(_, q)| q);
        Self::finish(&ctx, result)
    }

    /// Transfer `amount` from `source_owner`'s associated account to the
    /// token account `destination`, embedding the computed fee.
    ///
    /// A `supplied_fee` that differs from the computed one fails with
    /// [`ForgeError::FeeMismatch`] before anything is submitted.
    pub async fn transfer_with_fee(
        &self,
        mint: &Pubkey,
        source_owner: &Keypair,
        destination: &Pubkey,
        amount: u64,
        supplied_fee: Option<u64>,
    ) -> Result<TransferReceipt, ForgeError> {
        let ctx = OperationContext::new("transfer_with_fee");
        let result = self
            .transfer_inner(&ctx, mint, source_owner, destination, amount, supplied_fee)
            .await;
        Self::finish(&ctx, result)
    }

    async fn transfer_inner(
        &self,
        ctx: &OperationContext,
        mint: &Pubkey,
        source_owner: &Keypair,
        destination: &Pubkey,
        amount: u64,
        supplied_fee: Option<u64>,
    ) -> Result<TransferReceipt, ForgeError> {
        let (account, quote) = self.quote_from_ledger(mint, amount).await?;
        let fee = fee::verify_quote(&quote, supplied_fee)?;
        ctx.log_stage(Stage::FeeCheck, &format!("fee {fee}"));

        let program_id = spl_token_2022::id();
        let authority = source_owner.pubkey();
        let source = spl_associated_token_account::get_associated_token_address_with_program_id(
            &authority,
            mint,
            &program_id,
        );
        let decimals = account.base.decimals;
        let hook_program = account
            .transfer_hook()
            .map_err(|e| ForgeError::decode(Stage::FeeCheck, *mint, e))?
            .and_then(|h| h.address);

        let instruction = match hook_program {
            Some(program) => {
                debug!(%mint, %program, "Resolving transfer hook accounts");
                let ledger = &self.ledger;
                spl_token_2022::offchain::create_transfer_checked_with_fee_instruction_with_extra_metas(
                    &program_id,
                    &source,
                    mint,
                    destination,
                    &authority,
                    &[],
                    amount,
                    decimals,
                    fee,
                    |address| async move {
                        match ledger.account_data(&address).await {
                            Ok(data) => Ok(Some(data)),
                            Err(LedgerError::NotFound { .. }) => Ok(None),
                            Err(e) => Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
                        }
                    },
                )
                .await
                .map_err(|e| {
                    ForgeError::instruction_failed(Stage::Sequencing, "transfer_checked_with_fee", e)
                })?
            }
            None => transfer_checked_with_fee(
                &program_id,
                &source,
                mint,
                destination,
                &authority,
                &[],
                amount,
                decimals,
                fee,
            )
            .map_err(|e| {
                ForgeError::instruction_failed(Stage::Sequencing, "transfer_checked_with_fee", e)
            })?,
        };

        let signers = self.signer_set(&[source_owner]);
        let signature = self
            .submit(ctx, &[instruction], &signers, |e| {
                ForgeError::from_transfer_rejection(e, fee)
            })
            .await?;

        Ok(TransferReceipt {
            signature,
            source,
            destination: *destination,
            quote,
        })
    }

    /// Token accounts of `mint` holding withheld fees, in ledger order
    pub async fn find_withdrawable_accounts(
        &self,
        mint: &Pubkey,
    ) -> Result<Vec<WithheldAccountRecord>, ForgeError> {
        let ctx = OperationContext::new("find_withdrawable_accounts");
        let result = async {
            let mut scan = withheld::find_withdrawable_accounts(&self.ledger, mint).await?;
            let records: Vec<_> = scan.by_ref().collect();
            if scan.skipped() > 0 {
                warn!(%mint, skipped = scan.skipped(), "Scan passed over undecodable accounts");
            }
            metrics().withheld_accounts.set(records.len() as i64);
            ctx.log_stage(Stage::Scan, &format!("{} accounts", records.len()));
            Ok::<_, ForgeError>(records)
        }
        .await;
        Self::finish(&ctx, result)
    }

    /// Move every withheld fee of `mint` into the token account
    /// `destination`. The payer must be the mint's withdraw authority.
    ///
    /// Batches are submitted in order; if one fails, earlier batches stay
    /// applied and the error is returned.
    pub async fn withdraw_withheld(
        &self,
        mint: &Pubkey,
        destination: &Pubkey,
    ) -> Result<WithdrawOutcome, ForgeError> {
        let records = self.find_withdrawable_accounts(mint).await?;
        let ctx = OperationContext::new("withdraw_withheld");
        let result = self.withdraw_inner(&ctx, mint, destination, &records).await;
        Self::finish(&ctx, result)
    }

    async fn withdraw_inner(
        &self,
        ctx: &OperationContext,
        mint: &Pubkey,
        destination: &Pubkey,
        records: &[WithheldAccountRecord],
    ) -> Result<WithdrawOutcome, ForgeError> {
        if records.is_empty() {
            info!(%mint, "No withheld fees to withdraw");
            return Ok(WithdrawOutcome::NothingToWithdraw);
        }

        let authority = self.payer.pubkey();
        let signers = self.signer_set(&[]);
        let mut signatures = Vec::new();
        for (index, batch) in withdrawal_batches(records, self.max_accounts_per_tx)?.enumerate() {
            let instruction = build_withdraw_instruction(mint, destination, &authority, batch)?;
            let signature = self
                .submit(ctx, &[instruction], &signers, |e| {
                    ForgeError::from_ledger(Stage::Submission, e)
                })
                .await
                .inspect_err(|e| warn!(batch = index, error = %e, "Withdrawal batch failed"))?;
            signatures.push(signature);
        }

        let total = withheld::total_withheld(records);
        info!(%mint, accounts = records.len(), %total, batches = signatures.len(), "Withheld fees withdrawn");
        Ok(WithdrawOutcome::Withdrawn {
            signatures,
            accounts: records.len(),
            total,
        })
    }

    /// Initialize the hook program's extra-account list for `mint`
    pub async fn initialize_hook_accounts(&self, mint: &Pubkey) -> Result<Signature, ForgeError> {
        let ctx = OperationContext::new("initialize_hook_accounts");
        let result = async {
            let account = self.load_mint(mint, Stage::Sequencing).await?;
            let program = account
                .transfer_hook()
                .map_err(|e| ForgeError::decode(Stage::Sequencing, *mint, e))?
                .and_then(|h| h.address)
                .ok_or_else(|| {
                    ForgeError::invalid_config(
                        Stage::Sequencing,
                        format!("mint {mint} has no transfer hook program"),
                    )
                })?;
            let instruction =
                hook::initialize_extra_account_meta_list(&program, &self.payer.pubkey(), mint);
            let signers = self.signer_set(&[]);
            self.submit(&ctx, &[instruction], &signers, |e| {
                ForgeError::from_ledger(Stage::Submission, e)
            })
            .await
        }
        .await;
        Self::finish(&ctx, result)
    }
}
