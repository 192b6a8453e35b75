//! Ledger capability
//!
//! Everything the orchestrator needs from the network goes through
//! [`Ledger`]: rent quotes, the current epoch, account reads, filtered
//! program-account queries and atomic transaction submission. Two
//! implementations ship with the crate: [`rpc::RpcLedger`] for a live
//! cluster and [`memory::InMemoryLedger`] for tests and dry runs.

pub mod memory;
pub mod rpc;

pub use memory::InMemoryLedger;
pub use rpc::RpcLedger;

use async_trait::async_trait;
use solana_sdk::{
    instruction::Instruction, pubkey::Pubkey, signature::Keypair, signature::Signature,
};
use std::sync::Arc;
use thiserror::Error;

/// Failures reported by a ledger implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("account not found: {address}")]
    NotFound { address: Pubkey },

    #[error("not confirmed within {timeout_secs}s")]
    TimedOut { timeout_secs: u64 },

    /// The ledger executed and refused the transaction
    #[error("rejected: {message}")]
    Rejected {
        message: String,
        /// Custom program error code, when the failing program set one
        custom_code: Option<u32>,
    },

    #[error("transport: {0}")]
    Transport(String),
}

impl LedgerError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            custom_code: None,
        }
    }

    pub fn rejected_with_code(message: impl Into<String>, code: u32) -> Self {
        Self::Rejected {
            message: message.into(),
            custom_code: Some(code),
        }
    }
}

/// Server-side filter for program account queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountFilter {
    /// Account data at `offset` starts with `bytes`
    Memcmp { offset: usize, bytes: Vec<u8> },
    /// Account data is exactly this long
    DataSize(u64),
}

impl AccountFilter {
    pub fn matches(&self, data: &[u8]) -> bool {
        match self {
            AccountFilter::Memcmp { offset, bytes } => data
                .get(*offset..offset + bytes.len())
                .is_some_and(|window| window == bytes.as_slice()),
            AccountFilter::DataSize(len) => data.len() as u64 == *len,
        }
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Rent-exempt balance for an account of `size` bytes
    async fn minimum_funding(&self, size: usize) -> Result<u64, LedgerError>;

    async fn current_epoch(&self) -> Result<u64, LedgerError>;

    /// Sign and submit `instructions` as one atomic transaction paid by
    /// `payer`, waiting for confirmation.
    async fn submit_transaction(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
        signers: &[&Keypair],
    ) -> Result<Signature, LedgerError>;

    async fn account_data(&self, address: &Pubkey) -> Result<Vec<u8>, LedgerError>;

    /// Accounts owned by `owner` matching every filter, in ledger order
    async fn accounts_by_owner_and_filter(
        &self,
        owner: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<Vec<(Pubkey, Vec<u8>)>, LedgerError>;
}

#[async_trait]
impl<L: Ledger + ?Sized> Ledger for Arc<L> {
    async fn minimum_funding(&self, size: usize) -> Result<u64, LedgerError> {
        (**self).minimum_funding(size).await
    }

    async fn current_epoch(&self) -> Result<u64, LedgerError> {
        (**self).current_epoch().await
    }

    async fn submit_transaction(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
        signers: &[&Keypair],
    ) -> Result<Signature, LedgerError> {
        (**self)
            .submit_transaction(instructions, payer, signers)
            .await
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Vec<u8>, LedgerError> {
        (**self).account_data(address).await
    }

    async fn accounts_by_owner_and_filter(
        &self,
        owner: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<Vec<(Pubkey, Vec<u8>)>, LedgerError> {
        (**self).accounts_by_owner_and_filter(owner, filters).await
    }
}
