//! Ledger backed by a Solana JSON-RPC endpoint

use super::{AccountFilter, Ledger, LedgerError};
use async_trait::async_trait;
use solana_account_decoder::UiAccountEncoding;
use solana_client::client_error::ClientError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig};
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_sdk::{
    commitment_config::CommitmentConfig,
    instruction::{Instruction, InstructionError},
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    transaction::{Transaction, TransactionError},
};
use std::time::Duration;
use tracing::{debug, warn};

pub struct RpcLedger {
    client: RpcClient,
    commitment: CommitmentConfig,
    confirm_timeout: Duration,
}

impl RpcLedger {
    pub fn new(url: impl Into<String>, commitment: CommitmentConfig, confirm_timeout: Duration) -> Self {
        let url = url.into();
        debug!(%url, ?commitment, "Creating RPC ledger");
        Self {
            client: RpcClient::new_with_timeout_and_commitment(url, confirm_timeout, commitment),
            commitment,
            confirm_timeout,
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }

    fn classify(&self, err: ClientError) -> LedgerError {
        match err.get_transaction_error() {
            Some(TransactionError::InstructionError(index, InstructionError::Custom(code))) => {
                LedgerError::rejected_with_code(
                    format!("instruction {index} failed: custom program error {code:#x}"),
                    code,
                )
            }
            Some(tx_err) => LedgerError::rejected(tx_err.to_string()),
            None => {
                let message = err.to_string();
                let lower = message.to_lowercase();
                if lower.contains("unable to confirm") || lower.contains("timed out") {
                    LedgerError::TimedOut {
                        timeout_secs: self.confirm_timeout.as_secs(),
                    }
                } else {
                    LedgerError::Transport(message)
                }
            }
        }
    }
}

fn to_rpc_filter(filter: &AccountFilter) -> RpcFilterType {
    match filter {
        AccountFilter::Memcmp { offset, bytes } => {
            RpcFilterType::Memcmp(Memcmp::new_base58_encoded(*offset, bytes))
        }
        AccountFilter::DataSize(len) => RpcFilterType::DataSize(*len),
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn minimum_funding(&self, size: usize) -> Result<u64, LedgerError> {
        self.client
            .get_minimum_balance_for_rent_exemption(size)
            .await
            .map_err(|e| self.classify(e))
    }

    async fn current_epoch(&self) -> Result<u64, LedgerError> {
        self.client
            .get_epoch_info()
            .await
            .map(|info| info.epoch)
            .map_err(|e| self.classify(e))
    }

    async fn submit_transaction(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
        signers: &[&Keypair],
    ) -> Result<Signature, LedgerError> {
        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(|e| self.classify(e))?;

        let mut tx = Transaction::new_with_payer(instructions, Some(payer));
        tx.try_sign(signers, blockhash)
            .map_err(|e| LedgerError::rejected(format!("signing failed: {e}")))?;

        match tokio::time::timeout(
            self.confirm_timeout,
            self.client.send_and_confirm_transaction(&tx),
        )
        .await
        {
            Ok(result) => result.map_err(|e| {
                let err = self.classify(e);
                warn!(error = %err, "Transaction failed");
                err
            }),
            Err(_) => Err(LedgerError::TimedOut {
                timeout_secs: self.confirm_timeout.as_secs(),
            }),
        }
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Vec<u8>, LedgerError> {
        let response = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(|e| self.classify(e))?;
        response
            .value
            .map(|account| account.data)
            .ok_or(LedgerError::NotFound { address: *address })
    }

    async fn accounts_by_owner_and_filter(
        &self,
        owner: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<Vec<(Pubkey, Vec<u8>)>, LedgerError> {
        let config = RpcProgramAccountsConfig {
            filters: Some(filters.iter().map(to_rpc_filter).collect()),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(self.commitment),
                ..RpcAccountInfoConfig::default()
            },
            ..RpcProgramAccountsConfig::default()
        };
        let accounts = self
            .client
            .get_program_accounts_with_config(owner, config)
            .await
            .map_err(|e| self.classify(e))?;
        Ok(accounts
            .into_iter()
            .map(|(address, account)| (address, account.data))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_client::client_error::ClientErrorKind;

    fn ledger() -> RpcLedger {
        RpcLedger::new(
            "http://127.0.0.1:8899",
            CommitmentConfig::confirmed(),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_custom_code_extracted() {
        let err = ClientError::from(ClientErrorKind::TransactionError(
            TransactionError::InstructionError(2, InstructionError::Custom(0x2b)),
        ));
        match ledger().classify(err) {
            LedgerError::Rejected { custom_code, .. } => assert_eq!(custom_code, Some(0x2b)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_plain_transaction_error_is_rejection() {
        let err = ClientError::from(ClientErrorKind::TransactionError(
            TransactionError::InsufficientFundsForRent { account_index: 1 },
        ));
        assert!(matches!(
            ledger().classify(err),
            LedgerError::Rejected {
                custom_code: None,
                ..
            }
        ));
    }

    #[test]
    fn test_other_errors_are_transport() {
        let err = ClientError::from(ClientErrorKind::Custom("connection refused".to_string()));
        assert!(matches!(ledger().classify(err), LedgerError::Transport(_)));
    }

    #[test]
    fn test_filter_conversion() {
        let filter = to_rpc_filter(&AccountFilter::DataSize(165));
        assert!(matches!(filter, RpcFilterType::DataSize(165)));
    }
}
