//! Withheld-fee aggregation
//!
//! Token accounts of a fee-bearing mint accumulate withheld fees in their
//! `TransferFeeAmount` extension. The scan asks the ledger for every
//! token-program account whose first 32 bytes (the mint field) match the
//! target mint and yields only those holding a nonzero withheld balance,
//! in the order the ledger returned them.

use crate::extensions::tlv::TokenAccount;
use crate::ledger::{AccountFilter, Ledger};
use crate::tx_builder::errors::{ForgeError, Stage};
use serde::Serialize;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use spl_token_2022::extension::transfer_fee::instruction::withdraw_withheld_tokens_from_accounts;
use tracing::{debug, warn};

/// Accounts named by one withdrawal, bounded by transaction size
pub const DEFAULT_MAX_ACCOUNTS_PER_WITHDRAWAL: usize = 20;

/// Token account holding withheld fees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WithheldAccountRecord {
    pub address: Pubkey,
    pub withheld_amount: u64,
}

/// Filter selecting token accounts of `mint`
pub fn mint_filter(mint: &Pubkey) -> AccountFilter {
    AccountFilter::Memcmp {
        offset: 0,
        bytes: mint.to_bytes().to_vec(),
    }
}

/// One pass over the accounts of a mint. Decoding happens as the iterator
/// advances; once drained, run a new scan for fresh results.
#[derive(Debug)]
pub struct WithheldScan {
    mint: Pubkey,
    accounts: std::vec::IntoIter<(Pubkey, Vec<u8>)>,
    skipped: usize,
}

impl WithheldScan {
    pub fn new(mint: Pubkey, accounts: Vec<(Pubkey, Vec<u8>)>) -> Self {
        Self {
            mint,
            accounts: accounts.into_iter(),
            skipped: 0,
        }
    }

    /// Accounts passed over so far because they could not be decoded
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn record(&mut self, address: Pubkey, data: &[u8]) -> Option<WithheldAccountRecord> {
        let account = match TokenAccount::unpack(data) {
            Ok(account) => account,
            Err(e) => {
                self.skipped += 1;
                warn!(%address, error = %e, "Skipping undecodable account");
                return None;
            }
        };
        if account.base.mint != self.mint {
            return None;
        }
        match account.withheld_amount() {
            Ok(Some(withheld_amount)) if withheld_amount > 0 => Some(WithheldAccountRecord {
                address,
                withheld_amount,
            }),
            Ok(_) => None,
            Err(e) => {
                self.skipped += 1;
                warn!(%address, error = %e, "Skipping account with malformed fee extension");
                None
            }
        }
    }
}

impl Iterator for WithheldScan {
    type Item = WithheldAccountRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (address, data) = self.accounts.next()?;
            if let Some(record) = self.record(address, &data) {
                return Some(record);
            }
        }
    }
}

/// Query the ledger for the token accounts of `mint` and start a scan.
pub async fn find_withdrawable_accounts<L: Ledger + ?Sized>(
    ledger: &L,
    mint: &Pubkey,
) -> Result<WithheldScan, ForgeError> {
    let accounts = ledger
        .accounts_by_owner_and_filter(&spl_token_2022::id(), &[mint_filter(mint)])
        .await
        .map_err(|e| ForgeError::from_ledger(Stage::Scan, e))?;
    debug!(%mint, candidates = accounts.len(), "Fetched token accounts for withheld scan");
    Ok(WithheldScan::new(*mint, accounts))
}

/// Sum of withheld fees across records
pub fn total_withheld(records: &[WithheldAccountRecord]) -> u128 {
    records.iter().map(|r| r.withheld_amount as u128).sum()
}

/// Split records into withdrawal batches of at most `max_per_tx` accounts
pub fn withdrawal_batches(
    records: &[WithheldAccountRecord],
    max_per_tx: usize,
) -> Result<std::slice::Chunks<'_, WithheldAccountRecord>, ForgeError> {
    if max_per_tx == 0 {
        return Err(ForgeError::invalid_config(
            Stage::Scan,
            "withdrawal batch size must be positive",
        ));
    }
    Ok(records.chunks(max_per_tx))
}

/// Withdrawal moving the withheld fees of `sources` into `destination`
pub fn build_withdraw_instruction(
    mint: &Pubkey,
    destination: &Pubkey,
    withdraw_authority: &Pubkey,
    sources: &[WithheldAccountRecord],
) -> Result<Instruction, ForgeError> {
    if sources.is_empty() {
        return Err(ForgeError::invalid_config(
            Stage::Scan,
            "withdrawal needs at least one source account",
        ));
    }
    let addresses: Vec<&Pubkey> = sources.iter().map(|r| &r.address).collect();
    withdraw_withheld_tokens_from_accounts(
        &spl_token_2022::id(),
        mint,
        destination,
        withdraw_authority,
        &[],
        &addresses,
    )
    .map_err(|e| ForgeError::instruction_failed(Stage::Scan, "withdraw_withheld_tokens", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::tlv::{TokenAccountState, TLV_START};

    fn token_account(mint: Pubkey, withheld: Option<u64>) -> Vec<u8> {
        let mut account = TokenAccount {
            base: TokenAccountState {
                mint,
                owner: Pubkey::new_unique(),
                amount: 1_000,
                state: 1,
                ..TokenAccountState::default()
            },
            extensions: Vec::new(),
        };
        match withheld {
            Some(amount) => {
                account.set_withheld_amount(amount);
                account.pack(TLV_START + 12).unwrap()
            }
            None => account.pack(165).unwrap(),
        }
    }

    fn record(withheld: u64) -> WithheldAccountRecord {
        WithheldAccountRecord {
            address: Pubkey::new_unique(),
            withheld_amount: withheld,
        }
    }

    #[test]
    fn test_scan_keeps_only_nonzero_in_ledger_order() {
        let mint = Pubkey::new_unique();
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let c = Pubkey::new_unique();
        let d = Pubkey::new_unique();
        let accounts = vec![
            (a, token_account(mint, Some(5))),
            (b, token_account(mint, Some(0))),
            (c, token_account(mint, None)),
            (d, token_account(mint, Some(3))),
        ];
        let records: Vec<_> = WithheldScan::new(mint, accounts).collect();
        assert_eq!(
            records,
            vec![
                WithheldAccountRecord {
                    address: a,
                    withheld_amount: 5
                },
                WithheldAccountRecord {
                    address: d,
                    withheld_amount: 3
                },
            ]
        );
        assert!(records.iter().all(|r| r.withheld_amount > 0));
    }

    #[test]
    fn test_scan_skips_garbage_and_other_mints() {
        let mint = Pubkey::new_unique();
        let accounts = vec![
            (Pubkey::new_unique(), vec![1, 2, 3]),
            (Pubkey::new_unique(), token_account(Pubkey::new_unique(), Some(9))),
            (Pubkey::new_unique(), token_account(mint, Some(1))),
        ];
        let mut scan = WithheldScan::new(mint, accounts);
        let records: Vec<_> = scan.by_ref().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(scan.skipped(), 1);
    }

    #[test]
    fn test_empty_scan_is_not_an_error() {
        let mut scan = WithheldScan::new(Pubkey::new_unique(), Vec::new());
        assert!(scan.next().is_none());
    }

    #[test]
    fn test_batches() {
        let records: Vec<_> = (1..=45).map(record).collect();
        let batches: Vec<_> = withdrawal_batches(&records, 20).unwrap().collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].len(), 5);
        assert!(withdrawal_batches(&records, 0).is_err());
        assert_eq!(total_withheld(&records), (1..=45u128).sum());
    }

    #[test]
    fn test_withdraw_instruction_names_every_source() {
        let mint = Pubkey::new_unique();
        let destination = Pubkey::new_unique();
        let authority = Pubkey::new_unique();
        let sources = vec![record(5), record(7)];
        let ix = build_withdraw_instruction(&mint, &destination, &authority, &sources).unwrap();

        assert_eq!(ix.program_id, spl_token_2022::id());
        let keys: Vec<Pubkey> = ix.accounts.iter().map(|m| m.pubkey).collect();
        assert_eq!(&keys[..3], &[mint, destination, authority]);
        assert_eq!(&keys[3..], &[sources[0].address, sources[1].address]);
        assert!(ix.accounts[2].is_signer);

        assert!(build_withdraw_instruction(&mint, &destination, &authority, &[]).is_err());
    }
}
