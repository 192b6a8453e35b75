//! Transfer fee calculation
//!
//! `fee = min(floor(amount * bps / 10_000), maximum_fee)` in integer
//! arithmetic, with the product taken in 128 bits. The schedule in force is
//! the newer one once its epoch has arrived, the older one before that.
//!
//! The ledger recomputes the fee with the same formula and fails the
//! transfer when the supplied value differs. [`program_fee`] is the spl
//! reference computation, which rounds up; a quote that differs from it is
//! logged, not refused.

use crate::extensions::tlv::{MintAccount, TransferFee, TransferFeeState};
use crate::tx_builder::errors::{ForgeError, Stage};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use spl_token_2022::extension::transfer_fee::TransferFee as ProgramTransferFee;
use tracing::warn;

pub const ONE_IN_BASIS_POINTS: u128 = 10_000;

/// Fee computed for one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeQuote {
    pub amount: u64,
    pub fee: u64,
    pub epoch: u64,
    pub schedule: TransferFee,
}

impl FeeQuote {
    /// Amount the destination is credited with; the fee stays withheld there
    pub fn net_amount(&self) -> u64 {
        self.amount.saturating_sub(self.fee)
    }
}

/// Schedule in force at `current_epoch`
pub fn active_fee(state: &TransferFeeState, current_epoch: u64) -> &TransferFee {
    if state.newer_transfer_fee.epoch <= current_epoch {
        &state.newer_transfer_fee
    } else {
        &state.older_transfer_fee
    }
}

/// Floor-rounded, capped fee for one schedule
pub fn fee_for_schedule(fee: &TransferFee, amount: u64) -> u64 {
    if amount == 0 || fee.transfer_fee_basis_points == 0 {
        return 0;
    }
    let raw = (amount as u128) * (fee.transfer_fee_basis_points as u128) / ONE_IN_BASIS_POINTS;
    raw.min(fee.maximum_fee as u128) as u64
}

pub fn compute_fee(state: &TransferFeeState, current_epoch: u64, amount: u64) -> u64 {
    fee_for_schedule(active_fee(state, current_epoch), amount)
}

/// Quote a transfer against a decoded mint
pub fn quote(
    mint_address: &Pubkey,
    mint: &MintAccount,
    current_epoch: u64,
    amount: u64,
) -> Result<FeeQuote, ForgeError> {
    let state = mint
        .transfer_fee_config()
        .map_err(|e| ForgeError::decode(Stage::FeeCheck, *mint_address, e))?
        .ok_or(ForgeError::FeeConfigNotFound {
            mint: *mint_address,
        })?;
    let schedule = *active_fee(&state, current_epoch);
    Ok(FeeQuote {
        amount,
        fee: fee_for_schedule(&schedule, amount),
        epoch: current_epoch,
        schedule,
    })
}

/// The token program's own fee for this schedule
pub fn program_fee(fee: &TransferFee, amount: u64) -> Option<u64> {
    let reference = ProgramTransferFee {
        epoch: fee.epoch.into(),
        maximum_fee: fee.maximum_fee.into(),
        transfer_fee_basis_points: fee.transfer_fee_basis_points.into(),
    };
    reference.calculate_fee(amount)
}

/// Check a quote against a caller-supplied fee. Returns the fee to embed
/// in the transfer.
pub fn verify_quote(quote: &FeeQuote, supplied: Option<u64>) -> Result<u64, ForgeError> {
    if let Some(supplied) = supplied {
        if supplied != quote.fee {
            return Err(ForgeError::FeeMismatch {
                stage: Stage::FeeCheck,
                expected: Some(quote.fee),
                supplied,
            });
        }
    }
    if let Some(reference) = program_fee(&quote.schedule, quote.amount) {
        if reference != quote.fee {
            warn!(
                amount = quote.amount,
                fee = quote.fee,
                reference,
                "spl reference fee differs from the floor-rounded fee"
            );
        }
    }
    Ok(quote.fee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::tlv::{tags, MintState, TlvEntry};
    use proptest::prelude::*;

    fn schedule(bps: u16, max: u64) -> TransferFee {
        TransferFee {
            epoch: 0,
            maximum_fee: max,
            transfer_fee_basis_points: bps,
        }
    }

    fn state(older: TransferFee, newer: TransferFee) -> TransferFeeState {
        TransferFeeState {
            older_transfer_fee: older,
            newer_transfer_fee: newer,
            ..TransferFeeState::default()
        }
    }

    #[test]
    fn test_fee_capped() {
        let fee = schedule(50, 500_000);
        assert_eq!(fee_for_schedule(&fee, 1_000_000_000), 500_000);
    }

    #[test]
    fn test_fee_below_cap() {
        let fee = schedule(50, 500_000);
        assert_eq!(fee_for_schedule(&fee, 1_000), 5);
    }

    #[test]
    fn test_fee_floors() {
        let fee = schedule(50, u64::MAX);
        // 1999 * 50 / 10000 = 9.995
        assert_eq!(fee_for_schedule(&fee, 1_999), 9);
        assert_eq!(fee_for_schedule(&fee, 199), 0);
    }

    #[test]
    fn test_zero_cases() {
        assert_eq!(fee_for_schedule(&schedule(50, 100), 0), 0);
        assert_eq!(fee_for_schedule(&schedule(0, 100), u64::MAX), 0);
    }

    #[test]
    fn test_no_overflow_at_extremes() {
        let fee = schedule(10_000, u64::MAX);
        assert_eq!(fee_for_schedule(&fee, u64::MAX), u64::MAX);
    }

    #[test]
    fn test_active_schedule_selection() {
        let older = TransferFee {
            epoch: 0,
            maximum_fee: 100,
            transfer_fee_basis_points: 10,
        };
        let newer = TransferFee {
            epoch: 10,
            maximum_fee: 1_000,
            transfer_fee_basis_points: 100,
        };
        let fees = state(older, newer);
        assert_eq!(active_fee(&fees, 9), &older);
        assert_eq!(active_fee(&fees, 10), &newer);
        assert_eq!(compute_fee(&fees, 9, 10_000), 10);
        assert_eq!(compute_fee(&fees, 11, 10_000), 100);
    }

    #[test]
    fn test_quote_without_fee_extension() {
        let mint = MintAccount {
            base: MintState {
                is_initialized: true,
                ..MintState::default()
            },
            extensions: Vec::new(),
        };
        let address = Pubkey::new_unique();
        assert!(matches!(
            quote(&address, &mint, 0, 1_000),
            Err(ForgeError::FeeConfigNotFound { mint }) if mint == address
        ));
    }

    #[test]
    fn test_quote_and_verify() {
        let fees = state(schedule(50, 5_000), schedule(50, 5_000));
        let mint = MintAccount {
            base: MintState {
                is_initialized: true,
                ..MintState::default()
            },
            extensions: vec![TlvEntry::new(tags::TRANSFER_FEE_CONFIG, fees.pack())],
        };
        let q = quote(&Pubkey::new_unique(), &mint, 3, 1_000).unwrap();
        assert_eq!(q.fee, 5);
        assert_eq!(q.net_amount(), 995);
        assert_eq!(verify_quote(&q, None).unwrap(), 5);
        assert_eq!(verify_quote(&q, Some(5)).unwrap(), 5);
        assert!(matches!(
            verify_quote(&q, Some(4)),
            Err(ForgeError::FeeMismatch {
                expected: Some(5),
                supplied: 4,
                ..
            })
        ));
    }

    #[test]
    fn test_floor_fee_accepted_where_reference_rounds_up() {
        let fees = state(schedule(50, 5_000), schedule(50, 5_000));
        let q = FeeQuote {
            amount: 1_999,
            fee: compute_fee(&fees, 0, 1_999),
            epoch: 0,
            schedule: fees.newer_transfer_fee,
        };
        assert_eq!(q.fee, 9);
        assert_eq!(program_fee(&q.schedule, q.amount), Some(10));
        assert_eq!(verify_quote(&q, None).unwrap(), 9);
        assert_eq!(verify_quote(&q, Some(9)).unwrap(), 9);
        assert!(matches!(
            verify_quote(&q, Some(10)),
            Err(ForgeError::FeeMismatch {
                stage: Stage::FeeCheck,
                expected: Some(9),
                supplied: 10,
            })
        ));
        assert_eq!(q.net_amount(), 1_990);
    }

    #[test]
    fn test_program_agrees_on_exact_multiples() {
        let fee = schedule(50, 500_000);
        for amount in [0u64, 200, 1_000, 1_000_000_000, 10_000_000_000] {
            assert_eq!(program_fee(&fee, amount), Some(fee_for_schedule(&fee, amount)));
        }
    }

    #[test]
    fn test_net_amount_saturates() {
        let q = FeeQuote {
            amount: 3,
            fee: 7,
            epoch: 0,
            schedule: schedule(50, 5_000),
        };
        assert_eq!(q.net_amount(), 0);
    }

    proptest! {
        #[test]
        fn prop_fee_never_exceeds_cap(amount: u64, bps in 0u16..=10_000, max: u64) {
            let fee = schedule(bps, max);
            prop_assert!(fee_for_schedule(&fee, amount) <= max);
        }

        #[test]
        fn prop_zero_amount_zero_fee(bps in 0u16..=10_000, max: u64) {
            prop_assert_eq!(fee_for_schedule(&schedule(bps, max), 0), 0);
        }

        #[test]
        fn prop_floor_semantics(amount in 0u64..1_000_000_000_000, bps in 0u16..=10_000) {
            let fee = fee_for_schedule(&schedule(bps, u64::MAX), amount);
            let product = amount as u128 * bps as u128;
            prop_assert!(fee as u128 * 10_000 <= product);
            prop_assert!(product < (fee as u128 + 1) * 10_000);
        }
    }
}
