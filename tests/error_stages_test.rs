//! Failure reporting: every error names the stage it came from, and
//! locally detected problems never reach the ledger.

use solana_sdk::{
    native_token::LAMPORTS_PER_SOL,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use spl_token_2022::extension::transfer_fee::instruction::transfer_checked_with_fee;
use token_forge::extensions::{
    Extension, MetadataPointerParams, MintConfiguration, TokenMetadata, TransferFeeParams,
};
use token_forge::ledger::{InMemoryLedger, Ledger};
use token_forge::orchestrator::MintOrchestrator;
use token_forge::tx_builder::{ForgeError, Stage};
use token_forge::wallet::Wallet;

fn orchestrator() -> MintOrchestrator<InMemoryLedger> {
    let ledger = InMemoryLedger::new();
    let payer = Keypair::new();
    ledger.airdrop(&payer.pubkey(), 100 * LAMPORTS_PER_SOL);
    MintOrchestrator::new(ledger, Wallet::from_keypair(payer))
}

fn fee_params(authority: Pubkey) -> Extension {
    Extension::TransferFeeConfig(TransferFeeParams {
        fee_basis_points: 50,
        maximum_fee: 5_000,
        transfer_fee_config_authority: Some(authority),
        withdraw_withheld_authority: Some(authority),
    })
}

async fn fee_mint_with_balance(
    orch: &MintOrchestrator<InMemoryLedger>,
) -> (Pubkey, Keypair, Pubkey, Pubkey) {
    let mint = Keypair::new();
    let config = MintConfiguration::new(mint.pubkey(), 9, orch.payer())
        .with_extension(fee_params(orch.payer()))
        .unwrap();
    orch.create_mint(&config, &mint).await.unwrap();
    let mint = mint.pubkey();

    let owner = Keypair::new();
    let source = orch
        .ensure_token_account(&mint, &owner.pubkey())
        .await
        .unwrap();
    orch.mint_to(&mint, &source, 1_000_000).await.unwrap();
    let destination = orch
        .ensure_token_account(&mint, &Pubkey::new_unique())
        .await
        .unwrap();
    (mint, owner, source, destination)
}

#[tokio::test]
async fn test_unconfirmed_submission_times_out() {
    let orch = orchestrator();
    orch.ledger().stall_confirmations(true);

    let mint = Keypair::new();
    let config = MintConfiguration::new(mint.pubkey(), 9, orch.payer())
        .with_extension(fee_params(orch.payer()))
        .unwrap();
    let err = orch.create_mint(&config, &mint).await.unwrap_err();
    assert!(matches!(err, ForgeError::SubmissionTimedOut { .. }));
    assert_eq!(err.stage(), Stage::Submission);
    assert!(!err.is_local());
    assert!(orch.ledger().account(&mint.pubkey()).is_none());
}

#[tokio::test]
async fn test_supplied_fee_mismatch_is_caught_before_submission() {
    let orch = orchestrator();
    let (mint, owner, _, destination) = fee_mint_with_balance(&orch).await;
    let submitted = orch.ledger().submission_count();

    let err = orch
        .transfer_with_fee(&mint, &owner, &destination, 1_000, Some(6))
        .await
        .unwrap_err();
    match err {
        ForgeError::FeeMismatch {
            stage,
            expected,
            supplied,
        } => {
            assert_eq!(stage, Stage::FeeCheck);
            assert_eq!(expected, Some(5));
            assert_eq!(supplied, 6);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(orch.ledger().submission_count(), submitted);
}

#[tokio::test]
async fn test_ledger_fee_rejection_maps_to_fee_mismatch() {
    let orch = orchestrator();
    let (mint, owner, source, destination) = fee_mint_with_balance(&orch).await;

    let instruction = transfer_checked_with_fee(
        &spl_token_2022::id(),
        &source,
        &mint,
        &destination,
        &owner.pubkey(),
        &[],
        1_000,
        9,
        4,
    )
    .unwrap();
    let payer = orch.payer_keypair();
    let rejection = orch
        .ledger()
        .submit_transaction(&[instruction], &payer.pubkey(), &[payer, &owner])
        .await
        .unwrap_err();

    let err = ForgeError::from_transfer_rejection(rejection, 4);
    assert!(matches!(
        err,
        ForgeError::FeeMismatch {
            stage: Stage::Submission,
            expected: None,
            supplied: 4,
        }
    ));
}

#[tokio::test]
async fn test_incompatible_extensions_never_submit() {
    let orch = orchestrator();
    let mint = Keypair::new();
    let config = MintConfiguration::new(mint.pubkey(), 9, orch.payer())
        .with_extension(Extension::NonTransferable)
        .unwrap()
        .with_extension(fee_params(orch.payer()))
        .unwrap();

    let err = orch.create_mint(&config, &mint).await.unwrap_err();
    assert!(matches!(
        err,
        ForgeError::UnsupportedExtensionCombination { .. }
    ));
    assert_eq!(err.stage(), Stage::Sequencing);
    assert!(err.is_local());
    assert_eq!(orch.ledger().submission_count(), 0);
}

#[tokio::test]
async fn test_metadata_without_pointer_is_refused() {
    let orch = orchestrator();
    let mint = Keypair::new();
    let config = MintConfiguration::new(mint.pubkey(), 9, orch.payer())
        .with_extension(Extension::TokenMetadata(TokenMetadata::new("n", "s", "u")))
        .unwrap();

    let err = orch.create_mint(&config, &mint).await.unwrap_err();
    assert!(matches!(
        err,
        ForgeError::UnsupportedExtensionCombination { .. }
    ));
    assert_eq!(orch.ledger().submission_count(), 0);
}

#[tokio::test]
async fn test_mismatched_mint_keypair_is_refused() {
    let orch = orchestrator();
    let config = MintConfiguration::new(Pubkey::new_unique(), 9, orch.payer())
        .with_extension(Extension::MetadataPointer(MetadataPointerParams {
            authority: Some(orch.payer()),
            metadata_address: None,
        }))
        .unwrap();

    let err = orch
        .create_mint(&config, &Keypair::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::InvalidConfiguration { .. }));
    assert_eq!(orch.ledger().submission_count(), 0);
}

#[tokio::test]
async fn test_foreign_authority_is_refused_locally() {
    let orch = orchestrator();
    let mint = Keypair::new();
    let outsider = Pubkey::new_unique();
    // Metadata initialization needs the mint authority's signature
    let config = MintConfiguration::new(mint.pubkey(), 9, outsider)
        .with_extension(Extension::MetadataPointer(MetadataPointerParams {
            authority: None,
            metadata_address: Some(mint.pubkey()),
        }))
        .unwrap()
        .with_extension(Extension::TokenMetadata(TokenMetadata::new("n", "s", "u")))
        .unwrap();

    let err = orch.create_mint(&config, &mint).await.unwrap_err();
    assert!(matches!(err, ForgeError::InvalidConfiguration { .. }));
    assert!(err.to_string().contains(&outsider.to_string()));
    assert_eq!(orch.ledger().submission_count(), 0);
}

#[tokio::test]
async fn test_quote_on_mint_without_fee() {
    let orch = orchestrator();
    let mint = Keypair::new();
    let config = MintConfiguration::new(mint.pubkey(), 2, orch.payer());
    orch.create_mint(&config, &mint).await.unwrap();

    let err = orch.quote_fee(&mint.pubkey(), 100).await.unwrap_err();
    assert!(matches!(err, ForgeError::FeeConfigNotFound { mint: m } if m == mint.pubkey()));
    assert_eq!(err.stage(), Stage::FeeCheck);
}

#[tokio::test]
async fn test_missing_mint_reports_not_found() {
    let orch = orchestrator();
    let address = Pubkey::new_unique();
    let err = orch.inspect_mint(&address).await.unwrap_err();
    assert!(matches!(
        err,
        ForgeError::NotFound { stage: Stage::Scan, address: a } if a == address
    ));
}

#[tokio::test]
async fn test_rejected_transfer_leaves_balances() {
    let orch = orchestrator();
    let (mint, owner, source, destination) = fee_mint_with_balance(&orch).await;

    let err = orch
        .transfer_with_fee(&mint, &owner, &destination, 2_000_000, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::SubmissionRejected { .. }));
    assert_eq!(err.stage(), Stage::Submission);

    let records = orch.find_withdrawable_accounts(&mint).await.unwrap();
    assert!(records.is_empty());
    let data = orch.ledger().account_data(&source).await.unwrap();
    let account = token_forge::extensions::tlv::TokenAccount::unpack(&data).unwrap();
    assert_eq!(account.base.amount, 1_000_000);
}
