//! End-to-end flows against the in-process ledger
//!
//! - mint creation with every fixed extension plus metadata
//! - mint, fee-bearing transfer and withheld accounting
//! - withheld scan and batched withdrawal
//! - transfer hook account resolution

use solana_sdk::{
    native_token::LAMPORTS_PER_SOL,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use spl_token_2022::extension::transfer_fee::instruction::transfer_checked_with_fee;
use token_forge::extensions::tlv::{MintAccount, TokenAccount};
use token_forge::extensions::{
    Extension, MetadataPointerParams, MintConfiguration, TokenMetadata, TransferFeeParams,
    TransferHookParams,
};
use token_forge::ledger::{InMemoryLedger, Ledger};
use token_forge::orchestrator::{MintOrchestrator, WithdrawOutcome};
use token_forge::tx_builder::{ForgeError, Stage, StepKind};
use token_forge::wallet::Wallet;

fn orchestrator() -> MintOrchestrator<InMemoryLedger> {
    let ledger = InMemoryLedger::new();
    let payer = Keypair::new();
    ledger.airdrop(&payer.pubkey(), 100 * LAMPORTS_PER_SOL);
    MintOrchestrator::new(ledger, Wallet::from_keypair(payer))
}

fn fee_extension(authority: Pubkey, bps: u16, max: u64) -> Extension {
    Extension::TransferFeeConfig(TransferFeeParams {
        fee_basis_points: bps,
        maximum_fee: max,
        transfer_fee_config_authority: Some(authority),
        withdraw_withheld_authority: Some(authority),
    })
}

async fn token_account(orch: &MintOrchestrator<InMemoryLedger>, address: &Pubkey) -> TokenAccount {
    let data = orch.ledger().account_data(address).await.unwrap();
    TokenAccount::unpack(&data).unwrap()
}

/// Fee mint (50 bps, max 5000) with 1e9 units in A's account
async fn funded_fee_mint(
    orch: &MintOrchestrator<InMemoryLedger>,
) -> (Pubkey, Keypair, Pubkey) {
    let mint = Keypair::new();
    let config = MintConfiguration::new(mint.pubkey(), 9, orch.payer())
        .with_extension(fee_extension(orch.payer(), 50, 5_000))
        .unwrap();
    orch.create_mint(&config, &mint).await.unwrap();

    let a = Keypair::new();
    let a_account = orch
        .ensure_token_account(&mint.pubkey(), &a.pubkey())
        .await
        .unwrap();
    orch.mint_to(&mint.pubkey(), &a_account, 1_000_000_000)
        .await
        .unwrap();
    (mint.pubkey(), a, a_account)
}

#[tokio::test]
async fn test_fee_transfer_end_to_end() {
    let orch = orchestrator();
    let (mint, a, a_account) = funded_fee_mint(&orch).await;

    let b = Pubkey::new_unique();
    let b_account = orch.ensure_token_account(&mint, &b).await.unwrap();

    let quote = orch.quote_fee(&mint, 1_000).await.unwrap();
    assert_eq!(quote.fee, 5);

    let receipt = orch
        .transfer_with_fee(&mint, &a, &b_account, 1_000, Some(5))
        .await
        .unwrap();
    assert_eq!(receipt.quote.fee, 5);
    assert_eq!(receipt.source, a_account);

    let b_state = token_account(&orch, &b_account).await;
    assert_eq!(b_state.base.amount, 995);
    assert_eq!(b_state.withheld_amount().unwrap(), Some(5));

    let a_state = token_account(&orch, &a_account).await;
    assert_eq!(a_state.base.amount, 1_000_000_000 - 1_000);
    assert_eq!(a_state.withheld_amount().unwrap(), Some(0));

    let info = orch.inspect_mint(&mint).await.unwrap();
    assert_eq!(info.supply, 1_000_000_000);
    let fee = info.transfer_fee.unwrap();
    assert_eq!(fee.newer_transfer_fee.transfer_fee_basis_points, 50);
    assert_eq!(fee.newer_transfer_fee.maximum_fee, 5_000);
}

#[tokio::test]
async fn test_fee_is_capped() {
    let orch = orchestrator();
    let (mint, a, _) = funded_fee_mint(&orch).await;
    let b_account = orch
        .ensure_token_account(&mint, &Pubkey::new_unique())
        .await
        .unwrap();

    // 50 bps of 10_000_000 is 50_000, above the 5_000 cap
    let receipt = orch
        .transfer_with_fee(&mint, &a, &b_account, 10_000_000, None)
        .await
        .unwrap();
    assert_eq!(receipt.quote.fee, 5_000);
    let b_state = token_account(&orch, &b_account).await;
    assert_eq!(b_state.base.amount, 10_000_000 - 5_000);
    assert_eq!(b_state.withheld_amount().unwrap(), Some(5_000));
}

#[tokio::test]
async fn test_fee_rounds_down_end_to_end() {
    let orch = orchestrator();
    let (mint, a, a_account) = funded_fee_mint(&orch).await;
    let b_account = orch
        .ensure_token_account(&mint, &Pubkey::new_unique())
        .await
        .unwrap();

    // 1999 * 50 / 10_000 = 9.995
    let quote = orch.quote_fee(&mint, 1_999).await.unwrap();
    assert_eq!(quote.fee, 9);

    let receipt = orch
        .transfer_with_fee(&mint, &a, &b_account, 1_999, Some(quote.fee))
        .await
        .unwrap();
    assert_eq!(receipt.quote.fee, 9);

    let b_state = token_account(&orch, &b_account).await;
    assert_eq!(b_state.base.amount, 1_990);
    assert_eq!(b_state.withheld_amount().unwrap(), Some(9));
    assert_eq!(
        token_account(&orch, &a_account).await.base.amount,
        1_000_000_000 - 1_999
    );

    // The rounded-up value is not what the ledger computes
    let instruction = transfer_checked_with_fee(
        &spl_token_2022::id(),
        &a_account,
        &mint,
        &b_account,
        &a.pubkey(),
        &[],
        1_999,
        9,
        10,
    )
    .unwrap();
    let payer = orch.payer_keypair();
    let rejection = orch
        .ledger()
        .submit_transaction(&[instruction], &payer.pubkey(), &[payer, &a])
        .await
        .unwrap_err();
    assert!(matches!(
        ForgeError::from_transfer_rejection(rejection, 10),
        ForgeError::FeeMismatch {
            stage: Stage::Submission,
            supplied: 10,
            ..
        }
    ));
}

#[tokio::test]
async fn test_full_extension_mint_creation() {
    let orch = orchestrator();
    let payer = orch.payer();
    let hook_program = Pubkey::new_unique();
    orch.ledger().deploy_program(&hook_program);

    let mint = Keypair::new();
    let metadata = TokenMetadata::new("Forge Token", "FRG", "https://example.com/frg.json")
        .with_field("site", "old")
        .with_field("team", "core")
        .with_field("site", "new");
    let config = MintConfiguration::new(mint.pubkey(), 6, payer)
        .with_extension(Extension::TokenMetadata(metadata))
        .unwrap()
        .with_extension(Extension::TransferHook(TransferHookParams {
            authority: Some(payer),
            program_id: Some(hook_program),
        }))
        .unwrap()
        .with_extension(fee_extension(payer, 100, 1_000_000))
        .unwrap()
        .with_extension(Extension::MetadataPointer(MetadataPointerParams {
            authority: Some(payer),
            metadata_address: Some(mint.pubkey()),
        }))
        .unwrap();

    let created = orch.create_mint(&config, &mint).await.unwrap();
    assert_eq!(created.layout.allocation_size, 414);
    assert_eq!(
        created.steps,
        vec![
            StepKind::CreateAccount,
            StepKind::InitializeMetadataPointer,
            StepKind::InitializeTransferFeeConfig,
            StepKind::InitializeTransferHook,
            StepKind::InitializeMint,
            StepKind::InitializeTokenMetadata,
            StepKind::UpdateMetadataField,
            StepKind::UpdateMetadataField,
        ]
    );

    // The metadata writes grew the account to exactly the funded size
    let stored = orch.ledger().account(&mint.pubkey()).unwrap();
    assert_eq!(stored.data.len(), created.layout.account_size);
    assert_eq!(stored.lamports, created.layout.minimum_funding);

    let info = orch.inspect_mint(&mint.pubkey()).await.unwrap();
    assert_eq!(info.decimals, 6);
    assert_eq!(info.mint_authority, Some(payer));
    assert_eq!(
        info.metadata_pointer.unwrap().address,
        Some(mint.pubkey())
    );
    assert_eq!(info.transfer_hook.unwrap().address, Some(hook_program));
    let metadata = info.metadata.unwrap();
    assert_eq!(metadata.name, "Forge Token");
    assert_eq!(metadata.symbol, "FRG");
    assert_eq!(metadata.update_authority, Some(payer));
    assert_eq!(
        metadata.additional_metadata,
        vec![
            ("site".to_string(), "new".to_string()),
            ("team".to_string(), "core".to_string()),
        ]
    );

    // The token program's own decoder accepts the mint
    let data = orch.ledger().account_data(&mint.pubkey()).await.unwrap();
    use spl_token_2022::extension::{BaseStateWithExtensions, StateWithExtensions};
    let state = StateWithExtensions::<spl_token_2022::state::Mint>::unpack(&data).unwrap();
    assert_eq!(state.base.decimals, 6);
    assert_eq!(state.get_extension_types().unwrap().len(), 4);
}

#[tokio::test]
async fn test_withheld_scan_and_batched_withdrawal() {
    let orch = orchestrator().with_max_accounts_per_tx(2);
    let (mint, a, a_account) = funded_fee_mint(&orch).await;

    let mut destinations = Vec::new();
    for _ in 0..3 {
        let account = orch
            .ensure_token_account(&mint, &Pubkey::new_unique())
            .await
            .unwrap();
        orch.transfer_with_fee(&mint, &a, &account, 2_000, None)
            .await
            .unwrap();
        destinations.push(account);
    }
    // Holds a balance but never received a fee
    let idle = orch
        .ensure_token_account(&mint, &Pubkey::new_unique())
        .await
        .unwrap();

    let records = orch.find_withdrawable_accounts(&mint).await.unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.withheld_amount == 10));
    assert!(records.iter().all(|r| destinations.contains(&r.address)));
    assert!(!records.iter().any(|r| r.address == idle || r.address == a_account));

    let before = token_account(&orch, &a_account).await.base.amount;
    match orch.withdraw_withheld(&mint, &a_account).await.unwrap() {
        WithdrawOutcome::Withdrawn {
            signatures,
            accounts,
            total,
        } => {
            assert_eq!(signatures.len(), 2);
            assert_eq!(accounts, 3);
            assert_eq!(total, 30);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(token_account(&orch, &a_account).await.base.amount, before + 30);
    for account in &destinations {
        let state = token_account(&orch, account).await;
        assert_eq!(state.withheld_amount().unwrap(), Some(0));
        assert_eq!(state.base.amount, 1_990);
    }

    assert_eq!(
        orch.withdraw_withheld(&mint, &a_account).await.unwrap(),
        WithdrawOutcome::NothingToWithdraw
    );
}

#[tokio::test]
async fn test_transfer_through_hook() {
    let orch = orchestrator();
    let payer = orch.payer();
    let hook_program = Pubkey::new_unique();
    orch.ledger().deploy_program(&hook_program);

    let mint = Keypair::new();
    let config = MintConfiguration::new(mint.pubkey(), 9, payer)
        .with_extension(fee_extension(payer, 50, 5_000))
        .unwrap()
        .with_extension(Extension::TransferHook(TransferHookParams {
            authority: Some(payer),
            program_id: Some(hook_program),
        }))
        .unwrap();
    orch.create_mint(&config, &mint).await.unwrap();
    let mint = mint.pubkey();

    let a = Keypair::new();
    let a_account = orch.ensure_token_account(&mint, &a.pubkey()).await.unwrap();
    orch.mint_to(&mint, &a_account, 10_000).await.unwrap();
    let b_account = orch
        .ensure_token_account(&mint, &Pubkey::new_unique())
        .await
        .unwrap();

    // The hook's extra-account list does not exist yet
    let err = orch
        .transfer_with_fee(&mint, &a, &b_account, 1_000, None)
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Stage::Sequencing);
    assert!(matches!(err, ForgeError::InstructionBuild { .. }));

    orch.initialize_hook_accounts(&mint).await.unwrap();
    orch.transfer_with_fee(&mint, &a, &b_account, 1_000, None)
        .await
        .unwrap();
    let b_state = token_account(&orch, &b_account).await;
    assert_eq!(b_state.base.amount, 995);
    assert_eq!(b_state.withheld_amount().unwrap(), Some(5));
}

#[tokio::test]
async fn test_metadata_only_mint() {
    let orch = orchestrator();
    let mint = Keypair::new();
    let config = MintConfiguration::new(mint.pubkey(), 0, orch.payer())
        .with_extension(Extension::MetadataPointer(MetadataPointerParams {
            authority: None,
            metadata_address: Some(mint.pubkey()),
        }))
        .unwrap()
        .with_extension(Extension::TokenMetadata(TokenMetadata::new("A", "B", "C")))
        .unwrap();
    let created = orch.create_mint(&config, &mint).await.unwrap();

    let data = orch.ledger().account_data(&mint.pubkey()).await.unwrap();
    assert_eq!(data.len(), created.layout.account_size);
    let decoded = MintAccount::unpack(&data).unwrap();
    let metadata = decoded.token_metadata().unwrap().unwrap();
    // Update authority falls back to the mint authority
    assert_eq!(metadata.update_authority, Some(orch.payer()));
    assert_eq!(metadata.uri, "C");
}
