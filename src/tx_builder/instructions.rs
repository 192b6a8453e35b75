//! Instruction sequencing for mint creation
//!
//! The token program only accepts extension initializers while the mint is
//! still uninitialized, and the metadata content write reads the pointer
//! and the mint authority. A creation plan therefore always has the shape:
//!
//! 1. create the raw account (allocation size, full funding)
//! 2. metadata pointer
//! 3. transfer fee config
//! 4. transfer hook
//! 5. non-transferable
//! 6. initialize mint
//! 7. metadata content
//! 8. additional metadata fields
//!
//! Extensions may be supplied in any order; [`ExtensionSet`] iterates in
//! dependency order and [`sanity_check_creation_order`] re-verifies the
//! result before it is handed to the submitter.
//!
//! [`ExtensionSet`]: crate::extensions::ExtensionSet

use crate::extensions::{Extension, ExtensionKind, MintConfiguration};
use crate::tx_builder::errors::{ForgeError, Stage};
use crate::tx_builder::layout::{fixed_mint_len, MintLayout};
use serde::Serialize;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, system_instruction};
use spl_token_2022::extension::{metadata_pointer, transfer_fee, transfer_hook};
use spl_token_metadata_interface::state::Field;

/// Role of one instruction in a creation plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StepKind {
    CreateAccount,
    InitializeMetadataPointer,
    InitializeTransferFeeConfig,
    InitializeTransferHook,
    InitializeNonTransferable,
    InitializeMint,
    InitializeTokenMetadata,
    UpdateMetadataField,
}

impl StepKind {
    /// Structural initializers that must land before the mint is initialized
    pub fn is_extension_init(&self) -> bool {
        matches!(
            self,
            StepKind::InitializeMetadataPointer
                | StepKind::InitializeTransferFeeConfig
                | StepKind::InitializeTransferHook
                | StepKind::InitializeNonTransferable
        )
    }

    pub fn is_metadata_write(&self) -> bool {
        matches!(
            self,
            StepKind::InitializeTokenMetadata | StepKind::UpdateMetadataField
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::CreateAccount => "create_account",
            StepKind::InitializeMetadataPointer => "initialize_metadata_pointer",
            StepKind::InitializeTransferFeeConfig => "initialize_transfer_fee_config",
            StepKind::InitializeTransferHook => "initialize_transfer_hook",
            StepKind::InitializeNonTransferable => "initialize_non_transferable",
            StepKind::InitializeMint => "initialize_mint",
            StepKind::InitializeTokenMetadata => "initialize_token_metadata",
            StepKind::UpdateMetadataField => "update_metadata_field",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedInstruction {
    pub step: StepKind,
    pub instruction: Instruction,
}

/// Ordered creation instructions plus the keys that must sign them
#[derive(Debug, Clone)]
pub struct MintCreationPlan {
    pub steps: Vec<PlannedInstruction>,
    /// Payer first, then every other key marked as signer, deduplicated
    pub signers: Vec<Pubkey>,
}

impl MintCreationPlan {
    fn new(payer: Pubkey, steps: Vec<PlannedInstruction>) -> Self {
        let mut signers = vec![payer];
        for meta in steps.iter().flat_map(|s| s.instruction.accounts.iter()) {
            if meta.is_signer && !signers.contains(&meta.pubkey) {
                signers.push(meta.pubkey);
            }
        }
        Self { steps, signers }
    }

    pub fn instructions(&self) -> Vec<Instruction> {
        self.steps.iter().map(|s| s.instruction.clone()).collect()
    }

    pub fn step_kinds(&self) -> Vec<StepKind> {
        self.steps.iter().map(|s| s.step).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Extension pairs the token program refuses to combine on one mint
const INCOMPATIBLE: &[(ExtensionKind, ExtensionKind)] = &[
    (ExtensionKind::NonTransferable, ExtensionKind::TransferFeeConfig),
    (ExtensionKind::NonTransferable, ExtensionKind::TransferHook),
];

/// Extensions that cannot be initialized without another one
const REQUIRES: &[(ExtensionKind, ExtensionKind)] =
    &[(ExtensionKind::TokenMetadata, ExtensionKind::MetadataPointer)];

/// Check the requested set against the static compatibility table
pub fn check_compatibility(config: &MintConfiguration) -> Result<(), ForgeError> {
    let extensions = config.extensions();

    for (a, b) in INCOMPATIBLE {
        if extensions.contains(*a) && extensions.contains(*b) {
            return Err(ForgeError::unsupported(format!("{a} cannot be combined with {b}")));
        }
    }
    for (dependent, required) in REQUIRES {
        if extensions.contains(*dependent) && !extensions.contains(*required) {
            return Err(ForgeError::unsupported(format!("{dependent} requires {required}")));
        }
    }

    if let Some(pointer) = extensions.metadata_pointer() {
        if pointer.authority.is_none() && pointer.metadata_address.is_none() {
            return Err(ForgeError::invalid_config(
                Stage::Sequencing,
                "metadata pointer needs an authority or an address",
            ));
        }
        if extensions.contains(ExtensionKind::TokenMetadata)
            && pointer.metadata_address != Some(config.mint)
        {
            return Err(ForgeError::unsupported(
                "embedded token metadata requires the metadata pointer to target the mint",
            ));
        }
    }

    if let Some(hook) = extensions.transfer_hook() {
        if hook.authority.is_none() && hook.program_id.is_none() {
            return Err(ForgeError::invalid_config(
                Stage::Sequencing,
                "transfer hook needs an authority or a program id",
            ));
        }
    }

    Ok(())
}

fn build_err(instruction: &'static str) -> impl Fn(solana_sdk::program_error::ProgramError) -> ForgeError {
    move |e| ForgeError::instruction_failed(Stage::Sequencing, instruction, e)
}

/// Build the ordered creation sequence for `config`.
///
/// `layout` must have been computed for the same extension set; its
/// allocation size is what the mint initializer will check the account
/// length against.
pub fn build_mint_creation_sequence(
    config: &MintConfiguration,
    payer: &Pubkey,
    layout: &MintLayout,
) -> Result<MintCreationPlan, ForgeError> {
    check_compatibility(config)?;

    let expected = fixed_mint_len(config.extensions().kinds());
    if layout.allocation_size != expected {
        return Err(ForgeError::invalid_config(
            Stage::Sequencing,
            format!(
                "layout allocates {} bytes, extension set needs {}",
                layout.allocation_size, expected
            ),
        ));
    }

    let program_id = spl_token_2022::id();
    let mint = &config.mint;
    let mut steps = Vec::with_capacity(config.extensions().len() + 3);

    steps.push(PlannedInstruction {
        step: StepKind::CreateAccount,
        instruction: system_instruction::create_account(
            payer,
            mint,
            layout.minimum_funding,
            layout.allocation_size as u64,
            &program_id,
        ),
    });

    // Structural extensions, already in dependency order
    for extension in config.extensions().iter() {
        let planned = match extension {
            Extension::MetadataPointer(params) => PlannedInstruction {
                step: StepKind::InitializeMetadataPointer,
                instruction: metadata_pointer::instruction::initialize(
                    &program_id,
                    mint,
                    params.authority,
                    params.metadata_address,
                )
                .map_err(build_err("initialize_metadata_pointer"))?,
            },
            Extension::TransferFeeConfig(params) => PlannedInstruction {
                step: StepKind::InitializeTransferFeeConfig,
                instruction: transfer_fee::instruction::initialize_transfer_fee_config(
                    &program_id,
                    mint,
                    params.transfer_fee_config_authority.as_ref(),
                    params.withdraw_withheld_authority.as_ref(),
                    params.fee_basis_points,
                    params.maximum_fee,
                )
                .map_err(build_err("initialize_transfer_fee_config"))?,
            },
            Extension::TransferHook(params) => PlannedInstruction {
                step: StepKind::InitializeTransferHook,
                instruction: transfer_hook::instruction::initialize(
                    &program_id,
                    mint,
                    params.authority,
                    params.program_id,
                )
                .map_err(build_err("initialize_transfer_hook"))?,
            },
            Extension::NonTransferable => PlannedInstruction {
                step: StepKind::InitializeNonTransferable,
                instruction: spl_token_2022::instruction::initialize_non_transferable_mint(
                    &program_id,
                    mint,
                )
                .map_err(build_err("initialize_non_transferable_mint"))?,
            },
            Extension::TokenMetadata(_) => continue,
        };
        steps.push(planned);
    }

    steps.push(PlannedInstruction {
        step: StepKind::InitializeMint,
        instruction: spl_token_2022::instruction::initialize_mint(
            &program_id,
            mint,
            &config.mint_authority,
            config.freeze_authority.as_ref(),
            config.decimals,
        )
        .map_err(build_err("initialize_mint"))?,
    });

    if let Some(metadata) = config.extensions().token_metadata() {
        let update_authority = metadata.update_authority.unwrap_or(config.mint_authority);
        steps.push(PlannedInstruction {
            step: StepKind::InitializeTokenMetadata,
            instruction: spl_token_metadata_interface::instruction::initialize(
                &program_id,
                mint,
                &update_authority,
                mint,
                &config.mint_authority,
                metadata.name.clone(),
                metadata.symbol.clone(),
                metadata.uri.clone(),
            ),
        });
        // Repeated keys are collapsed up front: the final content is the
        // same and the account never grows past its funded size.
        for (key, value) in metadata.effective_fields() {
            steps.push(PlannedInstruction {
                step: StepKind::UpdateMetadataField,
                instruction: spl_token_metadata_interface::instruction::update_field(
                    &program_id,
                    mint,
                    &update_authority,
                    Field::Key(key),
                    value,
                ),
            });
        }
    }

    sanity_check_creation_order(&steps)?;
    Ok(MintCreationPlan::new(*payer, steps))
}

/// Verify a creation sequence obeys the initialization order.
///
/// Returns `InvalidConfiguration` at the sequencing stage naming the first
/// misplaced step.
pub fn sanity_check_creation_order(steps: &[PlannedInstruction]) -> Result<(), ForgeError> {
    let fail = |reason: String| Err(ForgeError::invalid_config(Stage::Sequencing, reason));

    match steps.first() {
        Some(first) if first.step == StepKind::CreateAccount => {}
        Some(first) => return fail(format!("sequence starts with {}", first.step.as_str())),
        None => return fail("sequence is empty".to_string()),
    }

    let mut mint_initialized = false;
    let mut pointer_seen = false;
    let mut metadata_initialized = false;
    for (idx, planned) in steps.iter().enumerate().skip(1) {
        let step = planned.step;
        match step {
            StepKind::CreateAccount => {
                return fail(format!("second account creation at position {idx}"))
            }
            s if s.is_extension_init() => {
                if mint_initialized {
                    return fail(format!(
                        "{} at position {idx} follows mint initialization",
                        s.as_str()
                    ));
                }
                if s == StepKind::InitializeMetadataPointer {
                    pointer_seen = true;
                }
            }
            StepKind::InitializeMint => {
                if mint_initialized {
                    return fail(format!("second mint initialization at position {idx}"));
                }
                mint_initialized = true;
            }
            StepKind::InitializeTokenMetadata => {
                if !mint_initialized || !pointer_seen {
                    return fail(format!(
                        "metadata content at position {idx} precedes mint or pointer initialization"
                    ));
                }
                metadata_initialized = true;
            }
            StepKind::UpdateMetadataField => {
                if !metadata_initialized {
                    return fail(format!(
                        "metadata field update at position {idx} precedes metadata content"
                    ));
                }
            }
            _ => {}
        }
    }

    if !mint_initialized {
        return fail("sequence never initializes the mint".to_string());
    }
    Ok(())
}

/// Idempotent creation of `owner`'s associated token account for `mint`
pub fn create_token_account_instruction(
    payer: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
) -> (Pubkey, Instruction) {
    let program_id = spl_token_2022::id();
    let address = spl_associated_token_account::get_associated_token_address_with_program_id(
        owner,
        mint,
        &program_id,
    );
    let instruction =
        spl_associated_token_account::instruction::create_associated_token_account_idempotent(
            payer,
            owner,
            mint,
            &program_id,
        );
    (address, instruction)
}

pub fn mint_to_instruction(
    mint: &Pubkey,
    destination: &Pubkey,
    mint_authority: &Pubkey,
    amount: u64,
) -> Result<Instruction, ForgeError> {
    spl_token_2022::instruction::mint_to(
        &spl_token_2022::id(),
        mint,
        destination,
        mint_authority,
        &[],
        amount,
    )
    .map_err(|e| ForgeError::instruction_failed(Stage::Submission, "mint_to", e))
}
