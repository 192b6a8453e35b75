//! Transfer-hook account setup
//!
//! A mint with a transfer hook makes the token program call the hook
//! program on every transfer, passing the extra accounts declared in the
//! hook's validation account. That account lives at a PDA of the hook
//! program and has to be initialized once per mint, after the mint exists.

use sha2::{Digest, Sha256};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};

/// Seed of the validation account PDA
pub const EXTRA_ACCOUNT_METAS_SEED: &[u8] = b"extra-account-metas";

const INITIALIZE_EXTRA_ACCOUNT_META_LIST: &str = "global:initialize_extra_account_meta_list";
const EXECUTE_DISCRIMINATOR_INPUT: &str = "spl-transfer-hook-interface:execute";

fn discriminator(input: &str) -> [u8; 8] {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Instruction discriminator of the hook program's setup entry point
pub fn initialize_discriminator() -> [u8; 8] {
    discriminator(INITIALIZE_EXTRA_ACCOUNT_META_LIST)
}

/// Validation account holding the extra account list for `mint`
pub fn extra_account_metas_address(mint: &Pubkey, hook_program: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[EXTRA_ACCOUNT_METAS_SEED, mint.as_ref()], hook_program).0
}

/// Initialize the validation account for `mint`. The payer funds it.
pub fn initialize_extra_account_meta_list(
    hook_program: &Pubkey,
    payer: &Pubkey,
    mint: &Pubkey,
) -> Instruction {
    let validation = extra_account_metas_address(mint, hook_program);
    Instruction {
        program_id: *hook_program,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(validation, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(spl_token_2022::id(), false),
            AccountMeta::new_readonly(spl_associated_token_account::id(), false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: initialize_discriminator().to_vec(),
    }
}

/// Validation account content declaring no extra accounts: the execute
/// discriminator, a u32 value length, and a u32 entry count of zero.
pub fn empty_extra_account_meta_list() -> Vec<u8> {
    let mut data = discriminator(EXECUTE_DISCRIMINATOR_INPUT).to_vec();
    data.extend_from_slice(&4u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_address_is_per_mint() {
        let program = Pubkey::new_unique();
        let a = extra_account_metas_address(&Pubkey::new_unique(), &program);
        let b = extra_account_metas_address(&Pubkey::new_unique(), &program);
        assert_ne!(a, b);
        assert!(!a.is_on_curve());
    }

    #[test]
    fn test_initialize_instruction_layout() {
        let program = Pubkey::new_unique();
        let payer = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let ix = initialize_extra_account_meta_list(&program, &payer, &mint);

        assert_eq!(ix.program_id, program);
        assert_eq!(ix.data.len(), 8);
        assert_eq!(ix.data, initialize_discriminator().to_vec());
        assert!(ix.accounts[0].is_signer && ix.accounts[0].is_writable);
        assert_eq!(
            ix.accounts[1].pubkey,
            extra_account_metas_address(&mint, &program)
        );
        assert_eq!(ix.accounts[2].pubkey, mint);
    }

    #[test]
    fn test_empty_list_layout() {
        let data = empty_extra_account_meta_list();
        assert_eq!(data.len(), 16);
        assert_eq!(&data[8..12], &4u32.to_le_bytes());
        assert_eq!(&data[12..], &[0, 0, 0, 0]);
    }
}
