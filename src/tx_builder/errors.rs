//! Error types for the mint orchestration core
//!
//! Every failure carries the [`Stage`] it happened at. Layout and sequencing
//! errors are raised locally before any network call; submission errors are
//! surfaced verbatim from the ledger and never retried here.

use crate::extensions::ExtensionKind;
use crate::ledger::LedgerError;
use solana_sdk::pubkey::Pubkey;
use spl_token_2022::error::TokenError;
use std::fmt;
use thiserror::Error;

/// Pipeline stage an error was raised at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Layout,
    Sequencing,
    FeeCheck,
    Submission,
    Scan,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Layout => "layout",
            Stage::Sequencing => "sequencing",
            Stage::FeeCheck => "fee check",
            Stage::Submission => "submission",
            Stage::Scan => "scan",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for all orchestration operations
#[derive(Error, Debug)]
pub enum ForgeError {
    /// Computed account size exceeds what the ledger can hold
    #[error("[layout] account size {size} exceeds limit {limit}: {what}")]
    LayoutTooLarge {
        size: usize,
        limit: usize,
        what: &'static str,
    },

    /// Requested extension set is rejected by the static compatibility table
    #[error("[sequencing] unsupported extension combination: {reason}")]
    UnsupportedExtensionCombination { reason: String },

    /// The same extension kind was requested twice
    #[error("[sequencing] extension {0} requested more than once")]
    DuplicateExtension(ExtensionKind),

    /// Caller-supplied parameters are out of range or inconsistent
    #[error("[{stage}] invalid configuration: {reason}")]
    InvalidConfiguration { stage: Stage, reason: String },

    /// An SPL instruction builder refused its arguments
    #[error("[{stage}] instruction build error ({instruction}): {reason}")]
    InstructionBuild {
        stage: Stage,
        instruction: &'static str,
        reason: String,
    },

    /// The mint carries no transfer fee extension
    #[error("[fee check] transfer fee config not found on mint {mint}")]
    FeeConfigNotFound { mint: Pubkey },

    /// Supplied fee disagrees with the fee the token program computes.
    /// `expected` is unknown when the ledger reported the mismatch.
    #[error(
        "[{stage}] fee mismatch: expected {}, supplied {supplied}",
        .expected.map_or_else(|| "unknown".to_string(), |fee| fee.to_string())
    )]
    FeeMismatch {
        stage: Stage,
        expected: Option<u64>,
        supplied: u64,
    },

    /// Submission did not confirm within the configured window
    #[error("[submission] transaction not confirmed within {timeout_secs}s")]
    SubmissionTimedOut { timeout_secs: u64 },

    /// Ledger reported a failure for the submitted transaction
    #[error("[submission] transaction rejected: {message}")]
    SubmissionRejected {
        message: String,
        custom_code: Option<u32>,
    },

    /// Queried account or mint does not exist
    #[error("[{stage}] account not found: {address}")]
    NotFound { stage: Stage, address: Pubkey },

    /// Account data could not be decoded
    #[error("[{stage}] failed to decode {address}: {reason}")]
    Decode {
        stage: Stage,
        address: Pubkey,
        reason: String,
    },

    /// Transport-level failure talking to the ledger
    #[error("[{stage}] ledger error: {message}")]
    Ledger { stage: Stage, message: String },
}

impl ForgeError {
    /// Stage the error was raised at
    pub fn stage(&self) -> Stage {
        match self {
            Self::LayoutTooLarge { .. } => Stage::Layout,
            Self::UnsupportedExtensionCombination { .. } => Stage::Sequencing,
            Self::DuplicateExtension(_) => Stage::Sequencing,
            Self::InvalidConfiguration { stage, .. } => *stage,
            Self::InstructionBuild { stage, .. } => *stage,
            Self::FeeConfigNotFound { .. } => Stage::FeeCheck,
            Self::FeeMismatch { stage, .. } => *stage,
            Self::SubmissionTimedOut { .. } => Stage::Submission,
            Self::SubmissionRejected { .. } => Stage::Submission,
            Self::NotFound { stage, .. } => *stage,
            Self::Decode { stage, .. } => *stage,
            Self::Ledger { stage, .. } => *stage,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::LayoutTooLarge { .. } => "layout_too_large",
            Self::UnsupportedExtensionCombination { .. } => "unsupported_combination",
            Self::DuplicateExtension(_) => "duplicate_extension",
            Self::InvalidConfiguration { .. } => "config",
            Self::InstructionBuild { .. } => "instruction",
            Self::FeeConfigNotFound { .. } => "fee_config_not_found",
            Self::FeeMismatch { .. } => "fee_mismatch",
            Self::SubmissionTimedOut { .. } => "timeout",
            Self::SubmissionRejected { .. } => "rejected",
            Self::NotFound { .. } => "not_found",
            Self::Decode { .. } => "decode",
            Self::Ledger { .. } => "ledger",
        }
    }

    /// True when the failure happened before anything reached the ledger
    pub fn is_local(&self) -> bool {
        matches!(self.stage(), Stage::Layout | Stage::Sequencing)
            || matches!(self, Self::FeeConfigNotFound { .. })
            || matches!(
                self,
                Self::FeeMismatch {
                    stage: Stage::FeeCheck,
                    ..
                }
            )
    }
}

// Convenience constructors for common error scenarios
impl ForgeError {
    pub fn invalid_config(stage: Stage, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            stage,
            reason: reason.into(),
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::UnsupportedExtensionCombination {
            reason: reason.into(),
        }
    }

    pub fn instruction_failed(
        stage: Stage,
        instruction: &'static str,
        reason: impl fmt::Display,
    ) -> Self {
        Self::InstructionBuild {
            stage,
            instruction,
            reason: reason.to_string(),
        }
    }

    pub fn decode(stage: Stage, address: Pubkey, reason: impl fmt::Display) -> Self {
        Self::Decode {
            stage,
            address,
            reason: reason.to_string(),
        }
    }

    /// Map a ledger capability error into the taxonomy, tagged with the
    /// stage the call was made from.
    pub fn from_ledger(stage: Stage, err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound { address } => Self::NotFound { stage, address },
            LedgerError::TimedOut { timeout_secs } => Self::SubmissionTimedOut { timeout_secs },
            LedgerError::Rejected {
                message,
                custom_code,
            } => Self::SubmissionRejected {
                message,
                custom_code,
            },
            LedgerError::Transport(message) => Self::Ledger { stage, message },
        }
    }

    /// Map the rejection of a fee-bearing transfer. The token program's own
    /// fee mismatch code becomes [`ForgeError::FeeMismatch`].
    pub fn from_transfer_rejection(err: LedgerError, supplied_fee: u64) -> Self {
        match err {
            LedgerError::Rejected {
                custom_code: Some(code),
                ..
            } if code == fee_mismatch_code() => Self::FeeMismatch {
                stage: Stage::Submission,
                expected: None,
                supplied: supplied_fee,
            },
            other => Self::from_ledger(Stage::Submission, other),
        }
    }
}

/// Custom program error code the token program reports for a fee mismatch
pub fn fee_mismatch_code() -> u32 {
    TokenError::FeeMismatch as u32
}
