//! token-forge - Token-2022 mint orchestration
//!
//! Creates extension-bearing mints (metadata pointer and content, transfer
//! fee, transfer hook, non-transferable), mints supply, performs fee-bearing
//! transfers and withdraws withheld fees.
//!
//! - [`tx_builder`]: layout, instruction sequencing, fee math, withheld scan
//! - [`extensions`]: extension model and the on-ledger TLV encoding
//! - [`ledger`]: the ledger capability, over RPC or in process
//! - [`orchestrator`]: the end-to-end flows

pub mod config;
pub mod extensions;
pub mod hook;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod structured_logging;
pub mod tx_builder;
pub mod wallet;

pub use extensions::{Extension, ExtensionKind, MintConfiguration, TokenMetadata};
pub use ledger::{InMemoryLedger, Ledger, LedgerError, RpcLedger};
pub use orchestrator::{MintOrchestrator, WithdrawOutcome};
pub use tx_builder::{ForgeError, Stage};

// Re-export commonly used types
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
