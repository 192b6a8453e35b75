//! Mint transaction building
//!
//! The pure, ledger-independent half of the orchestrator:
//! - **errors**: stage-tagged error taxonomy
//! - **layout**: account size and rent funding for an extension set
//! - **instructions**: ordered mint creation sequence and signer set
//! - **fee**: transfer fee calculation and pre-submission validation
//! - **withheld**: withheld-fee scan and withdrawal batching
//!
//! Layout and sequencing failures are raised here before anything is sent;
//! the only ledger calls made from this module are the rent quote and the
//! withheld scan query.

pub mod errors;
pub mod fee;
pub mod instructions;
pub mod layout;
pub mod withheld;

pub use errors::{ForgeError, Stage};
pub use fee::{compute_fee, FeeQuote};
pub use instructions::{build_mint_creation_sequence, MintCreationPlan, StepKind};
pub use layout::{compute_layout, MintLayout};
pub use withheld::{find_withdrawable_accounts, WithheldAccountRecord, WithheldScan};
