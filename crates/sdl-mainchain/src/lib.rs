// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SCALE-OUT LEDGER (SDL) - MAIN CHAIN ANCHORING
//
// Block abstracts are anchored into an external BFT chain (Tendermint).
// This crate owns the wire protocol to that chain; everything above it
// sees typed outcomes, never transport errors.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod chain;
pub mod error;
pub mod tendermint;
pub mod types;

pub use chain::{MainChain, TendermintChain};
pub use error::MainChainError;
pub use tendermint::{ClientConfig, TendermintClient};
pub use types::{AnchorHash, CommitOutcome, CommitRequest};
