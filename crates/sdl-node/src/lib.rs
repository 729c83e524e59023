// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SCALE-OUT LEDGER (SDL) - NODE
//
// A ledger node that transacts with its peers and anchors block abstracts
// into the main chain. This crate coordinates the node's lifecycle:
// listener, transaction sender, transaction patterns and tracker status.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod application;
pub mod config;
pub mod error;
pub mod net;
pub mod node;
pub mod pattern;
pub mod sender;
pub mod server;
pub mod task;
pub mod tracker;

#[cfg(test)]
mod testutil;

pub use application::{Application, NodeRunState, NodeServices};
pub use config::NodeConfig;
pub use error::NodeError;
pub use node::{GenesisBlock, NodeContext, NodeId, OwnNode};
pub use pattern::{PatternStep, TransactionPattern, UniformRandomPattern};
pub use sender::{OutboundTransaction, TransactionSender, TransactionTransport};
pub use server::ConnectionHandler;
pub use tracker::{NodeRegistry, TrackerClient};
