use crate::tendermint::TendermintClient;
use crate::types::{AnchorHash, CommitOutcome, CommitRequest};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};

/// The main chain a node anchors its block abstracts into.
pub trait MainChain: Send + Sync {
    /// Commit a serialized abstract.
    fn commit_abstract(&self, payload: &[u8]) -> CommitOutcome;

    /// Whether a previously committed abstract is known to the chain.
    fn is_present(&self, hash: &AnchorHash) -> bool;

    /// Release the connection. Calls made afterwards fail without I/O.
    fn stop(&self);

    fn is_stopped(&self) -> bool;
}

/// [`MainChain`] backed by a Tendermint RPC endpoint.
pub struct TendermintChain {
    client: TendermintClient,
    stopped: AtomicBool,
}

impl TendermintChain {
    pub fn new(client: TendermintClient) -> Self {
        Self {
            client,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn client(&self) -> &TendermintClient {
        &self.client
    }
}

impl MainChain for TendermintChain {
    fn commit_abstract(&self, payload: &[u8]) -> CommitOutcome {
        if self.is_stopped() {
            return CommitOutcome::Transport("main chain stopped".to_string());
        }
        match CommitRequest::new(payload) {
            Ok(request) => {
                let outcome = self.client.commit(&request);
                debug!("Commit of {} byte abstract: {}", payload.len(), outcome);
                outcome
            }
            Err(e) => CommitOutcome::Rejected {
                code: None,
                detail: e.to_string(),
            },
        }
    }

    fn is_present(&self, hash: &AnchorHash) -> bool {
        !self.is_stopped() && self.client.query(hash)
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("⛓️ Main chain connection to {} stopped", self.client.address());
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
