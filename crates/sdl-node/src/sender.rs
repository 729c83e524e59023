// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SCALE-OUT LEDGER (SDL) - TRANSACTION SENDER
//
// Owns outbound transaction submission for one node.
// - FIFO channel drained by a single worker thread
// - wait_until_done(): block until nothing is queued or in flight
// - shutdown_now(): drop queued work and stop the worker without waiting
// Failed sends are counted and logged, never retried.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::error::NodeError;
use crate::node::NodeId;
use crate::task::{CancelSignal, ManagedTask};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// A signed transfer from this node to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundTransaction {
    pub sender: NodeId,
    pub receiver: NodeId,
    pub nonce: u64,
    pub amount: u64,
    pub signature: Vec<u8>,
}

impl OutboundTransaction {
    /// Bytes covered by the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(24);
        bytes.extend_from_slice(&self.sender.to_le_bytes());
        bytes.extend_from_slice(&self.receiver.to_le_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes.extend_from_slice(&self.amount.to_le_bytes());
        bytes
    }
}

/// Delivers transactions to peers.
pub trait TransactionTransport: Send + Sync {
    fn send(&self, tx: &OutboundTransaction) -> Result<(), NodeError>;
}

enum Command {
    Send(OutboundTransaction),
    /// Acknowledged once every command queued before it has been handled.
    Flush(Sender<()>),
}

#[derive(Default)]
struct Counters {
    /// Scheduled and not yet handled by the worker.
    outstanding: AtomicUsize,
    sent: AtomicU64,
    failed: AtomicU64,
}

pub struct TransactionSender {
    node_id: NodeId,
    queue: Sender<Command>,
    /// Second handle on the queue, used to drop unsent work on shutdown.
    backlog: Receiver<Command>,
    counters: Arc<Counters>,
    worker: ManagedTask,
}

impl TransactionSender {
    /// Start the worker thread for `node_id`.
    pub fn start(
        node_id: NodeId,
        transport: Arc<dyn TransactionTransport>,
    ) -> Result<Arc<Self>, NodeError> {
        let (queue, backlog) = channel::unbounded();
        let counters = Arc::new(Counters::default());

        let worker_queue = backlog.clone();
        let worker_counters = Arc::clone(&counters);
        let worker = ManagedTask::spawn(format!("sdl-sender-{}", node_id), move |signal| {
            run_worker(node_id, worker_queue, worker_counters, transport, signal)
        })?;
        Ok(Arc::new(Self {
            node_id,
            queue,
            backlog,
            counters,
            worker,
        }))
    }

    /// Queue a transaction for sending.
    pub fn schedule(&self, tx: OutboundTransaction) -> Result<(), NodeError> {
        if self.is_shutdown() {
            return Err(NodeError::SenderShutdown);
        }
        self.counters.outstanding.fetch_add(1, Ordering::SeqCst);
        self.queue
            .send(Command::Send(tx))
            .map_err(|_| NodeError::SenderShutdown)
    }

    /// Queued plus in-flight transactions.
    pub fn pending(&self) -> usize {
        self.counters.outstanding.load(Ordering::SeqCst)
    }

    /// Block until every queued transaction has been handed to the transport.
    ///
    /// Returns `Interrupted` once the sender has been shut down, since
    /// queued work may have been dropped.
    pub fn wait_until_done(&self) -> Result<(), NodeError> {
        let interrupted = || NodeError::Interrupted("sender shut down before draining");
        let finished = self.worker.waiter();
        loop {
            if self.is_shutdown() {
                return Err(interrupted());
            }
            if self.pending() == 0 {
                return Ok(());
            }

            let (ack, acked) = channel::bounded(1);
            self.queue
                .send(Command::Flush(ack))
                .map_err(|_| interrupted())?;
            let acknowledged = select! {
                recv(acked) -> reply => reply.is_ok(),
                recv(self.worker.signal().cancelled()) -> _ => false,
                recv(finished.finished()) -> _ => false,
            };
            if !acknowledged {
                return Err(interrupted());
            }
        }
    }

    /// Stop the worker and drop queued transactions without waiting.
    /// Returns how many queued transactions were dropped.
    pub fn shutdown_now(&self) -> usize {
        self.worker.cancel();
        let mut dropped = 0;
        for command in self.backlog.try_iter() {
            // Dropping a flush releases its waiter with an error.
            if let Command::Send(_) = command {
                self.counters.outstanding.fetch_sub(1, Ordering::SeqCst);
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!(
                "📤 Node {}: dropped {} unsent transactions on shutdown",
                self.node_id, dropped
            );
        }
        dropped
    }

    /// Whether `shutdown_now` was called or the worker has died.
    pub fn is_shutdown(&self) -> bool {
        self.worker.is_cancelled() || !self.worker.is_alive()
    }

    pub fn is_worker_alive(&self) -> bool {
        self.worker.is_alive()
    }

    pub fn sent_count(&self) -> u64 {
        self.counters.sent.load(Ordering::SeqCst)
    }

    pub fn failed_count(&self) -> u64 {
        self.counters.failed.load(Ordering::SeqCst)
    }
}

fn run_worker(
    node_id: NodeId,
    queue: Receiver<Command>,
    counters: Arc<Counters>,
    transport: Arc<dyn TransactionTransport>,
    signal: CancelSignal,
) -> Result<(), NodeError> {
    debug!("Node {}: transaction sender started", node_id);

    while !signal.is_cancelled() {
        let command = select! {
            recv(queue) -> command => command.ok(),
            recv(signal.cancelled()) -> _ => None,
        };
        let Some(command) = command else {
            break;
        };

        match command {
            Command::Send(tx) => {
                match transport.send(&tx) {
                    Ok(()) => {
                        counters.sent.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::SeqCst);
                        warn!(
                            "📤 Node {}: failed sending transaction {} to node {}: {}",
                            node_id, tx.nonce, tx.receiver, e
                        );
                    }
                }
                counters.outstanding.fetch_sub(1, Ordering::SeqCst);
            }
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }

    info!("📤 Node {}: transaction sender stopped", node_id);
    Ok(())
}
