//! Line-delimited JSON peer transport.
//!
//! Each transaction is written as one JSON object followed by `\n` on a
//! fresh TCP connection to the receiving node.

use crate::error::NodeError;
use crate::node::NodeId;
use crate::sender::{OutboundTransaction, TransactionTransport};
use crate::server::ConnectionHandler;
use log::{debug, warn};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TcpTransport {
    peers: HashMap<NodeId, String>,
}

impl TcpTransport {
    pub fn new(peers: impl IntoIterator<Item = (NodeId, String)>) -> Self {
        Self {
            peers: peers.into_iter().collect(),
        }
    }

    fn resolve(&self, node_id: NodeId) -> Result<SocketAddr, NodeError> {
        let address = self
            .peers
            .get(&node_id)
            .ok_or_else(|| NodeError::Transport(format!("unknown peer {}", node_id)))?;
        address
            .to_socket_addrs()
            .map_err(|e| NodeError::Transport(format!("cannot resolve {}: {}", address, e)))?
            .next()
            .ok_or_else(|| NodeError::Transport(format!("no address for {}", address)))
    }
}

impl TransactionTransport for TcpTransport {
    fn send(&self, tx: &OutboundTransaction) -> Result<(), NodeError> {
        let addr = self.resolve(tx.receiver)?;
        let mut stream = TcpStream::connect_timeout(&addr, IO_TIMEOUT)
            .map_err(|e| NodeError::Transport(format!("connect {}: {}", addr, e)))?;
        stream
            .set_write_timeout(Some(IO_TIMEOUT))
            .map_err(|e| NodeError::Transport(e.to_string()))?;

        let mut line = serde_json::to_vec(tx).map_err(|e| NodeError::Transport(e.to_string()))?;
        line.push(b'\n');
        stream
            .write_all(&line)
            .and_then(|_| stream.flush())
            .map_err(|e| NodeError::Transport(format!("write {}: {}", addr, e)))
    }
}

/// Reads transactions sent by [`TcpTransport`] and counts them.
///
/// Signature and balance checks belong to the ledger layer; this handler
/// only decodes and logs.
pub struct TransactionReceiver {
    node_id: NodeId,
    received: AtomicU64,
}

impl TransactionReceiver {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            received: AtomicU64::new(0),
        }
    }

    pub fn received_count(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }
}

impl ConnectionHandler for TransactionReceiver {
    fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_read_timeout(Some(IO_TIMEOUT)) {
            warn!("Node {}: cannot configure connection from {}: {}", self.node_id, peer, e);
            return;
        }
        for line in BufReader::new(stream).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    debug!("Node {}: connection from {} ended: {}", self.node_id, peer, e);
                    break;
                }
            };
            match serde_json::from_str::<OutboundTransaction>(&line) {
                Ok(tx) => {
                    self.received.fetch_add(1, Ordering::SeqCst);
                    debug!(
                        "📥 Node {}: transaction {} from node {} ({} units)",
                        self.node_id, tx.nonce, tx.sender, tx.amount
                    );
                }
                Err(e) => warn!("Node {}: undecodable message from {}: {}", self.node_id, peer, e),
            }
        }
    }
}
