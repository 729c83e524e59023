use crate::sender::{OutboundTransaction, TransactionSender};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use sdl_mainchain::MainChain;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type NodeId = u32;

/// Identity of the local node and the peers it knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnNode {
    id: NodeId,
    peers: Vec<NodeId>,
}

impl OwnNode {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            peers: Vec::new(),
        }
    }

    pub fn with_peers(mut self, peers: impl IntoIterator<Item = NodeId>) -> Self {
        self.peers = peers.into_iter().filter(|peer| *peer != self.id).collect();
        self.peers.sort_unstable();
        self.peers.dedup();
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn peers(&self) -> &[NodeId] {
        &self.peers
    }
}

/// The genesis block shared by every node. Its contents are opaque here;
/// only its hash anchors the local chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisBlock {
    data: Vec<u8>,
}

impl GenesisBlock {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// SHA-256 over the serialized block
    pub fn hash(&self) -> [u8; 32] {
        Sha256::digest(&self.data).into()
    }
}

/// Everything a running transaction pattern may touch.
#[derive(Clone)]
pub struct NodeContext {
    node: Arc<OwnNode>,
    genesis_hash: [u8; 32],
    key: Arc<SigningKey>,
    sender: Arc<TransactionSender>,
    main_chain: Arc<dyn MainChain>,
    next_nonce: Arc<AtomicU64>,
}

impl NodeContext {
    pub fn new(
        node: OwnNode,
        genesis: &GenesisBlock,
        key: SigningKey,
        sender: Arc<TransactionSender>,
        main_chain: Arc<dyn MainChain>,
    ) -> Self {
        Self {
            node: Arc::new(node),
            genesis_hash: genesis.hash(),
            key: Arc::new(key),
            sender,
            main_chain,
            next_nonce: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node.id()
    }

    pub fn peers(&self) -> &[NodeId] {
        self.node.peers()
    }

    pub fn genesis_hash(&self) -> &[u8; 32] {
        &self.genesis_hash
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    pub fn sender(&self) -> &Arc<TransactionSender> {
        &self.sender
    }

    pub fn main_chain(&self) -> &Arc<dyn MainChain> {
        &self.main_chain
    }

    /// Build and sign a transaction from this node. Nonces increase
    /// monotonically across pattern runs.
    pub fn build_transaction(&self, receiver: NodeId, amount: u64) -> OutboundTransaction {
        let nonce = self.next_nonce.fetch_add(1, Ordering::SeqCst);
        let mut tx = OutboundTransaction {
            sender: self.node_id(),
            receiver,
            nonce,
            amount,
            signature: Vec::new(),
        };
        tx.signature = self.key.sign(&tx.signing_bytes()).to_bytes().to_vec();
        tx
    }
}
