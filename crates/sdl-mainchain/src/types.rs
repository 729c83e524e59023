// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SCALE-OUT LEDGER (SDL) - ANCHORING TYPES
//
// - CommitRequest: the serialized block abstract to anchor (never empty)
// - AnchorHash: identifier returned by the main chain for an accepted commit
// - CommitOutcome: accepted XOR one of three failure classes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::error::MainChainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix the Tendermint RPC expects in front of hex-encoded byte parameters.
pub const HEX_PREFIX: &str = "0x";

/// Serialized block abstract submitted for anchoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    payload: Vec<u8>,
}

impl CommitRequest {
    pub fn new(payload: impl Into<Vec<u8>>) -> Result<Self, MainChainError> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(MainChainError::EmptyPayload);
        }
        Ok(Self { payload })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// `0x` followed by the lowercase hex of the payload.
    pub fn encoded(&self) -> String {
        format!("{}{}", HEX_PREFIX, hex::encode(&self.payload))
    }
}

/// Hash under which the main chain recorded a commitment.
///
/// The width is whatever the chain returns; Tendermint uses 32 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorHash(Vec<u8>);

impl AnchorHash {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Decode hex text with an optional `0x`/`0X` prefix, in either case.
    pub fn from_hex(text: &str) -> Result<Self, MainChainError> {
        let digits = text
            .strip_prefix(HEX_PREFIX)
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        hex::decode(digits)
            .map(Self)
            .map_err(|source| MainChainError::InvalidHex {
                input: text.to_string(),
                source,
            })
    }

    /// `0x` followed by uppercase hex, the form Tendermint reports hashes in.
    pub fn to_hex(&self) -> String {
        format!("{}{}", HEX_PREFIX, hex::encode_upper(&self.0))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AnchorHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for AnchorHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Result of submitting an abstract to the main chain.
///
/// Exactly one variant holds; only `Accepted` carries a hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// `result.code == 0` and a decodable `result.hash`.
    Accepted(AnchorHash),
    /// The chain answered with an `error` object or a non-zero result code.
    Rejected { code: Option<i64>, detail: String },
    /// Valid JSON that does not have the expected shape.
    Malformed(String),
    /// Connection failure, non-success HTTP status or a body that is not JSON.
    Transport(String),
}

impl CommitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, CommitOutcome::Accepted(_))
    }

    /// The anchor hash on success, `None` on any failure.
    pub fn anchor_hash(&self) -> Option<&AnchorHash> {
        match self {
            CommitOutcome::Accepted(hash) => Some(hash),
            _ => None,
        }
    }

    pub fn into_anchor_hash(self) -> Option<AnchorHash> {
        match self {
            CommitOutcome::Accepted(hash) => Some(hash),
            _ => None,
        }
    }
}

impl fmt::Display for CommitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitOutcome::Accepted(hash) => write!(f, "accepted as {}", hash),
            CommitOutcome::Rejected {
                code: Some(code),
                detail,
            } => write!(f, "rejected with code {}: {}", code, detail),
            CommitOutcome::Rejected { code: None, detail } => write!(f, "rejected: {}", detail),
            CommitOutcome::Malformed(e) => write!(f, "malformed response: {}", e),
            CommitOutcome::Transport(e) => write!(f, "transport failure: {}", e),
        }
    }
}
