//! Consensus drafts and the remote signer wire protocol.
//!
//! Only the fields needed to sign a message and derive its slot key are
//! modelled here. Frames on the wire are length-prefixed bincode.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Consensus message type of a vote or proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignedMsgType {
    Unknown,
    Prevote,
    Precommit,
    Proposal,
}

/// Identifies the block being voted on or proposed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockId {
    pub hash: Vec<u8>,
    pub part_set_total: u32,
    pub part_set_hash: Vec<u8>,
}

impl BlockId {
    /// A vote for nil carries an empty block id.
    pub fn is_nil(&self) -> bool {
        self.hash.is_empty() && self.part_set_hash.is_empty()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            hex::encode(&self.hash),
            self.part_set_total,
            hex::encode(&self.part_set_hash)
        )
    }
}

/// An unsigned vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteDraft {
    pub msg_type: SignedMsgType,
    pub height: i64,
    pub round: i32,
    pub block_id: BlockId,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: u64,
    pub validator_address: Vec<u8>,
    pub validator_index: i32,
}

/// An unsigned block proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalDraft {
    pub height: i64,
    pub round: i32,
    /// Proof-of-lock round, -1 if none
    pub pol_round: i32,
    pub block_id: BlockId,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: u64,
}

/// Signature bytes produced by the signer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short SHA-256 fingerprint, safe to put in logs.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.0);
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.fingerprint())
    }
}

/// Validator public key bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(pub Vec<u8>);

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

/// Request to sign a vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignVoteRequest {
    pub chain_id: String,
    pub vote: VoteDraft,
    /// Unique request ID, echoed in the response
    pub request_id: u64,
}

/// Request to sign a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignProposalRequest {
    pub chain_id: String,
    pub proposal: ProposalDraft,
    /// Unique request ID, echoed in the response
    pub request_id: u64,
}

/// Response from a signing operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SignResponse {
    /// Successful signature
    Success { signature: Vec<u8>, request_id: u64 },
    /// The signer refused the request (e.g. its own double-sign guard)
    Rejected { reason: String, request_id: u64 },
    /// Internal error
    Error { message: String, request_id: u64 },
}

impl SignResponse {
    pub fn request_id(&self) -> u64 {
        match self {
            SignResponse::Success { request_id, .. }
            | SignResponse::Rejected { request_id, .. }
            | SignResponse::Error { request_id, .. } => *request_id,
        }
    }
}

/// All possible messages from client to signer daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    SignVote(SignVoteRequest),
    SignProposal(SignProposalRequest),
    GetPubKey,
    Ping,
}

/// All possible messages from signer daemon to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Sign(SignResponse),
    PubKey(PublicKey),
    Pong,
}

impl SignVoteRequest {
    pub fn new(chain_id: impl Into<String>, vote: VoteDraft) -> Self {
        Self {
            chain_id: chain_id.into(),
            vote,
            request_id: generate_request_id(),
        }
    }
}

impl SignProposalRequest {
    pub fn new(chain_id: impl Into<String>, proposal: ProposalDraft) -> Self {
        Self {
            chain_id: chain_id.into(),
            proposal,
            request_id: generate_request_id(),
        }
    }
}

/// Generate a request ID from the current time mixed with randomness.
fn generate_request_id() -> u64 {
    use rand::Rng;
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random: u32 = rand::thread_rng().gen();
    timestamp ^ (random as u64)
}
