//! [`Signer`] backed by an out-of-process signing daemon.
//!
//! Each call opens a Unix socket connection, writes one length-prefixed
//! bincode [`Request`] and reads one [`Response`]. Keys never leave the
//! daemon.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, warn};

use crate::protocol::{
    ProposalDraft, PublicKey, Request, Response, SignProposalRequest, SignResponse,
    SignVoteRequest, Signature, VoteDraft,
};
use crate::signer::{Signer, SignerError};

/// Largest frame either side will accept.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Errors talking to the signing daemon.
#[derive(Debug, Error)]
pub enum RemoteSignerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("Response for request {got}, expected {expected}")]
    RequestIdMismatch { expected: u64, got: u64 },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(&'static str),
}

impl From<RemoteSignerError> for SignerError {
    fn from(err: RemoteSignerError) -> Self {
        SignerError::Transport(Box::new(err))
    }
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), RemoteSignerError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(RemoteSignerError::FrameTooLarge(payload.len()));
    }
    let len_bytes = (payload.len() as u32).to_le_bytes();
    writer.write_all(&len_bytes).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, RemoteSignerError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let msg_len = u32::from_le_bytes(len_buf) as usize;

    if msg_len > MAX_FRAME_LEN {
        return Err(RemoteSignerError::FrameTooLarge(msg_len));
    }

    let mut msg_buf = vec![0u8; msg_len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(msg_buf)
}

/// Client for a signing daemon listening on a Unix socket.
#[derive(Debug, Clone)]
pub struct RemoteSigner {
    socket_path: PathBuf,
}

impl RemoteSigner {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn send_request(&self, request: &Request) -> Result<Response, RemoteSignerError> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;

        let request_bytes = bincode::serialize(request)?;
        write_frame(&mut stream, &request_bytes).await?;

        let response_bytes = read_frame(&mut stream).await?;
        Ok(bincode::deserialize(&response_bytes)?)
    }

    async fn sign(&self, request: Request, request_id: u64) -> Result<Signature, SignerError> {
        let response = self.send_request(&request).await?;

        let Response::Sign(sign_response) = response else {
            return Err(RemoteSignerError::UnexpectedResponse("expected Sign").into());
        };

        if sign_response.request_id() != request_id {
            return Err(RemoteSignerError::RequestIdMismatch {
                expected: request_id,
                got: sign_response.request_id(),
            }
            .into());
        }

        match sign_response {
            SignResponse::Success { signature, .. } => {
                debug!("Remote signature received: id={}, sig_len={}", request_id, signature.len());
                if signature.is_empty() {
                    return Err(SignerError::Failed("empty signature".to_string()));
                }
                Ok(Signature(signature))
            }
            SignResponse::Rejected { reason, .. } => {
                warn!("Remote signer rejected request {}: {}", request_id, reason);
                Err(SignerError::Rejected(reason))
            }
            SignResponse::Error { message, .. } => Err(SignerError::Failed(message)),
        }
    }

    /// Checks that the daemon is reachable.
    pub async fn ping(&self) -> Result<(), RemoteSignerError> {
        match self.send_request(&Request::Ping).await? {
            Response::Pong => Ok(()),
            _ => Err(RemoteSignerError::UnexpectedResponse("expected Pong")),
        }
    }
}

#[async_trait]
impl Signer for RemoteSigner {
    async fn sign_vote(&self, chain_id: &str, vote: &VoteDraft) -> Result<Signature, SignerError> {
        let req = SignVoteRequest::new(chain_id, vote.clone());
        let request_id = req.request_id;
        self.sign(Request::SignVote(req), request_id).await
    }

    async fn sign_proposal(
        &self,
        chain_id: &str,
        proposal: &ProposalDraft,
    ) -> Result<Signature, SignerError> {
        let req = SignProposalRequest::new(chain_id, proposal.clone());
        let request_id = req.request_id;
        self.sign(Request::SignProposal(req), request_id).await
    }

    async fn public_key(&self) -> Result<PublicKey, SignerError> {
        match self.send_request(&Request::GetPubKey).await? {
            Response::PubKey(pubkey) => Ok(pubkey),
            _ => Err(RemoteSignerError::UnexpectedResponse("expected PubKey").into()),
        }
    }
}
