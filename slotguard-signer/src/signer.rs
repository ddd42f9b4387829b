//! The signing capability wrapped by the coordinator.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{ProposalDraft, PublicKey, Signature, VoteDraft};

/// Errors from a [`Signer`].
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Signer rejected request: {0}")]
    Rejected(String),

    #[error("Signing failed: {0}")]
    Failed(String),

    /// The signer could not be reached or answered garbage. The source is the
    /// adapter's own error type.
    #[error("Signer transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Produces signatures for consensus messages.
///
/// Implementations may block for as long as they need (an HSM, a remote
/// daemon); the coordinator never times out a signing call.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign_vote(&self, chain_id: &str, vote: &VoteDraft) -> Result<Signature, SignerError>;

    async fn sign_proposal(
        &self,
        chain_id: &str,
        proposal: &ProposalDraft,
    ) -> Result<Signature, SignerError>;

    async fn public_key(&self) -> Result<PublicKey, SignerError>;
}

#[async_trait]
impl<S: Signer + ?Sized> Signer for Arc<S> {
    async fn sign_vote(&self, chain_id: &str, vote: &VoteDraft) -> Result<Signature, SignerError> {
        (**self).sign_vote(chain_id, vote).await
    }

    async fn sign_proposal(
        &self,
        chain_id: &str,
        proposal: &ProposalDraft,
    ) -> Result<Signature, SignerError> {
        (**self).sign_proposal(chain_id, proposal).await
    }

    async fn public_key(&self) -> Result<PublicKey, SignerError> {
        (**self).public_key().await
    }
}
