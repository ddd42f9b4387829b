//! Double-sign protection across redundant signer processes.
//!
//! Every request runs the same sequence:
//!
//! 1. sign with the wrapped [`Signer`]
//! 2. derive the slot key from the request
//! 3. claim the key in the shared coordination store
//! 4. release the signature only if this process created the claim
//!
//! A signature whose claim was refused, timed out or failed is dropped before
//! it reaches the caller. There is no in-process locking: the store orders
//! claims from every process, and the first one wins.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use slotguard_lock::{
    CoordinationLock, Credentials, KeyError, LockError, Namespace, Slot, SlotKey, Step,
    StoreConnector,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, CoordinatorConfig};
use crate::protocol::{ProposalDraft, PublicKey, Signature, SignedMsgType, VoteDraft};
use crate::signer::{Signer, SignerError};

/// Why a request could not be turned into a slot key.
#[derive(Debug, Error)]
pub enum MalformedRequest {
    #[error("vote type {0:?} has no signing slot")]
    VoteType(SignedMsgType),

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Errors from [`SigningCoordinator`].
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Error signing {what}: {source}")]
    Signer {
        what: &'static str,
        #[source]
        source: SignerError,
    },

    #[error("Malformed request: {0}")]
    MalformedRequest(#[from] MalformedRequest),

    #[error("Coordination lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Signature rejected: {key} is already claimed")]
    SignatureRejected { key: String },

    #[error("Coordinator is not running (state: {0})")]
    NotRunning(ServiceState),

    #[error("Coordinator already started (state: {0})")]
    AlreadyStarted(ServiceState),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl CoordinatorError {
    /// True when the protection mechanism itself may be unavailable.
    ///
    /// A rejected signature is expected contention between healthy instances
    /// and is not an infrastructure fault.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, CoordinatorError::Lock(_))
    }
}

/// Result of one coordinated signing request.
#[derive(Debug)]
pub enum SignOutcome {
    /// The slot was claimed by this process; the signature may be used.
    Signed(Signature),
    /// Another instance already holds the slot. The signature was discarded.
    Rejected(SlotKey),
    /// Signing, key derivation or the claim failed. No signature exists.
    Failed(CoordinatorError),
}

impl SignOutcome {
    pub fn is_signed(&self) -> bool {
        matches!(self, SignOutcome::Signed(_))
    }

    pub fn signature(&self) -> Option<&Signature> {
        match self {
            SignOutcome::Signed(signature) => Some(signature),
            _ => None,
        }
    }

    /// Collapses the outcome into a `Result`, mapping a rejection to
    /// [`CoordinatorError::SignatureRejected`].
    pub fn into_result(self) -> Result<Signature, CoordinatorError> {
        match self {
            SignOutcome::Signed(signature) => Ok(signature),
            SignOutcome::Rejected(key) => Err(CoordinatorError::SignatureRejected {
                key: key.to_string(),
            }),
            SignOutcome::Failed(err) => Err(err),
        }
    }
}

/// Public view of the coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

enum Lifecycle {
    Stopped,
    Starting,
    Running(Arc<CoordinationLock>),
    Stopping,
}

impl Lifecycle {
    fn state(&self) -> ServiceState {
        match self {
            Lifecycle::Stopped => ServiceState::Stopped,
            Lifecycle::Starting => ServiceState::Starting,
            Lifecycle::Running(_) => ServiceState::Running,
            Lifecycle::Stopping => ServiceState::Stopping,
        }
    }
}

/// Wraps a [`Signer`] so that at most one instance of a validator releases a
/// signature for any slot.
pub struct SigningCoordinator<S> {
    signer: S,
    connector: Arc<dyn StoreConnector>,
    validator_name: String,
    namespace: Namespace,
    endpoints: Vec<String>,
    credentials: Option<Credentials>,
    timeout: std::time::Duration,
    lifecycle: Mutex<Lifecycle>,
}

impl<S: Signer> SigningCoordinator<S> {
    /// Creates a stopped coordinator. Call [`start`](Self::start) before
    /// signing.
    pub fn new(
        config: CoordinatorConfig,
        signer: S,
        connector: Arc<dyn StoreConnector>,
    ) -> Result<Self, CoordinatorError> {
        let namespace = config.validate()?;
        let credentials = config.credentials();
        let timeout = config.timeout();

        Ok(Self {
            signer,
            connector,
            validator_name: config.validator_name,
            namespace,
            endpoints: config.endpoints,
            credentials,
            timeout,
            lifecycle: Mutex::new(Lifecycle::Stopped),
        })
    }

    pub fn state(&self) -> ServiceState {
        self.lifecycle().state()
    }

    pub fn validator_name(&self) -> &str {
        &self.validator_name
    }

    /// Connects to the coordination store. On failure the coordinator stays
    /// stopped and refuses to sign.
    ///
    /// Dropping the returned future before it completes also leaves the
    /// coordinator stopped.
    pub async fn start(&self) -> Result<(), CoordinatorError> {
        let transition = {
            let mut lifecycle = self.lifecycle();
            if !matches!(*lifecycle, Lifecycle::Stopped) {
                return Err(CoordinatorError::AlreadyStarted(lifecycle.state()));
            }
            *lifecycle = Lifecycle::Starting;
            Transition::new(&self.lifecycle)
        };

        info!(
            "Starting signing coordinator: validator={}, namespace={}, endpoints={:?}",
            self.validator_name, self.namespace, self.endpoints
        );

        match CoordinationLock::connect(
            self.connector.as_ref(),
            &self.endpoints,
            self.credentials.as_ref(),
            self.timeout,
        )
        .await
        {
            Ok(lock) => {
                transition.complete(Lifecycle::Running(Arc::new(lock)));
                info!("Signing coordinator running");
                Ok(())
            }
            Err(e) => {
                transition.complete(Lifecycle::Stopped);
                error!("Failed to start signing coordinator: {}", e);
                Err(e.into())
            }
        }
    }

    /// Disconnects from the coordination store. A no-op unless running.
    pub async fn stop(&self) {
        let (lock, transition) = {
            let mut lifecycle = self.lifecycle();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopping) {
                Lifecycle::Running(lock) => (lock, Transition::new(&self.lifecycle)),
                other => {
                    *lifecycle = other;
                    return;
                }
            }
        };

        lock.disconnect().await;
        transition.complete(Lifecycle::Stopped);
        info!("Signing coordinator stopped");
    }

    /// Returns the wrapped signer's public key.
    pub async fn public_key(&self) -> Result<PublicKey, CoordinatorError> {
        self.signer
            .public_key()
            .await
            .map_err(|source| CoordinatorError::Signer {
                what: "public key",
                source,
            })
    }

    /// Signs a prevote or precommit.
    pub async fn sign_vote(&self, chain_id: &str, vote: &VoteDraft) -> SignOutcome {
        let lock = match self.running_lock() {
            Ok(lock) => lock,
            Err(e) => return SignOutcome::Failed(e),
        };

        let signature = match self.signer.sign_vote(chain_id, vote).await {
            Ok(signature) => signature,
            Err(source) => {
                warn!(
                    "Signer failed on vote h={} r={}: {}",
                    vote.height, vote.round, source
                );
                return SignOutcome::Failed(CoordinatorError::Signer {
                    what: "vote",
                    source,
                });
            }
        };

        let slot = vote_step(vote.msg_type)
            .and_then(|step| Slot::new(vote.height, vote.round, step).map_err(Into::into));
        self.release(&lock, chain_id, slot, signature).await
    }

    /// Signs a block proposal.
    pub async fn sign_proposal(&self, chain_id: &str, proposal: &ProposalDraft) -> SignOutcome {
        let lock = match self.running_lock() {
            Ok(lock) => lock,
            Err(e) => return SignOutcome::Failed(e),
        };

        let signature = match self.signer.sign_proposal(chain_id, proposal).await {
            Ok(signature) => signature,
            Err(source) => {
                warn!(
                    "Signer failed on proposal h={} r={}: {}",
                    proposal.height, proposal.round, source
                );
                return SignOutcome::Failed(CoordinatorError::Signer {
                    what: "proposal",
                    source,
                });
            }
        };

        let slot = Slot::new(proposal.height, proposal.round, Step::Proposal).map_err(Into::into);
        self.release(&lock, chain_id, slot, signature).await
    }

    /// Claims the slot and decides whether `signature` leaves this process.
    async fn release(
        &self,
        lock: &CoordinationLock,
        chain_id: &str,
        slot: Result<Slot, MalformedRequest>,
        signature: Signature,
    ) -> SignOutcome {
        let key = match slot.and_then(|slot| {
            SlotKey::new(&self.namespace, chain_id, slot).map_err(MalformedRequest::from)
        }) {
            Ok(key) => key,
            Err(e) => {
                warn!("Discarding signature for malformed request: {}", e);
                drop(signature);
                return SignOutcome::Failed(e.into());
            }
        };

        debug!(
            "Signed {} (sig={}), claiming",
            key.slot(),
            signature.fingerprint()
        );

        match lock.claim(&key, &self.validator_name).await {
            Ok(true) => {
                info!(
                    "Released signature for {} (sig={})",
                    key,
                    signature.fingerprint()
                );
                SignOutcome::Signed(signature)
            }
            Ok(false) => {
                error!(
                    "DOUBLE-SIGN ATTEMPT BLOCKED: key={}, validator={}, sig={}",
                    key,
                    self.validator_name,
                    signature.fingerprint()
                );
                drop(signature);
                SignOutcome::Rejected(key)
            }
            Err(e) => {
                error!("Claim on {} failed, discarding signature: {}", key, e);
                drop(signature);
                SignOutcome::Failed(e.into())
            }
        }
    }

    fn running_lock(&self) -> Result<Arc<CoordinationLock>, CoordinatorError> {
        match &*self.lifecycle() {
            Lifecycle::Running(lock) => Ok(lock.clone()),
            other => Err(CoordinatorError::NotRunning(other.state())),
        }
    }
}

impl<S> SigningCoordinator<S> {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        lock_lifecycle(&self.lifecycle)
    }
}

fn lock_lifecycle(lifecycle: &Mutex<Lifecycle>) -> MutexGuard<'_, Lifecycle> {
    lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-flight `Starting` or `Stopping` transition.
///
/// Resets the lifecycle to `Stopped` if dropped before
/// [`complete`](Self::complete), so a cancelled start or stop cannot leave
/// the coordinator stuck in an intermediate state.
struct Transition<'a> {
    lifecycle: &'a Mutex<Lifecycle>,
    pending: bool,
}

impl<'a> Transition<'a> {
    fn new(lifecycle: &'a Mutex<Lifecycle>) -> Self {
        Self {
            lifecycle,
            pending: true,
        }
    }

    fn complete(mut self, next: Lifecycle) {
        *lock_lifecycle(self.lifecycle) = next;
        self.pending = false;
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if self.pending {
            warn!("Lifecycle transition abandoned, coordinator stopped");
            *lock_lifecycle(self.lifecycle) = Lifecycle::Stopped;
        }
    }
}

fn vote_step(msg_type: SignedMsgType) -> Result<Step, MalformedRequest> {
    match msg_type {
        SignedMsgType::Prevote => Ok(Step::Prevote),
        SignedMsgType::Precommit => Ok(Step::Precommit),
        other => Err(MalformedRequest::VoteType(other)),
    }
}
