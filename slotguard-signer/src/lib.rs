//! Double-sign protection for replicated validator signers.
//!
//! Running more than one signer for a validator (hot standby, failover) is
//! only safe if at most one of them ever releases a signature for a given
//! consensus slot. [`SigningCoordinator`] wraps any [`Signer`] and, after
//! each signature is produced, claims the slot in a coordination store
//! shared by all instances. Signatures whose claim does not succeed never
//! reach the caller.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐  sign_vote / sign_proposal  ┌──────────────────────┐
//! │ consensus node │ ──────────────────────────► │ SigningCoordinator   │
//! └────────────────┘                             │  1. Signer::sign_*   │
//!                                                │  2. slot key         │
//!                                                │  3. claim (store)    │
//!                                                │  4. release / drop   │
//!                                                └──────────────────────┘
//! ```
//!
//! ## Outcomes
//!
//! - `Signed`: this instance owns the slot
//! - `Rejected`: another instance already signed it; the process is healthy
//! - `Failed`: signer, request or store failure; lock failures should page
//!   someone (see [`CoordinatorError::is_infrastructure`])

pub mod config;
pub mod coordinator;
pub mod protocol;
#[cfg(feature = "remote")]
pub mod remote;
pub mod signer;

pub use config::{ConfigError, CoordinatorConfig};
pub use coordinator::{
    CoordinatorError, MalformedRequest, ServiceState, SignOutcome, SigningCoordinator,
};
pub use protocol::{BlockId, ProposalDraft, PublicKey, Signature, SignedMsgType, VoteDraft};
#[cfg(feature = "remote")]
pub use remote::{RemoteSigner, RemoteSignerError};
pub use signer::{Signer, SignerError};
