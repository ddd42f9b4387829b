//! Slot claims for validator double-sign protection.
//!
//! Redundant signer processes for one validator share a linearizable
//! key-value store. Before a signature leaves any of them, the process must
//! create the lock record for that consensus slot. Records are write-once:
//! the first creator owns the slot and everyone else is turned away.
//!
//! ```text
//! ┌──────────┐  claim(h/r/step)  ┌──────────────────┐
//! │ signer A │ ────────────────► │                  │
//! └──────────┘                   │ coordination     │
//! ┌──────────┐  claim(h/r/step)  │ store (etcd)     │
//! │ signer B │ ────────────────► │                  │
//! └──────────┘                   └──────────────────┘
//! ```
//!
//! The etcd backend lives behind the `etcd` feature. [`MemoryConnector`]
//! provides the same contract inside one process.

pub mod key;
pub mod lock;
pub mod memory;
pub mod store;

#[cfg(feature = "etcd")]
pub mod etcd;

pub use key::{KeyError, Namespace, Slot, SlotKey, Step};
pub use lock::{CoordinationLock, LockError};
pub use memory::{MemoryConnector, MemoryStore};
pub use store::{CoordinationStore, Credentials, StoreConnector, StoreError};

#[cfg(feature = "etcd")]
pub use etcd::{EtcdConnector, EtcdStore};
