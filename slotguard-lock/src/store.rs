//! Coordination store abstraction.
//!
//! A store only has to offer a linearizable create-if-absent and a point
//! read. Anything with atomic conditional writes (etcd, ZooKeeper, a
//! single-node map) can sit behind [`CoordinationStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No endpoints configured")]
    NoEndpoints,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Session closed")]
    Closed,

    #[cfg(feature = "etcd")]
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),
}

/// Credentials passed to the store when opening a session.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An open session against a linearizable key-value store.
///
/// Implementations must be safe to share between concurrent requests.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Atomically creates `key` with `value` if it has never existed.
    ///
    /// Returns `true` only for the single caller whose write created the key.
    async fn create_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool, StoreError>;

    /// Reads the current value of `key`.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Releases the session. Must be idempotent.
    async fn close(&self) {}
}

/// Opens [`CoordinationStore`] sessions.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(
        &self,
        endpoints: &[String],
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Result<Arc<dyn CoordinationStore>, StoreError>;
}
