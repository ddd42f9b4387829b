//! Write-once slot claims.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::key::SlotKey;
use crate::store::{CoordinationStore, Credentials, StoreConnector, StoreError};

/// Errors from [`CoordinationLock`].
///
/// Any error returned by [`CoordinationLock::claim`] means the claim outcome
/// is unknown and must be handled as "not acquired".
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Failed to connect to coordination store {endpoints:?}: {source}")]
    Connect {
        endpoints: Vec<String>,
        #[source]
        source: StoreError,
    },

    #[error("Timed out after {timeout:?} connecting to coordination store {endpoints:?}")]
    ConnectTimeout {
        endpoints: Vec<String>,
        timeout: Duration,
    },

    #[error("Claim on {key} timed out after {timeout:?}")]
    Timeout { key: String, timeout: Duration },

    #[error("Store operation on {key} failed: {source}")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("Lock record at {key} holds a non UTF-8 owner")]
    CorruptRecord { key: String },

    #[error("Coordination lock is not connected")]
    NotConnected,
}

/// Client side of the slot claim protocol.
///
/// Holds one store session for its whole lifetime. Claims from concurrent
/// tasks share the session; the store provides the ordering.
pub struct CoordinationLock {
    store: Mutex<Option<Arc<dyn CoordinationStore>>>,
    timeout: Duration,
}

impl CoordinationLock {
    /// Opens a session against `endpoints`. `timeout` bounds the dial here and
    /// every later claim.
    pub async fn connect(
        connector: &dyn StoreConnector,
        endpoints: &[String],
        credentials: Option<&Credentials>,
        timeout_after: Duration,
    ) -> Result<Self, LockError> {
        let store = match timeout(
            timeout_after,
            connector.connect(endpoints, credentials, timeout_after),
        )
        .await
        {
            Ok(Ok(store)) => store,
            Ok(Err(source)) => {
                return Err(LockError::Connect {
                    endpoints: endpoints.to_vec(),
                    source,
                })
            }
            Err(_) => {
                return Err(LockError::ConnectTimeout {
                    endpoints: endpoints.to_vec(),
                    timeout: timeout_after,
                })
            }
        };

        info!("Coordination lock connected: endpoints={:?}", endpoints);
        Ok(Self::from_store(store, timeout_after))
    }

    /// Wraps an already open session.
    pub fn from_store(store: Arc<dyn CoordinationStore>, timeout: Duration) -> Self {
        Self {
            store: Mutex::new(Some(store)),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_connected(&self) -> bool {
        self.session().is_ok()
    }

    /// Claims `key` for `owner`.
    ///
    /// Returns `Ok(true)` if this call created the lock record, `Ok(false)` if
    /// the slot was already claimed by anyone (including `owner`).
    pub async fn claim(&self, key: &SlotKey, owner: &str) -> Result<bool, LockError> {
        let store = self.session()?;
        debug!("Claiming {} for {}", key, owner);

        let acquired = self
            .bounded(key, store.create_if_absent(key.as_bytes(), owner.as_bytes()))
            .await?;

        if acquired {
            debug!("Claimed {}", key);
        } else {
            warn!("Slot already claimed: {}", key);
        }
        Ok(acquired)
    }

    /// Reads the owner recorded for `key`, if it has been claimed.
    pub async fn owner(&self, key: &SlotKey) -> Result<Option<String>, LockError> {
        let store = self.session()?;
        let value = self.bounded(key, store.get(key.as_bytes())).await?;

        value
            .map(|bytes| {
                String::from_utf8(bytes).map_err(|_| LockError::CorruptRecord {
                    key: key.to_string(),
                })
            })
            .transpose()
    }

    /// Closes the session. Safe to call any number of times.
    pub async fn disconnect(&self) {
        let store = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(store) = store {
            store.close().await;
            info!("Coordination lock disconnected");
        }
    }

    fn session(&self) -> Result<Arc<dyn CoordinationStore>, LockError> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(LockError::NotConnected)
    }

    async fn bounded<T>(
        &self,
        key: &SlotKey,
        op: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, LockError> {
        match timeout(self.timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(LockError::Store {
                key: key.to_string(),
                source,
            }),
            Err(_) => Err(LockError::Timeout {
                key: key.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Namespace, Slot, Step};
    use crate::memory::MemoryConnector;
    use async_trait::async_trait;

    fn key(height: i64, round: i32, step: Step) -> SlotKey {
        let namespace = Namespace::new("val_lock/test").unwrap();
        SlotKey::new(&namespace, "test-chain", Slot::new(height, round, step).unwrap()).unwrap()
    }

    fn endpoints() -> Vec<String> {
        vec!["memory://local".to_string()]
    }

    async fn connect(connector: &MemoryConnector) -> CoordinationLock {
        CoordinationLock::connect(connector, &endpoints(), None, Duration::from_secs(1))
            .await
            .unwrap()
    }

    struct HangingStore;

    #[async_trait]
    impl CoordinationStore for HangingStore {
        async fn create_if_absent(&self, _key: &[u8], _value: &[u8]) -> Result<bool, StoreError> {
            std::future::pending().await
        }

        async fn get(&self, _key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
            std::future::pending().await
        }
    }

    struct HangingConnector;

    #[async_trait]
    impl StoreConnector for HangingConnector {
        async fn connect(
            &self,
            _endpoints: &[String],
            _credentials: Option<&Credentials>,
            _timeout: Duration,
        ) -> Result<Arc<dyn CoordinationStore>, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_claim_then_owner() {
        let connector = MemoryConnector::new();
        let lock = connect(&connector).await;
        let key = key(10, 0, Step::Proposal);

        assert!(lock.claim(&key, "validator-a").await.unwrap());
        assert_eq!(lock.owner(&key).await.unwrap().as_deref(), Some("validator-a"));
    }

    #[tokio::test]
    async fn test_unclaimed_slot_has_no_owner() {
        let connector = MemoryConnector::new();
        let lock = connect(&connector).await;
        assert_eq!(lock.owner(&key(1, 0, Step::Prevote)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_second_claim_loses_and_does_not_overwrite() {
        let connector = MemoryConnector::new();
        let first = connect(&connector).await;
        let second = connect(&connector).await;
        let key = key(10, 0, Step::Proposal);

        assert!(first.claim(&key, "validator-a").await.unwrap());
        assert!(!second.claim(&key, "validator-b").await.unwrap());
        assert!(!first.claim(&key, "validator-a").await.unwrap());
        assert_eq!(second.owner(&key).await.unwrap().as_deref(), Some("validator-a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_have_one_winner() {
        let connector = MemoryConnector::new();
        let key = key(42, 3, Step::Precommit);

        let mut handles = Vec::new();
        for i in 0..16 {
            let lock = connect(&connector).await;
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                lock.claim(&key, &format!("validator-{i}")).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_claim_timeout_is_an_error() {
        let lock = CoordinationLock::from_store(Arc::new(HangingStore), Duration::from_millis(20));
        let err = lock.claim(&key(1, 0, Step::Proposal), "validator-a").await.unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let result = CoordinationLock::connect(
            &HangingConnector,
            &endpoints(),
            None,
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(result, Err(LockError::ConnectTimeout { .. })));
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let connector = MemoryConnector::new();
        let result = CoordinationLock::connect(&connector, &[], None, Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(LockError::Connect {
                source: StoreError::NoEndpoints,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let connector = MemoryConnector::new();
        let lock = connect(&connector).await;

        lock.disconnect().await;
        lock.disconnect().await;

        assert!(!lock.is_connected());
        let err = lock.claim(&key(1, 0, Step::Proposal), "validator-a").await.unwrap_err();
        assert!(matches!(err, LockError::NotConnected));
        assert!(connector.is_empty());
    }
}
