//! In-process coordination store.
//!
//! Every session opened from one [`MemoryConnector`] shares the same map, so
//! several coordinators in one process (or one test) behave like independent
//! signer processes pointed at a single store. The map is guarded by one
//! mutex, which makes create-if-absent trivially linearizable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::store::{CoordinationStore, Credentials, StoreConnector, StoreError};

type Records = Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>;

/// Hands out sessions over one shared in-memory key space.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    records: Records,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session directly, without going through [`StoreConnector`].
    pub fn session(&self) -> MemoryStore {
        MemoryStore {
            records: self.records.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of lock records written so far.
    pub fn len(&self) -> usize {
        lock_records(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(
        &self,
        endpoints: &[String],
        _credentials: Option<&Credentials>,
        _timeout: Duration,
    ) -> Result<Arc<dyn CoordinationStore>, StoreError> {
        if endpoints.is_empty() {
            return Err(StoreError::NoEndpoints);
        }
        debug!("Opening in-memory store session, endpoints={:?}", endpoints);
        Ok(Arc::new(self.session()))
    }
}

/// One session over a [`MemoryConnector`]'s key space.
pub struct MemoryStore {
    records: Records,
    closed: AtomicBool,
}

impl MemoryStore {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn create_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let mut records = lock_records(&self.records);
        if records.contains_key(key) {
            return Ok(false);
        }
        records.insert(key.to_vec(), value.to_vec());
        Ok(true)
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_open()?;
        Ok(lock_records(&self.records).get(key).cloned())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

// A panic while holding the guard cannot leave a half-written entry behind,
// so a poisoned map is still consistent.
fn lock_records(records: &Records) -> MutexGuard<'_, HashMap<Vec<u8>, Vec<u8>>> {
    records.lock().unwrap_or_else(PoisonError::into_inner)
}
