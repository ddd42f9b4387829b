//! etcd v3 backed coordination store.
//!
//! A claim is a single transaction:
//!
//! ```text
//! IF create_revision(key) == 0 THEN put(key, owner)
//! ```
//!
//! etcd serializes transactions through raft, so of any number of concurrent
//! claims on one key exactly one sees `succeeded == true`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, ConnectOptions, KvClient, Txn, TxnOp};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::store::{CoordinationStore, Credentials, StoreConnector, StoreError};

/// Connects to an etcd cluster.
#[derive(Debug, Clone, Copy, Default)]
pub struct EtcdConnector;

#[async_trait]
impl StoreConnector for EtcdConnector {
    async fn connect(
        &self,
        endpoints: &[String],
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Result<Arc<dyn CoordinationStore>, StoreError> {
        if endpoints.is_empty() {
            return Err(StoreError::NoEndpoints);
        }

        let mut options = ConnectOptions::new()
            .with_connect_timeout(timeout)
            .with_timeout(timeout);
        if let Some(credentials) = credentials {
            options = options.with_user(credentials.username.clone(), credentials.password.clone());
        }

        let client = Client::connect(endpoints, Some(options)).await?;
        info!("Connected to etcd: endpoints={:?}", endpoints);

        Ok(Arc::new(EtcdStore {
            kv: Mutex::new(Some(client.kv_client())),
        }))
    }
}

/// An etcd session. Dropping the last `KvClient` closes the channel.
pub struct EtcdStore {
    kv: Mutex<Option<KvClient>>,
}

impl EtcdStore {
    // KvClient is a cheap handle over a shared channel; cloning it lets
    // concurrent requests run without holding the mutex across the RPC.
    async fn client(&self) -> Result<KvClient, StoreError> {
        self.kv.lock().await.clone().ok_or(StoreError::Closed)
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn create_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool, StoreError> {
        let mut kv = self.client().await?;
        let txn = Txn::new()
            .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(key, value, None)]);

        let resp = kv.txn(txn).await?;
        debug!(
            "etcd txn on {}: succeeded={}",
            String::from_utf8_lossy(key),
            resp.succeeded()
        );
        Ok(resp.succeeded())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let mut kv = self.client().await?;
        let resp = kv.get(key, None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn close(&self) {
        if self.kv.lock().await.take().is_some() {
            debug!("Closed etcd session");
        }
    }
}
