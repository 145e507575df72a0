//! # Endpoint Dispatch
//!
//! Glue between the transport boundary and the executor: one
//! [`RpcHandler`] that owns the engine's moving parts and routes each
//! endpoint code to its handler. Construction wires the provider, the byte
//! pool and the eviction sweeper from one [`HubConfig`].

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;

use tr_rpc::cancel::CancelToken;
use tr_rpc::pool::BytesPool;
use tr_rpc::{Endpoint, Reply, RpcHandler};

use crate::config::HubConfig;
use crate::cursor::Storage;
use crate::provider::CursorProvider;
use crate::querier::ServerQuerier;

pub struct HubService {
    querier: ServerQuerier,
    provider: Arc<CursorProvider>,
    sweeper: Option<JoinHandle<()>>,
}

impl HubService {
    /// Wire the engine over a storage backend. Spawns the idle-eviction
    /// sweeper; it stops when the service is dropped.
    pub fn new(storage: Arc<dyn Storage>, config: HubConfig) -> Self {
        let provider = Arc::new(CursorProvider::new(
            Arc::clone(&storage),
            config.cursor_idle(),
        ));
        let pool = BytesPool::new(config.pool_buffers, 4096);
        let sweeper = provider.spawn_sweeper(config.sweep_interval());
        let querier = ServerQuerier::new(Arc::clone(&provider), storage, pool, config);
        Self {
            querier,
            provider,
            sweeper: Some(sweeper),
        }
    }

    pub fn provider(&self) -> &Arc<CursorProvider> {
        &self.provider
    }
}

impl Drop for HubService {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

#[async_trait]
impl RpcHandler for HubService {
    async fn handle(&self, cancel: &CancelToken, endpoint: Endpoint, body: &[u8]) -> Reply {
        match endpoint {
            Endpoint::Query => self.querier.query(cancel, body).await,
            Endpoint::Sources => self.querier.sources(body).await,
        }
    }
}
