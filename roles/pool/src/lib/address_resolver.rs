//! Resolves worker credentials to blockchain payout addresses. Hits are
//! cached; a wall-clock timer clears the whole cache every hour (there is
//! no per-entry TTL). Misses are intentionally not cached — the
//! login-failure ban is what protects the database from repeated bad
//! credentials.

use crate::{
    repository::{MinerRepository, RepositoryError},
    task_manager::TaskManager,
    utils::ShutdownMessage,
};
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::broadcast;
use tracing::debug;

const CACHE_EVICTION_INTERVAL: Duration = Duration::from_secs(3600);

pub struct AddressResolver {
    pool_id: String,
    repository: Arc<dyn MinerRepository>,
    cache: Mutex<HashMap<String, String>>,
}

impl AddressResolver {
    pub fn new(pool_id: String, repository: Arc<dyn MinerRepository>) -> Self {
        Self {
            pool_id,
            repository,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn sha256_hex(input: &str) -> String {
        hex::encode(Sha256::digest(input.as_bytes()))
    }

    /// `(workerName, password)` → payout address. Empty credentials resolve
    /// to nothing without touching the store.
    pub async fn resolve(
        &self,
        worker_name: &str,
        password: &str,
    ) -> Result<Option<String>, RepositoryError> {
        if worker_name.is_empty() || password.is_empty() {
            return Ok(None);
        }
        let password_hash = Self::sha256_hex(password);
        let key = format!("{worker_name}:{password_hash}");
        if let Some(address) = self.cache.lock().unwrap().get(&key).cloned() {
            return Ok(Some(address));
        }
        let resolved = self
            .repository
            .worker_address(&self.pool_id, worker_name, &password_hash)
            .await?;
        if let Some(address) = &resolved {
            self.cache.lock().unwrap().insert(key, address.clone());
        }
        Ok(resolved)
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }

    /// Full eviction on a timer tick; the timer shares the cache lock with
    /// concurrent lookups.
    pub fn spawn_eviction_timer(
        self: Arc<Self>,
        task_manager: &TaskManager,
        mut shutdown: broadcast::Receiver<ShutdownMessage>,
    ) {
        let resolver = self;
        task_manager.spawn(async move {
            let mut interval = tokio::time::interval(CACHE_EVICTION_INTERVAL);
            interval.tick().await; // the immediate first tick
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        resolver.clear_cache();
                        debug!("address cache cleared");
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }
}
