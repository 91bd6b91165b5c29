//! In-process collaborators: a synthetic job source, a permissive share
//! validator and in-memory repositories. They let the front-end run
//! end-to-end without a daemon or a database, and back the integration
//! tests. Production deployments wire daemon- and database-backed
//! implementations of the same traits instead.

use crate::{
    address_resolver::AddressResolver,
    error::PoolError,
    job_manager::{JobManager, JobParams, Share, SubscriberData},
    repository::{MinerRepository, RepositoryError, ShareStatisticRepository},
    share_recorder::ShareStatistic,
    worker::WorkerContext,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use sv1_api::{client_to_server::Submit, StratumError};
use tracing::debug;

/// Synthetic job source and permissive validator. Jobs are emitted on
/// demand or on a ticker; submissions are accepted unless they repeat a
/// `(job, nonce)` pair.
pub struct DevJobManager {
    pool_id: String,
    jobs_tx: async_channel::Sender<JobParams>,
    jobs_rx: async_channel::Receiver<JobParams>,
    job_counter: AtomicU64,
    extranonce_counter: AtomicU32,
    seen_nonces: Mutex<HashSet<String>>,
    network_difficulty: f64,
}

impl DevJobManager {
    pub fn new(pool_id: &str) -> Self {
        let (jobs_tx, jobs_rx) = async_channel::unbounded();
        Self {
            pool_id: pool_id.to_string(),
            jobs_tx,
            jobs_rx,
            job_counter: AtomicU64::new(0),
            extranonce_counter: AtomicU32::new(0),
            seen_nonces: Mutex::new(HashSet::new()),
            network_difficulty: 1_000_000.0,
        }
    }

    /// Builds and emits one synthetic job, returning its parameters.
    pub fn emit_job(&self) -> JobParams {
        let height = self.job_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let job = JobParams(vec![
            json!(format!("{height:x}")),
            json!("0000000000000000000000000000000000000000000000000000000000000000"),
            json!("01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff"),
            json!("ffffffff0100f2052a010000001976a914000000000000000000000000000000000000000088ac00000000"),
            Value::Array(Vec::new()),
            json!("20000000"),
            json!("207fffff"),
            json!(format!("{:x}", Utc::now().timestamp())),
            json!(true),
        ]);
        debug!("emitting synthetic job {}", job.job_id());
        let _ = self.jobs_tx.try_send(job.clone());
        job
    }

    pub fn spawn_job_ticker(self: Arc<Self>, interval: Duration) {
        let manager = self;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                manager.emit_job();
            }
        });
    }
}

#[async_trait]
impl JobManager for DevJobManager {
    async fn validate_address(&self, address: &str) -> Result<bool, PoolError> {
        // shape check only: base58-looking and long enough
        Ok(address.len() >= 26
            && address.len() <= 90
            && address.chars().all(|c| c.is_ascii_alphanumeric()))
    }

    async fn submit_share(
        &self,
        ctx: &WorkerContext,
        submit: &Submit,
    ) -> Result<Share, StratumError> {
        let key = format!("{}:{}", submit.job_id, submit.nonce);
        if !self.seen_nonces.lock().unwrap().insert(key) {
            return Err(StratumError::duplicate_share());
        }
        Ok(Share {
            pool_id: self.pool_id.clone(),
            block_height: self.job_counter.load(Ordering::SeqCst),
            difficulty: ctx.difficulty(),
            network_difficulty: self.network_difficulty,
            miner: ctx.miner.clone().unwrap_or_default(),
            worker: ctx.worker.clone(),
            user_agent: ctx.user_agent.clone(),
            ip_address: ctx.remote_addr.ip().to_string(),
            source: None,
            created: Utc::now(),
            is_block_candidate: false,
            is_valid: true,
        })
    }

    fn subscriber_data(&self, _connection_id: &str) -> SubscriberData {
        let serial = self.extranonce_counter.fetch_add(1, Ordering::SeqCst) + 1;
        SubscriberData {
            extra_nonce1: format!("{serial:08x}"),
            extra_nonce2_size: 4,
        }
    }

    fn jobs(&self) -> async_channel::Receiver<JobParams> {
        self.jobs_rx.clone()
    }
}

/// Worker-credential store backed by a map.
#[derive(Default)]
pub struct MemoryMinerRepository {
    accounts: Mutex<HashMap<(String, String), String>>,
}

impl MemoryMinerRepository {
    pub fn with_account(self, worker_name: &str, password: &str, address: &str) -> Self {
        self.accounts.lock().unwrap().insert(
            (
                worker_name.to_string(),
                AddressResolver::sha256_hex(password),
            ),
            address.to_string(),
        );
        self
    }
}

#[async_trait]
impl MinerRepository for MemoryMinerRepository {
    async fn worker_address(
        &self,
        _pool_id: &str,
        worker_name: &str,
        password_hash: &str,
    ) -> Result<Option<String>, RepositoryError> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .get(&(worker_name.to_string(), password_hash.to_string()))
            .cloned())
    }
}

/// Share-statistic sink backed by a vector.
#[derive(Default)]
pub struct MemoryShareRepository {
    records: Mutex<Vec<ShareStatistic>>,
}

impl MemoryShareRepository {
    pub fn records(&self) -> Vec<ShareStatistic> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShareStatisticRepository for MemoryShareRepository {
    async fn batch_insert(&self, records: &[ShareStatistic]) -> Result<(), RepositoryError> {
        self.records.lock().unwrap().extend_from_slice(records);
        Ok(())
    }
}
