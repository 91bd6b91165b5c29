//! The upstream job-manager seam. Block-template polling, merkle assembly
//! and proof-of-work checking all live behind [`JobManager`]; the front-end
//! only forwards job parameter tuples and hands submissions over for
//! validation.

use crate::{error::PoolError, worker::WorkerContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sv1_api::{client_to_server::Submit, StratumError};

/// The parameter tuple of a `mining.notify`, built upstream and forwarded
/// verbatim. Only the first element, the job id, is ever inspected here.
#[derive(Debug, Clone, PartialEq)]
pub struct JobParams(pub Vec<Value>);

impl JobParams {
    pub fn job_id(&self) -> &str {
        self.0.first().and_then(|v| v.as_str()).unwrap_or("?")
    }
}

/// Per-connection subscription data: the extranonce1 prefix reserved for
/// the connection and the extranonce2 length the miner must produce.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberData {
    pub extra_nonce1: String,
    pub extra_nonce2_size: usize,
}

/// A validated share as produced by the upstream validator.
#[derive(Debug, Clone, PartialEq)]
pub struct Share {
    pub pool_id: String,
    pub block_height: u64,
    pub difficulty: f64,
    pub network_difficulty: f64,
    pub miner: String,
    pub worker: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: String,
    pub source: Option<String>,
    pub created: DateTime<Utc>,
    pub is_block_candidate: bool,
    pub is_valid: bool,
}

#[async_trait]
pub trait JobManager: Send + Sync {
    /// Asks the coin daemon whether `address` is a valid payout address.
    async fn validate_address(&self, address: &str) -> Result<bool, PoolError>;

    /// Validates a submission against the connection's current difficulty.
    /// Rejections come back as Stratum-typed errors (stale job, duplicate,
    /// low difficulty) ready to be encoded for the client.
    async fn submit_share(
        &self,
        ctx: &WorkerContext,
        submit: &Submit,
    ) -> Result<Share, StratumError>;

    /// Extranonce assignment for a freshly subscribed connection.
    fn subscriber_data(&self, connection_id: &str) -> SubscriberData;

    /// The lazy stream of job parameter tuples this manager emits.
    fn jobs(&self) -> async_channel::Receiver<JobParams>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_id_reads_first_element() {
        let job = JobParams(vec![json!("1b"), json!("prevhash")]);
        assert_eq!(job.job_id(), "1b");

        let odd = JobParams(vec![json!(17)]);
        assert_eq!(odd.job_id(), "?");
    }
}
