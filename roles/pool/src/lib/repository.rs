//! Persistence seams. The front-end never talks SQL itself; it depends on a
//! worker-address lookup and a batch insert, both implemented by the
//! database layer that hosts it.

use crate::share_recorder::ShareStatistic;
use async_trait::async_trait;
use std::fmt;

/// Classified so the recorder's retry policy can tell transient faults
/// (connection loss, timeouts) from permanent ones (constraint violations,
/// bad schema).
#[derive(Debug, Clone, PartialEq)]
pub enum RepositoryError {
    Db(String),
    Socket(String),
    Timeout(String),
    Other(String),
}

impl RepositoryError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, RepositoryError::Other(_))
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryError::Db(e) => write!(f, "database error: {e}"),
            RepositoryError::Socket(e) => write!(f, "socket error: {e}"),
            RepositoryError::Timeout(e) => write!(f, "timeout: {e}"),
            RepositoryError::Other(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RepositoryError {}

#[async_trait]
pub trait MinerRepository: Send + Sync {
    /// Single transactional lookup of
    /// `(pool, workerName, sha256(password))` → payout address.
    async fn worker_address(
        &self,
        pool_id: &str,
        worker_name: &str,
        password_hash: &str,
    ) -> Result<Option<String>, RepositoryError>;
}

#[async_trait]
pub trait ShareStatisticRepository: Send + Sync {
    /// Inserts the batch inside a single transaction: either every record
    /// lands or none does. Implementations are expected to use a bulk-copy
    /// path where the backend offers one.
    async fn batch_insert(&self, records: &[ShareStatistic]) -> Result<(), RepositoryError>;
}
