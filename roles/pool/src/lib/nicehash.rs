//! NiceHash marketplace integration. Rented hash power reports a minimum
//! acceptable difficulty out-of-band per algorithm; the controller consults
//! it at subscribe time for connections whose user agent identifies as the
//! marketplace client.

use async_trait::async_trait;
use std::collections::HashMap;

const AGENT_MARKER: &str = "nicehash";

pub fn is_nicehash_agent(user_agent: &str) -> bool {
    user_agent.to_ascii_lowercase().contains(AGENT_MARKER)
}

#[async_trait]
pub trait NicehashService: Send + Sync {
    /// The marketplace-imposed static minimum difficulty for
    /// `(coin, algorithm)`, if the agent is a marketplace client and the
    /// algorithm is listed.
    async fn static_min_diff(&self, user_agent: &str, coin: &str, algorithm: &str) -> Option<f64>;
}

/// Table-backed provider. The table is seeded from the marketplace's
/// published per-algorithm minimums and refreshed out-of-band.
#[derive(Debug, Default)]
pub struct StaticMinDiffTable {
    by_algorithm: HashMap<String, f64>,
}

impl StaticMinDiffTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, algorithm: &str, min_diff: f64) -> Self {
        self.by_algorithm
            .insert(algorithm.to_ascii_lowercase(), min_diff);
        self
    }
}

#[async_trait]
impl NicehashService for StaticMinDiffTable {
    async fn static_min_diff(&self, user_agent: &str, _coin: &str, algorithm: &str) -> Option<f64> {
        if !is_nicehash_agent(user_agent) {
            return None;
        }
        self.by_algorithm
            .get(&algorithm.to_ascii_lowercase())
            .copied()
    }
}
