//! Per-connection worker state. Each TCP connection owns exactly one
//! [`WorkerContext`]; handlers for a connection are serialized, so no
//! interior locking is needed.

use crate::vardiff::VardiffState;
use std::{net::SocketAddr, time::Instant};
use sv1_api::utils::HexU32Be;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub valid_shares: u64,
    pub invalid_shares: u64,
}

#[derive(Debug)]
pub struct WorkerContext {
    pub connection_id: String,
    pub is_subscribed: bool,
    pub is_authorized: bool,
    pub user_agent: Option<String>,
    /// Validated payout address once authorized.
    pub miner: Option<String>,
    /// Free-form worker name; the device label is its first `.` segment.
    pub worker: Option<String>,
    difficulty: f64,
    pending_difficulty: Option<f64>,
    /// `None` means vardiff is disabled on this connection.
    pub vardiff: Option<VardiffState>,
    pub version_rolling_mask: Option<HexU32Be>,
    pub last_activity: Instant,
    pub stats: WorkerStats,
    pub remote_addr: SocketAddr,
    pub local_addr: SocketAddr,
}

impl WorkerContext {
    pub fn new(
        connection_id: String,
        base_difficulty: f64,
        vardiff: Option<VardiffState>,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> Self {
        Self {
            connection_id,
            is_subscribed: false,
            is_authorized: false,
            user_agent: None,
            miner: None,
            worker: None,
            difficulty: base_difficulty,
            pending_difficulty: None,
            vardiff,
            version_rolling_mask: None,
            last_activity: Instant::now(),
            stats: WorkerStats::default(),
            remote_addr,
            local_addr,
        }
    }

    /// The difficulty the client currently mines against.
    pub fn difficulty(&self) -> f64 {
        self.difficulty
    }

    pub fn pending_difficulty(&self) -> Option<f64> {
        self.pending_difficulty
    }

    /// Stages a new difficulty without touching the active one. The client
    /// observes it only after [`Self::apply_pending_difficulty`] and a
    /// `mining.set_difficulty` notification, which lets a difficulty change
    /// and a job ride the same write.
    pub fn set_difficulty(&mut self, difficulty: f64) {
        self.pending_difficulty = Some(difficulty);
    }

    /// Promotes a staged difficulty. Idempotent until the next
    /// [`Self::set_difficulty`].
    pub fn apply_pending_difficulty(&mut self) -> bool {
        match self.pending_difficulty.take() {
            Some(difficulty) => {
                self.difficulty = difficulty;
                true
            }
            None => false,
        }
    }

    /// Device label used in share statistics: the first `.`-separated
    /// segment of the worker name.
    pub fn worker_device(&self) -> Option<String> {
        self.worker
            .as_deref()
            .map(|w| w.split('.').next().unwrap_or_default().to_string())
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn test_context(base_difficulty: f64) -> WorkerContext {
        WorkerContext::new(
            "deadbeefdeadbeef".into(),
            base_difficulty,
            None,
            "203.0.113.7:49152".parse().unwrap(),
            "0.0.0.0:3333".parse().unwrap(),
        )
    }

    #[test]
    fn fresh_context_is_neither_subscribed_nor_authorized() {
        let ctx = test_context(16.0);
        assert!(!ctx.is_subscribed);
        assert!(!ctx.is_authorized);
        assert_eq!(ctx.difficulty(), 16.0);
        assert!(ctx.pending_difficulty().is_none());
    }

    #[test]
    fn set_difficulty_stages_without_applying() {
        let mut ctx = test_context(16.0);
        ctx.set_difficulty(1024.0);
        assert_eq!(ctx.difficulty(), 16.0);
        assert_eq!(ctx.pending_difficulty(), Some(1024.0));
    }

    #[test]
    fn apply_pending_difficulty_is_idempotent() {
        let mut ctx = test_context(16.0);
        ctx.set_difficulty(1024.0);
        assert!(ctx.apply_pending_difficulty());
        assert_eq!(ctx.difficulty(), 1024.0);
        assert!(!ctx.apply_pending_difficulty());
        assert!(!ctx.apply_pending_difficulty());
        ctx.set_difficulty(2048.0);
        assert!(ctx.apply_pending_difficulty());
        assert_eq!(ctx.difficulty(), 2048.0);
    }

    #[test]
    fn worker_device_takes_first_segment() {
        let mut ctx = test_context(16.0);
        assert!(ctx.worker_device().is_none());
        ctx.worker = Some("rig1.gpu0".into());
        assert_eq!(ctx.worker_device().as_deref(), Some("rig1"));
        ctx.worker = Some("plain".into());
        assert_eq!(ctx.worker_device().as_deref(), Some("plain"));
    }
}
