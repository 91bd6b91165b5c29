//! Asynchronous share-statistic persistence. Share events are buffered by
//! time and count, then written through a layered fault policy:
//!
//! 1. retry with exponential backoff on transient repository errors;
//! 2. a circuit breaker that opens after consecutive exhausted batches and
//!    short-circuits further attempts for a cool-down window;
//! 3. an on-disk append fallback that captures every batch the database
//!    refused, for manual replay later.
//!
//! Batches are strictly serialized: a batch fully resolves (success,
//! fallback, or fatal log) before the next one starts, because a single
//! consumer loop owns the whole pipeline.

pub mod recovery;

use crate::{
    config::AdminNotificationsConfig,
    repository::{RepositoryError, ShareStatisticRepository},
    task_manager::TaskManager,
    utils::ShutdownMessage,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{io::AsyncWriteExt, sync::{broadcast, mpsc}};
use tracing::{debug, error, info, warn};

/// Flattened, denormalized projection of a share, one row per submission,
/// persisted for downstream payout accounting. Serialized one JSON object
/// per line in the recovery file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShareStatistic {
    pub pool_id: String,
    pub block_height: u64,
    pub difficulty: f64,
    pub network_difficulty: f64,
    pub miner: String,
    /// Device label: the worker name's first `.` segment.
    pub worker: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: String,
    pub source: Option<String>,
    pub created: DateTime<Utc>,
    pub is_valid: bool,
}

/// One-shot operator notifications emitted by the recorder.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminNotification {
    /// The first batch was diverted to the recovery file.
    ShareRecoveryStarted { file: PathBuf },
}

/// Tuning knobs for the fault policy. The defaults are the production
/// values; tests shrink the durations.
#[derive(Debug, Clone)]
pub struct RecorderPolicy {
    pub window: Duration,
    pub max_batch: usize,
    pub max_retries: u32,
    /// Retry n sleeps `2^n * backoff_unit`.
    pub backoff_unit: Duration,
    /// Consecutive exhausted batches before the circuit opens.
    pub break_after: u32,
    pub break_duration: Duration,
}

impl Default for RecorderPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5),
            max_batch: 1000,
            max_retries: 3,
            backoff_unit: Duration::from_secs(1),
            break_after: 2,
            break_duration: Duration::from_secs(60),
        }
    }
}

const RECOVERY_HEADER: &str = "\
# share-statistic recovery file: the database was unreachable.\n\
# Each following line is one JSON-encoded share statistic.\n\
# Replay with: forgepool --config <config.toml> --recover <this file>\n";

pub struct ShareRecorder {
    receiver: async_channel::Receiver<ShareStatistic>,
    repository: Arc<dyn ShareStatisticRepository>,
    recovery_file: PathBuf,
    notifications: AdminNotificationsConfig,
    notification_tx: Option<async_channel::Sender<AdminNotification>>,
    policy: RecorderPolicy,
    consecutive_failures: u32,
    circuit_open_until: Option<Instant>,
    fallback_notified: bool,
    fallback_broken: bool,
}

impl ShareRecorder {
    pub fn new(
        receiver: async_channel::Receiver<ShareStatistic>,
        repository: Arc<dyn ShareStatisticRepository>,
        recovery_file: PathBuf,
        notifications: AdminNotificationsConfig,
        notification_tx: Option<async_channel::Sender<AdminNotification>>,
    ) -> Self {
        Self {
            receiver,
            repository,
            recovery_file,
            notifications,
            notification_tx,
            policy: RecorderPolicy::default(),
            consecutive_failures: 0,
            circuit_open_until: None,
            fallback_notified: false,
            fallback_broken: false,
        }
    }

    pub fn with_policy(mut self, policy: RecorderPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn spawn(
        self,
        task_manager: &TaskManager,
        shutdown: broadcast::Receiver<ShutdownMessage>,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) {
        task_manager.spawn(async move {
            self.run(shutdown).await;
            drop(shutdown_complete_tx);
        });
    }

    async fn run(mut self, mut shutdown: broadcast::Receiver<ShutdownMessage>) {
        info!(
            "share recorder started (window {:?}, max batch {})",
            self.policy.window, self.policy.max_batch
        );
        loop {
            let (batch, stop) = self.collect_window(&mut shutdown).await;
            if !batch.is_empty() {
                self.persist_batch(batch).await;
            }
            if stop {
                break;
            }
        }
        info!("share recorder stopped");
    }

    /// Buffers events until the window elapses or the count cap is hit.
    /// On shutdown the queue is drained so the final window is not lost.
    async fn collect_window(
        &mut self,
        shutdown: &mut broadcast::Receiver<ShutdownMessage>,
    ) -> (Vec<ShareStatistic>, bool) {
        let mut batch = Vec::new();
        let deadline = tokio::time::Instant::now() + self.policy.window;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return (batch, false),
                _ = shutdown.recv() => {
                    while let Ok(statistic) = self.receiver.try_recv() {
                        batch.push(statistic);
                    }
                    return (batch, true);
                }
                received = self.receiver.recv() => match received {
                    Ok(statistic) => {
                        batch.push(statistic);
                        if batch.len() >= self.policy.max_batch {
                            return (batch, false);
                        }
                    }
                    // every producer dropped its sender
                    Err(_) => return (batch, true),
                }
            }
        }
    }

    async fn persist_batch(&mut self, batch: Vec<ShareStatistic>) {
        debug!("persisting {} share statistics", batch.len());
        if let Some(open_until) = self.circuit_open_until {
            if Instant::now() < open_until {
                warn!(
                    "circuit open, diverting {} share statistics to the recovery file",
                    batch.len()
                );
                self.fallback(&batch).await;
                return;
            }
            self.circuit_open_until = None;
        }
        match self.persist_with_retry(&batch).await {
            Ok(()) => {
                self.consecutive_failures = 0;
            }
            Err(e) => {
                self.consecutive_failures += 1;
                error!(
                    "failed to persist {} share statistics after retries: {e}",
                    batch.len()
                );
                if self.consecutive_failures >= self.policy.break_after {
                    warn!(
                        "opening circuit for {:?} after {} consecutive failed batches",
                        self.policy.break_duration, self.consecutive_failures
                    );
                    self.circuit_open_until = Some(Instant::now() + self.policy.break_duration);
                }
                self.fallback(&batch).await;
            }
        }
    }

    async fn persist_with_retry(&self, batch: &[ShareStatistic]) -> Result<(), RepositoryError> {
        let mut attempt = 0u32;
        loop {
            match self.repository.batch_insert(batch).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let delay = self.policy.backoff_unit * (1u32 << attempt);
                    warn!("share persistence attempt {attempt} failed ({e}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Routes a refused batch to the recovery file. The first successful
    /// diversion raises a one-shot admin notification; if the file itself
    /// cannot be written, one fatal log is emitted and everything after
    /// that is dropped silently for the operator to investigate.
    async fn fallback(&mut self, batch: &[ShareStatistic]) {
        if self.fallback_broken {
            return;
        }
        match self.append_to_recovery_file(batch).await {
            Ok(()) => {
                info!(
                    "{} share statistics written to {}",
                    batch.len(),
                    self.recovery_file.display()
                );
                if !self.fallback_notified {
                    self.fallback_notified = true;
                    if self.notifications.enabled {
                        if let Some(tx) = &self.notification_tx {
                            let _ = tx.try_send(AdminNotification::ShareRecoveryStarted {
                                file: self.recovery_file.clone(),
                            });
                        }
                    }
                }
            }
            Err(e) => {
                error!(
                    "LOST {} share statistics: recovery file {} is not writable: {e}",
                    batch.len(),
                    self.recovery_file.display()
                );
                self.fallback_broken = true;
            }
        }
    }

    async fn append_to_recovery_file(&self, batch: &[ShareStatistic]) -> std::io::Result<()> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.recovery_file)
            .await?;
        let newly_created = file.metadata().await?.len() == 0;
        let mut writer = tokio::io::BufWriter::new(file);
        if newly_created {
            writer.write_all(RECOVERY_HEADER.as_bytes()).await?;
        }
        for statistic in batch {
            let line = serde_json::to_string(statistic)?;
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    pub(crate) fn statistic(miner: &str) -> ShareStatistic {
        ShareStatistic {
            pool_id: "btc1".into(),
            block_height: 840_000,
            difficulty: 16.0,
            network_difficulty: 86_388_558_925_171.02,
            miner: miner.into(),
            worker: Some("rig1".into()),
            user_agent: Some("cgminer/4.11".into()),
            ip_address: "203.0.113.7".into(),
            source: None,
            created: Utc::now(),
            is_valid: true,
        }
    }

    /// Repository that fails its first `fail_first` calls, then succeeds.
    struct FlakyRepository {
        fail_first: usize,
        calls: AtomicUsize,
        inserted: Mutex<Vec<ShareStatistic>>,
    }

    impl FlakyRepository {
        fn failing(fail_first: usize) -> Self {
            Self {
                fail_first,
                calls: AtomicUsize::new(0),
                inserted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ShareStatisticRepository for FlakyRepository {
        async fn batch_insert(&self, records: &[ShareStatistic]) -> Result<(), RepositoryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(RepositoryError::Socket("connection refused".into()))
            } else {
                self.inserted.lock().unwrap().extend_from_slice(records);
                Ok(())
            }
        }
    }

    fn fast_policy() -> RecorderPolicy {
        RecorderPolicy {
            window: Duration::from_millis(20),
            max_batch: 1000,
            max_retries: 3,
            backoff_unit: Duration::from_millis(1),
            break_after: 2,
            break_duration: Duration::from_secs(60),
        }
    }

    fn recorder(
        repository: Arc<FlakyRepository>,
        recovery_file: PathBuf,
        enabled_notifications: bool,
        notification_tx: Option<async_channel::Sender<AdminNotification>>,
    ) -> (ShareRecorder, async_channel::Sender<ShareStatistic>) {
        let (tx, rx) = async_channel::unbounded();
        let recorder = ShareRecorder::new(
            rx,
            repository,
            recovery_file,
            AdminNotificationsConfig {
                enabled: enabled_notifications,
                notify_payment_success: false,
            },
            notification_tx,
        )
        .with_policy(fast_policy());
        (recorder, tx)
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let repository = Arc::new(FlakyRepository::failing(2));
        let dir = tempfile::tempdir().unwrap();
        let (mut recorder, _tx) = recorder(
            repository.clone(),
            dir.path().join("recovered.txt"),
            false,
            None,
        );

        recorder.persist_batch(vec![statistic("alice")]).await;
        // 2 failures + 1 success
        assert_eq!(repository.calls.load(Ordering::SeqCst), 3);
        assert_eq!(repository.inserted.lock().unwrap().len(), 1);
        assert_eq!(recorder.consecutive_failures, 0);
        assert!(!dir.path().join("recovered.txt").exists());
    }

    #[tokio::test]
    async fn db_outage_escalates_retry_then_breaker_then_file() {
        let repository = Arc::new(FlakyRepository::failing(usize::MAX));
        let dir = tempfile::tempdir().unwrap();
        let recovery_file = dir.path().join("recovered.txt");
        let (notification_tx, notification_rx) = async_channel::unbounded();
        let (mut recorder, _tx) = recorder(
            repository.clone(),
            recovery_file.clone(),
            true,
            Some(notification_tx),
        );

        for miner in ["m1", "m2", "m3", "m4", "m5"] {
            recorder.persist_batch(vec![statistic(miner)]).await;
        }

        // batches 1 and 2 exhaust retries (4 calls each); the circuit is
        // open by batch 3, so batches 3-5 never touch the repository
        assert_eq!(repository.calls.load(Ordering::SeqCst), 8);
        assert!(recorder.circuit_open_until.is_some());

        let content = std::fs::read_to_string(&recovery_file).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 8); // 3-line header + 5 diverted batches
        assert!(lines[0].starts_with('#'));
        assert!(lines[1].starts_with('#'));
        assert!(lines[2].starts_with('#'));
        for (line, miner) in lines[3..].iter().zip(["m1", "m2", "m3", "m4", "m5"]) {
            let parsed: ShareStatistic = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.miner, miner);
        }

        // exactly one admin notification for the whole outage
        let notification = notification_rx.try_recv().unwrap();
        assert_eq!(
            notification,
            AdminNotification::ShareRecoveryStarted {
                file: recovery_file
            }
        );
        assert!(notification_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_circuit_recovers_after_cool_down() {
        let repository = Arc::new(FlakyRepository::failing(8));
        let dir = tempfile::tempdir().unwrap();
        let (mut recorder, _tx) = recorder(
            repository.clone(),
            dir.path().join("recovered.txt"),
            false,
            None,
        );
        recorder.policy.break_duration = Duration::from_millis(1);

        recorder.persist_batch(vec![statistic("m1")]).await;
        recorder.persist_batch(vec![statistic("m2")]).await;
        assert!(recorder.circuit_open_until.is_some());

        tokio::time::sleep(Duration::from_millis(5)).await;
        recorder.persist_batch(vec![statistic("m3")]).await;
        assert_eq!(recorder.consecutive_failures, 0);
        assert!(recorder.circuit_open_until.is_none());
        assert_eq!(repository.inserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn notification_is_suppressed_when_admin_disabled() {
        let repository = Arc::new(FlakyRepository::failing(usize::MAX));
        let dir = tempfile::tempdir().unwrap();
        let (notification_tx, notification_rx) = async_channel::unbounded();
        let (mut recorder, _tx) = recorder(
            repository,
            dir.path().join("recovered.txt"),
            false,
            Some(notification_tx),
        );

        recorder.persist_batch(vec![statistic("m1")]).await;
        assert!(notification_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn recorder_drains_pending_shares_on_shutdown() {
        let repository = Arc::new(FlakyRepository::failing(0));
        let dir = tempfile::tempdir().unwrap();
        let (recorder, tx) = recorder(
            repository.clone(),
            dir.path().join("recovered.txt"),
            false,
            None,
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tx.send(statistic("m1")).await.unwrap();
        tx.send(statistic("m2")).await.unwrap();
        shutdown_tx.send(ShutdownMessage::ShutdownAll).unwrap();

        recorder.run(shutdown_rx).await;
        assert_eq!(repository.inserted.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn permanent_errors_skip_the_retry_loop() {
        struct PermanentFailure;

        #[async_trait]
        impl ShareStatisticRepository for PermanentFailure {
            async fn batch_insert(
                &self,
                _records: &[ShareStatistic],
            ) -> Result<(), RepositoryError> {
                Err(RepositoryError::Other("constraint violation".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = async_channel::unbounded();
        drop(tx);
        let mut recorder = ShareRecorder::new(
            rx,
            Arc::new(PermanentFailure),
            dir.path().join("recovered.txt"),
            AdminNotificationsConfig::default(),
            None,
        )
        .with_policy(fast_policy());

        let started = Instant::now();
        recorder.persist_batch(vec![statistic("m1")]).await;
        // no backoff sleeps for a non-transient error
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(recorder.consecutive_failures, 1);
        assert!(dir.path().join("recovered.txt").exists());
    }
}
