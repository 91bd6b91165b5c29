//! Post-hoc replay of share statistics that were diverted to the on-disk
//! recovery file. Replay is a manual operator action and bypasses the
//! recorder's fault policy: a failing insert aborts the run and surfaces
//! the error instead of deferring it again.

use super::ShareStatistic;
use crate::{
    error::PoolError,
    repository::ShareStatisticRepository,
};
use std::{
    path::Path,
    time::{Duration, Instant},
};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};
use tracing::{info, warn};

const REPLAY_BUFFER: usize = 100;
const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub imported: usize,
    pub malformed: usize,
}

/// Reads the file line by line, skipping blanks and `#` comments, and
/// replays the statistics into the repository in buffers of
/// [`REPLAY_BUFFER`]. Progress is logged every [`PROGRESS_INTERVAL`].
pub async fn recover_shares(
    repository: &dyn ShareStatisticRepository,
    path: &Path,
) -> Result<RecoveryReport, PoolError> {
    info!("replaying share statistics from {}", path.display());
    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();

    let mut report = RecoveryReport::default();
    let mut buffer: Vec<ShareStatistic> = Vec::with_capacity(REPLAY_BUFFER);
    let mut last_progress = Instant::now();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<ShareStatistic>(line) {
            Ok(statistic) => {
                buffer.push(statistic);
                if buffer.len() >= REPLAY_BUFFER {
                    repository
                        .batch_insert(&buffer)
                        .await
                        .map_err(PoolError::Repository)?;
                    report.imported += buffer.len();
                    buffer.clear();
                }
            }
            Err(e) => {
                warn!("skipping malformed recovery line: {e}");
                report.malformed += 1;
            }
        }
        if last_progress.elapsed() >= PROGRESS_INTERVAL {
            info!(
                "recovery progress: {} share statistics imported so far",
                report.imported + buffer.len()
            );
            last_progress = Instant::now();
        }
    }

    if !buffer.is_empty() {
        repository
            .batch_insert(&buffer)
            .await
            .map_err(PoolError::Repository)?;
        report.imported += buffer.len();
    }

    info!(
        "share recovery complete: {} imported, {} malformed",
        report.imported, report.malformed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryError;
    use async_trait::async_trait;
    use std::{
        io::Write,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    #[derive(Default)]
    struct CapturingRepository {
        batches: AtomicUsize,
        records: Mutex<Vec<ShareStatistic>>,
    }

    #[async_trait]
    impl ShareStatisticRepository for CapturingRepository {
        async fn batch_insert(&self, records: &[ShareStatistic]) -> Result<(), RepositoryError> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            self.records.lock().unwrap().extend_from_slice(records);
            Ok(())
        }
    }

    fn write_file(lines: &[String]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn statistic_line(miner: &str) -> String {
        serde_json::to_string(&crate::share_recorder::tests::statistic(miner)).unwrap()
    }

    #[tokio::test]
    async fn replay_skips_comments_and_blanks() {
        let lines = vec![
            "# header line one".to_string(),
            "# header line two".to_string(),
            "# header line three".to_string(),
            String::new(),
            statistic_line("alice"),
            String::new(),
            statistic_line("bob"),
        ];
        let file = write_file(&lines);
        let repository = CapturingRepository::default();
        let report = recover_shares(&repository, file.path()).await.unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                imported: 2,
                malformed: 0
            }
        );
        let records = repository.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].miner, "alice");
        assert_eq!(records[1].miner, "bob");
    }

    #[tokio::test]
    async fn malformed_lines_are_counted_not_fatal() {
        let lines = vec![
            statistic_line("alice"),
            "{not json".to_string(),
            statistic_line("bob"),
        ];
        let file = write_file(&lines);
        let repository = CapturingRepository::default();
        let report = recover_shares(&repository, file.path()).await.unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.malformed, 1);
    }

    #[tokio::test]
    async fn replay_flushes_in_buffers_of_one_hundred() {
        let lines: Vec<String> = (0..250).map(|i| statistic_line(&format!("m{i}"))).collect();
        let file = write_file(&lines);
        let repository = CapturingRepository::default();
        let report = recover_shares(&repository, file.path()).await.unwrap();
        assert_eq!(report.imported, 250);
        // two full buffers plus the remainder at end of file
        assert_eq!(repository.batches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn replay_imports_everything_the_fallback_wrote() {
        use crate::{
            config::AdminNotificationsConfig,
            share_recorder::{RecorderPolicy, ShareRecorder},
        };
        use std::{sync::Arc, time::Duration};

        struct AlwaysDown;

        #[async_trait]
        impl ShareStatisticRepository for AlwaysDown {
            async fn batch_insert(
                &self,
                _records: &[ShareStatistic],
            ) -> Result<(), RepositoryError> {
                Err(RepositoryError::Timeout("statement timeout".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let recovery_file = dir.path().join("recovered.txt");
        let (_tx, rx) = async_channel::unbounded();
        let mut recorder = ShareRecorder::new(
            rx,
            Arc::new(AlwaysDown),
            recovery_file.clone(),
            AdminNotificationsConfig::default(),
            None,
        )
        .with_policy(RecorderPolicy {
            backoff_unit: Duration::from_millis(1),
            ..RecorderPolicy::default()
        });

        let diverted = vec![
            crate::share_recorder::tests::statistic("alice"),
            crate::share_recorder::tests::statistic("bob"),
            crate::share_recorder::tests::statistic("carol"),
        ];
        recorder.persist_batch(diverted[..2].to_vec()).await;
        recorder.persist_batch(diverted[2..].to_vec()).await;

        let repository = CapturingRepository::default();
        let report = recover_shares(&repository, &recovery_file).await.unwrap();
        assert_eq!(report.imported, 3);
        assert_eq!(report.malformed, 0);
        assert_eq!(*repository.records.lock().unwrap(), diverted);
    }

    #[tokio::test]
    async fn insert_failures_surface_instead_of_deferring() {
        struct BrokenRepository;

        #[async_trait]
        impl ShareStatisticRepository for BrokenRepository {
            async fn batch_insert(
                &self,
                _records: &[ShareStatistic],
            ) -> Result<(), RepositoryError> {
                Err(RepositoryError::Db("relation does not exist".into()))
            }
        }

        let file = write_file(&[statistic_line("alice")]);
        let err = recover_shares(&BrokenRepository, file.path())
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Repository(_)));
    }
}
