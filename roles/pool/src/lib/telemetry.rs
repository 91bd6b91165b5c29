//! Share-submit telemetry: outcome counters and wall-clock latency,
//! published out-of-band. Recording is a handful of atomic stores so the
//! submit hot path never blocks on it.

use crate::{task_manager::TaskManager, utils::ShutdownMessage};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::broadcast;
use tracing::info;

const REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
pub struct Telemetry {
    accepted: AtomicU64,
    rejected: AtomicU64,
    latency_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub avg_latency: Duration,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_share(&self, elapsed: Duration, accepted: bool) {
        if accepted {
            self.accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let accepted = self.accepted.load(Ordering::Relaxed);
        let rejected = self.rejected.load(Ordering::Relaxed);
        let samples = accepted + rejected;
        let avg_latency = if samples == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.latency_micros.load(Ordering::Relaxed) / samples)
        };
        TelemetrySnapshot {
            accepted,
            rejected,
            avg_latency,
        }
    }

    pub fn spawn_reporter(
        self: Arc<Self>,
        task_manager: &TaskManager,
        mut shutdown: broadcast::Receiver<ShutdownMessage>,
    ) {
        let telemetry = self;
        task_manager.spawn(async move {
            let mut interval = tokio::time::interval(REPORT_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let snapshot = telemetry.snapshot();
                        info!(
                            "shares: {} accepted, {} rejected, avg submit latency {:?}",
                            snapshot.accepted, snapshot.rejected, snapshot.avg_latency
                        );
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }
}
