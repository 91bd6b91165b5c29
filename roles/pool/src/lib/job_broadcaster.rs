//! Fans upstream jobs out to every subscribed connection. A single
//! consumer loop owns the upstream stream: it swaps the shared current-job
//! slot, then broadcasts. Connection tasks perform their own writes, so a
//! stalled peer never blocks the fan-out and two job updates can never
//! interleave a connection's set_difficulty/notify pair.

use crate::{
    error::PoolError,
    job_manager::JobParams,
    status::{State, StatusSender},
    task_manager::TaskManager,
    utils::ShutdownMessage,
};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

const NOTIFY_CHANNEL_CAPACITY: usize = 32;

pub struct JobBroadcaster {
    jobs: async_channel::Receiver<JobParams>,
    current_job: Arc<RwLock<Option<JobParams>>>,
    notify_tx: broadcast::Sender<JobParams>,
}

impl JobBroadcaster {
    pub fn new(jobs: async_channel::Receiver<JobParams>) -> Self {
        let (notify_tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        Self {
            jobs,
            current_job: Arc::new(RwLock::new(None)),
            notify_tx,
        }
    }

    /// Shared slot holding the latest job; read at subscribe time.
    pub fn current_job(&self) -> Arc<RwLock<Option<JobParams>>> {
        self.current_job.clone()
    }

    /// Handle connection tasks use to subscribe to job updates.
    pub fn notify_sender(&self) -> broadcast::Sender<JobParams> {
        self.notify_tx.clone()
    }

    /// Blocks until the upstream stream yields its first job. Called before
    /// any listener starts accepting, so no client ever subscribes against
    /// an empty job slot.
    pub async fn wait_first_job(&self) -> Result<(), PoolError> {
        let job = self.jobs.recv().await?;
        info!("first job {} received from upstream", job.job_id());
        *self.current_job.write().unwrap() = Some(job.clone());
        let _ = self.notify_tx.send(job);
        Ok(())
    }

    pub fn spawn(
        self,
        task_manager: &TaskManager,
        mut shutdown: broadcast::Receiver<ShutdownMessage>,
        status_sender: StatusSender,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) {
        task_manager.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    job = self.jobs.recv() => match job {
                        Ok(job) => {
                            debug!("broadcasting job {}", job.job_id());
                            *self.current_job.write().unwrap() = Some(job.clone());
                            // no subscribed connections is not an error
                            let _ = self.notify_tx.send(job);
                        }
                        Err(e) => {
                            warn!("upstream job stream closed");
                            status_sender
                                .send(State::BroadcasterShutdown(PoolError::ChannelErrorReceiver(e)))
                                .await;
                            break;
                        }
                    }
                }
            }
            drop(shutdown_complete_tx);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(id: &str) -> JobParams {
        JobParams(vec![json!(id), json!("prevhash"), json!(true)])
    }

    #[tokio::test]
    async fn wait_first_job_fills_the_slot() {
        let (tx, rx) = async_channel::unbounded();
        let broadcaster = JobBroadcaster::new(rx);
        tx.send(job("1")).await.unwrap();
        broadcaster.wait_first_job().await.unwrap();
        let current = broadcaster.current_job();
        assert_eq!(current.read().unwrap().as_ref().unwrap().job_id(), "1");
    }

    #[tokio::test]
    async fn jobs_are_stored_before_being_broadcast() {
        let (tx, rx) = async_channel::unbounded();
        let broadcaster = JobBroadcaster::new(rx);
        let current = broadcaster.current_job();
        let mut notify_rx = broadcaster.notify_sender().subscribe();

        let task_manager = TaskManager::new();
        let (shutdown_tx, _) = broadcast::channel(1);
        let (status_tx, _status_rx) = async_channel::unbounded();
        let (complete_tx, _complete_rx) = mpsc::channel(1);
        broadcaster.spawn(
            &task_manager,
            shutdown_tx.subscribe(),
            StatusSender::Broadcaster(status_tx),
            complete_tx,
        );

        tx.send(job("2")).await.unwrap();
        let received = notify_rx.recv().await.unwrap();
        assert_eq!(received.job_id(), "2");
        // by the time the broadcast lands, the slot already holds the job
        assert_eq!(current.read().unwrap().as_ref().unwrap().job_id(), "2");

        shutdown_tx.send(ShutdownMessage::ShutdownAll).unwrap();
        task_manager.join_all().await;
    }
}
