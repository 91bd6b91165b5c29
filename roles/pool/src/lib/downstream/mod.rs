//! One task per miner connection. The task owns the worker context and a
//! select loop over inbound frames, job broadcasts, the vardiff timer and
//! shutdown — so request handling is serialized per connection and the
//! context needs no locking.

pub mod message_handler;

use crate::{
    ban_manager::BanManager,
    config::{ClusterConfig, PoolBanningConfig, PortConfig},
    error::PoolError,
    job_manager::{JobManager, JobParams, Share},
    network::StratumConnection,
    nicehash::NicehashService,
    share_recorder::ShareStatistic,
    address_resolver::AddressResolver,
    telemetry::Telemetry,
    utils::{connection_id, ShutdownMessage},
    vardiff::VardiffState,
    worker::WorkerContext,
};
use std::{
    sync::{Arc, Mutex as StdMutex, RwLock},
    time::{Duration, Instant},
};
use sv1_api::{json_rpc::Message, server_to_client, StratumError};
use tokio::{net::TcpStream, sync::broadcast};
use tracing::{debug, warn};

/// How often an idle connection re-checks its vardiff state. Retargets are
/// also evaluated on every accepted share.
const VARDIFF_TIMER_INTERVAL: Duration = Duration::from_secs(30);

/// Everything a connection task needs from its pool, wired once at startup
/// and read-only afterwards.
pub struct PoolContext {
    pub pool_id: String,
    pub coin: String,
    pub algorithm: String,
    pub cluster: ClusterConfig,
    pub banning: Option<PoolBanningConfig>,
    pub job_manager: Arc<dyn JobManager>,
    pub resolver: Arc<AddressResolver>,
    pub ban_manager: Arc<BanManager>,
    pub nicehash: Arc<dyn NicehashService>,
    pub telemetry: Arc<Telemetry>,
    /// Latest job, swapped by the broadcaster, read at subscribe time.
    pub current_job: Arc<RwLock<Option<JobParams>>>,
    /// Fan-out channel for job updates.
    pub job_notify: broadcast::Sender<JobParams>,
    /// Share events for consumers such as the stats rollup.
    pub share_tx: broadcast::Sender<Share>,
    /// Share statistics headed for the recorder.
    pub statistic_tx: async_channel::Sender<ShareStatistic>,
    /// Stamped whenever a share turns out to be a block candidate.
    pub last_pool_block_time: StdMutex<Option<Instant>>,
}

/// Control flow out of a message handler.
#[derive(Debug)]
pub(crate) enum DownstreamError {
    /// Report this to the client and keep the connection.
    Stratum(StratumError),
    /// Tear the connection down.
    Disconnect,
}

impl From<StratumError> for DownstreamError {
    fn from(e: StratumError) -> Self {
        DownstreamError::Stratum(e)
    }
}

pub struct Downstream {
    pub ctx: WorkerContext,
    pub(crate) port: PortConfig,
    pub(crate) connection: StratumConnection,
    pub(crate) pool: Arc<PoolContext>,
}

impl Downstream {
    pub async fn new(
        stream: TcpStream,
        port: PortConfig,
        pool: Arc<PoolContext>,
    ) -> Result<Self, PoolError> {
        let remote_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let connection = StratumConnection::new(stream).await;
        let vardiff = port.vardiff.as_ref().map(VardiffState::new);
        let ctx = WorkerContext::new(
            connection_id(),
            port.difficulty,
            vardiff,
            remote_addr,
            local_addr,
        );
        Ok(Self {
            ctx,
            port,
            connection,
            pool,
        })
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<ShutdownMessage>) {
        let mut job_rx = self.pool.job_notify.subscribe();
        let mut vardiff_timer = tokio::time::interval(VARDIFF_TIMER_INTERVAL);
        vardiff_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        vardiff_timer.tick().await; // the immediate first tick

        let remote = self.ctx.remote_addr;
        debug!("connection task started for {remote}");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("connection {remote}: shutdown received");
                    break;
                }
                inbound = self.connection.receive() => match inbound {
                    Some(frame) => {
                        // stratum errors were already reported to the client;
                        // any error surfacing here ends the connection
                        if self.handle_frame(frame).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        debug!("connection {remote}: closed by peer");
                        break;
                    }
                },
                job = job_rx.recv() => match job {
                    Ok(job) => {
                        if self.on_new_job(job).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // only the newest job matters; resubscribe at the tip
                        warn!("connection {remote}: lagged {skipped} job broadcasts");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = vardiff_timer.tick() => {
                    if self.on_vardiff_timer().await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("connection task finished for {remote}");
    }

    /// New job from the broadcaster: promote any pending difficulty first,
    /// then forward the job, so the set_difficulty always precedes the
    /// notify that depends on it.
    async fn on_new_job(&mut self, job: JobParams) -> Result<(), DownstreamError> {
        if !self.ctx.is_subscribed {
            return Ok(());
        }
        if self.ctx.apply_pending_difficulty() {
            self.send(server_to_client::SetDifficulty {
                value: self.ctx.difficulty(),
            })
            .await?;
        }
        debug!(
            "connection {}: sending job {}",
            self.ctx.connection_id,
            job.job_id()
        );
        self.send(server_to_client::Notify { job_params: job.0 }).await
    }

    /// Periodic retarget for connections that submit too rarely for the
    /// per-share path to keep up.
    async fn on_vardiff_timer(&mut self) -> Result<(), DownstreamError> {
        if !self.ctx.is_subscribed {
            return Ok(());
        }
        let now = Instant::now();
        let current = self.ctx.difficulty();
        let retargeted = self
            .ctx
            .vardiff
            .as_mut()
            .and_then(|vardiff| vardiff.retarget(now, current));
        if let Some(new_diff) = retargeted {
            self.ctx.set_difficulty(new_diff);
            self.push_difficulty_update().await?;
        }
        Ok(())
    }

    /// Promotes a staged difficulty and pushes it to the client together
    /// with the current job, keeping the set_difficulty-before-notify
    /// ordering.
    pub(crate) async fn push_difficulty_update(&mut self) -> Result<(), DownstreamError> {
        if !self.ctx.apply_pending_difficulty() {
            return Ok(());
        }
        self.send(server_to_client::SetDifficulty {
            value: self.ctx.difficulty(),
        })
        .await?;
        let job = self.pool.current_job.read().unwrap().clone();
        if let Some(job) = job {
            self.send(server_to_client::Notify { job_params: job.0 })
                .await?;
        }
        Ok(())
    }

    pub(crate) async fn send(
        &self,
        message: impl Into<Message>,
    ) -> Result<(), DownstreamError> {
        if self.connection.send(message).await {
            Ok(())
        } else {
            Err(DownstreamError::Disconnect)
        }
    }
}
