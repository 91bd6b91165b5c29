//! Bitcoin-family Stratum pool front-end.
//!
//! Accepts persistent TCP connections from miners, speaks Stratum V1 with
//! the common extensions, authorizes workers, fans out block-template jobs,
//! drives per-miner difficulty and records share statistics durably. The
//! upstream daemon, the proof-of-work validator and the database live
//! behind the trait seams in [`job_manager`] and [`repository`].

pub mod address_resolver;
pub mod ban_manager;
pub mod config;
pub mod dev;
pub mod difficulty;
pub mod downstream;
pub mod error;
pub mod job_broadcaster;
pub mod job_manager;
pub mod network;
pub mod nicehash;
pub mod repository;
pub mod share_recorder;
pub mod status;
pub mod task_manager;
pub mod telemetry;
pub mod utils;
pub mod vardiff;
pub mod worker;

use crate::{
    address_resolver::AddressResolver,
    ban_manager::BanManager,
    config::{FrontendConfig, PortConfig},
    downstream::{Downstream, PoolContext},
    error::PoolError,
    job_broadcaster::JobBroadcaster,
    job_manager::JobManager,
    nicehash::NicehashService,
    repository::{MinerRepository, ShareStatisticRepository},
    share_recorder::ShareRecorder,
    status::{State, StatusSender},
    task_manager::TaskManager,
    telemetry::Telemetry,
    utils::ShutdownMessage,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc},
};
use tracing::{debug, error, info, warn};

/// The collaborator set one pool needs: its coin daemon's job manager, its
/// worker-credential store and the marketplace difficulty hints.
pub struct PoolCollaborators {
    pub job_manager: Arc<dyn JobManager>,
    pub miner_repository: Arc<dyn MinerRepository>,
    pub nicehash: Arc<dyn NicehashService>,
}

pub struct StratumFrontend {
    config: FrontendConfig,
    share_repository: Arc<dyn ShareStatisticRepository>,
    pools: HashMap<String, PoolCollaborators>,
}

impl StratumFrontend {
    pub fn new(
        config: FrontendConfig,
        share_repository: Arc<dyn ShareStatisticRepository>,
        pools: HashMap<String, PoolCollaborators>,
    ) -> Self {
        Self {
            config,
            share_repository,
            pools,
        }
    }

    /// Wires every pool, waits for each upstream's first job, starts the
    /// listeners and runs until interrupted or a component dies.
    pub async fn start(mut self) -> Result<(), PoolError> {
        let task_manager = Arc::new(TaskManager::new());
        let (status_tx, status_rx) = async_channel::unbounded();
        let (notify_shutdown, _) = broadcast::channel::<ShutdownMessage>(16);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);

        // one recorder serves the whole cluster
        let (statistic_tx, statistic_rx) = async_channel::unbounded();
        let (notification_tx, notification_rx) = async_channel::unbounded();
        let recorder = ShareRecorder::new(
            statistic_rx,
            self.share_repository.clone(),
            self.config.cluster.share_recovery_file.clone(),
            self.config.cluster.notifications.admin.clone(),
            Some(notification_tx),
        );
        recorder.spawn(
            &task_manager,
            notify_shutdown.subscribe(),
            shutdown_complete_tx.clone(),
        );
        // operator notification sink; a mail or webhook hook slots in here
        task_manager.spawn(async move {
            while let Ok(notification) = notification_rx.recv().await {
                warn!("admin notification: {notification:?}");
            }
        });

        let ban_manager = Arc::new(BanManager::new());
        let telemetry = Arc::new(Telemetry::new());
        telemetry
            .clone()
            .spawn_reporter(&task_manager, notify_shutdown.subscribe());

        let mut registry: HashMap<String, Arc<PoolContext>> = HashMap::new();
        for pool_cfg in &self.config.pools {
            let collaborators = self.pools.remove(&pool_cfg.id).ok_or_else(|| {
                PoolError::Config(format!("no collaborators wired for pool {}", pool_cfg.id))
            })?;

            let broadcaster = JobBroadcaster::new(collaborators.job_manager.jobs());
            info!("pool {}: waiting for the first job", pool_cfg.id);
            broadcaster.wait_first_job().await?;

            let resolver = Arc::new(AddressResolver::new(
                pool_cfg.id.clone(),
                collaborators.miner_repository.clone(),
            ));
            resolver
                .clone()
                .spawn_eviction_timer(&task_manager, notify_shutdown.subscribe());

            let (share_tx, _) = broadcast::channel(1024);
            let pool_ctx = Arc::new(PoolContext {
                pool_id: pool_cfg.id.clone(),
                coin: pool_cfg.coin.clone(),
                algorithm: pool_cfg.algorithm.clone(),
                cluster: self.config.cluster.clone(),
                banning: pool_cfg.banning.clone(),
                job_manager: collaborators.job_manager.clone(),
                resolver,
                ban_manager: ban_manager.clone(),
                nicehash: collaborators.nicehash.clone(),
                telemetry: telemetry.clone(),
                current_job: broadcaster.current_job(),
                job_notify: broadcaster.notify_sender(),
                share_tx,
                statistic_tx: statistic_tx.clone(),
                last_pool_block_time: StdMutex::new(None),
            });
            broadcaster.spawn(
                &task_manager,
                notify_shutdown.subscribe(),
                StatusSender::Broadcaster(status_tx.clone()),
                shutdown_complete_tx.clone(),
            );

            for port_cfg in &pool_cfg.ports {
                spawn_listener(
                    &task_manager,
                    pool_ctx.clone(),
                    pool_cfg.listen_address.clone(),
                    port_cfg.clone(),
                    notify_shutdown.clone(),
                    StatusSender::Listener(status_tx.clone()),
                    shutdown_complete_tx.clone(),
                );
            }
            registry.insert(pool_cfg.id.clone(), pool_ctx);
        }
        // the registry is frozen here; nothing mutates it after init
        let registry = Arc::new(registry);
        info!("{} pool(s) up", registry.len());

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, shutting down");
                    break;
                }
                status = status_rx.recv() => match status {
                    Ok(status) => {
                        if status::is_fatal(&status.state) {
                            error!("fatal component failure: {:?}", status.state);
                            break;
                        }
                        debug!("status: {:?}", status.state);
                    }
                    Err(_) => break,
                }
            }
        }

        info!("shutting down {} pool(s)", registry.len());
        let _ = notify_shutdown.send(ShutdownMessage::ShutdownAll);
        drop(shutdown_complete_tx);
        let _ = shutdown_complete_rx.recv().await;
        task_manager.join_all().await;
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_listener(
    task_manager: &Arc<TaskManager>,
    pool_ctx: Arc<PoolContext>,
    listen_address: String,
    port_cfg: PortConfig,
    notify_shutdown: broadcast::Sender<ShutdownMessage>,
    status_sender: StatusSender,
    shutdown_complete_tx: mpsc::Sender<()>,
) {
    let connection_tasks = task_manager.clone();
    task_manager.spawn(async move {
        let addr = format!("{listen_address}:{}", port_cfg.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("failed to bind {addr}: {e}");
                status_sender.send(State::ListenerShutdown(e.into())).await;
                drop(shutdown_complete_tx);
                return;
            }
        };
        info!(
            "pool {}: listening on {addr} (base difficulty {})",
            pool_ctx.pool_id, port_cfg.difficulty
        );
        let mut shutdown = notify_shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if pool_ctx.ban_manager.is_banned(&peer.ip()) {
                            debug!("rejecting banned peer {peer}");
                            continue;
                        }
                        match Downstream::new(stream, port_cfg.clone(), pool_ctx.clone()).await {
                            Ok(downstream) => {
                                connection_tasks.spawn(downstream.run(notify_shutdown.subscribe()));
                            }
                            Err(e) => warn!("failed to set up connection from {peer}: {e}"),
                        }
                    }
                    Err(e) => {
                        error!("accept failed on {addr}: {e}");
                        status_sender.send(State::ListenerShutdown(e.into())).await;
                        break;
                    }
                }
            }
        }
        drop(shutdown_complete_tx);
    });
}
