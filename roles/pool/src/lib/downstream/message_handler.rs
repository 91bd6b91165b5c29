//! The per-connection request dispatcher: every inbound frame lands here,
//! is parsed into a typed method and routed to its handler. Stratum-typed
//! failures become error responses on the same connection; anything else
//! tears the connection down.

use crate::{
    difficulty,
    downstream::{Downstream, DownstreamError},
    network::TimestampedMessage,
    share_recorder::ShareStatistic,
};
use chrono::Utc;
use serde_json::Value;
use std::time::Instant;
use sv1_api::{
    client_to_server::{
        Authorize, Configure, ConfigureExtension, Submit, Subscribe, SuggestDifficulty,
    },
    json_rpc::Message,
    methods::{Client2Server, MethodError},
    server_to_client::{Notify, SetDifficulty},
    utils::HexU32Be,
    StratumError,
};
use tracing::{debug, info, warn};

/// BIP 320 version bits this pool lets clients roll.
pub const VERSION_ROLLING_POOL_MASK: u32 = 0x1fffe000;

impl Downstream {
    pub(crate) async fn handle_frame(
        &mut self,
        frame: TimestampedMessage,
    ) -> Result<(), DownstreamError> {
        match frame.message {
            Message::Response(_) => {
                debug!("ignoring unexpected json-rpc response from miner");
                Ok(())
            }
            Message::Notification(notification) => {
                debug!("request without id: {}", notification.method);
                self.respond_error(Value::Null, StratumError::missing_request_id())
                    .await
            }
            Message::StandardRequest(request) => {
                if request.id.is_null() {
                    debug!("request with null id: {}", request.method);
                    return self
                        .respond_error(Value::Null, StratumError::missing_request_id())
                        .await;
                }
                let id = request.id.clone();
                match Client2Server::try_from(request) {
                    Ok(method) => match self.dispatch(frame.received_at, method).await {
                        Ok(()) => Ok(()),
                        Err(DownstreamError::Stratum(e)) => self.respond_error(id, e).await,
                        Err(DownstreamError::Disconnect) => Err(DownstreamError::Disconnect),
                    },
                    Err(MethodError::MethodNotFound(method)) => {
                        debug!("unsupported request: {method}");
                        self.respond_error(id, StratumError::unsupported_request())
                            .await
                    }
                    Err(e) => {
                        debug!("malformed request: {e:?}");
                        self.respond_error(id, StratumError::other("malformed request"))
                            .await
                    }
                }
            }
        }
    }

    async fn dispatch(
        &mut self,
        received_at: Instant,
        method: Client2Server,
    ) -> Result<(), DownstreamError> {
        match method {
            Client2Server::Subscribe(subscribe) => self.on_subscribe(subscribe).await,
            Client2Server::Authorize(authorize) => self.on_authorize(authorize).await,
            Client2Server::Submit(submit) => self.on_submit(received_at, submit).await,
            Client2Server::SuggestDifficulty(suggest) => {
                self.on_suggest_difficulty(suggest).await
            }
            Client2Server::Configure(configure) => self.on_configure(configure).await,
            Client2Server::ExtranonceSubscribe(request) => self.send(request.respond()).await,
            Client2Server::GetTransactions { .. } | Client2Server::MultiVersion { .. } => {
                // no response, by long-standing pool custom; some clients
                // may block waiting on one
                debug!("ignoring legacy request");
                Ok(())
            }
        }
    }

    async fn on_subscribe(&mut self, subscribe: Subscribe) -> Result<(), DownstreamError> {
        let user_agent = subscribe.user_agent.clone();
        let subscriber = self
            .pool
            .job_manager
            .subscriber_data(&self.ctx.connection_id);
        let response = subscribe.respond(
            &self.ctx.connection_id,
            &subscriber.extra_nonce1,
            subscriber.extra_nonce2_size,
        );
        self.send(response).await?;

        self.ctx.is_subscribed = true;
        self.ctx.user_agent = user_agent;
        info!(
            "connection {} subscribed ({})",
            self.ctx.connection_id,
            self.ctx.user_agent.as_deref().unwrap_or("unknown agent")
        );

        difficulty::apply_nicehash_static_diff(
            &mut self.ctx,
            self.pool.nicehash.as_ref(),
            &self.pool.coin,
            &self.pool.algorithm,
        )
        .await;
        self.ctx.apply_pending_difficulty();

        self.send(SetDifficulty {
            value: self.ctx.difficulty(),
        })
        .await?;
        let job = self.pool.current_job.read().unwrap().clone();
        match job {
            Some(job) => self.send(Notify { job_params: job.0 }).await,
            None => {
                warn!("no current job available at subscribe time");
                Ok(())
            }
        }
    }

    async fn on_authorize(&mut self, authorize: Authorize) -> Result<(), DownstreamError> {
        let mut split = authorize.name.splitn(2, '.');
        let username = split.next().unwrap_or_default().to_string();
        let worker_suffix = split.next().map(str::to_string);

        if self.validate_address(&username).await? {
            // legacy path: the username is itself a payout address
            self.ctx.miner = Some(username);
            self.ctx.worker = worker_suffix;
            self.ctx.is_authorized = true;
        } else {
            let resolved = self
                .pool
                .resolver
                .resolve(&username, &authorize.password)
                .await
                .map_err(|e| {
                    warn!("worker address lookup failed: {e}");
                    StratumError::other("upstream error")
                })?;
            if let Some(address) = resolved {
                if self.validate_address(&address).await? {
                    self.ctx.miner = Some(address);
                    // credential path keeps the full, un-split worker value
                    self.ctx.worker = Some(authorize.name.clone());
                    self.ctx.is_authorized = true;
                }
            }
        }

        if self.ctx.is_authorized {
            info!(
                "connection {} authorized as {}",
                self.ctx.connection_id,
                self.ctx.miner.as_deref().unwrap_or_default()
            );
            let password = authorize.password.clone();
            self.send(authorize.respond(true)).await?;
            if difficulty::apply_static_diff_from_password(&mut self.ctx, &password)
                && self.ctx.apply_pending_difficulty()
            {
                self.send(SetDifficulty {
                    value: self.ctx.difficulty(),
                })
                .await?;
            }
            Ok(())
        } else {
            warn!(
                "authorization failed for {} from {}",
                authorize.name, self.ctx.remote_addr
            );
            self.send(StratumError::unauthorized_worker().into_response(authorize.id))
                .await?;
            if self.pool.cluster.banning.ban_on_login_failure {
                self.pool.ban_manager.ban(
                    self.ctx.remote_addr.ip(),
                    self.pool.cluster.login_failure_ban_timeout(),
                );
                Err(DownstreamError::Disconnect)
            } else {
                Ok(())
            }
        }
    }

    async fn on_submit(
        &mut self,
        received_at: Instant,
        submit: Submit,
    ) -> Result<(), DownstreamError> {
        // aged submissions indicate overload; answering them would compound it
        let age = received_at.elapsed();
        if age > self.pool.cluster.max_share_age() {
            warn!(
                "dropping share submission aged {age:?} from connection {}",
                self.ctx.connection_id
            );
            return Ok(());
        }
        self.ctx.touch();
        if !self.ctx.is_authorized {
            return Err(StratumError::unauthorized_worker().into());
        }
        if !self.ctx.is_subscribed {
            return Err(StratumError::not_subscribed().into());
        }

        match self.pool.job_manager.submit_share(&self.ctx, &submit).await {
            Ok(share) => {
                self.send(submit.respond(true)).await?;
                let _ = self.pool.share_tx.send(share.clone());
                self.pool.telemetry.record_share(received_at.elapsed(), true);
                if share.is_block_candidate {
                    info!(
                        "block candidate at height {} found by {}",
                        share.block_height, share.miner
                    );
                    *self.pool.last_pool_block_time.lock().unwrap() = Some(Instant::now());
                }
                self.ctx.stats.valid_shares += 1;
                let statistic = self.build_share_statistic(Some(&share));
                if self.pool.statistic_tx.send(statistic).await.is_err() {
                    warn!("share recorder channel closed, dropping statistic");
                }

                let now = Instant::now();
                let current = self.ctx.difficulty();
                let retargeted = self.ctx.vardiff.as_mut().and_then(|vardiff| {
                    vardiff.record_share(now);
                    vardiff.retarget(now, current)
                });
                if let Some(new_diff) = retargeted {
                    self.ctx.set_difficulty(new_diff);
                    self.push_difficulty_update().await?;
                }
                Ok(())
            }
            Err(stratum_error) => {
                self.pool
                    .telemetry
                    .record_share(received_at.elapsed(), false);
                self.ctx.stats.invalid_shares += 1;
                debug!(
                    "share rejected for connection {}: {stratum_error}",
                    self.ctx.connection_id
                );
                let statistic = self.build_share_statistic(None);
                if self.pool.statistic_tx.send(statistic).await.is_err() {
                    warn!("share recorder channel closed, dropping statistic");
                }
                if let Some(banning) = &self.pool.banning {
                    if self.pool.ban_manager.consider_ban(
                        self.ctx.remote_addr.ip(),
                        &self.ctx.stats,
                        banning,
                    ) {
                        // encode the rejection before dropping the peer
                        let _ = self
                            .send(stratum_error.into_response(submit.id))
                            .await;
                        return Err(DownstreamError::Disconnect);
                    }
                }
                Err(stratum_error.into())
            }
        }
    }

    async fn on_suggest_difficulty(
        &mut self,
        suggest: SuggestDifficulty,
    ) -> Result<(), DownstreamError> {
        let value = suggest.value;
        self.send(suggest.respond()).await?;
        match value {
            Some(requested) => {
                if difficulty::apply_suggested_difficulty(
                    &mut self.ctx,
                    requested,
                    self.port.difficulty,
                    false,
                ) && self.ctx.apply_pending_difficulty()
                {
                    self.send(SetDifficulty {
                        value: self.ctx.difficulty(),
                    })
                    .await?;
                }
            }
            None => debug!("unparseable mining.suggest_difficulty parameters"),
        }
        Ok(())
    }

    async fn on_configure(&mut self, configure: Configure) -> Result<(), DownstreamError> {
        let mut result = serde_json::Map::new();
        for extension in &configure.extensions {
            match extension {
                ConfigureExtension::VersionRolling { mask, .. } => {
                    // a client that names the extension without a mask still
                    // negotiates against the full pool mask
                    let client_mask = mask.clone().unwrap_or(HexU32Be(u32::MAX));
                    let negotiated = client_mask.and(&HexU32Be(VERSION_ROLLING_POOL_MASK));
                    debug!(
                        "version-rolling mask {:08x} negotiated for connection {}",
                        negotiated.0, self.ctx.connection_id
                    );
                    self.ctx.version_rolling_mask = Some(negotiated.clone());
                    result.insert("version-rolling".into(), Value::Bool(true));
                    result.insert("version-rolling.mask".into(), negotiated.into());
                }
                ConfigureExtension::MinimumDifficulty { value } => {
                    let accepted = value
                        .map(|requested| {
                            difficulty::apply_suggested_difficulty(
                                &mut self.ctx,
                                requested,
                                self.port.difficulty,
                                true,
                            )
                        })
                        .unwrap_or(false);
                    result.insert("minimum-difficulty".into(), Value::Bool(accepted));
                }
                ConfigureExtension::Unknown(name) => {
                    debug!("omitting unknown configure extension: {name}");
                }
            }
        }
        self.send(configure.respond(result)).await
    }

    async fn validate_address(&self, address: &str) -> Result<bool, DownstreamError> {
        self.pool
            .job_manager
            .validate_address(address)
            .await
            .map_err(|e| {
                warn!("daemon address validation failed: {e}");
                DownstreamError::Stratum(StratumError::other("upstream error"))
            })
    }

    /// Flattens a share for persistence. For rejected shares the fields
    /// come from the connection context. The worker field is always the
    /// context worker's first segment, even when the share carries its own
    /// worker name.
    fn build_share_statistic(&self, share: Option<&crate::job_manager::Share>) -> ShareStatistic {
        let device = self.ctx.worker_device();
        match share {
            Some(share) => ShareStatistic {
                pool_id: share.pool_id.clone(),
                block_height: share.block_height,
                difficulty: share.difficulty,
                network_difficulty: share.network_difficulty,
                miner: share.miner.clone(),
                worker: device,
                user_agent: share.user_agent.clone(),
                ip_address: share.ip_address.clone(),
                source: share.source.clone(),
                created: share.created,
                is_valid: true,
            },
            None => ShareStatistic {
                pool_id: self.pool.pool_id.clone(),
                block_height: 0,
                difficulty: self.ctx.difficulty(),
                network_difficulty: 0.0,
                miner: self.ctx.miner.clone().unwrap_or_default(),
                worker: device,
                user_agent: self.ctx.user_agent.clone(),
                ip_address: self.ctx.remote_addr.ip().to_string(),
                source: None,
                created: Utc::now(),
                is_valid: false,
            },
        }
    }

    async fn respond_error(
        &self,
        id: Value,
        error: StratumError,
    ) -> Result<(), DownstreamError> {
        self.send(error.into_response(id)).await
    }
}
