mod args;

use args::Args;
use ext_config::{Config, File, FileFormat};
use forgepool::{
    config::FrontendConfig,
    dev::{DevJobManager, MemoryMinerRepository, MemoryShareRepository},
    error::{PoolError, PoolResult},
    nicehash::StaticMinDiffTable,
    share_recorder::recovery,
    PoolCollaborators, StratumFrontend,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{error, info};

fn process_cli_args() -> PoolResult<(Args, FrontendConfig)> {
    let args = Args::from_args().map_err(|help| {
        error!("{help}");
        PoolError::BadCliArgs(help)
    })?;
    let config_path = args
        .config_path
        .to_str()
        .ok_or_else(|| PoolError::BadCliArgs("invalid configuration path".into()))?;
    let settings = Config::builder()
        .add_source(File::new(config_path, FileFormat::Toml))
        .build()?;
    let config = settings.try_deserialize::<FrontendConfig>()?;
    Ok((args, config))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let (args, config) = match process_cli_args() {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    info!("configuration loaded, {} pool(s)", config.pools.len());

    let share_repository = Arc::new(MemoryShareRepository::default());

    if let Some(recovery_file) = &args.recover {
        match recovery::recover_shares(share_repository.as_ref(), recovery_file).await {
            Ok(report) => info!(
                "recovered {} share statistics ({} malformed lines)",
                report.imported, report.malformed
            ),
            Err(e) => {
                error!("share recovery failed: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    // In-process dev harness in place of the daemon-backed job manager and
    // the database repositories; production wiring replaces this block.
    let mut pools = HashMap::new();
    for pool in &config.pools {
        let job_manager = Arc::new(DevJobManager::new(&pool.id));
        job_manager.emit_job();
        job_manager.clone().spawn_job_ticker(Duration::from_secs(30));
        pools.insert(
            pool.id.clone(),
            PoolCollaborators {
                job_manager,
                miner_repository: Arc::new(MemoryMinerRepository::default()),
                nicehash: Arc::new(StaticMinDiffTable::new().insert("sha256", 500_000.0)),
            },
        );
    }

    let frontend = StratumFrontend::new(config, share_repository, pools);
    if let Err(e) = frontend.start().await {
        error!("pool front-end terminated: {e}");
        std::process::exit(1);
    }
}
