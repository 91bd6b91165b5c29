//! ## Pool Front-End Configuration
//!
//! Defines [`FrontendConfig`], deserialized from TOML through `ext_config`
//! in `main`. A cluster hosts one or more pools; each pool exposes one or
//! more Stratum endpoints with a base difficulty and an optional
//! variable-difficulty controller.

use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Deserialize, Clone)]
pub struct FrontendConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    pub pools: Vec<PoolConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusterConfig {
    /// Where share statistics land when the database is unavailable.
    #[serde(default = "default_recovery_file")]
    pub share_recovery_file: PathBuf,
    /// Submissions older than this are dropped without a response.
    #[serde(default = "default_max_share_age_secs")]
    pub max_share_age_secs: u64,
    #[serde(default = "default_login_failure_ban_secs")]
    pub login_failure_ban_timeout_secs: u64,
    #[serde(default)]
    pub banning: ClusterBanningConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl ClusterConfig {
    pub fn max_share_age(&self) -> Duration {
        Duration::from_secs(self.max_share_age_secs)
    }

    pub fn login_failure_ban_timeout(&self) -> Duration {
        Duration::from_secs(self.login_failure_ban_timeout_secs)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            share_recovery_file: default_recovery_file(),
            max_share_age_secs: default_max_share_age_secs(),
            login_failure_ban_timeout_secs: default_login_failure_ban_secs(),
            banning: ClusterBanningConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusterBanningConfig {
    /// Banning failed logins is the principal defense against address
    /// validation flooding of the upstream daemon.
    #[serde(default = "default_true")]
    pub ban_on_login_failure: bool,
}

impl Default for ClusterBanningConfig {
    fn default() -> Self {
        Self {
            ban_on_login_failure: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub admin: AdminNotificationsConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AdminNotificationsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub notify_payment_success: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    pub id: String,
    pub coin: String,
    pub algorithm: String,
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    pub ports: Vec<PortConfig>,
    /// Invalid-share banning thresholds; omit to disable.
    #[serde(default)]
    pub banning: Option<PoolBanningConfig>,
}

/// One Stratum endpoint of a pool.
#[derive(Debug, Deserialize, Clone)]
pub struct PortConfig {
    pub port: u16,
    /// Base difficulty assigned to fresh connections.
    pub difficulty: f64,
    /// Omit to run the endpoint at static difficulty.
    #[serde(default)]
    pub vardiff: Option<VardiffConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoolBanningConfig {
    /// Minimum number of observed shares before the invalid ratio counts.
    pub check_threshold: u64,
    /// Percentage of invalid shares that triggers a ban.
    pub invalid_percent: f64,
    pub ban_duration_secs: u64,
}

impl PoolBanningConfig {
    pub fn ban_duration(&self) -> Duration {
        Duration::from_secs(self.ban_duration_secs)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct VardiffConfig {
    pub min_diff: f64,
    #[serde(default)]
    pub max_diff: Option<f64>,
    /// Desired seconds between shares.
    pub target_time_secs: u64,
    /// Minimum seconds between retargets.
    pub retarget_time_secs: u64,
    /// Tolerated deviation around the target before a retarget fires.
    pub variance_percent: f64,
}

impl VardiffConfig {
    pub fn target_time(&self) -> Duration {
        Duration::from_secs(self.target_time_secs)
    }

    pub fn retarget_time(&self) -> Duration {
        Duration::from_secs(self.retarget_time_secs)
    }
}

fn default_recovery_file() -> PathBuf {
    PathBuf::from("recovered-shares-statistic.txt")
}

fn default_max_share_age_secs() -> u64 {
    30
}

fn default_login_failure_ban_secs() -> u64 {
    60
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> FrontendConfig {
        ext_config::Config::builder()
            .add_source(ext_config::File::from_str(
                toml,
                ext_config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn minimal_config_gets_cluster_defaults() {
        let config = parse(
            r#"
            [[pools]]
            id = "btc1"
            coin = "bitcoin"
            algorithm = "sha256"
            ports = [{ port = 3333, difficulty = 16.0 }]
            "#,
        );
        assert_eq!(config.cluster.max_share_age(), Duration::from_secs(30));
        assert!(config.cluster.banning.ban_on_login_failure);
        assert!(!config.cluster.notifications.admin.enabled);
        assert_eq!(
            config.cluster.share_recovery_file,
            PathBuf::from("recovered-shares-statistic.txt")
        );
        let pool = &config.pools[0];
        assert_eq!(pool.listen_address, "0.0.0.0");
        assert!(pool.banning.is_none());
        assert!(pool.ports[0].vardiff.is_none());
    }

    #[test]
    fn full_config_roundtrip() {
        let config = parse(
            r#"
            [cluster]
            share_recovery_file = "/var/lib/pool/recovered.txt"
            max_share_age_secs = 20

            [cluster.banning]
            ban_on_login_failure = false

            [cluster.notifications.admin]
            enabled = true

            [[pools]]
            id = "btc1"
            coin = "bitcoin"
            algorithm = "sha256"
            listen_address = "127.0.0.1"

            [pools.banning]
            check_threshold = 50
            invalid_percent = 50.0
            ban_duration_secs = 600

            [[pools.ports]]
            port = 3333
            difficulty = 16.0

            [pools.ports.vardiff]
            min_diff = 0.01
            target_time_secs = 15
            retarget_time_secs = 90
            variance_percent = 30.0
            "#,
        );
        assert!(!config.cluster.banning.ban_on_login_failure);
        assert!(config.cluster.notifications.admin.enabled);
        let pool = &config.pools[0];
        assert_eq!(pool.banning.as_ref().unwrap().check_threshold, 50);
        let port = &pool.ports[0];
        assert_eq!(port.port, 3333);
        let vardiff = port.vardiff.as_ref().unwrap();
        assert_eq!(vardiff.target_time(), Duration::from_secs(15));
        assert!(vardiff.max_diff.is_none());
    }
}
