//! Short-duration IP banning. Authorization failures and excessive invalid
//! share rates put the remote address on the table; the listeners consult
//! it before spawning a connection task. Bans expire by wall clock.

use crate::{config::PoolBanningConfig, worker::WorkerStats};
use std::{
    collections::HashMap,
    net::IpAddr,
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::info;

#[derive(Default)]
pub struct BanManager {
    bans: Mutex<HashMap<IpAddr, Instant>>,
}

impl BanManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ban(&self, ip: IpAddr, duration: Duration) {
        info!("banning {ip} for {duration:?}");
        self.bans.lock().unwrap().insert(ip, Instant::now() + duration);
    }

    pub fn is_banned(&self, ip: &IpAddr) -> bool {
        let mut bans = self.bans.lock().unwrap();
        match bans.get(ip) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                bans.remove(ip);
                false
            }
            None => false,
        }
    }

    /// Invalid-share policy, checked after every rejected share. Returns
    /// true (and records the ban) when the invalid ratio crosses the
    /// configured threshold over a large enough sample.
    pub fn consider_ban(
        &self,
        ip: IpAddr,
        stats: &WorkerStats,
        config: &PoolBanningConfig,
    ) -> bool {
        let total = stats.valid_shares + stats.invalid_shares;
        if total < config.check_threshold {
            return false;
        }
        let invalid_percent = stats.invalid_shares as f64 / total as f64 * 100.0;
        if invalid_percent < config.invalid_percent {
            return false;
        }
        info!(
            "worker at {ip} exceeded invalid share threshold ({invalid_percent:.1}% of {total})"
        );
        self.ban(ip, config.ban_duration());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "203.0.113.7".parse().unwrap()
    }

    fn config() -> PoolBanningConfig {
        PoolBanningConfig {
            check_threshold: 10,
            invalid_percent: 50.0,
            ban_duration_secs: 600,
        }
    }

    #[test]
    fn ban_expires_by_wall_clock() {
        let manager = BanManager::new();
        manager.ban(ip(), Duration::from_millis(0));
        // an already-expired ban is purged on the next check
        std::thread::sleep(Duration::from_millis(5));
        assert!(!manager.is_banned(&ip()));
        assert!(manager.bans.lock().unwrap().is_empty());

        manager.ban(ip(), Duration::from_secs(600));
        assert!(manager.is_banned(&ip()));
    }

    #[test]
    fn consider_ban_needs_a_large_enough_sample() {
        let manager = BanManager::new();
        let stats = WorkerStats {
            valid_shares: 1,
            invalid_shares: 5,
        };
        assert!(!manager.consider_ban(ip(), &stats, &config()));
        assert!(!manager.is_banned(&ip()));
    }

    #[test]
    fn consider_ban_trips_on_high_invalid_ratio() {
        let manager = BanManager::new();
        let stats = WorkerStats {
            valid_shares: 4,
            invalid_shares: 6,
        };
        assert!(manager.consider_ban(ip(), &stats, &config()));
        assert!(manager.is_banned(&ip()));
    }

    #[test]
    fn consider_ban_spares_mostly_valid_workers() {
        let manager = BanManager::new();
        let stats = WorkerStats {
            valid_shares: 9,
            invalid_shares: 1,
        };
        assert!(!manager.consider_ban(ip(), &stats, &config()));
    }
}
