//! Variable difficulty. One [`VardiffState`] lives inside each worker
//! context on a vardiff-enabled endpoint; it keeps a ring buffer of recent
//! share arrival times and proposes a new difficulty whenever the observed
//! rate drifts outside the tolerated band around the target.

use crate::config::VardiffConfig;
use std::{collections::VecDeque, time::Instant};

/// Ring buffer capacity for share arrival samples.
const MAX_SAMPLES: usize = 120;

/// A single retarget step never moves difficulty by more than this factor
/// in either direction.
const MAX_ADJUST_FACTOR: f64 = 4.0;

#[derive(Debug, Clone)]
pub struct VardiffState {
    config: VardiffConfig,
    last_retarget: Instant,
    share_times: VecDeque<Instant>,
}

impl VardiffState {
    pub fn new(config: &VardiffConfig) -> Self {
        Self {
            config: config.clone(),
            last_retarget: Instant::now(),
            share_times: VecDeque::with_capacity(MAX_SAMPLES),
        }
    }

    pub fn min_diff(&self) -> f64 {
        self.config.min_diff
    }

    pub fn record_share(&mut self, now: Instant) {
        if self.share_times.len() == MAX_SAMPLES {
            self.share_times.pop_front();
        }
        self.share_times.push_back(now);
    }

    /// Proposes a new difficulty, or `None` when no retarget is due or the
    /// observed rate is within the variance band. Resets the measurement
    /// window either way once the retarget interval has elapsed.
    pub fn retarget(&mut self, now: Instant, current_diff: f64) -> Option<f64> {
        let elapsed = now.duration_since(self.last_retarget);
        if elapsed < self.config.retarget_time() {
            return None;
        }

        let observed_secs = self.observed_share_interval(now);
        self.last_retarget = now;
        self.share_times.clear();

        let target_secs = self.config.target_time().as_secs_f64();
        let band = target_secs * self.config.variance_percent / 100.0;
        if (observed_secs - target_secs).abs() <= band {
            return None;
        }

        let factor = (target_secs / observed_secs).clamp(1.0 / MAX_ADJUST_FACTOR, MAX_ADJUST_FACTOR);
        let mut new_diff = current_diff * factor;
        new_diff = new_diff.max(self.config.min_diff);
        if let Some(max_diff) = self.config.max_diff {
            new_diff = new_diff.min(max_diff);
        }
        if (new_diff - current_diff).abs() < f64::EPSILON {
            return None;
        }
        Some(new_diff)
    }

    /// Average seconds per share over the current window. With fewer than
    /// two samples the whole window counts as one interval, so an idle
    /// miner drifts downward.
    fn observed_share_interval(&self, now: Instant) -> f64 {
        match self.share_times.len() {
            0 | 1 => now.duration_since(self.last_retarget).as_secs_f64(),
            n => {
                let first = self.share_times.front().copied().unwrap_or(now);
                let last = self.share_times.back().copied().unwrap_or(now);
                last.duration_since(first).as_secs_f64() / (n - 1) as f64
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> VardiffConfig {
        VardiffConfig {
            min_diff: 0.5,
            max_diff: Some(4096.0),
            target_time_secs: 15,
            retarget_time_secs: 90,
            variance_percent: 30.0,
        }
    }

    #[test]
    fn no_retarget_before_interval_elapses() {
        let mut state = VardiffState::new(&config());
        let start = state.last_retarget;
        state.record_share(start + Duration::from_secs(5));
        assert_eq!(state.retarget(start + Duration::from_secs(60), 16.0), None);
    }

    #[test]
    fn fast_shares_raise_difficulty() {
        let mut state = VardiffState::new(&config());
        let start = state.last_retarget;
        // one share every 5s, target is 15s
        for i in 1..=20 {
            state.record_share(start + Duration::from_secs(5 * i));
        }
        let new = state
            .retarget(start + Duration::from_secs(100), 16.0)
            .expect("retarget expected");
        assert!(new > 16.0);
        assert_eq!(new, 48.0); // 16 * 15/5
    }

    #[test]
    fn idle_connection_drifts_down_to_min() {
        let mut state = VardiffState::new(&config());
        let start = state.last_retarget;
        // no shares at all for a long window: observed interval is huge
        let new = state
            .retarget(start + Duration::from_secs(600), 1.0)
            .expect("retarget expected");
        assert_eq!(new, 0.5); // clamped to min_diff
    }

    #[test]
    fn within_variance_band_holds_difficulty() {
        let mut state = VardiffState::new(&config());
        let start = state.last_retarget;
        // one share every 14s against a 15s target, inside the 30% band
        for i in 1..=10 {
            state.record_share(start + Duration::from_secs(14 * i));
        }
        assert_eq!(state.retarget(start + Duration::from_secs(150), 16.0), None);
    }

    #[test]
    fn adjustment_factor_is_capped() {
        let mut state = VardiffState::new(&config());
        let start = state.last_retarget;
        // one share per second against a 15s target: raw factor 15x
        for i in 1..=100 {
            state.record_share(start + Duration::from_secs(i));
        }
        let new = state
            .retarget(start + Duration::from_secs(101), 16.0)
            .expect("retarget expected");
        assert_eq!(new, 64.0); // capped at 4x
    }

    #[test]
    fn window_resets_after_retarget() {
        let mut state = VardiffState::new(&config());
        let start = state.last_retarget;
        for i in 1..=20 {
            state.record_share(start + Duration::from_secs(5 * i));
        }
        let now = start + Duration::from_secs(100);
        assert!(state.retarget(now, 16.0).is_some());
        // immediately after, a new retarget is not due
        assert_eq!(state.retarget(now + Duration::from_secs(1), 48.0), None);
        assert!(state.share_times.is_empty());
    }
}
