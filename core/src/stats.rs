//! Rolling query statistics. Kept entirely in memory and pruned to a 24-hour
//! horizon; nothing here is ever persisted, so no query leaves a trace past
//! the cache window.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DAY: Duration = Duration::from_secs(24 * 3600);
const QPS_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct StatsSnapshot {
    pub queries_served_today: u64,
    pub average_latency_ms: f64,
    pub queries_per_second: f64,
}

#[derive(Default)]
pub struct QueryStats {
    samples: Mutex<VecDeque<(Instant, Duration)>>,
}

impl QueryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, latency: Duration) {
        let mut samples = self.samples.lock();
        samples.push_back((Instant::now(), latency));
        while samples
            .front()
            .is_some_and(|(at, _)| at.elapsed() > DAY)
        {
            samples.pop_front();
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut samples = self.samples.lock();
        while samples
            .front()
            .is_some_and(|(at, _)| at.elapsed() > DAY)
        {
            samples.pop_front();
        }
        let count = samples.len() as u64;
        let average_latency_ms = if count == 0 {
            0.0
        } else {
            samples
                .iter()
                .map(|(_, l)| l.as_secs_f64() * 1000.0)
                .sum::<f64>()
                / count as f64
        };
        let recent = samples
            .iter()
            .filter(|(at, _)| at.elapsed() <= QPS_WINDOW)
            .count();
        StatsSnapshot {
            queries_served_today: count,
            average_latency_ms,
            queries_per_second: recent as f64 / QPS_WINDOW.as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats_are_zero() {
        let stats = QueryStats::new();
        let snap = stats.snapshot();
        assert_eq!(snap.queries_served_today, 0);
        assert_eq!(snap.average_latency_ms, 0.0);
        assert_eq!(snap.queries_per_second, 0.0);
    }

    #[test]
    fn records_accumulate() {
        let stats = QueryStats::new();
        stats.record(Duration::from_millis(10));
        stats.record(Duration::from_millis(30));
        let snap = stats.snapshot();
        assert_eq!(snap.queries_served_today, 2);
        assert!((snap.average_latency_ms - 20.0).abs() < 1.0);
        assert!(snap.queries_per_second > 0.0);
    }
}
