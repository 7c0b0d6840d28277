//! When to drain.
//!
//! Three independent signals, any one is enough: queue depth over a
//! threshold, store memory over a threshold, or the drain interval elapsed
//! since the last successful drain. A process that has never drained always
//! triggers.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

use feedstash_core::config::DrainConfig;
use feedstash_queue::{MemoryUsage, QueueStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TriggerReason {
    Depth { queue_len: u64, threshold: u64 },
    Memory { used_mb: f64, threshold_mb: f64 },
    Interval { elapsed_minutes: i64, interval_minutes: u64 },
    FirstRun,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerReason::Depth { queue_len, threshold } => {
                write!(f, "queue length {queue_len} > {threshold}")
            }
            TriggerReason::Memory { used_mb, threshold_mb } => {
                write!(f, "memory {used_mb:.1}MB > {threshold_mb}MB")
            }
            TriggerReason::Interval { elapsed_minutes, interval_minutes } => {
                write!(f, "{elapsed_minutes} minutes since last drain >= {interval_minutes}")
            }
            TriggerReason::FirstRun => f.write_str("first run"),
        }
    }
}

/// Every signal that fired. Empty means no drain.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TriggerDecision {
    pub reasons: Vec<TriggerReason>,
}

impl TriggerDecision {
    pub fn should_drain(&self) -> bool {
        !self.reasons.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DrainTrigger {
    enabled: bool,
    queue_threshold: u64,
    memory_threshold_mb: f64,
    interval_minutes: u64,
}

impl DrainTrigger {
    pub fn new(enabled: bool, queue_threshold: u64, memory_threshold_mb: f64, interval_minutes: u64) -> Self {
        Self {
            enabled,
            queue_threshold,
            memory_threshold_mb,
            interval_minutes,
        }
    }

    pub fn from_config(config: &DrainConfig) -> Self {
        Self::new(
            config.enabled,
            config.queue_threshold,
            config.memory_threshold_mb,
            config.interval_minutes,
        )
    }

    /// Pure evaluation over already-measured signals.
    pub fn evaluate(
        &self,
        queue_len: Option<u64>,
        memory: Option<MemoryUsage>,
        last_drain_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> TriggerDecision {
        let mut reasons = Vec::new();
        if !self.enabled {
            return TriggerDecision { reasons };
        }

        if let Some(queue_len) = queue_len {
            if queue_len > self.queue_threshold {
                reasons.push(TriggerReason::Depth {
                    queue_len,
                    threshold: self.queue_threshold,
                });
            }
        }

        if let Some(memory) = memory {
            let used_mb = memory.used_mb();
            if used_mb > self.memory_threshold_mb {
                reasons.push(TriggerReason::Memory {
                    used_mb,
                    threshold_mb: self.memory_threshold_mb,
                });
            }
        }

        match last_drain_at {
            None => reasons.push(TriggerReason::FirstRun),
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                let interval = Duration::minutes(self.interval_minutes.min(u32::MAX as u64) as i64);
                if elapsed >= interval {
                    reasons.push(TriggerReason::Interval {
                        elapsed_minutes: elapsed.num_minutes(),
                        interval_minutes: self.interval_minutes,
                    });
                }
            }
        }

        TriggerDecision { reasons }
    }

    /// Measure queue length and memory, then evaluate.
    ///
    /// A failed measurement is logged and treated as "signal not raised";
    /// the time signal is still evaluated.
    pub async fn check_store(
        &self,
        store: &dyn QueueStore,
        last_drain_at: Option<DateTime<Utc>>,
    ) -> TriggerDecision {
        if !self.enabled {
            return TriggerDecision::default();
        }
        let queue_len = match store.len().await {
            Ok(len) => Some(len),
            Err(e) => {
                warn!(queue = %store.name(), error = %e, "Failed to read queue length for drain trigger");
                None
            }
        };
        let memory = match store.memory_usage().await {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(queue = %store.name(), error = %e, "Failed to read memory usage for drain trigger");
                None
            }
        };
        self.evaluate(queue_len, memory, last_drain_at, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger() -> DrainTrigger {
        DrainTrigger::new(true, 5000, 100.0, 60)
    }

    fn mb(n: u64) -> MemoryUsage {
        MemoryUsage {
            used_bytes: n * 1024 * 1024,
            peak_bytes: n * 1024 * 1024,
        }
    }

    #[test]
    fn test_first_run_always_triggers() {
        let d = trigger().evaluate(Some(0), Some(mb(1)), None, Utc::now());
        assert_eq!(d.reasons, vec![TriggerReason::FirstRun]);
    }

    #[test]
    fn test_depth_is_strictly_greater() {
        let now = Utc::now();
        let last = Some(now);
        assert!(!trigger().evaluate(Some(5000), None, last, now).should_drain());
        let d = trigger().evaluate(Some(5001), None, last, now);
        assert_eq!(
            d.reasons,
            vec![TriggerReason::Depth {
                queue_len: 5001,
                threshold: 5000
            }]
        );
    }

    #[test]
    fn test_memory_signal() {
        let now = Utc::now();
        let d = trigger().evaluate(Some(10), Some(mb(150)), Some(now), now);
        assert!(matches!(d.reasons.as_slice(), [TriggerReason::Memory { .. }]));
        assert!(!trigger().evaluate(Some(10), Some(mb(100)), Some(now), now).should_drain());
    }

    #[test]
    fn test_interval_reached() {
        let now = Utc::now();
        let d = trigger().evaluate(Some(10), None, Some(now - Duration::minutes(60)), now);
        assert_eq!(
            d.reasons,
            vec![TriggerReason::Interval {
                elapsed_minutes: 60,
                interval_minutes: 60
            }]
        );
        let d = trigger().evaluate(Some(10), None, Some(now - Duration::minutes(59)), now);
        assert!(!d.should_drain());
    }

    #[test]
    fn test_all_signals_reported() {
        let d = trigger().evaluate(Some(9000), Some(mb(500)), None, Utc::now());
        assert_eq!(d.reasons.len(), 3);
    }

    #[test]
    fn test_disabled_never_triggers() {
        let t = DrainTrigger::new(false, 0, 0.0, 0);
        assert!(!t.evaluate(Some(1_000_000), Some(mb(10_000)), None, Utc::now()).should_drain());
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(TriggerReason::FirstRun.to_string(), "first run");
        let depth = TriggerReason::Depth {
            queue_len: 7,
            threshold: 5,
        };
        assert_eq!(depth.to_string(), "queue length 7 > 5");
    }
}
