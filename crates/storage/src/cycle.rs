//! One scheduler tick: trigger check, drain if due, state save, sweep.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use feedstash_core::Config;
use feedstash_queue::QueueStore;

use crate::drain::{ArchiveDrain, DrainStats};
use crate::error::DrainError;
use crate::retention::{RetentionSweep, SweepStats};
use crate::state::{DrainState, StateFile};
use crate::trigger::{DrainTrigger, TriggerDecision};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub decision: TriggerDecision,
    pub drain: Option<DrainStats>,
    pub sweep: Option<SweepStats>,
}

pub struct DrainCycle {
    trigger: DrainTrigger,
    drain: ArchiveDrain,
    state: StateFile,
    sweep: Option<RetentionSweep>,
}

impl DrainCycle {
    pub fn new(trigger: DrainTrigger, drain: ArchiveDrain, state: StateFile) -> Self {
        Self {
            trigger,
            drain,
            state,
            sweep: None,
        }
    }

    pub fn with_sweep(mut self, sweep: RetentionSweep) -> Self {
        self.sweep = Some(sweep);
        self
    }

    pub fn from_config(store: Arc<dyn QueueStore>, config: &Config, state: StateFile) -> Self {
        let cycle = Self::new(
            DrainTrigger::from_config(&config.drain),
            ArchiveDrain::from_config(store, config),
            state,
        );
        if config.archive.sweep_enabled {
            cycle.with_sweep(RetentionSweep::from_config(&config.archive))
        } else {
            cycle
        }
    }

    pub fn drain(&self) -> &ArchiveDrain {
        &self.drain
    }

    /// Run one tick. A failed drain aborts the tick; sweep failures do not.
    pub async fn run_once(&self) -> Result<CycleReport, DrainError> {
        let mut state = self.state.load();
        let decision = self
            .trigger
            .check_store(self.drain.store().as_ref(), state.last_drain_at)
            .await;

        let drain = if decision.should_drain() {
            let reasons: Vec<String> = decision.reasons.iter().map(ToString::to_string).collect();
            info!(reasons = ?reasons, "Drain triggered");
            let stats = self.drain.drain().await?;
            self.record_drain(&mut state, &stats);
            Some(stats)
        } else {
            None
        };

        let sweep = match &self.sweep {
            Some(sweep) => match sweep.sweep(Utc::now()) {
                Ok(stats) => Some(stats),
                Err(e) => {
                    warn!(error = %e, "Retention sweep failed");
                    None
                }
            },
            None => None,
        };

        Ok(CycleReport {
            decision,
            drain,
            sweep,
        })
    }

    fn record_drain(&self, state: &mut DrainState, stats: &DrainStats) {
        state.last_drain_at = Some(stats.finished_at);
        if let Err(e) = self.state.save(state) {
            error!(path = %self.state.path().display(), error = %e, "Failed to persist drain state");
        }
    }
}
