// ============================================================================
// STROKE STATE — queue and lifecycle flags for one stroke
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use crate::scheduler::job::{Sequencing, StrokeJobData};
use crate::scheduler::StrokeId;
use crate::strategy::StrokeStrategy;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StrokePhase {
    /// Queued, strategy not initialized yet.
    Pending,
    Initializing,
    Running,
    Finishing,
    Cancelling,
}

pub(crate) struct Stroke {
    pub id: StrokeId,
    pub strategy: Arc<dyn StrokeStrategy>,
    pub jobs: VecDeque<StrokeJobData>,
    /// Capability snapshot: every job of this stroke runs as blocking.
    pub exclusive: bool,
    pub phase: StrokePhase,
    /// Jobs of this stroke currently executing on workers.
    pub in_flight: usize,
    pub sequential_in_flight: bool,
    /// A barrier or exclusive job is executing.
    pub blocking_in_flight: bool,
    pub end_requested: bool,
    pub cancel_requested: bool,
    /// The finish/cancel callback has been dispatched; the stroke only
    /// drains from here on.
    pub finalizing: bool,
}

impl Stroke {
    pub fn new(id: StrokeId, strategy: Arc<dyn StrokeStrategy>) -> Self {
        let exclusive = strategy.is_exclusive();
        Self {
            id,
            strategy,
            jobs: VecDeque::new(),
            exclusive,
            phase: StrokePhase::Pending,
            in_flight: 0,
            sequential_in_flight: false,
            blocking_in_flight: false,
            end_requested: false,
            cancel_requested: false,
            finalizing: false,
        }
    }

    /// Whether the front job may start now, given what is already running.
    pub fn front_ready(&self) -> bool {
        if self.blocking_in_flight {
            return false;
        }
        match self.jobs.front() {
            None => false,
            Some(job) if job.is_blocking() || self.exclusive => self.in_flight == 0,
            Some(job) => match job.sequencing {
                Sequencing::Sequential => !self.sequential_in_flight,
                Sequencing::Concurrent => true,
                Sequencing::Barrier => self.in_flight == 0,
            },
        }
    }

    /// Drained and nothing running.
    pub fn is_quiet(&self) -> bool {
        self.jobs.is_empty() && self.in_flight == 0
    }

    /// Drop queued jobs that tolerate cancellation.
    pub fn drop_cancellable_jobs(&mut self) {
        self.jobs.retain(|j| !j.cancellable);
    }
}
