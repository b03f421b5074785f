// ============================================================================
// STROKE JOBS — unit of work inside a stroke
// ============================================================================

use crate::graph::NodeId;
use crate::history::Command;
use crate::ops::transform::TransformArgs;
use crate::scheduler::StrokeContext;

/// How a job orders against the other jobs of its stroke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sequencing {
    /// Ordered with respect to other sequential jobs.
    Sequential,
    /// May run in parallel with any non-blocking job.
    Concurrent,
    /// Waits for every earlier job, and blocks every later one.
    Barrier,
}

/// Whether the job tolerates neighbours at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exclusivity {
    Normal,
    /// Runs with no other job of the stroke in flight.
    Exclusive,
}

pub type JobFn = Box<dyn FnOnce(&StrokeContext) + Send>;

/// What a job does.  Closed set: workers and strategies dispatch on the
/// variant, so adding a job kind means adding a variant here, never a
/// downcast at the execution site.
pub enum JobPayload {
    /// Arbitrary work; may enqueue follow-up jobs through the context.
    Run(JobFn),
    /// Execute and record an undo command.
    Command(Box<dyn Command>),
    /// Adopt new transform arguments from the UI.
    SaveArgs(TransformArgs),
    /// Build the composited preview source.
    PreparePreview,
    /// Apply the transform to one node.
    Transform {
        node: NodeId,
        target: TransformTarget,
        args: TransformArgs,
    },
    /// Lift a node's selected pixels into the stroke's device cache.
    ClearSelection { node: NodeId },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformTarget {
    PaintDevice,
    Selection,
}

impl JobPayload {
    /// Short tag for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            JobPayload::Run(_) => "run",
            JobPayload::Command(_) => "command",
            JobPayload::SaveArgs(_) => "save-args",
            JobPayload::PreparePreview => "prepare-preview",
            JobPayload::Transform { .. } => "transform",
            JobPayload::ClearSelection { .. } => "clear-selection",
        }
    }
}

/// A job queued on a stroke: payload plus its scheduling discipline.
pub struct StrokeJobData {
    pub sequencing: Sequencing,
    pub exclusivity: Exclusivity,
    /// Cancellable jobs are dropped from the queue when the stroke is
    /// cancelled; non-cancellable jobs run regardless.
    pub cancellable: bool,
    pub payload: JobPayload,
}

impl StrokeJobData {
    pub fn new(sequencing: Sequencing, payload: JobPayload) -> Self {
        Self {
            sequencing,
            exclusivity: Exclusivity::Normal,
            cancellable: true,
            payload,
        }
    }

    pub fn sequential(payload: JobPayload) -> Self {
        Self::new(Sequencing::Sequential, payload)
    }

    pub fn concurrent(payload: JobPayload) -> Self {
        Self::new(Sequencing::Concurrent, payload)
    }

    pub fn barrier(payload: JobPayload) -> Self {
        Self::new(Sequencing::Barrier, payload)
    }

    pub fn run_sequential(f: impl FnOnce(&StrokeContext) + Send + 'static) -> Self {
        Self::sequential(JobPayload::Run(Box::new(f)))
    }

    pub fn run_concurrent(f: impl FnOnce(&StrokeContext) + Send + 'static) -> Self {
        Self::concurrent(JobPayload::Run(Box::new(f)))
    }

    pub fn run_barrier(f: impl FnOnce(&StrokeContext) + Send + 'static) -> Self {
        Self::barrier(JobPayload::Run(Box::new(f)))
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusivity = Exclusivity::Exclusive;
        self
    }

    pub fn non_cancellable(mut self) -> Self {
        self.cancellable = false;
        self
    }

    /// A blocking job admits no concurrency at all.
    pub fn is_blocking(&self) -> bool {
        self.sequencing == Sequencing::Barrier || self.exclusivity == Exclusivity::Exclusive
    }
}
