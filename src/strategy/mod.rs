// ============================================================================
// STROKE STRATEGIES — lifecycle callbacks plugged into the scheduler
// ============================================================================

pub mod transform;
pub mod undo_based;

pub use crate::scheduler::StrokeContext;

use crate::scheduler::job::StrokeJobData;

/// The behavior of one stroke.
///
/// All callbacks run on scheduler workers, never on the caller's thread.
/// `init_stroke` runs exclusively before any job; `finish_stroke` or
/// `cancel_stroke` runs exclusively after the queue drains, and may enqueue
/// further (non-cancellable) jobs that execute before the stroke is
/// considered done.  Exactly one of finish/cancel runs per stroke.
pub trait StrokeStrategy: Send + Sync {
    fn init_stroke(&self, ctx: &StrokeContext);

    /// Execute one queued job.  Dispatch on the payload variant.
    fn do_stroke(&self, ctx: &StrokeContext, data: StrokeJobData);

    fn finish_stroke(&self, ctx: &StrokeContext);

    fn cancel_stroke(&self, ctx: &StrokeContext);

    fn description(&self) -> String;

    /// Whether the stroke contributes an undo history entry.  The scheduler
    /// downgrades cancellation to normal completion for strokes without
    /// one: there is nothing recorded to unwind.
    fn supports_undo(&self) -> bool {
        true
    }

    /// Exclusive strokes run every job with nothing else of the stroke in
    /// flight, whatever the job's own declared discipline.
    fn is_exclusive(&self) -> bool {
        false
    }

    /// Whether the stroke publishes `PreviewReady` composites while it runs.
    fn needs_preview_image(&self) -> bool {
        false
    }

    /// Whether the stroke can run against level-of-detail planes.  No
    /// strategy in the engine opts in yet.
    fn supports_lod(&self) -> bool {
        false
    }
}
