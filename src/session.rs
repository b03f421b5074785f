// ============================================================================
// SESSION — owns the graph, history, update facade and scheduler
// ============================================================================
//
// All collaborators are wired here and passed down explicitly; nothing in
// the engine reaches for a global.

use std::sync::{Arc, Mutex};

use crate::graph::{ImageGraph, NodeId, Selection};
use crate::history::HistoryManager;
use crate::ops::transform::{Interpolation, TransformArgs, TransformMode};
use crate::scheduler::job::{JobPayload, StrokeJobData};
use crate::scheduler::{SchedulerConfig, StrokeEvent, StrokeId, StrokeScheduler};
use crate::strategy::transform::TransformStrokeStrategy;
use crate::strategy::StrokeStrategy;
use crate::updates::UpdatesFacade;

pub struct Session {
    graph: Arc<ImageGraph>,
    updates: Arc<UpdatesFacade>,
    history: Arc<Mutex<HistoryManager>>,
    scheduler: StrokeScheduler,
}

impl Session {
    pub fn new(width: u32, height: u32, config: SchedulerConfig) -> Self {
        log_info!("Session opened: {}x{} canvas", width, height);
        Self {
            graph: Arc::new(ImageGraph::new(width, height)),
            updates: Arc::new(UpdatesFacade::new()),
            history: Arc::new(Mutex::new(HistoryManager::new(
                config.max_history,
                config.history_memory_bytes,
            ))),
            scheduler: StrokeScheduler::new(&config),
        }
    }

    pub fn graph(&self) -> &Arc<ImageGraph> {
        &self.graph
    }

    pub fn updates(&self) -> &Arc<UpdatesFacade> {
        &self.updates
    }

    pub fn history(&self) -> &Arc<Mutex<HistoryManager>> {
        &self.history
    }

    pub fn scheduler(&self) -> &StrokeScheduler {
        &self.scheduler
    }

    /// Start a stroke with an arbitrary strategy.
    pub fn start_stroke(&self, strategy: Arc<dyn StrokeStrategy>) -> StrokeId {
        self.scheduler.start_stroke(strategy)
    }

    /// Start an interactive transform over `roots`.
    pub fn begin_transform(
        &self,
        roots: Vec<NodeId>,
        selection: Option<Arc<Selection>>,
        mode: TransformMode,
        interpolation: Interpolation,
        force_reset: bool,
    ) -> StrokeId {
        let strategy = Arc::new(TransformStrokeStrategy::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.updates),
            Arc::clone(&self.history),
            selection,
            mode,
            interpolation,
            roots,
            force_reset,
        ));
        self.scheduler.start_stroke(strategy)
    }

    /// Feed updated parameters from the tool UI into a running transform.
    pub fn update_transform(&self, stroke: StrokeId, args: TransformArgs) {
        self.scheduler
            .add_job(stroke, StrokeJobData::sequential(JobPayload::SaveArgs(args)));
    }

    pub fn end_stroke(&self, stroke: StrokeId) {
        self.scheduler.end_stroke(stroke);
    }

    pub fn cancel_stroke(&self, stroke: StrokeId) {
        self.scheduler.cancel_stroke(stroke);
    }

    pub fn wait_for_idle(&self) {
        self.scheduler.wait_for_idle();
    }

    pub fn poll_events(&self) -> Vec<StrokeEvent> {
        self.scheduler.poll_events()
    }

    /// Undo the newest history entry.  Waits for running strokes first so
    /// the entry being undone is complete.
    pub fn undo(&self) -> bool {
        self.scheduler.wait_for_idle();
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .undo(&self.graph)
    }

    pub fn redo(&self) -> bool {
        self.scheduler.wait_for_idle();
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .redo(&self.graph)
    }
}
