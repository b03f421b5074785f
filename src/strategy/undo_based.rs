// ============================================================================
// UNDO-COMMAND-BASED STROKES — record child commands, publish one macro
// ============================================================================
//
// A stroke built on the recorder executes undo commands as its jobs and, on
// finish, publishes them to the history as a single macro entry.  On cancel
// it replays every recorded command backwards, honoring the scheduling
// discipline each command was recorded under, so a half-done stroke unwinds
// exactly as it was built.

use std::sync::{Arc, Mutex};

use crate::graph::ImageGraph;
use crate::history::{Command, CommandId, HistoryManager, MacroCommand};
use crate::scheduler::job::{Exclusivity, JobPayload, Sequencing, StrokeJobData};
use crate::scheduler::StrokeContext;
use crate::strategy::StrokeStrategy;

struct RecordedCommand {
    cmd: Arc<dyn Command>,
    sequencing: Sequencing,
    exclusivity: Exclusivity,
}

/// Where the stroke's aggregate command currently stands.
enum PendingCommand {
    /// Nothing recorded yet.
    Idle,
    /// Commands executed and recorded, macro not yet published.
    Pending(Vec<RecordedCommand>),
    /// Published to history (or consumed by cancellation); the recorder
    /// accepts nothing further.
    Committed,
}

struct RecorderInner {
    graph: Arc<ImageGraph>,
    history: Arc<Mutex<HistoryManager>>,
    state: Mutex<PendingCommand>,
    name: String,
    macro_id: CommandId,
}

/// Shared recorder handle; cheap to clone into job closures.
#[derive(Clone)]
pub struct CommandRecorder {
    inner: Arc<RecorderInner>,
}

fn plock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl CommandRecorder {
    pub fn new(
        graph: Arc<ImageGraph>,
        history: Arc<Mutex<HistoryManager>>,
        name: impl Into<String>,
        macro_id: CommandId,
    ) -> Self {
        Self {
            inner: Arc::new(RecorderInner {
                graph,
                history,
                state: Mutex::new(PendingCommand::Idle),
                name: name.into(),
                macro_id,
            }),
        }
    }

    pub fn graph(&self) -> &Arc<ImageGraph> {
        &self.inner.graph
    }

    pub fn history(&self) -> &Arc<Mutex<HistoryManager>> {
        &self.inner.history
    }

    /// Execute the command (redo) and record it for the final macro, tagged
    /// with the discipline it ran under so cancellation can mirror it.
    pub fn run_and_save(
        &self,
        cmd: Box<dyn Command>,
        sequencing: Sequencing,
        exclusivity: Exclusivity,
    ) {
        let mut state = plock(&self.inner.state);
        if matches!(*state, PendingCommand::Committed) {
            log_err!(
                "run_and_save after commit, dropping command '{}'",
                cmd.description()
            );
            return;
        }
        cmd.redo(&self.inner.graph);
        let recorded = RecordedCommand {
            cmd: Arc::from(cmd),
            sequencing,
            exclusivity,
        };
        match &mut *state {
            PendingCommand::Idle => *state = PendingCommand::Pending(vec![recorded]),
            PendingCommand::Pending(v) => v.push(recorded),
            PendingCommand::Committed => unreachable!(),
        }
    }

    /// Assemble the recorded commands into one macro, give the caller a
    /// chance to decorate it, and publish it to the history (merging into
    /// the top entry when eligible).
    pub fn notify_finished(&self, post: impl FnOnce(&mut MacroCommand)) {
        let recorded = {
            let mut state = plock(&self.inner.state);
            match std::mem::replace(&mut *state, PendingCommand::Committed) {
                PendingCommand::Pending(v) => v,
                PendingCommand::Idle => Vec::new(),
                PendingCommand::Committed => {
                    log_err!("notify_finished called twice for '{}'", self.inner.name);
                    return;
                }
            }
        };
        let mut macro_cmd = MacroCommand::new(self.inner.name.clone(), self.inner.macro_id);
        for r in recorded {
            macro_cmd.push(r.cmd);
        }
        post(&mut macro_cmd);
        if macro_cmd.is_empty() && macro_cmd.extra.is_none() {
            log_info!("Stroke '{}' recorded nothing, no history entry", self.inner.name);
            return;
        }
        plock(&self.inner.history).push_or_merge(macro_cmd);
    }

    /// Turn the recorded commands into undo jobs, newest first, each under
    /// the discipline its command was recorded with.  The recorder commits
    /// empty; nothing reaches the history.
    pub fn cancel_jobs(&self) -> Vec<StrokeJobData> {
        let recorded = {
            let mut state = plock(&self.inner.state);
            match std::mem::replace(&mut *state, PendingCommand::Committed) {
                PendingCommand::Pending(v) => v,
                _ => Vec::new(),
            }
        };
        let graph = Arc::clone(&self.inner.graph);
        recorded
            .into_iter()
            .rev()
            .map(|r| {
                let graph = Arc::clone(&graph);
                let cmd = r.cmd;
                let mut job = StrokeJobData::new(
                    r.sequencing,
                    JobPayload::Run(Box::new(move |_ctx| cmd.undo(&graph))),
                )
                .non_cancellable();
                if r.exclusivity == Exclusivity::Exclusive {
                    job = job.exclusive();
                }
                job
            })
            .collect()
    }
}

/// Plain undo-command stroke: every job is either a closure or a command to
/// run-and-save; finish publishes the macro, cancel unwinds it.
pub struct UndoCommandBasedStrategy {
    recorder: CommandRecorder,
}

impl UndoCommandBasedStrategy {
    pub fn new(
        graph: Arc<ImageGraph>,
        history: Arc<Mutex<HistoryManager>>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            recorder: CommandRecorder::new(graph, history, name, CommandId::Unknown),
        }
    }

    pub fn recorder(&self) -> &CommandRecorder {
        &self.recorder
    }
}

impl StrokeStrategy for UndoCommandBasedStrategy {
    fn init_stroke(&self, _ctx: &StrokeContext) {}

    fn do_stroke(&self, ctx: &StrokeContext, data: StrokeJobData) {
        match data.payload {
            JobPayload::Run(f) => f(ctx),
            JobPayload::Command(cmd) => {
                self.recorder.run_and_save(cmd, data.sequencing, data.exclusivity)
            }
            other => log_warn!(
                "undo-command stroke cannot execute a {} job",
                other.kind_name()
            ),
        }
    }

    fn finish_stroke(&self, _ctx: &StrokeContext) {
        self.recorder.notify_finished(|_| {});
    }

    fn cancel_stroke(&self, ctx: &StrokeContext) {
        ctx.add_jobs(self.recorder.cancel_jobs());
    }

    fn description(&self) -> String {
        "Undo Command Stroke".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use crate::history::TransactionCommand;
    use crate::scheduler::{SchedulerConfig, StrokeScheduler};
    use crate::surface::Surface;
    use image::Rgba;

    fn filled(w: u32, h: u32, p: Rgba<u8>) -> Surface {
        let mut s = Surface::new(w, h);
        s.fill(p);
        s
    }

    #[test]
    fn finish_publishes_single_macro() {
        let graph = Arc::new(ImageGraph::new(4, 4));
        let node = graph.add_node(Node::paint_layer("l", 4, 4), graph.root());
        let history = Arc::new(Mutex::new(HistoryManager::new(50, None)));

        let sched = StrokeScheduler::new(&SchedulerConfig::default());
        let strategy = Arc::new(UndoCommandBasedStrategy::new(
            graph.clone(),
            history.clone(),
            "Two Steps",
        ));
        let id = sched.start_stroke(strategy);

        let blank = Surface::new(4, 4);
        let red = filled(4, 4, Rgba([255, 0, 0, 255]));
        let blue = filled(4, 4, Rgba([0, 0, 255, 255]));
        sched.add_job(
            id,
            StrokeJobData::sequential(JobPayload::Command(Box::new(TransactionCommand::new(
                "a",
                node,
                blank,
                red.clone(),
            )))),
        );
        sched.add_job(
            id,
            StrokeJobData::sequential(JobPayload::Command(Box::new(TransactionCommand::new(
                "b", node, red, blue,
            )))),
        );
        sched.end_stroke(id);
        sched.wait_for_idle();

        let mut h = history.lock().unwrap();
        assert_eq!(h.len(), 1);
        graph.with_node(node, |n| {
            assert_eq!(n.paint_surface().unwrap().get_pixel(0, 0), Rgba([0, 0, 255, 255]));
        });
        // One undo reverts the whole stroke.
        h.undo(&graph);
        graph.with_node(node, |n| {
            assert_eq!(n.paint_surface().unwrap().get_pixel(0, 0), Rgba([0, 0, 0, 0]));
        });
    }

    #[test]
    fn cancel_unwinds_recorded_commands_and_leaves_history_empty() {
        let graph = Arc::new(ImageGraph::new(4, 4));
        let node = graph.add_node(Node::paint_layer("l", 4, 4), graph.root());
        let history = Arc::new(Mutex::new(HistoryManager::new(50, None)));

        let sched = StrokeScheduler::new(&SchedulerConfig::default());
        let strategy = Arc::new(UndoCommandBasedStrategy::new(
            graph.clone(),
            history.clone(),
            "Cancelled",
        ));
        let id = sched.start_stroke(strategy);

        let blank = Surface::new(4, 4);
        let red = filled(4, 4, Rgba([255, 0, 0, 255]));
        sched.add_job(
            id,
            StrokeJobData::sequential(JobPayload::Command(Box::new(TransactionCommand::new(
                "a", node, blank, red,
            ))))
            .non_cancellable(),
        );
        // Give the job a chance to execute before the cancel request.
        std::thread::sleep(std::time::Duration::from_millis(20));
        sched.cancel_stroke(id);
        sched.wait_for_idle();

        assert!(history.lock().unwrap().is_empty());
        graph.with_node(node, |n| {
            assert_eq!(n.paint_surface().unwrap().get_pixel(0, 0), Rgba([0, 0, 0, 0]));
        });
    }
}
