// ============================================================================
// TRANSFORM STROKE — interactive, resumable, cache-backed transform
// ============================================================================
//
// Lifecycle of one transform stroke:
//
//   init    — optionally take over the previous transform entry on the same
//             node set, lift every node's affected pixels into a pristine
//             device cache, clear them from the layers, and publish the
//             initial parameters to the tool UI.
//   running — each parameter update from the UI recomputes the preview from
//             the caches; the layers themselves are never touched.
//   finish  — apply the final parameters from the caches (so the result is
//             independent of how many previews happened), restore hidden
//             state, publish one macro to the history.
//   cancel  — restore hidden state and unwind every recorded command; if the
//             stroke had taken over a previous entry, re-apply its
//             parameters instead so the document keeps that transform.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use image::Rgba;

use crate::geometry::IRect;
use crate::graph::{ImageGraph, NodeId, NodeKind, Selection, TransformMaskParams};
use crate::history::{
    CommandId, ExternalTransformCommand, HistoryManager, KeyframeCommand, MacroCommand,
    SelectionTransactionCommand, SurfaceTransaction, TransformCommandExtra, TransformMaskCommand,
};
use crate::ops::transform::{transform_surface, Interpolation, TransformArgs, TransformMode};
use crate::scheduler::job::{Exclusivity, JobPayload, Sequencing, StrokeJobData, TransformTarget};
use crate::scheduler::{StrokeContext, StrokeEvent};
use crate::strategy::undo_based::CommandRecorder;
use crate::strategy::StrokeStrategy;
use crate::surface::Surface;
use crate::updates::{BatchNodeUpdate, BatchUpdateCommand, CommandPhase, HoldUpdatesCommand, UpdatesFacade};

fn plock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Overlay color for selection-mask pixels in previews.
const SELECTION_PREVIEW_TINT: Rgba<u8> = Rgba([255, 0, 0, 128]);

/// Pristine pre-stroke pixels, filled lazily and at most once per node.
/// Every transform application reads from here, never from the layer, which
/// is what makes re-application idempotent.
struct DeviceCache {
    devices: Mutex<HashMap<NodeId, Arc<Surface>>>,
}

impl DeviceCache {
    fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, id: NodeId) -> Option<Arc<Surface>> {
        plock(&self.devices).get(&id).cloned()
    }

    fn contains(&self, id: NodeId) -> bool {
        plock(&self.devices).contains_key(&id)
    }

    fn put_if_absent(&self, id: NodeId, f: impl FnOnce() -> Surface) -> Arc<Surface> {
        let mut devices = plock(&self.devices);
        Arc::clone(devices.entry(id).or_insert_with(|| Arc::new(f())))
    }
}

struct TransformState {
    processed_nodes: Vec<NodeId>,
    initial_args: TransformArgs,
    saved_args: Option<TransformArgs>,
    /// A previous transform entry was taken off the history and undone.
    continuity: bool,
    /// External layers hidden for the duration of the stroke.
    hidden_nodes: Vec<NodeId>,
    /// Selection masks whose overlay decoration was switched off.
    deactivated_overlays: Vec<NodeId>,
    /// Root nodes whose tool decorations were switched off.
    disabled_decorations: Vec<NodeId>,
    deactivated_selection: bool,
    batch: Option<Arc<BatchNodeUpdate>>,
    /// Finish or cancel has started; both callbacks funnel through here and
    /// only the first one acts.
    finalizing: bool,
}

pub struct TransformStrokeStrategy {
    graph: Arc<ImageGraph>,
    updates: Arc<UpdatesFacade>,
    recorder: CommandRecorder,
    selection: Option<Arc<Selection>>,
    mode: TransformMode,
    interpolation: Interpolation,
    force_reset: bool,
    root_nodes: Vec<NodeId>,
    state: Arc<Mutex<TransformState>>,
    cache: Arc<DeviceCache>,
    selection_cache: Mutex<Option<Arc<Surface>>>,
}

impl TransformStrokeStrategy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<ImageGraph>,
        updates: Arc<UpdatesFacade>,
        history: Arc<Mutex<HistoryManager>>,
        selection: Option<Arc<Selection>>,
        mode: TransformMode,
        interpolation: Interpolation,
        root_nodes: Vec<NodeId>,
        force_reset: bool,
    ) -> Self {
        let recorder = CommandRecorder::new(
            Arc::clone(&graph),
            history,
            "Transform",
            CommandId::TransformTool,
        );
        Self {
            graph,
            updates,
            recorder,
            selection,
            mode,
            interpolation,
            force_reset,
            root_nodes,
            state: Arc::new(Mutex::new(TransformState {
                processed_nodes: Vec::new(),
                initial_args: TransformArgs::identity(mode, interpolation),
                saved_args: None,
                continuity: false,
                hidden_nodes: Vec::new(),
                deactivated_overlays: Vec::new(),
                disabled_decorations: Vec::new(),
                deactivated_selection: false,
                batch: None,
                finalizing: false,
            })),
            cache: Arc::new(DeviceCache::new()),
            selection_cache: Mutex::new(None),
        }
    }

    // ---- init phase --------------------------------------------------------

    fn build_init_jobs(&self, continuity: bool, overridden: Option<MacroCommand>) -> Vec<StrokeJobData> {
        let mut jobs = Vec::new();
        // While continuing a previous transform, every init job must run
        // even if the user cancels immediately: the undo of the overridden
        // entry has already been queued and the cleanup depends on the rest.
        let seal = |job: StrokeJobData| if continuity { job.non_cancellable() } else { job };

        jobs.push(seal(StrokeJobData::barrier(JobPayload::Command(Box::new(
            HoldUpdatesCommand::new(Arc::clone(&self.updates), CommandPhase::Initializing),
        )))));

        if let Some(overridden) = overridden {
            let graph = Arc::clone(&self.graph);
            jobs.push(seal(StrokeJobData::run_sequential(move |_| {
                use crate::history::Command;
                overridden.undo(&graph);
            })));
        }

        // Animated transform masks get a keyframe at the current time before
        // their parameters change, so earlier frames keep their values.
        let time = self.graph.current_time();
        let processed = plock(&self.state).processed_nodes.clone();
        for &node in &processed {
            let needs_key = self
                .graph
                .with_node(node, |n| {
                    matches!(
                        &n.kind,
                        NodeKind::TransformMask { animated: true, keyframes, .. }
                            if !keyframes.contains(&time)
                    )
                })
                .unwrap_or(false);
            if needs_key {
                jobs.push(seal(StrokeJobData::sequential(JobPayload::Command(
                    Box::new(KeyframeCommand::new(node, time)),
                ))));
            }
        }

        // Hide decorations, overlays and the selection outline: the pixels
        // they describe are about to start moving.
        {
            let graph = Arc::clone(&self.graph);
            let state = Arc::clone(&self.state);
            let selection = self.selection.clone();
            let root_nodes = self.root_nodes.clone();
            jobs.push(seal(StrokeJobData::run_barrier(move |_| {
                let mut st = plock(&state);
                if let Some(sel) = &selection {
                    if sel.is_visible() {
                        sel.set_visible(false);
                        st.deactivated_selection = true;
                    }
                }
                for &node in &st.processed_nodes.clone() {
                    graph.with_node_mut(node, |n| {
                        if let NodeKind::SelectionMask { overlay_visible, .. } = &mut n.kind {
                            if *overlay_visible {
                                *overlay_visible = false;
                                st.deactivated_overlays.push(node);
                            }
                        }
                    });
                }
                for &root in &root_nodes {
                    let disabled = graph
                        .with_node_mut(root, |n| {
                            let was = n.decorations_visible;
                            n.decorations_visible = false;
                            was
                        })
                        .unwrap_or(false);
                    if disabled {
                        st.disabled_decorations.push(root);
                    }
                }
            })));
        }

        // Tell the tool UI what this stroke operates on.
        {
            let graph = Arc::clone(&self.graph);
            let state = Arc::clone(&self.state);
            let selection = self.selection.clone();
            let root_nodes = self.root_nodes.clone();
            jobs.push(seal(StrokeJobData::run_barrier(move |ctx| {
                let st = plock(&state);
                let mut src_rect = IRect::default();
                for &node in &st.processed_nodes {
                    src_rect = src_rect
                        .union(&graph.with_node(node, |n| n.exact_bounds()).unwrap_or_default());
                }
                if let Some(sel) = &selection {
                    src_rect = src_rect.intersect(&sel.selected_exact_rect());
                }
                ctx.emit(StrokeEvent::TransactionGenerated {
                    stroke_id: ctx.stroke_id(),
                    root_nodes: root_nodes.clone(),
                    processed_nodes: st.processed_nodes.clone(),
                    initial_args: st.initial_args.clone(),
                    src_rect,
                });
            })));
        }

        let batch = Arc::new(BatchNodeUpdate::new());
        plock(&self.state).batch = Some(Arc::clone(&batch));
        jobs.push(seal(StrokeJobData::sequential(JobPayload::Command(
            Box::new(BatchUpdateCommand::new(
                Arc::clone(&batch),
                Arc::clone(&self.updates),
                CommandPhase::Initializing,
            )),
        ))));

        for &node in &processed {
            jobs.push(seal(
                StrokeJobData::new(Sequencing::Sequential, JobPayload::ClearSelection { node })
                    .exclusive(),
            ));
        }

        jobs.push(seal(StrokeJobData::sequential(JobPayload::Command(
            Box::new(BatchUpdateCommand::new(
                batch,
                Arc::clone(&self.updates),
                CommandPhase::Finalizing,
            )),
        ))));
        jobs.push(seal(StrokeJobData::barrier(JobPayload::Command(Box::new(
            HoldUpdatesCommand::new(Arc::clone(&self.updates), CommandPhase::Finalizing),
        )))));

        // First preview only once the caches exist.
        jobs.push(seal(StrokeJobData::barrier(JobPayload::PreparePreview)));

        jobs
    }

    // ---- per-node jobs -----------------------------------------------------

    fn clear_job(&self, node: NodeId) {
        enum Action {
            Paint,
            External,
            Mask(TransformMaskParams),
            Skip,
        }
        let action = self
            .graph
            .with_node(node, |n| match &n.kind {
                NodeKind::PaintLayer { .. } | NodeKind::SelectionMask { .. } => Action::Paint,
                NodeKind::ExternalLayer { .. } => Action::External,
                NodeKind::TransformMask { params, .. } => Action::Mask(params.clone()),
                NodeKind::GroupLayer { .. } => Action::Skip,
            })
            .unwrap_or(Action::Skip);

        match action {
            Action::Paint => {
                let selection = self.selection.clone();
                let graph = Arc::clone(&self.graph);
                self.cache.put_if_absent(node, || {
                    graph
                        .with_node(node, |n| {
                            let s = match n.paint_surface() {
                                Some(s) => s,
                                None => return Surface::new(graph.width(), graph.height()),
                            };
                            match &selection {
                                Some(sel) => sel.with_pixels(|m| s.masked_copy(m)),
                                None => s.clone(),
                            }
                        })
                        .unwrap_or_else(|| Surface::new(graph.width(), graph.height()))
                });

                let old_bounds = self
                    .graph
                    .with_node(node, |n| n.exact_bounds())
                    .unwrap_or_default();
                if let Some(t) = SurfaceTransaction::begin("Clear Source", &self.graph, node) {
                    self.graph.with_node_mut(node, |n| {
                        if let Some(s) = n.paint_surface_mut() {
                            match &self.selection {
                                Some(sel) => sel.with_pixels(|m| s.clear_masked(m)),
                                None => s.clear(),
                            }
                        }
                    });
                    if let Some(cmd) = t.end(&self.graph) {
                        self.recorder.run_and_save(
                            Box::new(cmd),
                            Sequencing::Sequential,
                            Exclusivity::Normal,
                        );
                    }
                }
                self.add_batch_update(node, old_bounds);
            }
            Action::External => {
                // External layers keep their pixels; the stroke hides them
                // and previews from a snapshot until commit swaps the
                // native transform.
                let snapshot = self
                    .graph
                    .with_node(node, |n| n.paint_surface().cloned())
                    .flatten();
                if let Some(s) = snapshot {
                    self.cache.put_if_absent(node, || s);
                }
                self.graph.with_node_mut(node, |n| n.temporarily_hidden = true);
                plock(&self.state).hidden_nodes.push(node);
                let bounds = self
                    .graph
                    .with_node(node, |n| n.exact_bounds())
                    .unwrap_or_default();
                self.add_batch_update(node, bounds);
            }
            Action::Mask(old) => {
                let mut hidden = old.clone();
                hidden.hidden = true;
                self.recorder.run_and_save(
                    Box::new(TransformMaskCommand::new(node, old, hidden)),
                    Sequencing::Sequential,
                    Exclusivity::Normal,
                );
                self.add_batch_update(node, self.graph.bounds());
            }
            Action::Skip => {}
        }
    }

    fn transform_job(&self, node: NodeId, target: TransformTarget, args: &TransformArgs) {
        if target == TransformTarget::Selection {
            self.transform_selection(args);
            return;
        }

        enum Kind {
            Paint,
            External { old: crate::geometry::Mat3, supports_perspective: bool },
            Mask(TransformMaskParams),
            Skip,
        }
        let kind = self
            .graph
            .with_node(node, |n| match &n.kind {
                NodeKind::PaintLayer { .. } | NodeKind::SelectionMask { .. } => Kind::Paint,
                NodeKind::ExternalLayer {
                    native_transform,
                    supports_perspective,
                    ..
                } => Kind::External {
                    old: *native_transform,
                    supports_perspective: *supports_perspective,
                },
                NodeKind::TransformMask { params, .. } => Kind::Mask(params.clone()),
                NodeKind::GroupLayer { .. } => Kind::Skip,
            })
            .unwrap_or(Kind::Skip);

        match kind {
            Kind::Paint => {
                let Some(cache) = self.cache.get(node) else {
                    log_warn!("transform: node {:?} has no cached source, skipping", node);
                    return;
                };
                let old_bounds = self
                    .graph
                    .with_node(node, |n| n.exact_bounds())
                    .unwrap_or_default();
                if let Some(t) = SurfaceTransaction::begin("Transform", &self.graph, node) {
                    let transformed = transform_surface(&cache, args);
                    let new_bounds = transformed.exact_bounds();
                    self.graph.with_node_mut(node, |n| {
                        if let Some(s) = n.paint_surface_mut() {
                            s.alpha_over(&transformed);
                        }
                    });
                    if let Some(cmd) = t.end(&self.graph) {
                        self.recorder.run_and_save(
                            Box::new(cmd),
                            Sequencing::Concurrent,
                            Exclusivity::Normal,
                        );
                    }
                    self.add_batch_update(node, old_bounds.union(&new_bounds));
                }
            }
            Kind::External { old, supports_perspective } => {
                // External backends accept only affine maps; a perspective
                // transform degrades to its affine part.
                if args.mode == TransformMode::Perspective && !supports_perspective {
                    log_info!("external layer {:?} does not support perspective, applying affine part", node);
                }
                let delta = args.to_affine_matrix(self.graph.width(), self.graph.height());
                let new = delta.mul(&old);
                let bounds = self
                    .graph
                    .with_node(node, |n| n.exact_bounds())
                    .unwrap_or_default();
                self.recorder.run_and_save(
                    Box::new(ExternalTransformCommand::new(node, old, new)),
                    Sequencing::Concurrent,
                    Exclusivity::Normal,
                );
                // The backend re-renders asynchronously; the dirty rect is
                // the theoretical extent of the mapped content.
                self.add_batch_update(node, bounds.union(&new.map_rect(&bounds)));
            }
            Kind::Mask(old) => {
                let new = TransformMaskParams {
                    args: args.clone(),
                    hidden: false,
                };
                self.recorder.run_and_save(
                    Box::new(TransformMaskCommand::new(node, old, new)),
                    Sequencing::Concurrent,
                    Exclusivity::Normal,
                );
                self.add_batch_update(node, self.graph.bounds());
            }
            Kind::Skip => {}
        }
    }

    fn transform_selection(&self, args: &TransformArgs) {
        let Some(sel) = &self.selection else { return };
        let cache = {
            let mut cached = plock(&self.selection_cache);
            Arc::clone(
                cached.get_or_insert_with(|| Arc::new(sel.with_pixels(|p| p.clone()))),
            )
        };
        let before = sel.with_pixels(|p| p.clone());
        let after = transform_surface(&cache, args);
        if before == after {
            return;
        }
        self.recorder.run_and_save(
            Box::new(SelectionTransactionCommand::new(
                Arc::clone(sel),
                before,
                after,
            )),
            Sequencing::Sequential,
            Exclusivity::Exclusive,
        );
    }

    fn add_batch_update(&self, node: NodeId, rect: IRect) {
        if let Some(batch) = plock(&self.state).batch.clone() {
            batch.add_update(node, rect);
        }
    }

    // ---- preview -----------------------------------------------------------

    /// Composite of the cached (pristine) sources with `args` applied.
    /// The layers themselves are untouched; the canvas draws this on top.
    /// Selection masks carry coverage, not content, so their caches render
    /// as a tinted overlay above the composite.
    fn build_preview(&self, args: &TransformArgs) -> Surface {
        let sources: Vec<NodeId> = plock(&self.state)
            .processed_nodes
            .iter()
            .copied()
            .filter(|&id| self.cache.contains(id))
            .collect();

        let mut layer_sources = Vec::new();
        let mut mask_sources = Vec::new();
        for id in sources {
            let is_mask = self
                .graph
                .with_node(id, |n| matches!(n.kind, NodeKind::SelectionMask { .. }))
                .unwrap_or(false);
            if is_mask {
                mask_sources.push(id);
            } else {
                layer_sources.push(id);
            }
        }

        let (stage, pairs) = self.graph.preview_clone(&layer_sources);
        for (src, dst) in pairs {
            if let Some(cache) = self.cache.get(src) {
                let transformed = transform_surface(&cache, args);
                stage.with_node_mut(dst, |n| {
                    if let Some(s) = n.paint_surface_mut() {
                        *s = transformed;
                    }
                });
            }
        }
        let mut out = stage.composite();

        for id in mask_sources {
            if let Some(cache) = self.cache.get(id) {
                let moved = transform_surface(&cache, args);
                out.tint_masked(&moved, SELECTION_PREVIEW_TINT);
            }
        }
        out
    }

    // ---- finalization ------------------------------------------------------

    /// Shared tail of finish and cancel.  `apply` carries the parameters to
    /// commit, or `None` to unwind every recorded command.
    fn finish_impl(&self, ctx: &StrokeContext, apply: Option<TransformArgs>) {
        {
            let mut st = plock(&self.state);
            if st.finalizing {
                log_warn!("transform stroke finalized twice, ignoring");
                return;
            }
            st.finalizing = true;
        }

        let mut jobs: Vec<StrokeJobData> = Vec::new();
        let batch = Arc::new(BatchNodeUpdate::new());
        plock(&self.state).batch = Some(Arc::clone(&batch));

        jobs.push(
            StrokeJobData::barrier(JobPayload::Command(Box::new(HoldUpdatesCommand::new(
                Arc::clone(&self.updates),
                CommandPhase::Initializing,
            ))))
            .non_cancellable(),
        );
        jobs.push(
            StrokeJobData::sequential(JobPayload::Command(Box::new(BatchUpdateCommand::new(
                Arc::clone(&batch),
                Arc::clone(&self.updates),
                CommandPhase::Initializing,
            ))))
            .non_cancellable(),
        );

        if let Some(args) = &apply {
            let processed = plock(&self.state).processed_nodes.clone();
            for node in processed {
                jobs.push(
                    StrokeJobData::concurrent(JobPayload::Transform {
                        node,
                        target: TransformTarget::PaintDevice,
                        args: args.clone(),
                    })
                    .non_cancellable(),
                );
            }
            if self.selection.is_some() {
                jobs.push(
                    StrokeJobData::new(
                        Sequencing::Sequential,
                        JobPayload::Transform {
                            node: self.graph.root(),
                            target: TransformTarget::Selection,
                            args: args.clone(),
                        },
                    )
                    .exclusive()
                    .non_cancellable(),
                );
            }
        }

        // Restore everything the init phase hid or switched off.
        {
            let graph = Arc::clone(&self.graph);
            let state = Arc::clone(&self.state);
            let selection = self.selection.clone();
            jobs.push(
                StrokeJobData::run_barrier(move |_| {
                    let mut st = plock(&state);
                    for node in st.hidden_nodes.drain(..) {
                        graph.with_node_mut(node, |n| n.temporarily_hidden = false);
                    }
                    for node in st.deactivated_overlays.drain(..) {
                        graph.with_node_mut(node, |n| {
                            if let NodeKind::SelectionMask { overlay_visible, .. } = &mut n.kind {
                                *overlay_visible = true;
                            }
                        });
                    }
                    for node in st.disabled_decorations.drain(..) {
                        graph.with_node_mut(node, |n| n.decorations_visible = true);
                    }
                    if st.deactivated_selection {
                        st.deactivated_selection = false;
                        if let Some(sel) = &selection {
                            sel.set_visible(true);
                        }
                    }
                })
                .non_cancellable(),
            );
        }

        jobs.push(
            StrokeJobData::sequential(JobPayload::Command(Box::new(BatchUpdateCommand::new(
                batch,
                Arc::clone(&self.updates),
                CommandPhase::Finalizing,
            ))))
            .non_cancellable(),
        );
        jobs.push(
            StrokeJobData::barrier(JobPayload::Command(Box::new(HoldUpdatesCommand::new(
                Arc::clone(&self.updates),
                CommandPhase::Finalizing,
            ))))
            .non_cancellable(),
        );

        // Publish or unwind, strictly after everything above has settled.
        {
            let recorder = self.recorder.clone();
            let state = Arc::clone(&self.state);
            let root_nodes = self.root_nodes.clone();
            let merge_allowed = !self.force_reset;
            let commit = apply;
            jobs.push(
                StrokeJobData::run_barrier(move |ctx| match commit {
                    Some(args) => {
                        let processed = plock(&state).processed_nodes.clone();
                        recorder.notify_finished(|m| {
                            m.merge_allowed = merge_allowed;
                            m.extra = Some(TransformCommandExtra {
                                args: args.clone(),
                                root_nodes: root_nodes.clone(),
                                processed_nodes: processed.clone(),
                            });
                        });
                    }
                    None => ctx.add_jobs(recorder.cancel_jobs()),
                })
                .non_cancellable(),
            );
        }

        ctx.add_jobs(jobs);
    }
}

impl StrokeStrategy for TransformStrokeStrategy {
    fn init_stroke(&self, ctx: &StrokeContext) {
        let processed = self.graph.fetch_transformable(&self.root_nodes);
        if processed.is_empty() {
            log_warn!("transform stroke started with no transformable nodes");
        }

        let overridden = if self.force_reset {
            None
        } else {
            plock(self.recorder.history()).take_last_transform(&self.root_nodes)
        };
        let continuity = overridden.is_some();

        {
            let mut st = plock(&self.state);
            st.processed_nodes = processed;
            st.continuity = continuity;
            st.initial_args = overridden
                .as_ref()
                .and_then(|m| m.extra.as_ref())
                .map(|e| e.args.clone())
                .unwrap_or_else(|| TransformArgs::identity(self.mode, self.interpolation));
        }
        if continuity {
            log_info!("transform stroke resumes the previous transform entry");
        }

        ctx.add_jobs(self.build_init_jobs(continuity, overridden));
    }

    fn do_stroke(&self, ctx: &StrokeContext, data: StrokeJobData) {
        match data.payload {
            JobPayload::Run(f) => f(ctx),
            JobPayload::Command(cmd) => {
                self.recorder
                    .run_and_save(cmd, data.sequencing, data.exclusivity)
            }
            JobPayload::SaveArgs(args) => {
                plock(&self.state).saved_args = Some(args.clone());
                ctx.emit(StrokeEvent::PreviewReady(self.build_preview(&args)));
            }
            JobPayload::PreparePreview => {
                let args = {
                    let st = plock(&self.state);
                    st.saved_args.clone().unwrap_or_else(|| st.initial_args.clone())
                };
                ctx.emit(StrokeEvent::PreviewReady(self.build_preview(&args)));
            }
            JobPayload::Transform { node, target, args } => self.transform_job(node, target, &args),
            JobPayload::ClearSelection { node } => self.clear_job(node),
        }
    }

    fn finish_stroke(&self, ctx: &StrokeContext) {
        let (saved, initial, continuity) = {
            let st = plock(&self.state);
            (st.saved_args.clone(), st.initial_args.clone(), st.continuity)
        };
        match saved {
            Some(args) if !args.is_unchanging(&initial) => self.finish_impl(ctx, Some(args)),
            _ => {
                // Nothing changed since the stroke began.  A resumed stroke
                // must still re-apply (and re-publish) the entry it took
                // over; a fresh one just unwinds.
                let reapply = continuity && !initial.is_identity();
                self.finish_impl(ctx, if reapply { Some(initial) } else { None });
            }
        }
    }

    fn cancel_stroke(&self, ctx: &StrokeContext) {
        // If cancellation dropped the job that would have re-enabled
        // updates, repair that before anything else.
        if !self.updates.dirty_requests_enabled() {
            self.updates.enable_dirty_requests();
        }
        let (initial, continuity) = {
            let st = plock(&self.state);
            (st.initial_args.clone(), st.continuity)
        };
        let reapply = continuity && !initial.is_identity();
        self.finish_impl(ctx, if reapply { Some(initial) } else { None });
    }

    fn description(&self) -> String {
        "Transform".into()
    }

    fn needs_preview_image(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use crate::scheduler::{SchedulerConfig, StrokeScheduler};
    use image::Rgba;

    struct Fixture {
        graph: Arc<ImageGraph>,
        updates: Arc<UpdatesFacade>,
        history: Arc<Mutex<HistoryManager>>,
        sched: StrokeScheduler,
    }

    impl Fixture {
        fn new(w: u32, h: u32) -> Self {
            Self {
                graph: Arc::new(ImageGraph::new(w, h)),
                updates: Arc::new(UpdatesFacade::new()),
                history: Arc::new(Mutex::new(HistoryManager::new(50, None))),
                sched: StrokeScheduler::new(&SchedulerConfig::default()),
            }
        }

        fn strategy(&self, roots: Vec<NodeId>, force_reset: bool) -> Arc<TransformStrokeStrategy> {
            Arc::new(TransformStrokeStrategy::new(
                Arc::clone(&self.graph),
                Arc::clone(&self.updates),
                Arc::clone(&self.history),
                None,
                TransformMode::Free,
                Interpolation::Bilinear,
                roots,
                force_reset,
            ))
        }

        fn run_transform(&self, roots: Vec<NodeId>, args: TransformArgs) {
            let id = self.sched.start_stroke(self.strategy(roots, false));
            self.sched
                .add_job(id, StrokeJobData::sequential(JobPayload::SaveArgs(args)));
            self.sched.end_stroke(id);
            self.sched.wait_for_idle();
        }
    }

    fn offset_args(dx: f32, dy: f32) -> TransformArgs {
        let mut a = TransformArgs::identity(TransformMode::Free, Interpolation::Bilinear);
        a.offset_x = dx;
        a.offset_y = dy;
        a
    }

    fn dot_layer(f: &Fixture, x: u32, y: u32) -> NodeId {
        let node = f.graph.add_node(Node::paint_layer("l", f.graph.width(), f.graph.height()), f.graph.root());
        f.graph.with_node_mut(node, |n| {
            n.paint_surface_mut().unwrap().put_pixel(x, y, Rgba([255, 0, 0, 255]));
        });
        node
    }

    #[test]
    fn commit_moves_pixels_and_single_undo_restores() {
        let f = Fixture::new(16, 16);
        let node = dot_layer(&f, 2, 3);
        f.run_transform(vec![node], offset_args(5.0, 4.0));

        f.graph.with_node(node, |n| {
            let s = n.paint_surface().unwrap();
            assert_eq!(s.get_pixel(7, 7)[3], 255);
            assert_eq!(s.get_pixel(2, 3)[3], 0);
        });

        let mut h = f.history.lock().unwrap();
        assert_eq!(h.len(), 1);
        assert!(h.undo(&f.graph));
        f.graph.with_node(node, |n| {
            let s = n.paint_surface().unwrap();
            assert_eq!(s.get_pixel(2, 3)[3], 255);
            assert_eq!(s.get_pixel(7, 7)[3], 0);
        });
    }

    #[test]
    fn cancel_restores_original_pixels_and_no_history() {
        let f = Fixture::new(16, 16);
        let node = dot_layer(&f, 2, 3);
        let before = f.graph.with_node(node, |n| n.paint_surface().cloned()).flatten().unwrap();

        let id = f.sched.start_stroke(f.strategy(vec![node], false));
        f.sched
            .add_job(id, StrokeJobData::sequential(JobPayload::SaveArgs(offset_args(5.0, 4.0))));
        std::thread::sleep(std::time::Duration::from_millis(30));
        f.sched.cancel_stroke(id);
        f.sched.wait_for_idle();

        assert!(f.history.lock().unwrap().is_empty());
        let after = f.graph.with_node(node, |n| n.paint_surface().cloned()).flatten().unwrap();
        assert!(after == before);
        assert!(f.updates.dirty_requests_enabled());
    }

    #[test]
    fn repeated_previews_do_not_change_commit_result() {
        let f = Fixture::new(16, 16);
        let node = dot_layer(&f, 4, 4);
        let original = f.graph.with_node(node, |n| n.paint_surface().cloned()).flatten().unwrap();

        let id = f.sched.start_stroke(f.strategy(vec![node], false));
        // A storm of preview updates before the final value.
        for i in 1..6 {
            f.sched.add_job(
                id,
                StrokeJobData::sequential(JobPayload::SaveArgs(offset_args(i as f32, 0.0))),
            );
        }
        f.sched
            .add_job(id, StrokeJobData::sequential(JobPayload::SaveArgs(offset_args(3.0, 0.0))));
        f.sched.end_stroke(id);
        f.sched.wait_for_idle();

        let expected = transform_surface(&original, &offset_args(3.0, 0.0));
        let got = f.graph.with_node(node, |n| n.paint_surface().cloned()).flatten().unwrap();
        assert!(got == expected);
    }

    #[test]
    fn second_stroke_resumes_and_merges_into_one_entry() {
        let f = Fixture::new(16, 16);
        let node = dot_layer(&f, 2, 2);
        let original = f.graph.with_node(node, |n| n.paint_surface().cloned()).flatten().unwrap();

        f.run_transform(vec![node], offset_args(4.0, 0.0));
        f.run_transform(vec![node], offset_args(6.0, 1.0));

        // Second application replaced the first, computed from pristine
        // pixels, and the history holds a single combined entry.
        let expected = transform_surface(&original, &offset_args(6.0, 1.0));
        let got = f.graph.with_node(node, |n| n.paint_surface().cloned()).flatten().unwrap();
        assert!(got == expected);

        let mut h = f.history.lock().unwrap();
        assert_eq!(h.len(), 1);
        assert!(h.undo(&f.graph));
        let restored = f.graph.with_node(node, |n| n.paint_surface().cloned()).flatten().unwrap();
        assert!(restored == original);
    }

    #[test]
    fn resumed_stroke_reports_previous_args() {
        let f = Fixture::new(16, 16);
        let node = dot_layer(&f, 2, 2);
        f.run_transform(vec![node], offset_args(4.0, 0.0));
        f.sched.poll_events();

        let id = f.sched.start_stroke(f.strategy(vec![node], false));
        f.sched.end_stroke(id);
        f.sched.wait_for_idle();

        let events = f.sched.poll_events();
        let initial = events.iter().find_map(|e| match e {
            StrokeEvent::TransactionGenerated { initial_args, .. } => Some(initial_args.clone()),
            _ => None,
        });
        assert_eq!(initial, Some(offset_args(4.0, 0.0)));
        // Ending without changes keeps the document in the transformed state
        // and the entry on the stack.
        assert_eq!(f.history.lock().unwrap().len(), 1);
    }

    #[test]
    fn preview_keeps_layer_content_when_a_mask_sorts_first() {
        let f = Fixture::new(32, 32);
        // The mask gets the smaller id, so pairing by position instead of
        // by node identity would hand its cache to the layer's slot.
        let mut coverage = Surface::new(32, 32);
        coverage.put_pixel(2, 2, Rgba([0, 0, 0, 255]));
        let mask = f.graph.add_node(Node::selection_mask("m", coverage), f.graph.root());
        let layer = dot_layer(&f, 20, 20);

        let id = f.sched.start_stroke(f.strategy(vec![mask, layer], false));
        f.sched.end_stroke(id);
        f.sched.wait_for_idle();

        let preview = f
            .sched
            .poll_events()
            .into_iter()
            .find_map(|e| match e {
                StrokeEvent::PreviewReady(s) => Some(s),
                _ => None,
            })
            .unwrap();

        // The layer's pixel stays layer content.
        assert_eq!(preview.get_pixel(20, 20), Rgba([255, 0, 0, 255]));
        // The mask's pixel renders as a translucent tint, not as content.
        assert_eq!(preview.get_pixel(2, 2), Rgba([255, 0, 0, 128]));
    }

    #[test]
    fn transform_mask_gets_params_not_pixels() {
        let f = Fixture::new(16, 16);
        let mask = f.graph.add_node(
            Node::transform_mask(
                "tm",
                TransformMaskParams {
                    args: TransformArgs::identity(TransformMode::Free, Interpolation::Bilinear),
                    hidden: false,
                },
            ),
            f.graph.root(),
        );
        f.run_transform(vec![mask], offset_args(2.0, 2.0));

        f.graph.with_node(mask, |n| {
            if let NodeKind::TransformMask { params, .. } = &n.kind {
                assert!(!params.hidden);
                assert_eq!(params.args.offset_x, 2.0);
            } else {
                panic!("node kind changed");
            }
        });
    }
}
