// ============================================================================
// HISTORY — undo commands, macro aggregation, and the bounded history stack
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use crate::geometry::Mat3;
use crate::graph::{ImageGraph, NodeId, Selection, TransformMaskParams};
use crate::ops::transform::TransformArgs;
use crate::surface::Surface;

/// Identifies commands that are allowed to merge with each other on the
/// history stack.  `Unknown` never merges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandId {
    TransformTool,
    Unknown,
}

/// A reversible edit of the image graph.
///
/// Commands carry their own state (before/after snapshots or parameters),
/// so `undo`/`redo` may be replayed from any thread that holds the graph.
pub trait Command: Send + Sync {
    fn redo(&self, graph: &ImageGraph);
    fn undo(&self, graph: &ImageGraph);
    fn description(&self) -> String;
    /// Approximate heap footprint, used for history pruning.
    fn memory_size(&self) -> usize;

    fn id(&self) -> CommandId {
        CommandId::Unknown
    }

    fn as_macro(&self) -> Option<&MacroCommand> {
        None
    }

    fn into_macro(self: Box<Self>) -> Option<MacroCommand> {
        None
    }
}

// ============================================================================
// MACRO COMMAND — ordered aggregate, one per stroke
// ============================================================================

/// Extra payload attached to a finished transform macro.  It lets a later
/// stroke on the same node set pick the macro up and continue editing it.
#[derive(Clone, Debug)]
pub struct TransformCommandExtra {
    pub args: TransformArgs,
    pub root_nodes: Vec<NodeId>,
    pub processed_nodes: Vec<NodeId>,
}

impl TransformCommandExtra {
    /// Node-set equality, order-insensitive.
    pub fn same_roots(&self, roots: &[NodeId]) -> bool {
        let mut a = self.root_nodes.clone();
        let mut b = roots.to_vec();
        a.sort();
        b.sort();
        a == b
    }
}

/// An ordered list of child commands undone and redone as one unit.
///
/// The children are `Arc`s because the stroke machinery keeps references to
/// them while the stroke is still running (cancellation replays them as
/// jobs).
pub struct MacroCommand {
    pub name: String,
    id: CommandId,
    children: Vec<Arc<dyn Command>>,
    pub extra: Option<TransformCommandExtra>,
    /// Whether this macro may be absorbed into a matching top entry.
    /// A stroke started with `force_reset` publishes with this off.
    pub merge_allowed: bool,
}

impl MacroCommand {
    pub fn new(name: impl Into<String>, id: CommandId) -> Self {
        Self {
            name: name.into(),
            id,
            children: Vec::new(),
            extra: None,
            merge_allowed: false,
        }
    }

    pub fn push(&mut self, cmd: Arc<dyn Command>) {
        self.children.push(cmd);
    }

    pub fn children(&self) -> &[Arc<dyn Command>] {
        &self.children
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Append another macro's children (in order) and adopt its extra.
    /// Used when a follow-up stroke merges into an existing history entry.
    pub fn absorb(&mut self, mut other: MacroCommand) {
        self.children.append(&mut other.children);
        if other.extra.is_some() {
            self.extra = other.extra;
        }
    }
}

impl Command for MacroCommand {
    fn redo(&self, graph: &ImageGraph) {
        for c in &self.children {
            c.redo(graph);
        }
    }

    fn undo(&self, graph: &ImageGraph) {
        for c in self.children.iter().rev() {
            c.undo(graph);
        }
    }

    fn description(&self) -> String {
        self.name.clone()
    }

    fn memory_size(&self) -> usize {
        self.children.iter().map(|c| c.memory_size()).sum()
    }

    fn id(&self) -> CommandId {
        self.id
    }

    fn as_macro(&self) -> Option<&MacroCommand> {
        Some(self)
    }

    fn into_macro(self: Box<Self>) -> Option<MacroCommand> {
        Some(*self)
    }
}

// ============================================================================
// HISTORY MANAGER — bounded undo/redo stacks with memory pruning
// ============================================================================

pub struct HistoryManager {
    undo_stack: VecDeque<Box<dyn Command>>,
    redo_stack: VecDeque<Box<dyn Command>>,
    max_commands: usize,
    memory_limit: Option<usize>,
}

impl HistoryManager {
    pub fn new(max_commands: usize, memory_limit: Option<usize>) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_commands,
            memory_limit,
        }
    }

    pub fn push(&mut self, cmd: Box<dyn Command>) {
        // A new edit invalidates the redo branch.
        self.redo_stack.clear();
        self.undo_stack.push_back(cmd);
        self.prune();
    }

    /// Push a finished macro, merging it into the top entry when both carry
    /// the same id and describe the same root node set.  Merged children run
    /// after the existing ones, so the combined entry undoes both strokes at
    /// once.
    pub fn push_or_merge(&mut self, macro_cmd: MacroCommand) {
        if self.redo_stack.is_empty() {
            if let Some(top) = self.undo_stack.back_mut() {
                let mergeable = macro_cmd.merge_allowed
                    && top.id() == macro_cmd.id()
                    && macro_cmd.id() != CommandId::Unknown
                    && match (top.as_macro().and_then(|m| m.extra.as_ref()), macro_cmd.extra.as_ref()) {
                        (Some(a), Some(b)) => a.same_roots(&b.root_nodes),
                        _ => false,
                    };
                if mergeable {
                    // Steal the top entry, absorb, and put it back.
                    if let Some(mut existing) = self
                        .undo_stack
                        .pop_back()
                        .and_then(|b| b.into_macro())
                    {
                        existing.absorb(macro_cmd);
                        self.undo_stack.push_back(Box::new(existing));
                        self.prune();
                        return;
                    }
                }
            }
        }
        self.push(Box::new(macro_cmd));
    }

    /// If the top entry is a transform macro on exactly `roots`, pop and
    /// return it.  The caller takes ownership; nothing remains on the stack.
    pub fn take_last_transform(&mut self, roots: &[NodeId]) -> Option<MacroCommand> {
        if !self.redo_stack.is_empty() {
            return None;
        }
        let matches = self
            .undo_stack
            .back()
            .and_then(|c| c.as_macro())
            .and_then(|m| m.extra.as_ref())
            .map(|e| e.same_roots(roots))
            .unwrap_or(false);
        let is_transform = self
            .undo_stack
            .back()
            .map(|c| c.id() == CommandId::TransformTool)
            .unwrap_or(false);
        if matches && is_transform {
            return self.undo_stack.pop_back().and_then(|b| b.into_macro());
        }
        None
    }

    pub fn undo(&mut self, graph: &ImageGraph) -> bool {
        match self.undo_stack.pop_back() {
            Some(cmd) => {
                cmd.undo(graph);
                log_info!("Undo: {}", cmd.description());
                self.redo_stack.push_back(cmd);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self, graph: &ImageGraph) -> bool {
        match self.redo_stack.pop_back() {
            Some(cmd) => {
                cmd.redo(graph);
                log_info!("Redo: {}", cmd.description());
                self.undo_stack.push_back(cmd);
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo_stack.is_empty()
    }

    pub fn top_description(&self) -> Option<String> {
        self.undo_stack.back().map(|c| c.description())
    }

    pub fn total_memory(&self) -> usize {
        self.undo_stack.iter().map(|c| c.memory_size()).sum::<usize>()
            + self.redo_stack.iter().map(|c| c.memory_size()).sum::<usize>()
    }

    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_commands {
            self.undo_stack.pop_front();
        }
        if let Some(limit) = self.memory_limit {
            while self.undo_stack.len() > 1 && self.total_memory() > limit {
                self.undo_stack.pop_front();
            }
        }
    }
}

// ============================================================================
// CONCRETE COMMANDS
// ============================================================================

fn edit_node<R>(graph: &ImageGraph, id: NodeId, f: impl FnOnce(&mut crate::graph::Node) -> R) -> Option<R> {
    graph.with_node_mut(id, f)
}

/// Before/after snapshot of a node's pixel buffer.
pub struct TransactionCommand {
    pub node: NodeId,
    before: Surface,
    after: Surface,
    name: String,
}

impl TransactionCommand {
    pub fn new(name: impl Into<String>, node: NodeId, before: Surface, after: Surface) -> Self {
        Self {
            node,
            before,
            after,
            name: name.into(),
        }
    }
}

impl Command for TransactionCommand {
    fn redo(&self, graph: &ImageGraph) {
        edit_node(graph, self.node, |n| {
            if let Some(s) = n.paint_surface_mut() {
                *s = self.after.clone();
            }
        });
    }

    fn undo(&self, graph: &ImageGraph) {
        edit_node(graph, self.node, |n| {
            if let Some(s) = n.paint_surface_mut() {
                *s = self.before.clone();
            }
        });
    }

    fn description(&self) -> String {
        self.name.clone()
    }

    fn memory_size(&self) -> usize {
        self.before.memory_bytes() + self.after.memory_bytes()
    }
}

/// Captures a node's surface, lets the caller mutate it, and yields the
/// command on `end`.  Returns `None` when nothing actually changed.
pub struct SurfaceTransaction {
    name: String,
    node: NodeId,
    before: Surface,
}

impl SurfaceTransaction {
    pub fn begin(name: impl Into<String>, graph: &ImageGraph, node: NodeId) -> Option<Self> {
        let before = graph.with_node(node, |n| n.paint_surface().cloned())??;
        Some(Self {
            name: name.into(),
            node,
            before,
        })
    }

    pub fn end(self, graph: &ImageGraph) -> Option<TransactionCommand> {
        let after = graph.with_node(self.node, |n| n.paint_surface().cloned())??;
        if after == self.before {
            return None;
        }
        Some(TransactionCommand::new(self.name, self.node, self.before, after))
    }
}

/// Before/after snapshot of the shared selection's pixels.
pub struct SelectionTransactionCommand {
    selection: Arc<Selection>,
    before: Surface,
    after: Surface,
}

impl SelectionTransactionCommand {
    pub fn new(selection: Arc<Selection>, before: Surface, after: Surface) -> Self {
        Self {
            selection,
            before,
            after,
        }
    }
}

impl Command for SelectionTransactionCommand {
    fn redo(&self, _graph: &ImageGraph) {
        self.selection.with_pixels_mut(|p| *p = self.after.clone());
    }

    fn undo(&self, _graph: &ImageGraph) {
        self.selection.with_pixels_mut(|p| *p = self.before.clone());
    }

    fn description(&self) -> String {
        "Transform Selection".into()
    }

    fn memory_size(&self) -> usize {
        self.before.memory_bytes() + self.after.memory_bytes()
    }
}

/// Swap a transform mask's parameters.
pub struct TransformMaskCommand {
    pub node: NodeId,
    old_params: TransformMaskParams,
    new_params: TransformMaskParams,
}

impl TransformMaskCommand {
    pub fn new(node: NodeId, old_params: TransformMaskParams, new_params: TransformMaskParams) -> Self {
        Self {
            node,
            old_params,
            new_params,
        }
    }
}

impl Command for TransformMaskCommand {
    fn redo(&self, graph: &ImageGraph) {
        edit_node(graph, self.node, |n| {
            if let crate::graph::NodeKind::TransformMask { params, .. } = &mut n.kind {
                *params = self.new_params.clone();
            }
        });
    }

    fn undo(&self, graph: &ImageGraph) {
        edit_node(graph, self.node, |n| {
            if let crate::graph::NodeKind::TransformMask { params, .. } = &mut n.kind {
                *params = self.old_params.clone();
            }
        });
    }

    fn description(&self) -> String {
        "Edit Transform Mask".into()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<TransformMaskParams>() * 2
    }
}

/// Swap an external layer's native transform.
pub struct ExternalTransformCommand {
    pub node: NodeId,
    old: Mat3,
    new: Mat3,
}

impl ExternalTransformCommand {
    pub fn new(node: NodeId, old: Mat3, new: Mat3) -> Self {
        Self { node, old, new }
    }
}

impl Command for ExternalTransformCommand {
    fn redo(&self, graph: &ImageGraph) {
        edit_node(graph, self.node, |n| {
            if let crate::graph::NodeKind::ExternalLayer { native_transform, .. } = &mut n.kind {
                *native_transform = self.new;
            }
        });
    }

    fn undo(&self, graph: &ImageGraph) {
        edit_node(graph, self.node, |n| {
            if let crate::graph::NodeKind::ExternalLayer { native_transform, .. } = &mut n.kind {
                *native_transform = self.old;
            }
        });
    }

    fn description(&self) -> String {
        "Transform Layer".into()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Mat3>() * 2
    }
}

/// Insert a keyframe on an animated transform mask at a given time.
pub struct KeyframeCommand {
    pub node: NodeId,
    time: i32,
}

impl KeyframeCommand {
    pub fn new(node: NodeId, time: i32) -> Self {
        Self { node, time }
    }
}

impl Command for KeyframeCommand {
    fn redo(&self, graph: &ImageGraph) {
        edit_node(graph, self.node, |n| {
            if let crate::graph::NodeKind::TransformMask { keyframes, .. } = &mut n.kind {
                if !keyframes.contains(&self.time) {
                    keyframes.push(self.time);
                    keyframes.sort_unstable();
                }
            }
        });
    }

    fn undo(&self, graph: &ImageGraph) {
        edit_node(graph, self.node, |n| {
            if let crate::graph::NodeKind::TransformMask { keyframes, .. } = &mut n.kind {
                keyframes.retain(|&t| t != self.time);
            }
        });
    }

    fn description(&self) -> String {
        "Add Keyframe".into()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<i32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use image::Rgba;

    fn transform_macro(roots: Vec<NodeId>) -> MacroCommand {
        let mut m = MacroCommand::new("Transform", CommandId::TransformTool);
        m.merge_allowed = true;
        m.extra = Some(TransformCommandExtra {
            args: TransformArgs::identity(
                crate::ops::transform::TransformMode::Free,
                crate::ops::transform::Interpolation::Bilinear,
            ),
            root_nodes: roots.clone(),
            processed_nodes: roots,
        });
        m
    }

    #[test]
    fn push_or_merge_same_roots_merges() {
        let mut h = HistoryManager::new(50, None);
        h.push_or_merge(transform_macro(vec![NodeId(1), NodeId(2)]));
        h.push_or_merge(transform_macro(vec![NodeId(2), NodeId(1)]));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn push_or_merge_different_roots_stacks() {
        let mut h = HistoryManager::new(50, None);
        h.push_or_merge(transform_macro(vec![NodeId(1)]));
        h.push_or_merge(transform_macro(vec![NodeId(2)]));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn take_last_transform_pops_matching_entry() {
        let mut h = HistoryManager::new(50, None);
        h.push_or_merge(transform_macro(vec![NodeId(3)]));
        assert!(h.take_last_transform(&[NodeId(4)]).is_none());
        assert_eq!(h.len(), 1);
        let taken = h.take_last_transform(&[NodeId(3)]);
        assert!(taken.is_some());
        assert_eq!(h.len(), 0);
    }

    #[test]
    fn macro_undo_reverses_child_order() {
        let graph = ImageGraph::new(4, 4);
        let node = graph.add_node(Node::paint_layer("l", 4, 4), graph.root());

        let red = Surface::new(4, 4);
        let mut green = Surface::new(4, 4);
        green.fill(Rgba([0, 255, 0, 255]));
        let mut blue = Surface::new(4, 4);
        blue.fill(Rgba([0, 0, 255, 255]));

        let mut m = MacroCommand::new("two-step", CommandId::Unknown);
        m.push(Arc::new(TransactionCommand::new("a", node, red.clone(), green.clone())));
        m.push(Arc::new(TransactionCommand::new("b", node, green, blue)));

        m.redo(&graph);
        graph.with_node(node, |n| {
            assert_eq!(n.paint_surface().unwrap().get_pixel(0, 0), Rgba([0, 0, 255, 255]));
        });
        m.undo(&graph);
        graph.with_node(node, |n| {
            assert_eq!(n.paint_surface().unwrap().get_pixel(0, 0), Rgba([0, 0, 0, 0]));
        });
    }

    #[test]
    fn prune_respects_memory_limit() {
        let mut h = HistoryManager::new(100, Some(4 * 4 * 4 * 4));
        let node = NodeId(0);
        for _ in 0..10 {
            h.push(Box::new(TransactionCommand::new(
                "t",
                node,
                Surface::new(4, 4),
                Surface::new(4, 4),
            )));
        }
        assert!(h.total_memory() <= 4 * 4 * 4 * 4 || h.len() == 1);
        assert!(h.len() < 10);
    }

    #[test]
    fn surface_transaction_detects_no_change() {
        let graph = ImageGraph::new(4, 4);
        let node = graph.add_node(Node::paint_layer("l", 4, 4), graph.root());
        let t = SurfaceTransaction::begin("noop", &graph, node).unwrap();
        assert!(t.end(&graph).is_none());
    }
}
