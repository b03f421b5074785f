// ============================================================================
// IMAGE GRAPH — arena-of-nodes layer tree (collaborator of the stroke engine)
// ============================================================================
//
// The engine schedules mutations *of* this graph but does not own its
// semantics; the graph is modeled only at the fidelity the stroke machinery
// needs.  Nodes live in an arena and are addressed by stable indices;
// parent links are plain indices, so there are no owning back-pointers.
// Every node sits behind its own lock: CONCURRENT jobs are partitioned over
// disjoint nodes by the strategy, so per-node locking never contends.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, RwLock};

use crate::geometry::{IRect, Mat3};
use crate::ops::transform::TransformArgs;
use crate::surface::Surface;

/// Stable handle into the node arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Parameters of a transform mask: the mask's whole effect is defined by
/// these, recalculated on demand — there are no stored pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformMaskParams {
    pub args: TransformArgs,
    /// Hidden params render as identity (used while a stroke previews).
    pub hidden: bool,
}

/// Closed set of node capabilities; dispatch is by pattern match, never by
/// downcasting.
#[derive(Clone)]
pub enum NodeKind {
    /// Ordinary raster layer with an editable paint surface.
    PaintLayer { surface: Surface },
    /// Container; composites its children.
    GroupLayer { pass_through: bool },
    /// Local selection stored as an alpha mask, optionally shown as an
    /// overlay decoration.
    SelectionMask {
        surface: Surface,
        overlay_visible: bool,
    },
    /// Non-destructive transform defined by parameters, not pixels.
    TransformMask {
        params: TransformMaskParams,
        animated: bool,
        /// Times at which a keyframe exists.
        keyframes: Vec<i32>,
    },
    /// Vector-ish layer with a native transform; its raster projection is
    /// re-rendered asynchronously by its own backend.
    ExternalLayer {
        surface: Surface,
        native_transform: Mat3,
        supports_perspective: bool,
    },
}

pub struct Node {
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    pub opacity: f32,
    /// Tool decorations (outlines, overlays) shown for this node.
    pub decorations_visible: bool,
    /// Excluded from rendering for the duration of a stroke.
    pub temporarily_hidden: bool,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
}

impl Node {
    fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            visible: true,
            locked: false,
            opacity: 1.0,
            decorations_visible: false,
            temporarily_hidden: false,
            parent: None,
            children: Vec::new(),
            kind,
        }
    }

    pub fn paint_layer(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self::new(name, NodeKind::PaintLayer { surface: Surface::new(width, height) })
    }

    pub fn group_layer(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::GroupLayer { pass_through: false })
    }

    pub fn selection_mask(name: impl Into<String>, surface: Surface) -> Self {
        Self::new(name, NodeKind::SelectionMask { surface, overlay_visible: false })
    }

    pub fn transform_mask(name: impl Into<String>, params: TransformMaskParams) -> Self {
        Self::new(name, NodeKind::TransformMask { params, animated: false, keyframes: Vec::new() })
    }

    pub fn external_layer(name: impl Into<String>, surface: Surface, supports_perspective: bool) -> Self {
        Self::new(
            name,
            NodeKind::ExternalLayer {
                surface,
                native_transform: Mat3::identity(),
                supports_perspective,
            },
        )
    }

    /// The node's editable pixel buffer, if it has one.
    pub fn paint_surface(&self) -> Option<&Surface> {
        match &self.kind {
            NodeKind::PaintLayer { surface } => Some(surface),
            NodeKind::SelectionMask { surface, .. } => Some(surface),
            NodeKind::ExternalLayer { surface, .. } => Some(surface),
            _ => None,
        }
    }

    pub fn paint_surface_mut(&mut self) -> Option<&mut Surface> {
        match &mut self.kind {
            NodeKind::PaintLayer { surface } => Some(surface),
            NodeKind::SelectionMask { surface, .. } => Some(surface),
            NodeKind::ExternalLayer { surface, .. } => Some(surface),
            _ => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::GroupLayer { .. })
    }

    /// Tight extent of the node's own pixel content.
    pub fn exact_bounds(&self) -> IRect {
        self.paint_surface().map(|s| s.exact_bounds()).unwrap_or_default()
    }
}

/// The layer tree.  `Arc<ImageGraph>` is shared between the UI side, the
/// scheduler workers and undo commands.
pub struct ImageGraph {
    width: u32,
    height: u32,
    current_time: AtomicI32,
    nodes: RwLock<Vec<Arc<RwLock<Node>>>>,
    root: NodeId,
}

fn read_lock<T>(l: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(l: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|e| e.into_inner())
}

impl ImageGraph {
    pub fn new(width: u32, height: u32) -> Self {
        let root = Node::group_layer("root");
        Self {
            width,
            height,
            current_time: AtomicI32::new(0),
            nodes: RwLock::new(vec![Arc::new(RwLock::new(root))]),
            root: NodeId(0),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bounds(&self) -> IRect {
        IRect::new(0, 0, self.width as i32, self.height as i32)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Current animation time of the document.
    pub fn current_time(&self) -> i32 {
        self.current_time.load(Ordering::Relaxed)
    }

    pub fn set_current_time(&self, t: i32) {
        self.current_time.store(t, Ordering::Relaxed);
    }

    /// Append a node as the topmost child of `parent`.
    pub fn add_node(&self, mut node: Node, parent: NodeId) -> NodeId {
        node.parent = Some(parent);
        let id = {
            let mut nodes = write_lock(&self.nodes);
            nodes.push(Arc::new(RwLock::new(node)));
            NodeId(nodes.len() - 1)
        };
        if let Some(p) = self.node(parent) {
            write_lock(&p).children.push(id);
        } else {
            log_warn!("add_node: parent {:?} does not exist", parent);
        }
        id
    }

    /// Shared handle to a node; callers lock it for as short as possible.
    pub fn node(&self, id: NodeId) -> Option<Arc<RwLock<Node>>> {
        read_lock(&self.nodes).get(id.0).cloned()
    }

    /// Run `f` with read access to the node.  Missing ids are logged and
    /// yield `None` — a dangling handle must not take the stroke down.
    pub fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&Node) -> R) -> Option<R> {
        match self.node(id) {
            Some(n) => Some(f(&read_lock(&n))),
            None => {
                log_warn!("with_node: node {:?} does not exist", id);
                None
            }
        }
    }

    /// Run `f` with write access to the node.
    pub fn with_node_mut<R>(&self, id: NodeId, f: impl FnOnce(&mut Node) -> R) -> Option<R> {
        match self.node(id) {
            Some(n) => Some(f(&mut write_lock(&n))),
            None => {
                log_warn!("with_node_mut: node {:?} does not exist", id);
                None
            }
        }
    }

    /// Pre-order traversal of `id` and its descendants.
    pub fn recursive_apply(&self, id: NodeId, f: &mut dyn FnMut(NodeId)) {
        f(id);
        let children = self.with_node(id, |n| n.children.clone()).unwrap_or_default();
        for child in children {
            self.recursive_apply(child, f);
        }
    }

    pub fn all_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.recursive_apply(self.root, &mut |id| out.push(id));
        out
    }

    pub fn has_editable_paint_surface(&self, id: NodeId) -> bool {
        self.with_node(id, |n| n.paint_surface().is_some() && !n.locked && n.visible)
            .unwrap_or(false)
    }

    /// Resolve the node set a stroke operates on: group layers are expanded
    /// into their transformable descendants; locked and invisible nodes are
    /// skipped.  Groups themselves are never included — only leaves get
    /// per-node jobs.
    pub fn fetch_transformable(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let mut out = Vec::new();
        for &root in roots {
            self.recursive_apply(root, &mut |id| {
                let ok = self
                    .with_node(id, |n| !n.is_group() && n.visible && !n.locked)
                    .unwrap_or(false);
                if ok && !out.contains(&id) {
                    out.push(id);
                }
            });
        }
        out
    }

    // ---- compositing -------------------------------------------------------
    // Minimal top-down alpha-over, enough to build stroke previews.

    /// Composite the whole tree into one surface.
    pub fn composite(&self) -> Surface {
        self.composite_node(self.root)
    }

    /// Composite `id` and its descendants.  Masks contribute nothing; a
    /// transform mask's effect is applied by the stroke engine, not here.
    pub fn composite_node(&self, id: NodeId) -> Surface {
        let mut out = Surface::new(self.width, self.height);
        self.composite_into(id, &mut out, 1.0);
        out
    }

    fn composite_into(&self, id: NodeId, out: &mut Surface, opacity: f32) {
        let Some(handle) = self.node(id) else { return };
        let node = read_lock(&handle);
        if !node.visible || node.temporarily_hidden {
            return;
        }
        let opacity = opacity * node.opacity;
        match &node.kind {
            NodeKind::GroupLayer { .. } => {
                let children = node.children.clone();
                drop(node);
                for child in children {
                    self.composite_into(child, out, opacity);
                }
            }
            NodeKind::PaintLayer { surface } | NodeKind::ExternalLayer { surface, .. } => {
                out.alpha_over_with_opacity(surface, opacity);
            }
            NodeKind::SelectionMask { .. } | NodeKind::TransformMask { .. } => {}
        }
    }

    /// Clone a minimal private copy of the given nodes into a throwaway
    /// graph for isolated preview rendering.  The clone has no listeners and
    /// no connection to this graph; render once, take the pixels, drop it.
    /// Returns the clone plus source-to-clone id pairs so callers can
    /// substitute pixels per node.  Only paint and external layers are
    /// cloned; other kinds have no paint content to stage.
    pub fn preview_clone(&self, keep: &[NodeId]) -> (ImageGraph, Vec<(NodeId, NodeId)>) {
        let clone = ImageGraph::new(self.width, self.height);
        clone.set_current_time(self.current_time());
        // Flat re-parenting under the clone's root preserves paint order
        // (arena order is insertion order, which follows the tree).
        let mut ordered: Vec<NodeId> = keep.to_vec();
        ordered.sort();
        let mut pairs = Vec::with_capacity(ordered.len());
        for id in ordered {
            let Some(handle) = self.node(id) else { continue };
            let node = read_lock(&handle);
            match &node.kind {
                NodeKind::PaintLayer { surface } | NodeKind::ExternalLayer { surface, .. } => {
                    let mut copy = Node::paint_layer(node.name.clone(), self.width, self.height);
                    if let Some(s) = copy.paint_surface_mut() {
                        *s = surface.clone();
                    }
                    copy.opacity = node.opacity;
                    let copy_id = clone.add_node(copy, clone.root());
                    pairs.push((id, copy_id));
                }
                _ => {}
            }
        }
        (clone, pairs)
    }
}

// ============================================================================
// SELECTION — global selection object shared between strokes and the UI
// ============================================================================

/// The document's active selection: an alpha mask plus a visibility flag for
/// the marching-ants decoration.  Shared, because the selection is the one
/// object a stroke's jobs and the UI both reference.
pub struct Selection {
    pixels: RwLock<Surface>,
    visible: AtomicBool,
}

impl Selection {
    pub fn new(surface: Surface) -> Arc<Self> {
        Arc::new(Self {
            pixels: RwLock::new(surface),
            visible: AtomicBool::new(true),
        })
    }

    /// Fully selected rectangle.
    pub fn rect(width: u32, height: u32, r: &IRect) -> Arc<Self> {
        let mut s = Surface::new(width, height);
        let clamped = r.intersect(&s.bounds());
        for y in clamped.y..clamped.bottom() {
            for x in clamped.x..clamped.right() {
                s.put_pixel(x as u32, y as u32, image::Rgba([0, 0, 0, 255]));
            }
        }
        Self::new(s)
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    pub fn set_visible(&self, v: bool) {
        self.visible.store(v, Ordering::Relaxed);
    }

    pub fn with_pixels<R>(&self, f: impl FnOnce(&Surface) -> R) -> R {
        f(&read_lock(&self.pixels))
    }

    pub fn with_pixels_mut<R>(&self, f: impl FnOnce(&mut Surface) -> R) -> R {
        f(&mut write_lock(&self.pixels))
    }

    /// Tight bounding rect of the selected region.
    pub fn selected_exact_rect(&self) -> IRect {
        self.with_pixels(|p| p.exact_bounds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn fetch_transformable_expands_groups_and_skips_locked() {
        let g = ImageGraph::new(16, 16);
        let group = g.add_node(Node::group_layer("g"), g.root());
        let a = g.add_node(Node::paint_layer("a", 16, 16), group);
        let b = g.add_node(Node::paint_layer("b", 16, 16), group);
        g.with_node_mut(b, |n| n.locked = true);
        let hidden = g.add_node(Node::paint_layer("c", 16, 16), g.root());
        g.with_node_mut(hidden, |n| n.visible = false);

        let got = g.fetch_transformable(&[group, hidden]);
        assert_eq!(got, vec![a]);
    }

    #[test]
    fn composite_respects_visibility_and_order() {
        let g = ImageGraph::new(4, 4);
        let bottom = g.add_node(Node::paint_layer("bottom", 4, 4), g.root());
        let top = g.add_node(Node::paint_layer("top", 4, 4), g.root());
        g.with_node_mut(bottom, |n| n.paint_surface_mut().unwrap().fill(Rgba([0, 0, 255, 255])));
        g.with_node_mut(top, |n| n.paint_surface_mut().unwrap().fill(Rgba([255, 0, 0, 255])));

        assert_eq!(g.composite().get_pixel(0, 0), Rgba([255, 0, 0, 255]));

        g.with_node_mut(top, |n| n.temporarily_hidden = true);
        assert_eq!(g.composite().get_pixel(0, 0), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn preview_clone_is_isolated() {
        let g = ImageGraph::new(8, 8);
        let a = g.add_node(Node::paint_layer("a", 8, 8), g.root());
        g.with_node_mut(a, |n| n.paint_surface_mut().unwrap().fill(Rgba([9, 9, 9, 255])));

        let (clone, pairs) = g.preview_clone(&[a]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, a);
        let before = g.composite();
        // Mutating the clone must not leak into the source graph.
        for id in clone.all_nodes() {
            clone.with_node_mut(id, |n| {
                if let Some(s) = n.paint_surface_mut() {
                    s.clear();
                }
            });
        }
        assert!(g.composite() == before);
    }

    #[test]
    fn selection_rect_exact_bounds() {
        let sel = Selection::rect(32, 32, &IRect::new(4, 5, 10, 11));
        assert_eq!(sel.selected_exact_rect(), IRect::new(4, 5, 10, 11));
    }
}
