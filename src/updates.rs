// ============================================================================
// UPDATES — dirty-region facade and batched node updates
// ============================================================================
//
// Strokes produce a storm of per-node dirty rects.  The facade lets a stroke
// suspend delivery entirely (so half-applied state is never repainted) and
// the batch collects rects for a single compressed flush when the stroke's
// pixels are consistent again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::geometry::IRect;
use crate::graph::{ImageGraph, NodeId};
use crate::history::Command;

fn plock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Sink for dirty-region notifications from the engine toward the canvas.
///
/// While disabled, incoming rects are dropped on the floor; the stroke is
/// responsible for re-marking everything it touched before re-enabling.
pub struct UpdatesFacade {
    disabled: AtomicBool,
    pending: Mutex<Vec<(NodeId, IRect)>>,
}

impl Default for UpdatesFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdatesFacade {
    pub fn new() -> Self {
        Self {
            disabled: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn mark_dirty(&self, node: NodeId, rect: IRect) {
        if rect.is_empty() || self.disabled.load(Ordering::Acquire) {
            return;
        }
        plock(&self.pending).push((node, rect));
    }

    pub fn disable_dirty_requests(&self) {
        self.disabled.store(true, Ordering::Release);
    }

    pub fn enable_dirty_requests(&self) {
        self.disabled.store(false, Ordering::Release);
    }

    pub fn dirty_requests_enabled(&self) -> bool {
        !self.disabled.load(Ordering::Acquire)
    }

    /// Drain everything delivered so far.  The canvas side calls this once
    /// per frame.
    pub fn take_pending(&self) -> Vec<(NodeId, IRect)> {
        std::mem::take(&mut *plock(&self.pending))
    }
}

/// Accumulates dirty rects over the lifetime of a stroke phase and delivers
/// them in one compressed burst.
pub struct BatchNodeUpdate {
    updates: Mutex<Vec<(NodeId, IRect)>>,
}

impl Default for BatchNodeUpdate {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchNodeUpdate {
    pub fn new() -> Self {
        Self {
            updates: Mutex::new(Vec::new()),
        }
    }

    pub fn add_update(&self, node: NodeId, rect: IRect) {
        if rect.is_empty() {
            return;
        }
        plock(&self.updates).push((node, rect));
    }

    /// Union all rects per node, keeping first-seen node order.
    pub fn compress(&self) {
        let mut updates = plock(&self.updates);
        let mut merged: Vec<(NodeId, IRect)> = Vec::new();
        for (node, rect) in updates.drain(..) {
            match merged.iter_mut().find(|(n, _)| *n == node) {
                Some((_, r)) => *r = r.union(&rect),
                None => merged.push((node, rect)),
            }
        }
        *updates = merged;
    }

    /// Deliver the accumulated rects through the facade and clear the batch.
    pub fn flush(&self, updates: &UpdatesFacade) {
        for (node, rect) in plock(&self.updates).drain(..) {
            updates.mark_dirty(node, rect);
        }
    }
}

// ============================================================================
// FLIP-FLOP COMMANDS
// ============================================================================
//
// These come in initializing/finalizing pairs bracketing a macro: replaying
// the macro in either direction then suspends updates at the start and
// restores (and flushes) them at the end.

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum CommandPhase {
    Initializing,
    Finalizing,
}

/// Suspend dirty-request delivery while the bracketed commands replay.
pub struct HoldUpdatesCommand {
    updates: Arc<UpdatesFacade>,
    phase: CommandPhase,
}

impl HoldUpdatesCommand {
    pub fn new(updates: Arc<UpdatesFacade>, phase: CommandPhase) -> Self {
        Self { updates, phase }
    }
}

impl Command for HoldUpdatesCommand {
    fn redo(&self, _graph: &ImageGraph) {
        match self.phase {
            CommandPhase::Initializing => self.updates.disable_dirty_requests(),
            CommandPhase::Finalizing => self.updates.enable_dirty_requests(),
        }
    }

    fn undo(&self, _graph: &ImageGraph) {
        match self.phase {
            CommandPhase::Initializing => self.updates.enable_dirty_requests(),
            CommandPhase::Finalizing => self.updates.disable_dirty_requests(),
        }
    }

    fn description(&self) -> String {
        "Hold Updates".into()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}

/// Flush a batch of node updates at the matching end of a macro replay.
pub struct BatchUpdateCommand {
    batch: Arc<BatchNodeUpdate>,
    updates: Arc<UpdatesFacade>,
    phase: CommandPhase,
}

impl BatchUpdateCommand {
    pub fn new(batch: Arc<BatchNodeUpdate>, updates: Arc<UpdatesFacade>, phase: CommandPhase) -> Self {
        Self {
            batch,
            updates,
            phase,
        }
    }
}

impl Command for BatchUpdateCommand {
    fn redo(&self, _graph: &ImageGraph) {
        if self.phase == CommandPhase::Finalizing {
            self.batch.compress();
            self.batch.flush(&self.updates);
        }
    }

    fn undo(&self, _graph: &ImageGraph) {
        if self.phase == CommandPhase::Initializing {
            self.batch.compress();
            self.batch.flush(&self.updates);
        }
    }

    fn description(&self) -> String {
        "Batch Update".into()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}
