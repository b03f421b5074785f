//! StrokeFE — the stroke execution engine of a raster image editor.
//!
//! A *stroke* is one logical, potentially long-running user operation over
//! the image (the canonical example is an interactive layer transform): a
//! batch of scheduled jobs with declared concurrency requirements that
//! resolves to at most one undo entry.  The engine provides:
//!
//! * the job-data model and the scheduling discipline
//!   (SEQUENTIAL / CONCURRENT / BARRIER jobs, EXCLUSIVE flag),
//! * the stroke-strategy lifecycle protocol (init / do / finish / cancel),
//! * the undo-command-based strategy that turns strategy-issued mutations
//!   into a single mergeable undo entry,
//! * the transform stroke strategy — the representative concrete strategy
//!   with preview generation, a pristine-source device cache and
//!   multi-phase commit / cancel.
//!
//! The node graph, compositing and dirty-update collaborators are modeled
//! only at the fidelity the engine needs to be exercised and tested.

#![allow(dead_code)] // engine API surface kept for embedding editors

#[macro_use]
pub mod logger;

pub mod geometry;
pub mod graph;
pub mod history;
pub mod ops;
pub mod scheduler;
pub mod session;
pub mod strategy;
pub mod surface;
pub mod updates;

pub use geometry::IRect;
pub use graph::{ImageGraph, Node, NodeId, NodeKind, Selection, TransformMaskParams};
pub use history::{Command, CommandId, HistoryManager, MacroCommand};
pub use ops::transform::{Interpolation, TransformArgs, TransformMode};
pub use scheduler::job::{Exclusivity, JobPayload, Sequencing, StrokeJobData};
pub use scheduler::{SchedulerConfig, StrokeEvent, StrokeId, StrokeScheduler};
pub use session::Session;
pub use strategy::transform::TransformStrokeStrategy;
pub use strategy::undo_based::{CommandRecorder, UndoCommandBasedStrategy};
pub use strategy::{StrokeContext, StrokeStrategy};
pub use surface::Surface;
pub use updates::{BatchNodeUpdate, UpdatesFacade};
