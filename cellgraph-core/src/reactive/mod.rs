//! Reactive Primitives
//!
//! This module implements the cell engine: memoized cells, settable sources,
//! keyed tables of cells, and the runtime that tracks reads between them.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A Cell caches the result of a compute function. When the compute reads
//! other cells or sources, those reads are recorded and the cell subscribes
//! to each of them. Invalidating any of them invalidates the cell, which
//! recomputes the next time it is read.
//!
//! ## Sources
//!
//! A Source is a settable value. Setting it invalidates whatever read it.
//!
//! ## Keyed Tables
//!
//! A KeyedTable creates one cell per key on first lookup, so that only the
//! entries whose inputs change recompute.
//!
//! # Implementation Notes
//!
//! Reads are discovered through a tracking stack owned by the [`Runtime`].
//! Dependency edges are one-shot: invalidation consumes them, and the next
//! recompute installs a fresh set. Edges refer to cells by [`TrackId`] and
//! are resolved through weak references, so they never keep a cell alive.
//!
//! Everything here is single-threaded. Handles are `!Send` and `!Sync`.

mod cell;
mod context;
mod runtime;
mod source;
mod subscriber;
mod table;

pub use cell::{Cell, Compute};
pub use context::{FrameId, FrameReads, TrackingFrame};
pub use runtime::Runtime;
pub use source::Source;
pub use subscriber::TrackId;
pub use table::KeyedTable;
