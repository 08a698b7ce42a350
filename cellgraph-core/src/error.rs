//! Error Types
//!
//! Compute failures are contained at the cell boundary: they never escape
//! `Cell::get`, and instead surface as a [`Diagnostic`] on the runtime's
//! diagnostic channel (and as a `tracing` event).
//!
//! Programmer errors (reading a cell that has no compute function, closing
//! tracking frames out of order) are not represented here. They panic.

use std::any::Any;

use thiserror::Error;

use crate::reactive::TrackId;

/// A failure raised by a cell's compute function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputeError {
    /// A fallible compute function returned `Err`.
    #[error("compute failed: {message}")]
    Failed { message: String },

    /// The compute function panicked.
    #[error("compute panicked: {message}")]
    Panicked { message: String },

    /// The compute function (directly or through other cells) read a cell
    /// that was still computing.
    #[error("dependency cycle through cell {cell}")]
    Cycle { cell: TrackId },
}

impl ComputeError {
    /// Build an error from a panic payload caught around a compute call.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        if let Some(cycle) = payload.downcast_ref::<CycleDetected>() {
            return ComputeError::Cycle { cell: cycle.cell };
        }

        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };

        ComputeError::Panicked { message }
    }
}

/// Errors raised while loading an [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid engine config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown error policy {0:?} (expected \"contain\" or \"fatal\")")]
    UnknownPolicy(String),
}

/// A record on the runtime's diagnostic channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A compute function failed and the cell cached its fallback value.
    ComputeFailed {
        cell: TrackId,
        label: Option<String>,
        error: ComputeError,
    },

    /// A keyed table's factory performed tracked reads while building the
    /// compute function for a key.
    FactoryMisuse {
        table: Option<String>,
        reads: Vec<TrackId>,
    },

    /// A resource of this runtime was read while only another runtime's
    /// compute was running. No dependency was recorded for it.
    CrossRuntimeRead { resource: TrackId },
}

/// Panic payload used to unwind out of a re-entrant read of a computing cell.
///
/// Caught by the nearest enclosing compute and turned into
/// [`ComputeError::Cycle`].
#[derive(Debug, Clone, Copy, Error)]
#[error("cell {cell} read while it was computing")]
pub(crate) struct CycleDetected {
    pub(crate) cell: TrackId,
}

/// Panic payload for reading a cell before any compute function was set.
///
/// Never contained: every enclosing compute re-raises it, and the outermost
/// one turns it into a panic carrying this message.
#[derive(Debug, Clone, Copy, Error)]
#[error("cell {cell} read before a compute function was set")]
pub(crate) struct UninitializedCompute {
    pub(crate) cell: TrackId,
}
