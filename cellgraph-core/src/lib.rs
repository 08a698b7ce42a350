//! Cellgraph Core
//!
//! A demand-driven incremental computation engine. Values live in
//! invalidatable, memoized cells; the engine discovers which cells a
//! computation reads and propagates invalidation along those edges.
//!
//! - Reading a cell recomputes it only if it is invalid (pull, not push).
//! - Invalidation marks dependents invalid synchronously but never
//!   recomputes them.
//! - A failing compute is contained: it is logged, a fallback is cached, and
//!   the cell stays valid until invalidated again.
//!
//! # Architecture
//!
//! - `reactive`: cells, sources, keyed tables, and the runtime
//! - `graph`: the one-shot subscription edges between them
//! - `config`: host-selected error policy
//! - `error`: compute errors and diagnostics
//!
//! # Example
//!
//! ```rust
//! use cellgraph_core::Runtime;
//!
//! let rt = Runtime::new();
//!
//! let count = rt.source(5);
//! let c = count.clone();
//! let doubled = rt.cell(move || c.get() * 2);
//!
//! assert_eq!(doubled.get(), 10);
//!
//! count.set(7);
//! assert!(!doubled.is_valid()); // invalidated, not yet recomputed
//! assert_eq!(doubled.get(), 14);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{EngineConfig, ErrorPolicy};
pub use error::{ComputeError, ConfigError, Diagnostic};
pub use reactive::{Cell, Compute, KeyedTable, Runtime, Source, TrackId};
