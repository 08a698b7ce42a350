//! Dependency Graph
//!
//! This module holds the invalidation edges between trackable resources.
//!
//! # Overview
//!
//! If cell A read resource B during its last compute, there is an edge from
//! B to A. Invalidating B walks its outgoing edges and invalidates each
//! dependent, which in turn walks its own. Edges are rebuilt from scratch
//! every time a cell recomputes, because the set of resources a compute
//! reads can change from one run to the next.
//!
//! # Design Decisions
//!
//! 1. Edges are plain IDs. The graph never holds a cell, so a dependency
//!    edge cannot keep either endpoint alive.
//!
//! 2. Fan-out consumes the edges it follows. A dependent has to read the
//!    producer again before it can be notified again.
//!
//! 3. We maintain both forward (dependents) and reverse (dependencies) edges
//!    so that a cell can cancel its subscriptions without scanning the graph.

mod subscriptions;

pub use subscriptions::SubscriptionGraph;
