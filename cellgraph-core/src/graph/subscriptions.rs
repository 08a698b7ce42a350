//! Subscription Graph
//!
//! Stores the invalidation edges between producers and the cells that read
//! them during their last compute. Both directions are kept:
//!
//! - producer -> dependents, used for fan-out when the producer is invalidated
//! - dependent -> dependencies, used to cancel a cell's subscriptions
//!
//! Edges are one-shot. [`take_dependents`](SubscriptionGraph::take_dependents)
//! removes every edge out of a producer as it hands the dependents back, so
//! a second invalidation of the same producer reaches nobody until the
//! dependents recompute and subscribe again.

use std::collections::HashMap;

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::reactive::TrackId;

/// Bidirectional, non-owning dependency edges keyed by [`TrackId`].
#[derive(Debug, Default)]
pub struct SubscriptionGraph {
    /// For each producer, the cells that read it (in subscription order).
    dependents: HashMap<TrackId, IndexSet<TrackId>>,

    /// For each cell, the producers it read during its last compute.
    dependencies: HashMap<TrackId, SmallVec<[TrackId; 8]>>,
}

impl SubscriptionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all of `dependent`'s subscriptions with one per producer.
    ///
    /// Previous subscriptions are cancelled first, so a producer the cell no
    /// longer reads cannot reach it anymore.
    pub fn resubscribe<I>(&mut self, dependent: TrackId, producers: I)
    where
        I: IntoIterator<Item = TrackId>,
    {
        self.cancel(dependent);

        let mut installed: SmallVec<[TrackId; 8]> = SmallVec::new();
        for producer in producers {
            if producer == dependent || installed.contains(&producer) {
                continue;
            }
            self.dependents.entry(producer).or_default().insert(dependent);
            installed.push(producer);
        }

        if !installed.is_empty() {
            self.dependencies.insert(dependent, installed);
        }
    }

    /// Remove every subscription `dependent` holds on its producers.
    pub fn cancel(&mut self, dependent: TrackId) {
        let Some(producers) = self.dependencies.remove(&dependent) else {
            return;
        };

        for producer in producers {
            if let Some(set) = self.dependents.get_mut(&producer) {
                set.shift_remove(&dependent);
                if set.is_empty() {
                    self.dependents.remove(&producer);
                }
            }
        }
    }

    /// Detach and return the current dependents of `producer`.
    pub fn take_dependents(&mut self, producer: TrackId) -> IndexSet<TrackId> {
        let taken = self.dependents.remove(&producer).unwrap_or_default();

        for dependent in &taken {
            if let Some(producers) = self.dependencies.get_mut(dependent) {
                producers.retain(|p| *p != producer);
                if producers.is_empty() {
                    self.dependencies.remove(dependent);
                }
            }
        }

        taken
    }

    /// Remove a resource and every edge touching it.
    pub fn remove_node(&mut self, id: TrackId) {
        self.cancel(id);
        self.take_dependents(id);
    }

    /// Number of cells currently subscribed to `producer`.
    pub fn dependent_count(&self, producer: TrackId) -> usize {
        self.dependents.get(&producer).map_or(0, IndexSet::len)
    }

    /// Number of producers `dependent` is currently subscribed to.
    pub fn dependency_count(&self, dependent: TrackId) -> usize {
        self.dependencies.get(&dependent).map_or(0, SmallVec::len)
    }

    pub fn has_edge(&self, producer: TrackId, dependent: TrackId) -> bool {
        self.dependents
            .get(&producer)
            .is_some_and(|set| set.contains(&dependent))
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.dependents.values().map(IndexSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resubscribe_installs_both_directions() {
        let mut graph = SubscriptionGraph::new();
        let a = TrackId::new();
        let b = TrackId::new();
        let c = TrackId::new();

        graph.resubscribe(a, [b, c]);

        assert!(graph.has_edge(b, a));
        assert!(graph.has_edge(c, a));
        assert_eq!(graph.dependency_count(a), 2);
        assert_eq!(graph.dependent_count(b), 1);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn resubscribe_drops_stale_edges() {
        let mut graph = SubscriptionGraph::new();
        let a = TrackId::new();
        let b = TrackId::new();
        let c = TrackId::new();

        graph.resubscribe(a, [b]);
        graph.resubscribe(a, [c]);

        assert!(!graph.has_edge(b, a));
        assert!(graph.has_edge(c, a));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn take_dependents_is_one_shot() {
        let mut graph = SubscriptionGraph::new();
        let producer = TrackId::new();
        let x = TrackId::new();
        let y = TrackId::new();

        graph.resubscribe(x, [producer]);
        graph.resubscribe(y, [producer]);

        let taken: Vec<_> = graph.take_dependents(producer).into_iter().collect();
        assert_eq!(taken, vec![x, y]);

        assert!(graph.take_dependents(producer).is_empty());
        assert_eq!(graph.dependency_count(x), 0);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn self_edges_and_duplicates_are_ignored() {
        let mut graph = SubscriptionGraph::new();
        let a = TrackId::new();
        let b = TrackId::new();

        graph.resubscribe(a, [a, b, b]);

        assert!(!graph.has_edge(a, a));
        assert_eq!(graph.dependency_count(a), 1);
    }

    #[test]
    fn remove_node_clears_edges_in_both_directions() {
        let mut graph = SubscriptionGraph::new();
        let source = TrackId::new();
        let middle = TrackId::new();
        let top = TrackId::new();

        graph.resubscribe(middle, [source]);
        graph.resubscribe(top, [middle]);

        graph.remove_node(middle);

        assert_eq!(graph.dependent_count(source), 0);
        assert_eq!(graph.dependency_count(top), 0);
        assert_eq!(graph.edge_count(), 0);
    }
}
