//! Subscriber identity.
//!
//! Every trackable resource (cells and sources) gets a [`TrackId`] when it is
//! created. Dependency edges and the runtime registry refer to resources only
//! by this ID, so an edge never keeps either endpoint alive.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a trackable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(u64);

impl TrackId {
    /// Generate a new unique ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something that can be told its inputs changed.
///
/// Cells register themselves with the runtime through this trait so that a
/// producer's fan-out can reach them by ID.
pub(crate) trait Invalidate {
    fn invalidate(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_ids_are_unique() {
        let id1 = TrackId::new();
        let id2 = TrackId::new();
        let id3 = TrackId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
        assert!(id1 < id2);
    }

    #[test]
    fn display_uses_raw_value() {
        let id = TrackId::new();
        assert_eq!(id.to_string(), format!("#{}", id.raw()));
    }
}
