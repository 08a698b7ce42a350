//! Source Implementation
//!
//! A Source is a settable value that cells can depend on. It is the way to
//! bring state that lives outside the cell graph (a selection, a model
//! attribute, a preference) into it.
//!
//! # How Sources Work
//!
//! 1. Reading a source with [`Source::get`] inside a compute records it as a
//!    dependency of that compute's cell.
//!
//! 2. [`Source::set`] stores the new value and invalidates every cell that
//!    read the source since it last recomputed. Those cells recompute on
//!    their next read.
//!
//! Sources do not compare old and new values: every `set` invalidates.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use super::runtime::Runtime;
use super::TrackId;

struct SourceInner<T> {
    id: TrackId,
    runtime: Runtime,
    value: RefCell<T>,
}

/// A settable, trackable value.
///
/// Clones share the same value and identity.
pub struct Source<T>
where
    T: Clone + 'static,
{
    inner: Rc<SourceInner<T>>,
}

impl<T> Source<T>
where
    T: Clone + 'static,
{
    /// Create a new source with the given initial value.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self {
            inner: Rc::new(SourceInner {
                id: TrackId::new(),
                runtime: runtime.clone(),
                value: RefCell::new(value),
            }),
        }
    }

    pub fn id(&self) -> TrackId {
        self.inner.id
    }

    /// Get the current value, recording the read in the open frame.
    pub fn get(&self) -> T {
        self.inner.runtime.record_read(self.inner.id);
        self.inner.value.borrow().clone()
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Store a new value and invalidate dependents.
    pub fn set(&self, value: T) {
        *self.inner.value.borrow_mut() = value;
        self.invalidate();
    }

    /// Update the value in place and invalidate dependents.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        f(&mut self.inner.value.borrow_mut());
        self.invalidate();
    }

    /// Invalidate dependents without changing the value, for when the state
    /// a source stands for changed behind its back.
    pub fn invalidate(&self) {
        self.inner.runtime.notify_dependents(self.inner.id);
    }

    /// Number of cells currently subscribed to this source.
    pub fn dependent_count(&self) -> usize {
        self.inner.runtime.dependent_count(self.inner.id)
    }
}

impl<T> Drop for SourceInner<T> {
    fn drop(&mut self) {
        self.runtime.unregister(self.id);
    }
}

impl<T> Clone for Source<T>
where
    T: Clone + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Source<T>
where
    T: Clone + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.inner.id)
            .field("value", &self.inner.value.borrow())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_get_and_set() {
        let rt = Runtime::new();
        let source = rt.source(0);
        assert_eq!(source.get(), 0);

        source.set(42);
        assert_eq!(source.get(), 42);
    }

    #[test]
    fn source_update() {
        let rt = Runtime::new();
        let source = rt.source(vec![1, 2]);
        source.update(|v| v.push(3));
        assert_eq!(source.get(), vec![1, 2, 3]);
    }

    #[test]
    fn set_invalidates_reading_cell() {
        let rt = Runtime::new();
        let temperature = rt.source(300);
        let t = temperature.clone();
        let kelvin = rt.cell(move || format!("{} K", t.get()));

        assert_eq!(kelvin.get(), "300 K");
        assert_eq!(temperature.dependent_count(), 1);

        temperature.set(350);
        assert!(!kelvin.is_valid());
        assert_eq!(temperature.dependent_count(), 0);
        assert_eq!(kelvin.get(), "350 K");
    }

    #[test]
    fn untracked_read_creates_no_dependency() {
        let rt = Runtime::new();
        let source = rt.source(1);
        let s = source.clone();
        let cell = rt.cell(move || s.get_untracked() + 1);

        assert_eq!(cell.get(), 2);
        source.set(5);
        assert!(cell.is_valid());
        assert_eq!(cell.get(), 2);
    }

    #[test]
    fn clone_shares_state() {
        let rt = Runtime::new();
        let a = rt.source("ground");
        let b = a.clone();

        a.set("thermostat");
        assert_eq!(b.get(), "thermostat");
        assert_eq!(a.id(), b.id());
    }
}
