//! Keyed Cell Table
//!
//! A table of cells created on demand, one per key. The first lookup of a
//! key asks the table's factory for that key's compute function and wraps
//! it in a new cell; later lookups of an equal key return the same cell.
//!
//! Only the cells whose inputs change are recomputed, which is the point of
//! keeping one cell per key instead of one cell for the whole table.
//!
//! The factory itself must not read tracked resources. Its reads would
//! belong to building the table, not to any key's value, so they are
//! captured in a private frame, discarded, and reported as a
//! [`Diagnostic::FactoryMisuse`](crate::Diagnostic::FactoryMisuse). Reads
//! made by the compute function it returns are fine.

use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use super::cell::{Cell, Compute};
use super::runtime::Runtime;

type Factory<K, V> = dyn Fn(&K) -> Compute<V>;

/// Lazily populated map from keys to cells.
pub struct KeyedTable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + Default + 'static,
{
    runtime: Runtime,
    factory: Box<Factory<K, V>>,
    cells: RefCell<IndexMap<K, Cell<V>>>,
    label: Option<Cow<'static, str>>,
}

impl<K, V> KeyedTable<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + Default + 'static,
{
    /// Create a table whose factory returns the compute function for a key.
    pub fn new<F>(runtime: &Runtime, factory: F) -> Self
    where
        F: Fn(&K) -> Compute<V> + 'static,
    {
        Self {
            runtime: runtime.clone(),
            factory: Box::new(factory),
            cells: RefCell::new(IndexMap::new()),
            label: None,
        }
    }

    /// Create a table whose cell for `key` computes `value_fn(&key)`.
    pub fn from_value_fn<F>(runtime: &Runtime, value_fn: F) -> Self
    where
        F: Fn(&K) -> V + 'static,
    {
        let value_fn = Rc::new(value_fn);
        Self::new(runtime, move |key: &K| {
            let value_fn = value_fn.clone();
            let key = key.clone();
            Compute::new(move || value_fn(&key))
        })
    }

    /// Attach a label used in diagnostics.
    pub fn labeled(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Get the cell for `key`, creating it on first lookup.
    ///
    /// An existing cell is returned as is; this never forces a recompute.
    pub fn get(&self, key: &K) -> Cell<V> {
        if let Some(cell) = self.cells.borrow().get(key) {
            return cell.clone();
        }

        let compute = self.build_compute(key);
        let cell = Cell::with_compute(&self.runtime, Some(compute));

        self.cells
            .borrow_mut()
            .entry(key.clone())
            .or_insert(cell)
            .clone()
    }

    /// Run the factory in a frame of its own so its reads cannot leak into
    /// the caller's frame.
    fn build_compute(&self, key: &K) -> Compute<V> {
        let frame = self.runtime.begin_frame();
        let compute = (self.factory)(key);
        let reads = frame.finish();

        if !reads.is_empty() {
            self.runtime
                .report_factory_misuse(self.label.as_deref(), &reads);
        }

        compute
    }

    /// Get the current value of the cell for `key`.
    pub fn value(&self, key: &K) -> V {
        self.get(key).get()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.cells.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.cells.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.borrow().is_empty()
    }

    /// Keys with a cell, in creation order.
    pub fn keys(&self) -> Vec<K> {
        self.cells.borrow().keys().cloned().collect()
    }

    /// Drop the table's handle to the cell for `key`.
    ///
    /// Other holders of the cell keep it alive; the next lookup of `key`
    /// creates a fresh cell.
    pub fn remove(&self, key: &K) -> Option<Cell<V>> {
        self.cells.borrow_mut().shift_remove(key)
    }

    /// Invalidate every cell in the table.
    pub fn invalidate_all(&self) {
        let cells: Vec<Cell<V>> = self.cells.borrow().values().cloned().collect();
        for cell in cells {
            cell.invalidate();
        }
    }
}

impl<K, V> Debug for KeyedTable<K, V>
where
    K: Hash + Eq + Clone + Debug + 'static,
    V: Clone + Default + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedTable")
            .field("label", &self.label)
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostic;

    #[test]
    fn equal_keys_return_the_same_cell() {
        let rt = Runtime::new();
        let table = rt.value_table(|key: &String| key.len());

        let a = table.get(&"motor".to_string());
        let b = table.get(&"motor".to_string());
        let c = table.get(&"ground".to_string());

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.get(), 5);
        assert_eq!(c.get(), 6);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn lookup_does_not_force_recompute() {
        let rt = Runtime::new();
        let calls = Rc::new(std::cell::Cell::new(0));
        let calls_clone = calls.clone();

        let table = rt.value_table(move |key: &u32| {
            calls_clone.set(calls_clone.get() + 1);
            key * 10
        });

        let cell = table.get(&3);
        assert_eq!(calls.get(), 0);
        assert_eq!(cell.get(), 30);

        table.get(&3);
        assert_eq!(table.value(&3), 30);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn factory_is_called_once_per_key() {
        let rt = Runtime::new();
        let built = Rc::new(std::cell::Cell::new(0));
        let built_clone = built.clone();

        let table = rt.table(move |key: &i32| {
            built_clone.set(built_clone.get() + 1);
            let key = *key;
            Compute::new(move || key + 1)
        });

        table.get(&1);
        table.get(&1);
        table.get(&2);
        assert_eq!(built.get(), 2);
        assert_eq!(table.keys(), vec![1, 2]);
    }

    #[test]
    fn only_changed_entries_recompute() {
        let rt = Runtime::new();
        let scale = rt.source(2);
        let offset = rt.source(100);

        let (s, o) = (scale.clone(), offset.clone());
        let table = rt.value_table(move |key: &i32| {
            if *key < 0 {
                o.get() + key
            } else {
                s.get() * key
            }
        });

        let pos = table.get(&4);
        let neg = table.get(&-1);
        assert_eq!(pos.get(), 8);
        assert_eq!(neg.get(), 99);

        scale.set(3);
        assert!(!pos.is_valid());
        assert!(neg.is_valid());
        assert_eq!(pos.get(), 12);
    }

    #[test]
    fn factory_reads_are_reported_and_not_tracked() {
        let rt = Runtime::new();
        let mode = rt.source(1);
        let m = mode.clone();

        let table = rt
            .table(move |key: &i32| {
                let factor = m.get();
                let key = *key;
                Compute::new(move || key * factor)
            })
            .labeled("bonds");

        let cell = table.get(&5);
        assert_eq!(cell.get(), 5);
        assert_eq!(cell.dependency_count(), 0);

        let diagnostics = rt.take_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(
            &diagnostics[0],
            Diagnostic::FactoryMisuse { table: Some(t), reads } if t == "bonds" && reads == &vec![mode.id()]
        ));
    }

    #[test]
    fn factory_reads_do_not_leak_into_caller_frame() {
        let rt = Runtime::new();
        let flag = rt.source(0);
        let f = flag.clone();
        let table = rt.table(move |_key: &u8| {
            f.get();
            Compute::new(|| 0)
        });

        let frame = rt.begin_frame();
        let cell = table.get(&0);
        let reads = frame.finish();

        assert!(reads.is_empty());
        drop(cell);
    }

    #[test]
    fn remove_and_invalidate_all() {
        let rt = Runtime::new();
        let table = rt.value_table(|key: &i32| key * 2);

        let a = table.get(&1);
        let b = table.get(&2);
        a.get();
        b.get();

        table.invalidate_all();
        assert!(!a.is_valid());
        assert!(!b.is_valid());

        let removed = table.remove(&1).unwrap();
        assert!(removed.ptr_eq(&a));
        assert!(!table.contains_key(&1));
        assert!(!table.get(&1).ptr_eq(&a));
    }
}
