//! Runtime
//!
//! The runtime is the single-threaded context object that ties cells
//! together. It owns:
//!
//! - the tracking stack that records reads while computes run
//! - the subscription graph of one-shot invalidation edges
//! - a registry mapping each live cell's ID to a weak reference, which is
//!   how a producer's fan-out reaches its dependents without owning them
//! - the diagnostic channel and the configured error policy
//!
//! # How It Works
//!
//! 1. When a cell is created, it registers a weak reference to itself.
//!
//! 2. While a compute runs, every tracked read is recorded in the topmost
//!    frame of the tracking stack.
//!
//! 3. When the compute finishes, the runtime replaces the cell's
//!    subscriptions with one edge per resource it read.
//!
//! 4. When a resource is invalidated, the runtime detaches its dependents
//!    and invalidates each one that is still alive. Dependents recompute
//!    lazily on their next read.
//!
//! A `Runtime` is a cheap handle (`Rc`) and is neither `Send` nor `Sync`.
//!
//! Cells only track reads within their own runtime. A cell read inside a
//! compute that belongs to another runtime is not recorded as a dependency;
//! the read is reported as [`Diagnostic::CrossRuntimeRead`] instead.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::io::Write;
use std::rc::{Rc, Weak};

use tracing::{error, trace, warn};

use super::cell::{Cell, Compute};
use super::context::{FrameId, FrameReads, TrackingFrame, TrackingStack};
use super::source::Source;
use super::subscriber::{Invalidate, TrackId};
use super::table::KeyedTable;
use crate::config::{EngineConfig, ErrorPolicy};
use crate::error::{ComputeError, Diagnostic};
use crate::graph::SubscriptionGraph;

thread_local! {
    /// Computes running on this thread, across all runtimes.
    static COMPUTES_ON_THREAD: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

struct RuntimeInner {
    config: EngineConfig,
    computes: std::cell::Cell<usize>,
    stack: RefCell<TrackingStack>,
    graph: RefCell<SubscriptionGraph>,
    registry: RefCell<HashMap<TrackId, Weak<dyn Invalidate>>>,
    diagnostics: RefCell<VecDeque<Diagnostic>>,
}

/// Handle to a cell runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                computes: std::cell::Cell::new(0),
                stack: RefCell::new(TrackingStack::default()),
                graph: RefCell::new(SubscriptionGraph::new()),
                registry: RefCell::new(HashMap::new()),
                diagnostics: RefCell::new(VecDeque::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// Create a cell computed by `compute`.
    pub fn cell<V, F>(&self, compute: F) -> Cell<V>
    where
        V: Clone + Default + 'static,
        F: Fn() -> V + 'static,
    {
        Cell::new(self, compute)
    }

    /// Create a cell with no compute function. Reading it before
    /// [`Cell::set_compute`] is called panics.
    pub fn cell_uninit<V>(&self) -> Cell<V>
    where
        V: Clone + Default + 'static,
    {
        Cell::uninit(self)
    }

    /// Create a cell whose compute may fail.
    pub fn fallible_cell<V, E, F>(&self, compute: F) -> Cell<V>
    where
        V: Clone + Default + 'static,
        E: fmt::Display,
        F: Fn() -> Result<V, E> + 'static,
    {
        Cell::with_compute(self, Some(Compute::fallible(compute)))
    }

    /// Create a settable source holding `value`.
    pub fn source<T>(&self, value: T) -> Source<T>
    where
        T: Clone + 'static,
    {
        Source::new(self, value)
    }

    /// Create a keyed table whose factory builds a compute function per key.
    pub fn table<K, V, F>(&self, factory: F) -> KeyedTable<K, V>
    where
        K: Hash + Eq + Clone + 'static,
        V: Clone + Default + 'static,
        F: Fn(&K) -> Compute<V> + 'static,
    {
        KeyedTable::new(self, factory)
    }

    /// Create a keyed table whose cells compute `value_fn(key)`.
    pub fn value_table<K, V, F>(&self, value_fn: F) -> KeyedTable<K, V>
    where
        K: Hash + Eq + Clone + 'static,
        V: Clone + Default + 'static,
        F: Fn(&K) -> V + 'static,
    {
        KeyedTable::from_value_fn(self, value_fn)
    }

    // ------------------------------------------------------------------
    // Tracking context
    // ------------------------------------------------------------------

    /// Open a new tracking frame. Reads are recorded into it until it is
    /// finished or dropped.
    pub fn begin_frame(&self) -> TrackingFrame {
        let id = self.inner.stack.borrow_mut().push();
        TrackingFrame::new(self.clone(), id)
    }

    pub(crate) fn pop_frame(&self, id: FrameId) -> FrameReads {
        self.inner.stack.borrow_mut().pop(id)
    }

    /// Pop the topmost frame without checking its ID. Only used while
    /// unwinding, where a second panic would abort.
    pub(crate) fn pop_frame_unchecked(&self) {
        if let Ok(mut stack) = self.inner.stack.try_borrow_mut() {
            stack.pop_top();
        }
    }

    /// Record a read of `resource` into the topmost frame, if any.
    pub fn record_read(&self, resource: TrackId) {
        let recorded = self.inner.stack.borrow_mut().record(resource);
        if !recorded && self.foreign_compute_running() {
            self.report_cross_runtime_read(resource);
        }
    }

    /// Mark every open frame that already read `resource` as stale.
    pub(crate) fn mark_stale(&self, resource: TrackId) {
        self.inner.stack.borrow_mut().mark_stale(resource);
    }

    pub(crate) fn enter_compute(&self) {
        self.inner.computes.set(self.inner.computes.get() + 1);
        COMPUTES_ON_THREAD.with(|n| n.set(n.get() + 1));
    }

    pub(crate) fn exit_compute(&self) {
        self.inner.computes.set(self.inner.computes.get().saturating_sub(1));
        COMPUTES_ON_THREAD.with(|n| n.set(n.get().saturating_sub(1)));
    }

    /// Whether a compute of this runtime is running.
    pub(crate) fn in_compute(&self) -> bool {
        self.inner.computes.get() > 0
    }

    fn foreign_compute_running(&self) -> bool {
        !self.in_compute() && COMPUTES_ON_THREAD.with(|n| n.get() > 0)
    }

    /// Whether a tracking frame is open.
    pub fn is_tracking(&self) -> bool {
        self.depth() > 0
    }

    /// Number of open tracking frames.
    pub fn depth(&self) -> usize {
        self.inner.stack.borrow().depth()
    }

    /// Run `f` with its reads hidden from the enclosing frame.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let frame = self.begin_frame();
        let result = f();
        drop(frame.finish());
        result
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    pub(crate) fn register(&self, id: TrackId, target: Weak<dyn Invalidate>) {
        self.inner.registry.borrow_mut().insert(id, target);
    }

    /// Forget a resource: drop its registry entry and every edge touching it.
    pub(crate) fn unregister(&self, id: TrackId) {
        self.inner.registry.borrow_mut().remove(&id);
        self.inner.graph.borrow_mut().remove_node(id);
    }

    /// Replace `dependent`'s subscriptions with the reads of one frame.
    pub(crate) fn resubscribe(&self, dependent: TrackId, reads: FrameReads) {
        self.inner
            .graph
            .borrow_mut()
            .resubscribe(dependent, reads.into_reads());
    }

    pub(crate) fn cancel_subscriptions(&self, dependent: TrackId) {
        self.inner.graph.borrow_mut().cancel(dependent);
    }

    /// Invalidate every current dependent of `producer`, consuming the edges.
    pub(crate) fn notify_dependents(&self, producer: TrackId) {
        self.mark_stale(producer);

        let dependents = self.inner.graph.borrow_mut().take_dependents(producer);
        if dependents.is_empty() {
            return;
        }

        trace!(%producer, count = dependents.len(), "propagating invalidation");

        for id in dependents {
            let target = self.inner.registry.borrow().get(&id).and_then(Weak::upgrade);
            if let Some(target) = target {
                target.invalidate();
            }
        }
    }

    pub(crate) fn dependent_count(&self, producer: TrackId) -> usize {
        self.inner.graph.borrow().dependent_count(producer)
    }

    pub(crate) fn dependency_count(&self, dependent: TrackId) -> usize {
        self.inner.graph.borrow().dependency_count(dependent)
    }

    /// Number of cells currently alive in this runtime.
    pub fn live_cells(&self) -> usize {
        self.inner
            .registry
            .borrow()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Number of invalidation edges currently installed.
    pub fn edge_count(&self) -> usize {
        self.inner.graph.borrow().edge_count()
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Log a compute failure and apply the error policy.
    ///
    /// Under [`ErrorPolicy::Fatal`] this does not return.
    pub(crate) fn report_compute_failure(
        &self,
        cell: TrackId,
        label: Option<&str>,
        error: &ComputeError,
    ) {
        error!(%cell, label = label.unwrap_or(""), %error, "exception in compute ignored");

        self.push_diagnostic(Diagnostic::ComputeFailed {
            cell,
            label: label.map(str::to_string),
            error: error.clone(),
        });

        if self.inner.config.error_policy == ErrorPolicy::Fatal {
            error!(%cell, "exiting after compute failure (error policy is fatal)");
            let _ = std::io::stdout().flush();
            let _ = std::io::stderr().flush();
            std::process::exit(1);
        }
    }

    pub(crate) fn report_factory_misuse(&self, table: Option<&str>, reads: &FrameReads) {
        warn!(
            table = table.unwrap_or(""),
            reads = reads.len(),
            "keyed table factory performed tracked reads; they were ignored"
        );

        self.push_diagnostic(Diagnostic::FactoryMisuse {
            table: table.map(str::to_string),
            reads: reads.reads().to_vec(),
        });
    }

    fn report_cross_runtime_read(&self, resource: TrackId) {
        warn!(
            %resource,
            "read inside a compute of another runtime; it is not tracked"
        );

        self.push_diagnostic(Diagnostic::CrossRuntimeRead { resource });
    }

    fn push_diagnostic(&self, diagnostic: Diagnostic) {
        let limit = self.inner.config.max_diagnostics;
        if limit == 0 {
            return;
        }

        let mut diagnostics = self.inner.diagnostics.borrow_mut();
        while diagnostics.len() >= limit {
            diagnostics.pop_front();
        }
        diagnostics.push_back(diagnostic);
    }

    /// Retained diagnostics, oldest first.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.inner.diagnostics.borrow().iter().cloned().collect()
    }

    /// Drain retained diagnostics, oldest first.
    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        self.inner.diagnostics.borrow_mut().drain(..).collect()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("error_policy", &self.inner.config.error_policy)
            .field("depth", &self.depth())
            .field("live_cells", &self.live_cells())
            .field("edges", &self.edge_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell as Flag;

    struct MockCell {
        invalidated: Flag<usize>,
    }

    impl Invalidate for MockCell {
        fn invalidate(&self) {
            self.invalidated.set(self.invalidated.get() + 1);
        }
    }

    fn mock(rt: &Runtime) -> (TrackId, Rc<MockCell>) {
        let id = TrackId::new();
        let cell = Rc::new(MockCell {
            invalidated: Flag::new(0),
        });
        let weak: Weak<dyn Invalidate> = Rc::downgrade(&cell) as Weak<dyn Invalidate>;
        rt.register(id, weak);
        (id, cell)
    }

    fn subscribe(rt: &Runtime, dependent: TrackId, producers: &[TrackId]) {
        let frame = rt.begin_frame();
        for p in producers {
            rt.record_read(*p);
        }
        rt.resubscribe(dependent, frame.finish());
    }

    #[test]
    fn runtime_registers_and_unregisters() {
        let rt = Runtime::new();
        let (id, _cell) = mock(&rt);
        assert_eq!(rt.live_cells(), 1);

        rt.unregister(id);
        assert_eq!(rt.live_cells(), 0);
    }

    #[test]
    fn runtime_notifies_dependents_once() {
        let rt = Runtime::new();
        let producer = TrackId::new();
        let (id, cell) = mock(&rt);

        subscribe(&rt, id, &[producer]);
        assert_eq!(rt.dependent_count(producer), 1);

        rt.notify_dependents(producer);
        assert_eq!(cell.invalidated.get(), 1);

        // Edges are consumed by the first notification.
        rt.notify_dependents(producer);
        assert_eq!(cell.invalidated.get(), 1);
        assert_eq!(rt.edge_count(), 0);
    }

    #[test]
    fn dropped_dependents_are_skipped() {
        let rt = Runtime::new();
        let producer = TrackId::new();
        let (id, cell) = mock(&rt);

        subscribe(&rt, id, &[producer]);
        drop(cell);

        rt.notify_dependents(producer);
        assert_eq!(rt.live_cells(), 0);
    }

    #[test]
    fn untracked_hides_reads_from_enclosing_frame() {
        let rt = Runtime::new();
        let a = TrackId::new();
        let b = TrackId::new();

        let frame = rt.begin_frame();
        rt.record_read(a);
        rt.untracked(|| rt.record_read(b));
        let reads = frame.finish();

        assert_eq!(reads.reads(), &[a]);
        assert_eq!(rt.depth(), 0);
    }

    #[test]
    fn dropped_frame_is_popped() {
        let rt = Runtime::new();
        {
            let _frame = rt.begin_frame();
            assert!(rt.is_tracking());
        }
        assert!(!rt.is_tracking());
    }

    #[test]
    fn notification_marks_frames_that_read_the_producer() {
        let rt = Runtime::new();
        let producer = TrackId::new();

        let frame = rt.begin_frame();
        rt.record_read(producer);
        rt.notify_dependents(producer);
        assert!(frame.finish().is_stale());

        let frame = rt.begin_frame();
        rt.notify_dependents(producer);
        rt.record_read(producer);
        assert!(!frame.finish().is_stale());
    }

    #[test]
    fn read_during_foreign_compute_is_reported() {
        let rt = Runtime::new();
        let other = Runtime::new();
        let resource = TrackId::new();

        other.enter_compute();
        rt.record_read(resource);
        other.record_read(TrackId::new());
        other.exit_compute();
        rt.record_read(resource);

        assert_eq!(
            rt.take_diagnostics(),
            vec![Diagnostic::CrossRuntimeRead { resource }]
        );
        assert!(other.take_diagnostics().is_empty());
    }

    #[test]
    fn diagnostics_are_bounded() {
        let config = EngineConfig {
            max_diagnostics: 2,
            ..EngineConfig::default()
        };
        let rt = Runtime::with_config(config);

        for n in 0..3 {
            rt.report_compute_failure(
                TrackId::new(),
                Some("bounded"),
                &ComputeError::Failed {
                    message: n.to_string(),
                },
            );
        }

        let diagnostics = rt.take_diagnostics();
        assert_eq!(diagnostics.len(), 2);
        assert!(matches!(
            &diagnostics[0],
            Diagnostic::ComputeFailed { error: ComputeError::Failed { message }, .. } if message == "1"
        ));
        assert!(rt.diagnostics().is_empty());
    }
}
