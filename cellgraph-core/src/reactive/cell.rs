//! Cell Implementation
//!
//! A Cell is an invalidatable, memoized value produced by a zero-argument
//! compute function.
//!
//! # How Cells Work
//!
//! 1. A new cell is invalid. Nothing runs until the first [`Cell::get`].
//!
//! 2. `get` on an invalid cell opens a tracking frame, runs the compute,
//!    closes the frame, and subscribes the cell to every resource read in
//!    that frame. The result is cached and the cell becomes valid.
//!
//! 3. `get` on a valid cell returns the cached value.
//!
//! 4. Either way, `get` records the cell as read in the caller's frame, so a
//!    cell computed inside another cell's compute becomes its dependency.
//!
//! 5. [`Cell::invalidate`] marks the cell invalid and invalidates every cell
//!    that read it since its last compute. It never recomputes anything.
//!
//! # Failures
//!
//! A compute that returns `Err` or panics does not take the caller down. The
//! failure is logged, `V::default()` is cached as the fallback, and the cell
//! is marked valid, so it is not retried until it is invalidated again.
//! With [`ErrorPolicy::Fatal`](crate::ErrorPolicy::Fatal) the process exits
//! instead.
//!
//! A compute that panics still goes through the process panic hook before
//! it is caught, so the default hook prints the panic to stderr in addition
//! to the `tracing` event. Hosts that want failures on the `tracing` channel
//! only should install their own hook with [`std::panic::set_hook`]. The
//! engine's own unwinds (cycles, see below) bypass the hook.
//!
//! Reading a cell that has never been given a compute function is a
//! programmer error and panics through every enclosing compute.
//!
//! # Changes during a compute
//!
//! If something the compute already read is invalidated before the compute
//! returns, or the cell itself is invalidated or given a new compute while
//! running, the result is cached and returned but the cell stays invalid.
//! Anything that read it in the same pass is left invalid too, and the next
//! read recomputes against the current inputs.

use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tracing::{error, trace};

use super::runtime::Runtime;
use super::subscriber::{Invalidate, TrackId};
use crate::error::{ComputeError, CycleDetected, UninitializedCompute};

type ComputeFn<V> = dyn Fn() -> Result<V, ComputeError>;

/// A shareable compute function.
///
/// Two `Compute` handles are equal when they wrap the same function object,
/// i.e. one is a clone of the other. [`Cell::set_compute`] uses this to skip
/// invalidation when the same function is installed again.
pub struct Compute<V> {
    func: Rc<ComputeFn<V>>,
}

impl<V: 'static> Compute<V> {
    /// Wrap an infallible compute function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> V + 'static,
    {
        Self {
            func: Rc::new(move || Ok(f())),
        }
    }

    /// Wrap a compute function that may fail.
    pub fn fallible<F, E>(f: F) -> Self
    where
        F: Fn() -> Result<V, E> + 'static,
        E: fmt::Display,
    {
        Self {
            func: Rc::new(move || {
                f().map_err(|e| ComputeError::Failed {
                    message: e.to_string(),
                })
            }),
        }
    }

    fn call(&self) -> Result<V, ComputeError> {
        (self.func)()
    }
}

impl<V> Clone for Compute<V> {
    fn clone(&self) -> Self {
        Self {
            func: Rc::clone(&self.func),
        }
    }
}

impl<V> PartialEq for Compute<V> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

impl<V> Eq for Compute<V> {}

impl<V> Debug for Compute<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Compute({:p})", Rc::as_ptr(&self.func) as *const ())
    }
}

struct CellInner<V> {
    id: TrackId,
    runtime: Runtime,
    label: RefCell<Option<Cow<'static, str>>>,
    compute: RefCell<Option<Compute<V>>>,
    value: RefCell<Option<V>>,
    valid: std::cell::Cell<bool>,
    computing: std::cell::Cell<bool>,
    /// Set when the cell is invalidated while its compute is running.
    dirty: std::cell::Cell<bool>,
    last_error: RefCell<Option<ComputeError>>,
}

/// An invalidatable, memoized value.
///
/// `Cell` is a handle; clones share the same state. The cell lives until the
/// last handle is dropped. Dependency edges never keep a cell alive.
///
/// # Type Parameters
///
/// - `V`: the computed value. `Clone` because reads return a copy of the
///   cached value, `Default` because that is the fallback cached when a
///   compute fails.
pub struct Cell<V>
where
    V: Clone + Default + 'static,
{
    inner: Rc<CellInner<V>>,
}

impl<V> Cell<V>
where
    V: Clone + Default + 'static,
{
    /// Create a cell computed by `compute`.
    ///
    /// The compute is not run immediately. It runs on first access.
    pub fn new<F>(runtime: &Runtime, compute: F) -> Self
    where
        F: Fn() -> V + 'static,
    {
        Self::with_compute(runtime, Some(Compute::new(compute)))
    }

    /// Create a cell whose compute may fail.
    pub fn fallible<F, E>(runtime: &Runtime, compute: F) -> Self
    where
        F: Fn() -> Result<V, E> + 'static,
        E: fmt::Display,
    {
        Self::with_compute(runtime, Some(Compute::fallible(compute)))
    }

    /// Create a cell without a compute function.
    pub fn uninit(runtime: &Runtime) -> Self {
        Self::with_compute(runtime, None)
    }

    /// Create a cell from an optional compute handle.
    pub fn with_compute(runtime: &Runtime, compute: Option<Compute<V>>) -> Self {
        let inner = Rc::new(CellInner {
            id: TrackId::new(),
            runtime: runtime.clone(),
            label: RefCell::new(None),
            compute: RefCell::new(compute),
            value: RefCell::new(None),
            valid: std::cell::Cell::new(false),
            computing: std::cell::Cell::new(false),
            dirty: std::cell::Cell::new(false),
            last_error: RefCell::new(None),
        });

        let weak: Weak<dyn Invalidate> = Rc::downgrade(&inner) as Weak<dyn Invalidate>;
        runtime.register(inner.id, weak);

        Self { inner }
    }

    /// Attach a label used in diagnostics.
    pub fn labeled(self, label: impl Into<Cow<'static, str>>) -> Self {
        *self.inner.label.borrow_mut() = Some(label.into());
        self
    }

    pub fn id(&self) -> TrackId {
        self.inner.id
    }

    pub fn label(&self) -> Option<String> {
        self.inner.label.borrow().as_deref().map(str::to_string)
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Get the current value, recomputing if the cell is invalid.
    ///
    /// This is the only way to read a cell. It always records the read in
    /// the caller's tracking frame, if one is open.
    pub fn get(&self) -> V {
        if !self.inner.valid.get() {
            self.inner.recompute();
        }

        self.inner.runtime.record_read(self.inner.id);
        if !self.inner.valid.get() {
            // Computed from inputs that changed mid-compute: readers in the
            // open frames are out of date as well.
            self.inner.runtime.mark_stale(self.inner.id);
        }

        self.inner.value.borrow().clone().unwrap_or_default()
    }

    /// Replace the compute function.
    ///
    /// Invalidates the cell unless `compute` is the function already
    /// installed.
    pub fn set_compute(&self, compute: Compute<V>) {
        let changed = self.inner.compute.borrow().as_ref() != Some(&compute);
        *self.inner.compute.borrow_mut() = Some(compute);
        if changed {
            self.inner.invalidate();
        }
    }

    /// Replace the compute function with a new closure. Always invalidates.
    pub fn set_compute_fn<F>(&self, compute: F)
    where
        F: Fn() -> V + 'static,
    {
        self.set_compute(Compute::new(compute));
    }

    /// The installed compute function, if any.
    pub fn compute(&self) -> Option<Compute<V>> {
        self.inner.compute.borrow().clone()
    }

    /// Mark the cell invalid and propagate to its dependents.
    ///
    /// A no-op if the cell is already invalid.
    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    pub fn is_valid(&self) -> bool {
        self.inner.valid.get()
    }

    /// Whether a value has ever been cached (it may be stale).
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// The failure behind the cached fallback, if the last compute failed.
    pub fn last_error(&self) -> Option<ComputeError> {
        self.inner.last_error.borrow().clone()
    }

    /// Number of resources this cell is subscribed to.
    pub fn dependency_count(&self) -> usize {
        self.inner.runtime.dependency_count(self.inner.id)
    }

    /// Number of cells currently subscribed to this one.
    pub fn dependent_count(&self) -> usize {
        self.inner.runtime.dependent_count(self.inner.id)
    }

    /// Whether two handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<V> CellInner<V>
where
    V: Clone + Default + 'static,
{
    fn label(&self) -> Option<String> {
        self.label.borrow().as_deref().map(str::to_string)
    }

    fn invalidate(&self) {
        if self.computing.get() {
            self.dirty.set(true);
        }
        if !self.valid.get() {
            return;
        }
        self.valid.set(false);

        trace!(cell = %self.id, "invalidated");

        // An invalid cell holds no subscriptions; it subscribes again when it
        // next recomputes.
        self.runtime.cancel_subscriptions(self.id);
        self.runtime.notify_dependents(self.id);
    }

    fn recompute(&self) {
        if self.computing.get() {
            error!(cell = %self.id, "cell read while it was computing");
            // Not a user panic: unwind without running the panic hook.
            panic::resume_unwind(Box::new(CycleDetected { cell: self.id }));
        }

        let compute = self.compute.borrow().clone();
        let Some(compute) = compute else {
            error!(cell = %self.id, "cell read before a compute function was set");
            self.raise_uninitialized(UninitializedCompute { cell: self.id });
        };

        trace!(cell = %self.id, "recomputing");

        self.computing.set(true);
        self.dirty.set(false);
        self.runtime.enter_compute();
        let frame = self.runtime.begin_frame();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| compute.call()));
        let reads = frame.finish();
        self.runtime.exit_compute();
        self.computing.set(false);

        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                if let Some(uninit) = payload.downcast_ref::<UninitializedCompute>() {
                    self.raise_uninitialized(*uninit);
                }
                Err(ComputeError::from_panic(payload))
            }
        };

        let stale = reads.is_stale() || self.dirty.replace(false);
        if stale {
            self.runtime.cancel_subscriptions(self.id);
        } else {
            self.runtime.resubscribe(self.id, reads);
        }

        let value = match result {
            Ok(value) => {
                *self.last_error.borrow_mut() = None;
                value
            }
            Err(err) => {
                let label = self.label();
                self.runtime
                    .report_compute_failure(self.id, label.as_deref(), &err);
                *self.last_error.borrow_mut() = Some(err);
                V::default()
            }
        };

        *self.value.borrow_mut() = Some(value);
        if stale {
            trace!(cell = %self.id, "inputs changed while computing; left invalid");
        } else {
            self.valid.set(true);
        }
    }

    /// Unwind for a read of a cell with no compute function.
    ///
    /// Inside a compute the bare payload is re-raised so that no enclosing
    /// compute contains it. Outside any compute it becomes an ordinary panic
    /// with a readable message.
    fn raise_uninitialized(&self, uninit: UninitializedCompute) -> ! {
        if self.runtime.in_compute() {
            panic::resume_unwind(Box::new(uninit));
        }
        panic!("{uninit}");
    }
}

impl<V> Invalidate for CellInner<V>
where
    V: Clone + Default + 'static,
{
    fn invalidate(&self) {
        CellInner::invalidate(self);
    }
}

impl<V> Drop for CellInner<V> {
    fn drop(&mut self) {
        self.runtime.unregister(self.id);
    }
}

impl<V> Clone for Cell<V>
where
    V: Clone + Default + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V> Debug for Cell<V>
where
    V: Clone + Default + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.inner.id)
            .field("label", &self.label())
            .field("valid", &self.is_valid())
            .field("value", &self.inner.value.borrow())
            .field("dependency_count", &self.dependency_count())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
