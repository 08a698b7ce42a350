//! Tracking Context
//!
//! The tracking context records which resources a computation reads. It is a
//! stack of frames owned by the [`Runtime`]: running a compute pushes a frame,
//! every tracked read lands in the topmost frame, and finishing the compute
//! pops the frame and hands back what was read.
//!
//! # Nesting
//!
//! A compute that reads another cell may cause that cell to recompute, which
//! pushes a frame of its own. The inner cell's reads go to the inner frame
//! only. Once the inner compute is done and its frame is popped, the inner
//! cell records its own read, which now lands in the outer frame.
//!
//! # Exit paths
//!
//! Frames are opened through [`TrackingFrame`], a guard that pops its frame
//! when dropped. A compute that panics therefore still leaves the stack
//! balanced.
//!
//! # Stale frames
//!
//! A resource can be invalidated after a frame has recorded it but before
//! the frame closes, for example when a compute sets a source that an
//! earlier read depended on. The frame is then marked stale and the cell
//! that owns it must not treat its result as current.

use std::collections::HashSet;

use smallvec::SmallVec;

use super::runtime::Runtime;
use super::TrackId;

/// Identifies one pushed frame. Returned with the reads so that the caller
/// can check it is closing the frame it opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

const INLINE_READS: usize = 8;

/// The resources read while one frame was topmost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReads {
    frame: FrameId,
    reads: SmallVec<[TrackId; INLINE_READS]>,
    stale: bool,
}

impl FrameReads {
    /// The frame these reads were collected in.
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    /// Distinct resources read, in first-read order.
    pub fn reads(&self) -> &[TrackId] {
        &self.reads
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    pub fn len(&self) -> usize {
        self.reads.len()
    }

    /// Whether something read in this frame was invalidated before the
    /// frame closed.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub(crate) fn into_reads(self) -> SmallVec<[TrackId; INLINE_READS]> {
        self.reads
    }
}

#[derive(Debug)]
struct Frame {
    id: FrameId,
    reads: SmallVec<[TrackId; INLINE_READS]>,
    /// Lookup set, built once the frame outgrows its inline reads.
    index: Option<HashSet<TrackId>>,
    stale: bool,
}

impl Frame {
    fn new(id: FrameId) -> Self {
        Self {
            id,
            reads: SmallVec::new(),
            index: None,
            stale: false,
        }
    }

    fn contains(&self, resource: &TrackId) -> bool {
        match &self.index {
            Some(index) => index.contains(resource),
            None => self.reads.contains(resource),
        }
    }

    fn insert(&mut self, resource: TrackId) {
        if self.contains(&resource) {
            return;
        }
        self.reads.push(resource);

        match &mut self.index {
            Some(index) => {
                index.insert(resource);
            }
            None if self.reads.len() > INLINE_READS => {
                self.index = Some(self.reads.iter().copied().collect());
            }
            None => {}
        }
    }
}

/// Stack of recording frames.
#[derive(Debug, Default)]
pub(crate) struct TrackingStack {
    frames: Vec<Frame>,
    next_frame: u64,
}

impl TrackingStack {
    pub(crate) fn push(&mut self) -> FrameId {
        let id = FrameId(self.next_frame);
        self.next_frame += 1;
        self.frames.push(Frame::new(id));
        id
    }

    /// Pop the topmost frame, which must be `id`.
    ///
    /// Panics on a mismatch: frames were closed out of order.
    pub(crate) fn pop(&mut self, id: FrameId) -> FrameReads {
        let frame = self
            .frames
            .pop()
            .unwrap_or_else(|| panic!("tracking frame {id:?} closed but the stack is empty"));

        assert_eq!(
            frame.id, id,
            "tracking frames closed out of order: expected {:?}, got {:?}",
            id, frame.id
        );

        FrameReads {
            frame: frame.id,
            reads: frame.reads,
            stale: frame.stale,
        }
    }

    pub(crate) fn pop_top(&mut self) {
        self.frames.pop();
    }

    /// Record a read into the topmost frame. Returns false if no frame is
    /// open, in which case the read is not tracked.
    pub(crate) fn record(&mut self, resource: TrackId) -> bool {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.insert(resource);
                true
            }
            None => false,
        }
    }

    /// Mark every open frame that has already read `resource` as stale.
    pub(crate) fn mark_stale(&mut self, resource: TrackId) {
        for frame in &mut self.frames {
            if frame.contains(&resource) {
                frame.stale = true;
            }
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Guard for an open tracking frame.
///
/// Call [`finish`](TrackingFrame::finish) to close the frame and collect its
/// reads. Dropping the guard without finishing closes the frame and discards
/// the reads.
#[must_use = "dropping the frame immediately discards everything it records"]
pub struct TrackingFrame {
    runtime: Runtime,
    id: FrameId,
    open: bool,
}

impl TrackingFrame {
    pub(crate) fn new(runtime: Runtime, id: FrameId) -> Self {
        Self {
            runtime,
            id,
            open: true,
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    /// Close the frame and return what was read while it was topmost.
    pub fn finish(mut self) -> FrameReads {
        self.open = false;
        self.runtime.pop_frame(self.id)
    }
}

impl Drop for TrackingFrame {
    fn drop(&mut self) {
        if self.open {
            if std::thread::panicking() {
                self.runtime.pop_frame_unchecked();
            } else {
                self.runtime.pop_frame(self.id);
            }
        }
    }
}
