// SPDX-License-Identifier: GPL-3.0-only

//! Reference-counted frames aggregating a depth and a video buffer

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::breadcrumb::BreadcrumbTrail;
use super::buffer::Buffer;
use super::pool::{Pooled, ResourcePool};
use crate::types::{Format, Intrinsics, Pose, Rotation};

/// Pool of frame slots
pub type FramePool = ResourcePool<FrameSlot>;

/// Hooks run by a frame's reference counting
pub trait FrameOwner: Send + Sync {
    /// Release a frame whose reference count dropped below 1
    fn free(&self, slot: Arc<FrameSlot>);

    /// Record a ref/unref event on the frame
    fn add_breadcrumb(&self, slot: &FrameSlot, tag: &str);
}

/// Contents of a frame
///
/// The frame owns one reference to each buffer it holds.
#[derive(Default)]
pub(crate) struct FrameContents {
    pub timestamp: u64,
    pub pose: Pose,
    pub camera_rotation: Rotation,
    pub depth: Option<Buffer>,
    pub depth_format: Format,
    pub depth_intrinsics: Intrinsics,
    pub video: Option<Buffer>,
    pub video_format: Format,
    pub video_intrinsics: Intrinsics,
}

/// Pooled storage behind a [`Frame`] handle
pub struct FrameSlot {
    ref_count: AtomicI32,
    contents: Mutex<FrameContents>,
    trail: BreadcrumbTrail,
    owner: Arc<dyn FrameOwner>,
}

impl FrameSlot {
    pub fn new(owner: Arc<dyn FrameOwner>) -> Self {
        Self {
            ref_count: AtomicI32::new(0),
            contents: Mutex::new(FrameContents::default()),
            trail: BreadcrumbTrail::new(),
            owner,
        }
    }

    fn contents(&self) -> std::sync::MutexGuard<'_, FrameContents> {
        self.contents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the buffers of a frame whose storage is being torn down
    fn take_buffers(&self) -> (Option<Buffer>, Option<Buffer>) {
        let mut contents = self.contents();
        (contents.depth.take(), contents.video.take())
    }
}

impl Pooled for FrameSlot {
    fn ref_count(&self) -> i32 {
        self.ref_count.load(Ordering::SeqCst)
    }

    fn breadcrumbs(&self) -> &BreadcrumbTrail {
        &self.trail
    }
}

/// Owner of frames allocated from a [`FramePool`]
pub struct PoolFrameOwner {
    pool: Weak<FramePool>,
}

impl FrameOwner for PoolFrameOwner {
    fn free(&self, slot: Arc<FrameSlot>) {
        let count = slot.ref_count();
        assert_eq!(count, 0, "Unbalanced frame unref (ref count {})", count);

        let (depth, video) = slot.take_buffers();
        if let Some(depth) = depth {
            depth.unref();
        }
        if let Some(video) = video {
            video.unref();
        }

        slot.trail.clear();
        if let Some(pool) = self.pool.upgrade() {
            pool.recycle(slot);
        }
    }

    fn add_breadcrumb(&self, slot: &FrameSlot, tag: &str) {
        let count = slot.ref_count();
        assert!(count >= 0, "Use after free of frame (ref count {})", count);
        slot.trail.add(tag);
    }
}

/// Create a pool of frame envelopes
pub fn frame_pool(name: &str, max_frames: usize) -> Arc<FramePool> {
    ResourcePool::new(
        name,
        max_frames,
        |pool| FrameSlot::new(Arc::new(PoolFrameOwner { pool })),
        |_slot: &FrameSlot| {},
    )
}

/// One counted reference to a pooled frame
///
/// Frames are immutable once handed to a consumer. Buffer accessors either
/// borrow the payload for the duration of a closure or hand out a new
/// reference that the caller must `unref`.
pub struct Frame {
    slot: Arc<FrameSlot>,
}

impl Frame {
    /// Acquire an empty frame from `pool` holding one reference
    pub fn acquire(pool: &Arc<FramePool>, tag: &str) -> Frame {
        let slot = pool.acquire();
        let count = slot.ref_count();
        assert_eq!(count, 0, "Frame was used after last free (ref count {})", count);

        slot.ref_count.store(1, Ordering::SeqCst);
        {
            let mut contents = slot.contents();
            debug_assert!(contents.depth.is_none() && contents.video.is_none());
            *contents = FrameContents::default();
        }
        slot.owner.add_breadcrumb(&slot, tag);
        Frame { slot }
    }

    /// Take another reference to the same frame
    ///
    /// # Panics
    ///
    /// Panics when the frame has already been freed.
    pub fn add_ref(&self) -> Frame {
        let count = self.slot.ref_count();
        assert!(count >= 1, "ref of freed frame (ref count {})", count);

        self.slot.owner.add_breadcrumb(&self.slot, "ref");
        self.slot.ref_count.fetch_add(1, Ordering::SeqCst);
        Frame {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Give back this reference, freeing the frame and its buffer references
    /// when it was the last one
    pub fn unref(self) {
        self.slot.owner.add_breadcrumb(&self.slot, "unref");
        let remaining = self.slot.ref_count.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining < 1 {
            let owner = Arc::clone(&self.slot.owner);
            owner.free(self.slot);
        }
    }

    pub fn ref_count(&self) -> i32 {
        self.slot.ref_count()
    }

    /// Capture time in nanoseconds
    pub fn timestamp(&self) -> u64 {
        self.slot.contents().timestamp
    }

    pub fn pose(&self) -> Pose {
        self.slot.contents().pose
    }

    pub fn camera_rotation(&self) -> Rotation {
        self.slot.contents().camera_rotation
    }

    pub fn has_depth(&self) -> bool {
        self.slot.contents().depth.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.slot.contents().video.is_some()
    }

    pub fn depth_format(&self) -> Format {
        self.slot.contents().depth_format
    }

    pub fn depth_intrinsics(&self) -> Intrinsics {
        self.slot.contents().depth_intrinsics
    }

    pub fn video_format(&self) -> Format {
        self.slot.contents().video_format
    }

    pub fn video_intrinsics(&self) -> Intrinsics {
        self.slot.contents().video_intrinsics
    }

    /// Borrow the depth payload, if any
    pub fn with_depth<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let contents = self.slot.contents();
        contents.depth.as_ref().map(|buffer| buffer.read(f))
    }

    /// Borrow the video payload, if any
    pub fn with_video<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let contents = self.slot.contents();
        contents.video.as_ref().map(|buffer| buffer.read(f))
    }

    /// New reference to the depth buffer; the caller must `unref` it
    pub fn depth_buffer(&self) -> Option<Buffer> {
        self.slot.contents().depth.as_ref().map(Buffer::add_ref)
    }

    /// New reference to the video buffer; the caller must `unref` it
    pub fn video_buffer(&self) -> Option<Buffer> {
        self.slot.contents().video.as_ref().map(Buffer::add_ref)
    }

    /// Tags of the ref/unref events recorded since the frame was acquired
    pub fn breadcrumbs(&self) -> Vec<String> {
        self.slot.trail.tags()
    }

    pub fn same_storage(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Mutate the frame while it is still private to its producer
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut FrameContents) -> R) -> R {
        f(&mut self.slot.contents())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let contents = self.slot.contents();
        f.debug_struct("Frame")
            .field("timestamp", &contents.timestamp)
            .field("depth", &contents.depth.is_some())
            .field("video", &contents.video.is_some())
            .field("ref_count", &self.slot.ref_count())
            .finish()
    }
}
