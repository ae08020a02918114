// SPDX-License-Identifier: GPL-3.0-only

//! Reference-counted byte buffers backed by a resource pool

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::breadcrumb::BreadcrumbTrail;
use super::pool::{Pooled, ResourcePool};

/// Pool of buffer slots
pub type BufferPool = ResourcePool<BufferSlot>;

/// Hooks run by a buffer's reference counting
///
/// Implemented once per source of buffers. Pool-backed buffers return
/// themselves to their pool in `free`.
pub trait BufferOwner: Send + Sync {
    /// Release a buffer whose reference count dropped below 1
    fn free(&self, slot: Arc<BufferSlot>);

    /// Record a ref/unref event on the buffer
    fn add_breadcrumb(&self, slot: &BufferSlot, tag: &str);
}

/// Pooled storage behind a [`Buffer`] handle
pub struct BufferSlot {
    ref_count: AtomicI32,
    data: Mutex<Vec<u8>>,
    capacity: usize,
    trail: BreadcrumbTrail,
    owner: Arc<dyn BufferOwner>,
}

impl BufferSlot {
    pub fn new(capacity: usize, owner: Arc<dyn BufferOwner>) -> Self {
        Self {
            ref_count: AtomicI32::new(0),
            data: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            trail: BreadcrumbTrail::new(),
            owner,
        }
    }

    fn data(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the backing allocation; used by pool destructors
    pub(crate) fn release_storage(&self) {
        *self.data() = Vec::new();
    }
}

impl Pooled for BufferSlot {
    fn ref_count(&self) -> i32 {
        self.ref_count.load(Ordering::SeqCst)
    }

    fn breadcrumbs(&self) -> &BreadcrumbTrail {
        &self.trail
    }
}

/// Owner of buffers allocated from a [`BufferPool`]
pub struct PoolBufferOwner {
    pool: Weak<BufferPool>,
}

impl BufferOwner for PoolBufferOwner {
    fn free(&self, slot: Arc<BufferSlot>) {
        let count = slot.ref_count();
        assert_eq!(count, 0, "Unbalanced buffer unref (ref count {})", count);

        slot.trail.clear();
        slot.data().clear();
        if let Some(pool) = self.pool.upgrade() {
            pool.recycle(slot);
        }
    }

    fn add_breadcrumb(&self, slot: &BufferSlot, tag: &str) {
        let count = slot.ref_count();
        assert!(count >= 0, "Use after free of buffer (ref count {})", count);
        slot.trail.add(tag);
    }
}

/// Create a pool of buffers holding up to `capacity` bytes each
pub fn buffer_pool(name: &str, capacity: usize, max_buffers: usize) -> Arc<BufferPool> {
    ResourcePool::new(
        name,
        max_buffers,
        move |pool| BufferSlot::new(capacity, Arc::new(PoolBufferOwner { pool })),
        |slot: &BufferSlot| slot.release_storage(),
    )
}

/// One counted reference to a pooled byte buffer
///
/// A handle is a single reference: [`Buffer::add_ref`] creates another and
/// [`Buffer::unref`] gives one back. Dropping a handle without `unref` leaks
/// the reference, which shows up in the pool's leak report.
pub struct Buffer {
    slot: Arc<BufferSlot>,
}

impl Buffer {
    /// Acquire an empty buffer from `pool` holding one reference
    pub fn acquire(pool: &Arc<BufferPool>, tag: &str) -> Buffer {
        let slot = pool.acquire();
        let count = slot.ref_count();
        assert_eq!(count, 0, "Buffer was used after last free (ref count {})", count);

        slot.ref_count.store(1, Ordering::SeqCst);
        slot.data().clear();
        slot.owner.add_breadcrumb(&slot, tag);
        Buffer { slot }
    }

    /// Take another reference to the same buffer
    ///
    /// # Panics
    ///
    /// Panics when the buffer has already been freed.
    pub fn add_ref(&self) -> Buffer {
        let count = self.slot.ref_count();
        assert!(count >= 1, "ref of freed buffer (ref count {})", count);

        self.slot.owner.add_breadcrumb(&self.slot, "ref");
        self.slot.ref_count.fetch_add(1, Ordering::SeqCst);
        Buffer {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Give back this reference, freeing the buffer when it was the last one
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

    /// Size of the payload in bytes
    pub fn len(&self) -> usize {
        self.slot.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest payload the buffer was sized for
    pub fn capacity(&self) -> usize {
        self.slot.capacity
    }

    /// Replace the payload with a copy of `bytes`
    ///
    /// # Panics
    ///
    /// Panics if `bytes` exceeds the buffer's capacity.
    pub fn fill(&self, bytes: &[u8]) {
        assert!(
            bytes.len() <= self.slot.capacity,
            "{} bytes do not fit a buffer of {} bytes",
            bytes.len(),
            self.slot.capacity
        );
        let mut data = self.slot.data();
        data.clear();
        data.extend_from_slice(bytes);
    }

    /// Mutate the payload in place
    pub fn write<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        f(&mut self.slot.data())
    }

    /// Read the payload
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.slot.data())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.slot.data().clone()
    }

    /// Tags of the ref/unref events recorded since the buffer was acquired
    pub fn breadcrumbs(&self) -> Vec<String> {
        self.slot.trail.tags()
    }

    /// Whether both handles reference the same pooled storage
    pub fn same_storage(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("capacity", &self.slot.capacity)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
