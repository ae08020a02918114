// SPDX-License-Identifier: GPL-3.0-only

//! Bounded recycling pool for reusable heap resources
//!
//! Resources are allocated lazily through a user supplied allocator and are
//! never freed while the pool lives: `recycle` pushes them back onto a free
//! list that `acquire` pops from (last in, first out). Every resource ever
//! allocated stays registered so that leaks can be reported before the pool
//! is destroyed.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, trace};

use super::breadcrumb::BreadcrumbTrail;

/// Unbounded maximum for [`ResourcePool::new`]
pub const UNBOUNDED: usize = usize::MAX;

/// A resource that can live in a [`ResourcePool`]
pub trait Pooled: Send + Sync + 'static {
    /// Current reference count; must be exactly 0 when recycled
    fn ref_count(&self) -> i32;

    /// Ref/unref history used in leak reports
    fn breadcrumbs(&self) -> &BreadcrumbTrail;
}

/// Allocator callback; receives a handle to the pool so resources can find
/// their way back to it when freed
type AllocFn<T> = Box<dyn Fn(Weak<ResourcePool<T>>) -> T + Send + Sync>;

/// Destructor callback run over every resource when the pool is destroyed
type DestroyFn<T> = Box<dyn Fn(&T) + Send + Sync>;

struct PoolInner<T> {
    /// Recycled resources, most recently recycled last
    free: Vec<Arc<T>>,
    /// Every resource ever allocated, free or outstanding
    all: Vec<Arc<T>>,
    destroyed: bool,
}

/// Recycling allocator for one kind of resource
pub struct ResourcePool<T: Pooled> {
    name: String,
    max_resources: usize,
    inner: Mutex<PoolInner<T>>,
    allocator: AllocFn<T>,
    destructor: DestroyFn<T>,
}

impl<T: Pooled> ResourcePool<T> {
    /// Create a named pool allowing at most `max_resources` outstanding
    /// resources at any time
    pub fn new<A, D>(name: &str, max_resources: usize, allocator: A, destructor: D) -> Arc<Self>
    where
        A: Fn(Weak<ResourcePool<T>>) -> T + Send + Sync + 'static,
        D: Fn(&T) + Send + Sync + 'static,
    {
        debug!(pool = %name, max_resources, "Creating resource pool");
        Arc::new(Self {
            name: name.to_string(),
            max_resources,
            inner: Mutex::new(PoolInner {
                free: Vec::new(),
                all: Vec::new(),
                destroyed: false,
            }),
            allocator: Box::new(allocator),
            destructor: Box::new(destructor),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a resource from the free list, allocating a new one if empty
    ///
    /// The caller is responsible for resetting the resource's reference
    /// count and contents.
    ///
    /// # Panics
    ///
    /// Panics when the pool already has `max_resources` resources
    /// outstanding or has been destroyed; both are programming errors.
    pub fn acquire(self: &Arc<Self>) -> Arc<T> {
        let mut inner = self.lock();
        assert!(
            !inner.destroyed,
            "acquire from destroyed pool '{}'",
            self.name
        );

        if let Some(resource) = inner.free.pop() {
            return resource;
        }

        let outstanding = inner.all.len() - inner.free.len();
        assert!(
            outstanding < self.max_resources,
            "pool '{}' exhausted: {} resources outstanding",
            self.name,
            outstanding
        );

        let resource = Arc::new((self.allocator)(Arc::downgrade(self)));
        inner.all.push(Arc::clone(&resource));
        trace!(pool = %self.name, allocated = inner.all.len(), "Allocated pool resource");
        resource
    }

    /// Return a resource to the free list
    ///
    /// # Panics
    ///
    /// Panics if the resource is still referenced.
    pub fn recycle(&self, resource: Arc<T>) {
        let count = resource.ref_count();
        assert_eq!(
            count, 0,
            "recycling a resource with ref count {} into pool '{}'",
            count, self.name
        );

        let mut inner = self.lock();
        if inner.destroyed {
            trace!(pool = %self.name, "Dropping resource recycled after destroy");
            return;
        }
        inner.free.push(resource);
    }

    /// Visit every resource ever allocated, free and outstanding
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&T),
    {
        let all: Vec<Arc<T>> = self.lock().all.clone();
        for resource in &all {
            f(resource);
        }
    }

    /// Run the destructor over every resource and release the pool's storage
    ///
    /// Leak reporting (see [`super::report_leaks`]) must happen first.
    pub fn destroy(&self) {
        let all = {
            let mut inner = self.lock();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.free.clear();
            std::mem::take(&mut inner.all)
        };

        debug!(pool = %self.name, resources = all.len(), "Destroying resource pool");
        for resource in &all {
            (self.destructor)(resource);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_resources(&self) -> usize {
        self.max_resources
    }

    /// Number of resources ever allocated
    pub fn allocated(&self) -> usize {
        self.lock().all.len()
    }

    /// Number of resources currently handed out
    pub fn outstanding(&self) -> usize {
        let inner = self.lock();
        inner.all.len() - inner.free.len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }
}
