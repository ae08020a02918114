// SPDX-License-Identifier: GPL-3.0-only

//! Pooled, reference-counted buffers and frames
//!
//! Buffers and frames start with a reference count of 1 when acquired from
//! their pool. `add_ref` and `unref` each leave a breadcrumb; the `unref` that
//! brings the count below 1 returns the object to its pool and clears the
//! trail. Pools are destroyed only after [`report_leaks`] has logged any object
//! still referenced.

pub mod breadcrumb;
pub mod buffer;
pub mod frame;
pub mod pool;

pub use breadcrumb::{Breadcrumb, BreadcrumbTrail};
pub use buffer::{Buffer, BufferOwner, BufferPool, BufferSlot, buffer_pool};
pub use frame::{Frame, FrameOwner, FramePool, FrameSlot, frame_pool};
pub use pool::{Pooled, ResourcePool, UNBOUNDED};

use tracing::error;

/// Log every resource of `pool` that is still referenced, with its
/// breadcrumb trail, and return how many there were
pub fn report_leaks<T: Pooled>(pool: &ResourcePool<T>) -> usize {
    let mut leaked = 0;
    pool.for_each(|resource| {
        let count = resource.ref_count();
        if count == 0 {
            return;
        }
        leaked += 1;
        let trail = resource.breadcrumbs().render();
        error!(
            pool = %pool.name(),
            ref_count = count,
            breadcrumbs = trail.len(),
            "Leaked resource:\n{}",
            trail.join("\n")
        );
    });
    leaked
}
