// SPDX-License-Identifier: GPL-3.0-only

//! Back/ready buffer swapping and the request/ready mask protocol
//!
//! Producers (backend capture threads) fill a back buffer and swap it into
//! the ready slot of its kind under the swap lock. The consumer claims every
//! ready buffer into a new frame under the same lock. Readiness is announced
//! under a second, independent lock that also serialises event dispatch:
//! a frame-ready event fires once per request, for the kinds both requested
//! and ready, and clears the satisfied request bits.
//!
//! Buffers displaced by a swap are unref'd only after the swap lock is
//! released, so pool recycling never runs under either lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, trace};

use super::events::{DeviceEvent, EventCallback};
use crate::backends::StreamSetup;
use crate::memory::{
    Buffer, BufferPool, Frame, FramePool, buffer_pool, frame_pool, report_leaks,
};
use crate::types::{BufferKind, BuffersMask, DeviceType, Extrinsics, Format, Intrinsics, Pose, Rotation};

/// Metadata accompanying one produced buffer
#[derive(Debug, Clone, Copy, Default)]
pub struct Capture {
    /// Capture time in nanoseconds
    pub timestamp: u64,
    pub pose: Option<Pose>,
    /// Camera model, when it differs from the one reported at open
    pub intrinsics: Option<Intrinsics>,
}

impl Capture {
    pub fn at(timestamp: u64) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = Some(pose);
        self
    }

    pub fn with_intrinsics(mut self, intrinsics: Intrinsics) -> Self {
        self.intrinsics = Some(intrinsics);
        self
    }
}

/// A recorded buffer together with the camera model it was captured with
pub struct RecordedBuffer<'a> {
    pub buffer: &'a Buffer,
    pub intrinsics: Intrinsics,
}

/// One recorded frame handed to [`SwapEngine::swap_recorded_frame`]
pub struct RecordedFrame<'a> {
    pub timestamp: u64,
    pub pose: Pose,
    pub camera_rotation: Rotation,
    pub depth: Option<RecordedBuffer<'a>>,
    pub video: Option<RecordedBuffer<'a>>,
}

/// Outstanding objects found when a device was closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeakReport {
    pub frames: usize,
    pub depth_buffers: usize,
    pub video_buffers: usize,
}

impl LeakReport {
    pub fn is_clean(&self) -> bool {
        self.frames == 0 && self.depth_buffers == 0 && self.video_buffers == 0
    }
}

#[derive(Default)]
struct KindSlots {
    /// Being written by the producer
    back: Option<Buffer>,
    /// Latest complete buffer, waiting to be claimed
    ready: Option<Buffer>,
    format: Format,
    intrinsics: Intrinsics,
}

/// State guarded by the swap lock
struct SwapState {
    slots: [KindSlots; 2],
    frame_time: u64,
    frame_pose: Pose,
    camera_rotation: Rotation,
    depth_to_video: Extrinsics,
    last_frame: Option<Frame>,
}

/// State guarded by the request mask lock
#[derive(Default)]
struct RequestState {
    callback: Option<EventCallback>,
}

/// Shared core of a device, handed to its backend's capture thread
pub struct SwapEngine {
    device_type: DeviceType,
    depth_pool: Arc<BufferPool>,
    video_pool: Arc<BufferPool>,
    frame_pool: Arc<FramePool>,
    max_depth_pixels: usize,
    max_video_pixels: usize,
    swap: Mutex<SwapState>,
    requests: Mutex<RequestState>,
    request_mask: AtomicU64,
    ready_mask: AtomicU64,
    running: AtomicBool,
    epoch: Instant,
}

impl SwapEngine {
    pub fn new(device_type: DeviceType, setup: &StreamSetup) -> Self {
        let max = crate::constants::MAX_POOL_RESOURCES;
        let depth = KindSlots {
            format: setup.depth_format,
            intrinsics: setup.depth_intrinsics,
            ..Default::default()
        };
        let video = KindSlots {
            format: setup.video_format,
            intrinsics: setup.video_intrinsics,
            ..Default::default()
        };

        debug!(
            device = %device_type,
            depth_buffer_bytes = setup.depth_buffer_bytes,
            video_buffer_bytes = setup.video_buffer_bytes,
            "Creating device pools"
        );

        Self {
            device_type,
            depth_pool: buffer_pool("depth buffers", setup.depth_buffer_bytes, max),
            video_pool: buffer_pool("video buffers", setup.video_buffer_bytes, max),
            frame_pool: frame_pool("frames", max),
            max_depth_pixels: setup.max_depth_pixels,
            max_video_pixels: setup.max_video_pixels,
            swap: Mutex::new(SwapState {
                slots: [depth, video],
                frame_time: 0,
                frame_pose: Pose::default(),
                camera_rotation: Rotation::None,
                depth_to_video: setup.depth_to_video,
                last_frame: None,
            }),
            requests: Mutex::new(RequestState::default()),
            request_mask: AtomicU64::new(0),
            ready_mask: AtomicU64::new(0),
            running: AtomicBool::new(false),
            epoch: Instant::now(),
        }
    }

    fn swap_lock(&self) -> std::sync::MutexGuard<'_, SwapState> {
        self.swap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_lock(&self) -> std::sync::MutexGuard<'_, RequestState> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn pool(&self, kind: BufferKind) -> &Arc<BufferPool> {
        match kind {
            BufferKind::Depth => &self.depth_pool,
            BufferKind::Video => &self.video_pool,
        }
    }

    pub fn frame_pool(&self) -> &Arc<FramePool> {
        &self.frame_pool
    }

    /// Acquire an empty buffer of `kind` from the device's pool
    pub fn acquire_buffer(&self, kind: BufferKind, tag: &str) -> Buffer {
        Buffer::acquire(self.pool(kind), tag)
    }

    /// Nanoseconds since the device was opened
    pub fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn request_mask(&self) -> BuffersMask {
        BuffersMask::from_bits_truncate(self.request_mask.load(Ordering::SeqCst))
    }

    pub fn ready_mask(&self) -> BuffersMask {
        BuffersMask::from_bits_truncate(self.ready_mask.load(Ordering::SeqCst))
    }

    /// Whether a producer should bother producing `kind` right now
    pub fn wants(&self, kind: BufferKind) -> bool {
        self.is_running() && self.request_mask().has(kind)
    }

    pub(crate) fn set_event_callback(&self, callback: Option<EventCallback>) {
        self.request_lock().callback = callback;
    }

    // ===== Producer side =====

    /// Fill a back buffer of `kind` and swap it in as the ready buffer
    ///
    /// `fill` writes the payload and returns `false` to discard it. Returns
    /// whether a buffer was published; data of unrequested kinds, or produced
    /// while the device is stopped, is dropped without calling `fill`.
    pub fn publish<F>(&self, kind: BufferKind, capture: Capture, fill: F) -> bool
    where
        F: FnOnce(&Buffer) -> bool,
    {
        if !self.wants(kind) {
            return false;
        }

        let back = self.swap_lock().slots[kind.index()].back.take();
        let back = back.unwrap_or_else(|| self.acquire_buffer(kind, "back buffer"));

        if !fill(&back) {
            let displaced = self.swap_lock().slots[kind.index()].back.replace(back);
            if let Some(displaced) = displaced {
                displaced.unref();
            }
            return false;
        }

        let fresh = self.acquire_buffer(kind, "back buffer");
        let (old_ready, old_back) = {
            let mut swap = self.swap_lock();
            let slot = &mut swap.slots[kind.index()];
            let old_ready = slot.ready.replace(back);
            let old_back = slot.back.replace(fresh);
            if let Some(intrinsics) = capture.intrinsics {
                slot.intrinsics = intrinsics;
            }
            swap.frame_time = capture.timestamp;
            if let Some(pose) = capture.pose {
                swap.frame_pose = pose;
            }
            self.ready_mask.fetch_or(kind.mask().bits(), Ordering::SeqCst);
            (old_ready, old_back)
        };

        if let Some(old) = old_ready {
            old.unref();
        }
        if let Some(old) = old_back {
            old.unref();
        }

        trace!(kind = %kind, timestamp = capture.timestamp, "Published buffer");
        self.notify_frame_ready();
        true
    }

    /// Install the buffers of a recorded frame as the ready buffers
    ///
    /// Only requested kinds are installed; each installed buffer gains one
    /// reference owned by the device.
    ///
    /// # Panics
    ///
    /// Panics if a present buffer comes with empty intrinsics.
    pub fn swap_recorded_frame(&self, frame: &RecordedFrame<'_>) {
        let requested = self.request_mask();
        let mut displaced = Vec::new();
        {
            let mut swap = self.swap_lock();
            swap.camera_rotation = frame.camera_rotation;
            swap.frame_time = frame.timestamp;
            swap.frame_pose = frame.pose;

            for (kind, recorded) in [
                (BufferKind::Depth, &frame.depth),
                (BufferKind::Video, &frame.video),
            ] {
                let Some(recorded) = recorded else {
                    continue;
                };
                assert!(
                    recorded.intrinsics.is_valid(),
                    "recorded {} intrinsics are empty ({}x{})",
                    kind,
                    recorded.intrinsics.width,
                    recorded.intrinsics.height
                );
                let slot = &mut swap.slots[kind.index()];
                slot.intrinsics = recorded.intrinsics;

                if requested.has(kind) {
                    displaced.extend(slot.ready.replace(recorded.buffer.add_ref()));
                    self.ready_mask.fetch_or(kind.mask().bits(), Ordering::SeqCst);
                }
            }
        }

        for old in displaced {
            old.unref();
        }
        self.notify_frame_ready();
    }

    pub fn set_camera_rotation(&self, rotation: Rotation) {
        self.swap_lock().camera_rotation = rotation;
    }

    // ===== Request side =====

    /// Ask for the kinds in `buffers_mask`, merging with earlier requests
    pub fn request_frame(&self, buffers_mask: BuffersMask) {
        if buffers_mask.is_empty() {
            return;
        }
        let state = self.request_lock();
        self.request_mask
            .fetch_or(buffers_mask.bits(), Ordering::SeqCst);
        trace!(requested = %self.request_mask(), "Frame requested");
        self.maybe_notify(&state);
    }

    fn notify_frame_ready(&self) {
        let state = self.request_lock();
        self.maybe_notify(&state);
    }

    /// Fire a frame-ready event if any requested kind is ready; must be
    /// called with the request lock held
    fn maybe_notify(&self, state: &RequestState) {
        let ready = self.ready_mask();
        let requested = self.request_mask();
        if !requested.intersects(ready) {
            return;
        }
        self.request_mask
            .fetch_and(!ready.bits(), Ordering::SeqCst);
        dispatch(
            state,
            DeviceEvent::FrameReady {
                buffers_mask: ready,
            },
        );
    }

    /// Announce that configuration is complete
    pub fn notify_ready(&self) {
        let state = self.request_lock();
        dispatch(&state, DeviceEvent::Ready);
    }

    // ===== Consumer side =====

    /// Claim every ready buffer into a new frame
    ///
    /// The device keeps one reference to the returned frame as its latest
    /// frame; the caller owns the other and must `unref` it.
    pub fn get_latest_frame(&self) -> Frame {
        let frame = Frame::acquire(&self.frame_pool, "latest frame");

        let previous = {
            let mut swap = self.swap_lock();
            let ready = self.ready_mask();
            let frame_time = swap.frame_time;
            let frame_pose = swap.frame_pose;
            let rotation = swap.camera_rotation;

            frame.update(|contents| {
                for kind in BufferKind::ALL {
                    if !ready.has(kind) {
                        continue;
                    }
                    let slot = &mut swap.slots[kind.index()];
                    let buffer = slot.ready.take();
                    assert!(buffer.is_some(), "{} marked ready without a buffer", kind);
                    assert!(
                        slot.intrinsics.is_valid(),
                        "{} intrinsics are empty ({}x{})",
                        kind,
                        slot.intrinsics.width,
                        slot.intrinsics.height
                    );
                    match kind {
                        BufferKind::Depth => {
                            contents.depth = buffer;
                            contents.depth_format = slot.format;
                            contents.depth_intrinsics = slot.intrinsics;
                        }
                        BufferKind::Video => {
                            contents.video = buffer;
                            contents.video_format = slot.format;
                            contents.video_intrinsics = slot.intrinsics;
                        }
                    }
                }
                contents.timestamp = frame_time;
                contents.pose = frame_pose;
                contents.camera_rotation = rotation;
            });
            self.ready_mask.store(0, Ordering::SeqCst);

            swap.last_frame.replace(frame.add_ref())
        };

        if let Some(previous) = previous {
            previous.unref();
        }

        let count = frame.ref_count();
        assert_eq!(count, 2, "latest frame handed out with ref count {}", count);
        frame
    }

    /// Build one frame from the depth of `depth_src` and the video of
    /// `video_src`, stamped with the timing and pose of `master`
    ///
    /// # Panics
    ///
    /// Panics if `depth_src` has no depth buffer or `video_src` has no video
    /// buffer.
    pub fn combine_frames(&self, master: &Frame, depth_src: &Frame, video_src: &Frame) -> Frame {
        let depth = depth_src.depth_buffer();
        assert!(depth.is_some(), "combine_frames: depth source has no depth buffer");
        let video = video_src.video_buffer();
        if video.is_none() {
            if let Some(depth) = depth {
                depth.unref();
            }
            panic!("combine_frames: video source has no video buffer");
        }

        let frame = Frame::acquire(&self.frame_pool, "combined frame");
        frame.update(|contents| {
            contents.timestamp = master.timestamp();
            contents.pose = master.pose();
            contents.camera_rotation = master.camera_rotation();
            contents.depth = depth;
            contents.depth_format = depth_src.depth_format();
            contents.depth_intrinsics = depth_src.depth_intrinsics();
            contents.video = video;
            contents.video_format = video_src.video_format();
            contents.video_intrinsics = video_src.video_intrinsics();
        });
        frame
    }

    // ===== Camera info =====

    pub fn intrinsics(&self, kind: BufferKind) -> Intrinsics {
        self.swap_lock().slots[kind.index()].intrinsics
    }

    pub fn format(&self, kind: BufferKind) -> Format {
        self.swap_lock().slots[kind.index()].format
    }

    pub fn depth_to_video_extrinsics(&self) -> Extrinsics {
        self.swap_lock().depth_to_video
    }

    pub fn camera_rotation(&self) -> Rotation {
        self.swap_lock().camera_rotation
    }

    pub fn max_pixels(&self, kind: BufferKind) -> usize {
        match kind {
            BufferKind::Depth => self.max_depth_pixels,
            BufferKind::Video => self.max_video_pixels,
        }
    }

    /// Whether the device currently holds a ready buffer of `kind`
    pub fn has_ready(&self, kind: BufferKind) -> bool {
        self.swap_lock().slots[kind.index()].ready.is_some()
    }

    // ===== Teardown =====

    /// Release the device's references, report leaks and destroy the pools
    pub(crate) fn shutdown(&self) -> LeakReport {
        let (last_frame, buffers) = {
            let mut swap = self.swap_lock();
            let mut buffers = Vec::new();
            for slot in swap.slots.iter_mut() {
                buffers.extend(slot.back.take());
                buffers.extend(slot.ready.take());
            }
            (swap.last_frame.take(), buffers)
        };
        self.ready_mask.store(0, Ordering::SeqCst);

        if let Some(frame) = last_frame {
            frame.unref();
        }
        for buffer in buffers {
            buffer.unref();
        }

        let frames = report_leaks(&self.frame_pool);
        let depth_buffers = report_leaks(&self.depth_pool);
        let video_buffers = report_leaks(&self.video_pool);

        self.frame_pool.destroy();
        self.depth_pool.destroy();
        self.video_pool.destroy();

        LeakReport {
            frames,
            depth_buffers,
            video_buffers,
        }
    }
}

fn dispatch(state: &RequestState, event: DeviceEvent) {
    match &state.callback {
        Some(callback) => callback(event),
        None => debug!(?event, "No event callback installed, dropping event"),
    }
}
