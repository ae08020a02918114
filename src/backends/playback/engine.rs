// SPDX-License-Identifier: GPL-3.0-only

//! Real-time replay of a recording
//!
//! Every [`PlaybackEngine::tick`] emits one frame. Emitted timestamps come
//! from a synthetic clock advanced by the delta between consecutive recorded
//! timestamps, so they keep increasing across loops and pauses. Pacing
//! compares progress through the recording against wall clock progress since
//! the current loop started: ahead of time the engine sleeps, and more than
//! [`CATCH_UP_THRESHOLD_NS`] behind it skips forward.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, trace, warn};

use super::clock::{PlaybackClock, SystemClock};
use super::controls::PlaybackControls;
use crate::constants::playback::{CATCH_UP_THRESHOLD_NS, NOMINAL_FRAME_INTERVAL, NOMINAL_FRAME_INTERVAL_NS};
use crate::device::{RecordedBuffer, RecordedFrame, SwapEngine};
use crate::memory::Buffer;
use crate::recording::{FrameRecord, Recording};
use crate::types::{BufferKind, Intrinsics, Pose, Rotation};

/// Result of one playback iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Recorded frame `frame` was emitted at `timestamp`
    Played { frame: usize, timestamp: u64 },
    /// The last buffers were emitted again while paused
    Paused { timestamp: u64 },
    /// Playback was cancelled before anything was emitted
    Cancelled,
}

struct LoadedBuffer {
    buffer: Buffer,
    intrinsics: Intrinsics,
}

impl LoadedBuffer {
    /// Copy into a fresh pool buffer so repeated emission never hands out the
    /// same buffer twice
    fn copy(&self, device: &SwapEngine, kind: BufferKind) -> LoadedBuffer {
        let buffer = device.acquire_buffer(kind, "paused copy");
        self.buffer.read(|bytes| buffer.fill(bytes));
        LoadedBuffer {
            buffer,
            intrinsics: self.intrinsics,
        }
    }

    fn recorded(&self) -> RecordedBuffer<'_> {
        RecordedBuffer {
            buffer: &self.buffer,
            intrinsics: self.intrinsics,
        }
    }
}

pub struct PlaybackEngine<C: PlaybackClock = SystemClock> {
    recording: Arc<Recording>,
    device: Arc<SwapEngine>,
    controls: Arc<PlaybackControls>,
    clock: C,
    cancel: Arc<AtomicBool>,
    started: bool,
    frame0_timestamp: u64,
    /// Synthetic time stamped onto emitted frames
    monotonic_clock: u64,
    /// Wall clock time the current loop started
    loop_start: u64,
    /// Recorded timestamp of the previously emitted frame
    prev_timestamp: u64,
    pose: Pose,
    camera_rotation: Rotation,
    last_depth: Option<LoadedBuffer>,
    last_video: Option<LoadedBuffer>,
}

impl<C: PlaybackClock> PlaybackEngine<C> {
    pub fn new(
        recording: Arc<Recording>,
        device: Arc<SwapEngine>,
        controls: Arc<PlaybackControls>,
        clock: C,
    ) -> Self {
        let now = clock.now_ns();
        let frame0_timestamp = recording.start_timestamp();
        let pose = recording.frames().first().map(|f| f.pose).unwrap_or_default();

        Self {
            recording,
            device,
            controls,
            clock,
            cancel: Arc::new(AtomicBool::new(false)),
            started: false,
            frame0_timestamp,
            monotonic_clock: now,
            loop_start: now,
            prev_timestamp: frame0_timestamp,
            pose,
            camera_rotation: Rotation::None,
            last_depth: None,
            last_video: None,
        }
    }

    /// Flag that makes a blocked or future tick return [`Tick::Cancelled`]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn controls(&self) -> &Arc<PlaybackControls> {
        &self.controls
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Advance playback by one frame and emit it
    pub fn tick(&mut self) -> Tick {
        if self.cancelled() {
            return Tick::Cancelled;
        }

        let recording = Arc::clone(&self.recording);
        let frames = recording.frames();

        let mut cursor = self.controls.cursor();
        let n_frames = cursor.effective_frames(frames.len());

        if !self.started {
            self.started = true;
            cursor.frame = cursor.frame.min(n_frames - 1);
        } else if cursor.frame + 1 >= n_frames {
            if !cursor.looping && !cursor.ignore_loop {
                drop(cursor);
                return self.paused_tick();
            }
            // Looks like the jump back to the start took one frame interval
            self.loop_start = self.clock.now_ns();
            self.prev_timestamp = self.frame0_timestamp.saturating_sub(NOMINAL_FRAME_INTERVAL_NS);
            cursor.frame = 0;
            debug!("Restarting recording from the first frame");
        } else {
            cursor.frame += 1;
        }
        cursor.ignore_loop = false;

        let mut real_progress = self.clock.now_ns().saturating_sub(self.loop_start);
        let mut index = cursor.frame;
        let progress = frames[index].timestamp.saturating_sub(self.frame0_timestamp);

        if progress.saturating_add(CATCH_UP_THRESHOLD_NS) < real_progress {
            warn!(
                frame = index,
                behind_ms = (real_progress - progress) / 1_000_000,
                "Slow playback, skipping recorded frames"
            );
            let prefer_depth = self.device.request_mask().has(BufferKind::Depth);
            index = catch_up_frame(frames, index, n_frames, real_progress, prefer_depth);
            cursor.frame = index;
        }
        drop(cursor);

        trace!(frame = index, "Replaying frame");

        let record = &frames[index];
        let recording_progress = record.timestamp.saturating_sub(self.frame0_timestamp);

        let delta = if record.timestamp < self.prev_timestamp {
            error!(
                frame = index,
                timestamp = record.timestamp,
                previous = self.prev_timestamp,
                "Recorded frame timestamps went backwards"
            );
            NOMINAL_FRAME_INTERVAL_NS
        } else {
            record.timestamp - self.prev_timestamp
        };
        self.monotonic_clock += delta;
        self.prev_timestamp = record.timestamp;
        self.pose = record.pose;

        while recording_progress > real_progress {
            if self.cancelled() {
                return Tick::Cancelled;
            }
            let ahead = Duration::from_nanos(recording_progress - real_progress);
            self.clock.sleep(ahead.min(NOMINAL_FRAME_INTERVAL));
            real_progress = self.clock.now_ns().saturating_sub(self.loop_start);
        }

        let depth = self.load_payload(record, index, BufferKind::Depth);
        let video = self.load_payload(record, index, BufferKind::Video);

        self.camera_rotation = record.camera_rotation;
        self.device.swap_recorded_frame(&RecordedFrame {
            timestamp: self.monotonic_clock,
            pose: self.pose,
            camera_rotation: self.camera_rotation,
            depth: depth.as_ref().map(LoadedBuffer::recorded),
            video: video.as_ref().map(LoadedBuffer::recorded),
        });

        keep_latest(&mut self.last_depth, depth);
        keep_latest(&mut self.last_video, video);

        Tick::Played {
            frame: index,
            timestamp: self.monotonic_clock,
        }
    }

    /// Re-emit the last buffers so consumers keep receiving frames
    fn paused_tick(&mut self) -> Tick {
        let depth = self
            .last_depth
            .as_ref()
            .map(|last| last.copy(&self.device, BufferKind::Depth));
        let video = self
            .last_video
            .as_ref()
            .map(|last| last.copy(&self.device, BufferKind::Video));

        self.monotonic_clock += NOMINAL_FRAME_INTERVAL_NS;
        self.loop_start += NOMINAL_FRAME_INTERVAL_NS;

        self.device.swap_recorded_frame(&RecordedFrame {
            timestamp: self.monotonic_clock,
            pose: self.pose,
            camera_rotation: self.camera_rotation,
            depth: depth.as_ref().map(LoadedBuffer::recorded),
            video: video.as_ref().map(LoadedBuffer::recorded),
        });

        for copy in depth.into_iter().chain(video) {
            copy.buffer.unref();
        }

        self.clock.sleep(NOMINAL_FRAME_INTERVAL);
        Tick::Paused {
            timestamp: self.monotonic_clock,
        }
    }

    /// Read the payload of `kind` recorded in frame `index`
    ///
    /// A frame without the payload yields `None` silently; unusable payloads
    /// are logged and skipped.
    fn load_payload(&self, record: &FrameRecord, index: usize, kind: BufferKind) -> Option<LoadedBuffer> {
        let (file, len) = record.payload(kind)?;

        let intrinsics = self.recording.frame_intrinsics(index, kind);
        if !intrinsics.is_valid() {
            error!(frame = index, kind = %kind, "Recorded frame has no usable intrinsics");
            return None;
        }

        let path = self.recording.payload_path(file);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read recorded {} buffer", kind);
                return None;
            }
        };
        if bytes.len() < len {
            error!(
                path = %path.display(),
                expected = len,
                found = bytes.len(),
                "Recorded {} buffer is truncated",
                kind
            );
            return None;
        }

        let buffer = self.device.acquire_buffer(kind, "recorded buffer");
        if len > buffer.capacity() {
            error!(
                path = %path.display(),
                len,
                capacity = buffer.capacity(),
                "Recorded {} buffer exceeds the device buffer size",
                kind
            );
            buffer.unref();
            return None;
        }
        buffer.fill(&bytes[..len]);

        Some(LoadedBuffer { buffer, intrinsics })
    }
}

impl<C: PlaybackClock> Drop for PlaybackEngine<C> {
    fn drop(&mut self) {
        for last in self.last_depth.take().into_iter().chain(self.last_video.take()) {
            last.buffer.unref();
        }
    }
}

fn keep_latest(slot: &mut Option<LoadedBuffer>, loaded: Option<LoadedBuffer>) {
    if let Some(loaded) = loaded {
        if let Some(old) = slot.replace(loaded) {
            old.buffer.unref();
        }
    }
}

/// Frame to jump to when playback has fallen behind
///
/// Scans forward from the frame after `current` until recorded progress
/// reaches `real_progress`. Running off the end of the playable range lands
/// on its last frame. Otherwise, when depth is wanted, the most recent
/// scanned frame carrying depth wins over the scan endpoint, since depth
/// frames are sparser and would keep being skipped.
fn catch_up_frame(
    frames: &[FrameRecord],
    current: usize,
    n_frames: usize,
    real_progress: u64,
    prefer_depth: bool,
) -> usize {
    let frame0 = frames.first().map_or(0, |f| f.timestamp);
    let progress = |i: usize| frames[i].timestamp.saturating_sub(frame0);

    let mut recording_progress = progress(current);
    let mut last_depth = None;
    let mut scanned = current;
    let mut i = current + 1;
    while i < n_frames && recording_progress < real_progress {
        recording_progress = progress(i);
        if prefer_depth && frames[i].has_depth() {
            last_depth = Some(i);
        }
        scanned = i;
        i += 1;
    }

    if i >= n_frames {
        return n_frames - 1;
    }
    match last_depth {
        Some(depth) if depth != scanned => depth,
        _ => scanned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::playback::clock::ManualClock;
    use crate::recording::RecordingMetadata;
    use crate::types::BuffersMask;
    use std::path::PathBuf;

    const MS: u64 = 1_000_000;

    fn record(timestamp: u64, depth: bool) -> FrameRecord {
        FrameRecord {
            timestamp,
            depth_file: depth.then(|| "/depth/missing.bin".to_string()),
            depth_len: depth.then_some(8),
            ..Default::default()
        }
    }

    fn frames_every_33ms(n: usize) -> Vec<FrameRecord> {
        (0..n).map(|i| record(1_000 * MS + i as u64 * 33 * MS, i % 5 == 0)).collect()
    }

    fn engine_for(frames: Vec<FrameRecord>) -> (PlaybackEngine<ManualClock>, ManualClock) {
        let metadata = RecordingMetadata {
            depth_intrinsics: None,
            video_intrinsics: None,
            max_depth_pixels: 4,
            max_video_pixels: 4,
            depth_to_video_extrinsics: Default::default(),
            depth_format: Default::default(),
            video_format: Default::default(),
            frames,
        };
        let recording = Arc::new(Recording::from_metadata(PathBuf::from("/nonexistent"), metadata).unwrap());
        let device = Arc::new(SwapEngine::new(crate::types::DeviceType::Recording, &recording.stream_setup()));
        let clock = ManualClock::new();
        let engine = PlaybackEngine::new(recording, device, Arc::new(PlaybackControls::new()), clock.clone());
        (engine, clock)
    }

    #[test]
    fn test_catch_up_prefers_recent_depth_frame() {
        let frames = frames_every_33ms(12);
        // Frame 9 reaches 297 ms; frame 5 is the latest depth frame scanned
        assert_eq!(catch_up_frame(&frames, 1, 12, 280 * MS, true), 5);
        assert_eq!(catch_up_frame(&frames, 1, 12, 280 * MS, false), 9);
    }

    #[test]
    fn test_catch_up_keeps_endpoint_when_it_has_depth() {
        let frames = frames_every_33ms(12);
        // Frame 10 reaches 330 ms and carries depth itself
        assert_eq!(catch_up_frame(&frames, 1, 12, 320 * MS, true), 10);
    }

    #[test]
    fn test_catch_up_clamps_to_range_end() {
        let frames = frames_every_33ms(12);
        assert_eq!(catch_up_frame(&frames, 1, 12, 10_000 * MS, true), 11);
        assert_eq!(catch_up_frame(&frames, 1, 8, 10_000 * MS, true), 7);
    }

    #[test]
    fn test_timestamps_stay_monotonic_across_loops() {
        let (mut engine, _clock) = engine_for(frames_every_33ms(3));
        let mut last = None;
        let mut played = Vec::new();
        for _ in 0..7 {
            match engine.tick() {
                Tick::Played { frame, timestamp } => {
                    if let Some(last) = last {
                        assert!(timestamp > last, "{} after {}", timestamp, last);
                    }
                    last = Some(timestamp);
                    played.push(frame);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(played, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_loop_wrap_costs_one_frame_interval() {
        let (mut engine, _clock) = engine_for(frames_every_33ms(2));
        let Tick::Played { timestamp: first, .. } = engine.tick() else {
            panic!("expected a played frame");
        };
        let Tick::Played { timestamp: second, .. } = engine.tick() else {
            panic!("expected a played frame");
        };
        let Tick::Played { frame, timestamp: wrapped } = engine.tick() else {
            panic!("expected a played frame");
        };
        assert_eq!(second - first, 33 * MS);
        assert_eq!(frame, 0);
        assert_eq!(wrapped - second, NOMINAL_FRAME_INTERVAL_NS);
    }

    #[test]
    fn test_backwards_timestamp_uses_nominal_interval() {
        let (mut engine, _clock) = engine_for(vec![record(100 * MS, false), record(50 * MS, false)]);
        let Tick::Played { timestamp: first, .. } = engine.tick() else {
            panic!("expected a played frame");
        };
        let Tick::Played { timestamp: second, .. } = engine.tick() else {
            panic!("expected a played frame");
        };
        assert_eq!(second - first, NOMINAL_FRAME_INTERVAL_NS);
    }

    #[test]
    fn test_throttle_waits_for_recorded_time() {
        let (mut engine, clock) = engine_for(frames_every_33ms(3));
        engine.tick();
        engine.tick();
        assert!(clock.now_ns() >= 33 * MS);
        assert!(clock.now_ns() < 33 * MS + NOMINAL_FRAME_INTERVAL_NS);
    }

    #[test]
    fn test_paused_at_end_without_looping() {
        let (mut engine, clock) = engine_for(frames_every_33ms(2));
        engine.controls().set_looping(false);
        engine.tick();
        engine.tick();
        let before = clock.now_ns();
        let Tick::Paused { timestamp } = engine.tick() else {
            panic!("expected a paused tick");
        };
        assert_eq!(clock.now_ns() - before, NOMINAL_FRAME_INTERVAL_NS);
        assert!(matches!(engine.tick(), Tick::Paused { timestamp: next } if next == timestamp + NOMINAL_FRAME_INTERVAL_NS));
    }

    #[test]
    fn test_missing_payloads_are_skipped() {
        let (mut engine, _clock) = engine_for(frames_every_33ms(2));
        engine.device.request_frame(BuffersMask::DEPTH);
        assert!(matches!(engine.tick(), Tick::Played { frame: 0, .. }));
        assert!(engine.device.ready_mask().is_empty());
    }

    #[test]
    fn test_cancelled_engine_emits_nothing() {
        let (mut engine, _clock) = engine_for(frames_every_33ms(2));
        engine.cancel_handle().store(true, Ordering::SeqCst);
        assert_eq!(engine.tick(), Tick::Cancelled);
    }
}
