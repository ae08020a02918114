// SPDX-License-Identifier: GPL-3.0-only

//! Recording playback backend
//!
//! Replays a recording made by [`crate::recording::RecordingWriter`] on a
//! dedicated I/O thread, honouring the recorded frame timing.

pub mod clock;
pub mod controls;
pub mod engine;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use super::frame_loop::{CaptureLoopController, LoopAction};
use super::{DeviceBackend, StreamSetup};
use crate::device::SwapEngine;
use crate::errors::{DeviceError, DeviceResult};
use crate::recording::Recording;
use crate::types::DeviceType;

pub use clock::{ManualClock, PlaybackClock, SystemClock};
pub use controls::{PlaybackControls, PlaybackCursor};
pub use engine::{PlaybackEngine, Tick};

/// Backend replaying a recording directory
pub struct RecordingBackend {
    path: PathBuf,
    recording: Option<Arc<Recording>>,
    controls: Arc<PlaybackControls>,
    io_loop: Option<CaptureLoopController>,
    cancel: Option<Arc<AtomicBool>>,
}

impl RecordingBackend {
    /// Backend for the recording at `path`, a directory or its metadata file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recording: None,
            controls: Arc::new(PlaybackControls::new()),
            io_loop: None,
            cancel: None,
        }
    }

    /// Limit playback to the frames up to and including `max_frame`
    pub fn with_max_frame(self, max_frame: Option<usize>) -> Self {
        self.controls.set_max_frame(max_frame);
        self
    }

    pub fn with_looping(self, looping: bool) -> Self {
        self.controls.set_looping(looping);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The loaded recording, once opened
    pub fn recording(&self) -> Option<&Arc<Recording>> {
        self.recording.as_ref()
    }
}

impl DeviceBackend for RecordingBackend {
    fn device_type(&self) -> DeviceType {
        DeviceType::Recording
    }

    fn open(&mut self) -> DeviceResult<StreamSetup> {
        let recording = Recording::load(&self.path).map_err(|e| match e {
            DeviceError::Recording(msg) => DeviceError::OpenFailed(msg),
            other => other,
        })?;
        let setup = recording.stream_setup();
        info!(
            path = %self.path.display(),
            frames = recording.frame_count(),
            duration_ms = recording.duration_ns() / 1_000_000,
            "Opened recording"
        );
        self.recording = Some(Arc::new(recording));
        Ok(setup)
    }

    fn start(&mut self, engine: &Arc<SwapEngine>) -> DeviceResult<()> {
        let recording = self
            .recording
            .as_ref()
            .ok_or_else(|| DeviceError::StartFailed("Recording is not open".to_string()))?;

        self.controls.set_frame(0);
        self.controls.set_running(true);

        let mut playback = PlaybackEngine::new(
            Arc::clone(recording),
            Arc::clone(engine),
            Arc::clone(&self.controls),
            SystemClock::new(),
        );
        let cancel = playback.cancel_handle();

        let io_loop = CaptureLoopController::start("recording-io", move || match playback.tick() {
            Tick::Cancelled => LoopAction::Stop,
            _ => LoopAction::Continue,
        });
        let io_loop = match io_loop {
            Ok(io_loop) => io_loop,
            Err(e) => {
                self.controls.set_running(false);
                return Err(e);
            }
        };

        self.cancel = Some(cancel);
        self.io_loop = Some(io_loop);
        Ok(())
    }

    fn stop(&mut self) {
        self.controls.set_running(false);
        if let Some(cancel) = self.cancel.take() {
            cancel.store(true, Ordering::SeqCst);
        }
        if let Some(mut io_loop) = self.io_loop.take() {
            io_loop.stop();
        }
        debug!(path = %self.path.display(), "Recording playback stopped");
    }

    fn close(&mut self) {
        self.recording = None;
    }

    fn playback_controls(&self) -> Option<Arc<PlaybackControls>> {
        Some(Arc::clone(&self.controls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_recording_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = RecordingBackend::new(dir.path().join("absent"));
        assert!(matches!(backend.open(), Err(DeviceError::OpenFailed(_))));
    }

    #[test]
    fn test_start_before_open_fails() {
        let mut backend = RecordingBackend::new("/nonexistent");
        let setup = StreamSetup {
            depth_format: Default::default(),
            video_format: Default::default(),
            depth_intrinsics: Default::default(),
            video_intrinsics: Default::default(),
            depth_to_video: Default::default(),
            max_depth_pixels: 0,
            max_video_pixels: 0,
            depth_buffer_bytes: 0,
            video_buffer_bytes: 0,
        };
        let engine = Arc::new(SwapEngine::new(DeviceType::Recording, &setup));
        assert!(matches!(backend.start(&engine), Err(DeviceError::StartFailed(_))));
        assert!(!backend.controls.is_running());
    }

    #[test]
    fn test_builder_applies_controls() {
        let backend = RecordingBackend::new("/nonexistent")
            .with_max_frame(Some(3))
            .with_looping(false);
        let controls = backend.playback_controls().unwrap();
        assert_eq!(controls.max_frame(), Some(3));
        assert!(!controls.looping());
    }
}
