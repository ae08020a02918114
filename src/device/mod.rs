// SPDX-License-Identifier: GPL-3.0-only

//! Capture device: lifecycle state machine over a backend and its swap engine
//!
//! A device is opened, configured once, then started and stopped any number
//! of times. Consumers request buffer kinds, wait for a
//! [`DeviceEvent::FrameReady`] and claim the data with
//! [`Device::get_latest_frame`].

pub mod engine;
pub mod events;
pub mod request;

use std::fmt;
use std::sync::Arc;

use tracing::{error, info};

use crate::backends::playback::RecordingBackend;
use crate::backends::{ConfigStatus, DeviceBackend, DeviceProperty, PlaybackControls, StreamSetup};
use crate::config::DeviceConfig;
use crate::errors::{DeviceError, DeviceResult};
use crate::memory::Frame;
use crate::types::{BufferKind, BuffersMask, DeviceType, Extrinsics, Format, Intrinsics, Rotation};

pub use engine::{Capture, LeakReport, RecordedBuffer, RecordedFrame, SwapEngine};
pub use events::{DeviceEvent, EventCallback, EventQueue};
pub use request::{FrameRequestSink, FrameRequester};

/// Lifecycle state of a [`Device`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Opened,
    Configured,
    Running,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Opened => write!(f, "opened"),
            DeviceState::Configured => write!(f, "configured"),
            DeviceState::Running => write!(f, "running"),
        }
    }
}

pub struct Device {
    state: DeviceState,
    setup: StreamSetup,
    engine: Arc<SwapEngine>,
    backend: Box<dyn DeviceBackend>,
    closed: bool,
}

impl Device {
    /// Open the device described by `config`
    ///
    /// AR sessions need SDK glue and are opened with
    /// [`Device::open_with_backend`].
    pub fn open(config: &DeviceConfig) -> DeviceResult<Self> {
        let backend: Box<dyn DeviceBackend> = match config.kind {
            DeviceType::Recording => {
                let path = config
                    .recording_path
                    .clone()
                    .ok_or_else(|| DeviceError::Config("No recording path configured".to_string()))?;
                Box::new(
                    RecordingBackend::new(path)
                        .with_max_frame(config.max_frame)
                        .with_looping(config.loop_playback),
                )
            }
            #[cfg(all(feature = "kinect", target_arch = "x86_64"))]
            DeviceType::Kinect => Box::new(crate::backends::kinect::KinectBackend::new(config.kinect_device)),
            #[cfg(not(all(feature = "kinect", target_arch = "x86_64")))]
            DeviceType::Kinect => {
                return Err(DeviceError::OpenFailed(
                    "Built without Kinect support".to_string(),
                ));
            }
            DeviceType::Session => {
                return Err(DeviceError::OpenFailed(
                    "AR session devices need an ArSession backend".to_string(),
                ));
            }
        };
        Self::open_with_backend(backend)
    }

    /// Open a device around an already constructed backend
    pub fn open_with_backend(mut backend: Box<dyn DeviceBackend>) -> DeviceResult<Self> {
        let device_type = backend.device_type();
        let setup = backend.open()?;
        let engine = Arc::new(SwapEngine::new(device_type, &setup));
        info!(
            device = %device_type,
            depth_format = %setup.depth_format,
            video_format = %setup.video_format,
            "Device opened"
        );
        Ok(Self {
            state: DeviceState::Opened,
            setup,
            engine,
            backend,
            closed: false,
        })
    }

    fn require(&self, expected: DeviceState, operation: &'static str) -> DeviceResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(DeviceError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Install the event callback, replacing any previous one
    ///
    /// See [`EventCallback`] for the restrictions on what it may do.
    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(DeviceEvent) + Send + Sync + 'static,
    {
        self.engine.set_event_callback(Some(Box::new(callback)));
    }

    pub fn clear_event_callback(&self) {
        self.engine.set_event_callback(None);
    }

    // ===== Lifecycle =====

    /// Apply configuration; fires [`DeviceEvent::Ready`] now or, for
    /// backends that connect asynchronously, once they connect
    pub fn commit_config(&mut self) -> DeviceResult<()> {
        self.require(DeviceState::Opened, "configure")?;
        let status = self.backend.commit_config(&self.engine)?;
        self.state = DeviceState::Configured;
        info!(device = %self.device_type(), ?status, "Device configured");
        if status == ConfigStatus::Ready {
            self.engine.notify_ready();
        }
        Ok(())
    }

    pub fn start(&mut self) -> DeviceResult<()> {
        self.require(DeviceState::Configured, "start")?;
        self.engine.set_running(true);
        if let Err(e) = self.backend.start(&self.engine) {
            self.engine.set_running(false);
            return Err(e);
        }
        self.state = DeviceState::Running;
        info!(device = %self.device_type(), "Device started");
        Ok(())
    }

    pub fn stop(&mut self) -> DeviceResult<()> {
        self.require(DeviceState::Running, "stop")?;
        self.engine.set_running(false);
        self.backend.stop();
        self.state = DeviceState::Configured;
        info!(device = %self.device_type(), "Device stopped");
        Ok(())
    }

    /// Stop and close the device, reporting frames and buffers still
    /// referenced by the caller
    pub fn close(mut self) -> LeakReport {
        self.shutdown()
    }

    fn shutdown(&mut self) -> LeakReport {
        if self.closed {
            return LeakReport::default();
        }
        self.closed = true;

        if self.state == DeviceState::Running {
            self.engine.set_running(false);
            self.backend.stop();
        }
        self.backend.close();

        let report = self.engine.shutdown();
        if report.is_clean() {
            info!(device = %self.device_type(), "Device closed");
        } else {
            error!(
                device = %self.device_type(),
                frames = report.frames,
                depth_buffers = report.depth_buffers,
                video_buffers = report.video_buffers,
                "Device closed with outstanding references"
            );
        }
        report
    }

    // ===== Consumer API =====

    /// Ask for buffers of the kinds in `buffers_mask`
    pub fn request_frame(&self, buffers_mask: BuffersMask) {
        self.engine.request_frame(buffers_mask);
    }

    /// Claim the ready buffers into a frame; the caller must `unref` it
    pub fn get_latest_frame(&self) -> Frame {
        self.engine.get_latest_frame()
    }

    /// See [`SwapEngine::combine_frames`]
    pub fn combine_frames(&self, master: &Frame, depth_src: &Frame, video_src: &Frame) -> Frame {
        self.engine.combine_frames(master, depth_src, video_src)
    }

    // ===== Properties =====

    pub fn device_type(&self) -> DeviceType {
        self.engine.device_type()
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Streams the backend reported when it opened
    pub fn stream_setup(&self) -> &StreamSetup {
        &self.setup
    }

    pub fn engine(&self) -> &Arc<SwapEngine> {
        &self.engine
    }

    pub fn depth_intrinsics(&self) -> Intrinsics {
        self.engine.intrinsics(BufferKind::Depth)
    }

    pub fn video_intrinsics(&self) -> Intrinsics {
        self.engine.intrinsics(BufferKind::Video)
    }

    pub fn depth_to_video_extrinsics(&self) -> Extrinsics {
        self.engine.depth_to_video_extrinsics()
    }

    pub fn depth_format(&self) -> Format {
        self.engine.format(BufferKind::Depth)
    }

    pub fn video_format(&self) -> Format {
        self.engine.format(BufferKind::Video)
    }

    pub fn max_depth_pixels(&self) -> usize {
        self.engine.max_pixels(BufferKind::Depth)
    }

    pub fn max_video_pixels(&self) -> usize {
        self.engine.max_pixels(BufferKind::Video)
    }

    pub fn camera_rotation(&self) -> Rotation {
        self.engine.camera_rotation()
    }

    pub fn ready_mask(&self) -> BuffersMask {
        self.engine.ready_mask()
    }

    pub fn request_mask(&self) -> BuffersMask {
        self.engine.request_mask()
    }

    /// Pause/loop/step controls; only recording devices have them
    pub fn playback_controls(&self) -> Option<Arc<PlaybackControls>> {
        self.backend.playback_controls()
    }

    pub fn set_property(&mut self, property: DeviceProperty) -> DeviceResult<()> {
        self.backend.set_property(property)
    }
}

impl FrameRequestSink for Device {
    fn request_frame(&self, buffers_mask: BuffersMask) {
        Device::request_frame(self, buffers_mask);
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown();
    }
}
