// SPDX-License-Identifier: GPL-3.0-only

//! Adapter for AR-SDK sessions that deliver depth, camera images and poses
//! through callbacks
//!
//! The SDK glue implements [`ArSession`] and is handed a [`SessionFeed`] when
//! the device configuration is committed. Its callbacks push data through the
//! feed on whatever thread the SDK uses. The session service usually binds
//! asynchronously, so the device only becomes ready once the glue calls
//! [`SessionFeed::connected`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{ConfigStatus, DeviceBackend, StreamSetup};
use crate::device::{Capture, SwapEngine};
use crate::errors::{DeviceError, DeviceResult};
use crate::types::{BufferKind, DeviceType, Extrinsics, Format, Intrinsics, Pose, Rotation};

/// SDK glue driven by [`ArSessionBackend`]
pub trait ArSession: Send {
    /// Bind to the service and route its callbacks into `feed`
    fn connect(&mut self, feed: SessionFeed) -> Result<(), String>;
    fn start(&mut self) -> Result<(), String>;
    fn stop(&mut self);
    fn disconnect(&mut self);
}

/// Camera description of an AR session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// [`Format::PointsXyzcF32M`] for point cloud sessions, [`Format::ZF32M`]
    /// for disparity sessions
    pub depth_format: Format,
    pub depth_intrinsics: Intrinsics,
    pub video_intrinsics: Intrinsics,
    pub depth_to_video: Extrinsics,
    /// Most depth points or pixels delivered at once
    pub max_depth_points: usize,
    /// Rotation of the camera relative to the display's natural orientation
    pub display_to_camera: Rotation,
}

impl SessionConfig {
    fn stream_setup(&self) -> StreamSetup {
        let max_video_pixels = self.video_intrinsics.pixel_count();
        StreamSetup {
            depth_format: self.depth_format,
            video_format: Format::LuminanceU8,
            depth_intrinsics: self.depth_intrinsics,
            video_intrinsics: self.video_intrinsics,
            depth_to_video: self.depth_to_video,
            max_depth_pixels: self.max_depth_points,
            max_video_pixels,
            depth_buffer_bytes: self.max_depth_points * self.depth_format.bytes_per_pixel(),
            video_buffer_bytes: max_video_pixels * Format::LuminanceU8.bytes_per_pixel(),
        }
    }
}

/// Entry points for SDK callbacks
///
/// Cheap to clone; every clone feeds the same device.
#[derive(Clone)]
pub struct SessionFeed {
    engine: Arc<SwapEngine>,
    config: SessionConfig,
}

impl SessionFeed {
    fn new(engine: Arc<SwapEngine>, config: SessionConfig) -> Self {
        Self { engine, config }
    }

    /// The service is bound; announces the device as ready
    pub fn connected(&self) {
        info!("AR session connected");
        self.engine.notify_ready();
    }

    /// Deliver a point cloud of x, y, z, confidence values
    ///
    /// Returns whether the points were published. `pose` is the camera pose
    /// at `timestamp`, when the SDK could provide one.
    ///
    /// # Panics
    ///
    /// Panics if the cloud has more points than the session declared.
    pub fn point_cloud(&self, points: &[[f32; 4]], timestamp: u64, pose: Option<Pose>) -> bool {
        let mut capture = Capture::at(timestamp);
        if let Some(pose) = pose {
            capture = capture.with_pose(pose);
        } else {
            debug!(timestamp, "Point cloud without a valid pose");
        }

        let max_points = self.config.max_depth_points;
        self.engine.publish(BufferKind::Depth, capture, |buffer| {
            assert!(
                points.len() <= max_points,
                "Spurious point cloud larger than sensor resolution ({} > max={})",
                points.len(),
                max_points
            );
            buffer.fill(bytemuck::cast_slice(points));
            true
        })
    }

    /// Deliver the luminance plane of a camera image whose rows are `stride`
    /// bytes apart
    pub fn luminance_image(&self, width: usize, height: usize, stride: usize, data: &[u8], timestamp: u64) -> bool {
        let needed = match height {
            0 => Some(0),
            rows => stride.checked_mul(rows - 1).and_then(|n| n.checked_add(width)),
        };
        let consistent = width > 0 && stride >= width && needed.is_some_and(|needed| data.len() >= needed);
        if !consistent {
            warn!(
                width,
                height,
                stride,
                len = data.len(),
                "Dropping camera image with inconsistent layout"
            );
            return false;
        }

        self.engine
            .publish(BufferKind::Video, Capture::at(timestamp), |buffer| {
                if width.checked_mul(height).is_none_or(|pixels| pixels > buffer.capacity()) {
                    warn!(width, height, "Camera image larger than the session resolution");
                    return false;
                }
                buffer.write(|bytes| {
                    bytes.clear();
                    for row in data.chunks(stride).take(height) {
                        bytes.extend_from_slice(&row[..width]);
                    }
                });
                true
            })
    }

    /// Deliver a disparity map, stored as depth in metres
    pub fn disparity_image(&self, intrinsics: Intrinsics, disparity: &[f32], timestamp: u64) -> bool {
        if self.config.depth_format != Format::ZF32M {
            warn!(format = %self.config.depth_format, "Disparity delivered to a non-disparity session");
            return false;
        }
        let pixels = intrinsics.pixel_count();
        if disparity.len() < pixels {
            warn!(
                expected = pixels,
                found = disparity.len(),
                "Dropping truncated disparity map"
            );
            return false;
        }

        let capture = Capture::at(timestamp).with_intrinsics(intrinsics);
        self.engine.publish(BufferKind::Depth, capture, |buffer| {
            let depth: Vec<f32> = disparity[..pixels].iter().map(|d| 1.0 / d).collect();
            let bytes: &[u8] = bytemuck::cast_slice(&depth);
            if bytes.len() > buffer.capacity() {
                warn!(pixels, "Disparity map larger than the session resolution");
                return false;
            }
            buffer.fill(bytes);
            true
        })
    }

    /// Track the display orientation; the camera rotation reported with
    /// frames is relative to it
    pub fn set_display_rotation(&self, display_rotation: Rotation) {
        let camera_rotation =
            Rotation::from_degrees((display_rotation.degrees() + self.config.display_to_camera.degrees()) as i32);
        debug!(display = %display_rotation, camera = %camera_rotation, "Display rotation changed");
        self.engine.set_camera_rotation(camera_rotation);
    }
}

/// Backend driving an [`ArSession`]
pub struct ArSessionBackend {
    session: Box<dyn ArSession>,
    config: SessionConfig,
    connected: bool,
}

impl ArSessionBackend {
    pub fn new(session: Box<dyn ArSession>, config: SessionConfig) -> Self {
        Self {
            session,
            config,
            connected: false,
        }
    }
}

impl DeviceBackend for ArSessionBackend {
    fn device_type(&self) -> DeviceType {
        DeviceType::Session
    }

    fn open(&mut self) -> DeviceResult<StreamSetup> {
        if !matches!(self.config.depth_format, Format::PointsXyzcF32M | Format::ZF32M) {
            return Err(DeviceError::OpenFailed(format!(
                "Unsupported session depth format {}",
                self.config.depth_format
            )));
        }
        // Service binding waits for commit_config so an event callback can
        // be installed first
        debug!("AR session device opened");
        Ok(self.config.stream_setup())
    }

    fn commit_config(&mut self, engine: &Arc<SwapEngine>) -> DeviceResult<ConfigStatus> {
        self.session
            .connect(SessionFeed::new(Arc::clone(engine), self.config))
            .map_err(DeviceError::ConfigurationFailed)?;
        self.connected = true;
        Ok(ConfigStatus::Pending)
    }

    fn start(&mut self, _engine: &Arc<SwapEngine>) -> DeviceResult<()> {
        self.session.start().map_err(DeviceError::StartFailed)
    }

    fn stop(&mut self) {
        self.session.stop();
    }

    fn close(&mut self) {
        if self.connected {
            self.session.disconnect();
            self.connected = false;
        }
        debug!("AR session device closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuffersMask;
    use std::sync::Mutex;

    fn config(depth_format: Format) -> SessionConfig {
        let intrinsics = Intrinsics {
            width: 4,
            height: 2,
            fx: 2.0,
            fy: 2.0,
            cx: 2.0,
            cy: 1.0,
            ..Default::default()
        };
        SessionConfig {
            depth_format,
            depth_intrinsics: intrinsics,
            video_intrinsics: intrinsics,
            depth_to_video: Extrinsics::identity(),
            max_depth_points: 8,
            display_to_camera: Rotation::Rotate90,
        }
    }

    #[derive(Default)]
    struct FakeSession {
        feed: Arc<Mutex<Option<SessionFeed>>>,
    }

    impl ArSession for FakeSession {
        fn connect(&mut self, feed: SessionFeed) -> Result<(), String> {
            *self.feed.lock().unwrap() = Some(feed);
            Ok(())
        }

        fn start(&mut self) -> Result<(), String> {
            Ok(())
        }

        fn stop(&mut self) {}

        fn disconnect(&mut self) {
            self.feed.lock().unwrap().take();
        }
    }

    fn connected_feed(depth_format: Format) -> (ArSessionBackend, Arc<SwapEngine>, SessionFeed) {
        let session = FakeSession::default();
        let slot = Arc::clone(&session.feed);
        let mut backend = ArSessionBackend::new(Box::new(session), config(depth_format));
        let setup = backend.open().unwrap();
        let engine = Arc::new(SwapEngine::new(DeviceType::Session, &setup));
        assert_eq!(backend.commit_config(&engine).unwrap(), ConfigStatus::Pending);
        engine.set_running(true);
        let feed = slot.lock().unwrap().clone().unwrap();
        (backend, engine, feed)
    }

    #[test]
    fn test_point_cloud_published_as_bytes() {
        let (_backend, engine, feed) = connected_feed(Format::PointsXyzcF32M);
        engine.request_frame(BuffersMask::DEPTH);
        assert!(feed.point_cloud(&[[1.0, 2.0, 3.0, 0.5]], 42, Some(Pose::default())));

        let frame = engine.get_latest_frame();
        assert_eq!(frame.timestamp(), 42);
        let len = frame.with_depth(|d| d.len()).unwrap();
        assert_eq!(len, 16);
        frame.unref();
    }

    #[test]
    #[should_panic(expected = "Spurious point cloud")]
    fn test_oversized_point_cloud_panics() {
        let (_backend, engine, feed) = connected_feed(Format::PointsXyzcF32M);
        engine.request_frame(BuffersMask::DEPTH);
        feed.point_cloud(&[[0.0; 4]; 9], 1, None);
    }

    #[test]
    fn test_luminance_rows_are_packed() {
        let (_backend, engine, feed) = connected_feed(Format::PointsXyzcF32M);
        engine.request_frame(BuffersMask::VIDEO);
        let data = [1, 2, 3, 4, 0, 0, 5, 6, 7, 8];
        assert!(feed.luminance_image(4, 2, 6, &data, 7));

        let frame = engine.get_latest_frame();
        assert_eq!(frame.with_video(|v| v.to_vec()), Some(vec![1, 2, 3, 4, 5, 6, 7, 8]));
        frame.unref();
    }

    #[test]
    fn test_short_luminance_image_dropped() {
        let (_backend, engine, feed) = connected_feed(Format::PointsXyzcF32M);
        engine.request_frame(BuffersMask::VIDEO);
        assert!(!feed.luminance_image(4, 2, 6, &[0; 9], 7));
        assert!(engine.ready_mask().is_empty());
    }

    #[test]
    fn test_degenerate_luminance_layout_dropped() {
        let (_backend, engine, feed) = connected_feed(Format::PointsXyzcF32M);
        engine.request_frame(BuffersMask::VIDEO);
        assert!(!feed.luminance_image(0, 2, 0, &[0; 8], 7));
        assert!(!feed.luminance_image(4, 3, usize::MAX, &[0; 8], 7));
        assert!(engine.ready_mask().is_empty());
    }

    #[test]
    fn test_disparity_converted_to_depth() {
        let (_backend, engine, feed) = connected_feed(Format::ZF32M);
        engine.request_frame(BuffersMask::DEPTH);
        let disparity = [2.0f32, 4.0, 0.5, 1.0, 2.0, 4.0, 0.5, 1.0];
        assert!(feed.disparity_image(config(Format::ZF32M).depth_intrinsics, &disparity, 3));

        let frame = engine.get_latest_frame();
        let depth: Vec<f32> = frame
            .with_depth(|d| {
                d.chunks_exact(4)
                    .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                    .collect()
            })
            .unwrap();
        assert_eq!(depth, vec![0.5, 0.25, 2.0, 1.0, 0.5, 0.25, 2.0, 1.0]);
        frame.unref();
    }

    #[test]
    fn test_display_rotation_offsets_camera_rotation() {
        let (_backend, engine, feed) = connected_feed(Format::PointsXyzcF32M);
        feed.set_display_rotation(Rotation::Rotate270);
        assert_eq!(engine.camera_rotation(), Rotation::None);
        feed.set_display_rotation(Rotation::Rotate90);
        assert_eq!(engine.camera_rotation(), Rotation::Rotate180);
    }

    #[test]
    fn test_close_disconnects_session() {
        let session = FakeSession::default();
        let slot = Arc::clone(&session.feed);
        let mut backend = ArSessionBackend::new(Box::new(session), config(Format::PointsXyzcF32M));
        let setup = backend.open().unwrap();
        let engine = Arc::new(SwapEngine::new(DeviceType::Session, &setup));
        backend.commit_config(&engine).unwrap();
        assert!(slot.lock().unwrap().is_some());
        backend.close();
        assert!(slot.lock().unwrap().is_none());
    }

    #[test]
    fn test_unsupported_depth_format_rejected() {
        let mut backend = ArSessionBackend::new(Box::new(FakeSession::default()), config(Format::ZU16Mm));
        assert!(matches!(backend.open(), Err(DeviceError::OpenFailed(_))));
    }
}
