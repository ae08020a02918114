// SPDX-License-Identifier: GPL-3.0-only

//! Kinect backend via freedepth
//!
//! freedepth's `KinectStreamer` unbinds the kernel driver and streams over
//! USB directly. Depth arrives as raw 11-bit values and is converted to
//! millimetres with the device-calibrated lookup table; video arrives as
//! Bayer data and is demosaiced to RGB. Both are published from one capture
//! loop thread polling the streamer's channels.
//!
//! Intrinsics are fixed plausible values for the 640x480 modes since the
//! device does not report them. Video shares the depth camera model.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread;

use freedepth::{DepthFormat, DepthFrame, DepthRegistration, DepthToMm, KinectStreamer, Resolution, VideoFormat, VideoFrame};
use tracing::{debug, info, warn};

use super::frame_loop::{CaptureLoopController, LoopAction};
use super::{DeviceBackend, DeviceProperty, StreamSetup};
use crate::constants::kinect::{
    CX, CY, DEPTH_BYTES_PER_PIXEL, FX, FY, HEIGHT, POLL_INTERVAL, TILT_RANGE, VIDEO_BYTES_PER_PIXEL, WIDTH,
};
use crate::device::{Capture, SwapEngine};
use crate::errors::{DeviceError, DeviceResult};
use crate::types::{BufferKind, DeviceType, DistortionModel, Extrinsics, Format, Intrinsics};

/// A connected Kinect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KinectInfo {
    pub index: usize,
    pub name: String,
    pub serial: Option<String>,
}

/// List connected Kinects; enumeration failures yield an empty list
pub fn enumerate_devices() -> Vec<KinectInfo> {
    let devices = match freedepth::enumerate_devices() {
        Ok(devices) => devices,
        Err(e) => {
            debug!("Failed to enumerate Kinect devices: {}", e);
            return Vec::new();
        }
    };

    devices
        .iter()
        .map(|dev| {
            let info = KinectInfo {
                index: dev.index,
                name: dev.name.clone(),
                serial: dev.id.serial.clone(),
            };
            info!(name = %info.name, index = info.index, "Found Kinect via freedepth");
            info
        })
        .collect()
}

fn intrinsics() -> Intrinsics {
    Intrinsics {
        width: WIDTH,
        height: HEIGHT,
        fx: FX,
        fy: FY,
        cx: CX,
        cy: CY,
        distortion_model: DistortionModel::None,
        distortion: [0.0; 5],
    }
}

/// Backend streaming from a physical Kinect
pub struct KinectBackend {
    device_index: usize,
    streamer: Option<KinectStreamer>,
    capture_loop: Option<CaptureLoopController>,
}

impl KinectBackend {
    pub fn new(device_index: usize) -> Self {
        Self {
            device_index,
            streamer: None,
            capture_loop: None,
        }
    }

    fn set_tilt(&self, degrees: i32) -> DeviceResult<()> {
        if !TILT_RANGE.contains(&degrees) {
            return Err(DeviceError::Property(format!(
                "Tilt {} outside {}..={} degrees",
                degrees,
                TILT_RANGE.start(),
                TILT_RANGE.end()
            )));
        }
        let streamer = self
            .streamer
            .as_ref()
            .ok_or_else(|| DeviceError::Property("Kinect is not streaming".to_string()))?;
        streamer
            .set_tilt(degrees as i8)
            .map_err(|e| DeviceError::Property(format!("Failed to set tilt: {}", e)))
    }
}

impl DeviceBackend for KinectBackend {
    fn device_type(&self) -> DeviceType {
        DeviceType::Kinect
    }

    fn open(&mut self) -> DeviceResult<StreamSetup> {
        let devices = enumerate_devices();
        if self.device_index >= devices.len() {
            return Err(DeviceError::NotFound(format!(
                "Kinect {} not found ({} connected)",
                self.device_index,
                devices.len()
            )));
        }

        let pixels = (WIDTH * HEIGHT) as usize;
        Ok(StreamSetup {
            depth_format: Format::ZU16Mm,
            video_format: Format::RgbU8,
            depth_intrinsics: intrinsics(),
            video_intrinsics: intrinsics(),
            depth_to_video: Extrinsics::identity(),
            max_depth_pixels: pixels,
            max_video_pixels: pixels,
            depth_buffer_bytes: pixels * DEPTH_BYTES_PER_PIXEL,
            video_buffer_bytes: pixels * VIDEO_BYTES_PER_PIXEL,
        })
    }

    fn start(&mut self, engine: &Arc<SwapEngine>) -> DeviceResult<()> {
        info!(device = self.device_index, "Starting Kinect streaming");

        let mut streamer = KinectStreamer::new(self.device_index)
            .map_err(|e| DeviceError::StartFailed(format!("Failed to create Kinect streamer: {}", e)))?;
        let (video_rx, depth_rx) = streamer
            .start(VideoFormat::Bayer, Resolution::Medium, DepthFormat::Depth11Bit)
            .map_err(|e| DeviceError::StartFailed(format!("Failed to start streaming: {}", e)))?;

        let registration = streamer.create_depth_registration();
        let converter = registration.depth_to_mm().clone();
        info!(
            target_offset = registration.target_offset(),
            "Fetched Kinect depth registration"
        );

        self.streamer = Some(streamer);

        let engine = Arc::clone(engine);
        let capture_loop = CaptureLoopController::start("kinect-capture", move || {
            poll_streams(&engine, &video_rx, &depth_rx, &converter)
        });
        match capture_loop {
            Ok(capture_loop) => {
                self.capture_loop = Some(capture_loop);
                Ok(())
            }
            Err(e) => {
                self.stop();
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        if let Some(mut capture_loop) = self.capture_loop.take() {
            capture_loop.stop();
        }
        if let Some(mut streamer) = self.streamer.take() {
            streamer.stop();
            if let Err(e) = streamer.rebind_driver() {
                warn!("Failed to rebind kernel driver: {}", e);
            }
            info!(device = self.device_index, "Kinect streaming stopped");
        }
    }

    fn close(&mut self) {
        self.stop();
    }

    fn set_property(&mut self, property: DeviceProperty) -> DeviceResult<()> {
        match property {
            DeviceProperty::Tilt(degrees) => self.set_tilt(degrees),
        }
    }
}

impl Drop for KinectBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One capture loop iteration: publish whatever frames are pending
fn poll_streams(
    engine: &SwapEngine,
    video_rx: &Receiver<VideoFrame>,
    depth_rx: &Receiver<DepthFrame>,
    converter: &DepthToMm,
) -> LoopAction {
    let mut idle = true;

    match video_rx.try_recv() {
        Ok(frame) => {
            idle = false;
            publish_video(engine, &frame);
        }
        Err(TryRecvError::Empty) => {}
        Err(TryRecvError::Disconnected) => {
            debug!("Kinect video channel disconnected");
            return LoopAction::Stop;
        }
    }

    match depth_rx.try_recv() {
        Ok(frame) => {
            idle = false;
            publish_depth(engine, &frame, converter);
        }
        Err(TryRecvError::Empty) => {}
        Err(TryRecvError::Disconnected) => {
            debug!("Kinect depth channel disconnected");
            return LoopAction::Stop;
        }
    }

    if idle {
        thread::sleep(POLL_INTERVAL);
    }
    LoopAction::Continue
}

fn publish_depth(engine: &SwapEngine, frame: &DepthFrame, converter: &DepthToMm) {
    let Some(raw) = frame.as_u16() else {
        warn!("Kinect depth frame is not 16-bit aligned");
        return;
    };

    engine.publish(BufferKind::Depth, Capture::at(engine.now_ns()), |buffer| {
        let mut depth_mm = vec![0u16; raw.len()];
        converter.convert_frame(raw, &mut depth_mm);
        let bytes: &[u8] = bytemuck::cast_slice(&depth_mm);
        if bytes.len() > buffer.capacity() {
            warn!(len = bytes.len(), "Unexpected Kinect depth frame size");
            return false;
        }
        buffer.fill(bytes);
        true
    });
}

fn publish_video(engine: &SwapEngine, frame: &VideoFrame) {
    if !matches!(frame.format, VideoFormat::Rgb | VideoFormat::Bayer) {
        warn!(format = ?frame.format, "Unexpected Kinect video format");
        return;
    }

    engine.publish(BufferKind::Video, Capture::at(engine.now_ns()), |buffer| {
        let pixels = (frame.width * frame.height) as usize;
        if pixels * VIDEO_BYTES_PER_PIXEL > buffer.capacity() {
            warn!(width = frame.width, height = frame.height, "Unexpected Kinect video frame size");
            return false;
        }
        buffer.write(|rgb| {
            rgb.clear();
            rgb.resize(pixels * VIDEO_BYTES_PER_PIXEL, 0);
            freedepth::convert_bayer_to_rgb(&frame.data, rgb, frame.width, frame.height);
        });
        true
    });
}
