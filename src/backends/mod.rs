// SPDX-License-Identifier: GPL-3.0-only

//! Capture backends behind a common device interface
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                   Device                     │  ← state machine, consumer API
//! └──────────────────────┬───────────────────────┘
//!                        │
//! ┌──────────────────────┴───────────────────────┐
//! │                 SwapEngine                   │  ← pools, back/ready slots, masks
//! └──────────────────────┬───────────────────────┘
//!                        │ publish / swap_recorded_frame
//! ┌───────────┬──────────┴─────────┬─────────────┐
//! │  Kinect   │  Recording playback│  AR session │
//! │(freedepth)│   (I/O thread)     │ (SDK glue)  │
//! └───────────┴────────────────────┴─────────────┘
//! ```
//!
//! - [`kinect`]: physical depth camera via freedepth (feature `kinect`)
//! - [`playback`]: replays a recording with its original pacing
//! - [`session`]: adapter for AR-SDK camera and pose services

pub mod frame_loop;
#[cfg(all(feature = "kinect", target_arch = "x86_64"))]
pub mod kinect;
pub mod playback;
pub mod session;

use std::sync::Arc;

use crate::device::SwapEngine;
use crate::errors::{DeviceError, DeviceResult};
use crate::types::{DeviceType, Extrinsics, Format, Intrinsics};

pub use playback::PlaybackControls;

/// Stream description reported by a backend when it opens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamSetup {
    pub depth_format: Format,
    pub video_format: Format,
    pub depth_intrinsics: Intrinsics,
    pub video_intrinsics: Intrinsics,
    pub depth_to_video: Extrinsics,
    pub max_depth_pixels: usize,
    pub max_video_pixels: usize,
    /// Capacity of each pooled depth buffer in bytes
    pub depth_buffer_bytes: usize,
    /// Capacity of each pooled video buffer in bytes
    pub video_buffer_bytes: usize,
}

/// Outcome of committing a backend's configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStatus {
    /// Configuration is complete; the device announces readiness now
    Ready,
    /// The backend announces readiness itself once its service connects
    Pending,
}

/// Backend-specific adjustable property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProperty {
    /// Motor tilt in degrees
    Tilt(i32),
}

/// Interface every capture backend implements
///
/// Open and configuration are separate so event callbacks can be installed
/// before a backend connects to hardware or an SDK service.
pub trait DeviceBackend: Send {
    fn device_type(&self) -> DeviceType;

    // ===== Lifecycle =====

    /// Probe the source and describe its streams
    fn open(&mut self) -> DeviceResult<StreamSetup>;

    /// Apply configuration and connect to the source
    fn commit_config(&mut self, _engine: &Arc<SwapEngine>) -> DeviceResult<ConfigStatus> {
        Ok(ConfigStatus::Ready)
    }

    /// Start producing buffers into `engine`
    fn start(&mut self, engine: &Arc<SwapEngine>) -> DeviceResult<()>;

    /// Stop producing; blocks until the capture thread has exited
    fn stop(&mut self);

    /// Release the source
    fn close(&mut self) {}

    // ===== Controls =====

    /// Playback controls of recording backends
    fn playback_controls(&self) -> Option<Arc<PlaybackControls>> {
        None
    }

    fn set_property(&mut self, property: DeviceProperty) -> DeviceResult<()> {
        Err(DeviceError::Property(format!(
            "{:?} is not supported by {} devices",
            property,
            self.device_type()
        )))
    }
}
