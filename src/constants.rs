// SPDX-License-Identifier: GPL-3.0-only

//! Crate-wide constants

use std::time::Duration;

/// Version string embedded at build time
pub fn app_version() -> &'static str {
    env!("GIT_VERSION")
}

/// Default log filter when neither `RUST_LOG` nor the config sets one
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Name of the recordings folder under the user's video directory
pub const RECORDINGS_DIR_NAME: &str = "depthcap";

/// Frame envelopes and buffers a device may hand out at once
pub const MAX_POOL_RESOURCES: usize = usize::MAX;

/// Playback timing
pub mod playback {
    use super::Duration;

    /// Frame interval used while paused and for broken timestamps
    pub const NOMINAL_FRAME_INTERVAL: Duration = Duration::from_millis(16);
    pub const NOMINAL_FRAME_INTERVAL_NS: u64 = 16_000_000;

    /// How far playback may fall behind real time before skipping frames
    pub const CATCH_UP_THRESHOLD_NS: u64 = 33_333_333;

    /// Buffer sizing for recorded payloads, in bytes per pixel of the
    /// recording's maximum resolution
    pub const DEPTH_BYTES_PER_MAX_PIXEL: usize = 16;
    pub const VIDEO_BYTES_PER_MAX_PIXEL: usize = 4;
}

/// Recording layout on disk
pub mod recording {
    /// Metadata document at the root of every recording
    pub const METADATA_FILE: &str = "recording.json";
    /// Metadata name written by older capture tools, still accepted on load
    pub const LEGACY_METADATA_FILE: &str = "glimpse_recording.json";
    pub const DEPTH_DIR: &str = "depth";
    pub const VIDEO_DIR: &str = "video";
}

/// Kinect depth camera defaults (640x480 depth and video)
pub mod kinect {
    use std::ops::RangeInclusive;

    pub const WIDTH: u32 = 640;
    pub const HEIGHT: u32 = 480;

    /// Focal length and principal point from a factory calibration
    pub const FX: f64 = 594.21434211923247;
    pub const FY: f64 = 591.04053696870778;
    pub const CX: f64 = 339.30780975300314;
    pub const CY: f64 = 242.73913761751615;

    /// Bytes per depth pixel (16-bit millimetres)
    pub const DEPTH_BYTES_PER_PIXEL: usize = 2;
    /// Bytes per video pixel (demosaiced RGB)
    pub const VIDEO_BYTES_PER_PIXEL: usize = 3;

    /// Motor tilt limits in degrees
    pub const TILT_RANGE: RangeInclusive<i32> = -27..=27;

    /// Poll interval of the capture loop when no frame is pending
    pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_micros(100);
}
