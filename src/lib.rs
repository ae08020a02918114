// SPDX-License-Identifier: GPL-3.0-only

//! depthcap - depth and video capture devices with recording playback
//!
//! Capture sources (a Kinect, a recorded session, an AR-SDK session) sit
//! behind one producer/consumer frame protocol: producers swap filled buffers
//! in, consumers request buffer kinds and claim them as reference-counted
//! frames.
//!
//! # Architecture
//!
//! - [`memory`]: resource pools and ref-counted buffers and frames
//! - [`device`]: device state machine, swap engine and events
//! - [`backends`]: Kinect, recording playback and AR session backends
//! - [`recording`]: on-disk recording format, writer and index
//! - [`config`]: user configuration handling
//!
//! # Example
//!
//! ```ignore
//! use depthcap::{BuffersMask, Device, DeviceEvent, EventQueue};
//!
//! let mut device = Device::open(&config.device)?;
//! let events = EventQueue::new();
//! device.set_event_callback(events.callback());
//! device.commit_config()?;
//! device.start()?;
//! device.request_frame(BuffersMask::ALL);
//! if let Some(DeviceEvent::FrameReady { .. }) = events.wait_timeout(timeout) {
//!     let frame = device.get_latest_frame();
//!     frame.unref();
//! }
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod device;
pub mod errors;
pub mod memory;
pub mod recording;
pub mod types;

// Re-export commonly used types
pub use backends::PlaybackControls;
pub use config::Config;
pub use device::{Device, DeviceEvent, DeviceState, EventQueue, FrameRequester, LeakReport};
pub use errors::{DeviceError, DeviceResult};
pub use memory::{Buffer, Frame};
pub use types::{BufferKind, BuffersMask, DeviceType, Format, Intrinsics, Pose, Rotation};
