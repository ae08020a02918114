// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for devices replaying recordings from disk

mod common;

use common::{DEPTH_LEN, depth_payload, video_payload, write_recording};
use depthcap::config::DeviceConfig;
use depthcap::device::{Device, DeviceEvent, DeviceState, EventQueue, FrameRequester};
use depthcap::types::{BuffersMask, DeviceType, Format};
use depthcap::DeviceError;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn recording_config(path: &Path, looping: bool) -> DeviceConfig {
    DeviceConfig {
        kind: DeviceType::Recording,
        recording_path: Some(path.to_path_buf()),
        loop_playback: looping,
        ..Default::default()
    }
}

fn open_started(path: &Path, looping: bool) -> (Device, Arc<EventQueue>) {
    open_started_requesting(path, looping, BuffersMask::NONE)
}

/// Open and start a device, requesting `initial` before playback begins
fn open_started_requesting(path: &Path, looping: bool, initial: BuffersMask) -> (Device, Arc<EventQueue>) {
    let mut device = Device::open(&recording_config(path, looping)).unwrap();
    let events = EventQueue::new();
    device.set_event_callback(events.callback());
    device.commit_config().unwrap();
    assert_eq!(events.drain(), vec![DeviceEvent::Ready]);
    device.request_frame(initial);
    device.start().unwrap();
    (device, events)
}

fn wait_frame_ready(events: &EventQueue) -> BuffersMask {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if let Some(DeviceEvent::FrameReady { buffers_mask }) = events.wait_timeout(TIMEOUT) {
            return buffers_mask;
        }
    }
    panic!("no frame-ready event within {:?}", TIMEOUT);
}

#[test]
fn test_open_reports_recorded_streams() {
    let dir = write_recording(4, 5, 1);
    let device = Device::open(&recording_config(dir.path(), true)).unwrap();

    assert_eq!(device.device_type(), DeviceType::Recording);
    assert_eq!(device.state(), DeviceState::Opened);
    assert_eq!(device.depth_format(), Format::ZU16Mm);
    assert_eq!(device.video_format(), Format::RgbU8);
    assert_eq!(device.depth_intrinsics().width, 2);
    assert_eq!(device.max_depth_pixels(), 4);
    assert!(device.playback_controls().is_some());

    assert!(device.close().is_clean());
}

#[test]
fn test_open_missing_recording_fails() {
    let dir = tempfile::tempdir().unwrap();
    let result = Device::open(&recording_config(&dir.path().join("nope"), true));
    assert!(matches!(result, Err(DeviceError::OpenFailed(_))));
}

#[test]
fn test_first_frame_is_delivered_whole() {
    let dir = write_recording(6, 5, 1);
    let (mut device, events) = open_started_requesting(dir.path(), true, BuffersMask::ALL);

    let ready = wait_frame_ready(&events);
    assert_eq!(ready, BuffersMask::ALL);

    let frame = device.get_latest_frame();
    assert_eq!(frame.ref_count(), 2);
    assert_eq!(frame.with_depth(|bytes| bytes.to_vec()), Some(depth_payload(0)));
    assert_eq!(frame.with_video(|bytes| bytes.to_vec()), Some(video_payload(0)));
    assert_eq!(frame.depth_format(), Format::ZU16Mm);
    assert_eq!(frame.video_intrinsics().height, 2);
    frame.unref();

    device.stop().unwrap();
    assert_eq!(device.state(), DeviceState::Configured);
    assert!(device.close().is_clean());
}

#[test]
fn test_partial_request_clears_ready_mask() {
    let dir = write_recording(6, 5, 1);
    let (device, events) = open_started(dir.path(), true);

    device.request_frame(BuffersMask::DEPTH);
    assert_eq!(wait_frame_ready(&events), BuffersMask::DEPTH);

    let frame = device.get_latest_frame();
    assert_eq!(frame.ref_count(), 2);
    assert!(frame.has_depth());
    assert!(!frame.has_video());
    assert_eq!(frame.with_depth(|bytes| bytes.len()), Some(DEPTH_LEN));
    // Nothing is requested any more, so playback installs nothing new
    assert!(device.ready_mask().is_empty());
    assert!(device.request_mask().is_empty());
    frame.unref();

    assert!(device.close().is_clean());
}

#[test]
fn test_timestamps_increase_across_loops() {
    let dir = write_recording(3, 2, 1);
    let (device, events) = open_started(dir.path(), true);

    let mut requester = FrameRequester::new();
    let mut previous = None;
    for _ in 0..8 {
        requester.request(&device, BuffersMask::DEPTH);
        let ready = wait_frame_ready(&events);
        requester.satisfied(ready);

        let frame = device.get_latest_frame();
        let timestamp = frame.timestamp();
        frame.unref();
        if let Some(previous) = previous {
            assert!(timestamp > previous, "{} after {}", timestamp, previous);
        }
        previous = Some(timestamp);
    }

    assert!(device.close().is_clean());
}

#[test]
fn test_timestamps_increase_across_restart() {
    let dir = write_recording(3, 2, 1);
    let (mut device, events) = open_started(dir.path(), true);

    device.request_frame(BuffersMask::DEPTH);
    wait_frame_ready(&events);
    let frame = device.get_latest_frame();
    let before_stop = frame.timestamp();
    frame.unref();

    device.stop().unwrap();
    events.drain();
    device.start().unwrap();

    device.request_frame(BuffersMask::DEPTH);
    wait_frame_ready(&events);
    let frame = device.get_latest_frame();
    assert!(
        frame.timestamp() > before_stop,
        "{} after restart, {} before",
        frame.timestamp(),
        before_stop
    );
    frame.unref();

    assert!(device.close().is_clean());
}

#[test]
fn test_playback_without_looping_pauses_on_last_frame() {
    let dir = write_recording(3, 1, 1);
    let (device, events) = open_started(dir.path(), false);
    let controls = device.playback_controls().unwrap();

    let deadline = Instant::now() + TIMEOUT;
    while controls.frame() < 2 {
        assert!(Instant::now() < deadline, "playback never reached the last frame");
        std::thread::sleep(Duration::from_millis(5));
    }

    let mut timestamps = Vec::new();
    for _ in 0..2 {
        device.request_frame(BuffersMask::DEPTH);
        wait_frame_ready(&events);
        let frame = device.get_latest_frame();
        assert_eq!(frame.with_depth(|bytes| bytes.to_vec()), Some(depth_payload(2)));
        timestamps.push(frame.timestamp());
        frame.unref();
    }
    assert!(timestamps[1] > timestamps[0]);
    assert_eq!(controls.frame(), 2);

    assert!(device.close().is_clean());
}

#[test]
fn test_lifecycle_is_enforced() {
    let dir = write_recording(2, 5, 1);
    let mut device = Device::open(&recording_config(dir.path(), true)).unwrap();

    assert!(matches!(
        device.start(),
        Err(DeviceError::InvalidState { .. })
    ));
    device.commit_config().unwrap();
    assert!(matches!(
        device.commit_config(),
        Err(DeviceError::InvalidState { .. })
    ));
    assert!(matches!(device.stop(), Err(DeviceError::InvalidState { .. })));

    device.start().unwrap();
    device.stop().unwrap();
    device.start().unwrap();
    assert_eq!(device.state(), DeviceState::Running);

    assert!(device.close().is_clean());
}

#[test]
fn test_leaked_frame_is_reported() {
    let dir = write_recording(4, 5, 1);
    let (device, events) = open_started(dir.path(), true);

    device.request_frame(BuffersMask::DEPTH);
    wait_frame_ready(&events);
    let frame = device.get_latest_frame();

    let report = device.close();
    assert_eq!(report.frames, 1);
    assert_eq!(report.depth_buffers, 1);
    drop(frame);
}
