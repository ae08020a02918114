// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! - Listing and inspecting recordings
//! - Replaying a recording through the device frame protocol
//! - Recording from a Kinect

use depthcap::config::Config;
use depthcap::device::{Device, DeviceEvent, EventQueue, FrameRequester};
use depthcap::memory::Frame;
use depthcap::recording::{Recording, index_recordings};
use depthcap::types::{BufferKind, BuffersMask, DeviceType};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// How long to wait for a device event before checking the stop flag
const EVENT_WAIT: Duration = Duration::from_millis(250);

/// List recordings below `dir`
pub fn list_recordings(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let entries = index_recordings(dir)?;

    if entries.is_empty() {
        println!("No recordings found in {}", dir.display());
        return Ok(());
    }

    println!("Recordings in {}:", dir.display());
    println!();
    for entry in &entries {
        match Recording::load(&entry.path) {
            Ok(recording) => println!(
                "  {}  ({} frames, {:.1}s)",
                entry.name(),
                recording.frame_count(),
                recording.duration_ns() as f64 / 1e9
            ),
            Err(e) => println!("  {}  (unreadable: {})", entry.name(), e),
        }
    }

    Ok(())
}

/// Print a recording's metadata
pub fn show_info(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let recording = Recording::load(path)?;
    let metadata = recording.metadata();

    println!("Recording: {}", recording.root().display());
    println!("Frames: {}", recording.frame_count());
    println!("Duration: {:.3}s", recording.duration_ns() as f64 / 1e9);
    println!();

    for kind in BufferKind::ALL {
        let format = match kind {
            BufferKind::Depth => metadata.depth_format,
            BufferKind::Video => metadata.video_format,
        };
        let frames = recording
            .frames()
            .iter()
            .filter(|f| f.payload(kind).is_some())
            .count();
        println!("{}:", kind);
        println!("  Format: {}", format);
        println!("  Frames with data: {}", frames);
        println!("  Max pixels: {}", recording.max_pixels(kind));
        if recording.frame_count() > 0 {
            let intrinsics = recording.frame_intrinsics(0, kind);
            println!(
                "  Intrinsics: {}x{} fx={:.1} fy={:.1} cx={:.1} cy={:.1}",
                intrinsics.width, intrinsics.height, intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy
            );
        }
    }
    println!();
    println!(
        "Intrinsics: {}",
        if recording.has_fixed_intrinsics() {
            "fixed"
        } else {
            "per frame"
        }
    );

    Ok(())
}

/// Replay a recording, printing every frame the device hands out
pub fn play(
    config: &Config,
    recording: PathBuf,
    frames: Option<u64>,
    looping: bool,
    depth: bool,
    video: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut device_config = config.device.clone();
    device_config.kind = DeviceType::Recording;
    device_config.recording_path = Some(recording);
    device_config.loop_playback = looping;

    let mask = match (depth, video) {
        (true, false) => BuffersMask::DEPTH,
        (false, true) => BuffersMask::VIDEO,
        _ => BuffersMask::ALL,
    };

    let mut device = Device::open(&device_config)?;
    let events = EventQueue::new();
    device.set_event_callback(events.callback());
    device.commit_config()?;

    println!(
        "Depth: {} {}x{}",
        device.depth_format(),
        device.depth_intrinsics().width,
        device.depth_intrinsics().height
    );
    println!(
        "Video: {} {}x{}",
        device.video_format(),
        device.video_intrinsics().width,
        device.video_intrinsics().height
    );
    println!();
    println!("Playing... (press Ctrl+C to stop)");

    let stop_flag = install_stop_handler()?;
    device.start()?;

    let mut requester = FrameRequester::new();
    requester.request(&device, mask);

    let mut played = 0u64;
    while !stop_flag.load(Ordering::SeqCst) {
        let Some(event) = events.wait_timeout(EVENT_WAIT) else {
            continue;
        };
        let DeviceEvent::FrameReady { buffers_mask } = event else {
            continue;
        };

        requester.satisfied(buffers_mask);
        let frame = device.get_latest_frame();
        print_frame(played, &frame);
        frame.unref();
        played += 1;

        if frames.is_some_and(|limit| played >= limit) {
            break;
        }
        requester.request(&device, mask);
    }
    println!();

    device.stop()?;
    finish(device, played)
}

/// Record from a Kinect into the recordings directory
#[cfg(all(feature = "kinect", target_arch = "x86_64"))]
pub fn record(
    config: &Config,
    device_index: Option<usize>,
    duration: u64,
    output: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    use depthcap::recording::RecordingWriter;
    use std::time::Instant;

    let mut device_config = config.device.clone();
    device_config.kind = DeviceType::Kinect;
    if let Some(index) = device_index {
        device_config.kinect_device = index;
    }

    let mut device = Device::open(&device_config)?;
    let events = EventQueue::new();
    device.set_event_callback(events.callback());
    device.commit_config()?;

    let dir = config.recordings_dir();
    std::fs::create_dir_all(&dir)?;
    let mut writer = RecordingWriter::create(&dir, output.as_deref(), false, device.stream_setup())?;

    println!("Output: {}", writer.root().display());
    println!("Duration: {} seconds", duration);
    println!();
    println!("Recording... (press Ctrl+C to stop early)");

    let stop_flag = install_stop_handler()?;
    device.start()?;

    let mut requester = FrameRequester::new();
    requester.request(&device, BuffersMask::ALL);

    let start = Instant::now();
    let target_duration = Duration::from_secs(duration);
    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }

        if let Some(DeviceEvent::FrameReady { buffers_mask }) = events.wait_timeout(EVENT_WAIT) {
            requester.satisfied(buffers_mask);
            let frame = device.get_latest_frame();
            let saved = writer.save_frame(&frame);
            frame.unref();
            saved?;
            requester.request(&device, BuffersMask::ALL);
        }

        let elapsed = start.elapsed().as_secs();
        print!(
            "\rRecording: {:02}:{:02}  {} frames",
            elapsed / 60,
            elapsed % 60,
            writer.frame_count()
        );
        std::io::Write::flush(&mut std::io::stdout())?;
    }
    println!();

    device.stop()?;
    let frames = writer.frame_count() as u64;
    let path = writer.finish()?;
    println!("Recording saved: {}", path.display());
    finish(device, frames)
}

fn install_stop_handler() -> Result<Arc<AtomicBool>, Box<dyn std::error::Error>> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;
    Ok(stop_flag)
}

fn print_frame(index: u64, frame: &Frame) {
    let depth = frame.with_depth(|bytes| bytes.len());
    let video = frame.with_video(|bytes| bytes.len());
    print!(
        "\rFrame {:>6}  t={:>14}ns  depth={:>8}  video={:>8}",
        index,
        frame.timestamp(),
        depth.map_or_else(|| "-".to_string(), |len| format!("{}B", len)),
        video.map_or_else(|| "-".to_string(), |len| format!("{}B", len)),
    );
    let _ = std::io::Write::flush(&mut std::io::stdout());
}

fn finish(device: Device, frames: u64) -> Result<(), Box<dyn std::error::Error>> {
    let report = device.close();
    println!("Frames: {}", frames);
    if !report.is_clean() {
        return Err(format!(
            "Device closed with {} frames, {} depth and {} video buffers still referenced",
            report.frames, report.depth_buffers, report.video_buffers
        )
        .into());
    }
    Ok(())
}
