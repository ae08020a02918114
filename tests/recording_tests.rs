// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for writing, indexing and loading recordings

mod common;

use common::{intrinsics, write_recording_to};
use depthcap::DeviceError;
use depthcap::backends::StreamSetup;
use depthcap::constants::recording::{LEGACY_METADATA_FILE, METADATA_FILE};
use depthcap::device::{RecordedBuffer, RecordedFrame, SwapEngine};
use depthcap::recording::{Recording, RecordingWriter, index_recordings};
use depthcap::types::{BufferKind, BuffersMask, DeviceType, Extrinsics, Format, Pose, Rotation};
use std::fs;

fn setup() -> StreamSetup {
    StreamSetup {
        depth_format: Format::ZU16Mm,
        video_format: Format::LuminanceU8,
        depth_intrinsics: intrinsics(2, 2),
        video_intrinsics: intrinsics(4, 2),
        depth_to_video: Extrinsics {
            rotation: Extrinsics::identity().rotation,
            translation: [0.025, 0.0, 0.0],
        },
        max_depth_pixels: 4,
        max_video_pixels: 8,
        depth_buffer_bytes: 8,
        video_buffer_bytes: 8,
    }
}

#[test]
fn test_written_recording_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SwapEngine::new(DeviceType::Session, &setup());
    let mut writer = RecordingWriter::create(dir.path(), Some("take"), false, &setup()).unwrap();

    for (i, with_depth) in [true, false, true].into_iter().enumerate() {
        let depth = engine.acquire_buffer(BufferKind::Depth, "test depth");
        depth.fill(&[i as u8; 8]);
        let video = engine.acquire_buffer(BufferKind::Video, "test video");
        video.fill(&[i as u8 + 10; 8]);

        engine.request_frame(BuffersMask::ALL);
        engine.swap_recorded_frame(&RecordedFrame {
            timestamp: 1_000 + i as u64 * 33,
            pose: Pose::default(),
            camera_rotation: Rotation::Rotate180,
            depth: with_depth.then(|| RecordedBuffer {
                buffer: &depth,
                intrinsics: intrinsics(2, 2),
            }),
            video: Some(RecordedBuffer {
                buffer: &video,
                intrinsics: intrinsics(4, 2),
            }),
        });
        depth.unref();
        video.unref();

        let frame = engine.get_latest_frame();
        writer.save_frame(&frame).unwrap();
        frame.unref();
    }
    assert_eq!(writer.frame_count(), 3);
    let root = writer.finish().unwrap();
    assert_eq!(root, dir.path().join("take"));

    let recording = Recording::load(&root).unwrap();
    assert_eq!(recording.frame_count(), 3);
    assert!(!recording.has_fixed_intrinsics());
    assert_eq!(recording.duration_ns(), 66);
    assert_eq!(recording.metadata().video_format, Format::LuminanceU8);
    assert_eq!(recording.metadata().depth_to_video_extrinsics.translation[0], 0.025);

    let frames = recording.frames();
    assert!(frames[0].has_depth());
    assert!(!frames[1].has_depth());
    assert_eq!(frames[2].camera_rotation, Rotation::Rotate180);
    assert_eq!(recording.frame_intrinsics(1, BufferKind::Video).width, 4);

    let (file, len) = frames[2].payload(BufferKind::Depth).unwrap();
    assert_eq!(len, 8);
    assert_eq!(fs::read(recording.payload_path(file)).unwrap(), vec![2; 8]);
    let (file, _) = frames[1].payload(BufferKind::Video).unwrap();
    assert_eq!(fs::read(recording.payload_path(file)).unwrap(), vec![11; 8]);
}

#[test]
fn test_writer_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    RecordingWriter::create(dir.path(), Some("take"), false, &setup()).unwrap();

    let again = RecordingWriter::create(dir.path(), Some("take"), false, &setup());
    assert!(matches!(again, Err(DeviceError::Io(_))));
    assert!(RecordingWriter::create(dir.path(), Some("take"), true, &setup()).is_ok());
}

#[test]
fn test_writer_names_recordings_by_date() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::create(dir.path(), None, false, &setup()).unwrap();
    let name = writer.root().file_name().unwrap().to_string_lossy().into_owned();
    // %Y-%m-%d-%H-%M-%S
    assert_eq!(name.len(), 19);
    assert_eq!(name.matches('-').count(), 5);
}

#[test]
fn test_index_lists_loadable_recordings() {
    let dir = tempfile::tempdir().unwrap();
    write_recording_to(&dir.path().join("2024/session-a"), 2, 10, 1);
    write_recording_to(&dir.path().join("session-b"), 3, 10, 1);
    fs::create_dir_all(dir.path().join("not-a-recording")).unwrap();

    let entries = index_recordings(dir.path()).unwrap();
    let names: Vec<String> = entries.iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["2024/session-a", "session-b"]);

    let counts: Vec<usize> = entries
        .iter()
        .map(|e| Recording::load(&e.path).unwrap().frame_count())
        .collect();
    assert_eq!(counts, vec![2, 3]);
}

#[test]
fn test_load_accepts_legacy_metadata_name() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("old-take");
    write_recording_to(&root, 2, 10, 1);
    fs::rename(root.join(METADATA_FILE), root.join(LEGACY_METADATA_FILE)).unwrap();

    let recording = Recording::load(&root).unwrap();
    assert_eq!(recording.frame_count(), 2);
    let entries = index_recordings(dir.path()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name(), "old-take");
}

#[test]
fn test_load_rejects_missing_and_empty_recordings() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Recording::load(&dir.path().join("missing")),
        Err(DeviceError::Recording(_))
    ));

    fs::write(dir.path().join("recording.json"), r#"{"frames": []}"#).unwrap();
    assert!(matches!(
        Recording::load(dir.path()),
        Err(DeviceError::Recording(msg)) if msg.contains("no frames")
    ));
}
