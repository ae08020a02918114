// SPDX-License-Identifier: GPL-3.0-only

//! Recordings written to a temporary directory for integration tests

#![allow(dead_code)]

use depthcap::constants::recording::METADATA_FILE;
use depthcap::recording::{FrameRecord, RecordingMetadata};
use depthcap::types::{DistortionModel, Extrinsics, Format, Intrinsics};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

pub const MS: u64 = 1_000_000;

/// 2x2 depth (u16 millimetres) and 2x2 RGB video
pub const DEPTH_LEN: usize = 8;
pub const VIDEO_LEN: usize = 12;

pub fn intrinsics(width: u32, height: u32) -> Intrinsics {
    Intrinsics {
        width,
        height,
        fx: 1.0,
        fy: 1.0,
        cx: width as f64 / 2.0,
        cy: height as f64 / 2.0,
        distortion_model: DistortionModel::None,
        distortion: [0.0; 5],
    }
}

/// Depth payload of frame `index`; every byte is the frame number
pub fn depth_payload(index: usize) -> Vec<u8> {
    vec![index as u8; DEPTH_LEN]
}

/// Video payload of frame `index`; every byte is the frame number plus 100
pub fn video_payload(index: usize) -> Vec<u8> {
    vec![index as u8 + 100; VIDEO_LEN]
}

/// Write a recording of `n_frames` frames `interval_ms` apart
///
/// Every frame carries video; frames whose index is a multiple of
/// `depth_every` also carry depth.
pub fn write_recording(n_frames: usize, interval_ms: u64, depth_every: usize) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_recording_to(dir.path(), n_frames, interval_ms, depth_every);
    dir
}

pub fn write_recording_to(root: &Path, n_frames: usize, interval_ms: u64, depth_every: usize) {
    fs::create_dir_all(root.join("depth")).unwrap();
    fs::create_dir_all(root.join("video")).unwrap();

    let mut frames = Vec::new();
    for i in 0..n_frames {
        let mut record = FrameRecord {
            timestamp: 1_000 * MS + i as u64 * interval_ms * MS,
            ..Default::default()
        };
        if i % depth_every == 0 {
            let file = format!("/depth/{:06}.bin", i);
            fs::write(root.join(&file[1..]), depth_payload(i)).unwrap();
            record.depth_file = Some(file);
            record.depth_len = Some(DEPTH_LEN);
        }
        let file = format!("/video/{:06}.bin", i);
        fs::write(root.join(&file[1..]), video_payload(i)).unwrap();
        record.video_file = Some(file);
        record.video_len = Some(VIDEO_LEN);
        frames.push(record);
    }

    let metadata = RecordingMetadata {
        depth_intrinsics: Some(intrinsics(2, 2)),
        video_intrinsics: Some(intrinsics(2, 2)),
        max_depth_pixels: 4,
        max_video_pixels: 4,
        depth_to_video_extrinsics: Extrinsics::identity(),
        depth_format: Format::ZU16Mm,
        video_format: Format::RgbU8,
        frames,
    };
    fs::write(
        root.join(METADATA_FILE),
        serde_json::to_string_pretty(&metadata).unwrap(),
    )
    .unwrap();
}
