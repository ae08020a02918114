// SPDX-License-Identifier: GPL-3.0-only

//! Saving device frames as a recording that playback can replay

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info};

use super::format::{FrameRecord, RecordingMetadata};
use crate::backends::StreamSetup;
use crate::constants::recording::{DEPTH_DIR, METADATA_FILE, VIDEO_DIR};
use crate::errors::{DeviceError, DeviceResult};
use crate::memory::Frame;

/// Writes one payload file per buffer and the metadata document on finish
pub struct RecordingWriter {
    root: PathBuf,
    metadata: RecordingMetadata,
}

impl RecordingWriter {
    /// Create a new recording directory under `recordings_dir`
    ///
    /// Without a `name` the directory is named after the current local
    /// time. An existing recording is only replaced when `overwrite` is set.
    pub fn create(
        recordings_dir: &Path,
        name: Option<&str>,
        overwrite: bool,
        setup: &StreamSetup,
    ) -> DeviceResult<Self> {
        let name = match name {
            Some(name) => name.to_string(),
            None => Local::now().format("%Y-%m-%d-%H-%M-%S").to_string(),
        };
        let root = recordings_dir.join(name);

        if root.exists() {
            if !overwrite {
                return Err(DeviceError::Io(format!(
                    "Recording {} already exists",
                    root.display()
                )));
            }
            info!(path = %root.display(), "Overwriting recording");
            fs::remove_dir_all(&root)?;
        }

        fs::create_dir_all(root.join(DEPTH_DIR))?;
        fs::create_dir_all(root.join(VIDEO_DIR))?;

        info!(path = %root.display(), "Started recording");

        Ok(Self {
            root,
            metadata: RecordingMetadata {
                depth_intrinsics: None,
                video_intrinsics: None,
                max_depth_pixels: setup.max_depth_pixels,
                max_video_pixels: setup.max_video_pixels,
                depth_to_video_extrinsics: setup.depth_to_video,
                depth_format: setup.depth_format,
                video_format: setup.video_format,
                frames: Vec::new(),
            },
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn frame_count(&self) -> usize {
        self.metadata.frames.len()
    }

    /// Append a frame, writing whichever of its buffers are present
    pub fn save_frame(&mut self, frame: &Frame) -> DeviceResult<()> {
        let index = self.metadata.frames.len();
        let mut record = FrameRecord {
            timestamp: frame.timestamp(),
            pose: frame.pose(),
            camera_rotation: frame.camera_rotation(),
            ..Default::default()
        };

        if let Some(written) = frame.with_depth(|bytes| self.write_payload(DEPTH_DIR, index, bytes)) {
            let (file, len) = written?;
            record.depth_file = Some(file);
            record.depth_len = Some(len);
            record.depth_intrinsics = Some(frame.depth_intrinsics());
        }
        if let Some(written) = frame.with_video(|bytes| self.write_payload(VIDEO_DIR, index, bytes)) {
            let (file, len) = written?;
            record.video_file = Some(file);
            record.video_len = Some(len);
            record.video_intrinsics = Some(frame.video_intrinsics());
        }

        debug!(
            index,
            depth = record.depth_file.is_some(),
            video = record.video_file.is_some(),
            "Saved recording frame"
        );
        self.metadata.frames.push(record);
        Ok(())
    }

    fn write_payload(&self, dir: &str, index: usize, bytes: &[u8]) -> DeviceResult<(String, usize)> {
        let file = format!("/{}/{:06}.bin", dir, index);
        fs::write(self.root.join(dir).join(format!("{:06}.bin", index)), bytes)?;
        Ok((file, bytes.len()))
    }

    /// Write the metadata document and return the recording directory
    pub fn finish(self) -> DeviceResult<PathBuf> {
        let json = serde_json::to_string_pretty(&self.metadata)?;
        fs::write(self.root.join(METADATA_FILE), json)?;
        info!(
            path = %self.root.display(),
            frames = self.metadata.frames.len(),
            "Finished recording"
        );
        Ok(self.root)
    }
}
