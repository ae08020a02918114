// SPDX-License-Identifier: GPL-3.0-only

//! Recording metadata document
//!
//! A recording is a directory holding [`METADATA_FILE`] plus one payload file
//! per recorded depth or video buffer. Older recordings store one set of
//! intrinsics for the whole session at the top level; newer ones store
//! intrinsics with every frame.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use crate::backends::StreamSetup;
use crate::constants::playback::{DEPTH_BYTES_PER_MAX_PIXEL, VIDEO_BYTES_PER_MAX_PIXEL};
use crate::constants::recording::{LEGACY_METADATA_FILE, METADATA_FILE};
use crate::errors::{DeviceError, DeviceResult};
use crate::types::{BufferKind, Extrinsics, Format, Intrinsics, JsonNumber, Pose, Rotation};

/// Top-level metadata of a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    /// Intrinsics shared by every frame (fixed-intrinsics recordings)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_intrinsics: Option<Intrinsics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_intrinsics: Option<Intrinsics>,
    #[serde(default, deserialize_with = "de_usize")]
    pub max_depth_pixels: usize,
    #[serde(default, deserialize_with = "de_usize")]
    pub max_video_pixels: usize,
    #[serde(default)]
    pub depth_to_video_extrinsics: Extrinsics,
    #[serde(default)]
    pub depth_format: Format,
    #[serde(default)]
    pub video_format: Format,
    #[serde(default)]
    pub frames: Vec<FrameRecord>,
}

/// One recorded frame; every buffer is optional
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameRecord {
    #[serde(deserialize_with = "de_u64")]
    pub timestamp: u64,
    #[serde(default)]
    pub pose: Pose,
    #[serde(default)]
    pub camera_rotation: Rotation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de_opt_usize")]
    pub depth_len: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_intrinsics: Option<Intrinsics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de_opt_usize")]
    pub video_len: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_intrinsics: Option<Intrinsics>,
}

impl FrameRecord {
    /// Payload file and length of `kind`, if this frame recorded one
    pub fn payload(&self, kind: BufferKind) -> Option<(&str, usize)> {
        let (file, len) = match kind {
            BufferKind::Depth => (&self.depth_file, self.depth_len),
            BufferKind::Video => (&self.video_file, self.video_len),
        };
        Some((file.as_deref()?, len.unwrap_or(0)))
    }

    pub fn has_depth(&self) -> bool {
        self.depth_file.is_some()
    }

    pub fn intrinsics(&self, kind: BufferKind) -> Option<Intrinsics> {
        match kind {
            BufferKind::Depth => self.depth_intrinsics,
            BufferKind::Video => self.video_intrinsics,
        }
    }
}

fn de_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    JsonNumber::deserialize(deserializer)?
        .as_u64()
        .ok_or_else(|| serde::de::Error::custom("expected a non-negative integer"))
}

fn de_usize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    de_u64(deserializer).map(|v| v as usize)
}

fn de_opt_usize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
    Option::<JsonNumber>::deserialize(deserializer)?
        .map(|n| {
            n.as_u64()
                .map(|v| v as usize)
                .ok_or_else(|| serde::de::Error::custom("expected a non-negative integer"))
        })
        .transpose()
}

/// A recording loaded from disk
#[derive(Debug, Clone)]
pub struct Recording {
    root: PathBuf,
    metadata: RecordingMetadata,
}

impl Recording {
    /// Load a recording from its directory or its metadata file
    pub fn load(path: &Path) -> DeviceResult<Self> {
        let (root, metadata_path) = if path.is_dir() {
            let current = path.join(METADATA_FILE);
            let legacy = path.join(LEGACY_METADATA_FILE);
            let metadata_path = if !current.exists() && legacy.exists() { legacy } else { current };
            (path.to_path_buf(), metadata_path)
        } else {
            let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
            (root, path.to_path_buf())
        };

        let text = fs::read_to_string(&metadata_path).map_err(|e| {
            DeviceError::Recording(format!(
                "Failed to open recording metadata {}: {}",
                metadata_path.display(),
                e
            ))
        })?;
        let metadata: RecordingMetadata = serde_json::from_str(&text).map_err(|e| {
            DeviceError::Recording(format!("Invalid recording metadata: {}", e))
        })?;

        let recording = Self::from_metadata(root, metadata)?;
        info!(
            path = %recording.root.display(),
            frames = recording.frame_count(),
            fixed_intrinsics = recording.has_fixed_intrinsics(),
            "Loaded recording"
        );
        Ok(recording)
    }

    /// Validate `metadata` describing a recording stored under `root`
    pub fn from_metadata(root: PathBuf, metadata: RecordingMetadata) -> DeviceResult<Self> {
        if metadata.frames.is_empty() {
            return Err(DeviceError::Recording("Recording has no frames".to_string()));
        }
        if metadata.depth_intrinsics.is_some() != metadata.video_intrinsics.is_some() {
            return Err(DeviceError::Recording(
                "Inconsistently fixed depth/video intrinsics".to_string(),
            ));
        }
        Ok(Self { root, metadata })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata(&self) -> &RecordingMetadata {
        &self.metadata
    }

    pub fn frames(&self) -> &[FrameRecord] {
        &self.metadata.frames
    }

    pub fn frame_count(&self) -> usize {
        self.metadata.frames.len()
    }

    /// Whether intrinsics are stored once for the whole recording
    pub fn has_fixed_intrinsics(&self) -> bool {
        self.metadata.depth_intrinsics.is_some()
    }

    /// Intrinsics that apply to `kind` in frame `index`
    pub fn frame_intrinsics(&self, index: usize, kind: BufferKind) -> Intrinsics {
        let fixed = match kind {
            BufferKind::Depth => self.metadata.depth_intrinsics,
            BufferKind::Video => self.metadata.video_intrinsics,
        };
        fixed
            .or_else(|| self.metadata.frames.get(index)?.intrinsics(kind))
            .unwrap_or_default()
    }

    /// Largest image of `kind` in the recording, in pixels
    pub fn max_pixels(&self, kind: BufferKind) -> usize {
        let (fixed, declared) = match kind {
            BufferKind::Depth => (self.metadata.depth_intrinsics, self.metadata.max_depth_pixels),
            BufferKind::Video => (self.metadata.video_intrinsics, self.metadata.max_video_pixels),
        };
        if let Some(intrinsics) = fixed {
            return intrinsics.pixel_count();
        }
        if declared > 0 {
            return declared;
        }
        self.metadata
            .frames
            .iter()
            .filter_map(|f| f.intrinsics(kind))
            .map(|i| i.pixel_count())
            .max()
            .unwrap_or(0)
    }

    /// Absolute path of a payload file named in the metadata
    pub fn payload_path(&self, file: &str) -> PathBuf {
        self.root.join(file.trim_start_matches('/'))
    }

    /// Timestamp of the first frame
    pub fn start_timestamp(&self) -> u64 {
        self.metadata.frames.first().map_or(0, |f| f.timestamp)
    }

    /// Recorded duration in nanoseconds
    pub fn duration_ns(&self) -> u64 {
        let end = self.metadata.frames.last().map_or(0, |f| f.timestamp);
        end.saturating_sub(self.start_timestamp())
    }

    /// Stream description for a device replaying this recording
    pub fn stream_setup(&self) -> StreamSetup {
        let max_depth_pixels = self.max_pixels(BufferKind::Depth);
        let max_video_pixels = self.max_pixels(BufferKind::Video);
        StreamSetup {
            depth_format: self.metadata.depth_format,
            video_format: self.metadata.video_format,
            depth_intrinsics: self.first_intrinsics(BufferKind::Depth),
            video_intrinsics: self.first_intrinsics(BufferKind::Video),
            depth_to_video: self.metadata.depth_to_video_extrinsics,
            max_depth_pixels,
            max_video_pixels,
            depth_buffer_bytes: max_depth_pixels * DEPTH_BYTES_PER_MAX_PIXEL,
            video_buffer_bytes: max_video_pixels * VIDEO_BYTES_PER_MAX_PIXEL,
        }
    }

    fn first_intrinsics(&self, kind: BufferKind) -> Intrinsics {
        (0..self.frame_count())
            .map(|i| self.frame_intrinsics(i, kind))
            .find(Intrinsics::is_valid)
            .unwrap_or_default()
    }
}
