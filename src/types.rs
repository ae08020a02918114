// SPDX-License-Identifier: GPL-3.0-only

//! Shared capture types: pixel formats, camera models, poses and buffer masks

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric value as found in recording metadata
///
/// Metadata written by other tools stores every number as a double, so
/// integer-valued fields accept both representations.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum JsonNumber {
    Int(u64),
    Float(f64),
}

impl JsonNumber {
    /// Integer value, rejecting negative, fractional and out of range numbers
    pub fn as_u64(self) -> Option<u64> {
        match self {
            JsonNumber::Int(v) => Some(v),
            JsonNumber::Float(v) if v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64 => {
                Some(v as u64)
            }
            JsonNumber::Float(_) => None,
        }
    }
}

impl TryFrom<JsonNumber> for u32 {
    type Error = String;

    fn try_from(value: JsonNumber) -> Result<Self, Self::Error> {
        value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| format!("{:?} is not a valid unsigned integer", value))
    }
}

/// Pixel format of a depth or video buffer
///
/// The discriminants are persisted in recordings; new formats must be
/// appended, never inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "JsonNumber", into = "u32")]
pub enum Format {
    #[default]
    Unknown = 0,
    /// 16-bit depth in millimetres
    ZU16Mm,
    /// 32-bit float depth in metres
    ZF32M,
    /// 16-bit float depth in metres
    ZF16M,
    LuminanceU8,
    RgbU8,
    RgbxU8,
    RgbaU8,
    /// Point cloud of x, y, z, confidence floats in metres
    PointsXyzcF32M,
    BgrU8,
    BgrxU8,
    BgraU8,
}

impl Format {
    pub const ALL: [Format; 12] = [
        Format::Unknown,
        Format::ZU16Mm,
        Format::ZF32M,
        Format::ZF16M,
        Format::LuminanceU8,
        Format::RgbU8,
        Format::RgbxU8,
        Format::RgbaU8,
        Format::PointsXyzcF32M,
        Format::BgrU8,
        Format::BgrxU8,
        Format::BgraU8,
    ];

    /// Bytes used by one pixel (or one point for point clouds)
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Format::Unknown => 0,
            Format::ZU16Mm | Format::ZF16M => 2,
            Format::ZF32M => 4,
            Format::LuminanceU8 => 1,
            Format::RgbU8 | Format::BgrU8 => 3,
            Format::RgbxU8 | Format::RgbaU8 | Format::BgrxU8 | Format::BgraU8 => 4,
            Format::PointsXyzcF32M => 16,
        }
    }

    /// Whether this format carries depth rather than colour
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            Format::ZU16Mm | Format::ZF32M | Format::ZF16M | Format::PointsXyzcF32M
        )
    }
}

impl TryFrom<JsonNumber> for Format {
    type Error = String;

    fn try_from(value: JsonNumber) -> Result<Self, Self::Error> {
        let index = u32::try_from(value)? as usize;
        Format::ALL
            .get(index)
            .copied()
            .ok_or_else(|| format!("unknown format {}", index))
    }
}

impl From<Format> for u32 {
    fn from(format: Format) -> Self {
        format as u32
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Unknown => "unknown",
            Format::ZU16Mm => "Z16 mm",
            Format::ZF32M => "Z32F m",
            Format::ZF16M => "Z16F m",
            Format::LuminanceU8 => "Y8",
            Format::RgbU8 => "RGB8",
            Format::RgbxU8 => "RGBX8",
            Format::RgbaU8 => "RGBA8",
            Format::PointsXyzcF32M => "XYZC32F m",
            Format::BgrU8 => "BGR8",
            Format::BgrxU8 => "BGRX8",
            Format::BgraU8 => "BGRA8",
        };
        f.write_str(name)
    }
}

/// Lens distortion model of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "JsonNumber", into = "u32")]
pub enum DistortionModel {
    #[default]
    None = 0,
    /// Field-of-view model, one coefficient
    Fov,
    BrownK1K2,
    BrownK1K2K3,
    BrownK1K2P1P2K3,
}

impl TryFrom<JsonNumber> for DistortionModel {
    type Error = String;

    fn try_from(value: JsonNumber) -> Result<Self, Self::Error> {
        match u32::try_from(value)? {
            0 => Ok(DistortionModel::None),
            1 => Ok(DistortionModel::Fov),
            2 => Ok(DistortionModel::BrownK1K2),
            3 => Ok(DistortionModel::BrownK1K2K3),
            4 => Ok(DistortionModel::BrownK1K2P1P2K3),
            other => Err(format!("unknown distortion model {}", other)),
        }
    }
}

impl From<DistortionModel> for u32 {
    fn from(model: DistortionModel) -> Self {
        model as u32
    }
}

/// Pinhole camera model with optional lens distortion
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Intrinsics {
    #[serde(deserialize_with = "de_u32")]
    pub width: u32,
    #[serde(deserialize_with = "de_u32")]
    pub height: u32,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub distortion_model: DistortionModel,
    #[serde(default, rename = "distortion_coefficients")]
    pub distortion: [f64; 5],
}

impl Intrinsics {
    /// A camera model is only usable with a non-empty image
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

fn de_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let number = JsonNumber::deserialize(deserializer)?;
    u32::try_from(number).map_err(serde::de::Error::custom)
}

/// Rigid transform from the depth camera to the video camera
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extrinsics {
    /// Row-major 3x3 rotation
    pub rotation: [f32; 9],
    /// Translation in metres
    pub translation: [f32; 3],
}

impl Extrinsics {
    pub fn identity() -> Self {
        Self {
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            translation: [0.0; 3],
        }
    }
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self::identity()
    }
}

/// Device pose at capture time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Quaternion as x, y, z, w
    pub orientation: [f32; 4],
    pub translation: [f32; 3],
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            orientation: [0.0, 0.0, 0.0, 1.0],
            translation: [0.0; 3],
        }
    }
}

/// Rotation of the camera relative to its natural orientation
///
/// Persisted as quarter turns (0 to 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "JsonNumber", into = "u32")]
pub enum Rotation {
    #[default]
    None,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Rotation {
    /// Create rotation from an integer degree value (normalised to 0-360)
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => Rotation::Rotate90,
            180 => Rotation::Rotate180,
            270 => Rotation::Rotate270,
            _ => Rotation::None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Rotate90 => 90,
            Rotation::Rotate180 => 180,
            Rotation::Rotate270 => 270,
        }
    }
}

impl TryFrom<JsonNumber> for Rotation {
    type Error = String;

    fn try_from(value: JsonNumber) -> Result<Self, Self::Error> {
        match u32::try_from(value)? {
            0 => Ok(Rotation::None),
            1 => Ok(Rotation::Rotate90),
            2 => Ok(Rotation::Rotate180),
            3 => Ok(Rotation::Rotate270),
            other => Err(format!("invalid camera rotation {}", other)),
        }
    }
}

impl From<Rotation> for u32 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees() / 90
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// The two kinds of data a device produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Depth,
    Video,
}

impl BufferKind {
    pub const ALL: [BufferKind; 2] = [BufferKind::Depth, BufferKind::Video];

    pub fn mask(&self) -> BuffersMask {
        match self {
            BufferKind::Depth => BuffersMask::DEPTH,
            BufferKind::Video => BuffersMask::VIDEO,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            BufferKind::Depth => 0,
            BufferKind::Video => 1,
        }
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferKind::Depth => f.write_str("depth"),
            BufferKind::Video => f.write_str("video"),
        }
    }
}

bitflags::bitflags! {
    /// Set of buffer kinds, used both for requests and for readiness
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BuffersMask: u64 {
        const DEPTH = 1 << 0;
        const VIDEO = 1 << 1;
    }
}

impl BuffersMask {
    pub const NONE: BuffersMask = BuffersMask::empty();
    pub const ALL: BuffersMask = BuffersMask::all();

    pub fn has(&self, kind: BufferKind) -> bool {
        self.contains(kind.mask())
    }
}

impl Default for BuffersMask {
    fn default() -> Self {
        BuffersMask::NONE
    }
}

impl fmt::Display for BuffersMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.has(BufferKind::Depth) {
            names.push("depth");
        }
        if self.has(BufferKind::Video) {
            names.push("video");
        }
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// Kind of backend behind a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Physical Kinect depth camera
    Kinect,
    /// Playback of a recorded session
    #[default]
    Recording,
    /// AR-SDK camera and pose service
    Session,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Kinect => write!(f, "Kinect"),
            DeviceType::Recording => write!(f, "Recording"),
            DeviceType::Session => write!(f, "AR session"),
        }
    }
}
