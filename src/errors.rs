// SPDX-License-Identifier: GPL-3.0-only

//! Error types for capture devices and recordings

use std::fmt;

use crate::device::DeviceState;

/// Result type alias using DeviceError
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors surfaced to callers of the device and recording APIs
///
/// Only recoverable conditions are represented here. Broken internal
/// invariants (ref count misuse, invalid intrinsics in a swap) panic instead.
#[derive(Debug, Clone)]
pub enum DeviceError {
    /// No device of the requested kind is connected
    NotFound(String),
    /// Backend failed to open
    OpenFailed(String),
    /// Backend rejected or failed its configuration
    ConfigurationFailed(String),
    /// Backend failed to start capturing
    StartFailed(String),
    /// Operation not allowed in the current lifecycle state
    InvalidState {
        operation: &'static str,
        state: DeviceState,
    },
    /// Backend has no such property or the value is out of range
    Property(String),
    /// Recording metadata could not be parsed or is inconsistent
    Recording(String),
    /// Configuration file errors
    Config(String),
    /// Storage/filesystem errors
    Io(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NotFound(msg) => write!(f, "Device not found: {}", msg),
            DeviceError::OpenFailed(msg) => write!(f, "Failed to open device: {}", msg),
            DeviceError::ConfigurationFailed(msg) => {
                write!(f, "Failed to configure device: {}", msg)
            }
            DeviceError::StartFailed(msg) => write!(f, "Failed to start device: {}", msg),
            DeviceError::InvalidState { operation, state } => {
                write!(f, "Cannot {} a device in state {:?}", operation, state)
            }
            DeviceError::Property(msg) => write!(f, "Property error: {}", msg),
            DeviceError::Recording(msg) => write!(f, "Recording error: {}", msg),
            DeviceError::Config(msg) => write!(f, "Configuration error: {}", msg),
            DeviceError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for DeviceError {}

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        DeviceError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DeviceError {
    fn from(err: serde_json::Error) -> Self {
        DeviceError::Recording(err.to_string())
    }
}
