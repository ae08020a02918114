// SPDX-License-Identifier: GPL-3.0-only

//! Recorded capture sessions: metadata format, writer and index

pub mod format;
pub mod index;
pub mod writer;

pub use format::{FrameRecord, Recording, RecordingMetadata};
pub use index::{RecordingEntry, index_recordings};
pub use writer::RecordingWriter;
