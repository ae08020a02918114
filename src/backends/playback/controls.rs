// SPDX-License-Identifier: GPL-3.0-only

//! Pause, loop and single-step controls shared between the consumer and the
//! playback thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// Playback position and range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackCursor {
    /// Index of the frame most recently played
    pub frame: usize,
    /// Last frame of the playable range; `None` plays to the end
    pub max_frame: Option<usize>,
    /// Wrap to the first frame at the end of the range
    pub looping: bool,
    /// Set by a step so the end of the range is passed once without looping
    pub ignore_loop: bool,
}

impl Default for PlaybackCursor {
    fn default() -> Self {
        Self {
            frame: 0,
            max_frame: None,
            looping: true,
            ignore_loop: false,
        }
    }
}

impl PlaybackCursor {
    /// Number of frames in the playable range of a recording with
    /// `n_recorded` frames
    pub fn effective_frames(&self, n_recorded: usize) -> usize {
        match self.max_frame {
            Some(max) => (max + 1).min(n_recorded),
            None => n_recorded,
        }
    }
}

#[derive(Debug, Default)]
pub struct PlaybackControls {
    cursor: Mutex<PlaybackCursor>,
    running: AtomicBool,
}

impl PlaybackControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn cursor(&self) -> MutexGuard<'_, PlaybackCursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> PlaybackCursor {
        *self.cursor()
    }

    pub fn frame(&self) -> usize {
        self.cursor().frame
    }

    pub fn set_frame(&self, frame: usize) {
        self.cursor().frame = frame;
    }

    pub fn max_frame(&self) -> Option<usize> {
        self.cursor().max_frame
    }

    pub fn set_max_frame(&self, max_frame: Option<usize>) {
        self.cursor().max_frame = max_frame;
    }

    pub fn looping(&self) -> bool {
        self.cursor().looping
    }

    pub fn set_looping(&self, looping: bool) {
        self.cursor().looping = looping;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark whether playback is live; the recording backend does this on
    /// start and stop
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Freeze on the current frame, or resume looping playback
    ///
    /// Resuming only happens while the current frame is inside the playable
    /// range.
    pub fn toggle_pause(&self) {
        if !self.is_running() {
            return;
        }
        let mut cursor = self.cursor();
        if cursor.looping {
            cursor.max_frame = Some(cursor.frame);
            cursor.looping = false;
        } else if cursor.max_frame.is_some_and(|max| max >= cursor.frame) {
            cursor.max_frame = None;
            cursor.looping = true;
        }
        debug!(?cursor, "Toggled playback pause");
    }

    /// Show the previous frame and pause there
    pub fn step_back(&self) {
        if !self.is_running() {
            return;
        }
        let mut cursor = self.cursor();
        if cursor.frame < 1 {
            return;
        }
        cursor.frame -= 1;
        cursor.max_frame = Some(cursor.frame);
        // The playback thread advances once before emitting
        if cursor.frame > 0 {
            cursor.frame -= 1;
        }
        cursor.looping = false;
        cursor.ignore_loop = true;
        debug!(?cursor, "Stepped playback back");
    }

    /// Show the next frame and pause there
    pub fn step_forward(&self) {
        if !self.is_running() {
            return;
        }
        let mut cursor = self.cursor();
        cursor.max_frame = Some(cursor.frame + 1);
        cursor.looping = false;
        cursor.ignore_loop = true;
        debug!(?cursor, "Stepped playback forward");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let controls = PlaybackControls::new();
        assert_eq!(controls.snapshot(), PlaybackCursor::default());
        assert!(controls.looping());
        assert_eq!(controls.max_frame(), None);
        assert_eq!(controls.snapshot().effective_frames(10), 10);
    }

    #[test]
    fn test_toggle_pause_round_trip() {
        let controls = PlaybackControls::new();
        controls.set_running(true);
        controls.set_frame(4);
        controls.toggle_pause();
        assert_eq!(controls.max_frame(), Some(4));
        assert!(!controls.looping());
        assert_eq!(controls.snapshot().effective_frames(10), 5);

        controls.toggle_pause();
        assert_eq!(controls.max_frame(), None);
        assert!(controls.looping());
    }

    #[test]
    fn test_toggle_does_not_resume_past_range() {
        let controls = PlaybackControls::new();
        controls.set_running(true);
        controls.set_looping(false);
        controls.set_max_frame(Some(2));
        controls.set_frame(3);
        controls.toggle_pause();
        assert!(!controls.looping());
        assert_eq!(controls.max_frame(), Some(2));
    }

    #[test]
    fn test_step_back_requires_running() {
        let controls = PlaybackControls::new();
        controls.set_frame(3);
        controls.step_back();
        assert_eq!(controls.snapshot(), PlaybackCursor {
            frame: 3,
            ..Default::default()
        });

        controls.set_running(true);
        controls.step_back();
        let cursor = controls.snapshot();
        assert_eq!(cursor.frame, 1);
        assert_eq!(cursor.max_frame, Some(2));
        assert!(!cursor.looping);
        assert!(cursor.ignore_loop);
    }

    #[test]
    fn test_step_back_from_first_frame_is_ignored() {
        let controls = PlaybackControls::new();
        controls.set_running(true);
        controls.step_back();
        assert_eq!(controls.snapshot(), PlaybackCursor::default());
    }

    #[test]
    fn test_step_forward() {
        let controls = PlaybackControls::new();
        controls.set_running(true);
        controls.set_frame(6);
        controls.step_forward();
        let cursor = controls.snapshot();
        assert_eq!(cursor.max_frame, Some(7));
        assert_eq!(cursor.effective_frames(5), 5);
        assert!(!cursor.looping);
        assert!(cursor.ignore_loop);
    }

    #[test]
    fn test_stopped_playback_ignores_pause_and_step() {
        let controls = PlaybackControls::new();
        controls.set_frame(3);
        controls.toggle_pause();
        controls.step_forward();
        assert_eq!(controls.snapshot(), PlaybackCursor {
            frame: 3,
            ..Default::default()
        });
    }
}
