// SPDX-License-Identifier: GPL-3.0-only

//! Thread lifecycle for backend capture and I/O loops
//!
//! Each running backend owns one named OS thread that repeatedly runs a loop
//! body until the body asks to stop or the controller is stopped. Stopping is
//! cooperative: the stop signal is checked between iterations and `stop`
//! joins the thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::errors::{DeviceError, DeviceResult};

/// What the loop body wants to happen next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Stop,
}

/// Handle to a running capture loop thread
///
/// ```ignore
/// let mut controller = CaptureLoopController::start("playback", move || {
///     engine.tick();
///     LoopAction::Continue
/// })?;
/// controller.stop();
/// ```
pub struct CaptureLoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl CaptureLoopController {
    /// Spawn a thread named `name` running `loop_fn` until it returns
    /// [`LoopAction::Stop`] or the controller is stopped
    pub fn start<F>(name: &str, mut loop_fn: F) -> DeviceResult<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        Self::start_with_init(name, || Ok(()), move |_: &mut ()| loop_fn())
    }

    /// Spawn a loop whose state is built on the loop thread by `init_fn`
    ///
    /// If initialization fails the error is logged and the thread exits
    /// without running the loop. The state is dropped on the loop thread when
    /// the loop ends.
    pub fn start_with_init<S, I, F>(name: &str, init_fn: I, mut loop_fn: F) -> DeviceResult<Self>
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        info!(name = %name, "Starting capture loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = match init_fn() {
                    Ok(state) => state,
                    Err(e) => {
                        warn!(name = %thread_name, error = %e, "Capture loop initialization failed");
                        return;
                    }
                };

                let mut iterations: u64 = 0;
                while !thread_stop.load(Ordering::SeqCst) {
                    iterations += 1;
                    if loop_fn(&mut state) == LoopAction::Stop {
                        debug!(name = %thread_name, "Loop requested stop");
                        break;
                    }
                }

                info!(name = %thread_name, iterations, "Capture loop thread exiting");
            })
            .map_err(|e| DeviceError::StartFailed(format!("Failed to spawn {} thread: {}", name, e)))?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Whether the loop thread is still alive
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Shared stop flag, for loop bodies that block inside an iteration
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    /// Signal the loop to stop without waiting for it
    pub fn request_stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Signal the loop to stop and wait for the thread to exit
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to exit on its own
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.name, "Waiting for capture loop thread");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Capture loop thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            self.stop();
        }
    }
}
