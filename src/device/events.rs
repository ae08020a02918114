// SPDX-License-Identifier: GPL-3.0-only

//! Device events and a queue for handling them off the callback thread

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::types::BuffersMask;

/// Notification raised by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Configuration committed; the device can be started
    Ready,
    /// Requested buffers are ready to claim with `get_latest_frame`
    FrameReady { buffers_mask: BuffersMask },
}

/// Event callback
///
/// Runs on an arbitrary thread while a device lock is held. It must not call
/// back into the device; hand the event to another thread instead, for
/// example with an [`EventQueue`].
pub type EventCallback = Box<dyn Fn(DeviceEvent) + Send + Sync>;

/// Channel that device callbacks push into and a consumer thread drains
pub struct EventQueue {
    sender: Sender<DeviceEvent>,
    receiver: Mutex<Receiver<DeviceEvent>>,
}

impl EventQueue {
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = mpsc::channel();
        Arc::new(Self {
            sender,
            receiver: Mutex::new(receiver),
        })
    }

    fn receiver(&self) -> MutexGuard<'_, Receiver<DeviceEvent>> {
        self.receiver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Callback to install on a device
    pub fn callback(self: &Arc<Self>) -> impl Fn(DeviceEvent) + Send + Sync + 'static {
        let queue = Arc::clone(self);
        move |event| queue.push(event)
    }

    pub fn push(&self, event: DeviceEvent) {
        // The receiver lives as long as the queue
        let _ = self.sender.send(event);
    }

    /// Take every queued event in arrival order
    pub fn drain(&self) -> Vec<DeviceEvent> {
        self.receiver().try_iter().collect()
    }

    /// Wait up to `timeout` for the next event
    pub fn wait_timeout(&self, timeout: Duration) -> Option<DeviceEvent> {
        self.receiver().recv_timeout(timeout).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_drain_preserves_order() {
        let queue = EventQueue::new();
        let callback = queue.callback();
        callback(DeviceEvent::Ready);
        callback(DeviceEvent::FrameReady {
            buffers_mask: BuffersMask::DEPTH,
        });

        assert_eq!(
            queue.drain(),
            vec![
                DeviceEvent::Ready,
                DeviceEvent::FrameReady {
                    buffers_mask: BuffersMask::DEPTH
                }
            ]
        );
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_wait_timeout_wakes_on_push() {
        let queue = EventQueue::new();
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(DeviceEvent::Ready);
        });

        assert_eq!(
            queue.wait_timeout(Duration::from_secs(5)),
            Some(DeviceEvent::Ready)
        );
        handle.join().unwrap();
        assert_eq!(queue.wait_timeout(Duration::from_millis(10)), None);
    }
}
