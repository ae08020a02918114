// SPDX-License-Identifier: GPL-3.0-only

//! Consumer-side bookkeeping of outstanding frame requests

use crate::types::BuffersMask;

/// Anything that accepts frame requests, normally a [`super::Device`]
pub trait FrameRequestSink {
    fn request_frame(&self, buffers_mask: BuffersMask);
}

/// Pending request mask of one consumer
///
/// Requests only ever widen the pending mask; a request that adds no new
/// bits is not forwarded to the device.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameRequester {
    pending: BuffersMask,
}

impl FrameRequester {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `buffers_mask` into the pending request, forwarding the merged
    /// mask when it changed. Returns whether a request was sent.
    pub fn request<S: FrameRequestSink + ?Sized>(
        &mut self,
        sink: &S,
        buffers_mask: BuffersMask,
    ) -> bool {
        let merged = self.pending | buffers_mask;
        if merged == self.pending {
            return false;
        }
        self.pending = merged;
        sink.request_frame(merged);
        true
    }

    /// Forget bits delivered by a frame-ready event
    pub fn satisfied(&mut self, buffers_mask: BuffersMask) {
        self.pending = self.pending & !buffers_mask;
    }

    pub fn pending(&self) -> BuffersMask {
        self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingSink {
        sent: RefCell<Vec<BuffersMask>>,
    }

    impl FrameRequestSink for RecordingSink {
        fn request_frame(&self, buffers_mask: BuffersMask) {
            self.sent.borrow_mut().push(buffers_mask);
        }
    }

    #[test]
    fn test_repeated_request_is_sent_once() {
        let sink = RecordingSink::default();
        let mut requester = FrameRequester::new();

        assert!(requester.request(&sink, BuffersMask::DEPTH));
        assert!(!requester.request(&sink, BuffersMask::DEPTH));
        assert_eq!(sink.sent.borrow().len(), 1);
    }

    #[test]
    fn test_request_never_downgrades() {
        let sink = RecordingSink::default();
        let mut requester = FrameRequester::new();

        requester.request(&sink, BuffersMask::DEPTH);
        requester.request(&sink, BuffersMask::VIDEO);
        assert_eq!(
            *sink.sent.borrow(),
            vec![BuffersMask::DEPTH, BuffersMask::ALL]
        );
        assert!(!requester.request(&sink, BuffersMask::DEPTH));
    }

    #[test]
    fn test_satisfied_reopens_request() {
        let sink = RecordingSink::default();
        let mut requester = FrameRequester::new();

        requester.request(&sink, BuffersMask::ALL);
        requester.satisfied(BuffersMask::DEPTH);
        assert_eq!(requester.pending(), BuffersMask::VIDEO);
        assert!(requester.request(&sink, BuffersMask::DEPTH));
        assert_eq!(sink.sent.borrow().len(), 2);
    }
}
