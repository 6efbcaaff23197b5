//! Side-band response queue.
//!
//! Every channel slot carries one of these: `ALERT` asks the channel
//! to perform its effect and post exactly one reply here, and `AWAIT`
//! polls it non-blockingly.  Single reader, single writer, bounded.

use std::collections::VecDeque;

use tracing::{event, Level};

/// Minimum guaranteed capacity of a response queue.
pub const RESPONSE_LIMIT: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct ResponseQueue {
    items: VecDeque<u32>,
}

impl ResponseQueue {
    /// Enqueue a reply.  A full queue drops the reply; a correctly
    /// cooperating program never outruns the consumer by more than the
    /// queue depth.
    pub fn post(&mut self, value: u32) {
        if self.items.len() >= RESPONSE_LIMIT {
            event!(
                Level::WARN,
                "response queue overflow, dropping {:#010x}",
                value
            );
            return;
        }
        self.items.push_back(value);
    }

    /// Non-blocking receive.
    pub fn take(&mut self) -> Option<u32> {
        self.items.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[test]
fn test_queue_empty() {
    let mut queue = ResponseQueue::default();
    assert!(queue.is_empty());
    assert_eq!(queue.len(), 0);
    assert_eq!(queue.take(), None);
}

#[test]
fn test_queue_fifo_order() {
    let mut queue = ResponseQueue::default();
    queue.post(1);
    queue.post(2);
    queue.post(3);
    assert_eq!(queue.take(), Some(1));
    assert_eq!(queue.take(), Some(2));
    assert_eq!(queue.take(), Some(3));
    assert_eq!(queue.take(), None);
}

#[test]
fn test_queue_overflow_drops() {
    let mut queue = ResponseQueue::default();
    for n in 0..RESPONSE_LIMIT as u32 + 4 {
        queue.post(n);
    }
    assert_eq!(queue.len(), RESPONSE_LIMIT);
    assert_eq!(queue.take(), Some(0));
}
