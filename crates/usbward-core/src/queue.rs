//! Bounded inbound message queue.
//!
//! Decoded records wait here between the receive step and the drain/dispatch
//! step of the session loop. The transport delivers one record per receive
//! and the loop drains after every receive, so the queue normally holds at
//! most one entry; the capacity headroom exists so a future multi-producer
//! transport needs no protocol change.
//!
//! # Invariants
//!
//! - [INV-QUEUE-001] Capacity is fixed at [`QUEUE_CAPACITY`]; a push against
//!   a full queue fails and never overwrites.
//! - [INV-QUEUE-002] Drain yields messages in arrival order and leaves the
//!   queue empty.

use std::collections::VecDeque;

use thiserror::Error;

use crate::wire::Message;

/// Maximum queued messages.
pub const QUEUE_CAPACITY: usize = 10;

/// A push was rejected because the queue already holds
/// [`QUEUE_CAPACITY`] messages. The caller logs and drops the message.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("message queue is full (capacity {QUEUE_CAPACITY})")]
pub struct QueueFull;

/// Bounded FIFO of decoded messages.
///
/// Single-producer, single-consumer within one session; not synchronized.
#[derive(Debug, Default)]
pub struct MessageQueue {
    entries: VecDeque<Message>,
}

impl MessageQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(QUEUE_CAPACITY),
        }
    }

    /// Appends a message.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] once the queue holds [`QUEUE_CAPACITY`]
    /// messages; the queue is unchanged.
    pub fn push(&mut self, message: Message) -> Result<(), QueueFull> {
        if self.entries.len() >= QUEUE_CAPACITY {
            return Err(QueueFull);
        }
        self.entries.push_back(message);
        Ok(())
    }

    /// Removes and returns all queued messages in arrival order.
    pub fn drain(&mut self) -> Vec<Message> {
        self.entries.drain(..).collect()
    }

    /// Discards all queued messages.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Message;

    fn numbered(config_num: u8) -> Message {
        let mut message = Message::bye();
        message.config_num = config_num;
        message
    }

    #[test]
    fn push_rejects_the_eleventh_message() {
        let mut queue = MessageQueue::new();
        for index in 0..QUEUE_CAPACITY {
            queue.push(numbered(index as u8)).unwrap();
        }
        assert_eq!(queue.len(), QUEUE_CAPACITY);
        assert_eq!(queue.push(numbered(10)), Err(QueueFull));
        assert_eq!(queue.len(), QUEUE_CAPACITY);
    }

    #[test]
    fn drain_preserves_arrival_order_and_empties() {
        let mut queue = MessageQueue::new();
        for index in 0..4u8 {
            queue.push(numbered(index)).unwrap();
        }
        let drained = queue.drain();
        assert_eq!(
            drained.iter().map(|m| m.config_num).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn push_succeeds_after_drain() {
        let mut queue = MessageQueue::new();
        for index in 0..QUEUE_CAPACITY {
            queue.push(numbered(index as u8)).unwrap();
        }
        queue.drain();
        assert!(queue.push(numbered(0)).is_ok());
    }

    #[test]
    fn clear_discards_everything() {
        let mut queue = MessageQueue::new();
        queue.push(numbered(1)).unwrap();
        queue.push(numbered(2)).unwrap();
        queue.clear();
        assert!(queue.is_empty());
    }
}
