//! Ordered async queue of canonical messages.
//!
//! A live connection pushes converted messages in; a consumer awaits them
//! one at a time with [`MessageQueue::next`]. Once [`MessageQueue::done`]
//! is called the queue is closed for good:
//!
//! - later `enqueue` calls are ignored (the event feed may deliver a final
//!   line just after the completion signal)
//! - items already queued are still handed out, in order
//! - a consumer that finds the queue empty and closed gets `None`
//!   immediately instead of waiting forever
//!
//! A fresh queue is built for every attach cycle and never reused.
//!
//! # Rust Concept: Notify
//!
//! `tokio::sync::Notify` is a wake-up signal without data. The consumer
//! registers interest with `notified()` *before* checking the queue, so a
//! producer that pushes between the check and the `.await` still wakes it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::message::CanonicalMessage;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<CanonicalMessage>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// FIFO queue with a terminal closed signal.
///
/// Cloning yields another handle to the same queue.
#[derive(Debug, Clone, Default)]
pub struct MessageQueue {
    shared: Arc<Shared>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Returns `false` (and drops the message) if the
    /// queue is already closed.
    pub fn enqueue(&self, message: CanonicalMessage) -> bool {
        {
            let Ok(mut state) = self.shared.state.lock() else {
                return false;
            };
            if state.closed {
                log::debug!("queue closed, dropping late message");
                return false;
            }
            state.items.push_back(message);
        }
        self.shared.notify.notify_one();
        true
    }

    /// Close the queue. Idempotent.
    pub fn done(&self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.closed = true;
        }
        // Wake every parked consumer, and leave a permit for one that is
        // about to park.
        self.shared.notify.notify_waiters();
        self.shared.notify.notify_one();
    }

    /// Wait for the next message. `None` means the queue is closed and
    /// drained.
    pub async fn next(&self) -> Option<CanonicalMessage> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let Ok(mut state) = self.shared.state.lock() else {
                    return None;
                };
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Pop without waiting.
    pub fn try_next(&self) -> Option<CanonicalMessage> {
        self.shared.state.lock().ok()?.items.pop_front()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().map(|s| s.closed).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().map(|s| s.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether two handles point at the same queue.
    pub fn same_queue(&self, other: &MessageQueue) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use std::time::Duration;

    fn msg(text: &str) -> CanonicalMessage {
        CanonicalMessage::with_text(MessageType::Assistant, text)
    }

    #[tokio::test]
    async fn delivers_in_order_then_closes() {
        let queue = MessageQueue::new();
        for i in 0..50 {
            assert!(queue.enqueue(msg(&i.to_string())));
        }
        queue.done();

        let mut seen = Vec::new();
        while let Some(m) = queue.next().await {
            seen.push(m.text());
        }

        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn enqueue_after_done_is_ignored() {
        let queue = MessageQueue::new();
        queue.enqueue(msg("a"));
        queue.done();

        assert!(!queue.enqueue(msg("late")));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await.unwrap().text(), "a");
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn done_unblocks_parked_consumer() {
        let queue = MessageQueue::new();
        let consumer = queue.clone();
        let handle = tokio::spawn(async move { consumer.next().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.done();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("consumer should wake")
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn consumer_wakes_on_enqueue() {
        let queue = MessageQueue::new();
        let consumer = queue.clone();
        let handle = tokio::spawn(async move {
            let mut out = Vec::new();
            while let Some(m) = consumer.next().await {
                out.push(m.text());
            }
            out
        });

        for t in ["x", "y", "z"] {
            tokio::time::sleep(Duration::from_millis(5)).await;
            queue.enqueue(msg(t));
        }
        queue.done();

        let out = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out, vec!["x", "y", "z"]);
    }

    #[test]
    fn done_is_idempotent() {
        let queue = MessageQueue::new();
        queue.done();
        queue.done();
        assert!(queue.is_closed());
        assert!(queue.is_empty());
    }

    #[test]
    fn clones_share_state() {
        let a = MessageQueue::new();
        let b = a.clone();
        a.enqueue(msg("1"));
        assert_eq!(b.try_next().unwrap().text(), "1");
        assert!(a.same_queue(&b));
        assert!(!a.same_queue(&MessageQueue::new()));
    }
}
