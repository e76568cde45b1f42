//! Bounded client-bound queue.
//!
//! Audio deltas are evicted oldest-first once the queue is full so the
//! client always hears the most recent audio. Control messages are never
//! evicted. They may exceed the capacity up to a hard limit; past that the
//! client is not reading and the outbox closes itself.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::messages::RelayMessageRoute;

/// Default number of queued messages before audio is evicted.
pub const OUTBOX_CAPACITY: usize = 256;

/// Hard limit on queued messages, as a multiple of the capacity.
const OVERFLOW_FACTOR: usize = 2;

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<RelayMessageRoute>,
    closed: bool,
    overflowed: bool,
}

/// Single-consumer queue between a session and its sender task.
#[derive(Debug)]
pub struct Outbox {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
                overflowed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Queue a message. Returns how many audio deltas were dropped to make room.
    pub fn push(&self, route: RelayMessageRoute) -> usize {
        let mut dropped = 0;
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return usize::from(route.is_audio());
            }

            if inner.queue.len() >= self.capacity && route.is_audio() {
                match inner.queue.iter().position(RelayMessageRoute::is_audio) {
                    Some(index) => {
                        inner.queue.remove(index);
                        dropped += 1;
                    }
                    // Full of control messages; the new delta is the oldest audio we have.
                    None => return 1,
                }
            }
            if inner.queue.len() >= self.capacity * OVERFLOW_FACTOR {
                inner.queue.clear();
                inner.closed = true;
                inner.overflowed = true;
                drop(inner);
                self.notify.notify_one();
                return 0;
            }
            inner.queue.push_back(route);
        }
        self.notify.notify_one();
        dropped
    }

    /// Wait for the next message. `None` once closed and drained.
    pub async fn recv(&self) -> Option<RelayMessageRoute> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(route) = inner.queue.pop_front() {
                    return Some(route);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting messages. Queued messages are still delivered.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_one();
    }

    /// Whether the outbox closed itself because the client stopped reading.
    pub fn overflowed(&self) -> bool {
        self.inner.lock().overflowed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::relay::messages::RelayOutgoingMessage;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    fn audio(n: u8) -> RelayMessageRoute {
        RelayMessageRoute::Binary(Bytes::from(vec![0x02, n]))
    }

    fn control() -> RelayMessageRoute {
        RelayMessageRoute::Outgoing(RelayOutgoingMessage::Pong)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let outbox = Outbox::new(4);
        outbox.push(audio(1));
        outbox.push(control());
        outbox.push(audio(2));

        assert_eq!(outbox.recv().await, Some(audio(1)));
        assert_eq!(outbox.recv().await, Some(control()));
        assert_eq!(outbox.recv().await, Some(audio(2)));
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_evicts_oldest_audio() {
        let outbox = Outbox::new(3);
        outbox.push(control());
        outbox.push(audio(1));
        outbox.push(audio(2));

        assert_eq!(outbox.push(audio(3)), 1);
        assert_eq!(outbox.len(), 3);
        assert_eq!(outbox.recv().await, Some(control()));
        assert_eq!(outbox.recv().await, Some(audio(2)));
        assert_eq!(outbox.recv().await, Some(audio(3)));
    }

    #[test]
    fn test_control_never_evicted() {
        let outbox = Outbox::new(2);
        outbox.push(control());
        outbox.push(control());

        assert_eq!(outbox.push(control()), 0);
        assert_eq!(outbox.len(), 3);
        assert_eq!(outbox.push(audio(1)), 1);
        assert_eq!(outbox.len(), 3);
    }

    #[tokio::test]
    async fn test_control_backlog_past_limit_closes() {
        let outbox = Outbox::new(2);
        for _ in 0..4 {
            assert_eq!(outbox.push(control()), 0);
        }
        assert!(!outbox.overflowed());

        outbox.push(control());
        assert!(outbox.overflowed());
        assert!(outbox.is_empty());
        assert_eq!(outbox.recv().await, None);
        assert_eq!(outbox.push(audio(1)), 1);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let outbox = Outbox::new(4);
        outbox.push(control());
        outbox.close();

        assert_eq!(outbox.recv().await, Some(control()));
        assert_eq!(outbox.recv().await, None);
        assert_eq!(outbox.push(audio(1)), 1);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let outbox = Arc::new(Outbox::new(4));
        let consumer = {
            let outbox = outbox.clone();
            tokio::spawn(async move { outbox.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        outbox.push(audio(7));

        let received = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Some(audio(7)));
    }
}
