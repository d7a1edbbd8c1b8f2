//! In-process task broker: named FIFO queues with blocking pop, plus
//! fan-out pub/sub channels.
//!
//! Queues hand each payload to exactly one consumer. Pub/sub channels
//! deliver to every current subscriber and keep nothing for late joiners.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify};

const CHANNEL_CAPACITY: usize = 64;

/// Queue name carrying serialized task payloads.
pub const CHECK_TASKS_QUEUE: &str = "check_tasks";
/// Pub/sub channel for task progress updates.
pub const TASK_PROGRESS_CHANNEL: &str = "task_progress";
/// Pub/sub channel for result notifications.
pub const CHECK_RESULTS_CHANNEL: &str = "check_results";

struct QueueSlot {
    items: VecDeque<Vec<u8>>,
    notify: Arc<Notify>,
}

impl QueueSlot {
    fn new() -> Self {
        Self {
            items: VecDeque::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

pub struct Broker {
    queues: Mutex<HashMap<String, QueueSlot>>,
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Append a payload to the tail of `queue`.
    pub async fn push(&self, queue: &str, payload: Vec<u8>) {
        let mut queues = self.queues.lock().await;
        let slot = queues
            .entry(queue.to_string())
            .or_insert_with(QueueSlot::new);
        slot.items.push_back(payload);
        slot.notify.notify_one();
    }

    /// Pop the head of `queue`, waiting up to `timeout` for a payload.
    /// Returns `None` when the window closes empty.
    pub async fn pop(&self, queue: &str, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notify = {
                let mut queues = self.queues.lock().await;
                let slot = queues
                    .entry(queue.to_string())
                    .or_insert_with(QueueSlot::new);
                if let Some(payload) = slot.items.pop_front() {
                    return Some(payload);
                }
                slot.notify.clone()
            };

            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep_until(deadline) => return None,
            }
        }
    }

    /// Current number of payloads waiting in `queue`.
    pub async fn len(&self, queue: &str) -> usize {
        let queues = self.queues.lock().await;
        queues.get(queue).map_or(0, |slot| slot.items.len())
    }

    pub async fn is_empty(&self, queue: &str) -> bool {
        self.len(queue).await == 0
    }

    /// Publish a message to every current subscriber of `channel`.
    /// Messages sent with no subscribers are dropped.
    pub async fn publish(&self, channel: &str, message: Vec<u8>) {
        let mut channels = self.channels.lock().await;
        let sender = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        let _ = sender.send(message);
    }

    /// Subscribe to `channel`; receives messages published after this call.
    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_is_fifo() {
        let broker = Broker::new();
        broker.push("q", b"first".to_vec()).await;
        broker.push("q", b"second".to_vec()).await;

        assert_eq!(broker.len("q").await, 2);
        assert_eq!(
            broker.pop("q", Duration::from_millis(10)).await,
            Some(b"first".to_vec())
        );
        assert_eq!(
            broker.pop("q", Duration::from_millis(10)).await,
            Some(b"second".to_vec())
        );
        assert!(broker.is_empty("q").await);
    }

    #[tokio::test]
    async fn pop_times_out_on_empty_queue() {
        let broker = Broker::new();
        let start = tokio::time::Instant::now();
        let popped = broker.pop("empty", Duration::from_millis(50)).await;
        assert!(popped.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn blocked_pop_wakes_on_push() {
        let broker = Arc::new(Broker::new());

        let consumer = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.pop("q", Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.push("q", b"payload".to_vec()).await;

        let popped = consumer.await.unwrap();
        assert_eq!(popped, Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn each_payload_goes_to_exactly_one_consumer() {
        let broker = Arc::new(Broker::new());
        broker.push("q", b"only".to_vec()).await;

        let a = broker.pop("q", Duration::from_millis(20)).await;
        let b = broker.pop("q", Duration::from_millis(20)).await;
        assert_eq!(a, Some(b"only".to_vec()));
        assert_eq!(b, None);
    }

    #[tokio::test]
    async fn pubsub_fans_out_to_all_subscribers() {
        let broker = Broker::new();
        let mut rx1 = broker.subscribe("events").await;
        let mut rx2 = broker.subscribe("events").await;

        broker.publish("events", b"hello".to_vec()).await;

        assert_eq!(rx1.recv().await.unwrap(), b"hello".to_vec());
        assert_eq!(rx2.recv().await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let broker = Broker::new();
        broker.publish("silent", b"noop".to_vec()).await;
        // A later subscriber must not see the earlier message.
        let mut rx = broker.subscribe("silent").await;
        broker.publish("silent", b"second".to_vec()).await;
        assert_eq!(rx.recv().await.unwrap(), b"second".to_vec());
    }
}
