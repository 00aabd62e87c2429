//! Broker boundary.
//!
//! The queue is built atop an external persistent broker collaborator that
//! only understands enqueue/dequeue/ack/nack of job ids. This module defines
//! that boundary as a trait plus the in-process implementation used by
//! single-node deployments and tests. Job payloads and state never cross this
//! boundary; the job store is authoritative for both.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown delivery: {0}")]
    UnknownDelivery(Uuid),
}

/// A claimed message. Must be either acked (done) or nacked (redeliver after
/// a delay); a delivery that is never settled is recovered by the queue's
/// stall reaper, not by the broker.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_id: Uuid,
    pub job_id: Uuid,
    pub priority: i32,
}

/// Durable queue broker primitive.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Make a job id visible for dequeue after `delay`. Lower `priority`
    /// numbers dequeue first among ready messages.
    async fn enqueue(&self, job_id: Uuid, priority: i32, delay: Duration)
        -> Result<(), BrokerError>;

    /// Claim the highest-priority ready message, if any.
    async fn dequeue(&self) -> Result<Option<Delivery>, BrokerError>;

    /// Settle a delivery as done.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Return a delivery to the queue, visible again after `delay`.
    async fn nack(&self, delivery: &Delivery, delay: Duration) -> Result<(), BrokerError>;

    /// Resolves when a message may have become ready. A hint, not a
    /// guarantee; consumers still poll.
    async fn notified(&self);
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    job_id: Uuid,
    priority: i32,
    seq: u64,
    ready_at: Instant,
}

#[derive(Default)]
struct MemoryBrokerState {
    ready: Vec<QueuedMessage>,
    in_flight: HashMap<Uuid, QueuedMessage>,
    next_seq: u64,
}

/// In-process broker implementation.
///
/// Stands in for the external persistent broker; the trait is the seam a
/// durable implementation plugs into.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<MemoryBrokerState>,
    notify: Notify,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently visible or scheduled, excluding in-flight ones.
    pub fn backlog(&self) -> usize {
        self.state.lock().map(|s| s.ready.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(
        &self,
        job_id: Uuid,
        priority: i32,
        delay: Duration,
    ) -> Result<(), BrokerError> {
        {
            let mut state = self
                .state
                .lock()
                .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.ready.push(QueuedMessage {
                job_id,
                priority,
                seq,
                ready_at: Instant::now() + delay,
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>, BrokerError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let now = Instant::now();
        let best = state
            .ready
            .iter()
            .enumerate()
            .filter(|(_, m)| m.ready_at <= now)
            .min_by_key(|(_, m)| (m.priority, m.seq))
            .map(|(i, _)| i);

        let Some(index) = best else {
            return Ok(None);
        };

        let message = state.ready.swap_remove(index);
        let delivery = Delivery {
            delivery_id: Uuid::new_v4(),
            job_id: message.job_id,
            priority: message.priority,
        };
        state.in_flight.insert(delivery.delivery_id, message);

        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        state
            .in_flight
            .remove(&delivery.delivery_id)
            .ok_or(BrokerError::UnknownDelivery(delivery.delivery_id))?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, delay: Duration) -> Result<(), BrokerError> {
        {
            let mut state = self
                .state
                .lock()
                .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
            let mut message = state
                .in_flight
                .remove(&delivery.delivery_id)
                .ok_or(BrokerError::UnknownDelivery(delivery.delivery_id))?;
            message.ready_at = Instant::now() + delay;
            state.ready.push(message);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_dequeue_ack() {
        let broker = MemoryBroker::new();
        let job_id = Uuid::new_v4();

        broker.enqueue(job_id, 5, Duration::ZERO).await.unwrap();
        let delivery = broker.dequeue().await.unwrap().unwrap();
        assert_eq!(delivery.job_id, job_id);

        // Claimed message is not visible.
        assert!(broker.dequeue().await.unwrap().is_none());

        broker.ack(&delivery).await.unwrap();
        assert!(broker.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lower_priority_number_dequeues_first() {
        let broker = MemoryBroker::new();
        let low = Uuid::new_v4();
        let high = Uuid::new_v4();

        broker.enqueue(low, 9, Duration::ZERO).await.unwrap();
        broker.enqueue(high, 0, Duration::ZERO).await.unwrap();

        let first = broker.dequeue().await.unwrap().unwrap();
        assert_eq!(first.job_id, high);
        let second = broker.dequeue().await.unwrap().unwrap();
        assert_eq!(second.job_id, low);
    }

    #[tokio::test]
    async fn test_fifo_within_same_priority() {
        let broker = MemoryBroker::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        broker.enqueue(a, 5, Duration::ZERO).await.unwrap();
        broker.enqueue(b, 5, Duration::ZERO).await.unwrap();

        assert_eq!(broker.dequeue().await.unwrap().unwrap().job_id, a);
        assert_eq!(broker.dequeue().await.unwrap().unwrap().job_id, b);
    }

    #[tokio::test]
    async fn test_delayed_message_not_visible_until_ready() {
        let broker = MemoryBroker::new();
        let job_id = Uuid::new_v4();

        broker
            .enqueue(job_id, 5, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(broker.dequeue().await.unwrap().is_none());
        assert_eq!(broker.backlog(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(broker.dequeue().await.unwrap().is_some());
        assert_eq!(broker.backlog(), 0);
    }

    #[tokio::test]
    async fn test_nack_redelivers() {
        let broker = MemoryBroker::new();
        let job_id = Uuid::new_v4();

        broker.enqueue(job_id, 5, Duration::ZERO).await.unwrap();
        let delivery = broker.dequeue().await.unwrap().unwrap();
        broker.nack(&delivery, Duration::ZERO).await.unwrap();

        let redelivered = broker.dequeue().await.unwrap().unwrap();
        assert_eq!(redelivered.job_id, job_id);
        assert_ne!(redelivered.delivery_id, delivery.delivery_id);
    }

    #[tokio::test]
    async fn test_double_ack_is_error() {
        let broker = MemoryBroker::new();
        broker
            .enqueue(Uuid::new_v4(), 5, Duration::ZERO)
            .await
            .unwrap();
        let delivery = broker.dequeue().await.unwrap().unwrap();
        broker.ack(&delivery).await.unwrap();
        assert!(matches!(
            broker.ack(&delivery).await,
            Err(BrokerError::UnknownDelivery(_))
        ));
    }
}
