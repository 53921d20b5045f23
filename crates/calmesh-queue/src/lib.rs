//! CalMesh Queue - In-process at-least-once delivery
//!
//! A thin mailbox with redelivery: consumers return [`Outcome::Ack`] for
//! permanent results (success or permanent failure) and
//! [`Outcome::Retry`] for transient ones, which re-enqueues the message
//! after an exponential backoff. Messages that exhaust their attempts are
//! dropped with an error log; consumers are idempotent, so the surrounding
//! reconcile pass repairs anything lost there.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use calmesh_types::{CalError, Result};

/// What a consumer decided about one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Done with this message: success or permanent failure
    Ack,
    /// Transient failure; redeliver after backoff
    Retry(String),
}

impl Outcome {
    /// Standard translation of a core error into an ack/retry decision
    pub fn from_error(error: &CalError) -> Self {
        if error.is_retriable() {
            Self::Retry(error.to_string())
        } else {
            Self::Ack
        }
    }
}

/// A queue consumer
#[async_trait]
pub trait Consumer<M: Send + Sync>: Send + Sync {
    async fn handle(&self, message: &M) -> Outcome;
}

/// Redelivery policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    /// Immediate redelivery, for tests
    pub fn fast() -> Self {
        Self {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            max_attempts: 3,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        exp.min(self.max_delay)
    }
}

struct Delivery<M> {
    message: M,
    attempt: u32,
}

/// Producer half of a queue
pub struct Queue<M> {
    tx: mpsc::UnboundedSender<Delivery<M>>,
}

impl<M> Clone for Queue<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M: Send + Sync + 'static> Queue<M> {
    /// Create a queue and its consumer-side runner
    pub fn new() -> (Self, QueueRunner<M>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self { tx: tx.clone() },
            QueueRunner {
                rx,
                redeliver: tx,
            },
        )
    }

    pub fn enqueue(&self, message: M) -> Result<()> {
        self.tx
            .send(Delivery {
                message,
                attempt: 0,
            })
            .map_err(|_| CalError::Storage("queue closed".to_string()))
    }
}

/// Consumer half; spawn it with a consumer to start draining
pub struct QueueRunner<M> {
    rx: mpsc::UnboundedReceiver<Delivery<M>>,
    redeliver: mpsc::UnboundedSender<Delivery<M>>,
}

impl<M: Send + Sync + fmt::Debug + 'static> QueueRunner<M> {
    pub fn spawn(
        mut self,
        name: &'static str,
        consumer: Arc<dyn Consumer<M>>,
        policy: RetryPolicy,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!(queue = name, "Queue runner started");
            while let Some(delivery) = self.rx.recv().await {
                match consumer.handle(&delivery.message).await {
                    Outcome::Ack => {}
                    Outcome::Retry(reason) => {
                        let next_attempt = delivery.attempt + 1;
                        if next_attempt >= policy.max_attempts {
                            error!(
                                queue = name,
                                attempts = next_attempt,
                                reason,
                                message = ?delivery.message,
                                "Dropping message after exhausting retries"
                            );
                            continue;
                        }
                        let delay = policy.delay_for(delivery.attempt);
                        warn!(
                            queue = name,
                            attempt = next_attempt,
                            delay_ms = delay.as_millis() as u64,
                            reason,
                            "Transient failure; redelivering"
                        );
                        let redeliver = self.redeliver.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = redeliver.send(Delivery {
                                message: delivery.message,
                                attempt: next_attempt,
                            });
                        });
                    }
                }
            }
            debug!(queue = name, "Queue runner stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyConsumer {
        calls: AtomicU32,
        fail_first: u32,
        done: mpsc::UnboundedSender<u32>,
    }

    #[async_trait]
    impl Consumer<u32> for FlakyConsumer {
        async fn handle(&self, message: &u32) -> Outcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                Outcome::Retry("transient".to_string())
            } else {
                let _ = self.done.send(*message);
                Outcome::Ack
            }
        }
    }

    #[tokio::test]
    async fn test_delivery_and_ack() {
        let (queue, runner) = Queue::new();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let consumer = Arc::new(FlakyConsumer {
            calls: AtomicU32::new(0),
            fail_first: 0,
            done: done_tx,
        });
        runner.spawn("test", consumer, RetryPolicy::fast());

        queue.enqueue(7).unwrap();
        assert_eq!(done_rx.recv().await, Some(7));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let (queue, runner) = Queue::new();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let consumer = Arc::new(FlakyConsumer {
            calls: AtomicU32::new(0),
            fail_first: 2,
            done: done_tx,
        });
        runner.spawn("test", consumer.clone(), RetryPolicy::fast());

        queue.enqueue(9).unwrap();
        assert_eq!(done_rx.recv().await, Some(9));
        assert_eq!(consumer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_drop() {
        let (queue, runner) = Queue::new();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let consumer = Arc::new(FlakyConsumer {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            done: done_tx,
        });
        runner.spawn("test", consumer.clone(), RetryPolicy::fast());

        queue.enqueue(1).unwrap();
        // Never completes; after max_attempts the message is dropped
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(done_rx.try_recv().is_err());
        assert_eq!(consumer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_outcome_from_error() {
        assert_eq!(
            Outcome::from_error(&CalError::Provider {
                status: 503,
                body: String::new()
            }),
            Outcome::Retry("provider returned status 503: ".to_string())
        );
        assert_eq!(
            Outcome::from_error(&CalError::not_found("canonical event", "evt_x")),
            Outcome::Ack
        );
    }
}
