//! At-least-once background execution of optimization jobs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::engine::RouteOptimizationEngine;
use crate::error::{ErrorKind, OptimizeError, QueueError};
use crate::job::JobId;
use crate::traits::{DistanceProvider, JobQueue, Store};

/// One queued execution of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub job_id: JobId,
    /// 1-based.
    pub attempt: u32,
    /// Wait before processing.
    pub delay: Duration,
}

impl Delivery {
    pub fn first(job_id: JobId) -> Self {
        Self {
            job_id,
            attempt: 1,
            delay: Duration::ZERO,
        }
    }

    fn retry(self, delay: Duration) -> Self {
        Self {
            job_id: self.job_id,
            attempt: self.attempt + 1,
            delay,
        }
    }
}

/// FIFO in-process queue.
///
/// Once closed it refuses new deliveries but still hands out queued ones.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    deliveries: Mutex<VecDeque<Delivery>>,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<Delivery>>, QueueError> {
        self.deliveries.lock().map_err(|_| QueueError::Closed)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pop(&self) -> Option<Delivery> {
        self.lock().ok()?.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobQueue for MemoryQueue {
    fn enqueue(&self, delivery: Delivery) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        self.lock()?.push_back(delivery);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total executions allowed, first attempt included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the attempt following `attempt`: base × factor^(attempt − 1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.base_delay_ms as f64 * self.factor.powi(exponent);
        Duration::from_millis(millis.round() as u64)
    }

    pub fn is_final(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Completed,
    /// The job was already terminal.
    Skipped,
    /// The job or its account no longer exists.
    Discarded,
    /// Re-enqueued as the given attempt.
    Retried { next_attempt: u32 },
    Failed,
}

/// Pulls deliveries off a [`MemoryQueue`] and runs them through the engine.
pub struct Worker<S, P> {
    engine: Arc<RouteOptimizationEngine<S, P>>,
    queue: Arc<MemoryQueue>,
    policy: RetryPolicy,
}

impl<S: Store, P: DistanceProvider> Worker<S, P> {
    pub fn new(
        engine: Arc<RouteOptimizationEngine<S, P>>,
        queue: Arc<MemoryQueue>,
        policy: RetryPolicy,
    ) -> Self {
        Self { engine, queue, policy }
    }

    pub fn process(&self, delivery: Delivery) -> DeliveryOutcome {
        if !delivery.delay.is_zero() {
            std::thread::sleep(delivery.delay);
        }

        let final_attempt = self.policy.is_final(delivery.attempt);
        match self.engine.perform(delivery.job_id, final_attempt) {
            Ok(Some(_)) => DeliveryOutcome::Completed,
            Ok(None) => DeliveryOutcome::Skipped,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(job_id = %delivery.job_id, error = %err, "discarding delivery");
                DeliveryOutcome::Discarded
            }
            Err(err) if err.is_retryable() && !final_attempt => {
                let next = delivery.retry(self.policy.delay_for(delivery.attempt));
                match self.queue.enqueue(next) {
                    Ok(()) => {
                        debug!(
                            job_id = %delivery.job_id,
                            next_attempt = next.attempt,
                            delay_ms = next.delay.as_millis() as u64,
                            "re-enqueued"
                        );
                        DeliveryOutcome::Retried {
                            next_attempt: next.attempt,
                        }
                    }
                    Err(queue_err) => {
                        warn!(
                            job_id = %delivery.job_id,
                            error = %queue_err,
                            "could not re-enqueue job"
                        );
                        let reason = OptimizeError::from(queue_err);
                        let abandoned = self.engine.abandon_job(delivery.job_id, &reason);
                        if let Err(abandon_err) = abandoned {
                            error!(
                                job_id = %delivery.job_id,
                                error = %abandon_err.describe(),
                                "could not fail job after re-enqueue error"
                            );
                        }
                        DeliveryOutcome::Failed
                    }
                }
            }
            Err(_) => DeliveryOutcome::Failed,
        }
    }

    /// Processes deliveries until the queue is empty, retries included.
    pub fn drain(&self) -> Vec<(Delivery, DeliveryOutcome)> {
        let mut processed = Vec::new();
        while let Some(delivery) = self.queue.pop() {
            let outcome = self.process(delivery);
            processed.push((delivery, outcome));
        }
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            base_delay_ms: 100,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert!(!policy.is_final(2));
        assert!(policy.is_final(3));
    }

    #[test]
    fn queue_is_fifo() {
        let queue = MemoryQueue::new();
        queue.enqueue(Delivery::first(JobId(1))).unwrap();
        queue.enqueue(Delivery::first(JobId(2))).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().map(|d| d.job_id), Some(JobId(1)));
        assert_eq!(queue.pop().map(|d| d.job_id), Some(JobId(2)));
        assert!(queue.is_empty());
    }

    #[test]
    fn closed_queue_refuses_but_drains() {
        let queue = MemoryQueue::new();
        queue.enqueue(Delivery::first(JobId(1))).unwrap();
        queue.close();

        assert_eq!(queue.enqueue(Delivery::first(JobId(2))), Err(QueueError::Closed));
        assert_eq!(queue.pop().map(|d| d.job_id), Some(JobId(1)));
        assert!(queue.pop().is_none());
    }
}
