//! Task queue capability
//!
//! Delivery is at least once: a task stays owned by its consumer until it is
//! acked, and a nack either schedules a redelivery or moves the task to the
//! dead-letter list once `max_attempts` is reached. Enqueueing a task whose
//! de-duplication key is already pending is a no-op.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rudder_types::{EnqueueOptions, Task};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// A task handed to a consumer
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: Uuid,
    pub task: Task,

    /// 1 on first delivery
    pub attempt: u32,

    pub dedupe_key: String,
}

/// What happened to a negatively acknowledged delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued { next_attempt: u32 },
    DeadLettered,
}

/// A task that exhausted its attempts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub task: Task,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Queue capability consumed by the worker loop
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task; returns false if an entry with the same
    /// de-duplication key is already pending
    async fn enqueue(&self, task: Task, options: EnqueueOptions) -> StoreResult<bool>;

    /// Take the next ready task, if any
    async fn dequeue(&self) -> StoreResult<Option<Delivery>>;

    async fn ack(&self, delivery_id: Uuid) -> StoreResult<()>;

    async fn nack(
        &self,
        delivery_id: Uuid,
        error: &str,
        retry_after: Duration,
    ) -> StoreResult<NackOutcome>;

    async fn dead_letters(&self) -> StoreResult<Vec<DeadLetter>>;

    /// Number of pending (not yet delivered) entries
    async fn pending(&self) -> StoreResult<usize>;
}

#[derive(Debug, Clone)]
struct Entry {
    id: Uuid,
    task: Task,
    dedupe_key: String,
    ready_at: Instant,
    attempt: u32,
    seq: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<Entry>,
    in_flight: HashMap<Uuid, Entry>,
    dead: Vec<DeadLetter>,
    seq: u64,
}

impl QueueState {
    /// Insert or merge into an existing pending entry with the same key
    fn push(&mut self, mut entry: Entry) -> bool {
        if let Some(existing) = self
            .pending
            .iter_mut()
            .find(|e| e.dedupe_key == entry.dedupe_key)
        {
            existing.ready_at = existing.ready_at.min(entry.ready_at);
            return false;
        }
        self.seq += 1;
        entry.seq = self.seq;
        self.pending.push(entry);
        true
    }
}

/// In-memory task queue for single-process deployments and tests
#[derive(Debug)]
pub struct InMemoryTaskQueue {
    state: Mutex<QueueState>,
    max_attempts: u32,
}

impl InMemoryTaskQueue {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: Task, options: EnqueueOptions) -> StoreResult<bool> {
        let dedupe_key = options.dedupe_key.unwrap_or_else(|| task.dedupe_key());
        let ready_at = Instant::now() + options.delay.unwrap_or_default();
        let entry = Entry {
            id: Uuid::new_v4(),
            task,
            dedupe_key,
            ready_at,
            attempt: 1,
            seq: 0,
        };

        let mut state = self.state.lock().await;
        let key = entry.dedupe_key.clone();
        let inserted = state.push(entry);
        if !inserted {
            debug!(dedupe_key = %key, "Task already pending, skipped");
        }
        Ok(inserted)
    }

    async fn dequeue(&self) -> StoreResult<Option<Delivery>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let next = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, e)| e.ready_at <= now)
            .min_by_key(|(_, e)| (e.ready_at, e.seq))
            .map(|(index, _)| index);

        let Some(index) = next else {
            return Ok(None);
        };
        let entry = state.pending.swap_remove(index);
        let delivery = Delivery {
            id: entry.id,
            task: entry.task.clone(),
            attempt: entry.attempt,
            dedupe_key: entry.dedupe_key.clone(),
        };
        state.in_flight.insert(entry.id, entry);
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(&delivery_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("Delivery", delivery_id))
    }

    async fn nack(
        &self,
        delivery_id: Uuid,
        error: &str,
        retry_after: Duration,
    ) -> StoreResult<NackOutcome> {
        let mut state = self.state.lock().await;
        let entry = state
            .in_flight
            .remove(&delivery_id)
            .ok_or_else(|| StoreError::not_found("Delivery", delivery_id))?;

        if entry.attempt >= self.max_attempts {
            warn!(
                task = %entry.task,
                attempts = entry.attempt,
                error = %error,
                "Task exhausted its attempts"
            );
            state.dead.push(DeadLetter {
                task: entry.task,
                attempts: entry.attempt,
                error: error.to_string(),
                failed_at: Utc::now(),
            });
            return Ok(NackOutcome::DeadLettered);
        }

        let next_attempt = entry.attempt + 1;
        state.push(Entry {
            id: Uuid::new_v4(),
            ready_at: Instant::now() + retry_after,
            attempt: next_attempt,
            ..entry
        });
        Ok(NackOutcome::Requeued { next_attempt })
    }

    async fn dead_letters(&self) -> StoreResult<Vec<DeadLetter>> {
        Ok(self.state.lock().await.dead.clone())
    }

    async fn pending(&self) -> StoreResult<usize> {
        Ok(self.state.lock().await.pending.len())
    }
}
