//! Task workers
//!
//! Each worker pulls from the shared task queue and runs one task at a time
//! under a time budget. Retryable failures and timeouts are nacked for
//! redelivery; anything else is acked and dropped after logging.

use crate::config::WorkerConfig;
use rudder_control::ControlPlane;
use rudder_store::{Delivery, NackOutcome, StoreResult};
use rudder_types::{EventSource, RudderEvent};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// How one delivery ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Requeued,
    Dropped,
    DeadLettered,
}

pub struct Worker {
    control: Arc<ControlPlane>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(control: Arc<ControlPlane>, config: WorkerConfig) -> Self {
        Self { control, config }
    }

    /// Process the next ready task; `None` when the queue had nothing ready
    pub async fn run_once(&self) -> StoreResult<Option<TaskOutcome>> {
        let queue = self.control.queue();
        let Some(delivery) = queue.dequeue().await? else {
            return Ok(None);
        };

        let budget = self.config.task_timeout();
        let failure = match timeout(budget, self.control.handle_task(&delivery.task)).await {
            Ok(Ok(())) => {
                queue.ack(delivery.id).await?;
                debug!(task = %delivery.task, attempt = delivery.attempt, "Task completed");
                return Ok(Some(TaskOutcome::Completed));
            }
            Ok(Err(e)) if !e.is_retryable() => {
                warn!(
                    task = %delivery.task,
                    attempt = delivery.attempt,
                    error = %e,
                    "Task failed permanently, dropping"
                );
                queue.ack(delivery.id).await?;
                return Ok(Some(TaskOutcome::Dropped));
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}s", budget.as_secs()),
        };

        self.retry(delivery, &failure).await.map(Some)
    }

    async fn retry(&self, delivery: Delivery, failure: &str) -> StoreResult<TaskOutcome> {
        let outcome = self
            .control
            .queue()
            .nack(delivery.id, failure, self.config.requeue_delay())
            .await?;
        match outcome {
            NackOutcome::Requeued { next_attempt } => {
                warn!(
                    task = %delivery.task,
                    attempt = delivery.attempt,
                    next_attempt,
                    error = failure,
                    "Task failed, requeued"
                );
                Ok(TaskOutcome::Requeued)
            }
            NackOutcome::DeadLettered => {
                error!(
                    task = %delivery.task,
                    kind = delivery.task.kind(),
                    dedupe_key = %delivery.dedupe_key,
                    attempts = delivery.attempt,
                    error = failure,
                    "Task dead-lettered"
                );
                self.control.events().emit(
                    RudderEvent::TaskDeadLettered {
                        task: delivery.task.to_string(),
                        error: failure.to_string(),
                    },
                    EventSource::Worker,
                    None,
                );
                Ok(TaskOutcome::DeadLettered)
            }
        }
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id, "Worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(worker_id, error = %e, "Task queue unavailable"),
            }
            tokio::select! {
                _ = sleep(self.config.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(worker_id, "Worker stopped");
    }
}

/// Start `config.concurrency` workers over one control plane
pub fn spawn_workers(
    control: Arc<ControlPlane>,
    config: &WorkerConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..config.concurrency.max(1))
        .map(|worker_id| {
            let worker = Worker::new(control.clone(), config.clone());
            tokio::spawn(worker.run(worker_id, shutdown.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_control::ControlPlaneBuilder;
    use rudder_store::{InMemoryTaskQueue, TaskQueue};
    use rudder_types::{EnqueueOptions, JobId, SystemId, Task};
    use std::time::Duration;

    fn worker(max_attempts: u32) -> (Worker, Arc<InMemoryTaskQueue>) {
        let queue = Arc::new(InMemoryTaskQueue::new(max_attempts));
        let control = ControlPlaneBuilder::new().with_queue(queue.clone()).build();
        let config = WorkerConfig {
            requeue_delay_ms: 0,
            ..Default::default()
        };
        (Worker::new(Arc::new(control), config), queue)
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let (worker, _) = worker(3);
        assert_eq!(worker.run_once().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_dropped() {
        let (worker, queue) = worker(3);
        queue
            .enqueue(
                Task::DispatchJob {
                    job_id: JobId::generate(),
                },
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(worker.run_once().await.unwrap(), Some(TaskOutcome::Dropped));
        assert_eq!(queue.pending().await.unwrap(), 0);
        assert!(queue.dead_letters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failures_exhaust_into_dead_letters() {
        let (worker, queue) = worker(2);
        let mut events = worker.control.subscribe_events();
        let delivery_task = Task::ResolveReleaseTargets {
            system_id: SystemId::generate(),
        };
        queue
            .enqueue(delivery_task.clone(), EnqueueOptions::default())
            .await
            .unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(
            worker.retry(first, "store offline").await.unwrap(),
            TaskOutcome::Requeued
        );
        let second = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        assert_eq!(
            worker.retry(second, "store offline").await.unwrap(),
            TaskOutcome::DeadLettered
        );

        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].task, delivery_task);
        assert_eq!(dead[0].error, "store offline");

        let envelope = events.recv().await.unwrap();
        assert!(matches!(
            envelope.event,
            RudderEvent::TaskDeadLettered { ref error, .. } if error == "store offline"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_stop_on_shutdown() {
        let (worker, _) = worker(3);
        let control = worker.control.clone();
        let config = WorkerConfig {
            concurrency: 2,
            ..Default::default()
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = spawn_workers(control, &config, shutdown_rx);
        assert_eq!(handles.len(), 2);

        sleep(Duration::from_secs(1)).await;
        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
