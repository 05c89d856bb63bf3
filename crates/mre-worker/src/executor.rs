//! Lifecycle event executor.

use std::sync::Arc;
use std::time::Duration;

use mre_events::{Delivery, RedisEventBus};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::engine::ReplayEngine;
use crate::error::{WorkerError, WorkerResult};
use crate::retry::FailureTracker;

/// What to do with a delivery after the engine ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryDecision {
    Ack,
    /// Leave pending; the event is redelivered after the visibility timeout
    Retry { attempt: u32, max_retries: u32 },
    DeadLetter,
}

/// Decide the fate of a delivery.
///
/// `retry_count` is the attempt counter after this failure was recorded.
/// Errors that cannot succeed on redelivery go straight to the dead-letter
/// stream.
pub fn decide(
    result: &WorkerResult<()>,
    retry_count: u32,
    max_retries: u32,
) -> DeliveryDecision {
    match result {
        Ok(()) => DeliveryDecision::Ack,
        Err(e) if !e.is_retryable() => DeliveryDecision::DeadLetter,
        Err(_) if retry_count >= max_retries => DeliveryDecision::DeadLetter,
        Err(_) => DeliveryDecision::Retry {
            attempt: retry_count,
            max_retries,
        },
    }
}

/// Consumes lifecycle events and runs the engine on each.
pub struct EventExecutor {
    config: WorkerConfig,
    bus: Arc<RedisEventBus>,
    engine: Arc<ReplayEngine>,
    semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl EventExecutor {
    pub fn new(config: WorkerConfig, bus: Arc<RedisEventBus>, engine: ReplayEngine) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_invocations));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("replay-worker-{}", Uuid::new_v4());

        Self {
            config,
            bus,
            engine: Arc::new(engine),
            semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Run until shutdown is signalled.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting event executor '{}' with {} max concurrent invocations",
            self.consumer_name, self.config.max_concurrent_invocations
        );

        self.bus.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = self.spawn_claim_task();

        let mut failures = FailureTracker::new(5);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume() => {
                    match result {
                        Ok(()) => failures.record_success(),
                        Err(e) => {
                            if failures.record_failure() {
                                error!("Error consuming lifecycle events: {}", e);
                            }
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight invocations to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_invocations())
            .await
            .is_err()
        {
            warn!("Shutdown timeout reached with invocations still running");
        }

        info!("Event executor stopped");
        Ok(())
    }

    fn spawn_claim_task(&self) -> tokio::task::JoinHandle<()> {
        let bus = Arc::clone(&self.bus);
        let engine = Arc::clone(&self.engine);
        let semaphore = Arc::clone(&self.semaphore);
        let consumer_name = self.consumer_name.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.claim_interval);
            let mut failures = FailureTracker::new(3);
            let min_idle_ms = config.claim_min_idle.as_millis() as u64;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match bus.claim_pending(&consumer_name, min_idle_ms, 5).await {
                            Ok(deliveries) => {
                                failures.record_success();
                                if !deliveries.is_empty() {
                                    info!("Claimed {} pending lifecycle events", deliveries.len());
                                }
                                for delivery in deliveries {
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        break;
                                    };
                                    let bus = Arc::clone(&bus);
                                    let engine = Arc::clone(&engine);
                                    let timeout = config.invocation_timeout;
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute(engine, bus, delivery, timeout).await;
                                    });
                                }
                            }
                            Err(e) => {
                                if failures.record_failure() {
                                    warn!("Failed to claim pending lifecycle events: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    async fn consume(&self) -> WorkerResult<()> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .bus
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;
        if deliveries.is_empty() {
            return Ok(());
        }
        debug!("Consumed {} lifecycle events", deliveries.len());

        for delivery in deliveries {
            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::configuration("invocation semaphore closed"))?;
            let bus = Arc::clone(&self.bus);
            let engine = Arc::clone(&self.engine);
            let timeout = self.config.invocation_timeout;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute(engine, bus, delivery, timeout).await;
            });
        }
        Ok(())
    }

    /// Run the engine on one delivery, then ack, retry or dead-letter it.
    async fn execute(
        engine: Arc<ReplayEngine>,
        bus: Arc<RedisEventBus>,
        delivery: Delivery,
        timeout: Duration,
    ) {
        let message_id = delivery.message_id.clone();
        let state = delivery.event.state;
        info!(message_id = %message_id, state = %state, "Handling lifecycle event");

        let result = match tokio::time::timeout(timeout, engine.handle(&delivery.event)).await {
            Ok(Ok(outcomes)) => {
                debug!(message_id = %message_id, replays = outcomes.len(), "Lifecycle event handled");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(WorkerError::InvocationTimeout(timeout.as_secs())),
        };

        let retry_count = match result {
            Err(ref e) if e.is_retryable() => match bus.increment_retry(&message_id).await {
                Ok(count) => count,
                Err(redis_err) => {
                    warn!(message_id = %message_id, "Failed to count retry: {}", redis_err);
                    0
                }
            },
            _ => 0,
        };

        match decide(&result, retry_count, bus.max_retries()) {
            DeliveryDecision::Ack => {
                if let Err(e) = bus.ack(&message_id).await {
                    error!(message_id = %message_id, "Failed to ack lifecycle event: {}", e);
                }
            }
            DeliveryDecision::Retry {
                attempt,
                max_retries,
            } => {
                warn!(
                    message_id = %message_id,
                    state = %state,
                    "Lifecycle event failed, will be redelivered (attempt {}/{})",
                    attempt,
                    max_retries
                );
            }
            DeliveryDecision::DeadLetter => {
                let reason = result.err().map(|e| e.to_string()).unwrap_or_default();
                error!(message_id = %message_id, state = %state, "Moving lifecycle event to DLQ: {}", reason);
                if let Err(e) = bus.dlq(&delivery, &reason).await {
                    error!(message_id = %message_id, "Failed to move lifecycle event to DLQ: {}", e);
                }
            }
        }
    }

    async fn wait_for_invocations(&self) {
        while self.semaphore.available_permits() < self.config.max_concurrent_invocations {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_acked() {
        assert_eq!(decide(&Ok(()), 0, 3), DeliveryDecision::Ack);
    }

    #[test]
    fn test_transient_failures_retry_until_limit() {
        let err = || Err(WorkerError::transient_store("s3 throttled"));
        assert_eq!(
            decide(&err(), 1, 3),
            DeliveryDecision::Retry {
                attempt: 1,
                max_retries: 3
            }
        );
        assert_eq!(decide(&err(), 3, 3), DeliveryDecision::DeadLetter);
    }

    #[test]
    fn test_configuration_errors_dead_letter_immediately() {
        let result = Err(WorkerError::configuration("unknown transition"));
        assert_eq!(decide(&result, 0, 3), DeliveryDecision::DeadLetter);
    }

    #[test]
    fn test_timeouts_are_redelivered() {
        let result = Err(WorkerError::InvocationTimeout(900));
        assert!(matches!(decide(&result, 1, 3), DeliveryDecision::Retry { .. }));
    }
}
