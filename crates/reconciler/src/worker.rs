use crate::{DispatchState, Dispatcher, Disposition, Shutdown, WorkerError};
use async_trait::async_trait;
use conductor_protocol::Envelope;

/// One delivery of an envelope. `attempt` starts at 1 and grows with every redelivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: u64,
    pub envelope: Envelope,
    pub attempt: u32,
}

/// At-least-once stream of envelopes. The worker decides when a delivery is settled.
#[async_trait]
pub trait EventSource: Send {
    /// Next delivery, or `None` once the source is exhausted.
    async fn next(&mut self) -> Result<Option<Delivery>, WorkerError>;

    async fn ack(&mut self, delivery: Delivery) -> Result<(), WorkerError>;

    async fn redeliver(&mut self, delivery: Delivery) -> Result<(), WorkerError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub delivered: u64,
    pub acknowledged: u64,
    pub redelivered: u64,
    pub rejected: u64,
}

/// Pulls deliveries one at a time and settles each only after its dispatch finished.
pub struct Worker<S> {
    source: S,
    dispatcher: Dispatcher,
    shutdown: Shutdown,
}

impl<S: EventSource> Worker<S> {
    pub fn new(source: S, dispatcher: Dispatcher, shutdown: Shutdown) -> Self {
        Self {
            source,
            dispatcher,
            shutdown,
        }
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Runs until the source is exhausted or shutdown is requested.
    pub async fn run(&mut self) -> Result<WorkerStats, WorkerError> {
        let mut stats = WorkerStats::default();
        let mut shutdown = self.shutdown.clone();

        loop {
            if shutdown.is_triggered() {
                log::info!("shutdown requested, no longer pulling events");
                break;
            }
            let next = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    log::info!("shutdown requested, no longer pulling events");
                    break;
                }
                next = self.source.next() => next?,
            };
            let Some(delivery) = next else {
                log::info!("event source exhausted");
                break;
            };
            stats.delivered += 1;
            log::debug!(
                "delivery {} ({}), attempt {}",
                delivery.id,
                delivery.envelope.event_type,
                delivery.attempt
            );

            let dispatched = self
                .dispatcher
                .dispatch(&delivery.envelope, &self.shutdown)
                .await;
            if matches!(dispatched.state, DispatchState::Rejected(_)) {
                stats.rejected += 1;
            }

            match dispatched.disposition {
                Disposition::Acknowledge => {
                    self.source.ack(delivery).await?;
                    stats.acknowledged += 1;
                }
                Disposition::Redeliver => {
                    log::warn!("handing delivery {} back for redelivery", delivery.id);
                    self.source.redeliver(delivery).await?;
                    stats.redelivered += 1;
                }
            }
        }

        log::info!(
            "worker stopped: {} delivered, {} acknowledged, {} redelivered, {} rejected",
            stats.delivered,
            stats.acknowledged,
            stats.redelivered,
            stats.rejected
        );
        Ok(stats)
    }
}
