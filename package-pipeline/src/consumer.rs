//! Queue consumer and retry/dead-letter state machine
//!
//! One message is in flight at a time (prefetch 1), so a single worker sees
//! deliveries, including its own retries, in FIFO order. Retries are
//! self-requeues: the original is acknowledged and the same body is
//! republished to the processing queue on the default exchange with the
//! retry header bumped. Exhausted and terminal messages are acknowledged and
//! dropped; the queue TTL/dead-letter binding is the disposal path.

use crate::config::{MqConfig, PipelineConfig};
use crate::error::{Error, Result};
use crate::metrics::{PACKAGE_CONSUME_TOTAL, PACKAGE_PROCESS_DURATION};
use crate::retry::{DropReason, RetryAction, RetryPolicy};
use crate::{client, message, topology};
use delivery_core::{compute_cost, CurrencyRateCache, PackageEvent, PackageStore};
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Handle used to request a cooperative stop from another task
#[derive(Clone)]
pub struct StopHandle {
    stop: Arc<Notify>,
}

impl StopHandle {
    /// Ask the consumer to stop after the in-flight message finishes
    pub fn stop(&self) {
        self.stop.notify_one();
    }
}

/// Consumer for the package processing queue
pub struct PackageConsumer {
    mq: MqConfig,
    pipeline: PipelineConfig,
    policy: RetryPolicy,
    store: Arc<dyn PackageStore>,
    rates: Arc<CurrencyRateCache>,
    connection: Option<Connection>,
    channel: Option<Channel>,
    stop: Arc<Notify>,
}

impl PackageConsumer {
    /// Create a disconnected consumer
    pub fn new(
        mq: MqConfig,
        pipeline: PipelineConfig,
        store: Arc<dyn PackageStore>,
        rates: Arc<CurrencyRateCache>,
    ) -> Self {
        let policy = pipeline.retry_policy();

        Self {
            mq,
            pipeline,
            policy,
            store,
            rates,
            connection: None,
            channel: None,
            stop: Arc::new(Notify::new()),
        }
    }

    /// Open the connection, set prefetch, and ensure topology. Idempotent:
    /// an already-connected consumer returns immediately.
    pub async fn connect(&mut self) -> Result<()> {
        if self
            .channel
            .as_ref()
            .is_some_and(|channel| channel.status().connected())
        {
            return Ok(());
        }

        let connection = client::connect(&self.mq).await?;
        let channel = client::open_channel(&connection, self.pipeline.consumer_prefetch).await?;

        topology::ensure_topology(&channel, self.pipeline.message_ttl_ms).await?;

        self.connection = Some(connection);
        self.channel = Some(channel);
        Ok(())
    }

    /// Handle for stopping the consumer from another task
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: self.stop.clone(),
        }
    }

    /// Ask the loop to stop; the in-flight message finishes first
    pub fn stop_consuming(&self) {
        self.stop.notify_one();
    }

    /// Consume deliveries until stopped or the stream ends.
    ///
    /// Per-message failures never crash the loop; transport errors on the
    /// delivery stream are logged and the affected delivery is skipped.
    pub async fn start_consuming(&mut self) -> Result<()> {
        self.connect().await?;

        let channel = self
            .channel
            .clone()
            .ok_or_else(|| Error::Connection("Consumer channel not open".to_string()))?;

        let mut deliveries = channel
            .basic_consume(
                topology::PACKAGE_QUEUE,
                "package-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Connection(format!("Failed to start consuming: {}", e)))?;

        info!("Consuming from {}", topology::PACKAGE_QUEUE);
        let stop = self.stop.clone();

        loop {
            tokio::select! {
                _ = stop.notified() => {
                    info!("Stop requested; leaving the consume loop");
                    break;
                }
                delivery = deliveries.next() => match delivery {
                    Some(Ok(delivery)) => self.handle_delivery(&channel, delivery).await,
                    Some(Err(e)) => {
                        error!("Transport error on delivery stream: {}", e);
                    }
                    None => {
                        warn!("Delivery stream closed by broker");
                        break;
                    }
                },
            }
        }

        if let Err(e) = channel
            .basic_cancel(deliveries.tag().as_str(), BasicCancelOptions::default())
            .await
        {
            warn!("Failed to cancel consumer: {}", e);
        }

        Ok(())
    }

    /// Close the connection; calling twice is a no-op
    pub async fn close(&mut self) -> Result<()> {
        self.channel = None;

        if let Some(connection) = self.connection.take() {
            connection
                .close(200, "consumer shutdown")
                .await
                .map_err(|e| Error::Connection(format!("Failed to close connection: {}", e)))?;
        }

        Ok(())
    }

    /// Resolve one delivery to exactly one of: ack, ack-and-republish,
    /// ack-and-drop, or nack-to-dead-letter on an unexpected failure.
    async fn handle_delivery(&self, channel: &Channel, delivery: Delivery) {
        let event = match message::decode_event(&delivery.data) {
            Ok(event) => event,
            Err(e) => {
                error!("Dropping malformed package message: {}", e);
                self.finish(&delivery, DropReason::Malformed.as_label()).await;
                return;
            }
        };

        let retry_count = message::retry_count(delivery.properties.headers().as_ref());
        info!("Received package {} (retry {})", event.id, retry_count);

        let action = if self.policy.exhausted(retry_count) {
            error!(
                "{}; leaving package {} to the dead-letter backstop",
                Error::RetriesExhausted {
                    attempts: retry_count
                },
                event.id
            );
            RetryAction::Drop(DropReason::RetriesExhausted)
        } else {
            let start = Instant::now();

            match self.process_event(&event).await {
                Ok(()) => {
                    PACKAGE_PROCESS_DURATION.observe(start.elapsed().as_secs_f64());
                    RetryAction::Ack
                }
                Err(e) if e.is_terminal() => {
                    error!("Terminal failure for package {}: {}", event.id, e);
                    RetryAction::Drop(DropReason::Terminal)
                }
                Err(e) => {
                    warn!(
                        "Error while processing package {}, retry {}/{}: {}",
                        event.id,
                        retry_count + 1,
                        self.policy.max_retries,
                        e
                    );
                    self.policy.on_failure(retry_count, false)
                }
            }
        };

        match action {
            RetryAction::Ack => {
                info!("Message for package {} processed", event.id);
                self.finish(&delivery, "succeeded").await;
            }
            RetryAction::Drop(reason) => {
                self.finish(&delivery, reason.as_label()).await;
            }
            RetryAction::Republish { retry_count, delay } => {
                tokio::time::sleep(delay).await;

                match self.republish(channel, &delivery, &event, retry_count).await {
                    Ok(()) => self.finish(&delivery, "retried").await,
                    Err(e) => {
                        // The original was not acknowledged; route it to the
                        // dead-letter path rather than redeliver it unchanged.
                        error!("Failed to republish package {}: {}", event.id, e);
                        PACKAGE_CONSUME_TOTAL
                            .with_label_values(&["handler_failed"])
                            .inc();
                        if let Err(nack_err) = delivery
                            .nack(BasicNackOptions {
                                requeue: false,
                                ..Default::default()
                            })
                            .await
                        {
                            error!("Failed to nack package {}: {}", event.id, nack_err);
                        }
                    }
                }
            }
        }
    }

    /// Fetch the rate, compute the cost, and write it back
    async fn process_event(&self, event: &PackageEvent) -> Result<()> {
        let usd_rate = self.rates.get_rate().await.map_err(Error::Core)?;
        let delivery_cost = compute_cost(event.weight, event.value_of_contents_usd, usd_rate);

        let updated = self
            .store
            .update_delivery_cost(event.id, delivery_cost)
            .await
            .map_err(Error::Core)?;

        match updated {
            Some(_) => {
                info!(
                    "Computed delivery cost for package {}: {} RUB",
                    event.id, delivery_cost
                );
                Ok(())
            }
            None => Err(Error::Core(delivery_core::Error::PackageNotFound(event.id))),
        }
    }

    /// Self-requeue: same body, bumped retry header, published to the
    /// processing queue by name on the default exchange
    async fn republish(
        &self,
        channel: &Channel,
        delivery: &Delivery,
        event: &PackageEvent,
        retry_count: u32,
    ) -> Result<()> {
        let headers =
            message::bump_retry_count(delivery.properties.headers().as_ref(), retry_count);
        let properties = message::republish_properties(
            headers,
            &event.id.to_string(),
            self.pipeline.message_ttl_ms,
        );

        channel
            .basic_publish(
                "",
                topology::PACKAGE_QUEUE,
                BasicPublishOptions::default(),
                &delivery.data,
                properties,
            )
            .await
            .map_err(|e| Error::Publish(e.to_string()))?
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;

        Ok(())
    }

    /// Acknowledge the delivery and record its outcome
    async fn finish(&self, delivery: &Delivery, outcome: &str) {
        PACKAGE_CONSUME_TOTAL.with_label_values(&[outcome]).inc();

        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            error!("Failed to ack delivery {}: {}", delivery.delivery_tag, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use delivery_core::{InMemoryPackageStore, Package, RateSource};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use uuid::Uuid;

    struct FixedRate(Decimal);

    #[async_trait]
    impl RateSource for FixedRate {
        async fn fetch_usd_rate(&self) -> delivery_core::Result<Decimal> {
            Ok(self.0)
        }
    }

    struct UnavailableRate;

    #[async_trait]
    impl RateSource for UnavailableRate {
        async fn fetch_usd_rate(&self) -> delivery_core::Result<Decimal> {
            Err(delivery_core::Error::RateStatus(503))
        }
    }

    fn consumer_with(
        store: Arc<InMemoryPackageStore>,
        source: Arc<dyn RateSource>,
    ) -> PackageConsumer {
        let rates = Arc::new(CurrencyRateCache::new(source, Duration::from_secs(1800)));
        PackageConsumer::new(MqConfig::default(), PipelineConfig::default(), store, rates)
    }

    fn stored_package(id: Uuid) -> Package {
        Package {
            id,
            weight: dec!(10),
            value_of_contents_usd: dec!(100),
            delivery_cost_rub: None,
            created_at: Utc::now(),
        }
    }

    fn event_for(package: &Package) -> PackageEvent {
        PackageEvent::from_package(package)
    }

    #[tokio::test]
    async fn test_process_event_writes_cost_back() {
        let store = Arc::new(InMemoryPackageStore::new());
        let id = Uuid::new_v4();
        let package = stored_package(id);
        store.insert(package.clone()).await;

        let consumer = consumer_with(store.clone(), Arc::new(FixedRate(dec!(90))));
        consumer.process_event(&event_for(&package)).await.unwrap();

        // (10 × 0.5 + 100 × 0.01) × 90 = 540
        assert_eq!(store.get(id).await.unwrap().delivery_cost_rub, Some(dec!(540)));
    }

    #[tokio::test]
    async fn test_missing_package_is_terminal() {
        let store = Arc::new(InMemoryPackageStore::new());
        let package = stored_package(Uuid::new_v4());

        let consumer = consumer_with(store, Arc::new(FixedRate(dec!(90))));
        let err = consumer.process_event(&event_for(&package)).await.unwrap_err();

        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn test_rate_failure_is_retryable() {
        let store = Arc::new(InMemoryPackageStore::new());
        let package = stored_package(Uuid::new_v4());
        store.insert(package.clone()).await;

        let consumer = consumer_with(store.clone(), Arc::new(UnavailableRate));
        let err = consumer.process_event(&event_for(&package)).await.unwrap_err();

        assert!(!err.is_terminal());
        // The failed attempt must not have written anything back.
        assert_eq!(store.get(package.id).await.unwrap().delivery_cost_rub, None);
    }

    #[tokio::test]
    async fn test_stop_handle_is_usable_across_tasks() {
        let store = Arc::new(InMemoryPackageStore::new());
        let consumer = consumer_with(store, Arc::new(FixedRate(dec!(1))));

        let handle = consumer.stop_handle();
        tokio::spawn(async move { handle.stop() }).await.unwrap();

        // The stored permit is observed by the next wait on the stop signal.
        tokio::time::timeout(Duration::from_secs(1), consumer.stop.notified())
            .await
            .unwrap();
    }
}
