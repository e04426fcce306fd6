//! Confirmed publishing of package-created events

use crate::config::{MqConfig, PipelineConfig};
use crate::error::{Error, Result};
use crate::metrics::{PACKAGE_PUBLISH_DURATION, PACKAGE_PUBLISH_TOTAL};
use crate::{client, message, topology};
use delivery_core::PackageEvent;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::{Channel, Connection};
use std::time::Instant;
use tracing::{error, info, warn};

/// Publisher for the primary exchange.
///
/// Owns its connection and channel. The channel runs in confirm mode and
/// every publish is `mandatory`, so `publish` resolves `true` only once the
/// broker has taken responsibility for the message.
pub struct PackageProducer {
    mq: MqConfig,
    pipeline: PipelineConfig,
    connection: Option<Connection>,
    channel: Option<Channel>,
}

impl PackageProducer {
    /// Create a disconnected producer; `publish` connects on first use
    pub fn new(mq: MqConfig, pipeline: PipelineConfig) -> Self {
        Self {
            mq,
            pipeline,
            connection: None,
            channel: None,
        }
    }

    /// Open the connection, enter confirm mode, and ensure topology.
    ///
    /// Called implicitly by `publish` when the connection is missing or has
    /// dropped.
    pub async fn connect(&mut self) -> Result<()> {
        let connection = client::connect(&self.mq).await?;
        let channel = client::open_channel(&connection, self.pipeline.producer_prefetch).await?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| Error::Connection(format!("Failed to enable confirms: {}", e)))?;

        topology::ensure_topology(&channel, self.pipeline.message_ttl_ms).await?;

        self.connection = Some(connection);
        self.channel = Some(channel);
        Ok(())
    }

    fn connected_channel(&self) -> Option<Channel> {
        self.channel
            .as_ref()
            .filter(|channel| channel.status().connected())
            .cloned()
    }

    fn reset(&mut self) {
        self.channel = None;
        self.connection = None;
    }

    /// Publish an event to the primary exchange with `retry_count = 0`.
    ///
    /// Returns `Ok(true)` once the broker acknowledges receipt, `Ok(false)`
    /// on a negative acknowledgment or an unroutable return, and `Err` when
    /// the transport fails before a confirmation arrives (the next call
    /// reconnects and re-runs topology).
    pub async fn publish(&mut self, event: &PackageEvent) -> Result<bool> {
        let channel = match self.connected_channel() {
            Some(channel) => channel,
            None => {
                self.connect().await?;
                self.connected_channel()
                    .ok_or_else(|| Error::Connection("Producer channel not open".to_string()))?
            }
        };

        let start = Instant::now();
        let payload = message::encode_event(event)?;
        let properties = message::event_properties(event, 0, self.pipeline.message_ttl_ms);

        let publish = channel
            .basic_publish(
                topology::PACKAGES_EXCHANGE,
                topology::PACKAGE_ROUTING_KEY,
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                &payload,
                properties,
            )
            .await;

        let confirm = match publish {
            Ok(confirm) => confirm,
            Err(e) => {
                self.reset();
                PACKAGE_PUBLISH_TOTAL.with_label_values(&["error"]).inc();
                return Err(Error::Publish(format!(
                    "Failed to publish package {}: {}",
                    event.id, e
                )));
            }
        };

        let confirmation = match confirm.await {
            Ok(confirmation) => confirmation,
            Err(e) => {
                self.reset();
                PACKAGE_PUBLISH_TOTAL.with_label_values(&["error"]).inc();
                return Err(Error::Publish(format!(
                    "Lost connection awaiting confirmation for package {}: {}",
                    event.id, e
                )));
            }
        };

        PACKAGE_PUBLISH_DURATION.observe(start.elapsed().as_secs_f64());

        match confirmation {
            Confirmation::Ack(None) => {
                info!("Package {} published with broker confirmation", event.id);
                PACKAGE_PUBLISH_TOTAL.with_label_values(&["success"]).inc();
                Ok(true)
            }
            Confirmation::Ack(Some(_)) => {
                error!("Package {} returned as unroutable", event.id);
                PACKAGE_PUBLISH_TOTAL.with_label_values(&["returned"]).inc();
                Ok(false)
            }
            Confirmation::Nack(_) => {
                error!("Package {} negatively acknowledged by broker", event.id);
                PACKAGE_PUBLISH_TOTAL.with_label_values(&["nack"]).inc();
                Ok(false)
            }
            Confirmation::NotRequested => {
                warn!(
                    "Package {} published without confirmation mode; treating as unconfirmed",
                    event.id
                );
                PACKAGE_PUBLISH_TOTAL.with_label_values(&["nack"]).inc();
                Ok(false)
            }
        }
    }

    /// Close the connection; calling twice is a no-op
    pub async fn close(&mut self) -> Result<()> {
        self.channel = None;

        if let Some(connection) = self.connection.take() {
            connection
                .close(200, "producer shutdown")
                .await
                .map_err(|e| Error::Connection(format!("Failed to close connection: {}", e)))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_producer_is_disconnected() {
        let producer = PackageProducer::new(MqConfig::default(), PipelineConfig::default());
        assert!(producer.connected_channel().is_none());
    }

    #[tokio::test]
    async fn test_close_without_connection_is_a_noop() {
        let mut producer = PackageProducer::new(MqConfig::default(), PipelineConfig::default());
        assert!(producer.close().await.is_ok());
        assert!(producer.close().await.is_ok());
    }
}
