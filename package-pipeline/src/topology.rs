//! Exchange, queue, and dead-letter topology
//!
//! Declared identically by producer and consumer on connect. Declarations
//! are idempotent; a broker rejection (argument mismatch with a pre-existing
//! object) is fatal and tears the connection down.

use crate::error::{Error, Result};
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};
use tracing::debug;

/// Primary exchange for package events
pub const PACKAGES_EXCHANGE: &str = "packages_exchange";

/// Primary processing queue
pub const PACKAGE_QUEUE: &str = "package_processing";

/// Routing key binding the primary queue to the primary exchange
pub const PACKAGE_ROUTING_KEY: &str = "package.process";

/// Dead-letter exchange
pub const DEAD_LETTER_EXCHANGE: &str = "packages_dlx";

/// Dead-letter queue; also the dead-letter routing key
pub const DEAD_LETTER_QUEUE: &str = "failed_packages";

/// Arguments for the primary queue: per-queue TTL plus the dead-letter
/// binding expired and rejected messages follow
pub fn queue_arguments(message_ttl_ms: u32) -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        "x-message-ttl".into(),
        AMQPValue::LongInt(message_ttl_ms as i32),
    );
    arguments.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(DEAD_LETTER_EXCHANGE.into()),
    );
    arguments.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(DEAD_LETTER_QUEUE.into()),
    );
    arguments
}

/// Declare both exchanges, both queues, and their bindings.
///
/// Safe to call once per connection; returns only after the broker confirms
/// every declaration, or fails with a topology error on the first rejection
/// (the caller drops the connection, so no partial state is kept alive).
pub async fn ensure_topology(channel: &Channel, message_ttl_ms: u32) -> Result<()> {
    let durable = ExchangeDeclareOptions {
        durable: true,
        ..Default::default()
    };

    channel
        .exchange_declare(
            PACKAGES_EXCHANGE,
            ExchangeKind::Direct,
            durable,
            FieldTable::default(),
        )
        .await
        .map_err(|e| Error::Topology(format!("declare {}: {}", PACKAGES_EXCHANGE, e)))?;

    channel
        .queue_declare(
            PACKAGE_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            queue_arguments(message_ttl_ms),
        )
        .await
        .map_err(|e| Error::Topology(format!("declare {}: {}", PACKAGE_QUEUE, e)))?;

    channel
        .queue_bind(
            PACKAGE_QUEUE,
            PACKAGES_EXCHANGE,
            PACKAGE_ROUTING_KEY,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| Error::Topology(format!("bind {}: {}", PACKAGE_QUEUE, e)))?;

    channel
        .exchange_declare(
            DEAD_LETTER_EXCHANGE,
            ExchangeKind::Direct,
            durable,
            FieldTable::default(),
        )
        .await
        .map_err(|e| Error::Topology(format!("declare {}: {}", DEAD_LETTER_EXCHANGE, e)))?;

    channel
        .queue_declare(
            DEAD_LETTER_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| Error::Topology(format!("declare {}: {}", DEAD_LETTER_QUEUE, e)))?;

    channel
        .queue_bind(
            DEAD_LETTER_QUEUE,
            DEAD_LETTER_EXCHANGE,
            DEAD_LETTER_QUEUE,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| Error::Topology(format!("bind {}: {}", DEAD_LETTER_QUEUE, e)))?;

    debug!("Topology declared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::ShortString;

    fn argument<'a>(arguments: &'a FieldTable, key: &str) -> Option<&'a AMQPValue> {
        arguments.inner().get(&ShortString::from(key))
    }

    #[test]
    fn test_queue_arguments_carry_ttl_and_dead_letter_binding() {
        let arguments = queue_arguments(3_600_000);

        assert_eq!(arguments.inner().len(), 3);
        assert_eq!(
            argument(&arguments, "x-message-ttl"),
            Some(&AMQPValue::LongInt(3_600_000))
        );
        assert_eq!(
            argument(&arguments, "x-dead-letter-exchange"),
            Some(&AMQPValue::LongString("packages_dlx".into()))
        );
        assert_eq!(
            argument(&arguments, "x-dead-letter-routing-key"),
            Some(&AMQPValue::LongString("failed_packages".into()))
        );
    }
}
