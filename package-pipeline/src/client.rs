//! Broker connection establishment
//!
//! Producer and consumer each own their connection and channel; nothing here
//! is shared across components.

use crate::config::MqConfig;
use crate::error::{Error, Result};
use lapin::options::BasicQosOptions;
use lapin::{Channel, Connection, ConnectionProperties};
use tracing::info;

/// Open a connection to the broker
pub async fn connect(config: &MqConfig) -> Result<Connection> {
    let connection = Connection::connect(&config.amqp_url(), ConnectionProperties::default())
        .await
        .map_err(|e| Error::Connection(format!("Failed to connect to RabbitMQ: {}", e)))?;

    info!("Connected to RabbitMQ at {}:{}", config.host, config.port);
    Ok(connection)
}

/// Create a channel with the given prefetch window
pub async fn open_channel(connection: &Connection, prefetch: u16) -> Result<Channel> {
    let channel = connection
        .create_channel()
        .await
        .map_err(|e| Error::Connection(format!("Failed to create channel: {}", e)))?;

    channel
        .basic_qos(prefetch, BasicQosOptions::default())
        .await
        .map_err(|e| Error::Connection(format!("Failed to set prefetch: {}", e)))?;

    Ok(channel)
}
