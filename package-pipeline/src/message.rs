//! Wire encoding and AMQP message properties
//!
//! The payload is the self-describing JSON map of [`PackageEvent`]; retry
//! state travels out-of-band in the `retry_count` header so the body stays
//! byte-identical across republishes.

use crate::error::Result;
use delivery_core::PackageEvent;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::BasicProperties;

/// Content type carried in properties and headers
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Persistent delivery mode
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Priority assigned to every package message
const MESSAGE_PRIORITY: u8 = 1;

/// Serialize an event to its queue payload
pub fn encode_event(event: &PackageEvent) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(event)?)
}

/// Parse a queue payload as a package event.
///
/// Failure is terminal for the message: a malformed body can never become
/// well-formed by retrying.
pub fn decode_event(payload: &[u8]) -> Result<PackageEvent> {
    Ok(serde_json::from_slice(payload)?)
}

/// Read the retry count header; absent or unreadable means first delivery
pub fn retry_count(headers: Option<&FieldTable>) -> u32 {
    headers
        .and_then(|table| table.inner().get(&ShortString::from("retry_count")))
        .and_then(as_integer)
        .map(|count| count.max(0) as u32)
        .unwrap_or(0)
}

/// Copy the existing headers with `retry_count` set to `next`
pub fn bump_retry_count(headers: Option<&FieldTable>, next: u32) -> FieldTable {
    let mut table = headers.cloned().unwrap_or_default();
    table.insert("retry_count".into(), AMQPValue::LongInt(next as i32));
    table
}

/// Headers attached to a freshly published event
pub fn event_headers(event: &PackageEvent, retry_count: u32) -> FieldTable {
    let mut table = FieldTable::default();
    table.insert(
        "content_type".into(),
        AMQPValue::LongString(CONTENT_TYPE_JSON.into()),
    );
    table.insert(
        "package_id".into(),
        AMQPValue::LongString(event.id.to_string().into()),
    );
    table.insert(
        "created_at".into(),
        AMQPValue::LongString(event.created_at.to_rfc3339().into()),
    );
    table.insert("retry_count".into(), AMQPValue::LongInt(retry_count as i32));
    table
}

/// Properties for a freshly published event: persistent, priority 1,
/// message id equal to the package id, and a per-message TTL
pub fn event_properties(event: &PackageEvent, retry_count: u32, message_ttl_ms: u32) -> BasicProperties {
    base_properties(&event.id.to_string(), message_ttl_ms)
        .with_content_type(CONTENT_TYPE_JSON.into())
        .with_headers(event_headers(event, retry_count))
}

/// Properties for a self-requeued retry: same persistence/priority/TTL, the
/// caller supplies the bumped header table
pub fn republish_properties(
    headers: FieldTable,
    package_id: &str,
    message_ttl_ms: u32,
) -> BasicProperties {
    base_properties(package_id, message_ttl_ms).with_headers(headers)
}

fn base_properties(package_id: &str, message_ttl_ms: u32) -> BasicProperties {
    BasicProperties::default()
        .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
        .with_priority(MESSAGE_PRIORITY)
        .with_message_id(package_id.into())
        .with_expiration(message_ttl_ms.to_string().into())
}

fn as_integer(value: &AMQPValue) -> Option<i64> {
    match value {
        AMQPValue::ShortShortInt(v) => Some(*v as i64),
        AMQPValue::ShortShortUInt(v) => Some(*v as i64),
        AMQPValue::ShortInt(v) => Some(*v as i64),
        AMQPValue::ShortUInt(v) => Some(*v as i64),
        AMQPValue::LongInt(v) => Some(*v as i64),
        AMQPValue::LongUInt(v) => Some(*v as i64),
        AMQPValue::LongLongInt(v) => Some(*v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn sample_event() -> PackageEvent {
        PackageEvent {
            id: Uuid::new_v4(),
            weight: dec!(10),
            value_of_contents_usd: dec!(100),
            created_at: Utc::now(),
        }
    }

    fn header<'a>(table: &'a FieldTable, key: &str) -> Option<&'a AMQPValue> {
        table.inner().get(&ShortString::from(key))
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let event = sample_event();
        let decoded = decode_event(&encode_event(&event).unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_decode_rejects_malformed_body() {
        assert!(decode_event(b"not json").is_err());
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let body = format!(r#"{{"id":"{}","weight":1.5}}"#, Uuid::new_v4());
        assert!(decode_event(body.as_bytes()).is_err());
    }

    #[test]
    fn test_retry_count_defaults_to_zero() {
        assert_eq!(retry_count(None), 0);
        assert_eq!(retry_count(Some(&FieldTable::default())), 0);
    }

    #[test]
    fn test_retry_count_reads_any_integer_encoding() {
        for value in [
            AMQPValue::ShortShortUInt(2),
            AMQPValue::ShortInt(2),
            AMQPValue::LongInt(2),
            AMQPValue::LongLongInt(2),
        ] {
            let mut table = FieldTable::default();
            table.insert("retry_count".into(), value);
            assert_eq!(retry_count(Some(&table)), 2);
        }
    }

    #[test]
    fn test_retry_count_ignores_non_integer_header() {
        let mut table = FieldTable::default();
        table.insert("retry_count".into(), AMQPValue::LongString("two".into()));
        assert_eq!(retry_count(Some(&table)), 0);
    }

    #[test]
    fn test_bump_preserves_other_headers() {
        let event = sample_event();
        let bumped = bump_retry_count(Some(&event_headers(&event, 0)), 1);

        assert_eq!(retry_count(Some(&bumped)), 1);
        assert_eq!(
            header(&bumped, "package_id"),
            Some(&AMQPValue::LongString(event.id.to_string().into()))
        );
    }

    #[test]
    fn test_event_properties_contract() {
        let event = sample_event();
        let properties = event_properties(&event, 0, 3_600_000);

        assert_eq!(properties.delivery_mode(), &Some(2));
        assert_eq!(properties.priority(), &Some(1));
        assert_eq!(
            properties.message_id(),
            &Some(event.id.to_string().into())
        );
        assert_eq!(properties.expiration(), &Some("3600000".into()));

        let headers = properties.headers().as_ref().unwrap();
        assert_eq!(retry_count(Some(headers)), 0);
        assert_eq!(
            header(headers, "content_type"),
            Some(&AMQPValue::LongString(CONTENT_TYPE_JSON.into()))
        );
    }
}
