//! Package records and the queue event payload

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored package record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    /// Package ID
    pub id: Uuid,

    /// Weight in kilograms
    pub weight: Decimal,

    /// Declared value of contents, USD
    pub value_of_contents_usd: Decimal,

    /// Computed delivery cost in RUB, written back by the worker
    pub delivery_cost_rub: Option<Decimal>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Event payload carried on the processing queue.
///
/// Immutable once published; retries re-publish the same body with only the
/// `retry_count` header incremented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageEvent {
    /// Package ID, correlated with the stored record
    pub id: Uuid,

    /// Weight in kilograms
    pub weight: Decimal,

    /// Declared value of contents, USD
    pub value_of_contents_usd: Decimal,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl PackageEvent {
    /// Build the event for a freshly created package
    pub fn from_package(package: &Package) -> Self {
        Self {
            id: package.id,
            weight: package.weight,
            value_of_contents_usd: package.value_of_contents_usd,
            created_at: package.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_package() -> Package {
        Package {
            id: Uuid::new_v4(),
            weight: dec!(2.5),
            value_of_contents_usd: dec!(120),
            delivery_cost_rub: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_event_from_package() {
        let package = sample_package();
        let event = PackageEvent::from_package(&package);

        assert_eq!(event.id, package.id);
        assert_eq!(event.weight, package.weight);
        assert_eq!(event.value_of_contents_usd, package.value_of_contents_usd);
    }

    #[test]
    fn test_event_serialization_round_trip() {
        let event = PackageEvent::from_package(&sample_package());

        let bytes = serde_json::to_vec(&event).unwrap();
        let decoded: PackageEvent = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded, event);
    }

    #[test]
    fn test_event_payload_is_self_describing() {
        let event = PackageEvent::from_package(&sample_package());

        let value: serde_json::Value =
            serde_json::from_slice(&serde_json::to_vec(&event).unwrap()).unwrap();

        assert_eq!(value["id"], event.id.to_string());
        assert!(value.get("weight").is_some());
        assert!(value.get("value_of_contents_usd").is_some());
        assert!(value.get("created_at").is_some());
    }
}
