//! Persistence and messaging adapters: Postgres repositories for orders,
//! payments, returns and shipments, the Redis inventory reservation
//! service, and the Kafka event producer.

pub mod app_config;
pub mod database;
pub mod events;
pub mod inventory;
pub mod order_repo;
pub mod payment_repo;
pub mod return_repo;
pub mod shipment_repo;

pub use app_config::Config;
pub use database::DbClient;
pub use events::EventProducer;
pub use inventory::RedisInventory;
pub use order_repo::PgOrderRepository;
pub use payment_repo::PgPaymentRepository;
pub use return_repo::PgReturnRepository;
pub use shipment_repo::PgShipmentRepository;

use plaza_core::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub(crate) fn db_err(err: sqlx::Error) -> CoreError {
    CoreError::Internal(format!("database error: {err}"))
}

pub(crate) fn json_err(err: serde_json::Error) -> CoreError {
    CoreError::Internal(format!("serialization error: {err}"))
}

/// Status enums are stored as their SCREAMING_SNAKE_CASE serde names, so
/// the TEXT columns match what the JSON API and event payloads show.
pub(crate) fn encode_status<T: Serialize>(value: &T) -> CoreResult<String> {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => Ok(s),
        Ok(other) => Err(CoreError::Internal(format!(
            "expected string-encoded status, got {other}"
        ))),
        Err(err) => Err(json_err(err)),
    }
}

pub(crate) fn decode_status<T: DeserializeOwned>(raw: &str) -> CoreResult<T> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|err| CoreError::Internal(format!("unrecognized status {raw:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use plaza_order::models::OrderStatus;
    use plaza_order::PaymentStatus;

    #[test]
    fn test_status_round_trips_through_text_columns() {
        assert_eq!(encode_status(&OrderStatus::Packed).unwrap(), "PACKED");
        assert_eq!(
            encode_status(&PaymentStatus::PartiallyRefunded).unwrap(),
            "PARTIALLY_REFUNDED"
        );

        let decoded: OrderStatus = decode_status("SHIPPED").unwrap();
        assert_eq!(decoded, OrderStatus::Shipped);
    }

    #[test]
    fn test_unknown_status_text_is_an_error() {
        let result: CoreResult<OrderStatus> = decode_status("TELEPORTED");
        assert!(result.is_err());
    }
}
