use rust_decimal::Decimal;
use uuid::Uuid;

// Payloads emitted to the external notifier. Delivery is fire-and-forget;
// a publish failure never rolls back the transition that produced it.

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderPaidEvent {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub total_amount: Decimal,
    pub currency: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderShippedEvent {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderCancelledEvent {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub reason: String,
    pub refund_enqueued: bool,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct RefundIssuedEvent {
    pub payment_id: Uuid,
    pub refund_id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct ReturnResolvedEvent {
    pub return_request_id: Uuid,
    pub order_id: Uuid,
    pub refund_id: Option<Uuid>,
    pub refund_amount: Option<Decimal>,
    pub timestamp: i64,
}
