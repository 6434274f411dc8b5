use uuid::Uuid;

/// Deterministic idempotency key for a payment capture.
///
/// The key is derived from the Payment id alone, so a retried capture for
/// the same Payment presents the same key and the gateway deduplicates the
/// charge.
pub fn capture_key(payment_id: Uuid) -> String {
    format!("cap_{}", payment_id.simple())
}

/// Deterministic idempotency key for a refund.
///
/// Scoped to both the Payment and the specific PaymentRefund record, so two
/// distinct partial refunds against the same Payment carry distinct keys
/// while a retry of either carries the original key.
pub fn refund_key(payment_id: Uuid, refund_id: Uuid) -> String {
    format!("ref_{}_{}", payment_id.simple(), refund_id.simple())
}
