use async_trait::async_trait;
use plaza_shared::pii::Masked;
use plaza_shared::Money;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CoreResult;

/// Gateway-side view of a charge or refund.
///
/// `Pending` means the processor accepted the request but has not settled
/// it; silence or timeout is also mapped here, never to `Failed`, because
/// assuming failure risks a double charge on retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayStatus {
    Completed,
    Pending,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeOutcome {
    pub external_txn_id: String,
    pub status: GatewayStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundOutcome {
    pub external_refund_id: String,
    pub status: GatewayStatus,
}

/// Contract with the external payment processor.
///
/// Both operations are idempotent keyed by the caller-supplied key: the
/// gateway must treat a repeated key as the same request and return the
/// original outcome instead of moving money twice.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn capture(
        &self,
        payment_id: Uuid,
        amount: &Money,
        method_token: &Masked<String>,
        idempotency_key: &str,
    ) -> CoreResult<ChargeOutcome>;

    async fn refund(
        &self,
        payment_id: Uuid,
        external_txn_id: &str,
        amount: &Money,
        idempotency_key: &str,
    ) -> CoreResult<RefundOutcome>;
}
