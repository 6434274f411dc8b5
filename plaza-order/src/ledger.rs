use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use plaza_core::gateway::{GatewayStatus, PaymentGateway};
use plaza_core::{Actor, CoreError, CoreResult};
use plaza_shared::idempotency::{capture_key, refund_key};
use plaza_shared::pii::Masked;
use plaza_shared::Money;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::Order;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    /// Refunds may only be created against a payment that has captured
    /// money to give back.
    pub fn accepts_refunds(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Capture,
    Refund,
}

/// Append-only audit row. One is recorded for every gateway interaction,
/// success or failure, so no financial operation is silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Money,
    pub success: bool,
    pub gateway_reference: Option<String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentTransaction {
    fn record(
        payment_id: Uuid,
        kind: TransactionKind,
        amount: Money,
        success: bool,
        gateway_reference: Option<String>,
        message: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id,
            kind,
            amount,
            success,
            gateway_reference,
            message,
            created_at: Utc::now(),
        }
    }
}

/// One capture against the external gateway for one order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub amount: Money,
    pub payment_method: String,
    pub external_txn_id: Option<String>,
    pub status: PaymentStatus,
    /// Running total of settled refunds; never exceeds `amount`.
    pub refund_amount: Money,
    /// Refunds accepted by the gateway (or awaiting a gateway answer) that
    /// have not settled yet. Reserved against the refundable balance so an
    /// in-flight refund cannot be claimed twice.
    pub pending_refund_amount: Money,
    pub captured_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn for_order(order: &Order, payment_method: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id: order.id,
            customer_id: order.customer_id,
            amount: order.total_amount.clone(),
            payment_method: payment_method.to_string(),
            external_txn_id: None,
            status: PaymentStatus::Pending,
            refund_amount: Money::zero(order.total_amount.currency().clone()),
            pending_refund_amount: Money::zero(order.total_amount.currency().clone()),
            captured_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Capture minus settled and still-outstanding refunds.
    pub fn remaining_refundable(&self) -> CoreResult<Money> {
        let reserved = self.refund_amount.checked_add(&self.pending_refund_amount)?;
        Ok(self.amount.checked_sub(&reserved)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRefund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub order_item_id: Option<Uuid>,
    pub amount: Money,
    pub reason: String,
    pub status: RefundStatus,
    pub processed_by: Option<Actor>,
    pub external_refund_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Bounded retry with exponential backoff, applied only to gateway
/// transience. Validation and permanent rejections are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

#[derive(Debug)]
pub struct CaptureOutcome {
    /// Audit rows produced by this call; the caller persists them
    /// atomically with the payment.
    pub transactions: Vec<PaymentTransaction>,
    /// Whether this call produced a new external charge (false when the
    /// payment was already captured, or is still pending settlement).
    pub charged_now: bool,
}

#[derive(Debug)]
pub struct RefundRecord {
    pub refund: PaymentRefund,
    pub transactions: Vec<PaymentTransaction>,
}

/// Money-movement ledger over the abstract gateway.
///
/// Guarantees: at-most-once capture per Payment, refunds bounded by the
/// captured amount, and an audit transaction for every gateway outcome.
/// The ledger mutates domain values and returns the audit rows; callers
/// persist payment + rows in one storage transaction.
pub struct PaymentLedger {
    gateway: Arc<dyn PaymentGateway>,
    retry: RetryPolicy,
}

impl PaymentLedger {
    pub fn new(gateway: Arc<dyn PaymentGateway>, retry: RetryPolicy) -> Self {
        Self { gateway, retry }
    }

    /// Capture the payment's full amount.
    ///
    /// At-most-once: a payment that already completed returns immediately
    /// without touching the gateway, and in-flight retries reuse the
    /// idempotency key derived from the payment id so the gateway cannot
    /// double-charge. A run out of transient retries leaves the payment
    /// `Processing` for webhook/polling reconciliation -- silence is never
    /// treated as failure.
    pub async fn capture(
        &self,
        payment: &mut Payment,
        method_token: &Masked<String>,
    ) -> CoreResult<CaptureOutcome> {
        match payment.status {
            PaymentStatus::Completed
            | PaymentStatus::Refunded
            | PaymentStatus::PartiallyRefunded => {
                return Ok(CaptureOutcome {
                    transactions: Vec::new(),
                    charged_now: false,
                });
            }
            PaymentStatus::Failed => {
                return Err(CoreError::state_conflict(
                    payment.status,
                    PaymentStatus::Completed,
                ));
            }
            PaymentStatus::Pending | PaymentStatus::Processing => {}
        }

        payment.status = PaymentStatus::Processing;
        payment.updated_at = Utc::now();
        let key = capture_key(payment.id);
        let mut transactions = Vec::new();

        for attempt in 0..self.retry.max_attempts {
            match self
                .gateway
                .capture(payment.id, &payment.amount, method_token, &key)
                .await
            {
                Ok(outcome) => {
                    payment.external_txn_id = Some(outcome.external_txn_id.clone());
                    match outcome.status {
                        GatewayStatus::Completed => {
                            payment.status = PaymentStatus::Completed;
                            payment.captured_at = Some(Utc::now());
                            payment.updated_at = Utc::now();
                            transactions.push(PaymentTransaction::record(
                                payment.id,
                                TransactionKind::Capture,
                                payment.amount.clone(),
                                true,
                                Some(outcome.external_txn_id),
                                None,
                            ));
                            info!(payment_id = %payment.id, "payment captured");
                            return Ok(CaptureOutcome {
                                transactions,
                                charged_now: true,
                            });
                        }
                        GatewayStatus::Pending => {
                            transactions.push(PaymentTransaction::record(
                                payment.id,
                                TransactionKind::Capture,
                                payment.amount.clone(),
                                true,
                                Some(outcome.external_txn_id),
                                Some("accepted by gateway, awaiting settlement".to_string()),
                            ));
                            return Ok(CaptureOutcome {
                                transactions,
                                charged_now: false,
                            });
                        }
                        GatewayStatus::Failed => {
                            payment.status = PaymentStatus::Failed;
                            payment.updated_at = Utc::now();
                            transactions.push(PaymentTransaction::record(
                                payment.id,
                                TransactionKind::Capture,
                                payment.amount.clone(),
                                false,
                                Some(outcome.external_txn_id),
                                Some("rejected by gateway".to_string()),
                            ));
                            return Ok(CaptureOutcome {
                                transactions,
                                charged_now: false,
                            });
                        }
                    }
                }
                Err(CoreError::GatewayTransient(msg)) => {
                    transactions.push(PaymentTransaction::record(
                        payment.id,
                        TransactionKind::Capture,
                        payment.amount.clone(),
                        false,
                        None,
                        Some(msg.clone()),
                    ));
                    warn!(payment_id = %payment.id, attempt, %msg, "transient capture failure");
                    if attempt + 1 < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay_for(attempt)).await;
                    }
                }
                Err(CoreError::GatewayPermanent(msg)) => {
                    payment.status = PaymentStatus::Failed;
                    payment.updated_at = Utc::now();
                    transactions.push(PaymentTransaction::record(
                        payment.id,
                        TransactionKind::Capture,
                        payment.amount.clone(),
                        false,
                        None,
                        Some(msg),
                    ));
                    return Ok(CaptureOutcome {
                        transactions,
                        charged_now: false,
                    });
                }
                Err(other) => return Err(other),
            }
        }

        // Retries exhausted: the charge may or may not exist on the
        // gateway side, so the payment stays Processing until the
        // reconciliation job resolves it.
        warn!(payment_id = %payment.id, "capture retries exhausted, left pending for reconciliation");
        Ok(CaptureOutcome {
            transactions,
            charged_now: false,
        })
    }

    /// Create and execute a refund against a captured payment.
    ///
    /// `amount` defaults to the remaining refundable balance. Requests
    /// that would push cumulative refunds past the captured amount, or
    /// that mix currencies, are rejected before any gateway call.
    pub async fn create_refund(
        &self,
        payment: &mut Payment,
        amount: Option<Money>,
        reason: &str,
        order_item_id: Option<Uuid>,
        processed_by: Option<Actor>,
    ) -> CoreResult<RefundRecord> {
        if !payment.status.accepts_refunds() {
            return Err(CoreError::state_conflict(payment.status, "REFUND"));
        }
        if reason.trim().is_empty() {
            return Err(CoreError::Validation(
                "refund requires a reason".to_string(),
            ));
        }

        let requested = match amount {
            Some(m) => {
                payment.amount.ensure_same_currency(&m)?;
                m
            }
            None => payment.remaining_refundable()?,
        };
        if !requested.is_positive() {
            return Err(CoreError::Validation(
                "refund amount must be positive".to_string(),
            ));
        }
        // Pending refunds hold their amount until reconciliation lands
        // them, so the bound covers settled and outstanding money alike.
        let reserved = payment
            .refund_amount
            .checked_add(&payment.pending_refund_amount)?;
        let projected = reserved.checked_add(&requested)?;
        if projected.amount() > payment.amount.amount() {
            return Err(CoreError::Validation(format!(
                "refund of {} exceeds remaining refundable balance {}",
                requested,
                payment.remaining_refundable()?
            )));
        }
        let external_txn_id = payment.external_txn_id.clone().ok_or_else(|| {
            CoreError::Internal(format!("payment {} completed without gateway id", payment.id))
        })?;

        let mut refund = PaymentRefund {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            order_id: payment.order_id,
            order_item_id,
            amount: requested.clone(),
            reason: reason.to_string(),
            status: RefundStatus::Pending,
            processed_by,
            external_refund_id: None,
            created_at: Utc::now(),
        };
        let key = refund_key(payment.id, refund.id);
        let mut transactions = Vec::new();

        for attempt in 0..self.retry.max_attempts {
            match self
                .gateway
                .refund(payment.id, &external_txn_id, &requested, &key)
                .await
            {
                Ok(outcome) => {
                    refund.external_refund_id = Some(outcome.external_refund_id.clone());
                    match outcome.status {
                        GatewayStatus::Completed => {
                            refund.status = RefundStatus::Completed;
                            payment.refund_amount =
                                payment.refund_amount.checked_add(&requested)?;
                            payment.status = if payment.refund_amount == payment.amount {
                                PaymentStatus::Refunded
                            } else {
                                PaymentStatus::PartiallyRefunded
                            };
                            payment.updated_at = Utc::now();
                            transactions.push(PaymentTransaction::record(
                                payment.id,
                                TransactionKind::Refund,
                                requested.clone(),
                                true,
                                Some(outcome.external_refund_id),
                                None,
                            ));
                            info!(payment_id = %payment.id, refund_id = %refund.id, "refund settled");
                        }
                        GatewayStatus::Pending => {
                            payment.pending_refund_amount =
                                payment.pending_refund_amount.checked_add(&requested)?;
                            payment.updated_at = Utc::now();
                            transactions.push(PaymentTransaction::record(
                                payment.id,
                                TransactionKind::Refund,
                                requested.clone(),
                                true,
                                Some(outcome.external_refund_id),
                                Some("accepted by gateway, awaiting settlement".to_string()),
                            ));
                        }
                        GatewayStatus::Failed => {
                            refund.status = RefundStatus::Failed;
                            transactions.push(PaymentTransaction::record(
                                payment.id,
                                TransactionKind::Refund,
                                requested.clone(),
                                false,
                                Some(outcome.external_refund_id),
                                Some("rejected by gateway".to_string()),
                            ));
                        }
                    }
                    return Ok(RefundRecord {
                        refund,
                        transactions,
                    });
                }
                Err(CoreError::GatewayTransient(msg)) => {
                    transactions.push(PaymentTransaction::record(
                        payment.id,
                        TransactionKind::Refund,
                        requested.clone(),
                        false,
                        None,
                        Some(msg.clone()),
                    ));
                    warn!(payment_id = %payment.id, attempt, %msg, "transient refund failure");
                    if attempt + 1 < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay_for(attempt)).await;
                    }
                }
                Err(CoreError::GatewayPermanent(msg)) => {
                    refund.status = RefundStatus::Failed;
                    transactions.push(PaymentTransaction::record(
                        payment.id,
                        TransactionKind::Refund,
                        requested.clone(),
                        false,
                        None,
                        Some(msg),
                    ));
                    return Ok(RefundRecord {
                        refund,
                        transactions,
                    });
                }
                Err(other) => return Err(other),
            }
        }

        // Exhausted: the refund stays Pending for reconciliation, its
        // amount held so a later request cannot claim the same money.
        payment.pending_refund_amount = payment.pending_refund_amount.checked_add(&requested)?;
        payment.updated_at = Utc::now();
        warn!(payment_id = %payment.id, refund_id = %refund.id, "refund retries exhausted, left pending");
        Ok(RefundRecord {
            refund,
            transactions,
        })
    }

    /// Land a reconciliation outcome (webhook or polling) for a refund
    /// left `Pending`: the held amount either settles or is released, and
    /// an audit transaction records what the gateway finally said.
    pub fn settle_refund(
        &self,
        payment: &mut Payment,
        refund: &mut PaymentRefund,
        outcome: GatewayStatus,
    ) -> CoreResult<PaymentTransaction> {
        if refund.payment_id != payment.id {
            return Err(CoreError::Validation(format!(
                "refund {} does not belong to payment {}",
                refund.id, payment.id
            )));
        }
        if refund.status != RefundStatus::Pending {
            return Err(CoreError::state_conflict(refund.status, outcome));
        }
        let settled = match outcome {
            GatewayStatus::Completed => true,
            GatewayStatus::Failed => false,
            GatewayStatus::Pending => {
                return Err(CoreError::Validation(
                    "reconciliation outcome must be terminal".to_string(),
                ));
            }
        };

        payment.pending_refund_amount =
            payment.pending_refund_amount.checked_sub(&refund.amount)?;
        payment.updated_at = Utc::now();
        if settled {
            refund.status = RefundStatus::Completed;
            payment.refund_amount = payment.refund_amount.checked_add(&refund.amount)?;
            payment.status = if payment.refund_amount == payment.amount {
                PaymentStatus::Refunded
            } else {
                PaymentStatus::PartiallyRefunded
            };
            info!(payment_id = %payment.id, refund_id = %refund.id, "pending refund settled");
        } else {
            refund.status = RefundStatus::Failed;
            warn!(payment_id = %payment.id, refund_id = %refund.id, "pending refund failed at reconciliation");
        }
        Ok(PaymentTransaction::record(
            payment.id,
            TransactionKind::Refund,
            refund.amount.clone(),
            settled,
            refund.external_refund_id.clone(),
            Some(if settled {
                "settled by reconciliation".to_string()
            } else {
                "failed at reconciliation".to_string()
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::MockPaymentGateway;
    use crate::testutil::{two_supplier_order, usd};
    use rust_decimal_macros::dec;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    fn token() -> Masked<String> {
        Masked("tok_test_visa".to_string())
    }

    async fn captured_payment(ledger: &PaymentLedger, amount: rust_decimal::Decimal) -> Payment {
        let (mut order, _, _) = two_supplier_order();
        order.total_amount = usd(amount);
        let mut payment = Payment::for_order(&order, "card");
        let outcome = ledger.capture(&mut payment, &token()).await.unwrap();
        assert!(outcome.charged_now);
        payment
    }

    #[tokio::test]
    async fn test_double_capture_charges_once() {
        let gateway = Arc::new(MockPaymentGateway::new());
        let ledger = PaymentLedger::new(gateway.clone(), fast_retry());
        let (order, _, _) = two_supplier_order();
        let mut payment = Payment::for_order(&order, "card");

        let first = ledger.capture(&mut payment, &token()).await.unwrap();
        assert!(first.charged_now);
        assert_eq!(payment.status, PaymentStatus::Completed);

        // Simulated client retry of the same capture request.
        let second = ledger.capture(&mut payment, &token()).await.unwrap();
        assert!(!second.charged_now);
        assert!(second.transactions.is_empty());
        assert_eq!(gateway.charge_count(), 1);
        assert_eq!(payment.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_succeed() {
        let gateway = Arc::new(MockPaymentGateway::new());
        gateway.fail_transiently(2);
        let ledger = PaymentLedger::new(gateway.clone(), fast_retry());
        let (order, _, _) = two_supplier_order();
        let mut payment = Payment::for_order(&order, "card");

        let outcome = ledger.capture(&mut payment, &token()).await.unwrap();
        assert!(outcome.charged_now);
        assert_eq!(payment.status, PaymentStatus::Completed);
        // Two failed attempts plus the final success are all audited.
        assert_eq!(outcome.transactions.len(), 3);
        assert_eq!(
            outcome.transactions.iter().filter(|t| t.success).count(),
            1
        );
        assert_eq!(gateway.charge_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_payment_processing() {
        let gateway = Arc::new(MockPaymentGateway::new());
        gateway.fail_transiently(10);
        let ledger = PaymentLedger::new(gateway.clone(), fast_retry());
        let (order, _, _) = two_supplier_order();
        let mut payment = Payment::for_order(&order, "card");

        let outcome = ledger.capture(&mut payment, &token()).await.unwrap();
        assert!(!outcome.charged_now);
        // Never assumed failed: stays Processing for reconciliation.
        assert_eq!(payment.status, PaymentStatus::Processing);
        assert_eq!(outcome.transactions.len(), 3);
        assert!(outcome.transactions.iter().all(|t| !t.success));
    }

    #[tokio::test]
    async fn test_declined_card_is_terminal() {
        let gateway = Arc::new(MockPaymentGateway::new());
        gateway.decline_captures();
        let ledger = PaymentLedger::new(gateway.clone(), fast_retry());
        let (order, _, _) = two_supplier_order();
        let mut payment = Payment::for_order(&order, "card");

        let outcome = ledger.capture(&mut payment, &token()).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(outcome.transactions.len(), 1);
        assert!(!outcome.transactions[0].success);
        // A failed payment cannot be re-captured.
        assert!(ledger.capture(&mut payment, &token()).await.is_err());
    }

    #[tokio::test]
    async fn test_partial_refund_then_over_refund_rejected() {
        let gateway = Arc::new(MockPaymentGateway::new());
        let ledger = PaymentLedger::new(gateway.clone(), fast_retry());
        let mut payment = captured_payment(&ledger, dec!(500.00)).await;

        let record = ledger
            .create_refund(&mut payment, Some(usd(dec!(300.00))), "damaged item", None, None)
            .await
            .unwrap();
        assert_eq!(record.refund.status, RefundStatus::Completed);
        assert_eq!(payment.status, PaymentStatus::PartiallyRefunded);
        assert_eq!(payment.refund_amount.amount(), dec!(300.00));

        // 300 + 250 > 500: rejected synchronously, no gateway call.
        let result = ledger
            .create_refund(&mut payment, Some(usd(dec!(250.00))), "second claim", None, None)
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
        assert_eq!(payment.refund_amount.amount(), dec!(300.00));
    }

    #[tokio::test]
    async fn test_full_refund_marks_payment_refunded() {
        let gateway = Arc::new(MockPaymentGateway::new());
        let ledger = PaymentLedger::new(gateway.clone(), fast_retry());
        let mut payment = captured_payment(&ledger, dec!(500.00)).await;

        // Default amount: the full remaining balance.
        let record = ledger
            .create_refund(&mut payment, None, "order cancelled", None, None)
            .await
            .unwrap();
        assert_eq!(record.refund.amount.amount(), dec!(500.00));
        assert_eq!(payment.status, PaymentStatus::Refunded);
        assert_eq!(payment.remaining_refundable().unwrap().amount(), dec!(0.00));

        // Nothing left to refund.
        let result = ledger.create_refund(&mut payment, None, "again", None, None).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_refund_currency_mismatch_rejected() {
        let gateway = Arc::new(MockPaymentGateway::new());
        let ledger = PaymentLedger::new(gateway.clone(), fast_retry());
        let mut payment = captured_payment(&ledger, dec!(100.00)).await;

        let eur = Money::new(dec!(10.00), plaza_shared::Currency::new("EUR"));
        let result = ledger
            .create_refund(&mut payment, Some(eur), "wrong currency", None, None)
            .await;
        assert!(matches!(result, Err(CoreError::Money(_))));
    }

    #[tokio::test]
    async fn test_refund_rejected_before_capture() {
        let gateway = Arc::new(MockPaymentGateway::new());
        let ledger = PaymentLedger::new(gateway, fast_retry());
        let (order, _, _) = two_supplier_order();
        let mut payment = Payment::for_order(&order, "card");

        let result = ledger
            .create_refund(&mut payment, None, "too early", None, None)
            .await;
        assert!(matches!(result, Err(CoreError::StateConflict { .. })));
    }

    #[tokio::test]
    async fn test_failed_refund_audited_but_not_counted() {
        let gateway = Arc::new(MockPaymentGateway::new());
        let ledger = PaymentLedger::new(gateway.clone(), fast_retry());
        let mut payment = captured_payment(&ledger, dec!(200.00)).await;

        gateway.decline_refunds();
        let record = ledger
            .create_refund(&mut payment, Some(usd(dec!(50.00))), "goodwill", None, None)
            .await
            .unwrap();
        assert_eq!(record.refund.status, RefundStatus::Failed);
        // Audit row exists even though the gateway said no.
        assert_eq!(record.transactions.len(), 1);
        assert!(!record.transactions[0].success);
        // Failed refunds do not count against the refundable balance.
        assert_eq!(payment.refund_amount.amount(), dec!(0.00));
        assert_eq!(payment.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_pending_refund_holds_refundable_balance() {
        let gateway = Arc::new(MockPaymentGateway::new());
        let ledger = PaymentLedger::new(gateway.clone(), fast_retry());
        let mut payment = captured_payment(&ledger, dec!(500.00)).await;

        // The gateway never answers: the refund is left Pending.
        gateway.fail_transiently(10);
        let record = ledger
            .create_refund(&mut payment, Some(usd(dec!(500.00))), "order cancelled", None, None)
            .await
            .unwrap();
        assert_eq!(record.refund.status, RefundStatus::Pending);
        assert_eq!(payment.refund_amount.amount(), dec!(0.00));
        assert_eq!(payment.pending_refund_amount.amount(), dec!(500.00));
        assert_eq!(payment.remaining_refundable().unwrap().amount(), dec!(0.00));

        // The outstanding refund holds the whole capture; a second claim
        // for the same money is rejected synchronously.
        let result = ledger
            .create_refund(&mut payment, Some(usd(dec!(500.00))), "second claim", None, None)
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
        assert_eq!(payment.pending_refund_amount.amount(), dec!(500.00));
    }

    #[tokio::test]
    async fn test_reconciled_settlement_lands_pending_refund() {
        let gateway = Arc::new(MockPaymentGateway::new());
        let ledger = PaymentLedger::new(gateway.clone(), fast_retry());
        let mut payment = captured_payment(&ledger, dec!(500.00)).await;

        gateway.fail_transiently(10);
        let mut record = ledger
            .create_refund(&mut payment, None, "order cancelled", None, None)
            .await
            .unwrap();

        let txn = ledger
            .settle_refund(&mut payment, &mut record.refund, GatewayStatus::Completed)
            .unwrap();
        assert!(txn.success);
        assert_eq!(record.refund.status, RefundStatus::Completed);
        assert_eq!(payment.pending_refund_amount.amount(), dec!(0.00));
        assert_eq!(payment.refund_amount.amount(), dec!(500.00));
        assert_eq!(payment.status, PaymentStatus::Refunded);

        // Already terminal; a repeated webhook is refused.
        assert!(ledger
            .settle_refund(&mut payment, &mut record.refund, GatewayStatus::Completed)
            .is_err());
    }

    #[tokio::test]
    async fn test_failed_reconciliation_frees_held_balance() {
        let gateway = Arc::new(MockPaymentGateway::new());
        let ledger = PaymentLedger::new(gateway.clone(), fast_retry());
        let mut payment = captured_payment(&ledger, dec!(500.00)).await;

        gateway.fail_transiently(10);
        let mut record = ledger
            .create_refund(&mut payment, None, "order cancelled", None, None)
            .await
            .unwrap();
        let txn = ledger
            .settle_refund(&mut payment, &mut record.refund, GatewayStatus::Failed)
            .unwrap();
        assert!(!txn.success);
        assert_eq!(record.refund.status, RefundStatus::Failed);
        assert_eq!(payment.pending_refund_amount.amount(), dec!(0.00));
        assert_eq!(payment.remaining_refundable().unwrap().amount(), dec!(500.00));

        // The freed balance can be claimed again once the gateway answers.
        gateway.fail_transiently(0);
        let retried = ledger
            .create_refund(&mut payment, None, "order cancelled", None, None)
            .await
            .unwrap();
        assert_eq!(retried.refund.status, RefundStatus::Completed);
        assert_eq!(payment.status, PaymentStatus::Refunded);
    }
}
