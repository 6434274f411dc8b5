use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::Utc;
use plaza_core::gateway::{ChargeOutcome, GatewayStatus, PaymentGateway, RefundOutcome};
use plaza_core::inventory::InventoryReservation;
use plaza_core::notify::EventSink;
use plaza_core::{Actor, CoreError, CoreResult};
use plaza_shared::events::{
    OrderCancelledEvent, OrderPaidEvent, OrderShippedEvent, RefundIssuedEvent,
    ReturnResolvedEvent,
};
use plaza_shared::pii::Masked;
use plaza_shared::{Currency, Money};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::fulfillment::FulfillmentTracker;
use crate::ledger::{
    Payment, PaymentLedger, PaymentStatus, PaymentTransaction, RefundRecord, RefundStatus,
    RetryPolicy,
};
use crate::manager::OrderLifecycle;
use crate::models::{Order, OrderItem};
use crate::returns::{ReturnRequest, ReturnStatus, ReturnWorkflow};

pub const ORDER_TOPIC: &str = "plaza.orders";
pub const PAYMENT_TOPIC: &str = "plaza.payments";
pub const RETURN_TOPIC: &str = "plaza.returns";

/// Everything checkout produced; the caller persists order, payment and
/// audit rows in one storage transaction.
#[derive(Debug)]
pub struct Checkout {
    pub order: Order,
    pub payment: Payment,
    pub transactions: Vec<PaymentTransaction>,
}

/// Coordinates checkout and cancellation across inventory, the payment
/// ledger and the event sink. Operates on in-memory domain values; all
/// persistence lives with the caller.
pub struct CheckoutOrchestrator {
    ledger: PaymentLedger,
    inventory: Arc<dyn InventoryReservation>,
    events: Arc<dyn EventSink>,
}

impl CheckoutOrchestrator {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        inventory: Arc<dyn InventoryReservation>,
        events: Arc<dyn EventSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger: PaymentLedger::new(gateway, retry),
            inventory,
            events,
        }
    }

    /// Checkout: create the order, reserve stock for every item, then
    /// capture payment.
    ///
    /// Reservation runs before any money moves; if an item cannot be
    /// reserved, earlier reservations are rolled back and checkout aborts.
    /// A declined capture likewise releases everything. A capture left in
    /// `Processing` (gateway silence) keeps its reservations until
    /// reconciliation decides the outcome.
    #[allow(clippy::too_many_arguments)]
    pub async fn place_order(
        &self,
        customer_id: Uuid,
        shipping_address_id: Uuid,
        billing_address_id: Uuid,
        items: Vec<OrderItem>,
        currency: Currency,
        payment_method: &str,
        method_token: &Masked<String>,
    ) -> CoreResult<Checkout> {
        let mut order = Order::new(
            customer_id,
            shipping_address_id,
            billing_address_id,
            items,
            currency,
        )?;

        let mut reserved: Vec<Uuid> = Vec::new();
        for item in &order.items {
            match self
                .inventory
                .reserve(item.id, item.variant.variant_id, item.quantity)
                .await
            {
                Ok(()) => reserved.push(item.id),
                Err(err) => {
                    self.release_items(&reserved).await;
                    return Err(err);
                }
            }
        }

        let mut payment = Payment::for_order(&order, payment_method);
        let capture = match self.ledger.capture(&mut payment, method_token).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.release_items(&reserved).await;
                return Err(err);
            }
        };

        match payment.status {
            PaymentStatus::Completed => {
                OrderLifecycle::mark_paid(&mut order)?;
                self.publish(
                    ORDER_TOPIC,
                    &order.id.to_string(),
                    &OrderPaidEvent {
                        order_id: order.id,
                        customer_id: order.customer_id,
                        total_amount: order.total_amount.amount(),
                        currency: order.total_amount.currency().to_string(),
                        timestamp: Utc::now().timestamp(),
                    },
                )
                .await;
            }
            PaymentStatus::Failed => {
                self.release_items(&reserved).await;
                order.payment_status = PaymentStatus::Failed;
            }
            // Awaiting settlement; reconciliation resolves it later.
            other => order.payment_status = other,
        }

        info!(order_id = %order.id, payment_status = ?payment.status, "checkout finished");
        Ok(Checkout {
            order,
            payment,
            transactions: capture.transactions,
        })
    }

    /// Cancel an order, release its reservations and refund captured money.
    ///
    /// A repeated cancel is a no-op (`Ok(None)`): inventory release and
    /// refund only run on the call that actually transitions the order.
    pub async fn cancel_order(
        &self,
        order: &mut Order,
        payment: Option<&mut Payment>,
        actor: Actor,
        reason: &str,
    ) -> CoreResult<Option<RefundRecord>> {
        let outcome = OrderLifecycle::cancel(order, actor, reason)?;
        if outcome.already_cancelled {
            return Ok(None);
        }

        let item_ids: Vec<Uuid> = order.items.iter().map(|i| i.id).collect();
        self.release_items(&item_ids).await;

        let mut record = None;
        if outcome.needs_refund {
            let payment = payment.ok_or_else(|| {
                CoreError::Internal(format!(
                    "order {} needs a refund but no payment was supplied",
                    order.id
                ))
            })?;
            let refunded = self
                .ledger
                .create_refund(payment, None, reason, None, Some(actor))
                .await?;
            if refunded.refund.status == RefundStatus::Completed {
                self.publish(
                    PAYMENT_TOPIC,
                    &payment.id.to_string(),
                    &RefundIssuedEvent {
                        payment_id: payment.id,
                        refund_id: refunded.refund.id,
                        order_id: order.id,
                        amount: refunded.refund.amount.amount(),
                        currency: refunded.refund.amount.currency().to_string(),
                        timestamp: Utc::now().timestamp(),
                    },
                )
                .await;
            }
            record = Some(refunded);
        }

        self.publish(
            ORDER_TOPIC,
            &order.id.to_string(),
            &OrderCancelledEvent {
                order_id: order.id,
                customer_id: order.customer_id,
                reason: reason.to_string(),
                refund_enqueued: outcome.needs_refund,
                timestamp: Utc::now().timestamp(),
            },
        )
        .await;
        Ok(record)
    }

    /// Record a supplier's shipping leg and roll the order status up.
    ///
    /// Returns whether the order as a whole reached Shipped; that
    /// transition, and only that one, is announced on the order topic.
    pub async fn ship_item(
        &self,
        order: &mut Order,
        item_id: Uuid,
        supplier: Actor,
        tracking_number: &str,
        tracking_url: Option<&str>,
    ) -> CoreResult<bool> {
        let order_shipped =
            FulfillmentTracker::ship(order, item_id, &supplier, tracking_number, tracking_url)?;
        if order_shipped {
            self.publish(
                ORDER_TOPIC,
                &order.id.to_string(),
                &OrderShippedEvent {
                    order_id: order.id,
                    customer_id: order.customer_id,
                    timestamp: Utc::now().timestamp(),
                },
            )
            .await;
        }
        Ok(order_shipped)
    }

    /// Execute the refund for an approved return and resolve the request
    /// once the refund settles.
    ///
    /// The refund amount is derived from the requested lines, `sum of
    /// quantity x final_price`. A refund the gateway leaves pending or
    /// rejects keeps the request Approved; the record is returned either
    /// way so the audit rows reach storage.
    pub async fn resolve_return(
        &self,
        request: &mut ReturnRequest,
        order: &mut Order,
        payment: &mut Payment,
        actor: Actor,
    ) -> CoreResult<RefundRecord> {
        if request.status != ReturnStatus::Approved {
            return Err(CoreError::state_conflict(request.status, ReturnStatus::Resolved));
        }

        let mut amount = Money::zero(payment.amount.currency().clone());
        for line in &request.items {
            let item = order.item(line.order_item_id)?;
            amount = amount.checked_add(&item.final_price.mul_qty(line.quantity)?)?;
        }
        let order_item_id = match request.items.as_slice() {
            [only] => Some(only.order_item_id),
            _ => None,
        };

        let record = self
            .ledger
            .create_refund(
                payment,
                Some(amount),
                &format!("approved return {}", request.id),
                order_item_id,
                Some(actor),
            )
            .await?;

        if record.refund.status == RefundStatus::Completed {
            ReturnWorkflow::resolve(request, order, &record.refund)?;
            self.publish(
                RETURN_TOPIC,
                &request.id.to_string(),
                &ReturnResolvedEvent {
                    return_request_id: request.id,
                    order_id: order.id,
                    refund_id: Some(record.refund.id),
                    refund_amount: Some(record.refund.amount.amount()),
                    timestamp: Utc::now().timestamp(),
                },
            )
            .await;
        }
        Ok(record)
    }

    /// Release reservations best-effort; release errors are logged and do
    /// not abort the surrounding operation.
    async fn release_items(&self, item_ids: &[Uuid]) {
        for item_id in item_ids {
            match self.inventory.release(*item_id).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(order_item_id = %item_id, "reservation already released");
                }
                Err(err) => {
                    warn!(order_item_id = %item_id, %err, "failed to release reservation");
                }
            }
        }
    }

    /// Publish failures never roll back the transition that produced the
    /// event; they are logged for the notifier's dead-letter tooling.
    async fn publish<E: Serialize>(&self, topic: &str, key: &str, event: &E) {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(err) => {
                warn!(topic, %err, "failed to serialize event payload");
                return;
            }
        };
        if let Err(err) = self.events.publish(topic, key, &payload).await {
            warn!(topic, key, %err, "failed to publish event");
        }
    }
}

// Test doubles for the external adapters. Shared by the test suites of the
// surrounding modules, which is why they live here rather than inside a
// #[cfg(test)] block.

#[derive(Default)]
struct GatewayScript {
    transient_failures: u32,
    decline_captures: bool,
    decline_refunds: bool,
    charges: HashMap<String, ChargeOutcome>,
    refunds: HashMap<String, RefundOutcome>,
    new_charges: u32,
}

/// In-memory gateway honoring idempotency keys: a repeated key replays the
/// stored outcome without moving money again.
#[derive(Default)]
pub struct MockPaymentGateway {
    script: Mutex<GatewayScript>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` gateway calls with a transient error.
    pub fn fail_transiently(&self, n: u32) {
        self.script.lock().unwrap().transient_failures = n;
    }

    pub fn decline_captures(&self) {
        self.script.lock().unwrap().decline_captures = true;
    }

    pub fn decline_refunds(&self) {
        self.script.lock().unwrap().decline_refunds = true;
    }

    pub fn allow_refunds(&self) {
        self.script.lock().unwrap().decline_refunds = false;
    }

    /// Number of distinct successful charges, counting each idempotency
    /// key at most once.
    pub fn charge_count(&self) -> u32 {
        self.script.lock().unwrap().new_charges
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn capture(
        &self,
        _payment_id: Uuid,
        _amount: &Money,
        _method_token: &Masked<String>,
        idempotency_key: &str,
    ) -> CoreResult<ChargeOutcome> {
        let mut script = self.script.lock().unwrap();
        if let Some(existing) = script.charges.get(idempotency_key) {
            return Ok(existing.clone());
        }
        if script.transient_failures > 0 {
            script.transient_failures -= 1;
            return Err(CoreError::GatewayTransient(
                "simulated gateway timeout".to_string(),
            ));
        }
        let outcome = ChargeOutcome {
            external_txn_id: format!("mock_ch_{}", Uuid::new_v4().simple()),
            status: if script.decline_captures {
                GatewayStatus::Failed
            } else {
                GatewayStatus::Completed
            },
        };
        if outcome.status == GatewayStatus::Completed {
            script.new_charges += 1;
        }
        script
            .charges
            .insert(idempotency_key.to_string(), outcome.clone());
        Ok(outcome)
    }

    async fn refund(
        &self,
        _payment_id: Uuid,
        _external_txn_id: &str,
        _amount: &Money,
        idempotency_key: &str,
    ) -> CoreResult<RefundOutcome> {
        let mut script = self.script.lock().unwrap();
        if let Some(existing) = script.refunds.get(idempotency_key) {
            return Ok(existing.clone());
        }
        if script.transient_failures > 0 {
            script.transient_failures -= 1;
            return Err(CoreError::GatewayTransient(
                "simulated gateway timeout".to_string(),
            ));
        }
        let outcome = RefundOutcome {
            external_refund_id: format!("mock_re_{}", Uuid::new_v4().simple()),
            status: if script.decline_refunds {
                GatewayStatus::Failed
            } else {
                GatewayStatus::Completed
            },
        };
        script
            .refunds
            .insert(idempotency_key.to_string(), outcome.clone());
        Ok(outcome)
    }
}

#[derive(Default)]
struct InventoryBook {
    reserved: Vec<(Uuid, Uuid, u32)>,
    released: Vec<Uuid>,
    reserves_before_failure: Option<u32>,
}

/// Recording inventory double. `release` dedupes like the real service:
/// only the first call for an item returns `true`.
#[derive(Default)]
pub struct MockInventory {
    book: Mutex<InventoryBook>,
}

impl MockInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `n` reserves succeed, then fail the rest.
    pub fn fail_reserves_after(&self, n: u32) {
        self.book.lock().unwrap().reserves_before_failure = Some(n);
    }

    pub fn reserved_count(&self) -> usize {
        self.book.lock().unwrap().reserved.len()
    }

    pub fn release_count(&self, order_item_id: Uuid) -> usize {
        self.book
            .lock()
            .unwrap()
            .released
            .iter()
            .filter(|id| **id == order_item_id)
            .count()
    }
}

#[async_trait::async_trait]
impl InventoryReservation for MockInventory {
    async fn reserve(&self, order_item_id: Uuid, variant_id: Uuid, qty: u32) -> CoreResult<()> {
        let mut book = self.book.lock().unwrap();
        if let Some(remaining) = book.reserves_before_failure {
            if remaining == 0 {
                return Err(CoreError::Conflict(format!(
                    "variant {} out of stock",
                    variant_id
                )));
            }
            book.reserves_before_failure = Some(remaining - 1);
        }
        book.reserved.push((order_item_id, variant_id, qty));
        Ok(())
    }

    async fn release(&self, order_item_id: Uuid) -> CoreResult<bool> {
        let mut book = self.book.lock().unwrap();
        let first_release = !book.released.contains(&order_item_id);
        book.released.push(order_item_id);
        Ok(first_release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;
    use crate::testutil::item;
    use plaza_core::notify::NullSink;
    use rust_decimal_macros::dec;

    struct RecordingSink {
        published: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
            }
        }

        fn topics(&self) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .map(|(t, _)| t.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, topic: &str, _key: &str, payload: &str) -> CoreResult<()> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string()));
            Ok(())
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: std::time::Duration::from_millis(1),
        }
    }

    fn token() -> Masked<String> {
        Masked("tok_test_visa".to_string())
    }

    fn cart() -> Vec<OrderItem> {
        vec![
            item(Uuid::new_v4(), dec!(600.00), 1),
            item(Uuid::new_v4(), dec!(400.00), 1),
        ]
    }

    #[tokio::test]
    async fn test_checkout_reserves_captures_and_emits() {
        let gateway = Arc::new(MockPaymentGateway::new());
        let inventory = Arc::new(MockInventory::new());
        let sink = Arc::new(RecordingSink::new());
        let orchestrator = CheckoutOrchestrator::new(
            gateway.clone(),
            inventory.clone(),
            sink.clone(),
            fast_retry(),
        );

        let checkout = orchestrator
            .place_order(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                cart(),
                Currency::new("USD"),
                "card",
                &token(),
            )
            .await
            .unwrap();

        assert_eq!(checkout.order.status, OrderStatus::Paid);
        assert_eq!(checkout.payment.status, PaymentStatus::Completed);
        assert_eq!(checkout.payment.amount.amount(), dec!(1000.00));
        assert_eq!(inventory.reserved_count(), 2);
        assert_eq!(gateway.charge_count(), 1);
        assert_eq!(sink.topics(), vec![ORDER_TOPIC.to_string()]);
    }

    #[tokio::test]
    async fn test_reserve_failure_rolls_back_earlier_reservations() {
        let gateway = Arc::new(MockPaymentGateway::new());
        let inventory = Arc::new(MockInventory::new());
        inventory.fail_reserves_after(1);
        let orchestrator = CheckoutOrchestrator::new(
            gateway.clone(),
            inventory.clone(),
            Arc::new(NullSink),
            fast_retry(),
        );

        let result = orchestrator
            .place_order(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                cart(),
                Currency::new("USD"),
                "card",
                &token(),
            )
            .await;

        assert!(matches!(result, Err(CoreError::Conflict(_))));
        // The one reservation that succeeded was rolled back, and no money
        // ever moved.
        let book = inventory.book.lock().unwrap();
        assert_eq!(book.reserved.len(), 1);
        assert_eq!(book.released.len(), 1);
        drop(book);
        assert_eq!(gateway.charge_count(), 0);
    }

    #[tokio::test]
    async fn test_declined_payment_releases_inventory() {
        let gateway = Arc::new(MockPaymentGateway::new());
        gateway.decline_captures();
        let inventory = Arc::new(MockInventory::new());
        let orchestrator = CheckoutOrchestrator::new(
            gateway.clone(),
            inventory.clone(),
            Arc::new(NullSink),
            fast_retry(),
        );

        let checkout = orchestrator
            .place_order(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                cart(),
                Currency::new("USD"),
                "card",
                &token(),
            )
            .await
            .unwrap();

        assert_eq!(checkout.order.status, OrderStatus::Pending);
        assert_eq!(checkout.payment.status, PaymentStatus::Failed);
        for it in &checkout.order.items {
            assert_eq!(inventory.release_count(it.id), 1);
        }
    }

    #[tokio::test]
    async fn test_unsettled_capture_keeps_reservations() {
        let gateway = Arc::new(MockPaymentGateway::new());
        gateway.fail_transiently(10);
        let inventory = Arc::new(MockInventory::new());
        let orchestrator = CheckoutOrchestrator::new(
            gateway.clone(),
            inventory.clone(),
            Arc::new(NullSink),
            fast_retry(),
        );

        let checkout = orchestrator
            .place_order(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                cart(),
                Currency::new("USD"),
                "card",
                &token(),
            )
            .await
            .unwrap();

        // The gateway never answered: the charge may exist, so stock stays
        // reserved and the payment stays Processing for reconciliation.
        assert_eq!(checkout.payment.status, PaymentStatus::Processing);
        assert_eq!(checkout.order.status, OrderStatus::Pending);
        for it in &checkout.order.items {
            assert_eq!(inventory.release_count(it.id), 0);
        }
    }

    #[tokio::test]
    async fn test_last_shipped_item_announces_order_shipped() {
        let gateway = Arc::new(MockPaymentGateway::new());
        let sink = Arc::new(RecordingSink::new());
        let orchestrator = CheckoutOrchestrator::new(
            gateway,
            Arc::new(MockInventory::new()),
            sink.clone(),
            fast_retry(),
        );

        let supplier_a = Uuid::new_v4();
        let supplier_b = Uuid::new_v4();
        let mut checkout = orchestrator
            .place_order(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                vec![
                    item(supplier_a, dec!(600.00), 1),
                    item(supplier_b, dec!(400.00), 1),
                ],
                Currency::new("USD"),
                "card",
                &token(),
            )
            .await
            .unwrap();
        let (first, second) = (checkout.order.items[0].id, checkout.order.items[1].id);
        for (id, supplier) in [(first, supplier_a), (second, supplier_b)] {
            let actor = Actor::Supplier(supplier);
            FulfillmentTracker::confirm(&mut checkout.order, id, &actor).unwrap();
            FulfillmentTracker::pack(&mut checkout.order, id, &actor).unwrap();
        }

        let shipped = orchestrator
            .ship_item(
                &mut checkout.order,
                first,
                Actor::Supplier(supplier_a),
                "TRK-1",
                None,
            )
            .await
            .unwrap();
        // One supplier still owes a parcel: no order-level announcement.
        assert!(!shipped);
        assert_eq!(sink.topics(), vec![ORDER_TOPIC.to_string()]);

        let shipped = orchestrator
            .ship_item(
                &mut checkout.order,
                second,
                Actor::Supplier(supplier_b),
                "TRK-2",
                None,
            )
            .await
            .unwrap();
        assert!(shipped);
        assert_eq!(checkout.order.status, OrderStatus::Shipped);

        let published = sink.published.lock().unwrap();
        assert_eq!(published.len(), 2);
        let (topic, payload) = &published[1];
        assert_eq!(topic, ORDER_TOPIC);
        let event: OrderShippedEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.order_id, checkout.order.id);
        // Not a replay of the checkout payload.
        assert!(!payload.contains("total_amount"));
    }

    #[tokio::test]
    async fn test_cancel_paid_order_refunds_in_full() {
        let gateway = Arc::new(MockPaymentGateway::new());
        let inventory = Arc::new(MockInventory::new());
        let sink = Arc::new(RecordingSink::new());
        let orchestrator = CheckoutOrchestrator::new(
            gateway.clone(),
            inventory.clone(),
            sink.clone(),
            fast_retry(),
        );

        let customer = Uuid::new_v4();
        let mut checkout = orchestrator
            .place_order(
                customer,
                Uuid::new_v4(),
                Uuid::new_v4(),
                cart(),
                Currency::new("USD"),
                "card",
                &token(),
            )
            .await
            .unwrap();

        let record = orchestrator
            .cancel_order(
                &mut checkout.order,
                Some(&mut checkout.payment),
                Actor::Customer(customer),
                "changed mind",
            )
            .await
            .unwrap()
            .expect("cancel of a paid order produces a refund");

        assert_eq!(checkout.order.status, OrderStatus::Cancelled);
        assert_eq!(record.refund.amount.amount(), dec!(1000.00));
        assert_eq!(checkout.payment.status, PaymentStatus::Refunded);
        for it in &checkout.order.items {
            assert_eq!(inventory.release_count(it.id), 1);
        }
        // order.paid, refund.issued, order.cancelled in that order.
        assert_eq!(
            sink.topics(),
            vec![
                ORDER_TOPIC.to_string(),
                PAYMENT_TOPIC.to_string(),
                ORDER_TOPIC.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_repeat_cancel_skips_release_and_refund() {
        let gateway = Arc::new(MockPaymentGateway::new());
        let inventory = Arc::new(MockInventory::new());
        let orchestrator = CheckoutOrchestrator::new(
            gateway.clone(),
            inventory.clone(),
            Arc::new(NullSink),
            fast_retry(),
        );

        let customer = Uuid::new_v4();
        let mut checkout = orchestrator
            .place_order(
                customer,
                Uuid::new_v4(),
                Uuid::new_v4(),
                cart(),
                Currency::new("USD"),
                "card",
                &token(),
            )
            .await
            .unwrap();

        orchestrator
            .cancel_order(
                &mut checkout.order,
                Some(&mut checkout.payment),
                Actor::Customer(customer),
                "changed mind",
            )
            .await
            .unwrap();
        let second = orchestrator
            .cancel_order(
                &mut checkout.order,
                Some(&mut checkout.payment),
                Actor::Customer(customer),
                "changed mind",
            )
            .await
            .unwrap();

        assert!(second.is_none());
        assert_eq!(checkout.payment.refund_amount.amount(), dec!(1000.00));
        for it in &checkout.order.items {
            // Recorded exactly once despite the second cancel call.
            assert_eq!(inventory.release_count(it.id), 1);
        }
    }

    #[tokio::test]
    async fn test_resolve_return_refunds_requested_lines() {
        use crate::models::ItemFulfillmentStatus;
        use crate::returns::{ResolutionType, ReturnItem};

        let gateway = Arc::new(MockPaymentGateway::new());
        let inventory = Arc::new(MockInventory::new());
        let sink = Arc::new(RecordingSink::new());
        let orchestrator = CheckoutOrchestrator::new(
            gateway.clone(),
            inventory.clone(),
            sink.clone(),
            fast_retry(),
        );

        let supplier = Uuid::new_v4();
        let customer = Uuid::new_v4();
        let mut checkout = orchestrator
            .place_order(
                customer,
                Uuid::new_v4(),
                Uuid::new_v4(),
                vec![
                    item(supplier, dec!(50.00), 2),
                    item(Uuid::new_v4(), dec!(400.00), 1),
                ],
                Currency::new("USD"),
                "card",
                &token(),
            )
            .await
            .unwrap();
        for it in &mut checkout.order.items {
            it.fulfillment_status = ItemFulfillmentStatus::Delivered;
        }

        let returned_item = checkout.order.items[0].id;
        let mut request = ReturnWorkflow::create(
            &checkout.order,
            customer,
            vec![ReturnItem {
                order_item_id: returned_item,
                quantity: 2,
                reason: "both arrived cracked".to_string(),
                media: vec![],
            }],
            ResolutionType::Refund,
            None,
            chrono::Utc::now().date_naive(),
        )
        .unwrap();
        ReturnWorkflow::approve(&mut request, &mut checkout.order, &Actor::Supplier(supplier))
            .unwrap();

        let record = orchestrator
            .resolve_return(
                &mut request,
                &mut checkout.order,
                &mut checkout.payment,
                Actor::Supplier(supplier),
            )
            .await
            .unwrap();

        // 2 x 50.00 refunded out of the 500.00 capture.
        assert_eq!(record.refund.amount.amount(), dec!(100.00));
        assert_eq!(request.status, ReturnStatus::Resolved);
        assert_eq!(checkout.payment.refund_amount.amount(), dec!(100.00));
        assert_eq!(checkout.payment.status, PaymentStatus::PartiallyRefunded);
        assert_eq!(
            checkout.order.items[0].fulfillment_status,
            ItemFulfillmentStatus::Returned
        );
        assert!(sink.topics().contains(&RETURN_TOPIC.to_string()));
    }
}
