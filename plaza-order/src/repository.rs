use async_trait::async_trait;
use plaza_core::CoreResult;
use uuid::Uuid;

use crate::fulfillment::{Shipment, TrackingEvent};
use crate::ledger::{Payment, PaymentRefund, PaymentTransaction};
use crate::models::{Order, OrderItem, OrderStatus};
use crate::returns::ReturnRequest;

/// Persistence seam for orders and their items.
///
/// Status writes are compare-and-swap so concurrent writers (supplier
/// actions, webhooks, admin tooling) cannot clobber each other: an update
/// only lands if the stored status still matches `expected`.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert_order(&self, order: &Order) -> CoreResult<()>;

    async fn find_order(&self, order_id: Uuid) -> CoreResult<Option<Order>>;

    async fn list_orders_for_customer(
        &self,
        customer_id: Uuid,
        include_archived: bool,
    ) -> CoreResult<Vec<Order>>;

    /// Returns whether the swap landed; `false` means another writer got
    /// there first and the caller should reload and re-derive.
    async fn update_order_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
        note: Option<&str>,
    ) -> CoreResult<bool>;

    async fn update_item(&self, item: &OrderItem) -> CoreResult<()>;

    /// Persists status, cancellation record and the appended history entry.
    async fn save_cancellation(&self, order: &Order) -> CoreResult<()>;

    async fn archive_order(&self, order_id: Uuid) -> CoreResult<bool>;
}

/// Persistence seam for the money ledger. Payment state and its audit
/// transactions commit together or not at all.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert_payment(&self, payment: &Payment) -> CoreResult<()>;

    async fn find_payment_for_order(&self, order_id: Uuid) -> CoreResult<Option<Payment>>;

    /// One storage transaction: the payment row update plus every audit
    /// row produced by the ledger call.
    async fn save_payment_with_transactions(
        &self,
        payment: &Payment,
        transactions: &[PaymentTransaction],
    ) -> CoreResult<()>;

    async fn insert_refund(&self, refund: &PaymentRefund) -> CoreResult<()>;

    async fn list_transactions(&self, payment_id: Uuid) -> CoreResult<Vec<PaymentTransaction>>;
}

#[async_trait]
pub trait ReturnRepository: Send + Sync {
    async fn insert_return(&self, request: &ReturnRequest) -> CoreResult<()>;

    async fn find_return(&self, return_id: Uuid) -> CoreResult<Option<ReturnRequest>>;

    async fn list_returns_for_supplier(&self, supplier_id: Uuid) -> CoreResult<Vec<ReturnRequest>>;

    async fn save_return(&self, request: &ReturnRequest) -> CoreResult<()>;
}

#[async_trait]
pub trait ShipmentRepository: Send + Sync {
    async fn insert_shipment(&self, shipment: &Shipment) -> CoreResult<()>;

    async fn find_shipment(&self, shipment_id: Uuid) -> CoreResult<Option<Shipment>>;

    async fn list_shipments_for_order(&self, order_id: Uuid) -> CoreResult<Vec<Shipment>>;

    /// Appends the event and updates the cached shipment status together.
    async fn append_tracking_event(
        &self,
        shipment: &Shipment,
        event: &TrackingEvent,
    ) -> CoreResult<()>;
}
