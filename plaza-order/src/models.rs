use chrono::{DateTime, NaiveDate, Utc};
use plaza_core::{Actor, CoreError, CoreResult};
use plaza_shared::{Currency, Money};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::PaymentStatus;

/// Order status in the customer-facing lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Packed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

/// Per-item fulfillment state, advanced independently by the owning
/// supplier. Independent of the order's payment state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemFulfillmentStatus {
    Pending,
    Processing,
    Packed,
    Shipped,
    Delivered,
    Failed,
    Returned,
}

impl ItemFulfillmentStatus {
    /// Whether the item has progressed at least as far as `other` on the
    /// happy path. Failed/Returned count as past Shipped, since both are
    /// only reachable from it.
    pub fn reached(&self, other: ItemFulfillmentStatus) -> bool {
        self.rank() >= other.rank()
    }

    fn rank(&self) -> u8 {
        match self {
            ItemFulfillmentStatus::Pending => 0,
            ItemFulfillmentStatus::Processing => 1,
            ItemFulfillmentStatus::Packed => 2,
            ItemFulfillmentStatus::Shipped => 3,
            ItemFulfillmentStatus::Delivered => 4,
            ItemFulfillmentStatus::Failed | ItemFulfillmentStatus::Returned => 3,
        }
    }
}

/// One append-only entry in a status history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry<S> {
    pub status: S,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

impl<S> StatusEntry<S> {
    pub fn new(status: S, note: Option<String>) -> Self {
        Self {
            status,
            at: Utc::now(),
            note,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationInfo {
    pub reason: String,
    pub cancelled_by: Actor,
    pub cancelled_at: DateTime<Utc>,
}

/// Product-variant details frozen at purchase time, so later catalog edits
/// never retroactively change order history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSnapshot {
    pub variant_id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
    pub attributes: serde_json::Value,
}

/// One supplier's line item within an order; the unit of independent
/// fulfillment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub supplier_id: Uuid,
    pub variant: VariantSnapshot,
    pub quantity: u32,
    pub price_at_purchase: Money,
    pub discounted_price: Money,
    pub final_price: Money,
    pub fulfillment_status: ItemFulfillmentStatus,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub is_returnable: bool,
    pub return_deadline: NaiveDate,
    pub return_requested: bool,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OrderItem {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: Uuid,
        supplier_id: Uuid,
        variant: VariantSnapshot,
        quantity: u32,
        price_at_purchase: Money,
        discounted_price: Money,
        is_returnable: bool,
        return_window_days: i64,
    ) -> Self {
        let now = Utc::now();
        let final_price = discounted_price.clone();
        Self {
            id: Uuid::new_v4(),
            order_id,
            supplier_id,
            variant,
            quantity,
            price_at_purchase,
            discounted_price,
            final_price,
            fulfillment_status: ItemFulfillmentStatus::Pending,
            tracking_number: None,
            tracking_url: None,
            is_returnable,
            return_deadline: now.date_naive() + chrono::Duration::days(return_window_days),
            return_requested: false,
            shipped_at: None,
            delivered_at: None,
            created_at: now,
        }
    }

    /// Line total at purchase time.
    pub fn line_total(&self) -> CoreResult<Money> {
        Ok(self.final_price.mul_qty(self.quantity)?)
    }

    pub fn within_return_window(&self, today: NaiveDate) -> bool {
        today <= self.return_deadline
    }
}

/// The customer-facing purchase aggregate, spanning one or more suppliers'
/// items. Owns its items and its append-only status history; never
/// physically deleted, only soft-archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub shipping_address_id: Uuid,
    pub billing_address_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Money,
    pub items: Vec<OrderItem>,
    pub status_history: Vec<StatusEntry<OrderStatus>>,
    pub cancellation: Option<CancellationInfo>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create an order at checkout. Validates that there is at least one
    /// item and that every price carries the given currency, then freezes
    /// `total_amount` as the sum of line totals. The total is immutable
    /// from here on; refunds and cancellations are tracked separately.
    pub fn new(
        customer_id: Uuid,
        shipping_address_id: Uuid,
        billing_address_id: Uuid,
        mut items: Vec<OrderItem>,
        currency: Currency,
    ) -> CoreResult<Self> {
        if items.is_empty() {
            return Err(CoreError::Validation(
                "an order requires at least one item".to_string(),
            ));
        }
        if items.iter().any(|i| i.quantity == 0) {
            return Err(CoreError::Validation(
                "item quantity must be at least 1".to_string(),
            ));
        }

        let order_id = Uuid::new_v4();
        let mut total = Money::zero(currency);
        for item in &mut items {
            item.order_id = order_id;
            total = total.checked_add(&item.line_total()?)?;
        }

        let now = Utc::now();
        Ok(Self {
            id: order_id,
            customer_id,
            shipping_address_id,
            billing_address_id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            total_amount: total,
            items,
            status_history: vec![StatusEntry::new(
                OrderStatus::Pending,
                Some("order created at checkout".to_string()),
            )],
            cancellation: None,
            archived: false,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn item(&self, item_id: Uuid) -> CoreResult<&OrderItem> {
        self.items
            .iter()
            .find(|i| i.id == item_id)
            .ok_or_else(|| CoreError::NotFound(format!("order item {}", item_id)))
    }

    pub fn item_mut(&mut self, item_id: Uuid) -> CoreResult<&mut OrderItem> {
        self.items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| CoreError::NotFound(format!("order item {}", item_id)))
    }

    /// Append to the status history and move the cached status. The
    /// history is the audit source of truth and is never rewritten.
    pub(crate) fn push_status(&mut self, status: OrderStatus, note: Option<String>) {
        self.status = status;
        self.status_history.push(StatusEntry::new(status, note));
        self.updated_at = Utc::now();
    }

    /// Soft archive; legal only once the order is terminal.
    pub fn archive(&mut self) -> CoreResult<()> {
        if !self.status.is_terminal() {
            return Err(CoreError::state_conflict(self.status, "ARCHIVED"));
        }
        self.archived = true;
        self.updated_at = Utc::now();
        Ok(())
    }
}
