use chrono::{DateTime, Utc};
use plaza_core::{Actor, CoreError, CoreResult};
use plaza_shared::Money;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::manager::OrderLifecycle;
use crate::models::{ItemFulfillmentStatus, Order, OrderItem, OrderStatus};

/// Advances per-item fulfillment state on behalf of suppliers.
///
/// Every operation checks that the acting supplier owns the item; a wrong
/// supplier gets a Conflict error, never a silent no-op. Item transitions
/// feed the order-level rollup in `OrderLifecycle`.
pub struct FulfillmentTracker;

impl FulfillmentTracker {
    /// Pending -> Processing. Only legal while the parent order is still
    /// Pending or Paid; once packing starts the item set is frozen.
    pub fn confirm(order: &mut Order, item_id: Uuid, supplier: &Actor) -> CoreResult<()> {
        if !matches!(order.status, OrderStatus::Pending | OrderStatus::Paid) {
            return Err(CoreError::state_conflict(order.status, "item CONFIRMED"));
        }
        let item = Self::owned_item_mut(order, item_id, supplier)?;
        Self::advance(item, ItemFulfillmentStatus::Pending, ItemFulfillmentStatus::Processing)?;
        info!(item_id = %item_id, "order item confirmed");
        Ok(())
    }

    /// Processing -> Packed.
    pub fn pack(order: &mut Order, item_id: Uuid, supplier: &Actor) -> CoreResult<()> {
        Self::ensure_order_open(order)?;
        let item = Self::owned_item_mut(order, item_id, supplier)?;
        Self::advance(item, ItemFulfillmentStatus::Processing, ItemFulfillmentStatus::Packed)?;
        OrderLifecycle::recompute_status(order)?;
        Ok(())
    }

    /// Packed -> Shipped. Requires a non-blank tracking number, stamps
    /// `shipped_at`, and rolls the order up. Returns whether the whole
    /// order is now Shipped (it only is once every item has shipped).
    pub fn ship(
        order: &mut Order,
        item_id: Uuid,
        supplier: &Actor,
        tracking_number: &str,
        tracking_url: Option<&str>,
    ) -> CoreResult<bool> {
        if tracking_number.trim().is_empty() {
            return Err(CoreError::Validation(
                "shipping requires a tracking number".to_string(),
            ));
        }
        Self::ensure_order_open(order)?;
        let item = Self::owned_item_mut(order, item_id, supplier)?;
        Self::advance(item, ItemFulfillmentStatus::Packed, ItemFulfillmentStatus::Shipped)?;
        item.tracking_number = Some(tracking_number.trim().to_string());
        item.tracking_url = tracking_url.map(|u| u.to_string());
        item.shipped_at = Some(Utc::now());
        info!(item_id = %item_id, tracking = tracking_number, "order item shipped");

        OrderLifecycle::recompute_status(order)?;
        Ok(order.status == OrderStatus::Shipped)
    }

    /// Shipped -> Delivered; stamps `delivered_at` and rolls the order up.
    /// Returns whether the whole order is now Delivered.
    pub fn deliver(order: &mut Order, item_id: Uuid, supplier: &Actor) -> CoreResult<bool> {
        Self::ensure_order_open(order)?;
        let item = Self::owned_item_mut(order, item_id, supplier)?;
        Self::advance(item, ItemFulfillmentStatus::Shipped, ItemFulfillmentStatus::Delivered)?;
        item.delivered_at = Some(Utc::now());

        OrderLifecycle::recompute_status(order)?;
        Ok(order.status == OrderStatus::Delivered)
    }

    /// Shipped -> Failed (carrier loss, delivery failure). System-driven.
    pub fn mark_failed(order: &mut Order, item_id: Uuid) -> CoreResult<()> {
        let item = order.item_mut(item_id)?;
        Self::advance(item, ItemFulfillmentStatus::Shipped, ItemFulfillmentStatus::Failed)
    }

    /// Shipped/Delivered -> Returned. Invoked by return resolution, after
    /// the refund has settled.
    pub fn mark_returned(order: &mut Order, item_id: Uuid) -> CoreResult<()> {
        let item = order.item_mut(item_id)?;
        if !matches!(
            item.fulfillment_status,
            ItemFulfillmentStatus::Shipped | ItemFulfillmentStatus::Delivered
        ) {
            return Err(CoreError::state_conflict(
                item.fulfillment_status,
                ItemFulfillmentStatus::Returned,
            ));
        }
        item.fulfillment_status = ItemFulfillmentStatus::Returned;
        Ok(())
    }

    fn ensure_order_open(order: &Order) -> CoreResult<()> {
        if order.status == OrderStatus::Cancelled {
            return Err(CoreError::state_conflict(order.status, "item transition"));
        }
        Ok(())
    }

    fn owned_item_mut<'a>(
        order: &'a mut Order,
        item_id: Uuid,
        supplier: &Actor,
    ) -> CoreResult<&'a mut OrderItem> {
        let item = order.item_mut(item_id)?;
        match supplier.supplier_id() {
            Some(sid) if sid == item.supplier_id => Ok(item),
            _ => Err(CoreError::Conflict(format!(
                "{} does not own order item {}",
                supplier.describe(),
                item_id
            ))),
        }
    }

    fn advance(
        item: &mut OrderItem,
        expected: ItemFulfillmentStatus,
        next: ItemFulfillmentStatus,
    ) -> CoreResult<()> {
        if item.fulfillment_status != expected {
            return Err(CoreError::state_conflict(item.fulfillment_status, next));
        }
        item.fulfillment_status = next;
        Ok(())
    }
}

/// Physical shipment status. A derived cache over the tracking-event log:
/// the status always equals the most recent event's type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    Pending,
    LabelCreated,
    PickedUp,
    InTransit,
    OutForDelivery,
    Delivered,
    Failed,
    Returned,
}

impl ShipmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShipmentStatus::Delivered | ShipmentStatus::Failed | ShipmentStatus::Returned
        )
    }

    fn can_follow(self, prev: ShipmentStatus) -> bool {
        use ShipmentStatus::*;
        match (prev, self) {
            (Pending, LabelCreated)
            | (LabelCreated, PickedUp)
            | (PickedUp, InTransit)
            | (InTransit, OutForDelivery)
            | (OutForDelivery, Delivered) => true,
            // Carriers emit repeated in-transit scans as location updates.
            (InTransit, InTransit) => true,
            // Loss or refusal can end an in-flight shipment at any point.
            (PickedUp | InTransit | OutForDelivery, Failed | Returned) => true,
            _ => false,
        }
    }
}

/// Address fields frozen onto the shipment at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressSnapshot {
    pub name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub id: Uuid,
    pub shipment_id: Uuid,
    pub event_type: ShipmentStatus,
    pub location: Option<String>,
    pub description: Option<String>,
    pub event_time: DateTime<Utc>,
}

/// A physical shipment, possibly covering a single item (split shipments)
/// or the whole order. The event list is the authoritative, append-only
/// history; `status` summarizes its tail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_item_id: Option<Uuid>,
    pub status: ShipmentStatus,
    pub from_address: AddressSnapshot,
    pub to_address: AddressSnapshot,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub weight_grams: Option<u32>,
    pub charge: Option<Money>,
    pub events: Vec<TrackingEvent>,
    pub created_at: DateTime<Utc>,
}

impl Shipment {
    pub fn new(
        order_id: Uuid,
        order_item_id: Option<Uuid>,
        from_address: AddressSnapshot,
        to_address: AddressSnapshot,
    ) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            order_id,
            order_item_id,
            status: ShipmentStatus::Pending,
            from_address,
            to_address,
            carrier: None,
            tracking_number: None,
            tracking_url: None,
            weight_grams: None,
            charge: None,
            events: vec![TrackingEvent {
                id: Uuid::new_v4(),
                shipment_id: id,
                event_type: ShipmentStatus::Pending,
                location: None,
                description: Some("shipment created".to_string()),
                event_time: now,
            }],
            created_at: now,
        }
    }

    /// The only way to move shipment status: append a tracking event and
    /// update the cached status to match it. Never set `status` directly.
    pub fn record_event(
        &mut self,
        event_type: ShipmentStatus,
        location: Option<String>,
        description: Option<String>,
    ) -> CoreResult<&TrackingEvent> {
        if !event_type.can_follow(self.status) {
            return Err(CoreError::state_conflict(self.status, event_type));
        }
        let last_time = self.events.last().map(|e| e.event_time).unwrap_or(self.created_at);
        self.events.push(TrackingEvent {
            id: Uuid::new_v4(),
            shipment_id: self.id,
            event_type,
            location,
            description,
            event_time: Utc::now().max(last_time),
        });
        self.status = event_type;
        Ok(self.events.last().expect("event just pushed"))
    }

    /// Invariant check: the cached status must equal the last event's type.
    pub fn status_matches_log(&self) -> bool {
        self.events
            .last()
            .map(|e| e.event_type == self.status)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::two_supplier_order;

    fn address(name: &str) -> AddressSnapshot {
        AddressSnapshot {
            name: name.to_string(),
            line1: "1 Depot Way".to_string(),
            line2: None,
            city: "Springfield".to_string(),
            region: "IL".to_string(),
            postal_code: "62701".to_string(),
            country: "US".to_string(),
        }
    }

    fn paid_order() -> (crate::models::Order, Uuid, Uuid) {
        let (mut order, a, b) = two_supplier_order();
        OrderLifecycle::mark_paid(&mut order).unwrap();
        (order, a, b)
    }

    #[test]
    fn test_only_owning_supplier_can_advance() {
        let (mut order, supplier_a, supplier_b) = paid_order();
        let item_a = order.items[0].id;

        let result = FulfillmentTracker::confirm(&mut order, item_a, &Actor::Supplier(supplier_b));
        assert!(matches!(result, Err(CoreError::Conflict(_))));
        assert_eq!(
            order.items[0].fulfillment_status,
            ItemFulfillmentStatus::Pending
        );

        FulfillmentTracker::confirm(&mut order, item_a, &Actor::Supplier(supplier_a)).unwrap();
        assert_eq!(
            order.items[0].fulfillment_status,
            ItemFulfillmentStatus::Processing
        );
    }

    #[test]
    fn test_customer_cannot_advance_fulfillment() {
        let (mut order, _, _) = paid_order();
        let item = order.items[0].id;
        let customer = Actor::Customer(order.customer_id);
        assert!(FulfillmentTracker::confirm(&mut order, item, &customer).is_err());
    }

    #[test]
    fn test_ship_requires_tracking_number() {
        let (mut order, supplier_a, _) = paid_order();
        let item = order.items[0].id;
        let actor = Actor::Supplier(supplier_a);

        FulfillmentTracker::confirm(&mut order, item, &actor).unwrap();
        FulfillmentTracker::pack(&mut order, item, &actor).unwrap();

        let result = FulfillmentTracker::ship(&mut order, item, &actor, "   ", None);
        assert!(matches!(result, Err(CoreError::Validation(_))));

        FulfillmentTracker::ship(&mut order, item, &actor, "TRK-100", None).unwrap();
        assert!(order.items[0].shipped_at.is_some());
        assert_eq!(order.items[0].tracking_number.as_deref(), Some("TRK-100"));
    }

    #[test]
    fn test_full_two_supplier_flow_rolls_order_up() {
        let (mut order, supplier_a, supplier_b) = paid_order();
        let (item_a, item_b) = (order.items[0].id, order.items[1].id);
        let (actor_a, actor_b) = (Actor::Supplier(supplier_a), Actor::Supplier(supplier_b));

        FulfillmentTracker::confirm(&mut order, item_a, &actor_a).unwrap();
        FulfillmentTracker::confirm(&mut order, item_b, &actor_b).unwrap();
        FulfillmentTracker::pack(&mut order, item_a, &actor_a).unwrap();
        FulfillmentTracker::pack(&mut order, item_b, &actor_b).unwrap();
        assert_eq!(order.status, OrderStatus::Packed);

        let whole_order = FulfillmentTracker::ship(&mut order, item_a, &actor_a, "TRK-A", None).unwrap();
        assert!(!whole_order);
        assert_eq!(order.status, OrderStatus::Packed);

        let whole_order = FulfillmentTracker::ship(&mut order, item_b, &actor_b, "TRK-B", None).unwrap();
        assert!(whole_order);
        assert_eq!(order.status, OrderStatus::Shipped);

        FulfillmentTracker::deliver(&mut order, item_a, &actor_a).unwrap();
        let done = FulfillmentTracker::deliver(&mut order, item_b, &actor_b).unwrap();
        assert!(done);
        assert_eq!(order.status, OrderStatus::Delivered);
    }

    #[test]
    fn test_confirm_rejected_once_order_packed() {
        let (mut order, supplier_a, supplier_b) = paid_order();
        let (item_a, item_b) = (order.items[0].id, order.items[1].id);
        let (actor_a, actor_b) = (Actor::Supplier(supplier_a), Actor::Supplier(supplier_b));

        FulfillmentTracker::confirm(&mut order, item_a, &actor_a).unwrap();
        FulfillmentTracker::confirm(&mut order, item_b, &actor_b).unwrap();
        FulfillmentTracker::pack(&mut order, item_a, &actor_a).unwrap();
        FulfillmentTracker::pack(&mut order, item_b, &actor_b).unwrap();
        assert_eq!(order.status, OrderStatus::Packed);

        // Frozen item set: nothing left in Pending, and even if there were,
        // the parent is past Paid.
        let result = FulfillmentTracker::confirm(&mut order, item_a, &actor_a);
        assert!(matches!(result, Err(CoreError::StateConflict { .. })));
    }

    #[test]
    fn test_tracking_events_drive_shipment_status() {
        let (order, _, _) = paid_order();
        let mut shipment = Shipment::new(
            order.id,
            Some(order.items[0].id),
            address("Supplier A Warehouse"),
            address("Customer"),
        );

        shipment
            .record_event(ShipmentStatus::LabelCreated, None, Some("label printed".into()))
            .unwrap();
        shipment
            .record_event(ShipmentStatus::PickedUp, Some("Springfield depot".into()), None)
            .unwrap();
        shipment
            .record_event(ShipmentStatus::InTransit, Some("Chicago hub".into()), None)
            .unwrap();

        assert_eq!(shipment.status, ShipmentStatus::InTransit);
        assert!(shipment.status_matches_log());
        assert_eq!(shipment.events.len(), 4);
    }

    #[test]
    fn test_shipment_cannot_skip_states() {
        let (order, _, _) = paid_order();
        let mut shipment = Shipment::new(order.id, None, address("From"), address("To"));

        let result = shipment.record_event(ShipmentStatus::Delivered, None, None);
        assert!(matches!(result, Err(CoreError::StateConflict { .. })));
        // The failed transition left no event behind.
        assert_eq!(shipment.events.len(), 1);
        assert!(shipment.status_matches_log());
    }

    #[test]
    fn test_mark_returned_only_after_shipping() {
        let (mut order, supplier_a, _) = paid_order();
        let item = order.items[0].id;

        let result = FulfillmentTracker::mark_returned(&mut order, item);
        assert!(result.is_err());

        let actor = Actor::Supplier(supplier_a);
        FulfillmentTracker::confirm(&mut order, item, &actor).unwrap();
        FulfillmentTracker::pack(&mut order, item, &actor).unwrap();
        FulfillmentTracker::ship(&mut order, item, &actor, "TRK-1", None).unwrap();
        FulfillmentTracker::mark_returned(&mut order, item).unwrap();
        assert_eq!(
            order.items[0].fulfillment_status,
            ItemFulfillmentStatus::Returned
        );
    }
}
