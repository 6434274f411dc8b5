use chrono::{DateTime, NaiveDate, Utc};
use plaza_core::{Actor, CoreError, CoreResult};
use plaza_shared::Money;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::fulfillment::FulfillmentTracker;
use crate::ledger::{PaymentRefund, RefundStatus};
use crate::models::{ItemFulfillmentStatus, Order, StatusEntry};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnStatus {
    Requested,
    Approved,
    Rejected,
    Resolved,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionType {
    Refund,
    Replacement,
    StoreCredit,
}

/// Evidence attachment on a return item. Inert data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnMedia {
    pub id: Uuid,
    pub url: String,
    pub media_type: String,
}

/// One returned line: references exactly one OrderItem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnItem {
    pub order_item_id: Uuid,
    pub quantity: u32,
    pub reason: String,
    pub media: Vec<ReturnMedia>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupInfo {
    pub address_id: Option<Uuid>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// A customer's return request against one order, scoped to a single
/// supplier's items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub order_id: Uuid,
    /// The one supplier whose items this request covers; drives the
    /// approve/reject authorization check.
    pub supplier_id: Uuid,
    pub status: ReturnStatus,
    pub resolution_type: ResolutionType,
    pub items: Vec<ReturnItem>,
    pub status_history: Vec<StatusEntry<ReturnStatus>>,
    pub refund_id: Option<Uuid>,
    pub refund_amount: Option<Money>,
    pub refund_status: Option<RefundStatus>,
    pub rejection_reason: Option<String>,
    pub pickup: Option<PickupInfo>,
    pub created_at: DateTime<Utc>,
}

impl ReturnRequest {
    fn push_status(&mut self, status: ReturnStatus, note: String) {
        self.status = status;
        self.status_history.push(StatusEntry::new(status, Some(note)));
    }
}

/// Return lifecycle: requested -> approved -> resolved, or rejected.
///
/// Approval only flags the affected items; money and fulfillment reversal
/// happen at resolution, after the refund has settled on the gateway side.
pub struct ReturnWorkflow;

impl ReturnWorkflow {
    pub fn create(
        order: &Order,
        customer: Uuid,
        items: Vec<ReturnItem>,
        resolution_type: ResolutionType,
        pickup: Option<PickupInfo>,
        today: NaiveDate,
    ) -> CoreResult<ReturnRequest> {
        if customer != order.customer_id {
            return Err(CoreError::Conflict(format!(
                "customer {} does not own order {}",
                customer, order.id
            )));
        }
        if items.is_empty() {
            return Err(CoreError::Validation(
                "a return request needs at least one item".to_string(),
            ));
        }

        let mut supplier_id = None;
        let mut seen = Vec::new();
        for line in &items {
            if seen.contains(&line.order_item_id) {
                return Err(CoreError::Validation(format!(
                    "order item {} referenced twice",
                    line.order_item_id
                )));
            }
            seen.push(line.order_item_id);

            let item = order.item(line.order_item_id)?;
            if !item.is_returnable {
                return Err(CoreError::Validation(format!(
                    "order item {} is not returnable",
                    item.id
                )));
            }
            if !item.within_return_window(today) {
                return Err(CoreError::Validation(format!(
                    "return window for item {} closed on {}",
                    item.id, item.return_deadline
                )));
            }
            if line.quantity == 0 || line.quantity > item.quantity {
                return Err(CoreError::Validation(format!(
                    "return quantity {} out of range for item {} (ordered {})",
                    line.quantity, item.id, item.quantity
                )));
            }
            if !matches!(
                item.fulfillment_status,
                ItemFulfillmentStatus::Shipped | ItemFulfillmentStatus::Delivered
            ) {
                return Err(CoreError::state_conflict(
                    item.fulfillment_status,
                    "RETURN_REQUESTED",
                ));
            }
            // One supplier per request; a cart spanning suppliers files
            // one request per supplier.
            match supplier_id {
                None => supplier_id = Some(item.supplier_id),
                Some(existing) if existing != item.supplier_id => {
                    return Err(CoreError::Validation(
                        "a return request cannot span multiple suppliers".to_string(),
                    ));
                }
                Some(_) => {}
            }
        }

        let Some(supplier_id) = supplier_id else {
            return Err(CoreError::Validation(
                "a return request needs at least one item".to_string(),
            ));
        };

        let request = ReturnRequest {
            id: Uuid::new_v4(),
            customer_id: customer,
            order_id: order.id,
            supplier_id,
            status: ReturnStatus::Requested,
            resolution_type,
            items,
            status_history: vec![StatusEntry::new(
                ReturnStatus::Requested,
                Some("return requested by customer".to_string()),
            )],
            refund_id: None,
            refund_amount: None,
            refund_status: None,
            rejection_reason: None,
            pickup,
            created_at: Utc::now(),
        };
        info!(return_id = %request.id, order_id = %order.id, "return requested");
        Ok(request)
    }

    /// Approve a pending request. Marks the referenced items as
    /// return-requested; fulfillment status and money are untouched until
    /// resolution.
    pub fn approve(
        request: &mut ReturnRequest,
        order: &mut Order,
        supplier: &Actor,
    ) -> CoreResult<()> {
        Self::authorize(request, supplier)?;
        if request.status != ReturnStatus::Requested {
            return Err(CoreError::state_conflict(request.status, ReturnStatus::Approved));
        }

        for line in &request.items {
            order.item_mut(line.order_item_id)?.return_requested = true;
        }
        request.push_status(
            ReturnStatus::Approved,
            format!("approved by {}", supplier.describe()),
        );
        info!(return_id = %request.id, "return approved");
        Ok(())
    }

    /// Reject a pending request; terminal, requires a reason.
    pub fn reject(request: &mut ReturnRequest, supplier: &Actor, reason: &str) -> CoreResult<()> {
        Self::authorize(request, supplier)?;
        if request.status != ReturnStatus::Requested {
            return Err(CoreError::state_conflict(request.status, ReturnStatus::Rejected));
        }
        if reason.trim().is_empty() {
            return Err(CoreError::Validation(
                "rejection requires a reason".to_string(),
            ));
        }

        request.rejection_reason = Some(reason.to_string());
        request.push_status(
            ReturnStatus::Rejected,
            format!("rejected by {}: {}", supplier.describe(), reason),
        );
        Ok(())
    }

    /// Resolve an approved request once its refund has settled. Links the
    /// refund, marks the request resolved, and reverses fulfillment
    /// bookkeeping for the returned items.
    pub fn resolve(
        request: &mut ReturnRequest,
        order: &mut Order,
        refund: &PaymentRefund,
    ) -> CoreResult<()> {
        if request.status != ReturnStatus::Approved {
            return Err(CoreError::state_conflict(request.status, ReturnStatus::Resolved));
        }
        if refund.order_id != request.order_id {
            return Err(CoreError::Validation(format!(
                "refund {} belongs to a different order",
                refund.id
            )));
        }
        // Resolution waits for a terminal gateway state; a pending refund
        // keeps the request open.
        if refund.status != RefundStatus::Completed {
            return Err(CoreError::StateConflict {
                from: format!("refund {:?}", refund.status),
                to: "RESOLVED".to_string(),
            });
        }

        for line in &request.items {
            FulfillmentTracker::mark_returned(order, line.order_item_id)?;
        }
        request.refund_id = Some(refund.id);
        request.refund_amount = Some(refund.amount.clone());
        request.refund_status = Some(refund.status);
        request.push_status(
            ReturnStatus::Resolved,
            format!("refund {} settled for {}", refund.id, refund.amount),
        );
        info!(return_id = %request.id, refund_id = %refund.id, "return resolved");
        Ok(())
    }

    fn authorize(request: &ReturnRequest, supplier: &Actor) -> CoreResult<()> {
        match supplier.supplier_id() {
            Some(sid) if sid == request.supplier_id => Ok(()),
            _ => Err(CoreError::Conflict(format!(
                "{} does not own return request {}",
                supplier.describe(),
                request.id
            ))),
        }
    }
}
