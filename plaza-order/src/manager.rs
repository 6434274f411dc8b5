use plaza_core::{Actor, CoreError, CoreResult};
use tracing::info;

use crate::ledger::PaymentStatus;
use crate::models::{CancellationInfo, ItemFulfillmentStatus, Order, OrderStatus};

/// Result of a cancel call. `already_cancelled` lets callers make the
/// follow-up work (inventory release, refund) exactly-once: a repeated
/// cancel is a no-op and must not release or refund again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelOutcome {
    pub already_cancelled: bool,
    pub needs_refund: bool,
}

/// Order-level state machine. Pure transitions over an `Order`; all
/// persistence and side effects live with the caller, so none of this
/// runs while a lock or transaction spans an await point.
pub struct OrderLifecycle;

impl OrderLifecycle {
    /// Pending -> Paid. Triggered only by the linked Payment reaching
    /// `Completed`; there is no other way into Paid.
    pub fn mark_paid(order: &mut Order) -> CoreResult<()> {
        if order.status != OrderStatus::Pending {
            return Err(CoreError::state_conflict(order.status, OrderStatus::Paid));
        }
        order.payment_status = PaymentStatus::Completed;
        order.push_status(OrderStatus::Paid, Some("payment captured".to_string()));
        info!(order_id = %order.id, "order marked paid");
        Ok(())
    }

    /// Roll the order status up from its item states. Walks the chain one
    /// step at a time so the history stays a contiguous ordered log, and
    /// is idempotent: with unchanged items a second call appends nothing.
    ///
    /// Policy: Packed -> Shipped requires every item shipped, not just
    /// one. Returns whether anything advanced.
    pub fn recompute_status(order: &mut Order) -> CoreResult<bool> {
        let mut advanced = false;
        while let Some(next) = Self::next_rollup_step(order) {
            let note = match next {
                OrderStatus::Packed => "all items in processing or beyond",
                OrderStatus::Shipped => "all items shipped",
                OrderStatus::Delivered => "all items delivered",
                _ => "status rollup",
            };
            order.push_status(next, Some(note.to_string()));
            advanced = true;
        }
        Ok(advanced)
    }

    fn next_rollup_step(order: &Order) -> Option<OrderStatus> {
        let all_reached = |target: ItemFulfillmentStatus| {
            order.items.iter().all(|i| i.fulfillment_status.reached(target))
        };
        match order.status {
            OrderStatus::Paid if all_reached(ItemFulfillmentStatus::Processing) => {
                Some(OrderStatus::Packed)
            }
            OrderStatus::Packed if all_reached(ItemFulfillmentStatus::Shipped) => {
                Some(OrderStatus::Shipped)
            }
            OrderStatus::Shipped
                if order
                    .items
                    .iter()
                    .all(|i| i.fulfillment_status == ItemFulfillmentStatus::Delivered) =>
            {
                Some(OrderStatus::Delivered)
            }
            // Pending orders wait for payment; terminal orders never move.
            _ => None,
        }
    }

    /// Cancel from Pending/Paid/Packed. Shipped and Delivered orders can
    /// only be unwound through the return workflow.
    pub fn cancel(order: &mut Order, actor: Actor, reason: &str) -> CoreResult<CancelOutcome> {
        if order.status == OrderStatus::Cancelled {
            return Ok(CancelOutcome {
                already_cancelled: true,
                needs_refund: false,
            });
        }
        if !matches!(
            order.status,
            OrderStatus::Pending | OrderStatus::Paid | OrderStatus::Packed
        ) {
            return Err(CoreError::state_conflict(order.status, OrderStatus::Cancelled));
        }
        if reason.trim().is_empty() {
            return Err(CoreError::Validation(
                "cancellation requires a reason".to_string(),
            ));
        }

        let needs_refund = matches!(
            order.payment_status,
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded
        );
        order.cancellation = Some(CancellationInfo {
            reason: reason.to_string(),
            cancelled_by: actor,
            cancelled_at: chrono::Utc::now(),
        });
        order.push_status(
            OrderStatus::Cancelled,
            Some(format!("cancelled by {}: {}", actor.describe(), reason)),
        );
        info!(order_id = %order.id, actor = %actor.describe(), "order cancelled");
        Ok(CancelOutcome {
            already_cancelled: false,
            needs_refund,
        })
    }
}
