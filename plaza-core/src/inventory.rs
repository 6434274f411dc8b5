use async_trait::async_trait;
use uuid::Uuid;

use crate::CoreResult;

/// External inventory reservation service.
///
/// `reserve` runs at order creation, before any payment work; a failure
/// aborts checkout. `release` runs on cancellation and must be
/// exactly-once: repeated calls for the same item return `false` instead
/// of releasing again.
#[async_trait]
pub trait InventoryReservation: Send + Sync {
    async fn reserve(&self, order_item_id: Uuid, variant_id: Uuid, qty: u32) -> CoreResult<()>;

    /// Returns whether this call actually released the reservation.
    async fn release(&self, order_item_id: Uuid) -> CoreResult<bool>;
}
