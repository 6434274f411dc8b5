//! Order fulfillment and money movement for the marketplace: the order
//! aggregate, per-supplier fulfillment, the payment/refund ledger, shipment
//! tracking and the return workflow. Pure domain logic; persistence and
//! messaging adapters live in `plaza-store`.

pub mod fulfillment;
pub mod ledger;
pub mod manager;
pub mod models;
pub mod orchestrator;
pub mod repository;
pub mod returns;

#[cfg(test)]
mod testutil;

pub use fulfillment::{FulfillmentTracker, Shipment, ShipmentStatus, TrackingEvent};
pub use ledger::{Payment, PaymentLedger, PaymentRefund, PaymentStatus, RefundStatus, RetryPolicy};
pub use manager::{CancelOutcome, OrderLifecycle};
pub use models::{ItemFulfillmentStatus, Order, OrderItem, OrderStatus};
pub use orchestrator::{Checkout, CheckoutOrchestrator};
pub use returns::{ReturnRequest, ReturnStatus, ReturnWorkflow};
