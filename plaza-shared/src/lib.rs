pub mod money;
pub mod idempotency;
pub mod events;
pub mod pii;

pub use money::{Currency, Money, MoneyError};
