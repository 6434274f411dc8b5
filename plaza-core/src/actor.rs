use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who performed a state-changing operation.
///
/// A tagged variant with a typed reference, not a stringly
/// "actor_type"/"actor_id" pair: authorization checks match on the variant
/// and audit entries serialize the whole value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Actor {
    Customer(Uuid),
    Supplier(Uuid),
    Admin(Uuid),
    System,
}

impl Actor {
    pub fn supplier_id(&self) -> Option<Uuid> {
        match self {
            Actor::Supplier(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin(_))
    }

    /// Short label for status-history notes.
    pub fn describe(&self) -> String {
        match self {
            Actor::Customer(id) => format!("customer {}", id),
            Actor::Supplier(id) => format!("supplier {}", id),
            Actor::Admin(id) => format!("admin {}", id),
            Actor::System => "system".to_string(),
        }
    }
}
