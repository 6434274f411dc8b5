use plaza_shared::{Currency, Money};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Order, OrderItem, VariantSnapshot};

pub(crate) fn usd(amount: Decimal) -> Money {
    Money::new(amount, Currency::new("USD"))
}

pub(crate) fn variant(name: &str) -> VariantSnapshot {
    VariantSnapshot {
        variant_id: Uuid::new_v4(),
        name: name.to_string(),
        image_url: None,
        attributes: serde_json::json!({}),
    }
}

pub(crate) fn item(supplier_id: Uuid, price: Decimal, quantity: u32) -> OrderItem {
    OrderItem::new(
        Uuid::nil(),
        supplier_id,
        variant("Walnut Desk Organizer"),
        quantity,
        usd(price),
        usd(price),
        true,
        7,
    )
}

pub(crate) fn order_with_items(items: Vec<OrderItem>) -> Order {
    Order::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        items,
        Currency::new("USD"),
    )
    .unwrap()
}

/// The canonical two-supplier order: 600.00 from supplier A, 400.00 from
/// supplier B, total 1000.00.
pub(crate) fn two_supplier_order() -> (Order, Uuid, Uuid) {
    let supplier_a = Uuid::new_v4();
    let supplier_b = Uuid::new_v4();
    let order = order_with_items(vec![
        item(supplier_a, Decimal::from(600), 1),
        item(supplier_b, Decimal::from(400), 1),
    ]);
    (order, supplier_a, supplier_b)
}
