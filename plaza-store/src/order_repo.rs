use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use plaza_core::CoreResult;
use plaza_order::models::{
    CancellationInfo, ItemFulfillmentStatus, Order, OrderItem, OrderStatus, StatusEntry,
    VariantSnapshot,
};
use plaza_order::repository::OrderRepository;
use plaza_order::PaymentStatus;
use plaza_shared::{Currency, Money};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{db_err, decode_status, encode_status, json_err};

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    customer_id: Uuid,
    shipping_address_id: Uuid,
    billing_address_id: Uuid,
    status: String,
    payment_status: String,
    total_amount: Decimal,
    currency: String,
    cancellation: Option<Value>,
    archived: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    supplier_id: Uuid,
    variant: Value,
    quantity: i32,
    price_at_purchase: Decimal,
    discounted_price: Decimal,
    final_price: Decimal,
    currency: String,
    fulfillment_status: String,
    tracking_number: Option<String>,
    tracking_url: Option<String>,
    is_returnable: bool,
    return_deadline: NaiveDate,
    return_requested: bool,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    status: String,
    at: DateTime<Utc>,
    note: Option<String>,
}

impl OrderItemRow {
    fn into_domain(self) -> CoreResult<OrderItem> {
        let currency = Currency::new(&self.currency);
        let variant: VariantSnapshot = serde_json::from_value(self.variant).map_err(json_err)?;
        Ok(OrderItem {
            id: self.id,
            order_id: self.order_id,
            supplier_id: self.supplier_id,
            variant,
            quantity: self.quantity as u32,
            price_at_purchase: Money::new(self.price_at_purchase, currency.clone()),
            discounted_price: Money::new(self.discounted_price, currency.clone()),
            final_price: Money::new(self.final_price, currency),
            fulfillment_status: decode_status::<ItemFulfillmentStatus>(&self.fulfillment_status)?,
            tracking_number: self.tracking_number,
            tracking_url: self.tracking_url,
            is_returnable: self.is_returnable,
            return_deadline: self.return_deadline,
            return_requested: self.return_requested,
            shipped_at: self.shipped_at,
            delivered_at: self.delivered_at,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert_order(&self, order: &Order) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let cancellation = order
            .cancellation
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(json_err)?;
        sqlx::query(
            r#"
            INSERT INTO orders (id, customer_id, shipping_address_id, billing_address_id,
                                status, payment_status, total_amount, currency,
                                cancellation, archived, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order.id)
        .bind(order.customer_id)
        .bind(order.shipping_address_id)
        .bind(order.billing_address_id)
        .bind(encode_status(&order.status)?)
        .bind(encode_status(&order.payment_status)?)
        .bind(order.total_amount.amount())
        .bind(order.total_amount.currency().as_str())
        .bind(cancellation)
        .bind(order.archived)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, supplier_id, variant, quantity,
                                         price_at_purchase, discounted_price, final_price,
                                         currency, fulfillment_status, tracking_number,
                                         tracking_url, is_returnable, return_deadline,
                                         return_requested, shipped_at, delivered_at, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                "#,
            )
            .bind(item.id)
            .bind(item.order_id)
            .bind(item.supplier_id)
            .bind(serde_json::to_value(&item.variant).map_err(json_err)?)
            .bind(item.quantity as i32)
            .bind(item.price_at_purchase.amount())
            .bind(item.discounted_price.amount())
            .bind(item.final_price.amount())
            .bind(item.final_price.currency().as_str())
            .bind(encode_status(&item.fulfillment_status)?)
            .bind(item.tracking_number.as_deref())
            .bind(item.tracking_url.as_deref())
            .bind(item.is_returnable)
            .bind(item.return_deadline)
            .bind(item.return_requested)
            .bind(item.shipped_at)
            .bind(item.delivered_at)
            .bind(item.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        for entry in &order.status_history {
            sqlx::query(
                "INSERT INTO order_status_history (order_id, status, at, note) VALUES ($1, $2, $3, $4)",
            )
            .bind(order.id)
            .bind(encode_status(&entry.status)?)
            .bind(entry.at)
            .bind(entry.note.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn find_order(&self, order_id: Uuid) -> CoreResult<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as(
            r#"
            SELECT id, customer_id, shipping_address_id, billing_address_id, status,
                   payment_status, total_amount, currency, cancellation, archived,
                   created_at, updated_at
            FROM orders WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let item_rows: Vec<OrderItemRow> = sqlx::query_as(
            r#"
            SELECT id, order_id, supplier_id, variant, quantity, price_at_purchase,
                   discounted_price, final_price, currency, fulfillment_status,
                   tracking_number, tracking_url, is_returnable, return_deadline,
                   return_requested, shipped_at, delivered_at, created_at
            FROM order_items WHERE order_id = $1 ORDER BY created_at
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let history_rows: Vec<HistoryRow> = sqlx::query_as(
            "SELECT status, at, note FROM order_status_history WHERE order_id = $1 ORDER BY at, id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut items = Vec::with_capacity(item_rows.len());
        for item_row in item_rows {
            items.push(item_row.into_domain()?);
        }

        let mut status_history = Vec::with_capacity(history_rows.len());
        for entry in history_rows {
            status_history.push(StatusEntry {
                status: decode_status::<OrderStatus>(&entry.status)?,
                at: entry.at,
                note: entry.note,
            });
        }

        let cancellation: Option<CancellationInfo> = row
            .cancellation
            .map(serde_json::from_value)
            .transpose()
            .map_err(json_err)?;

        Ok(Some(Order {
            id: row.id,
            customer_id: row.customer_id,
            shipping_address_id: row.shipping_address_id,
            billing_address_id: row.billing_address_id,
            status: decode_status::<OrderStatus>(&row.status)?,
            payment_status: decode_status::<PaymentStatus>(&row.payment_status)?,
            total_amount: Money::new(row.total_amount, Currency::new(&row.currency)),
            items,
            status_history,
            cancellation,
            archived: row.archived,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    async fn list_orders_for_customer(
        &self,
        customer_id: Uuid,
        include_archived: bool,
    ) -> CoreResult<Vec<Order>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM orders
            WHERE customer_id = $1 AND (archived = FALSE OR $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(customer_id)
        .bind(include_archived)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut orders = Vec::with_capacity(ids.len());
        for (id,) in ids {
            if let Some(order) = self.find_order(id).await? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
        note: Option<&str>,
    ) -> CoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Compare-and-swap on the stored status: losing a race leaves the
        // row untouched and the caller reloads.
        let result = sqlx::query(
            "UPDATE orders SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3",
        )
        .bind(encode_status(&next)?)
        .bind(order_id)
        .bind(encode_status(&expected)?)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO order_status_history (order_id, status, at, note) VALUES ($1, $2, NOW(), $3)",
        )
        .bind(order_id)
        .bind(encode_status(&next)?)
        .bind(note)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn update_item(&self, item: &OrderItem) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE order_items
            SET fulfillment_status = $2, tracking_number = $3, tracking_url = $4,
                return_requested = $5, shipped_at = $6, delivered_at = $7
            WHERE id = $1
            "#,
        )
        .bind(item.id)
        .bind(encode_status(&item.fulfillment_status)?)
        .bind(item.tracking_number.as_deref())
        .bind(item.tracking_url.as_deref())
        .bind(item.return_requested)
        .bind(item.shipped_at)
        .bind(item.delivered_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn save_cancellation(&self, order: &Order) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let cancellation = order
            .cancellation
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(json_err)?;
        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, payment_status = $3, cancellation = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(encode_status(&order.status)?)
        .bind(encode_status(&order.payment_status)?)
        .bind(cancellation)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if let Some(entry) = order.status_history.last() {
            sqlx::query(
                "INSERT INTO order_status_history (order_id, status, at, note) VALUES ($1, $2, $3, $4)",
            )
            .bind(order.id)
            .bind(encode_status(&entry.status)?)
            .bind(entry.at)
            .bind(entry.note.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn archive_order(&self, order_id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET archived = TRUE, updated_at = NOW()
            WHERE id = $1 AND status IN ('DELIVERED', 'CANCELLED')
            "#,
        )
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
