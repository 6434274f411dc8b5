use async_trait::async_trait;
use chrono::{DateTime, Utc};
use plaza_core::CoreResult;
use plaza_order::ledger::{
    Payment, PaymentRefund, PaymentStatus, PaymentTransaction, TransactionKind,
};
use plaza_order::repository::PaymentRepository;
use plaza_shared::{Currency, Money};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{db_err, decode_status, encode_status, json_err};

pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: Uuid,
    customer_id: Uuid,
    amount: Decimal,
    currency: String,
    payment_method: String,
    external_txn_id: Option<String>,
    status: String,
    refund_amount: Decimal,
    pending_refund_amount: Decimal,
    captured_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    payment_id: Uuid,
    kind: String,
    amount: Decimal,
    currency: String,
    success: bool,
    gateway_reference: Option<String>,
    message: Option<String>,
    created_at: DateTime<Utc>,
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn insert_payment(&self, payment: &Payment) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, customer_id, amount, currency, payment_method,
                                  external_txn_id, status, refund_amount, pending_refund_amount,
                                  captured_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(payment.id)
        .bind(payment.order_id)
        .bind(payment.customer_id)
        .bind(payment.amount.amount())
        .bind(payment.amount.currency().as_str())
        .bind(&payment.payment_method)
        .bind(payment.external_txn_id.as_deref())
        .bind(encode_status(&payment.status)?)
        .bind(payment.refund_amount.amount())
        .bind(payment.pending_refund_amount.amount())
        .bind(payment.captured_at)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_payment_for_order(&self, order_id: Uuid) -> CoreResult<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as(
            r#"
            SELECT id, order_id, customer_id, amount, currency, payment_method,
                   external_txn_id, status, refund_amount, pending_refund_amount,
                   captured_at, created_at, updated_at
            FROM payments WHERE order_id = $1
            ORDER BY created_at DESC LIMIT 1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let currency = Currency::new(&row.currency);
        Ok(Some(Payment {
            id: row.id,
            order_id: row.order_id,
            customer_id: row.customer_id,
            amount: Money::new(row.amount, currency.clone()),
            payment_method: row.payment_method,
            external_txn_id: row.external_txn_id,
            status: decode_status::<PaymentStatus>(&row.status)?,
            refund_amount: Money::new(row.refund_amount, currency.clone()),
            pending_refund_amount: Money::new(row.pending_refund_amount, currency),
            captured_at: row.captured_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    async fn save_payment_with_transactions(
        &self,
        payment: &Payment,
        transactions: &[PaymentTransaction],
    ) -> CoreResult<()> {
        // Payment state and its audit rows commit together: a crash can
        // never leave a captured payment without the transaction that
        // proves what the gateway said.
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            UPDATE payments
            SET external_txn_id = $2, status = $3, refund_amount = $4,
                pending_refund_amount = $5, captured_at = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(payment.external_txn_id.as_deref())
        .bind(encode_status(&payment.status)?)
        .bind(payment.refund_amount.amount())
        .bind(payment.pending_refund_amount.amount())
        .bind(payment.captured_at)
        .bind(payment.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for txn in transactions {
            sqlx::query(
                r#"
                INSERT INTO payment_transactions (id, payment_id, kind, amount, currency,
                                                  success, gateway_reference, message, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(txn.id)
            .bind(txn.payment_id)
            .bind(encode_status(&txn.kind)?)
            .bind(txn.amount.amount())
            .bind(txn.amount.currency().as_str())
            .bind(txn.success)
            .bind(txn.gateway_reference.as_deref())
            .bind(txn.message.as_deref())
            .bind(txn.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn insert_refund(&self, refund: &PaymentRefund) -> CoreResult<()> {
        let processed_by = refund
            .processed_by
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(json_err)?;
        sqlx::query(
            r#"
            INSERT INTO payment_refunds (id, payment_id, order_id, order_item_id, amount,
                                         currency, reason, status, processed_by,
                                         external_refund_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(refund.id)
        .bind(refund.payment_id)
        .bind(refund.order_id)
        .bind(refund.order_item_id)
        .bind(refund.amount.amount())
        .bind(refund.amount.currency().as_str())
        .bind(&refund.reason)
        .bind(encode_status(&refund.status)?)
        .bind(processed_by)
        .bind(refund.external_refund_id.as_deref())
        .bind(refund.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_transactions(&self, payment_id: Uuid) -> CoreResult<Vec<PaymentTransaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, payment_id, kind, amount, currency, success, gateway_reference,
                   message, created_at
            FROM payment_transactions WHERE payment_id = $1 ORDER BY created_at
            "#,
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut transactions = Vec::with_capacity(rows.len());
        for row in rows {
            transactions.push(PaymentTransaction {
                id: row.id,
                payment_id: row.payment_id,
                kind: decode_status::<TransactionKind>(&row.kind)?,
                amount: Money::new(row.amount, Currency::new(&row.currency)),
                success: row.success,
                gateway_reference: row.gateway_reference,
                message: row.message,
                created_at: row.created_at,
            });
        }
        Ok(transactions)
    }
}
