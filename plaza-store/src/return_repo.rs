use async_trait::async_trait;
use plaza_core::CoreResult;
use plaza_order::repository::ReturnRepository;
use plaza_order::returns::ReturnRequest;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{db_err, encode_status, json_err};

/// Return requests are stored document-style: indexed scalar columns for
/// lookups, the full request as JSONB. The request's own status history
/// rides inside the document.
pub struct PgReturnRepository {
    pool: PgPool,
}

impl PgReturnRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode(document: Value) -> CoreResult<ReturnRequest> {
        serde_json::from_value(document).map_err(json_err)
    }
}

#[async_trait]
impl ReturnRepository for PgReturnRepository {
    async fn insert_return(&self, request: &ReturnRequest) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO return_requests (id, customer_id, order_id, supplier_id, status,
                                         document, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(request.id)
        .bind(request.customer_id)
        .bind(request.order_id)
        .bind(request.supplier_id)
        .bind(encode_status(&request.status)?)
        .bind(serde_json::to_value(request).map_err(json_err)?)
        .bind(request.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_return(&self, return_id: Uuid) -> CoreResult<Option<ReturnRequest>> {
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT document FROM return_requests WHERE id = $1")
                .bind(return_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        row.map(|(document,)| Self::decode(document)).transpose()
    }

    async fn list_returns_for_supplier(&self, supplier_id: Uuid) -> CoreResult<Vec<ReturnRequest>> {
        let rows: Vec<(Value,)> = sqlx::query_as(
            "SELECT document FROM return_requests WHERE supplier_id = $1 ORDER BY created_at DESC",
        )
        .bind(supplier_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut requests = Vec::with_capacity(rows.len());
        for (document,) in rows {
            requests.push(Self::decode(document)?);
        }
        Ok(requests)
    }

    async fn save_return(&self, request: &ReturnRequest) -> CoreResult<()> {
        sqlx::query("UPDATE return_requests SET status = $2, document = $3 WHERE id = $1")
            .bind(request.id)
            .bind(encode_status(&request.status)?)
            .bind(serde_json::to_value(request).map_err(json_err)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
