use async_trait::async_trait;
use plaza_core::CoreResult;
use plaza_order::fulfillment::{Shipment, TrackingEvent};
use plaza_order::repository::ShipmentRepository;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{db_err, encode_status, json_err};

/// Shipments are stored as JSONB documents (events included) plus a
/// normalized append-only tracking_events table for carrier-side queries.
pub struct PgShipmentRepository {
    pool: PgPool,
}

impl PgShipmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode(document: Value) -> CoreResult<Shipment> {
        serde_json::from_value(document).map_err(json_err)
    }

    async fn insert_event(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event: &TrackingEvent,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tracking_events (id, shipment_id, event_type, location, description, event_time)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.shipment_id)
        .bind(encode_status(&event.event_type)?)
        .bind(event.location.as_deref())
        .bind(event.description.as_deref())
        .bind(event.event_time)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl ShipmentRepository for PgShipmentRepository {
    async fn insert_shipment(&self, shipment: &Shipment) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO shipments (id, order_id, order_item_id, status, document, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(shipment.id)
        .bind(shipment.order_id)
        .bind(shipment.order_item_id)
        .bind(encode_status(&shipment.status)?)
        .bind(serde_json::to_value(shipment).map_err(json_err)?)
        .bind(shipment.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for event in &shipment.events {
            Self::insert_event(&mut tx, event).await?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn find_shipment(&self, shipment_id: Uuid) -> CoreResult<Option<Shipment>> {
        let row: Option<(Value,)> = sqlx::query_as("SELECT document FROM shipments WHERE id = $1")
            .bind(shipment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|(document,)| Self::decode(document)).transpose()
    }

    async fn list_shipments_for_order(&self, order_id: Uuid) -> CoreResult<Vec<Shipment>> {
        let rows: Vec<(Value,)> = sqlx::query_as(
            "SELECT document FROM shipments WHERE order_id = $1 ORDER BY created_at",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut shipments = Vec::with_capacity(rows.len());
        for (document,) in rows {
            shipments.push(Self::decode(document)?);
        }
        Ok(shipments)
    }

    async fn append_tracking_event(
        &self,
        shipment: &Shipment,
        event: &TrackingEvent,
    ) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("UPDATE shipments SET status = $2, document = $3 WHERE id = $1")
            .bind(shipment.id)
            .bind(encode_status(&shipment.status)?)
            .bind(serde_json::to_value(shipment).map_err(json_err)?)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        Self::insert_event(&mut tx, event).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}
