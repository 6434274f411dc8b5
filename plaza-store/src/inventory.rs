use async_trait::async_trait;
use plaza_core::inventory::InventoryReservation;
use plaza_core::{CoreError, CoreResult};
use redis::RedisResult;
use tracing::info;
use uuid::Uuid;

fn cache_err(err: redis::RedisError) -> CoreError {
    CoreError::Internal(format!("redis error: {err}"))
}

/// Redis-backed stock reservations.
///
/// Stock lives at `stock:{variant_id}`. A reservation atomically decrements
/// the counter and records `resv:{order_item_id}` with the variant and
/// quantity; release reads that record, restores the counter and deletes it
/// in one script, so a second release for the same item finds nothing and
/// returns `false`.
#[derive(Clone)]
pub struct RedisInventory {
    client: redis::Client,
    reservation_ttl_seconds: u64,
}

impl RedisInventory {
    pub async fn new(
        connection_string: &str,
        reservation_ttl_seconds: u64,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            reservation_ttl_seconds,
        })
    }

    /// Seed or correct the stock counter; used by catalog sync tooling.
    pub async fn set_stock(&self, variant_id: Uuid, count: i64) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("stock:{}", variant_id);
        redis::AsyncCommands::set(&mut conn, key, count).await
    }

    pub async fn get_stock(&self, variant_id: Uuid) -> RedisResult<Option<i64>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("stock:{}", variant_id);
        redis::AsyncCommands::get(&mut conn, key).await
    }
}

#[async_trait]
impl InventoryReservation for RedisInventory {
    async fn reserve(&self, order_item_id: Uuid, variant_id: Uuid, qty: u32) -> CoreResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(cache_err)?;

        // Check-and-decrement must be atomic or two checkouts can both
        // pass the check and oversell; a missing stock key means the
        // catalog was never synced, which aborts checkout rather than
        // guessing.
        let script = redis::Script::new(
            r#"
            local stock = redis.call("GET", KEYS[1])
            if not stock then return -1 end
            if tonumber(stock) < tonumber(ARGV[1]) then return 0 end
            redis.call("DECRBY", KEYS[1], ARGV[1])
            redis.call("HSET", KEYS[2], "variant_id", ARGV[2], "qty", ARGV[1])
            redis.call("EXPIRE", KEYS[2], ARGV[3])
            return 1
            "#,
        );

        let outcome: i64 = script
            .key(format!("stock:{}", variant_id))
            .key(format!("resv:{}", order_item_id))
            .arg(qty)
            .arg(variant_id.to_string())
            .arg(self.reservation_ttl_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(cache_err)?;

        match outcome {
            1 => {
                info!(order_item_id = %order_item_id, variant_id = %variant_id, qty, "stock reserved");
                Ok(())
            }
            0 => Err(CoreError::Conflict(format!(
                "insufficient stock for variant {}",
                variant_id
            ))),
            _ => Err(CoreError::Conflict(format!(
                "no stock record for variant {}",
                variant_id
            ))),
        }
    }

    async fn release(&self, order_item_id: Uuid) -> CoreResult<bool> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(cache_err)?;

        // Read-restore-delete in one script: the reservation record is the
        // release marker, so only the first caller finds it.
        let script = redis::Script::new(
            r#"
            local variant = redis.call("HGET", KEYS[1], "variant_id")
            if not variant then return 0 end
            local qty = redis.call("HGET", KEYS[1], "qty")
            redis.call("INCRBY", ARGV[1] .. variant, qty)
            redis.call("DEL", KEYS[1])
            return 1
            "#,
        );

        let released: i64 = script
            .key(format!("resv:{}", order_item_id))
            .arg("stock:")
            .invoke_async(&mut conn)
            .await
            .map_err(cache_err)?;

        if released == 1 {
            info!(order_item_id = %order_item_id, "reservation released");
        }
        Ok(released == 1)
    }
}
