//! Per-record lease repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres};
use std::time::Duration;
use uuid::Uuid;

use super::traits::{LeaseClaim, RecordLease};

#[derive(Clone)]
pub struct LeaseRepository {
    pool: PgPool,
}

impl LeaseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete expired leases. Returns the number of rows removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM record_leases WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await
            .context("Failed to purge expired leases")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RecordLease for LeaseRepository {
    async fn acquire(
        &self,
        record_id: &str,
        run_id: Uuid,
        holder: Uuid,
        ttl: Duration,
    ) -> Result<LeaseClaim> {
        let ttl = chrono::Duration::from_std(ttl).context("Lease TTL out of range")?;
        let expires_at = Utc::now() + ttl;

        // The conflict branch only fires for an expired lease or the same holder.
        // When it does not, the second SELECT reports who holds the record.
        let row = sqlx::query_as::<Postgres, (bool, Uuid)>(
            r#"
            WITH claimed AS (
                INSERT INTO record_leases (record_id, run_id, holder_id, acquired_at, expires_at)
                VALUES ($1, $2, $3, NOW(), $4)
                ON CONFLICT (record_id) DO UPDATE
                SET run_id = EXCLUDED.run_id,
                    holder_id = EXCLUDED.holder_id,
                    acquired_at = EXCLUDED.acquired_at,
                    expires_at = EXCLUDED.expires_at
                WHERE record_leases.expires_at < NOW()
                   OR record_leases.holder_id = EXCLUDED.holder_id
                RETURNING run_id
            )
            SELECT TRUE, run_id FROM claimed
            UNION ALL
            SELECT FALSE, run_id FROM record_leases
            WHERE record_id = $1 AND NOT EXISTS (SELECT 1 FROM claimed)
            "#,
        )
        .bind(record_id)
        .bind(run_id)
        .bind(holder)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to acquire record lease")?;

        Ok(match row {
            Some((true, _)) => LeaseClaim::Acquired,
            Some((false, current)) => LeaseClaim::Held {
                run_id: Some(current),
            },
            None => LeaseClaim::Held { run_id: None },
        })
    }

    async fn renew(&self, record_id: &str, holder: Uuid, ttl: Duration) -> Result<bool> {
        let ttl = chrono::Duration::from_std(ttl).context("Lease TTL out of range")?;

        let result = sqlx::query(
            "UPDATE record_leases SET expires_at = $3 WHERE record_id = $1 AND holder_id = $2",
        )
        .bind(record_id)
        .bind(holder)
        .bind(Utc::now() + ttl)
        .execute(&self.pool)
        .await
        .context("Failed to renew record lease")?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, record_id: &str, holder: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM record_leases WHERE record_id = $1 AND holder_id = $2")
            .bind(record_id)
            .bind(holder)
            .execute(&self.pool)
            .await
            .context("Failed to release record lease")?;
        Ok(())
    }
}
