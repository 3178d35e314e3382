/// SQLite-backed storage ledger
use crate::{
    config::QuotaConfig,
    db::format_timestamp,
    error::PinResult,
    pin_store::{Owner, OwnerType},
    storage_ledger::{StorageLedger, StorageUsage},
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

/// Ledger over the `storage_usage` table
#[derive(Clone)]
pub struct SqliteStorageLedger {
    db: SqlitePool,
    quotas: QuotaConfig,
}

impl SqliteStorageLedger {
    pub fn new(db: SqlitePool, quotas: QuotaConfig) -> Self {
        Self { db, quotas }
    }

    fn default_quota(&self, kind: OwnerType) -> i64 {
        match kind {
            OwnerType::Human => self.quotas.human_quota_bytes,
            OwnerType::Agent => self.quotas.agent_quota_bytes,
        }
    }
}

#[async_trait]
impl StorageLedger for SqliteStorageLedger {
    async fn get_usage(&self, owner: &Owner) -> PinResult<StorageUsage> {
        let row = sqlx::query(
            "SELECT used_bytes, quota_bytes FROM storage_usage WHERE owner_id = ? AND owner_type = ?",
        )
        .bind(&owner.id)
        .bind(owner.kind.as_str())
        .fetch_optional(&self.db)
        .await?;

        let (used_bytes, quota_bytes) = match row {
            Some(row) => (row.try_get("used_bytes")?, row.try_get("quota_bytes")?),
            None => (0, self.default_quota(owner.kind)),
        };

        Ok(StorageUsage {
            owner: owner.clone(),
            used_bytes,
            quota_bytes,
        })
    }

    async fn adjust(&self, owner: &Owner, delta_bytes: i64) -> PinResult<()> {
        if delta_bytes == 0 {
            return Ok(());
        }

        // Single upsert: concurrent callers each apply their own delta
        sqlx::query(
            r#"
            INSERT INTO storage_usage (owner_id, owner_type, used_bytes, quota_bytes, updated_at)
            VALUES (?1, ?2, MAX(0, ?3), ?4, ?5)
            ON CONFLICT (owner_id, owner_type) DO UPDATE
            SET used_bytes = MAX(0, storage_usage.used_bytes + ?3),
                updated_at = ?5
            "#,
        )
        .bind(&owner.id)
        .bind(owner.kind.as_str())
        .bind(delta_bytes)
        .bind(self.default_quota(owner.kind))
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.db)
        .await?;

        tracing::debug!(owner = %owner, delta_bytes, "Adjusted storage usage");

        Ok(())
    }

    async fn list_usage(&self) -> PinResult<Vec<StorageUsage>> {
        let rows = sqlx::query("SELECT owner_id, owner_type, used_bytes, quota_bytes FROM storage_usage")
            .fetch_all(&self.db)
            .await?;

        let mut usage = Vec::with_capacity(rows.len());
        for row in rows {
            let owner_type: String = row.try_get("owner_type")?;
            usage.push(StorageUsage {
                owner: Owner::new(row.try_get::<String, _>("owner_id")?, owner_type.parse()?),
                used_bytes: row.try_get("used_bytes")?,
                quota_bytes: row.try_get("quota_bytes")?,
            });
        }

        Ok(usage)
    }

    async fn set_used(&self, owner: &Owner, used_bytes: i64) -> PinResult<()> {
        sqlx::query(
            r#"
            INSERT INTO storage_usage (owner_id, owner_type, used_bytes, quota_bytes, updated_at)
            VALUES (?1, ?2, MAX(0, ?3), ?4, ?5)
            ON CONFLICT (owner_id, owner_type) DO UPDATE
            SET used_bytes = MAX(0, ?3),
                updated_at = ?5
            "#,
        )
        .bind(&owner.id)
        .bind(owner.kind.as_str())
        .bind(used_bytes)
        .bind(self.default_quota(owner.kind))
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
