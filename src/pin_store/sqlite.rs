/// SQLite-backed pin store
use crate::{
    db::{format_timestamp, parse_timestamp},
    error::{PinError, PinResult},
    pin_store::{Owner, OwnerPinTotals, Pin, PinListOptions, PinStatus, PinStore},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};

/// Columns returned by pin queries
const PIN_COLUMNS: &str = "id, cid, name, origins, meta, delegates, status, size_bytes, \
     owner_id, owner_type, created_at, updated_at, pinned_at";

/// Pin store over the `pins` table
#[derive(Clone)]
pub struct SqlitePinStore {
    db: SqlitePool,
}

impl SqlitePinStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    fn row_to_pin(row: &SqliteRow) -> PinResult<Pin> {
        let origins: String = row.try_get("origins")?;
        let meta: String = row.try_get("meta")?;
        let delegates: String = row.try_get("delegates")?;
        let status: String = row.try_get("status")?;
        let owner_type: String = row.try_get("owner_type")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        let pinned_at: Option<String> = row.try_get("pinned_at")?;

        Ok(Pin {
            id: row.try_get("id")?,
            cid: row.try_get("cid")?,
            name: row.try_get("name")?,
            origins: decode_json(&origins)?,
            meta: decode_json(&meta)?,
            delegates: decode_json(&delegates)?,
            status: status.parse()?,
            size_bytes: row.try_get("size_bytes")?,
            owner: Owner::new(row.try_get::<String, _>("owner_id")?, owner_type.parse()?),
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
            pinned_at: pinned_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }

    /// Shared WHERE clause for the list and count queries
    fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, owner: &Owner, opts: &PinListOptions) -> PinResult<()> {
        qb.push(" WHERE owner_id = ");
        qb.push_bind(owner.id.clone());
        qb.push(" AND owner_type = ");
        qb.push_bind(owner.kind.as_str());

        if let Some(cid) = opts.cid.as_ref().filter(|c| !c.is_empty()) {
            qb.push(" AND instr(cid, ");
            qb.push_bind(cid.clone());
            qb.push(") > 0");
        }

        if let Some(name) = opts.name.as_ref().filter(|n| !n.is_empty()) {
            qb.push(" AND name = ");
            qb.push_bind(name.clone());
        }

        if !opts.statuses.is_empty() {
            qb.push(" AND status IN (");
            let mut separated = qb.separated(", ");
            for status in &opts.statuses {
                separated.push_bind(status.as_str());
            }
            separated.push_unseparated(")");
        }

        for (key, value) in &opts.meta {
            if key.contains('"') || key.contains('\\') {
                return Err(PinError::Validation(format!("Invalid meta key: {}", key)));
            }
            qb.push(" AND json_extract(meta, ");
            qb.push_bind(format!("$.\"{}\"", key));
            qb.push(") = ");
            qb.push_bind(value.clone());
        }

        if let Some(before) = &opts.before {
            qb.push(" AND created_at < ");
            qb.push_bind(format_timestamp(before));
        }

        if let Some(after) = &opts.after {
            qb.push(" AND created_at > ");
            qb.push_bind(format_timestamp(after));
        }

        Ok(())
    }

    /// `status IN (...)` for the statuses a transition into `status` may start from
    fn push_predecessors(qb: &mut QueryBuilder<'_, Sqlite>, status: PinStatus) {
        qb.push(" AND status IN (");
        let mut separated = qb.separated(", ");
        for from in status.predecessors() {
            separated.push_bind(from.as_str());
        }
        separated.push_unseparated(")");
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(value: &str) -> PinResult<T> {
    serde_json::from_str(value)
        .map_err(|e| PinError::Internal(format!("Corrupt JSON column {:?}: {}", value, e)))
}

fn encode_json<T: serde::Serialize>(value: &T) -> PinResult<String> {
    serde_json::to_string(value)
        .map_err(|e| PinError::Internal(format!("Failed to encode JSON column: {}", e)))
}

#[async_trait]
impl PinStore for SqlitePinStore {
    async fn create(&self, pin: &Pin) -> PinResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO pins (id, cid, name, origins, meta, delegates, status, size_bytes,
                              owner_id, owner_type, created_at, updated_at, pinned_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&pin.id)
        .bind(&pin.cid)
        .bind(&pin.name)
        .bind(encode_json(&pin.origins)?)
        .bind(encode_json(&pin.meta)?)
        .bind(encode_json(&pin.delegates)?)
        .bind(pin.status.as_str())
        .bind(pin.size_bytes)
        .bind(&pin.owner.id)
        .bind(pin.owner.kind.as_str())
        .bind(format_timestamp(&pin.created_at))
        .bind(format_timestamp(&pin.updated_at))
        .bind(pin.pinned_at.as_ref().map(format_timestamp))
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(PinError::Conflict(
                    "pin already exists for this CID and owner".to_string(),
                ))
            }
            Err(e) => Err(PinError::Database(e)),
        }
    }

    async fn get_by_id(&self, id: &str) -> PinResult<Option<Pin>> {
        let row = sqlx::query(&format!("SELECT {} FROM pins WHERE id = ?", PIN_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(Self::row_to_pin).transpose()
    }

    async fn get_by_cid(&self, cid: &str, owner_id: &str) -> PinResult<Option<Pin>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM pins WHERE cid = ? AND owner_id = ?",
            PIN_COLUMNS
        ))
        .bind(cid)
        .bind(owner_id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(Self::row_to_pin).transpose()
    }

    async fn list_by_owner(&self, owner: &Owner, opts: &PinListOptions) -> PinResult<(Vec<Pin>, i64)> {
        let (limit, offset) = opts.bounded_page();

        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM pins");
        Self::push_filters(&mut count_query, owner, opts)?;
        let total: i64 = count_query
            .build_query_scalar::<i64>()
            .fetch_one(&self.db)
            .await?;

        let mut data_query = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM pins", PIN_COLUMNS));
        Self::push_filters(&mut data_query, owner, opts)?;
        data_query.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        data_query.push_bind(limit);
        data_query.push(" OFFSET ");
        data_query.push_bind(offset);

        let rows = data_query.build().fetch_all(&self.db).await?;
        let pins = rows
            .iter()
            .map(Self::row_to_pin)
            .collect::<PinResult<Vec<_>>>()?;

        Ok((pins, total))
    }

    async fn update_status(&self, id: &str, status: PinStatus) -> PinResult<Option<Pin>> {
        if status == PinStatus::Pinned {
            return Err(PinError::Internal(
                "pinned status must be written together with a size".to_string(),
            ));
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE pins SET status = ");
        qb.push_bind(status.as_str());
        qb.push(", updated_at = ");
        qb.push_bind(format_timestamp(&Utc::now()));
        qb.push(" WHERE id = ");
        qb.push_bind(id.to_string());
        Self::push_predecessors(&mut qb, status);
        qb.push(" RETURNING ");
        qb.push(PIN_COLUMNS);

        let row = qb.build().fetch_optional(&self.db).await?;
        row.as_ref().map(Self::row_to_pin).transpose()
    }

    async fn update_status_and_size(
        &self,
        id: &str,
        status: PinStatus,
        size_bytes: i64,
    ) -> PinResult<Option<Pin>> {
        if status != PinStatus::Pinned {
            return Err(PinError::Internal(format!(
                "size can only be recorded with pinned status, not {}",
                status
            )));
        }
        if size_bytes < 0 {
            return Err(PinError::Internal(format!("negative size {} for pin {}", size_bytes, id)));
        }

        let now = format_timestamp(&Utc::now());
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE pins SET status = ");
        qb.push_bind(status.as_str());
        qb.push(", size_bytes = ");
        qb.push_bind(size_bytes);
        qb.push(", updated_at = ");
        qb.push_bind(now.clone());
        qb.push(", pinned_at = ");
        qb.push_bind(now);
        qb.push(" WHERE id = ");
        qb.push_bind(id.to_string());
        Self::push_predecessors(&mut qb, status);
        qb.push(" RETURNING ");
        qb.push(PIN_COLUMNS);

        let row = qb.build().fetch_optional(&self.db).await?;
        row.as_ref().map(Self::row_to_pin).transpose()
    }

    async fn delete(&self, id: &str) -> PinResult<Option<Pin>> {
        let row = sqlx::query(&format!("DELETE FROM pins WHERE id = ? RETURNING {}", PIN_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(Self::row_to_pin).transpose()
    }

    async fn cid_in_use(&self, cid: &str) -> PinResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pins WHERE cid = ?")
            .bind(cid)
            .fetch_one(&self.db)
            .await?;

        Ok(count > 0)
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>, limit: i64) -> PinResult<Vec<Pin>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM pins
            WHERE status IN ('queued', 'pinning') AND updated_at < ?
            ORDER BY updated_at ASC
            LIMIT ?
            "#,
            PIN_COLUMNS
        ))
        .bind(format_timestamp(&cutoff))
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Self::row_to_pin).collect()
    }

    async fn owner_totals(&self) -> PinResult<Vec<OwnerPinTotals>> {
        let rows = sqlx::query(
            r#"
            SELECT owner_id, owner_type,
                   COALESCE(SUM(CASE WHEN status = 'pinned' THEN size_bytes ELSE 0 END), 0) AS pinned_bytes,
                   COALESCE(SUM(CASE WHEN status IN ('queued', 'pinning') THEN 1 ELSE 0 END), 0) AS in_flight
            FROM pins
            GROUP BY owner_id, owner_type
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let mut totals = Vec::with_capacity(rows.len());
        for row in rows {
            let owner_type: String = row.try_get("owner_type")?;
            totals.push(OwnerPinTotals {
                owner: Owner::new(row.try_get::<String, _>("owner_id")?, owner_type.parse()?),
                pinned_bytes: row.try_get("pinned_bytes")?,
                in_flight: row.try_get("in_flight")?,
            });
        }

        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use std::collections::BTreeMap;

    const CID_A: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";
    const CID_B: &str = "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi";
    const CID_C: &str = "QmPZ9gcCEpqKTo6aq61g2nXGUhM4iCL3ewB6LDXZCtioEB";

    fn new_pin(owner: &Owner, cid: &str) -> Pin {
        Pin::queued(owner.clone(), cid.to_string(), None, vec![], BTreeMap::new(), vec![])
    }

    async fn create_test_store() -> SqlitePinStore {
        SqlitePinStore::new(memory_pool().await)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = create_test_store().await;
        let owner = Owner::human("user-123");

        let mut meta = BTreeMap::new();
        meta.insert("app".to_string(), "solver".to_string());
        let pin = Pin::queued(
            owner.clone(),
            CID_A.to_string(),
            Some("backup".to_string()),
            vec!["/ip4/10.0.0.1/tcp/4001".to_string()],
            meta,
            vec![],
        );
        store.create(&pin).await.unwrap();

        let fetched = store.get_by_id(&pin.id).await.unwrap().unwrap();
        assert_eq!(fetched.cid, CID_A);
        assert_eq!(fetched.name.as_deref(), Some("backup"));
        assert_eq!(fetched.origins, pin.origins);
        assert_eq!(fetched.meta.get("app").map(String::as_str), Some("solver"));
        assert_eq!(fetched.status, PinStatus::Queued);
        assert_eq!(fetched.owner, owner);
        assert_eq!(fetched.created_at, pin.created_at);

        let by_cid = store.get_by_cid(CID_A, "user-123").await.unwrap().unwrap();
        assert_eq!(by_cid.id, pin.id);
        assert!(store.get_by_cid(CID_A, "someone-else").await.unwrap().is_none());
        assert!(store.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_cid_for_same_owner_conflicts() {
        let store = create_test_store().await;
        let owner = Owner::human("user-123");

        let first = new_pin(&owner, CID_A);
        store.create(&first).await.unwrap();

        let err = store.create(&new_pin(&owner, CID_A)).await.unwrap_err();
        assert!(matches!(err, PinError::Conflict(_)));

        // Original record untouched
        let fetched = store.get_by_id(&first.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, PinStatus::Queued);

        // Another owner may pin the same content
        store.create(&new_pin(&Owner::agent("agent-1"), CID_A)).await.unwrap();
    }

    #[tokio::test]
    async fn test_transitions_are_conditional() {
        let store = create_test_store().await;
        let pin = new_pin(&Owner::human("user-123"), CID_A);
        store.create(&pin).await.unwrap();

        let pinning = store.update_status(&pin.id, PinStatus::Pinning).await.unwrap().unwrap();
        assert_eq!(pinning.status, PinStatus::Pinning);

        // Re-entering pinning is allowed (recovery re-runs)
        assert!(store.update_status(&pin.id, PinStatus::Pinning).await.unwrap().is_some());

        let pinned = store
            .update_status_and_size(&pin.id, PinStatus::Pinned, 1_048_576)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pinned.status, PinStatus::Pinned);
        assert_eq!(pinned.size_bytes, Some(1_048_576));
        assert!(pinned.pinned_at.is_some());
        assert_eq!(pinned.owner, Owner::human("user-123"));

        // Final states never move again
        assert!(store.update_status(&pin.id, PinStatus::Failed).await.unwrap().is_none());
        assert!(store
            .update_status_and_size(&pin.id, PinStatus::Pinned, 7)
            .await
            .unwrap()
            .is_none());
        let fetched = store.get_by_id(&pin.id).await.unwrap().unwrap();
        assert_eq!(fetched.size_bytes, Some(1_048_576));
    }

    #[tokio::test]
    async fn test_size_only_with_pinned() {
        let store = create_test_store().await;
        let pin = new_pin(&Owner::human("user-123"), CID_A);
        store.create(&pin).await.unwrap();

        assert!(store.update_status(&pin.id, PinStatus::Pinned).await.is_err());
        assert!(store
            .update_status_and_size(&pin.id, PinStatus::Failed, 10)
            .await
            .is_err());

        let failed = store.update_status(&pin.id, PinStatus::Failed).await.unwrap().unwrap();
        assert_eq!(failed.status, PinStatus::Failed);
        assert!(failed.size_bytes.is_none());
    }

    #[tokio::test]
    async fn test_update_missing_pin_returns_none() {
        let store = create_test_store().await;
        assert!(store.update_status("missing", PinStatus::Pinning).await.unwrap().is_none());
        assert!(store
            .update_status_and_size("missing", PinStatus::Pinned, 1)
            .await
            .unwrap()
            .is_none());
        assert!(store.delete("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_returns_row() {
        let store = create_test_store().await;
        let pin = new_pin(&Owner::human("user-123"), CID_A);
        store.create(&pin).await.unwrap();
        store.update_status_and_size(&pin.id, PinStatus::Pinned, 42).await.unwrap();

        assert!(store.cid_in_use(CID_A).await.unwrap());
        let deleted = store.delete(&pin.id).await.unwrap().unwrap();
        assert_eq!(deleted.size_bytes, Some(42));
        assert!(store.get_by_id(&pin.id).await.unwrap().is_none());
        assert!(!store.cid_in_use(CID_A).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filters_and_count() {
        let store = create_test_store().await;
        let owner = Owner::human("user-123");

        let a = new_pin(&owner, CID_A);
        store.create(&a).await.unwrap();

        let mut b = new_pin(&owner, CID_B);
        b.name = Some("docs".to_string());
        b.meta.insert("env".to_string(), "prod".to_string());
        b.created_at = a.created_at + chrono::Duration::seconds(1);
        store.create(&b).await.unwrap();
        store.update_status_and_size(&b.id, PinStatus::Pinned, 100).await.unwrap();

        // Same id under a different owner type is a different owner
        store.create(&new_pin(&Owner::agent("user-123"), CID_C)).await.unwrap();

        let (all, total) = store.list_by_owner(&owner, &PinListOptions::default()).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(all[0].id, b.id, "newest first");

        let opts = PinListOptions {
            statuses: vec![PinStatus::Pinned],
            ..Default::default()
        };
        let (pinned, total) = store.list_by_owner(&owner, &opts).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(pinned[0].id, b.id);

        let opts = PinListOptions {
            cid: Some("YwAPJzv5".to_string()),
            ..Default::default()
        };
        let (by_cid, _) = store.list_by_owner(&owner, &opts).await.unwrap();
        assert_eq!(by_cid.len(), 1);
        assert_eq!(by_cid[0].id, a.id);

        let mut meta = BTreeMap::new();
        meta.insert("env".to_string(), "prod".to_string());
        let opts = PinListOptions {
            meta,
            name: Some("docs".to_string()),
            ..Default::default()
        };
        let (by_meta, _) = store.list_by_owner(&owner, &opts).await.unwrap();
        assert_eq!(by_meta.len(), 1);

        let opts = PinListOptions {
            after: Some(a.created_at),
            ..Default::default()
        };
        let (after, _) = store.list_by_owner(&owner, &opts).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, b.id);

        let opts = PinListOptions {
            statuses: vec![PinStatus::Failed],
            ..Default::default()
        };
        let (none, total) = store.list_by_owner(&owner, &opts).await.unwrap();
        assert!(none.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_list_pagination_keeps_total() {
        let store = create_test_store().await;
        let owner = Owner::agent("agent-7");

        for i in 0..5 {
            let cid = format!("{}{}", &CID_A[..44], ["AA", "BB", "CC", "DD", "EE"][i]);
            store.create(&new_pin(&owner, &cid)).await.unwrap();
        }

        let opts = PinListOptions {
            limit: 2,
            offset: 4,
            ..Default::default()
        };
        let (page, total) = store.list_by_owner(&owner, &opts).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(total, 5);
    }

    #[tokio::test]
    async fn test_stale_and_totals() {
        let store = create_test_store().await;
        let owner = Owner::human("user-123");

        let mut stale = new_pin(&owner, CID_A);
        stale.updated_at = Utc::now() - chrono::Duration::hours(1);
        store.create(&stale).await.unwrap();

        let done = new_pin(&owner, CID_B);
        store.create(&done).await.unwrap();
        store.update_status_and_size(&done.id, PinStatus::Pinned, 512).await.unwrap();

        let found = store
            .list_stale(Utc::now() - chrono::Duration::minutes(10), 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stale.id);

        let totals = store.owner_totals().await.unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].owner, owner);
        assert_eq!(totals[0].pinned_bytes, 512);
        assert_eq!(totals[0].in_flight, 1);
    }
}
