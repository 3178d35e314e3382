/// Agent directory over the `agent_claims` table
use crate::{
    agents::{AgentDirectory, AgentRecord},
    error::PinResult,
};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

#[derive(Clone)]
pub struct SqliteAgentDirectory {
    db: SqlitePool,
}

impl SqliteAgentDirectory {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Register an agent, optionally claimed by `human_id`
    #[cfg(test)]
    pub async fn record_agent(&self, agent_id: &str, human_id: Option<&str>) -> PinResult<()> {
        let claimed_at = human_id.map(|_| crate::db::format_timestamp(&chrono::Utc::now()));

        sqlx::query(
            r#"
            INSERT INTO agent_claims (agent_id, human_id, claimed_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (agent_id) DO UPDATE
            SET human_id = ?2, claimed_at = ?3
            "#,
        )
        .bind(agent_id)
        .bind(human_id)
        .bind(claimed_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AgentDirectory for SqliteAgentDirectory {
    async fn find_agent(&self, agent_id: &str) -> PinResult<Option<AgentRecord>> {
        let row = sqlx::query("SELECT agent_id, human_id FROM agent_claims WHERE agent_id = ?")
            .bind(agent_id)
            .fetch_optional(&self.db)
            .await?;

        row.map(|row| -> PinResult<AgentRecord> {
            Ok(AgentRecord {
                id: row.try_get("agent_id")?,
                human_id: row.try_get("human_id")?,
            })
        })
        .transpose()
    }
}
