/// Agent directory
///
/// Resolves an agent to the human who has claimed it. Agents and claims are
/// managed by the surrounding platform; this service only reads them to
/// decide cross-principal access to agent pins and storage.

pub mod sqlite;

pub use sqlite::SqliteAgentDirectory;

use crate::error::PinResult;
use async_trait::async_trait;

/// Agent with its optional claiming human
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRecord {
    pub id: String,
    pub human_id: Option<String>,
}

impl AgentRecord {
    pub fn is_claimed_by(&self, human_id: &str) -> bool {
        self.human_id.as_deref() == Some(human_id)
    }

    /// Two agents claimed by the same human
    pub fn is_sibling_of(&self, other: &AgentRecord) -> bool {
        matches!((&self.human_id, &other.human_id), (Some(a), Some(b)) if a == b)
    }
}

#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn find_agent(&self, agent_id: &str) -> PinResult<Option<AgentRecord>>;
}
