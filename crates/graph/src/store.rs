use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;

/// Entity node plus every aspect node of its dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityUpsert {
    pub exp_name: String,
    pub entity_id: String,
    pub aspects: Vec<String>,
}

/// One {entity, aspect, feature, opinion, description} fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactRow {
    pub entity_id: String,
    pub aspect: String,
    pub feature: String,
    pub opinion: String,
    pub description: String,
}

/// Number of distinct reviews of an entity that mention a feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureCount {
    pub feature: String,
    pub count: i64,
}

/// Everything one entity contributes to the graph, written in a single transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityWrite {
    pub entity: EntityUpsert,
    pub facts: Vec<FactRow>,
    pub feature_counts: Vec<FeatureCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub entities: usize,
    pub aspects: usize,
    pub features: usize,
    pub opinions: usize,
}

/// Open write transaction. Nothing is visible to readers until `commit`.
#[async_trait]
pub trait GraphTxn: Send {
    /// Create the entity and all its aspects if absent.
    async fn upsert_entity(&mut self, entity: &EntityUpsert) -> Result<()>;

    /// Merge feature and opinion nodes, appending each description to the
    /// list stored under the fact's aspect on the opinion relationship.
    async fn merge_facts(&mut self, exp_name: &str, facts: &[FactRow]) -> Result<()>;

    /// Overwrite feature counts. Counts are assigned, never incremented.
    async fn set_feature_counts(
        &mut self,
        exp_name: &str,
        entity_id: &str,
        counts: &[FeatureCount],
    ) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Entity ids already merged under `exp_name`.
    async fn existing_entities(&self, exp_name: &str) -> Result<HashSet<String>>;

    async fn begin(&self) -> Result<Box<dyn GraphTxn>>;

    async fn stats(&self, exp_name: &str) -> Result<GraphStats>;
}
