use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{Graph, Query, Txn};
use std::collections::{BTreeMap, HashSet};

use crate::store::{EntityUpsert, FactRow, FeatureCount, GraphStats, GraphStore, GraphTxn};

/// Graph store backed by Neo4j. Needs the APOC plugin for aspect-keyed relationship properties.
pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .with_context(|| format!("Failed to connect to Neo4j at {}", uri))?;
        Ok(Self::new(graph))
    }

    /// Initialize schema: create lookup indexes for every node label
    pub async fn init_schema(&self) -> Result<()> {
        tracing::info!("Creating Neo4j indexes...");

        let indexes = [
            ("entity_scope_index", "Entity", "e.exp_name, e.entity_id"),
            ("aspect_scope_index", "Aspect", "e.exp_name, e.entity_id, e.name"),
            ("feature_scope_index", "Feature", "e.exp_name, e.entity_id, e.name"),
            ("opinion_scope_index", "Opinion", "e.exp_name, e.entity_id, e.name"),
        ];

        for (name, label, properties) in indexes {
            let query = Query::new(format!(
                "CREATE INDEX {} IF NOT EXISTS FOR (e:{}) ON ({})",
                name, label, properties
            ));
            self.graph
                .run(query)
                .await
                .with_context(|| format!("Failed to create index on {}", label))?;
        }

        tracing::info!("Neo4j indexes created successfully");
        Ok(())
    }

    async fn count(&self, cypher: &str, exp_name: &str) -> Result<usize> {
        let query = Query::new(cypher.to_string()).param("exp_name", exp_name.to_string());
        let mut result = self.graph.execute(query).await?;
        let count = if let Some(row) = result.next().await? {
            row.get::<i64>("count").unwrap_or(0) as usize
        } else {
            0
        };
        Ok(count)
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn existing_entities(&self, exp_name: &str) -> Result<HashSet<String>> {
        let query = Query::new(
            "MATCH (e:Entity {exp_name: $exp_name}) RETURN e.entity_id AS entity_id".to_string(),
        )
        .param("exp_name", exp_name.to_string());

        let mut result = self
            .graph
            .execute(query)
            .await
            .context("Failed to query processed entities")?;

        let mut ids = HashSet::new();
        while let Some(row) = result.next().await? {
            let id: String = row.get("entity_id").context("Entity without entity_id")?;
            ids.insert(id);
        }
        Ok(ids)
    }

    async fn begin(&self) -> Result<Box<dyn GraphTxn>> {
        let txn = self
            .graph
            .start_txn()
            .await
            .context("Failed to open Neo4j transaction")?;
        Ok(Box::new(Neo4jTxn { txn }))
    }

    async fn stats(&self, exp_name: &str) -> Result<GraphStats> {
        Ok(GraphStats {
            entities: self
                .count("MATCH (n:Entity {exp_name: $exp_name}) RETURN count(n) AS count", exp_name)
                .await?,
            aspects: self
                .count("MATCH (n:Aspect {exp_name: $exp_name}) RETURN count(n) AS count", exp_name)
                .await?,
            features: self
                .count("MATCH (n:Feature {exp_name: $exp_name}) RETURN count(n) AS count", exp_name)
                .await?,
            opinions: self
                .count("MATCH (n:Opinion {exp_name: $exp_name}) RETURN count(n) AS count", exp_name)
                .await?,
        })
    }
}

pub struct Neo4jTxn {
    txn: Txn,
}

#[async_trait]
impl GraphTxn for Neo4jTxn {
    async fn upsert_entity(&mut self, entity: &EntityUpsert) -> Result<()> {
        let query = Query::new(
            r#"
            MERGE (e:Entity {entity_id: $entity_id, exp_name: $exp_name})
            WITH e
            UNWIND $aspects AS aspect
            MERGE (a:Aspect {name: aspect, entity_id: $entity_id, exp_name: $exp_name})
            MERGE (e)-[:HAS_ASPECT]->(a)
            "#
            .to_string(),
        )
        .param("entity_id", entity.entity_id.clone())
        .param("exp_name", entity.exp_name.clone())
        .param("aspects", entity.aspects.clone());

        self.txn
            .run(query)
            .await
            .context("Failed to merge entity and aspects")?;
        Ok(())
    }

    async fn merge_facts(&mut self, exp_name: &str, facts: &[FactRow]) -> Result<()> {
        // Columns are sent as parallel lists, one query per entity.
        let mut by_entity: BTreeMap<&str, Vec<&FactRow>> = BTreeMap::new();
        for fact in facts {
            by_entity.entry(fact.entity_id.as_str()).or_default().push(fact);
        }

        for (entity_id, rows) in by_entity {
            let column = |pick: fn(&FactRow) -> &String| -> Vec<String> {
                rows.iter().map(|row| pick(row).clone()).collect()
            };

            let query = Query::new(
                r#"
                UNWIND range(0, size($features) - 1) AS i
                WITH $aspects[i] AS aspect, $features[i] AS feature,
                     $opinions[i] AS opinion, $descriptions[i] AS description
                MATCH (:Entity {entity_id: $entity_id, exp_name: $exp_name})
                      -[:HAS_ASPECT]->(a:Aspect {name: aspect, entity_id: $entity_id, exp_name: $exp_name})
                MERGE (f:Feature {name: feature, entity_id: $entity_id, exp_name: $exp_name})
                MERGE (a)-[:HAS_FEATURE]->(f)
                MERGE (o:Opinion {name: opinion, entity_id: $entity_id, exp_name: $exp_name})
                MERGE (f)-[r:HAS_OPINION]->(o)
                WITH r, aspect, description
                CALL apoc.create.setRelProperty(r, aspect, coalesce(r[aspect], []) + description)
                YIELD rel
                RETURN count(rel) AS merged
                "#
                .to_string(),
            )
            .param("entity_id", entity_id.to_string())
            .param("exp_name", exp_name.to_string())
            .param("aspects", column(|row| &row.aspect))
            .param("features", column(|row| &row.feature))
            .param("opinions", column(|row| &row.opinion))
            .param("descriptions", column(|row| &row.description));

            self.txn
                .run(query)
                .await
                .with_context(|| format!("Failed to merge {} fact rows", rows.len()))?;
        }
        Ok(())
    }

    async fn set_feature_counts(
        &mut self,
        exp_name: &str,
        entity_id: &str,
        counts: &[FeatureCount],
    ) -> Result<()> {
        let query = Query::new(
            r#"
            UNWIND range(0, size($features) - 1) AS i
            MATCH (f:Feature {name: $features[i], entity_id: $entity_id, exp_name: $exp_name})
            SET f.count = $counts[i]
            "#
            .to_string(),
        )
        .param("entity_id", entity_id.to_string())
        .param("exp_name", exp_name.to_string())
        .param(
            "features",
            counts.iter().map(|c| c.feature.clone()).collect::<Vec<_>>(),
        )
        .param("counts", counts.iter().map(|c| c.count).collect::<Vec<_>>());

        self.txn
            .run(query)
            .await
            .context("Failed to set feature counts")?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.txn.commit().await.context("Failed to commit transaction")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.txn.rollback().await.context("Failed to roll back transaction")
    }
}
