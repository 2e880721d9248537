use anyhow::{Result, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::store::{EntityUpsert, FactRow, FeatureCount, GraphStats, GraphStore, GraphTxn};

/// Subgraph owned by one entity of one experiment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityGraph {
    /// Aspect -> features linked to it.
    pub aspects: BTreeMap<String, BTreeSet<String>>,
    /// Feature -> count. `None` until a count is assigned.
    pub features: BTreeMap<String, Option<i64>>,
    /// (feature, opinion) -> aspect -> descriptions, in merge order.
    pub opinions: BTreeMap<(String, String), BTreeMap<String, Vec<String>>>,
}

impl EntityGraph {
    pub fn descriptions(&self, feature: &str, opinion: &str, aspect: &str) -> Option<&[String]> {
        self.opinions
            .get(&(feature.to_string(), opinion.to_string()))?
            .get(aspect)
            .map(Vec::as_slice)
    }

    pub fn feature_count(&self, feature: &str) -> Option<i64> {
        self.features.get(feature).copied().flatten()
    }
}

type Key = (String, String);

/// In-process graph store for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraphStore {
    graphs: Arc<DashMap<Key, EntityGraph>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed snapshot of one entity.
    pub fn entity(&self, exp_name: &str, entity_id: &str) -> Option<EntityGraph> {
        self.graphs
            .get(&(exp_name.to_string(), entity_id.to_string()))
            .map(|graph| graph.value().clone())
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn existing_entities(&self, exp_name: &str) -> Result<HashSet<String>> {
        Ok(self
            .graphs
            .iter()
            .filter(|entry| entry.key().0 == exp_name)
            .map(|entry| entry.key().1.clone())
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn GraphTxn>> {
        Ok(Box::new(MemoryTxn {
            graphs: Arc::clone(&self.graphs),
            staged: HashMap::new(),
        }))
    }

    async fn stats(&self, exp_name: &str) -> Result<GraphStats> {
        let mut stats = GraphStats::default();
        for entry in self.graphs.iter().filter(|entry| entry.key().0 == exp_name) {
            let graph = entry.value();
            stats.entities += 1;
            stats.aspects += graph.aspects.len();
            stats.features += graph.features.len();
            stats.opinions += graph
                .opinions
                .keys()
                .map(|(_, opinion)| opinion.as_str())
                .collect::<BTreeSet<_>>()
                .len();
        }
        Ok(stats)
    }
}

/// Copy-on-write view of the touched entities, swapped in on commit.
pub struct MemoryTxn {
    graphs: Arc<DashMap<Key, EntityGraph>>,
    staged: HashMap<Key, EntityGraph>,
}

impl MemoryTxn {
    fn stage(&mut self, exp_name: &str, entity_id: &str) -> Option<&mut EntityGraph> {
        let key = (exp_name.to_string(), entity_id.to_string());
        if !self.staged.contains_key(&key) {
            let committed = self.graphs.get(&key)?.value().clone();
            self.staged.insert(key.clone(), committed);
        }
        self.staged.get_mut(&key)
    }
}

#[async_trait]
impl GraphTxn for MemoryTxn {
    async fn upsert_entity(&mut self, entity: &EntityUpsert) -> Result<()> {
        let key = (entity.exp_name.clone(), entity.entity_id.clone());
        let graph = match self.staged.entry(key) {
            std::collections::hash_map::Entry::Occupied(slot) => slot.into_mut(),
            std::collections::hash_map::Entry::Vacant(slot) => {
                let committed = self
                    .graphs
                    .get(slot.key())
                    .map(|graph| graph.value().clone())
                    .unwrap_or_default();
                slot.insert(committed)
            }
        };

        for aspect in &entity.aspects {
            graph.aspects.entry(aspect.clone()).or_default();
        }
        Ok(())
    }

    async fn merge_facts(&mut self, exp_name: &str, facts: &[FactRow]) -> Result<()> {
        for fact in facts {
            let Some(graph) = self.stage(exp_name, &fact.entity_id) else {
                bail!("Entity {} does not exist", fact.entity_id);
            };
            let Some(features) = graph.aspects.get_mut(&fact.aspect) else {
                bail!("Entity {} has no aspect {}", fact.entity_id, fact.aspect);
            };

            features.insert(fact.feature.clone());
            graph.features.entry(fact.feature.clone()).or_insert(None);
            graph
                .opinions
                .entry((fact.feature.clone(), fact.opinion.clone()))
                .or_default()
                .entry(fact.aspect.clone())
                .or_default()
                .push(fact.description.clone());
        }
        Ok(())
    }

    async fn set_feature_counts(
        &mut self,
        exp_name: &str,
        entity_id: &str,
        counts: &[FeatureCount],
    ) -> Result<()> {
        let Some(graph) = self.stage(exp_name, entity_id) else {
            bail!("Entity {} does not exist", entity_id);
        };
        for count in counts {
            if let Some(slot) = graph.features.get_mut(&count.feature) {
                *slot = Some(count.count);
            }
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTxn { graphs, staged } = *self;
        for (key, graph) in staged {
            graphs.insert(key, graph);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert(entity_id: &str) -> EntityUpsert {
        EntityUpsert {
            exp_name: "exp".into(),
            entity_id: entity_id.into(),
            aspects: vec!["rooms".into(), "general".into()],
        }
    }

    fn fact(aspect: &str, feature: &str, opinion: &str, description: &str) -> FactRow {
        FactRow {
            entity_id: "e1".into(),
            aspect: aspect.into(),
            feature: feature.into(),
            opinion: opinion.into(),
            description: description.into(),
        }
    }

    #[tokio::test]
    async fn test_nothing_visible_before_commit() {
        let store = MemoryGraphStore::new();
        let mut txn = store.begin().await.unwrap();
        txn.upsert_entity(&upsert("e1")).await.unwrap();

        assert!(store.existing_entities("exp").await.unwrap().is_empty());

        txn.commit().await.unwrap();
        assert_eq!(store.existing_entities("exp").await.unwrap().len(), 1);
        assert!(store.existing_entities("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_writes() {
        let store = MemoryGraphStore::new();
        let mut txn = store.begin().await.unwrap();
        txn.upsert_entity(&upsert("e1")).await.unwrap();
        txn.merge_facts("exp", &[fact("rooms", "bed", "comfi", "Comfy bed.")])
            .await
            .unwrap();
        txn.rollback().await.unwrap();

        assert!(store.entity("exp", "e1").is_none());
    }

    #[tokio::test]
    async fn test_fact_on_unknown_aspect_fails() {
        let store = MemoryGraphStore::new();
        let mut txn = store.begin().await.unwrap();
        txn.upsert_entity(&upsert("e1")).await.unwrap();

        let result = txn.merge_facts("exp", &[fact("food", "bread", "stale", "Stale bread.")]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_descriptions_append_and_counts_overwrite() {
        let store = MemoryGraphStore::new();
        for _ in 0..2 {
            let mut txn = store.begin().await.unwrap();
            txn.upsert_entity(&upsert("e1")).await.unwrap();
            txn.merge_facts("exp", &[fact("rooms", "bed", "comfi", "Comfy bed.")])
                .await
                .unwrap();
            txn.set_feature_counts("exp", "e1", &[FeatureCount { feature: "bed".into(), count: 3 }])
                .await
                .unwrap();
            txn.commit().await.unwrap();
        }

        let graph = store.entity("exp", "e1").unwrap();
        assert_eq!(graph.feature_count("bed"), Some(3));
        assert_eq!(graph.descriptions("bed", "comfi", "rooms").unwrap().len(), 2);

        let stats = store.stats("exp").await.unwrap();
        assert_eq!(stats, GraphStats { entities: 1, aspects: 2, features: 1, opinions: 1 });
    }
}
