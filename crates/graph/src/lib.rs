pub mod memory_store;
pub mod neo4j_store;
pub mod store;

pub use memory_store::{EntityGraph, MemoryGraphStore};
pub use neo4j_store::Neo4jStore;
pub use store::{EntityUpsert, EntityWrite, FactRow, FeatureCount, GraphStats, GraphStore, GraphTxn};

use anyhow::Result;
use extract::{FeatureNormalizer, OpinionTuple, ParsedReview};
use ingest::{DatasetSchema, GENERAL_ASPECT};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Tuples of one review.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewTuples {
    pub review_id: String,
    pub tuples: Vec<OpinionTuple>,
}

/// Every parsed review of one entity, in log order.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityReviews {
    pub entity_id: String,
    pub reviews: Vec<ReviewTuples>,
}

/// Group parsed reviews by entity, keeping first-seen order.
///
/// Repeated (entity, review) lines have their tuples concatenated.
pub fn group_by_entity(parsed: Vec<ParsedReview>) -> Vec<EntityReviews> {
    let mut entities: Vec<EntityReviews> = Vec::new();
    let mut entity_idx: HashMap<String, usize> = HashMap::new();
    let mut review_idx: HashMap<(String, String), usize> = HashMap::new();

    for review in parsed {
        let idx = *entity_idx.entry(review.entity_id.clone()).or_insert_with(|| {
            entities.push(EntityReviews {
                entity_id: review.entity_id.clone(),
                reviews: Vec::new(),
            });
            entities.len() - 1
        });
        let entity = &mut entities[idx];

        let key = (review.entity_id, review.review_id);
        match review_idx.get(&key) {
            Some(&slot) => entity.reviews[slot].tuples.extend(review.data),
            None => {
                review_idx.insert(key.clone(), entity.reviews.len());
                entity.reviews.push(ReviewTuples {
                    review_id: key.1,
                    tuples: review.data,
                });
            }
        }
    }

    entities
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to merge entity {entity_id}")]
pub struct MergeError {
    pub entity_id: String,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeReport {
    pub merged: usize,
    /// Entities already present under the experiment.
    pub skipped: usize,
    /// Entities whose transaction rolled back. Re-run to retry them.
    pub failed: Vec<String>,
}

/// Folds parsed reviews into the experiment graph, one transaction per entity.
pub struct GraphMerger {
    store: Arc<dyn GraphStore>,
    schema: DatasetSchema,
    exp_name: String,
    normalizer: FeatureNormalizer,
    workers: usize,
}

impl GraphMerger {
    pub fn new(store: Arc<dyn GraphStore>, schema: DatasetSchema, exp_name: impl Into<String>) -> Self {
        Self {
            store,
            schema,
            exp_name: exp_name.into(),
            normalizer: FeatureNormalizer::new(),
            workers: 1,
        }
    }

    /// Merge up to `workers` distinct entities concurrently.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Build the writes for one entity without touching the store.
    pub fn plan(&self, entity_id: &str, reviews: &[ReviewTuples]) -> EntityWrite {
        let mut facts = Vec::new();
        let mut review_counts: BTreeMap<String, i64> = BTreeMap::new();

        for review in reviews {
            let mut reviewed_features = HashSet::new();

            for tuple in &review.tuples {
                let aspect = if self.schema.has_aspect(&tuple.aspect) {
                    tuple.aspect.clone()
                } else {
                    tracing::warn!(
                        entity_id,
                        aspect = %tuple.aspect,
                        "Aspect outside the dataset schema, using general"
                    );
                    GENERAL_ASPECT.to_string()
                };
                let feature = self.normalizer.normalize(&tuple.feature);

                for opinion in &tuple.opinions {
                    facts.push(FactRow {
                        entity_id: entity_id.to_string(),
                        aspect: aspect.clone(),
                        feature: feature.clone(),
                        opinion: opinion.clone(),
                        description: tuple.description.clone(),
                    });
                }
                reviewed_features.insert(feature);
            }

            for feature in reviewed_features {
                *review_counts.entry(feature).or_insert(0) += 1;
            }
        }

        EntityWrite {
            entity: EntityUpsert {
                exp_name: self.exp_name.clone(),
                entity_id: entity_id.to_string(),
                aspects: self.schema.aspects.clone(),
            },
            facts,
            feature_counts: review_counts
                .into_iter()
                .map(|(feature, count)| FeatureCount { feature, count })
                .collect(),
        }
    }

    /// Write one entity atomically. Any failure rolls the whole entity back.
    pub async fn merge(&self, entity_id: &str, reviews: &[ReviewTuples]) -> Result<(), MergeError> {
        let write = self.plan(entity_id, reviews);
        let fail = |error: anyhow::Error| MergeError {
            entity_id: entity_id.to_string(),
            source: error.into(),
        };

        let mut txn = self.store.begin().await.map_err(fail)?;

        match self.apply(txn.as_mut(), &write).await {
            Ok(()) => txn.commit().await.map_err(fail),
            Err(error) => {
                if let Err(rollback_error) = txn.rollback().await {
                    tracing::warn!(entity_id, error = %rollback_error, "Rollback failed");
                }
                Err(fail(error))
            }
        }
    }

    async fn apply(&self, txn: &mut dyn GraphTxn, write: &EntityWrite) -> Result<()> {
        txn.upsert_entity(&write.entity).await?;
        txn.merge_facts(&self.exp_name, &write.facts).await?;
        txn.set_feature_counts(&self.exp_name, &write.entity.entity_id, &write.feature_counts)
            .await?;
        Ok(())
    }

    /// Merge every entity not yet in the graph. Failed entities are reported, not fatal.
    pub async fn run(self: Arc<Self>, entities: Vec<EntityReviews>) -> Result<MergeReport> {
        let existing = self.store.existing_entities(&self.exp_name).await?;
        tracing::info!(exp_name = %self.exp_name, found = existing.len(), "Found entities in the graph");

        let total = entities.len();
        let (done, pending): (Vec<_>, Vec<_>) = entities
            .into_iter()
            .partition(|entity| existing.contains(&entity.entity_id));

        let mut report = MergeReport {
            skipped: done.len(),
            ..Default::default()
        };
        let mut tasks = JoinSet::new();

        for entity in pending {
            if tasks.len() >= self.workers {
                if let Some(joined) = tasks.join_next().await {
                    self.record(joined?, &mut report, total);
                }
            }

            let merger = Arc::clone(&self);
            tasks.spawn(async move {
                let entity_id = entity.entity_id.clone();
                // A panic inside the merge fails this entity only.
                let merge = tokio::spawn(async move { merger.merge(&entity.entity_id, &entity.reviews).await });
                match merge.await {
                    Ok(outcome) => outcome,
                    Err(join_error) => Err(MergeError {
                        entity_id,
                        source: Box::new(join_error),
                    }),
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            self.record(joined?, &mut report, total);
        }

        report.failed.sort();
        if !report.failed.is_empty() {
            tracing::error!(failed = ?report.failed, "Some entities were not merged, re-run to retry them");
        }
        tracing::info!(
            merged = report.merged,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Merge finished"
        );
        Ok(report)
    }

    fn record(&self, outcome: Result<(), MergeError>, report: &mut MergeReport, total: usize) {
        match outcome {
            Ok(()) => report.merged += 1,
            Err(error) => {
                tracing::error!(entity_id = %error.entity_id, error = %error.source, "Transaction failed");
                report.failed.push(error.entity_id);
            }
        }

        let done = report.skipped + report.merged + report.failed.len();
        if done % 100 == 0 || done == total {
            tracing::info!(done, total, "Merge progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn tuple(aspect: &str, feature: &str, opinions: &[&str], description: &str) -> OpinionTuple {
        OpinionTuple {
            aspect: aspect.into(),
            feature: feature.into(),
            opinions: opinions.iter().map(|o| o.to_string()).collect(),
            description: description.into(),
        }
    }

    fn review(review_id: &str, tuples: Vec<OpinionTuple>) -> ReviewTuples {
        ReviewTuples {
            review_id: review_id.into(),
            tuples,
        }
    }

    fn entity(entity_id: &str, reviews: Vec<ReviewTuples>) -> EntityReviews {
        EntityReviews {
            entity_id: entity_id.into(),
            reviews,
        }
    }

    fn merger(store: Arc<dyn GraphStore>) -> Arc<GraphMerger> {
        Arc::new(GraphMerger::new(store, DatasetSchema::space(), "exp"))
    }

    #[test]
    fn test_group_by_entity_keeps_order_and_concatenates() {
        let parsed_review = |entity_id: &str, data: OpinionTuple| ParsedReview {
            entity_id: entity_id.into(),
            review_id: "r1".into(),
            data: vec![data],
        };
        let parsed = vec![
            parsed_review("e2", tuple("rooms", "bed", &["big"], "Big bed.")),
            parsed_review("e1", tuple("food", "bread", &["fresh"], "Fresh bread.")),
            parsed_review("e2", tuple("service", "staff", &["kind"], "Kind staff.")),
        ];

        let grouped = group_by_entity(parsed);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].entity_id, "e2");
        assert_eq!(grouped[0].reviews.len(), 1);
        assert_eq!(grouped[0].reviews[0].tuples.len(), 2);
        assert_eq!(grouped[1].entity_id, "e1");
    }

    #[test]
    fn test_plan_counts_each_feature_once_per_review() {
        let merger = merger(Arc::new(MemoryGraphStore::new()));
        let reviews = vec![
            review(
                "r1",
                vec![
                    tuple("rooms", "wifi", &["fast", "free"], "Fast free wifi."),
                    tuple("rooms", "Wifi", &["reliable"], "Reliable wifi."),
                ],
            ),
            review("r2", vec![tuple("rooms", "wifi", &["slow"], "Slow wifi.")]),
        ];

        let write = merger.plan("e1", &reviews);

        assert_eq!(write.entity.aspects.len(), 7);
        assert_eq!(write.facts.len(), 4);
        assert_eq!(write.feature_counts, vec![FeatureCount { feature: "wifi".into(), count: 2 }]);
    }

    #[test]
    fn test_plan_maps_unknown_aspect_to_general() {
        let merger = merger(Arc::new(MemoryGraphStore::new()));
        let write = merger.plan("e1", &[review("r1", vec![tuple("parking", "garage", &["tight"], "Tight garage.")])]);

        assert_eq!(write.facts[0].aspect, "general");
    }

    #[tokio::test]
    async fn test_merge_builds_entity_graph() {
        let store = MemoryGraphStore::new();
        let merger = merger(Arc::new(store.clone()));
        let reviews = vec![
            review(
                "r1",
                vec![
                    tuple("rooms", "Beds", &["comfy"], "Comfy beds."),
                    tuple("general", "bed", &["comfy"], "Comfy bed overall."),
                ],
            ),
            review("r2", vec![tuple("rooms", "the bed", &["small"], "Small bed.")]),
        ];

        merger.merge("e1", &reviews).await.unwrap();

        let graph = store.entity("exp", "e1").unwrap();
        assert_eq!(graph.aspects.len(), 7);
        assert!(graph.aspects["food"].is_empty());
        assert_eq!(graph.feature_count("bed"), Some(2));
        assert_eq!(graph.descriptions("bed", "comfy", "rooms").unwrap(), ["Comfy beds."]);
        assert_eq!(graph.descriptions("bed", "comfy", "general").unwrap(), ["Comfy bed overall."]);
        assert_eq!(graph.descriptions("bed", "small", "rooms").unwrap(), ["Small bed."]);
    }

    #[tokio::test]
    async fn test_entity_without_tuples_still_gets_aspects() {
        let store = MemoryGraphStore::new();
        merger(Arc::new(store.clone())).merge("e1", &[]).await.unwrap();

        assert_eq!(store.entity("exp", "e1").unwrap().aspects.len(), 7);
    }

    #[tokio::test]
    async fn test_run_skips_merged_entities() {
        let store = MemoryGraphStore::new();
        let merger = merger(Arc::new(store.clone()));
        let batch = || vec![entity("e1", vec![review("r1", vec![tuple("rooms", "bed", &["big"], "Big bed.")])])];

        let first = Arc::clone(&merger).run(batch()).await.unwrap();
        let second = Arc::clone(&merger).run(batch()).await.unwrap();

        assert_eq!(first, MergeReport { merged: 1, skipped: 0, failed: vec![] });
        assert_eq!(second, MergeReport { merged: 0, skipped: 1, failed: vec![] });

        let graph = store.entity("exp", "e1").unwrap();
        assert_eq!(graph.feature_count("bed"), Some(1));
        assert_eq!(graph.descriptions("bed", "big", "rooms").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_forced_remerge_does_not_double_counts() {
        let store = MemoryGraphStore::new();
        let merger = merger(Arc::new(store.clone()));
        let reviews = vec![review("r1", vec![tuple("rooms", "bed", &["big"], "Big bed.")])];

        merger.merge("e1", &reviews).await.unwrap();
        merger.merge("e1", &reviews).await.unwrap();

        let graph = store.entity("exp", "e1").unwrap();
        assert_eq!(graph.feature_count("bed"), Some(1));
        // Description lists are append-only.
        assert_eq!(graph.descriptions("bed", "big", "rooms").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_experiments_are_isolated() {
        let store = MemoryGraphStore::new();
        let reviews = vec![entity("e1", vec![])];

        Arc::new(GraphMerger::new(Arc::new(store.clone()), DatasetSchema::space(), "a"))
            .run(reviews.clone())
            .await
            .unwrap();
        let report = Arc::new(GraphMerger::new(Arc::new(store.clone()), DatasetSchema::amasum(), "b"))
            .run(reviews)
            .await
            .unwrap();

        assert_eq!(report.merged, 1);
        assert_eq!(store.entity("exp", "e1"), None);
        assert_eq!(store.entity("a", "e1").unwrap().aspects.len(), 7);
        assert_eq!(store.entity("b", "e1").unwrap().aspects.len(), 1);
    }

    /// Fails the count step for one entity, after its facts were staged. Panics for "crash".
    struct FailingStore {
        inner: MemoryGraphStore,
        fail_entity: String,
    }

    struct FailingTxn {
        inner: Box<dyn GraphTxn>,
        fail_entity: String,
    }

    #[async_trait]
    impl GraphStore for FailingStore {
        async fn existing_entities(&self, exp_name: &str) -> Result<HashSet<String>> {
            self.inner.existing_entities(exp_name).await
        }

        async fn begin(&self) -> Result<Box<dyn GraphTxn>> {
            Ok(Box::new(FailingTxn {
                inner: self.inner.begin().await?,
                fail_entity: self.fail_entity.clone(),
            }))
        }

        async fn stats(&self, exp_name: &str) -> Result<GraphStats> {
            self.inner.stats(exp_name).await
        }
    }

    #[async_trait]
    impl GraphTxn for FailingTxn {
        async fn upsert_entity(&mut self, entity: &EntityUpsert) -> Result<()> {
            self.inner.upsert_entity(entity).await
        }

        async fn merge_facts(&mut self, exp_name: &str, facts: &[FactRow]) -> Result<()> {
            self.inner.merge_facts(exp_name, facts).await
        }

        async fn set_feature_counts(&mut self, exp_name: &str, entity_id: &str, counts: &[FeatureCount]) -> Result<()> {
            if entity_id == self.fail_entity {
                anyhow::bail!("connection reset");
            }
            if entity_id == "crash" {
                panic!("driver crashed");
            }
            self.inner.set_feature_counts(exp_name, entity_id, counts).await
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn test_failed_entity_rolls_back_and_run_continues() {
        let memory = MemoryGraphStore::new();
        let store = Arc::new(FailingStore {
            inner: memory.clone(),
            fail_entity: "bad".into(),
        });
        let batch = vec![
            entity("good", vec![review("r1", vec![tuple("rooms", "bed", &["big"], "Big bed.")])]),
            entity("bad", vec![review("r2", vec![tuple("rooms", "bed", &["small"], "Small bed.")])]),
        ];

        let report = merger(store).run(batch.clone()).await.unwrap();

        assert_eq!(report, MergeReport { merged: 1, skipped: 0, failed: vec!["bad".into()] });
        assert!(memory.entity("exp", "bad").is_none());
        assert!(memory.entity("exp", "good").is_some());

        // The failed entity is not marked as processed and is retried next run.
        let retry = merger(Arc::new(memory.clone())).run(batch).await.unwrap();
        assert_eq!(retry, MergeReport { merged: 1, skipped: 1, failed: vec![] });
    }

    #[tokio::test]
    async fn test_panicking_entity_is_recorded_as_failed() {
        let memory = MemoryGraphStore::new();
        let store = Arc::new(FailingStore {
            inner: memory.clone(),
            fail_entity: "bad".into(),
        });
        let batch = vec![
            entity("crash", vec![review("r1", vec![tuple("rooms", "bed", &["big"], "Big bed.")])]),
            entity("good", vec![review("r2", vec![tuple("rooms", "bed", &["small"], "Small bed.")])]),
        ];

        let report = merger(store).run(batch).await.unwrap();

        assert_eq!(report, MergeReport { merged: 1, skipped: 0, failed: vec!["crash".into()] });
        assert!(memory.entity("exp", "crash").is_none());
        assert!(memory.entity("exp", "good").is_some());
    }

    #[tokio::test]
    async fn test_merge_error_names_entity() {
        let store = Arc::new(FailingStore {
            inner: MemoryGraphStore::new(),
            fail_entity: "bad".into(),
        });

        let error = merger(store).merge("bad", &[]).await.unwrap_err();

        assert_eq!(error.entity_id, "bad");
        assert!(error.to_string().contains("bad"));
    }

    #[tokio::test]
    async fn test_workers_merge_distinct_entities() {
        let store = MemoryGraphStore::new();
        let merger = Arc::new(
            GraphMerger::new(Arc::new(store.clone()), DatasetSchema::space(), "exp").with_workers(4),
        );
        let batch: Vec<_> = (0..10)
            .map(|i| entity(&format!("e{}", i), vec![review("r1", vec![tuple("rooms", "bed", &["big"], "Big bed.")])]))
            .collect();

        let report = merger.run(batch).await.unwrap();

        assert_eq!(report.merged, 10);
        assert_eq!(store.stats("exp").await.unwrap().entities, 10);
    }
}
