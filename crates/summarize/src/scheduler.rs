use anyhow::Result;
use extract::{GenerationPort, SamplingConfig};
use ingest::{DatasetSchema, Entity, JsonlLog};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::prompt::SummaryMode;
use crate::reduce::{ReduceError, reduce};
use crate::summarizer::AspectSummarizer;

/// How every (entity, aspect) summary of a run is produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryJob {
    pub mode: SummaryMode,
    /// Reduce reviews in groups of this size. `None` summarizes all reviews in one call.
    pub group_size: Option<usize>,
    pub save_every: usize,
    /// Only the first `max_reviews` reviews of each entity are used.
    pub max_reviews: Option<usize>,
    pub sampling: SamplingConfig,
    pub examples: HashMap<String, Vec<String>>,
}

impl Default for SummaryJob {
    fn default() -> Self {
        Self {
            mode: SummaryMode::default(),
            group_size: None,
            save_every: 1,
            max_reviews: None,
            sampling: SamplingConfig::default(),
            examples: HashMap::new(),
        }
    }
}

/// One line of the summary log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub entity_id: String,
    pub aspect: String,
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryReport {
    /// (entity, aspect) pairs summarized in this run.
    pub processed: usize,
    /// Pairs already in the log, without a reference for the aspect, or without reviews.
    pub skipped: usize,
    /// Processed pairs whose summary came back empty.
    pub empty: usize,
}

/// Summarizes every entity for every aspect of a dataset, resuming from the output log.
pub struct ReduceScheduler {
    summarizer: AspectSummarizer,
    group_size: Option<usize>,
    save_every: usize,
    max_reviews: Option<usize>,
}

impl ReduceScheduler {
    pub fn new(generator: Arc<dyn GenerationPort>, job: SummaryJob) -> Result<Self, ReduceError> {
        if let Some(group_size) = job.group_size {
            if group_size < 2 {
                return Err(ReduceError::GroupSizeTooSmall { group_size, items: 2 });
            }
        }

        let summarizer = AspectSummarizer::new(generator, job.mode, job.sampling).with_examples(job.examples);
        Ok(Self {
            summarizer,
            group_size: job.group_size,
            save_every: job.save_every.max(1),
            max_reviews: job.max_reviews,
        })
    }

    /// Summarize one entity's reviews for `aspect`. Returns `None` when it has no reviews.
    pub async fn summarize_entity(&self, entity: &Entity, aspect: &str) -> Result<Option<String>> {
        let mut texts = entity.review_texts();
        if let Some(max) = self.max_reviews {
            texts.truncate(max);
        }
        if texts.is_empty() {
            return Ok(None);
        }

        let summary = match self.group_size {
            None => self.summarizer.summarize(aspect, &texts.join(" ")).await,
            Some(group_size) => {
                let reduction = reduce(texts, group_size, |text| async move {
                    self.summarizer.summarize(aspect, &text).await
                })
                .await?;
                tracing::debug!(
                    entity_id = %entity.entity_id,
                    aspect,
                    rounds = reduction.rounds,
                    calls = reduction.calls,
                    "Reduced reviews"
                );
                reduction.summary
            }
        };

        Ok(Some(summary))
    }

    pub async fn run(&self, entities: &[Entity], schema: &DatasetSchema, log: &JsonlLog) -> Result<SummaryReport> {
        log.repair().await?;
        let processed: Vec<SummaryRecord> = log.read_all().await?;
        tracing::info!(path = %log.path().display(), processed = processed.len(), "Found processed summaries");

        let done: HashSet<(String, String)> = processed
            .into_iter()
            .map(|record| (record.entity_id, record.aspect))
            .collect();

        let mut report = SummaryReport::default();

        for aspect in &schema.aspects {
            tracing::info!(aspect = %aspect, "Processing aspect");
            let mut buffer = Vec::with_capacity(self.save_every);

            for entity in entities {
                if done.contains(&(entity.entity_id.clone(), aspect.clone())) {
                    report.skipped += 1;
                    continue;
                }
                if !entity.summaries.is_empty() && !entity.summaries.contains_key(aspect) {
                    report.skipped += 1;
                    continue;
                }

                let Some(summary) = self.summarize_entity(entity, aspect).await? else {
                    tracing::warn!(entity_id = %entity.entity_id, "Entity has no reviews");
                    report.skipped += 1;
                    continue;
                };

                if summary.is_empty() {
                    report.empty += 1;
                    tracing::warn!(entity_id = %entity.entity_id, aspect = %aspect, "Empty summary");
                }
                buffer.push(SummaryRecord {
                    entity_id: entity.entity_id.clone(),
                    aspect: aspect.clone(),
                    summary,
                });
                report.processed += 1;

                if buffer.len() >= self.save_every {
                    log.append(&buffer).await?;
                    buffer.clear();
                    tracing::info!(aspect = %aspect, processed = report.processed, "Summarization progress");
                }
            }

            if !buffer.is_empty() {
                log.append(&buffer).await?;
            }
        }

        tracing::info!(
            processed = report.processed,
            skipped = report.skipped,
            empty = report.empty,
            "Summarization finished"
        );
        Ok(report)
    }
}
