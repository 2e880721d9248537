pub mod llm;
pub mod normalizer;
pub mod parser;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod store;

pub use llm::{
    ChatBackend, ChatMessage, GenerationPort, OllamaClient, OpenAiClient, RetryingGenerator,
    SamplingConfig,
};
pub use normalizer::FeatureNormalizer;
pub use parser::{ParseOutcome, ParseStats, RecordParser, RejectReason, is_valid};
pub use retry::RetryPolicy;
pub use schema::{ExtractionRecord, OpinionTuple, ParsedReview};
pub use store::ExtractionStore;

use anyhow::Result;
use ingest::{DatasetFormat, EntityReview};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionReport {
    /// Reviews already present in the log before this run.
    pub skipped: usize,
    pub generated: usize,
    /// Generated records whose response came back empty.
    pub empty: usize,
}

/// Runs the extraction prompt over every review not yet in the log.
pub struct Extractor {
    generator: Arc<dyn GenerationPort>,
    format: DatasetFormat,
    sampling: SamplingConfig,
}

impl Extractor {
    pub fn new(generator: Arc<dyn GenerationPort>, format: DatasetFormat, sampling: SamplingConfig) -> Self {
        Self {
            generator,
            format,
            sampling,
        }
    }

    /// Extract opinions from a single review. An empty response is a failed output, not an error.
    pub async fn extract_review(&self, review: &EntityReview) -> ExtractionRecord {
        let messages = prompt::build_extraction_messages(self.format, &review.text);
        let response = self.generator.generate(&messages, &self.sampling).await;

        ExtractionRecord {
            entity_id: review.entity_id.clone(),
            review_id: review.review_id.clone(),
            raw_response: response,
        }
    }

    /// Resume from the log's line count and append records every `save_every` reviews.
    pub async fn run(
        &self,
        reviews: &[EntityReview],
        store: &ExtractionStore,
        save_every: usize,
    ) -> Result<ExtractionReport> {
        let save_every = save_every.max(1);
        let cursor = store.resume_cursor().await?;

        if cursor > reviews.len() {
            tracing::warn!(
                processed = cursor,
                total = reviews.len(),
                "Extraction log is longer than the dataset, nothing to do"
            );
        }

        let mut report = ExtractionReport {
            skipped: cursor.min(reviews.len()),
            ..Default::default()
        };
        let pending = &reviews[report.skipped..];
        let mut buffer = Vec::with_capacity(save_every);

        for review in pending {
            let record = self.extract_review(review).await;
            if record.raw_response.is_empty() {
                report.empty += 1;
                tracing::warn!(
                    entity_id = %review.entity_id,
                    review_id = %review.review_id,
                    "Empty extraction response"
                );
            }
            buffer.push(record);
            report.generated += 1;

            if buffer.len() >= save_every {
                store.append(&buffer).await?;
                buffer.clear();
                tracing::info!(
                    done = report.skipped + report.generated,
                    total = reviews.len(),
                    empty = report.empty,
                    "Extraction progress"
                );
            }
        }

        store.append(&buffer).await?;

        tracing::info!(
            path = %store.path().display(),
            skipped = report.skipped,
            generated = report.generated,
            empty = report.empty,
            "Extraction finished"
        );
        Ok(report)
    }
}
