pub mod dataset;
pub mod jsonl;
pub mod reader;

pub use dataset::{BLOCK_MARKER, DatasetFormat, DatasetSchema, GENERAL_ASPECT, RecordTemplate};
pub use jsonl::JsonlLog;
pub use reader::{DatasetReader, Entity, EntityReview, Review, flatten_reviews};

use anyhow::Result;
use std::path::Path;

/// Load a dataset file and flatten it into reviews, the unit of extraction.
pub async fn ingest_reviews(path: &Path, schema: &DatasetSchema) -> Result<Vec<EntityReview>> {
    let entities = DatasetReader::read_entities(path, schema.format).await?;
    Ok(flatten_reviews(&entities))
}
