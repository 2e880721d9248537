use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;

use crate::dataset::{DatasetFormat, GENERAL_ASPECT};

/// One review of an entity, sentences already joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub review_id: String,
    pub text: String,
}

/// A reviewed subject with its reviews and reference summaries per aspect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub reviews: Vec<Review>,
    #[serde(default)]
    pub summaries: HashMap<String, Vec<String>>,
}

impl Entity {
    pub fn review_texts(&self) -> Vec<String> {
        self.reviews.iter().map(|r| r.text.clone()).collect()
    }
}

/// A review tagged with its entity, the unit of extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityReview {
    pub entity_id: String,
    pub review_id: String,
    pub text: String,
}

#[derive(Deserialize)]
struct RawReview {
    review_id: Value,
    #[serde(default)]
    sentences: Vec<String>,
}

#[derive(Deserialize)]
struct RawSpaceEntity {
    entity_id: Value,
    reviews: Vec<RawReview>,
    #[serde(default)]
    summaries: HashMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct RawAmasumEntity {
    entity_id: Value,
    reviews: Vec<RawReview>,
    #[serde(default)]
    summaries: Vec<String>,
}

pub struct DatasetReader;

impl DatasetReader {
    /// Load every entity of a dataset file.
    pub async fn read_entities(path: &Path, format: DatasetFormat) -> Result<Vec<Entity>> {
        let content = fs::read_to_string(path)
            .await
            .context(format!("Failed to read dataset: {:?}", path))?;

        let entities = match format {
            DatasetFormat::Space => Self::parse_space(&content)?,
            DatasetFormat::Amasum => Self::parse_amasum(&content)?,
        };

        if entities.is_empty() {
            anyhow::bail!("Dataset contains no entities: {:?}", path);
        }

        tracing::info!(path = %path.display(), entities = entities.len(), "Loaded dataset");
        Ok(entities)
    }

    pub fn parse_space(content: &str) -> Result<Vec<Entity>> {
        let raw: Vec<RawSpaceEntity> =
            serde_json::from_str(content).context("Failed to parse space dataset")?;

        Ok(raw
            .into_iter()
            .map(|e| Entity {
                entity_id: id_to_string(&e.entity_id),
                reviews: e.reviews.into_iter().map(to_review).collect(),
                summaries: e.summaries,
            })
            .collect())
    }

    pub fn parse_amasum(content: &str) -> Result<Vec<Entity>> {
        let mut entities = Vec::new();

        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let raw: RawAmasumEntity = serde_json::from_str(line)
                .context(format!("Failed to parse amasum entity on line {}", line_no + 1))?;

            let mut summaries = HashMap::new();
            summaries.insert(GENERAL_ASPECT.to_string(), raw.summaries);

            entities.push(Entity {
                entity_id: id_to_string(&raw.entity_id),
                reviews: raw.reviews.into_iter().map(to_review).collect(),
                summaries,
            });
        }

        Ok(entities)
    }
}

/// Flatten entities into reviews in file order. This order is the extraction resume cursor.
pub fn flatten_reviews(entities: &[Entity]) -> Vec<EntityReview> {
    entities
        .iter()
        .flat_map(|entity| {
            entity.reviews.iter().map(|review| EntityReview {
                entity_id: entity.entity_id.clone(),
                review_id: review.review_id.clone(),
                text: review.text.clone(),
            })
        })
        .collect()
}

fn to_review(raw: RawReview) -> Review {
    let text = raw
        .sentences
        .iter()
        .map(|s| s.trim())
        .collect::<Vec<_>>()
        .join(" ");

    Review {
        review_id: id_to_string(&raw.review_id),
        text,
    }
}

fn id_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
