use anyhow::Result;
use std::collections::HashMap;

/// Marker that opens every extracted block in a model response.
pub const BLOCK_MARKER: &str = "#Aspect name:";

/// Aspect every unknown or unsupported mention falls back to.
pub const GENERAL_ASPECT: &str = "general";

/// On-disk layout of a review dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    /// A single JSON array of entities, summaries keyed by aspect.
    Space,
    /// JSONL, one entity per line, a flat list of general summaries.
    Amasum,
}

/// Field labels of the four-field extraction template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTemplate {
    /// Label of the opinion field ("#Expression phrases:" or "#Opinion phrases:").
    pub opinion_label: &'static str,
    /// Whether fields may span several lines.
    pub multiline: bool,
}

/// Closed per-dataset vocabulary and parsing conventions.
#[derive(Debug, Clone)]
pub struct DatasetSchema {
    pub name: String,
    pub format: DatasetFormat,
    /// Canonical aspects, in creation and summarization order.
    pub aspects: Vec<String>,
    /// Synonym -> canonical aspect.
    pub synonyms: HashMap<String, String>,
    pub template: RecordTemplate,
}

impl DatasetSchema {
    /// Look up a schema by dataset name.
    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            "space" => Ok(Self::space()),
            "amasum" => Ok(Self::amasum()),
            other => anyhow::bail!("Unknown dataset: {} (expected one of: space, amasum)", other),
        }
    }

    pub fn space() -> Self {
        let groups: [(&str, &[&str]); 6] = [
            (
                "rooms",
                &[
                    "room", "bathroom", "bed", "beds", "bath", "accommodations", "tv",
                    "television", "accommodation", "bathrooms", "bedrooms", "tvs", "wifi", "wi-fi",
                ],
            ),
            ("location", &["view"]),
            ("service", &["staff", "services", "waiters"]),
            ("cleanliness", &["hygiene"]),
            ("building", &["gym", "pool", "amenities", "buildings"]),
            ("food", &["breakfast", "drink", "drinks"]),
        ];

        let mut synonyms = HashMap::new();
        for (aspect, words) in groups {
            for word in words {
                synonyms.insert(word.to_string(), aspect.to_string());
            }
        }

        Self {
            name: "space".to_string(),
            format: DatasetFormat::Space,
            aspects: [
                "general", "rooms", "location", "service", "cleanliness", "building", "food",
            ]
            .iter()
            .map(|a| a.to_string())
            .collect(),
            synonyms,
            template: RecordTemplate {
                opinion_label: "#Expression phrases:",
                multiline: false,
            },
        }
    }

    pub fn amasum() -> Self {
        Self {
            name: "amasum".to_string(),
            format: DatasetFormat::Amasum,
            aspects: vec![GENERAL_ASPECT.to_string()],
            synonyms: HashMap::new(),
            template: RecordTemplate {
                opinion_label: "#Opinion phrases:",
                multiline: true,
            },
        }
    }

    pub fn has_aspect(&self, aspect: &str) -> bool {
        self.aspects.iter().any(|a| a == aspect)
    }

    /// Map an already-validated aspect mention to a canonical aspect.
    ///
    /// The mention is cut at its first comma, trimmed and lower-cased.
    /// Synonyms win over canonical names; anything else is `general`.
    pub fn canonical_aspect(&self, mention: &str) -> String {
        let head = mention.split(',').next().unwrap_or("").trim().to_lowercase();

        if let Some(canonical) = self.synonyms.get(&head) {
            return canonical.clone();
        }
        if self.has_aspect(&head) {
            return head;
        }
        GENERAL_ASPECT.to_string()
    }
}
