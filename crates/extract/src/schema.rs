use serde::{Deserialize, Serialize};

/// Raw model output for one review, as stored in the extraction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub entity_id: String,
    pub review_id: String,
    #[serde(rename = "response", alias = "raw_response")]
    pub raw_response: String,
}

/// One validated {aspect, feature, opinions, description} fact from a response block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpinionTuple {
    pub aspect: String,
    pub feature: String,
    pub opinions: Vec<String>,
    pub description: String,
}

/// All tuples parsed from one review. Reviews without tuples are not kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedReview {
    pub entity_id: String,
    pub review_id: String,
    pub data: Vec<OpinionTuple>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_reads_both_field_names() {
        let a: ExtractionRecord =
            serde_json::from_str(r#"{"entity_id":"e","review_id":"r","response":"x"}"#).unwrap();
        let b: ExtractionRecord =
            serde_json::from_str(r#"{"entity_id":"e","review_id":"r","raw_response":"x"}"#).unwrap();

        assert_eq!(a, b);
        assert!(serde_json::to_string(&a).unwrap().contains("\"response\":\"x\""));
    }
}
