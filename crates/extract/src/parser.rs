//! Turns loosely templated model output into validated opinion tuples.
//!
//! A response is cut into blocks at every `#Aspect name:` marker. Each block
//! must match the four-field template of its dataset (aspect, entity, opinion
//! phrases, description) using shortest-match captures, so a repeated label
//! inside free text never swallows the fields after it. Blocks that match
//! are then validated field by field; failures are reported as a
//! [`RejectReason`] rather than dropped silently.

use anyhow::{Context, Result};
use ingest::{BLOCK_MARKER, DatasetSchema, GENERAL_ASPECT};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::schema::{ExtractionRecord, OpinionTuple, ParsedReview};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The block never matched all four fields. Not a validation failure.
    #[error("block does not match the record template")]
    TemplateMismatch,
    #[error("aspect is missing or invalid")]
    InvalidAspect,
    #[error("feature is missing or invalid")]
    InvalidFeature,
    #[error("no valid opinion phrase")]
    NoOpinions,
    #[error("description is missing or invalid")]
    InvalidDescription,
}

/// Placeholder values the model emits instead of leaving a field out.
///
/// A leading "-" stays valid, list dashes are common in reviews.
pub fn is_valid(text: &str) -> bool {
    let text = text.trim().to_lowercase();

    if text.is_empty() || text == "none" || text == "n/a" {
        return false;
    }
    !(text.starts_with('[') || text.starts_with("n/a"))
}

/// Split a response at every block marker. Text before the first marker is ignored.
pub fn split_blocks(raw: &str) -> Vec<&str> {
    let starts: Vec<usize> = raw.match_indices(BLOCK_MARKER).map(|(i, _)| i).collect();

    starts
        .iter()
        .enumerate()
        .map(|(idx, &start)| {
            let end = starts.get(idx + 1).copied().unwrap_or(raw.len());
            raw[start..end].trim()
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub tuples: Vec<OpinionTuple>,
    pub rejects: Vec<RejectReason>,
}

/// Diagnostic counters over a parsing run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseStats {
    pub records: usize,
    pub blocks: usize,
    pub tuples: usize,
    /// Blocks that never matched the template.
    pub mismatched: usize,
    /// Blocks that matched but failed validation, by reason.
    pub rejected: BTreeMap<RejectReason, usize>,
    /// Records that produced no tuple at all.
    pub empty_records: usize,
}

impl ParseStats {
    pub fn record(&mut self, outcome: &ParseOutcome) {
        self.records += 1;
        self.blocks += outcome.tuples.len() + outcome.rejects.len();
        self.tuples += outcome.tuples.len();

        for reason in &outcome.rejects {
            if *reason == RejectReason::TemplateMismatch {
                self.mismatched += 1;
            } else {
                *self.rejected.entry(*reason).or_insert(0) += 1;
            }
        }

        if outcome.tuples.is_empty() {
            self.empty_records += 1;
        }
    }

    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }

    /// Every block that did not become a tuple.
    pub fn discarded(&self) -> usize {
        self.mismatched + self.rejected_total()
    }
}

pub struct RecordParser {
    schema: DatasetSchema,
    pattern: Regex,
}

impl RecordParser {
    pub fn new(schema: &DatasetSchema) -> Result<Self> {
        let flags = if schema.template.multiline { "(?s)" } else { "" };
        let pattern = format!(
            r"{}{}\s*(.*?)\s*{}\s*(.*?)\s*{}\s*(.*?)\s*{}\s*(.*)",
            flags,
            regex::escape(BLOCK_MARKER),
            regex::escape("#Entity name:"),
            regex::escape(schema.template.opinion_label),
            regex::escape("#Description:"),
        );

        let pattern = Regex::new(&pattern).context("Failed to compile record template")?;

        Ok(Self {
            schema: schema.clone(),
            pattern,
        })
    }

    /// Parse and validate one block.
    pub fn parse_block(&self, block: &str) -> Result<OpinionTuple, RejectReason> {
        let caps = self
            .pattern
            .captures(block)
            .ok_or(RejectReason::TemplateMismatch)?;

        let aspect_text = caps.get(1).map_or("", |m| m.as_str());
        let feature_text = caps.get(2).map_or("", |m| m.as_str());
        let opinion_text = caps.get(3).map_or("", |m| m.as_str());
        let description_text = caps.get(4).map_or("", |m| m.as_str());

        let aspect_head = aspect_text.split(',').next().unwrap_or("");
        if !is_valid(aspect_head) {
            return Err(RejectReason::InvalidAspect);
        }
        let mut aspect = self.schema.canonical_aspect(aspect_head);

        if !is_valid(feature_text) {
            return Err(RejectReason::InvalidFeature);
        }
        let feature = feature_text.trim().to_lowercase();

        let opinions: Vec<String> = opinion_text
            .to_lowercase()
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| is_valid(o))
            .collect();
        if opinions.is_empty() {
            return Err(RejectReason::NoOpinions);
        }

        if !is_valid(description_text) {
            return Err(RejectReason::InvalidDescription);
        }
        let description = description_text.trim().to_string();

        // The description has to back the aspect up.
        if !description.to_lowercase().contains(&feature) {
            aspect = GENERAL_ASPECT.to_string();
        }

        Ok(OpinionTuple {
            aspect,
            feature,
            opinions,
            description,
        })
    }

    pub fn parse(&self, raw_response: &str) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();

        for block in split_blocks(raw_response) {
            match self.parse_block(block) {
                Ok(tuple) => outcome.tuples.push(tuple),
                Err(reason) => outcome.rejects.push(reason),
            }
        }

        outcome
    }

    /// Parse a whole extraction log. Records without any tuple are left out.
    pub fn parse_records(&self, records: &[ExtractionRecord]) -> (Vec<ParsedReview>, ParseStats) {
        let mut stats = ParseStats::default();
        let mut parsed = Vec::new();

        for record in records {
            let outcome = self.parse(&record.raw_response);
            stats.record(&outcome);

            if outcome.tuples.is_empty() {
                tracing::debug!(
                    entity_id = %record.entity_id,
                    review_id = %record.review_id,
                    "Record produced no valid tuples"
                );
                continue;
            }

            parsed.push(ParsedReview {
                entity_id: record.entity_id.clone(),
                review_id: record.review_id.clone(),
                data: outcome.tuples,
            });
        }

        (parsed, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> RecordParser {
        RecordParser::new(&DatasetSchema::space()).unwrap()
    }

    fn amasum() -> RecordParser {
        RecordParser::new(&DatasetSchema::amasum()).unwrap()
    }

    fn space_block(aspect: &str, feature: &str, opinions: &str, description: &str) -> String {
        format!(
            "#Aspect name: {} #Entity name: {} #Expression phrases: {} #Description: {}",
            aspect, feature, opinions, description
        )
    }

    #[test]
    fn test_validity_filter() {
        assert!(!is_valid("n/a"));
        assert!(!is_valid("None"));
        assert!(!is_valid("  NONE "));
        assert!(!is_valid("[foo]"));
        assert!(!is_valid("N/A - not mentioned"));
        assert!(!is_valid("   "));
        assert!(is_valid("-clean towels"));
        assert!(is_valid("nonetheless"));
    }

    #[test]
    fn test_single_block() {
        let raw = "#Aspect name: Service #Entity name: Staff #Expression phrases: kind, friendly #Description: The staff was kind and friendly.";

        let outcome = space().parse(raw);

        assert!(outcome.rejects.is_empty());
        assert_eq!(
            outcome.tuples,
            vec![OpinionTuple {
                aspect: "service".into(),
                feature: "staff".into(),
                opinions: vec!["kind".into(), "friendly".into()],
                description: "The staff was kind and friendly.".into(),
            }]
        );
    }

    #[test]
    fn test_parsing_is_deterministic() {
        let raw = format!(
            "Sure!\n{}\n{}",
            space_block("Rooms", "Bed", "comfy", "The bed was comfy."),
            space_block("Food", "Breakfast", "cold", "Breakfast was cold."),
        );
        let parser = space();

        assert_eq!(parser.parse(&raw), parser.parse(&raw));
        assert_eq!(parser.parse(&raw).tuples.len(), 2);
    }

    #[test]
    fn test_synonym_aspect_kept_when_description_mentions_feature() {
        let raw = space_block("Wifi", "wifi", "missing", "The room had no wifi");

        let tuple = space().parse_block(&raw).unwrap();

        assert_eq!(tuple.aspect, "rooms");
    }

    #[test]
    fn test_aspect_forced_to_general_when_feature_absent() {
        let raw = space_block("Wifi", "wifi", "great", "Great stay overall");

        let tuple = space().parse_block(&raw).unwrap();

        assert_eq!(tuple.aspect, "general");
        assert_eq!(tuple.feature, "wifi");
    }

    #[test]
    fn test_feature_check_is_case_insensitive() {
        let raw = space_block("Location", "Metro Station", "close", "The METRO station is close.");

        let tuple = space().parse_block(&raw).unwrap();

        assert_eq!(tuple.aspect, "location");
        assert_eq!(tuple.feature, "metro station");
    }

    #[test]
    fn test_multi_entity_feature_is_not_split() {
        let raw = space_block("Rooms", "Bed, Pillows", "soft", "Bed, pillows were soft.");

        let tuple = space().parse_block(&raw).unwrap();

        assert_eq!(tuple.feature, "bed, pillows");
        assert_eq!(tuple.aspect, "rooms");
    }

    #[test]
    fn test_invalid_fields_are_rejected_by_reason() {
        let parser = space();

        assert_eq!(
            parser.parse_block(&space_block("N/A", "staff", "kind", "staff kind")),
            Err(RejectReason::InvalidAspect)
        );
        assert_eq!(
            parser.parse_block(&space_block("Service", "None", "kind", "staff kind")),
            Err(RejectReason::InvalidFeature)
        );
        assert_eq!(
            parser.parse_block(&space_block("Service", "staff", "none, n/a, [x]", "staff kind")),
            Err(RejectReason::NoOpinions)
        );
        assert_eq!(
            parser.parse_block(&space_block("Service", "staff", "kind", "[no description]")),
            Err(RejectReason::InvalidDescription)
        );
    }

    #[test]
    fn test_invalid_opinions_are_filtered_individually() {
        let raw = space_block("Service", "staff", "Kind, n/a, -helpful", "staff were kind");

        let tuple = space().parse_block(&raw).unwrap();

        assert_eq!(tuple.opinions, vec!["kind", "-helpful"]);
    }

    #[test]
    fn test_partial_block_is_a_template_mismatch() {
        let outcome = space().parse("#Aspect name: Rooms #Entity name: Bed #Description: Nice bed.");

        assert!(outcome.tuples.is_empty());
        assert_eq!(outcome.rejects, vec![RejectReason::TemplateMismatch]);
    }

    #[test]
    fn test_text_without_marker_yields_no_blocks() {
        assert_eq!(space().parse("I could not find any aspects."), ParseOutcome::default());
    }

    #[test]
    fn test_space_fields_stay_on_one_line() {
        let parser = space();

        let broken = "#Aspect name: Rooms #Entity name: Bed\nframe #Expression phrases: sturdy #Description: The bed frame was sturdy.";
        assert_eq!(parser.parse_block(broken), Err(RejectReason::TemplateMismatch));

        let trailing = "#Aspect name: Rooms\n#Entity name: Bed\n#Expression phrases: comfy\n#Description: The bed was comfy.\nWould stay again.";
        let tuple = parser.parse_block(trailing).unwrap();
        assert_eq!(tuple.description, "The bed was comfy.");
    }

    #[test]
    fn test_amasum_template_spans_lines() {
        let raw = "#Aspect name: Functionality, TV\n#Entity name: Remote control\n#Opinion phrases: love, extend\n#Description: I love that the remote control\nlets me extend the TV.";

        let tuple = amasum().parse_block(raw).unwrap();

        assert_eq!(tuple.aspect, "general");
        assert_eq!(tuple.feature, "remote control");
        assert_eq!(tuple.opinions, vec!["love", "extend"]);
        assert_eq!(
            tuple.description,
            "I love that the remote control\nlets me extend the TV."
        );
    }

    #[test]
    fn test_shortest_match_between_labels() {
        let raw = "#Aspect name: Service #Entity name: Staff #Expression phrases: kind #Description: The staff said #Entity name: was on the sign.";

        let tuple = space().parse_block(raw).unwrap();

        assert_eq!(tuple.feature, "staff");
        assert_eq!(tuple.description, "The staff said #Entity name: was on the sign.");
    }

    #[test]
    fn test_parse_records_counts_diagnostics() {
        let records = vec![
            ExtractionRecord {
                entity_id: "h1".into(),
                review_id: "r1".into(),
                raw_response: format!(
                    "{}\n{}\n#Aspect name: Rooms #Entity name: Bed",
                    space_block("Service", "staff", "kind", "The staff was kind."),
                    space_block("Service", "n/a", "kind", "Kind."),
                ),
            },
            ExtractionRecord {
                entity_id: "h1".into(),
                review_id: "r2".into(),
                raw_response: String::new(),
            },
        ];

        let (parsed, stats) = space().parse_records(&records);

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].review_id, "r1");
        assert_eq!(stats.records, 2);
        assert_eq!(stats.blocks, 3);
        assert_eq!(stats.tuples, 1);
        assert_eq!(stats.mismatched, 1);
        assert_eq!(stats.rejected.get(&RejectReason::InvalidFeature), Some(&1));
        assert_eq!(stats.discarded(), 2);
        assert_eq!(stats.empty_records, 1);
    }
}
