use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prompting strategy for aspect summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryMode {
    #[default]
    ZeroShot,
    /// Shows example summaries of the same aspect before the reviews.
    FewShot,
    /// Asks for aspect, popular opinions and features before summarizing.
    Cot,
}

impl FromStr for SummaryMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zeroshot" => Ok(Self::ZeroShot),
            "fewshot" => Ok(Self::FewShot),
            "cot" => Ok(Self::Cot),
            other => anyhow::bail!("Unknown mode: {} (expected zeroshot, fewshot or cot)", other),
        }
    }
}

impl fmt::Display for SummaryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ZeroShot => "zeroshot",
            Self::FewShot => "fewshot",
            Self::Cot => "cot",
        };
        f.write_str(name)
    }
}

pub fn build_summary_prompt(mode: SummaryMode, aspect: &str, text: &str, examples: &[String]) -> String {
    match mode {
        SummaryMode::ZeroShot => format!(
            "Briefly summarize the review related to {}: {}.\nPlease use the language used in reviews",
            aspect, text
        ),
        SummaryMode::FewShot => format!(
            "Briefly summarize the ### Review related to {}.\nOutput example: {}.\n### Review {}.",
            aspect,
            examples.join("\n\n"),
            text
        ),
        SummaryMode::Cot => format!(
            "1. Aspect extraction: Identify the aspect reviewed\n\
             2. Popular opinion: what opinions appear the most in reviews\n\
             3. Feature and Opinion extraction: what features is reviewed, and what is the opinion about it\n\
             4. Summarization: combine all the information into a cohesive summary like a normal review\n\
             Briefly summarize the reviews related to {}: {}.",
            aspect, text
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names() {
        for mode in [SummaryMode::ZeroShot, SummaryMode::FewShot, SummaryMode::Cot] {
            assert_eq!(mode.to_string().parse::<SummaryMode>().unwrap(), mode);
            assert_eq!(serde_json::to_string(&mode).unwrap(), format!("\"{}\"", mode));
        }
        assert!("iterative".parse::<SummaryMode>().is_err());
    }

    #[test]
    fn test_fewshot_prompt_lists_examples() {
        let examples = vec!["Great rooms.".to_string(), "Clean rooms.".to_string()];
        let prompt = build_summary_prompt(SummaryMode::FewShot, "rooms", "Big bed.", &examples);

        assert!(prompt.contains("related to rooms"));
        assert!(prompt.contains("Great rooms.\n\nClean rooms."));
        assert!(prompt.ends_with("### Review Big bed.."));
    }

    #[test]
    fn test_cot_prompt_ends_with_reviews() {
        let prompt = build_summary_prompt(SummaryMode::Cot, "food", "Tasty.", &[]);

        assert!(prompt.starts_with("1. Aspect extraction"));
        assert!(prompt.ends_with("related to food: Tasty.."));
    }
}
