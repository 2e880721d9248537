use extract::{ChatMessage, GenerationPort, SamplingConfig};
use std::collections::HashMap;
use std::sync::Arc;

use crate::prompt::{SummaryMode, build_summary_prompt};

/// Turns review text into a summary of one aspect through the generation port.
#[derive(Clone)]
pub struct AspectSummarizer {
    generator: Arc<dyn GenerationPort>,
    mode: SummaryMode,
    sampling: SamplingConfig,
    /// Aspect -> example summaries for few-shot prompting.
    examples: HashMap<String, Vec<String>>,
}

impl AspectSummarizer {
    pub fn new(generator: Arc<dyn GenerationPort>, mode: SummaryMode, sampling: SamplingConfig) -> Self {
        Self {
            generator,
            mode,
            sampling,
            examples: HashMap::new(),
        }
    }

    pub fn with_examples(mut self, examples: HashMap<String, Vec<String>>) -> Self {
        self.examples = examples;
        self
    }

    pub fn build_messages(&self, aspect: &str, text: &str) -> Vec<ChatMessage> {
        let examples = self.examples.get(aspect).map(Vec::as_slice).unwrap_or_default();

        let mode = if self.mode == SummaryMode::FewShot && examples.is_empty() {
            tracing::warn!(aspect, "No example summaries for aspect, falling back to zeroshot");
            SummaryMode::ZeroShot
        } else {
            self.mode
        };

        vec![ChatMessage::user(build_summary_prompt(mode, aspect, text, examples))]
    }

    /// Summarize `text` for `aspect`. Returns "" when generation gave up.
    pub async fn summarize(&self, aspect: &str, text: &str) -> String {
        let messages = self.build_messages(aspect, text);
        let summary = self.generator.generate(&messages, &self.sampling).await;
        summary.trim().to_string()
    }
}
