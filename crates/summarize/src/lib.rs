pub mod prompt;
pub mod reduce;
pub mod scheduler;
pub mod summarizer;

pub use prompt::{SummaryMode, build_summary_prompt};
pub use reduce::{ReduceError, Reduction, reduce};
pub use scheduler::{ReduceScheduler, SummaryJob, SummaryRecord, SummaryReport};
pub use summarizer::AspectSummarizer;
