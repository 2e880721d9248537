use std::future::Future;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReduceError {
    #[error("Nothing to summarize")]
    EmptyInput,
    #[error("Group size must be at least 2 to reduce {items} items, got {group_size}")]
    GroupSizeTooSmall { group_size: usize, items: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduction {
    pub summary: String,
    pub rounds: usize,
    /// Number of `summarize` invocations.
    pub calls: usize,
}

/// Tree reduction: summarize consecutive groups of `group_size` texts, then the
/// group summaries, until one text is left.
///
/// A single item is summarized once. Empty summaries are kept as ordinary text.
pub async fn reduce<F, Fut>(
    items: Vec<String>,
    group_size: usize,
    mut summarize: F,
) -> Result<Reduction, ReduceError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = String>,
{
    match items.len() {
        0 => return Err(ReduceError::EmptyInput),
        1 => {
            let summary = summarize(items.into_iter().next().unwrap_or_default()).await;
            return Ok(Reduction { summary, rounds: 1, calls: 1 });
        }
        n if group_size < 2 => {
            return Err(ReduceError::GroupSizeTooSmall { group_size, items: n });
        }
        _ => {}
    }

    let mut items = items;
    let mut rounds = 0;
    let mut calls = 0;

    while items.len() > 1 {
        let mut summaries = Vec::with_capacity(items.len().div_ceil(group_size));
        for group in items.chunks(group_size) {
            summaries.push(summarize(group.join(" ")).await);
            calls += 1;
        }
        rounds += 1;
        tracing::debug!(round = rounds, remaining = summaries.len(), "Reduce round finished");
        items = summaries;
    }

    Ok(Reduction {
        summary: items.pop().unwrap_or_default(),
        rounds,
        calls,
    })
}
