use std::future::Future;

use futures::stream::{self, StreamExt};

use super::error::ReconcileError;

/// What happened to one remote entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Written,
    Unchanged,
    Deleted,
    Skipped,
    Failed,
}

/// Run `work` over `items` with at most `concurrency` in flight.
///
/// Outcomes come back in completion order, not input order.
pub async fn run_bounded<T, F, Fut>(items: Vec<T>, concurrency: usize, work: F) -> Vec<ItemOutcome>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = ItemOutcome>,
{
    stream::iter(items)
        .map(work)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

/// Log a per-entity error and turn it into an outcome.
pub fn settle(
    stream: &str,
    external_id: Option<&str>,
    result: Result<ItemOutcome, ReconcileError>,
) -> ItemOutcome {
    match result {
        Ok(outcome) => outcome,
        Err(e) if e.is_skip() => {
            tracing::warn!(stream, external_id, error = %e, "entity skipped");
            ItemOutcome::Skipped
        }
        Err(e) => {
            tracing::error!(stream, external_id, error = ?e, "entity failed");
            ItemOutcome::Failed
        }
    }
}
