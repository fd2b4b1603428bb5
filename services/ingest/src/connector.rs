use async_trait::async_trait;

use crate::sync::pool::ItemOutcome;

/// Counters for one stream cycle. Emitted as structured fields at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub source: String,
    pub upserted: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: usize,
    pub pages: usize,
    /// More changes were available than the page bound allowed.
    pub truncated: bool,
}

impl SyncResult {
    pub fn empty(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Written => self.upserted += 1,
            ItemOutcome::Unchanged => self.unchanged += 1,
            ItemOutcome::Deleted => self.deleted += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Failed => self.errors += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.upserted + self.unchanged + self.deleted + self.skipped + self.errors
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn source_name(&self) -> &str;
    async fn sync(&self) -> Result<SyncResult, Box<dyn std::error::Error + Send + Sync>>;
}
