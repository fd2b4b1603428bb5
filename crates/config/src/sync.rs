use std::path::PathBuf;

use fieldsync_common::error::{FieldsyncError, FieldsyncResult};

use crate::env::{get_opt_var, parse_var_or};

/// Engine-wide sync settings, resolved once at process start.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Lookback used when a stream has neither an override nor a stored watermark.
    pub lookback_hours: i64,
    /// Upper bound on per-entity work items processed in parallel.
    pub worker_concurrency: usize,
    /// When set, the ingest service repeats the cycle on this interval.
    pub interval_secs: Option<u64>,
    /// Folder that downloaded note attachments are written into.
    pub attachment_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            worker_concurrency: 8,
            interval_secs: None,
            attachment_dir: None,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> FieldsyncResult<Self> {
        let defaults = Self::default();

        let lookback_hours = parse_var_or("SYNC_LOOKBACK_HOURS", defaults.lookback_hours)?;
        if lookback_hours <= 0 {
            return Err(FieldsyncError::Config(
                "SYNC_LOOKBACK_HOURS must be positive".to_string(),
            ));
        }

        let worker_concurrency =
            parse_var_or("SYNC_WORKER_CONCURRENCY", defaults.worker_concurrency)?;
        if worker_concurrency == 0 {
            return Err(FieldsyncError::Config(
                "SYNC_WORKER_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        let interval_secs = match get_opt_var("SYNC_INTERVAL_SECS") {
            Some(raw) => Some(raw.parse::<u64>().map_err(|e| {
                FieldsyncError::Config(format!("invalid SYNC_INTERVAL_SECS: {e}"))
            })?),
            None => None,
        };

        Ok(Self {
            lookback_hours,
            worker_concurrency,
            interval_secs,
            attachment_dir: get_opt_var("ATTACHMENT_DIR").map(PathBuf::from),
        })
    }
}

/// Per-stream knobs: the page bound and a manual watermark for backfill/replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub max_pages: usize,
    pub watermark_override: Option<String>,
}

impl StreamSettings {
    /// Reads `SYNC_<STREAM>_MAX_PAGES` and `SYNC_<STREAM>_WATERMARK_OVERRIDE`.
    pub fn from_env(stream: &str, default_max_pages: usize) -> FieldsyncResult<Self> {
        let prefix = format!("SYNC_{}", stream.to_uppercase());

        let max_pages = parse_var_or(&format!("{prefix}_MAX_PAGES"), default_max_pages)?;
        if max_pages == 0 {
            return Err(FieldsyncError::Config(format!(
                "{prefix}_MAX_PAGES must be at least 1"
            )));
        }

        Ok(Self {
            max_pages,
            watermark_override: get_opt_var(&format!("{prefix}_WATERMARK_OVERRIDE")),
        })
    }
}
