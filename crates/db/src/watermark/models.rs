use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const STATUS_IDLE: &str = "idle";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub stream_key: String,
    pub watermark: Option<DateTime<Utc>>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncWatermark {
    pub fn new(stream_key: &str) -> Self {
        let now = Utc::now();
        Self {
            stream_key: stream_key.to_owned(),
            watermark: None,
            status: STATUS_IDLE.to_owned(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == STATUS_RUNNING
    }
}
