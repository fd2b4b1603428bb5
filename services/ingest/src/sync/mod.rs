pub mod attachments;
pub mod body_fields;
pub mod deletion;
pub mod error;
pub mod fetcher;
pub mod normalize;
pub mod pool;
pub mod reconciler;
pub mod resolver;
pub mod schema;
pub mod upload;

use fieldsync_db::records::repositories::{RecordRepository, ReferenceRepository};

/// The local record store as the engine sees it.
pub trait LocalStore: RecordRepository + ReferenceRepository {}

impl<T: RecordRepository + ReferenceRepository> LocalStore for T {}
