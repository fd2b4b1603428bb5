mod connector;
mod sp10;
mod streams;
mod sync;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use uuid::Uuid;

use fieldsync_common::types::ServiceInfo;
use fieldsync_config::{init_tracing, AppConfig, SyncConfig};
use fieldsync_db::files::{FileStore, LocalFileStore};
use fieldsync_db::records::pg_repository::PgRecordRepository;
use fieldsync_db::watermark::pg_repository::PgWatermarkRepository;

use crate::connector::Connector;
use crate::sp10::client::{Sp10Client, Sp10ClientConfig};
use crate::sp10::models::{field_id, NoteUpload};
use crate::sync::attachments::content_type_for_name;
use crate::sync::upload::NoteUploader;
use crate::sync::LocalStore;

const USAGE: &str = "usage: fieldsync-ingest [upload-note <sales-order-id> <file> [description]]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.log_level);

    let info = ServiceInfo::new("fieldsync-ingest", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        service = %info.name,
        version = %info.version,
        instance_id = %info.instance_id,
        "starting"
    );

    sync::schema::validate_all()?;
    let sync_config = SyncConfig::from_env()?;

    let sp10_config = match Sp10ClientConfig::from_env() {
        Ok(Some(sp10_config)) => sp10_config,
        Ok(None) => {
            tracing::info!("no SP10 credentials found, nothing to sync");
            return Ok(());
        }
        Err(e) => bail!("SP10 configuration error: {e}"),
    };
    tracing::info!(
        base_url = %sp10_config.base_url,
        max_retries = sp10_config.max_retries,
        uploads = sp10_config.upload_url.is_some(),
        "SP10 connector configured"
    );
    let client = Sp10Client::new(sp10_config).context("failed to create SP10 client")?;

    let pool = fieldsync_db::create_pool(&config.database_url).await?;
    fieldsync_db::ensure_schema(&pool).await?;
    let records = Arc::new(PgRecordRepository::new(pool.clone()));
    let watermarks = Arc::new(PgWatermarkRepository::new(pool));

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => {}
        Some("upload-note") => return upload_note(records, client, args.collect()).await,
        Some(other) => bail!("unknown command {other:?}\n{USAGE}"),
    }

    let files = match &sync_config.attachment_dir {
        Some(dir) => {
            let store = LocalFileStore::new(dir);
            tracing::info!(dir = %store.root().display(), "storing note attachments");
            Some(Arc::new(store) as Arc<dyn FileStore>)
        }
        None => {
            tracing::warn!("ATTACHMENT_DIR not set, note attachments will not be downloaded");
            None
        }
    };

    let connectors =
        streams::build_connectors(records, watermarks, client, files, &sync_config)?;

    let Some(interval_secs) = sync_config.interval_secs else {
        run_all(&connectors).await;
        return Ok(());
    };

    tracing::info!(interval_secs, "running on an interval");
    loop {
        run_all(&connectors).await;
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }
    Ok(())
}

/// One cycle of every stream, in order. A failing stream does not stop the others.
async fn run_all(connectors: &[Box<dyn Connector>]) {
    for connector in connectors {
        match connector.sync().await {
            Ok(result) => {
                tracing::info!(
                    source = result.source,
                    processed = result.processed(),
                    upserted = result.upserted,
                    errors = result.errors,
                    "sync completed"
                );
            }
            Err(e) => {
                tracing::error!(source = connector.source_name(), error = %e, "sync failed");
            }
        }
    }
}

async fn upload_note<R: LocalStore>(
    store: Arc<R>,
    client: Sp10Client,
    args: Vec<String>,
) -> anyhow::Result<()> {
    let [order, path, description @ ..] = args.as_slice() else {
        bail!(USAGE);
    };
    let sales_order: Uuid = order
        .parse()
        .with_context(|| format!("sales order id {order:?} is not a uuid"))?;
    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {path}"))?;
    let file_name = Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path.as_str())
        .to_string();

    let note = NoteUpload {
        content_type: content_type_for_name(&file_name).to_string(),
        file_name,
        description: description.join(" "),
        contents,
    };

    match NoteUploader::new(store, client).upload(sales_order, &note).await {
        Some(created) => {
            tracing::info!(
                %sales_order,
                note_id = ?field_id(&created, "Id"),
                "file note created"
            );
            Ok(())
        }
        None => bail!("file note for {sales_order} was not uploaded"),
    }
}
