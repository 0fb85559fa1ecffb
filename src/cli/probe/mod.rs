//! Probe command - writes, reads and removes one value per provider

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::AppConfig;
use crate::domain::{
    BlobStorageProviderExt, CloudEntity, QueueStorageProviderExt, RuntimeFinalizer,
    TableStorageProviderExt,
};
use crate::infrastructure::finalizer::ShutdownFinalizer;
use crate::infrastructure::logging::{self, TracingLog};
use crate::infrastructure::storage::{CloudStorage, StorageBuilder, StorageProviders};

/// Arguments for the probe command
#[derive(Args, Clone, Debug, Default)]
pub struct ProbeArgs {
    /// Use process-local stores (overrides config)
    #[arg(long, conflicts_with_all = ["development", "connection_string"])]
    pub in_memory: bool,

    /// Use the local storage emulator (overrides config)
    #[arg(long, conflicts_with = "connection_string")]
    pub development: bool,

    /// Storage account connection string (overrides config)
    #[arg(long)]
    pub connection_string: Option<String>,

    /// Prefix for the container, table and queue names
    #[arg(long, default_value = "probe")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ProbeRecord {
    id: String,
    written_at: chrono::DateTime<chrono::Utc>,
}

/// Run the probe
pub async fn run(args: ProbeArgs) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    logging::init_logging(&logging::LoggingConfig {
        level: config.logging.level.clone(),
        format: config.logging.format.clone(),
    });

    let finalizer = Arc::new(ShutdownFinalizer::new());
    let mut builder = select_builder(&args, &config)?;
    builder
        .with_log(Some(Arc::new(TracingLog::with_source("probe"))))
        .with_finalizer(Some(finalizer.clone()));

    info!(backend = %builder.backend(), "Building storage providers");
    let providers = builder.build_all()?;

    let result = probe(&providers, &args.name).await;
    finalizer.finalize_all().await;
    result?;

    info!("Probe completed");
    Ok(())
}

fn select_builder(args: &ProbeArgs, config: &AppConfig) -> anyhow::Result<StorageBuilder> {
    if args.in_memory {
        return Ok(CloudStorage::for_in_memory_storage());
    }
    if args.development {
        return Ok(CloudStorage::for_development_storage());
    }
    if let Some(connection_string) = &args.connection_string {
        return CloudStorage::for_connection_string(connection_string)
            .context("Invalid --connection-string");
    }

    CloudStorage::from_settings(&config.storage).context("Invalid storage configuration")
}

/// Exercises every provider of an aggregate
pub async fn probe(providers: &StorageProviders, name: &str) -> anyhow::Result<()> {
    let record = ProbeRecord {
        id: uuid::Uuid::new_v4().to_string(),
        written_at: chrono::Utc::now(),
    };
    let container = format!("{}-blobs", name);
    let table = format!("{}records", name.replace('-', ""));
    let queue = format!("{}-queue", name);

    let blob = providers.blob_storage();
    blob.put_value(&container, &record.id, &record).await?;
    let read: Option<ProbeRecord> = blob.get_value(&container, &record.id).await?;
    anyhow::ensure!(read.as_ref() == Some(&record), "Blob round trip returned {:?}", read);
    blob.delete_blob(&container, &record.id).await?;
    info!(container = %container, "Blob storage OK");

    let tables = providers.table_storage();
    tables
        .upsert_values(&table, &[CloudEntity::new("probe", record.id.as_str(), record.clone())])
        .await?;
    let entity = tables
        .get_value::<ProbeRecord>(&table, "probe", &record.id)
        .await?
        .context("Table entity missing after upsert")?;
    anyhow::ensure!(entity.value == record, "Table round trip returned {:?}", entity.value);
    tables.delete(&table, "probe", &record.id).await?;
    info!(table = %table, "Table storage OK");

    let queues = providers.queue_storage();
    queues.put_value(&queue, &record).await?;
    let messages = queues.get(&queue, 1, Duration::from_secs(30)).await?;
    let message = messages.first().context("Queue returned no message")?;
    let received: ProbeRecord = queues.decode(message)?;
    anyhow::ensure!(received == record, "Queue round trip returned {:?}", received);
    queues.delete(message).await?;
    info!(queue = %queue, "Queue storage OK");

    Ok(())
}
