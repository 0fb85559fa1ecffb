//! Storage builder: shared configuration fanned out into the three providers

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::domain::{
    BlobStorageProvider, DataSerializer, DomainError, Finalizable, Log, QueueStorageProvider,
    RetryPolicy, RuntimeFinalizer, StorageAccount, TableStorageProvider,
};
use crate::infrastructure::in_memory::{
    InMemoryBlobStorageProvider, InMemoryQueueStorageProvider, InMemoryTableStorageProvider,
};
use crate::infrastructure::remote::{
    RemoteBlobStorageProvider, RemoteQueueStorageProvider, RemoteTableStorageProvider,
};
use crate::infrastructure::serialization::JsonSerializer;

use super::providers::StorageProviders;

/// Backend a builder targets, fixed for the builder's lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// A remote storage account
    Account(StorageAccount),
    /// Process-local stores without persistence or retries
    InMemory,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Account(account) => write!(f, "account:{}", account.account_name()),
            StorageBackend::InMemory => write!(f, "in_memory"),
        }
    }
}

/// Composition root for storage providers
///
/// Setters mutate the builder in place and return it for chaining. Every
/// build call reads the configuration current at that moment, so providers
/// already built keep what they were built with.
///
/// ```no_run
/// use std::sync::Arc;
/// use cloud_storage::CloudStorage;
/// use cloud_storage::infrastructure::logging::TracingLog;
///
/// let providers = CloudStorage::for_in_memory_storage()
///     .with_log(Some(Arc::new(TracingLog::new())))
///     .build_all()?;
/// # Ok::<(), cloud_storage::domain::DomainError>(())
/// ```
#[derive(Clone)]
pub struct StorageBuilder {
    backend: StorageBackend,
    serializer: Arc<dyn DataSerializer>,
    log: Option<Arc<dyn Log>>,
    finalizer: Option<Arc<dyn RuntimeFinalizer>>,
}

impl fmt::Debug for StorageBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageBuilder")
            .field("backend", &self.backend)
            .field("serializer", &self.serializer.name())
            .field("log", &self.log.is_some())
            .field("finalizer", &self.finalizer.is_some())
            .finish()
    }
}

impl StorageBuilder {
    /// Creates a builder with the default JSON serializer, no log and no finalizer
    pub fn new(backend: StorageBackend) -> Self {
        Self {
            backend,
            serializer: Arc::new(JsonSerializer::new()),
            log: None,
            finalizer: None,
        }
    }

    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    pub fn serializer(&self) -> &Arc<dyn DataSerializer> {
        &self.serializer
    }

    pub fn log(&self) -> Option<&Arc<dyn Log>> {
        self.log.as_ref()
    }

    pub fn finalizer(&self) -> Option<&Arc<dyn RuntimeFinalizer>> {
        self.finalizer.as_ref()
    }

    /// Replaces the serializer used by providers built from now on
    pub fn with_serializer(&mut self, serializer: Arc<dyn DataSerializer>) -> &mut Self {
        self.serializer = serializer;
        self
    }

    /// Sets the log sink; `None` discards provider events
    pub fn with_log(&mut self, log: Option<Arc<dyn Log>>) -> &mut Self {
        self.log = log;
        self
    }

    /// Sets the runtime finalizer; `None` disables registration
    pub fn with_finalizer(&mut self, finalizer: Option<Arc<dyn RuntimeFinalizer>>) -> &mut Self {
        self.finalizer = finalizer;
        self
    }

    pub fn build_blob_provider(&self) -> Result<Arc<dyn BlobStorageProvider>, DomainError> {
        let provider: Arc<dyn BlobStorageProvider> = match &self.backend {
            StorageBackend::Account(account) => Arc::new(
                RemoteBlobStorageProvider::new(
                    account,
                    self.serializer.clone(),
                    RetryPolicy::for_storage_client(),
                    self.log.clone(),
                )
                .map_err(construction_error("blob"))?,
            ),
            StorageBackend::InMemory => {
                Arc::new(InMemoryBlobStorageProvider::new(self.serializer.clone()))
            }
        };

        debug!(backend = %self.backend, serializer = self.serializer.name(), "Built blob storage provider");
        Ok(provider)
    }

    pub fn build_table_provider(&self) -> Result<Arc<dyn TableStorageProvider>, DomainError> {
        let provider: Arc<dyn TableStorageProvider> = match &self.backend {
            StorageBackend::Account(account) => Arc::new(
                RemoteTableStorageProvider::new(
                    account,
                    self.serializer.clone(),
                    RetryPolicy::for_storage_client(),
                    self.log.clone(),
                )
                .map_err(construction_error("table"))?,
            ),
            StorageBackend::InMemory => {
                Arc::new(InMemoryTableStorageProvider::new(self.serializer.clone()))
            }
        };

        debug!(backend = %self.backend, serializer = self.serializer.name(), "Built table storage provider");
        Ok(provider)
    }

    /// Builds a queue provider over a blob provider of its own
    pub fn build_queue_provider(&self) -> Result<Arc<dyn QueueStorageProvider>, DomainError> {
        let blob = self.build_blob_provider()?;
        self.build_queue_provider_over(blob)
    }

    /// Builds blob, then queue over that blob provider, then table
    pub fn build_all(&self) -> Result<StorageProviders, DomainError> {
        let blob = self.build_blob_provider()?;
        let queue = self.build_queue_provider_over(blob.clone())?;
        let table = self.build_table_provider()?;

        Ok(StorageProviders::new(
            blob,
            queue,
            table,
            self.finalizer.clone(),
            self.log.clone(),
        ))
    }

    fn build_queue_provider_over(
        &self,
        blob: Arc<dyn BlobStorageProvider>,
    ) -> Result<Arc<dyn QueueStorageProvider>, DomainError> {
        let provider: Arc<dyn QueueStorageProvider> = match &self.backend {
            StorageBackend::Account(account) => {
                let queue = Arc::new(
                    RemoteQueueStorageProvider::new(
                        account,
                        blob,
                        self.serializer.clone(),
                        RetryPolicy::for_storage_client(),
                        self.log.clone(),
                    )
                    .map_err(construction_error("queue"))?,
                );
                self.register(&queue);
                queue
            }
            StorageBackend::InMemory => {
                let queue = Arc::new(InMemoryQueueStorageProvider::new(
                    blob,
                    self.serializer.clone(),
                    self.log.clone(),
                ));
                self.register(&queue);
                queue
            }
        };

        debug!(backend = %self.backend, serializer = self.serializer.name(), "Built queue storage provider");
        Ok(provider)
    }

    fn register<F: Finalizable + 'static>(&self, target: &Arc<F>) {
        if let Some(finalizer) = &self.finalizer {
            let weak: Weak<dyn Finalizable> = Arc::downgrade(target) as Weak<dyn Finalizable>;
            finalizer.register(weak);
        }
    }
}

fn construction_error(capability: &'static str) -> impl Fn(DomainError) -> DomainError {
    move |error| match error {
        DomainError::Construction { .. } => error,
        other => DomainError::construction(format!(
            "Failed to build {} storage provider: {}",
            capability, other
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BlobStorageProviderExt, CloudEntity, QueueStorageProviderExt, TableStorageProviderExt,
    };
    use crate::infrastructure::finalizer::ShutdownFinalizer;
    use crate::infrastructure::logging::MemoryLog;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Invoice {
        number: u32,
        customer: String,
        lines: Vec<String>,
    }

    fn invoice() -> Invoice {
        Invoice {
            number: 42,
            customer: "Ada".to_string(),
            lines: vec!["coffee".to_string(), "tea".to_string()],
        }
    }

    fn account_builder() -> StorageBuilder {
        StorageBuilder::new(StorageBackend::Account(
            StorageAccount::new("myaccount", "c2VjcmV0LWtleQ==").unwrap(),
        ))
    }

    #[test]
    fn test_remote_build_all_uses_storage_client_policy() {
        let providers = account_builder().build_all().unwrap();
        let expected = RetryPolicy::for_storage_client();

        assert_eq!(providers.blob_storage().retry_policy(), Some(&expected));
        assert_eq!(providers.queue_storage().retry_policy(), Some(&expected));
        assert_eq!(providers.table_storage().retry_policy(), Some(&expected));
        assert_eq!(expected.max_retries(), 10);
    }

    #[test]
    fn test_build_all_propagates_first_failure() {
        let account = StorageAccount::new("myaccount", "c2VjcmV0LWtleQ==")
            .unwrap()
            .with_table_endpoint("https://tables.example.com/?sv=2019")
            .unwrap();
        let finalizer = Arc::new(ShutdownFinalizer::new());
        let mut builder = StorageBuilder::new(StorageBackend::Account(account));
        builder.with_finalizer(Some(finalizer.clone()));

        assert!(builder.build_blob_provider().is_ok());
        let result = builder.build_all();

        match result {
            Err(DomainError::Construction { message }) => assert!(message.contains("table")),
            other => panic!("expected a construction error, got {:?}", other),
        }
        // The queue built before the failure is gone with the partial build.
        assert_eq!(finalizer.pending(), 0);
    }

    #[test]
    fn test_development_account_builds() {
        let providers = StorageBuilder::new(StorageBackend::Account(StorageAccount::development()))
            .build_all()
            .unwrap();

        assert!(providers.blob_storage().retry_policy().is_some());
    }

    #[test]
    fn test_in_memory_providers_have_no_retry_policy() {
        let providers = StorageBuilder::new(StorageBackend::InMemory).build_all().unwrap();

        assert!(providers.blob_storage().retry_policy().is_none());
        assert!(providers.queue_storage().retry_policy().is_none());
        assert!(providers.table_storage().retry_policy().is_none());
    }

    #[test]
    fn test_defaults_when_nothing_is_configured() {
        let providers = StorageBuilder::new(StorageBackend::InMemory).build_all().unwrap();

        assert!(providers.log().is_none());
        assert!(providers.runtime_finalizer().is_none());
        assert_eq!(providers.blob_storage().serializer().name(), "json");
        assert_eq!(providers.table_storage().serializer().name(), "json");
        assert_eq!(providers.queue_storage().serializer().name(), "json");
    }

    #[test]
    fn test_queue_uses_aggregate_blob_provider() {
        for builder in [StorageBuilder::new(StorageBackend::InMemory), account_builder()] {
            let providers = builder.build_all().unwrap();

            assert!(Arc::ptr_eq(
                providers.queue_storage().blob_storage(),
                providers.blob_storage()
            ));
        }
    }

    #[test]
    fn test_later_configuration_does_not_affect_built_providers() {
        let mut builder = StorageBuilder::new(StorageBackend::InMemory);

        let blob = builder
            .with_serializer(Arc::new(JsonSerializer::new()))
            .build_blob_provider()
            .unwrap();
        let table = builder
            .with_serializer(Arc::new(JsonSerializer::pretty()))
            .build_table_provider()
            .unwrap();

        assert_eq!(blob.serializer().name(), "json");
        assert_eq!(table.serializer().name(), "pretty_json");
    }

    #[tokio::test]
    async fn test_setting_serializer_twice_is_idempotent() {
        let serializer: Arc<dyn DataSerializer> = Arc::new(JsonSerializer::pretty());

        let mut once = StorageBuilder::new(StorageBackend::InMemory);
        once.with_serializer(serializer.clone());
        let mut twice = StorageBuilder::new(StorageBackend::InMemory);
        twice
            .with_serializer(serializer.clone())
            .with_serializer(serializer.clone());

        let a = once.build_blob_provider().unwrap();
        let b = twice.build_blob_provider().unwrap();
        a.put_value("docs", "x", &invoice()).await.unwrap();
        b.put_value("docs", "x", &invoice()).await.unwrap();

        assert_eq!(
            a.get_blob("docs", "x").await.unwrap(),
            b.get_blob("docs", "x").await.unwrap()
        );
        assert!(Arc::ptr_eq(a.serializer(), b.serializer()));
    }

    #[tokio::test]
    async fn test_in_memory_round_trip_through_all_providers() {
        let providers = StorageBuilder::new(StorageBackend::InMemory).build_all().unwrap();
        let value = invoice();

        let blob = providers.blob_storage();
        blob.put_value("invoices", "42", &value).await.unwrap();
        assert_eq!(blob.get_value::<Invoice>("invoices", "42").await.unwrap(), Some(value.clone()));

        let table = providers.table_storage();
        table
            .insert_values("invoices", &[CloudEntity::new("ada", "42", value.clone())])
            .await
            .unwrap();
        let entity = table
            .get_value::<Invoice>("invoices", "ada", "42")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entity.value, value);

        let queue = providers.queue_storage();
        queue.put_value("invoices", &value).await.unwrap();
        let message = queue
            .get("invoices", 1, Duration::from_secs(30))
            .await
            .unwrap()
            .remove(0);
        assert_eq!(queue.decode::<Invoice>(&message).unwrap(), value);
    }

    #[tokio::test]
    async fn test_each_build_all_gets_fresh_stores() {
        let builder = StorageBuilder::new(StorageBackend::InMemory);
        let first = builder.build_all().unwrap();
        let second = builder.build_all().unwrap();

        first.blob_storage().put_value("docs", "a", &1u32).await.unwrap();

        assert!(second.blob_storage().get_blob("docs", "a").await.unwrap().is_none());
        assert!(!Arc::ptr_eq(first.blob_storage(), second.blob_storage()));
    }

    #[test]
    fn test_log_and_finalizer_reach_aggregate() {
        let log: Arc<dyn Log> = Arc::new(MemoryLog::new());
        let finalizer = Arc::new(ShutdownFinalizer::new());

        let mut builder = StorageBuilder::new(StorageBackend::InMemory);
        builder
            .with_log(Some(log.clone()))
            .with_finalizer(Some(finalizer.clone()));
        let providers = builder.build_all().unwrap();

        assert!(Arc::ptr_eq(providers.log().unwrap(), &log));
        assert!(providers.runtime_finalizer().is_some());
        assert_eq!(finalizer.pending(), 1);
    }

    #[test]
    fn test_clearing_finalizer_stops_registration() {
        let finalizer = Arc::new(ShutdownFinalizer::new());
        let mut builder = StorageBuilder::new(StorageBackend::InMemory);

        builder.with_finalizer(Some(finalizer.clone()));
        let _kept = builder.build_queue_provider().unwrap();
        builder.with_finalizer(None);
        let _unregistered = builder.build_queue_provider().unwrap();

        assert_eq!(finalizer.pending(), 1);
    }

    #[tokio::test]
    async fn test_finalizer_returns_in_flight_messages() {
        let finalizer = Arc::new(ShutdownFinalizer::new());
        let mut builder = StorageBuilder::new(StorageBackend::InMemory);
        builder.with_finalizer(Some(finalizer.clone()));
        let providers = builder.build_all().unwrap();

        let queue = providers.queue_storage();
        queue.put_value("jobs", &"work").await.unwrap();
        let leased = queue.get("jobs", 1, Duration::from_secs(300)).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert!(queue.get("jobs", 1, Duration::from_secs(300)).await.unwrap().is_empty());

        providers.runtime_finalizer().unwrap().finalize_all().await;

        assert_eq!(queue.get("jobs", 1, Duration::from_secs(300)).await.unwrap().len(), 1);
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(StorageBackend::InMemory.to_string(), "in_memory");
        assert_eq!(
            account_builder().backend().to_string(),
            "account:myaccount"
        );
    }
}
