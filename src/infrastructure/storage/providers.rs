//! Aggregate of built storage providers

use std::sync::Arc;

use crate::domain::{
    BlobStorageProvider, Log, QueueStorageProvider, RuntimeFinalizer, TableStorageProvider,
};

/// The three providers of one build plus the shared log and finalizer
///
/// Cloning shares the same providers.
#[derive(Debug, Clone)]
pub struct StorageProviders {
    blob: Arc<dyn BlobStorageProvider>,
    queue: Arc<dyn QueueStorageProvider>,
    table: Arc<dyn TableStorageProvider>,
    finalizer: Option<Arc<dyn RuntimeFinalizer>>,
    log: Option<Arc<dyn Log>>,
}

impl StorageProviders {
    pub(crate) fn new(
        blob: Arc<dyn BlobStorageProvider>,
        queue: Arc<dyn QueueStorageProvider>,
        table: Arc<dyn TableStorageProvider>,
        finalizer: Option<Arc<dyn RuntimeFinalizer>>,
        log: Option<Arc<dyn Log>>,
    ) -> Self {
        Self {
            blob,
            queue,
            table,
            finalizer,
            log,
        }
    }

    pub fn blob_storage(&self) -> &Arc<dyn BlobStorageProvider> {
        &self.blob
    }

    pub fn queue_storage(&self) -> &Arc<dyn QueueStorageProvider> {
        &self.queue
    }

    pub fn table_storage(&self) -> &Arc<dyn TableStorageProvider> {
        &self.table
    }

    pub fn runtime_finalizer(&self) -> Option<&Arc<dyn RuntimeFinalizer>> {
        self.finalizer.as_ref()
    }

    pub fn log(&self) -> Option<&Arc<dyn Log>> {
        self.log.as_ref()
    }
}
