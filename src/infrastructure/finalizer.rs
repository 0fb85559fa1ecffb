//! Runtime finalizer invoked at orderly shutdown

use std::sync::{Mutex, Weak};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::finalizer::{Finalizable, RuntimeFinalizer};

/// Finalizer keeping weak registrations until `finalize_all` drains them
#[derive(Default)]
pub struct ShutdownFinalizer {
    registrations: Mutex<Vec<Weak<dyn Finalizable>>>,
}

impl std::fmt::Debug for ShutdownFinalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownFinalizer")
            .field("registrations", &self.pending())
            .finish()
    }
}

impl ShutdownFinalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registrations whose target is still alive
    pub fn pending(&self) -> usize {
        self.registrations
            .lock()
            .map(|registrations| {
                registrations
                    .iter()
                    .filter(|weak| weak.strong_count() > 0)
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl RuntimeFinalizer for ShutdownFinalizer {
    fn register(&self, finalizable: Weak<dyn Finalizable>) {
        if let Ok(mut registrations) = self.registrations.lock() {
            registrations.retain(|weak| weak.strong_count() > 0);
            registrations.push(finalizable);
        }
    }

    async fn finalize_all(&self) {
        let drained = match self.registrations.lock() {
            Ok(mut registrations) => std::mem::take(&mut *registrations),
            Err(_) => return,
        };

        let live: Vec<_> = drained.iter().rev().filter_map(Weak::upgrade).collect();
        debug!(count = live.len(), "Finalizing registered resources");

        for finalizable in live {
            finalizable.finalize().await;
        }
    }
}
