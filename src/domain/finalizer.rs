//! Runtime finalization hooks

use std::fmt::Debug;
use std::sync::Weak;

use async_trait::async_trait;

/// Something holding resources that must be released at shutdown
#[async_trait]
pub trait Finalizable: Send + Sync {
    async fn finalize(&self);
}

/// Hook invoked during orderly process shutdown
///
/// Registrations are weak: a provider dropped before shutdown is simply skipped.
#[async_trait]
pub trait RuntimeFinalizer: Send + Sync + Debug {
    /// Registers a finalizable resource
    fn register(&self, finalizable: Weak<dyn Finalizable>);

    /// Finalizes every live registration
    async fn finalize_all(&self);
}
