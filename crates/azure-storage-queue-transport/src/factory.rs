//! Factory assembling queue adapters from transport URIs.

use crate::address::{self, QueueAddress};
use crate::backends::AzureStorageQueueBackend;
use crate::config::{BackendOptions, ConfigRegistry};
use crate::error::TransportError;
use crate::queue::AzureStorageQueue;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;

/// Creates [`AzureStorageQueue`] adapters for `azuresq://` addresses.
///
/// One factory serves a host process: it holds the configuration registry and
/// the process-lifetime cancellation token, and hands each adapter a child
/// token so signalling shutdown quiesces every queue at once. Address and
/// configuration errors surface here, at construction, because they indicate
/// misconfiguration rather than transient state.
///
/// # Example
///
/// ```rust
/// use azure_storage_queue_transport::{
///     AzureStorageQueueFactory, ConfigRegistry, ConnectionConfig,
/// };
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # tokio_test::block_on(async {
/// let mut registry = ConfigRegistry::new();
/// registry
///     .register(ConnectionConfig::with_connection_string(
///         "azure",
///         "AccountName=devaccount;AccountKey=ZGV2a2V5",
///     ))
///     .unwrap();
///
/// let factory = AzureStorageQueueFactory::new(Arc::new(registry), CancellationToken::new());
/// let queue = factory
///     .create("azuresq://azure/work-queue?maxMessages=8")
///     .unwrap();
///
/// assert_eq!(queue.address().queue_name(), "work-queue");
/// # });
/// ```
pub struct AzureStorageQueueFactory {
    registry: Arc<ConfigRegistry>,
    cancellation: CancellationToken,
}

impl AzureStorageQueueFactory {
    /// Create a factory over the given registry and shutdown token
    pub fn new(registry: Arc<ConfigRegistry>, cancellation: CancellationToken) -> Self {
        Self {
            registry,
            cancellation,
        }
    }

    /// URI scheme this factory serves
    pub fn scheme(&self) -> &'static str {
        address::SCHEME
    }

    /// Resolve a transport URI into a ready-to-use queue adapter
    pub fn create(&self, uri: &str) -> Result<AzureStorageQueue, TransportError> {
        let address = QueueAddress::parse(uri)?;
        let config = self.registry.get(address.configuration_name())?;

        let mut options = BackendOptions::default();
        config.apply_configure(&mut options);

        let backend =
            AzureStorageQueueBackend::from_config(&config, address.queue_name(), &options)?;

        Ok(AzureStorageQueue::new(
            address,
            config,
            Arc::new(backend),
            self.cancellation.child_token(),
        ))
    }
}

impl std::fmt::Debug for AzureStorageQueueFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureStorageQueueFactory")
            .field("scheme", &self.scheme())
            .field("configurations", &self.registry.len())
            .finish()
    }
}
