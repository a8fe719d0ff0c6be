//! # Azure Storage Queue Transport
//!
//! Queue transport adapter exposing a uniform queue contract (enqueue,
//! fetch-one, acknowledge, release, purge, create/drop, empty-check) over
//! Azure Storage Queues, whose native model is batch fetch with a
//! visibility-timeout lease.
//!
//! The adapter buffers prefetched batches locally, correlates backend pop
//! receipts with the messages handed to callers one at a time, and releases
//! every unresolved lease on teardown, giving at-least-once delivery with
//! caller-driven acknowledgment.
//!
//! ## Module Organization
//!
//! - [`address`] - Transport URI parsing
//! - [`config`] - Named connection configurations and their registry
//! - [`backend`] - Backend capability boundary
//! - [`backends`] - Azure REST and in-memory backend implementations
//! - [`queue`] - The queue adapter itself
//! - [`events`] - Observability hooks
//! - [`factory`] - Adapter construction from transport URIs
//! - [`error`] - Error taxonomy

// Module declarations
pub mod address;
pub mod backend;
pub mod backends;
pub mod config;
pub mod error;
pub mod events;
pub mod factory;
pub mod queue;

// Re-export commonly used types at crate root for convenience
pub use address::{QueueAddress, SCHEME};
pub use backend::{BackendError, MessageTtl, QueueBackend, RawMessage};
pub use backends::{AzureStorageQueueBackend, InMemoryBackend};
pub use config::{BackendOptions, ConfigRegistry, ConnectionConfig};
pub use error::{ConfigurationError, TransportError};
pub use events::QueueEvents;
pub use factory::AzureStorageQueueFactory;
pub use queue::{AzureStorageQueue, LeaseToken, ReceivedMessage};
