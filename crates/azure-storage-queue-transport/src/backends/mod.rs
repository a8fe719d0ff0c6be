//! Backend implementations of the queue capability boundary.

pub mod azure;
pub mod memory;

pub use azure::AzureStorageQueueBackend;
pub use memory::InMemoryBackend;
