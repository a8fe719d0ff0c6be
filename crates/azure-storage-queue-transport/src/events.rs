//! Observability hooks invoked by the queue adapter.

/// Subscriber notified after successful adapter transitions.
///
/// All methods default to no-ops; registering no subscriber changes nothing
/// about adapter behavior. Callbacks run while the adapter holds its
/// operation lock, so implementations must be fast and non-blocking.
pub trait QueueEvents: Send + Sync {
    fn operation_starting(&self, _queue_name: &str, _operation: &str) {}

    fn operation_completed(&self, _queue_name: &str, _operation: &str) {}

    fn message_enqueued(&self, _queue_name: &str) {}

    fn message_received(&self, _queue_name: &str, _message_id: &str) {}

    fn message_acknowledged(&self, _queue_name: &str, _message_id: &str) {}

    fn message_released(&self, _queue_name: &str, _message_id: &str) {}
}
