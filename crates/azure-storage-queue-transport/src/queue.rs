//! Queue client adapter over a visibility-timeout backend.
//!
//! The backend hands out batches of leased messages; the host runtime wants
//! them one at a time with explicit acknowledge/release. This adapter bridges
//! the two models: it buffers a prefetched batch locally, tracks one lease
//! token per outstanding delivery, and releases everything still leased when
//! the adapter is closed, so no fetched message is ever lost to a shutdown.

use crate::address::QueueAddress;
use crate::backend::{BackendError, MessageTtl, QueueBackend, RawMessage};
use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::events::QueueEvents;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

/// Correlates one delivery with the backend identifiers needed to resolve it.
///
/// The pop receipt is backend-issued and single-use, so two tokens are never
/// logically equal: a redelivery of the same message id carries a fresh
/// receipt and supersedes the old token.
#[derive(Debug, Clone)]
pub struct LeaseToken {
    message_id: String,
    message_text: String,
    pop_receipt: String,
}

impl LeaseToken {
    fn new(raw: RawMessage) -> Self {
        Self {
            message_id: raw.message_id,
            message_text: raw.message_text,
            pop_receipt: raw.pop_receipt,
        }
    }

    /// Backend message id for this delivery
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Pop receipt issued for this delivery
    pub fn pop_receipt(&self) -> &str {
        &self.pop_receipt
    }
}

/// A message handed to the caller, payload decoded, lease attached
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    payload: Bytes,
    token: LeaseToken,
}

impl ReceivedMessage {
    /// Decoded message payload
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Lease token to pass back to acknowledge or release
    pub fn token(&self) -> &LeaseToken {
        &self.token
    }

    /// Split into payload and lease token
    pub fn into_parts(self) -> (Bytes, LeaseToken) {
        (self.payload, self.token)
    }
}

/// Buffer and registry state guarded by the adapter's operation lock
#[derive(Default)]
struct QueueState {
    /// Messages fetched from the backend but not yet handed to a caller,
    /// in backend fetch order
    received: VecDeque<ReceivedMessage>,
    /// Outstanding lease per message id: everything fetched but neither
    /// acknowledged nor released
    leases: HashMap<String, LeaseToken>,
}

/// Queue adapter bound to one backend queue.
///
/// All operations serialize on a single per-adapter lock, making each one
/// atomic with respect to every other operation on the same adapter. The
/// cancellation token supplied at construction short-circuits every operation
/// once signalled; a cancelled operation reports "nothing done" rather than
/// an error, so pollers treat it like an empty queue.
///
/// # Example
///
/// ```rust
/// use azure_storage_queue_transport::{
///     AzureStorageQueue, ConnectionConfig, InMemoryBackend, QueueAddress,
/// };
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # tokio_test::block_on(async {
/// let address = QueueAddress::parse("azuresq://azure/work-queue").unwrap();
/// let config = Arc::new(ConnectionConfig::with_connection_string(
///     "azure",
///     "AccountName=devaccount;AccountKey=ZGV2a2V5",
/// ));
/// let queue = AzureStorageQueue::new(
///     address,
///     config,
///     Arc::new(InMemoryBackend::new()),
///     CancellationToken::new(),
/// );
///
/// queue.enqueue(b"job payload").await.unwrap();
///
/// let message = queue.get_message().await.unwrap().unwrap();
/// assert_eq!(message.payload().as_ref(), b"job payload");
///
/// queue.acknowledge(message.token()).await.unwrap();
/// # });
/// ```
pub struct AzureStorageQueue {
    address: QueueAddress,
    config: Arc<ConnectionConfig>,
    backend: Arc<dyn QueueBackend>,
    cancellation: CancellationToken,
    subscribers: Vec<Arc<dyn QueueEvents>>,
    state: Mutex<QueueState>,
}

impl AzureStorageQueue {
    /// Create an adapter over the given backend queue
    pub fn new(
        address: QueueAddress,
        config: Arc<ConnectionConfig>,
        backend: Arc<dyn QueueBackend>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            address,
            config,
            backend,
            cancellation,
            subscribers: Vec::new(),
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Register an event subscriber. Must happen before the adapter is shared.
    pub fn subscribe(&mut self, events: Arc<dyn QueueEvents>) {
        self.subscribers.push(events);
    }

    /// Address this adapter was created from
    pub fn address(&self) -> &QueueAddress {
        &self.address
    }

    /// Whether the adapter's cancellation token has been signalled
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    fn effective_max_messages(&self) -> u32 {
        self.address
            .max_messages()
            .unwrap_or_else(|| self.config.effective_max_messages())
    }

    fn notify(&self, notify: impl Fn(&dyn QueueEvents)) {
        for subscriber in &self.subscribers {
            notify(subscriber.as_ref());
        }
    }

    /// Race a backend call against the adapter's cancellation token.
    ///
    /// `None` means the operation was unblocked by cancellation and must
    /// complete with its neutral result.
    async fn cancellable<T>(
        &self,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Option<Result<T, BackendError>> {
        tokio::select! {
            _ = self.cancellation.cancelled() => None,
            result = call => Some(result),
        }
    }

    /// Encode and submit one payload as a single backend message.
    ///
    /// The message is stored with infinite time-to-live; expiry is owned by
    /// the host pipeline, not the backend. An error means nothing was
    /// enqueued.
    pub async fn enqueue(&self, payload: &[u8]) -> Result<(), TransportError> {
        if self.cancellation.is_cancelled() {
            return Ok(());
        }

        let _guard = self.state.lock().await;

        self.notify(|events| events.operation_starting(self.address.queue_name(), "enqueue"));

        let encoded = STANDARD.encode(payload);

        let Some(result) = self
            .cancellable(self.backend.send_message(&encoded, MessageTtl::Infinite))
            .await
        else {
            return Ok(());
        };

        result.map_err(|err| err.into_transport("send_message"))?;

        debug!(queue = %self.address.queue_name(), bytes = payload.len(), "message enqueued");

        self.notify(|events| {
            events.message_enqueued(self.address.queue_name());
            events.operation_completed(self.address.queue_name(), "enqueue");
        });

        Ok(())
    }

    /// Return the next available message, or `None` when the queue has none.
    ///
    /// Drains the local buffer first; only when the buffer is empty does it
    /// issue one backend batch receive, registering a lease for every fetched
    /// message. Concurrent callers are serialized, so a buffered message goes
    /// to exactly one caller.
    pub async fn get_message(&self) -> Result<Option<ReceivedMessage>, TransportError> {
        if self.cancellation.is_cancelled() {
            return Ok(None);
        }

        let mut state = self.state.lock().await;

        self.notify(|events| events.operation_starting(self.address.queue_name(), "get_message"));

        if state.received.is_empty() {
            let Some(result) = self
                .cancellable(self.backend.receive_messages(
                    self.effective_max_messages(),
                    self.config.effective_visibility_timeout(),
                ))
                .await
            else {
                return Ok(None);
            };

            let batch = result.map_err(|err| err.into_transport("receive_messages"))?;

            // Decode every payload before touching the registry so a bad body
            // leaves no partial state behind.
            let mut decoded = Vec::with_capacity(batch.len());

            for raw in batch {
                let payload = STANDARD.decode(raw.message_text.as_bytes()).map_err(|err| {
                    TransportError::MalformedPayload {
                        message_id: raw.message_id.clone(),
                        message: err.to_string(),
                    }
                })?;

                decoded.push((Bytes::from(payload), raw));
            }

            for (payload, raw) in decoded {
                let token = LeaseToken::new(raw);

                if state
                    .leases
                    .insert(token.message_id.clone(), token.clone())
                    .is_some()
                {
                    // The backend redelivered while the old lease was still
                    // registered; the stale pop receipt must never be used
                    // again.
                    warn!(
                        queue = %self.address.queue_name(),
                        message_id = %token.message_id,
                        "replacing stale lease after redelivery"
                    );
                }

                state.received.push_back(ReceivedMessage { payload, token });
            }
        }

        let message = state.received.pop_front();

        if let Some(message) = &message {
            debug!(
                queue = %self.address.queue_name(),
                message_id = %message.token.message_id,
                "message handed to caller"
            );

            self.notify(|events| {
                events.message_received(self.address.queue_name(), message.token.message_id());
                events.operation_completed(self.address.queue_name(), "get_message");
            });
        }

        Ok(message)
    }

    /// Commit one delivery: forget its lease and delete it from the backend.
    ///
    /// A token that is unknown to this adapter, or whose pop receipt was
    /// superseded by a redelivery, is silently ignored. A backend delete that
    /// reports the message as already gone is treated as success, because a
    /// concurrent redelivery may have resolved it first.
    pub async fn acknowledge(&self, token: &LeaseToken) -> Result<(), TransportError> {
        if self.cancellation.is_cancelled() {
            return Ok(());
        }

        let mut state = self.state.lock().await;

        self.notify(|events| events.operation_starting(self.address.queue_name(), "acknowledge"));

        let registered = match state.leases.get(token.message_id()) {
            Some(entry) if entry.pop_receipt == token.pop_receipt => entry.clone(),
            _ => return Ok(()),
        };

        state.leases.remove(token.message_id());

        let Some(result) = self
            .cancellable(
                self.backend
                    .delete_message(&registered.message_id, &registered.pop_receipt),
            )
            .await
        else {
            return Ok(());
        };

        match result {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into_transport("delete_message")),
        }

        debug!(
            queue = %self.address.queue_name(),
            message_id = %registered.message_id,
            "message acknowledged"
        );

        self.notify(|events| {
            events.message_acknowledged(self.address.queue_name(), registered.message_id());
            events.operation_completed(self.address.queue_name(), "acknowledge");
        });

        Ok(())
    }

    /// Abort one delivery and hand the message back to the backend.
    ///
    /// The original body is re-submitted before the leased copy is deleted.
    /// A crash between the two calls duplicates the message instead of losing
    /// it, which is the at-least-once guarantee this transport makes. Stale
    /// and unknown tokens are ignored the same way `acknowledge` ignores
    /// them.
    pub async fn release(&self, token: &LeaseToken) -> Result<(), TransportError> {
        if self.cancellation.is_cancelled() {
            return Ok(());
        }

        let mut state = self.state.lock().await;

        self.notify(|events| events.operation_starting(self.address.queue_name(), "release"));

        let registered = match state.leases.get(token.message_id()) {
            Some(entry) if entry.pop_receipt == token.pop_receipt => entry.clone(),
            _ => return Ok(()),
        };

        let Some(result) = self
            .cancellable(
                self.backend
                    .send_message(&registered.message_text, MessageTtl::Default),
            )
            .await
        else {
            return Ok(());
        };

        // A failed re-send keeps the lease registered: the original copy is
        // still in the backend and becomes visible again when the lease
        // expires.
        result.map_err(|err| err.into_transport("send_message"))?;

        if let Some(result) = self
            .cancellable(
                self.backend
                    .delete_message(&registered.message_id, &registered.pop_receipt),
            )
            .await
        {
            match result {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into_transport("delete_message")),
            }
        }

        state.leases.remove(token.message_id());

        debug!(
            queue = %self.address.queue_name(),
            message_id = %registered.message_id,
            "message released back to queue"
        );

        self.notify(|events| {
            events.message_released(self.address.queue_name(), registered.message_id());
            events.operation_completed(self.address.queue_name(), "release");
        });

        Ok(())
    }

    /// Check whether the backend reports an approximate message count of zero.
    ///
    /// Approximate by nature; usable as a polling signal only. A cancelled
    /// adapter reports empty so pollers stop asking.
    pub async fn is_empty(&self) -> Result<bool, TransportError> {
        if self.cancellation.is_cancelled() {
            return Ok(true);
        }

        let _guard = self.state.lock().await;

        self.notify(|events| events.operation_starting(self.address.queue_name(), "is_empty"));

        let Some(result) = self
            .cancellable(self.backend.approximate_message_count())
            .await
        else {
            return Ok(true);
        };

        let count = result.map_err(|err| err.into_transport("approximate_message_count"))?;

        self.notify(|events| events.operation_completed(self.address.queue_name(), "is_empty"));

        Ok(count == 0)
    }

    /// Create the backend queue when it does not exist yet
    pub async fn create(&self) -> Result<(), TransportError> {
        self.admin("create_if_not_exists", self.backend.create_if_not_exists())
            .await
    }

    /// Delete the backend queue when it exists
    pub async fn drop_queue(&self) -> Result<(), TransportError> {
        self.admin("delete_if_exists", self.backend.delete_if_exists())
            .await
    }

    /// Remove every message from the backend queue
    pub async fn purge(&self) -> Result<(), TransportError> {
        self.admin("clear_messages", self.backend.clear_messages())
            .await
    }

    async fn admin(
        &self,
        operation: &str,
        call: impl Future<Output = Result<(), BackendError>>,
    ) -> Result<(), TransportError> {
        if self.cancellation.is_cancelled() {
            return Ok(());
        }

        let _guard = self.state.lock().await;

        self.notify(|events| events.operation_starting(self.address.queue_name(), operation));

        let Some(result) = self.cancellable(call).await else {
            return Ok(());
        };

        result.map_err(|err| err.into_transport(operation))?;

        self.notify(|events| events.operation_completed(self.address.queue_name(), operation));

        Ok(())
    }

    /// Release every outstanding lease and clear the adapter's state.
    ///
    /// Every registered lease goes through the same re-send-then-delete
    /// sequence as [`release`](Self::release), so a message fetched but never
    /// acknowledged survives adapter teardown, possibly duplicated. This
    /// deliberately ignores the cancellation token: teardown must still reach
    /// the backend during shutdown.
    pub async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;

        self.notify(|events| events.operation_starting(self.address.queue_name(), "close"));

        let message_ids: Vec<String> = state.leases.keys().cloned().collect();

        if !message_ids.is_empty() {
            warn!(
                queue = %self.address.queue_name(),
                outstanding = message_ids.len(),
                "releasing unresolved leases on close"
            );
        }

        for message_id in message_ids {
            let Some(token) = state.leases.get(&message_id).cloned() else {
                continue;
            };

            self.backend
                .send_message(&token.message_text, MessageTtl::Default)
                .await
                .map_err(|err| err.into_transport("send_message"))?;

            match self
                .backend
                .delete_message(&token.message_id, &token.pop_receipt)
                .await
            {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into_transport("delete_message")),
            }

            state.leases.remove(&message_id);

            self.notify(|events| {
                events.message_released(self.address.queue_name(), &message_id);
            });
        }

        state.received.clear();

        self.notify(|events| events.operation_completed(self.address.queue_name(), "close"));

        Ok(())
    }
}

impl std::fmt::Debug for AzureStorageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureStorageQueue")
            .field("address", &self.address)
            .field("config", &self.config.name())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
