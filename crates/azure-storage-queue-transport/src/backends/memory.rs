//! In-memory queue backend for testing and development.
//!
//! Implements the full backend contract against process-local state:
//! visibility-timeout leasing, per-delivery pop receipts, and stale-receipt
//! rejection. Deterministic knobs (`expire_leases`, `fail_next_delete`,
//! call counters) exist so lifecycle tests can drive redelivery and
//! mid-operation failure without waiting on wall-clock timeouts.

use crate::backend::{BackendError, MessageTtl, QueueBackend, RawMessage};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const DEFAULT_VISIBILITY: i64 = 30;

/// A message held by the in-memory queue
#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    message_text: String,
    /// Pop receipt of the current lease; regenerated on every delivery
    pop_receipt: Option<String>,
    visible_at: DateTime<Utc>,
}

impl StoredMessage {
    fn new(message_text: &str) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            message_text: message_text.to_string(),
            pop_receipt: None,
            visible_at: Utc::now(),
        }
    }

    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        now >= self.visible_at
    }
}

/// Single-queue state behind the backend's lock
#[derive(Debug)]
struct QueueState {
    exists: bool,
    messages: VecDeque<StoredMessage>,
}

/// In-memory implementation of [`QueueBackend`], bound to one queue
pub struct InMemoryBackend {
    state: Mutex<QueueState>,
    receive_calls: AtomicUsize,
    fail_next_delete: AtomicBool,
}

impl InMemoryBackend {
    /// Create a backend whose queue already exists
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                exists: true,
                messages: VecDeque::new(),
            }),
            receive_calls: AtomicUsize::new(0),
            fail_next_delete: AtomicBool::new(false),
        }
    }

    /// Number of batch receives issued so far
    pub fn receive_call_count(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }

    /// Make the next `delete_message` fail with a service error
    pub fn fail_next_delete(&self) {
        self.fail_next_delete.store(true, Ordering::SeqCst);
    }

    /// Make every outstanding lease lapse immediately, as a visibility
    /// timeout expiry would
    pub fn expire_leases(&self) {
        let mut state = self.state.lock().expect("backend state poisoned");
        let now = Utc::now();

        for message in state.messages.iter_mut() {
            message.visible_at = now;
        }
    }

    /// Wire-level texts of every stored message, in queue order
    pub fn message_texts(&self) -> Vec<String> {
        let state = self.state.lock().expect("backend state poisoned");

        state
            .messages
            .iter()
            .map(|message| message.message_text.clone())
            .collect()
    }

    fn ensure_exists(state: &QueueState) -> Result<(), BackendError> {
        if state.exists {
            Ok(())
        } else {
            Err(BackendError::QueueNotFound {
                queue_name: "in-memory".to_string(),
            })
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for InMemoryBackend {
    async fn create_if_not_exists(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock().expect("backend state poisoned");
        state.exists = true;
        Ok(())
    }

    async fn delete_if_exists(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock().expect("backend state poisoned");
        state.exists = false;
        state.messages.clear();
        Ok(())
    }

    async fn clear_messages(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock().expect("backend state poisoned");
        Self::ensure_exists(&state)?;
        state.messages.clear();
        Ok(())
    }

    async fn approximate_message_count(&self) -> Result<u64, BackendError> {
        let state = self.state.lock().expect("backend state poisoned");
        Self::ensure_exists(&state)?;
        Ok(state.messages.len() as u64)
    }

    async fn send_message(
        &self,
        message_text: &str,
        _time_to_live: MessageTtl,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().expect("backend state poisoned");
        Self::ensure_exists(&state)?;
        state.messages.push_back(StoredMessage::new(message_text));
        Ok(())
    }

    async fn receive_messages(
        &self,
        max_messages: u32,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<RawMessage>, BackendError> {
        let mut state = self.state.lock().expect("backend state poisoned");
        Self::ensure_exists(&state)?;

        self.receive_calls.fetch_add(1, Ordering::SeqCst);

        let now = Utc::now();
        let visibility = visibility_timeout.unwrap_or_else(|| Duration::seconds(DEFAULT_VISIBILITY));

        let mut batch = Vec::new();

        for message in state.messages.iter_mut() {
            if batch.len() as u32 >= max_messages {
                break;
            }

            if !message.is_visible(now) {
                continue;
            }

            let pop_receipt = uuid::Uuid::new_v4().to_string();
            message.pop_receipt = Some(pop_receipt.clone());
            message.visible_at = now + visibility;

            batch.push(RawMessage {
                message_id: message.message_id.clone(),
                message_text: message.message_text.clone(),
                pop_receipt,
            });
        }

        Ok(batch)
    }

    async fn delete_message(
        &self,
        message_id: &str,
        pop_receipt: &str,
    ) -> Result<(), BackendError> {
        if self.fail_next_delete.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Service {
                status: 500,
                code: "InternalError".to_string(),
                message: "injected delete failure".to_string(),
            });
        }

        let mut state = self.state.lock().expect("backend state poisoned");
        Self::ensure_exists(&state)?;

        let position = state.messages.iter().position(|message| {
            message.message_id == message_id
                && message.pop_receipt.as_deref() == Some(pop_receipt)
        });

        match position {
            Some(index) => {
                state.messages.remove(index);
                Ok(())
            }
            None => Err(BackendError::MessageNotFound {
                message_id: message_id.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("receive_calls", &self.receive_call_count())
            .finish()
    }
}
