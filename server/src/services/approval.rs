//! Join approval gateway.
//!
//! DESIGN
//! ======
//! A joining session asks [`JoinApprovalGateway::decide`] for a yes/no answer.
//! The gateway files a pending request keyed by a fresh id, publishes a
//! [`JoinPrompt`] to whoever drives the approval UI, and waits on a oneshot
//! for [`JoinApprovalGateway::resolve`]. Each request gets exactly one answer:
//! the UI's, or `false` on timeout. Requests never share a lock across an
//! await, so concurrent decisions do not block each other.
//!
//! With no approval UI attached (prompt receiver dropped) or with its queue
//! full, requests are denied immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prompts buffered for the approval UI before new requests are denied.
const PROMPT_QUEUE_CAPACITY: usize = 64;

/// One pending join request as shown to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPrompt {
    pub id: Uuid,
    pub username: String,
}

/// Receiving end of the prompt queue, owned by the approval UI.
pub type JoinPrompts = mpsc::Receiver<JoinPrompt>;

#[derive(Clone)]
pub struct JoinApprovalGateway {
    inner: Arc<Inner>,
}

struct Inner {
    pending: Mutex<HashMap<Uuid, oneshot::Sender<bool>>>,
    prompts: mpsc::Sender<JoinPrompt>,
    timeout: Duration,
}

impl JoinApprovalGateway {
    #[must_use]
    pub fn new(timeout: Duration) -> (Self, JoinPrompts) {
        let (prompts, rx) = mpsc::channel(PROMPT_QUEUE_CAPACITY);
        let inner = Inner { pending: Mutex::new(HashMap::new()), prompts, timeout };
        (Self { inner: Arc::new(inner) }, rx)
    }

    /// Ask the manager whether `username` may join. Resolves to the manager's
    /// answer, or `false` when no answer arrives in time.
    pub async fn decide(&self, username: &str) -> bool {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id, tx);
        let _guard = PendingGuard { gateway: self, id };

        let prompt = JoinPrompt { id, username: username.to_owned() };
        if let Err(e) = self.inner.prompts.try_send(prompt) {
            warn!(%username, error = %e, "approval: no approver available; denying");
            return false;
        }
        info!(%username, request_id = %id, pending = self.pending_count(), "approval: awaiting manager decision");

        match tokio::time::timeout(self.inner.timeout, rx).await {
            Ok(Ok(approved)) => {
                info!(%username, approved, "approval: decided");
                approved
            }
            Ok(Err(_)) => false,
            Err(_) => {
                info!(%username, timeout = ?self.inner.timeout, "approval: timed out; denying");
                false
            }
        }
    }

    /// Deliver the manager's answer. Returns `false` for unknown, expired,
    /// or already answered requests.
    pub fn resolve(&self, id: Uuid, approved: bool) -> bool {
        let Some(tx) = self.lock_pending().remove(&id) else {
            debug!(request_id = %id, "approval: resolve for unknown request");
            return false;
        };
        tx.send(approved).is_ok()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<Uuid, oneshot::Sender<bool>>> {
        self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a request from the pending map however `decide` exits,
/// including when the awaiting session is dropped mid-wait.
struct PendingGuard<'a> {
    gateway: &'a JoinApprovalGateway,
    id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.gateway.lock_pending().remove(&self.id);
    }
}

#[cfg(test)]
#[path = "approval_test.rs"]
mod tests;
