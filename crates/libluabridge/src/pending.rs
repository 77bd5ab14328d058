//! Request/response correlation.
//!
//! Each outgoing request parks a resolver keyed by its nonce; the dispatcher
//! settles it when the matching response arrives. Entries never outlive one
//! round trip except while in flight. Once the map is closed no further
//! registrations are accepted: a registration racing channel shutdown must
//! fail rather than insert an entry `abort_all` can no longer sweep.

use std::collections::HashMap;
use std::sync::Mutex;

use luabridge_proto::Mask;
use tokio::sync::oneshot;

use crate::nonce;

/// Raw outcome of a round trip, still in wire form.
pub(crate) struct Completion {
    pub success: bool,
    pub values: Vec<serde_json::Value>,
    pub mask: Vec<Mask>,
}

struct Inner {
    entries: HashMap<String, oneshot::Sender<Completion>>,
    closed: bool,
}

pub(crate) struct PendingRequests {
    inner: Mutex<Inner>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Allocates a fresh correlation id and parks a resolver under it, or
    /// returns `None` once the map is closed.
    /// The entry must exist before the request is transmitted: the response
    /// can, in principle, race the send.
    pub fn register(&self) -> Option<(String, oneshot::Receiver<Completion>)> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return None;
        }
        let id = nonce::allocate(&inner.entries);
        inner.entries.insert(id.clone(), tx);
        Some((id, rx))
    }

    /// Drops the entry for a request that needs no response leg.
    pub fn forget(&self, id: &str) {
        self.inner.lock().unwrap().entries.remove(id);
    }

    /// Settles and removes the pending entry. Returns false when the id is
    /// unknown; a second completion for the same id is therefore a no-op.
    pub fn complete(&self, id: &str, completion: Completion) -> bool {
        let Some(tx) = self.inner.lock().unwrap().entries.remove(id) else {
            return false;
        };
        // The waiter may have gone away; that is not an error.
        let _ = tx.send(completion);
        true
    }

    /// Closes the map and drops every outstanding resolver, waking each
    /// waiter with a closed channel. Returns how many were aborted.
    pub fn abort_all(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        let aborted = inner.entries.len();
        inner.entries.clear();
        aborted
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}
