//! Publish/subscribe surface for remote events.
//!
//! Events are fire-and-forget notifications keyed by name; they have no
//! response leg and are independent of request/response correlation.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::value::Value;

pub struct EventBroker {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<Value>>>>,
}

impl EventBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes to a named event, creating its channel on first use.
    pub fn subscribe(&self, name: &str) -> broadcast::Receiver<Vec<Value>> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Delivers an event to current subscribers. Events nobody listens for
    /// are dropped without error.
    pub fn publish(&self, name: &str, args: Vec<Value>) {
        let sender = self.channels.lock().unwrap().get(name).cloned();
        if let Some(tx) = sender {
            let _ = tx.send(args);
        }
    }
}
