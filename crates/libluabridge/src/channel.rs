//! Per-connection state and inbound message dispatch.
//!
//! A channel owns the pending-request map, the local callback registry, and
//! the event broker for exactly one remote endpoint. All inbound frames pass
//! through [`ChannelShared::dispatch`] on the single read task, so registry
//! mutation stays single-writer; outbound frames funnel through one mpsc
//! queue into the write task.

use std::sync::{Arc, Mutex, Weak};

use luabridge_proto::{Mask, Message};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::broker::EventBroker;
use crate::callbacks::CallbackRegistry;
use crate::codec;
use crate::error::{BridgeError, Result};
use crate::pending::{Completion, PendingRequests};
use crate::value::Value;

/// Lifecycle of the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    /// A terminate directive has been sent; waiting for the transport's own
    /// close acknowledgment.
    Closing,
    Closed,
}

pub(crate) struct ChannelShared {
    outbound: mpsc::Sender<Message>,
    pub(crate) pending: PendingRequests,
    pub(crate) callbacks: CallbackRegistry,
    pub(crate) broker: EventBroker,
    state: Mutex<ChannelState>,
    closed_tx: watch::Sender<bool>,
    // Unpacking mints RemoteFunction stubs that hold an Arc back to us.
    me: Weak<ChannelShared>,
}

impl ChannelShared {
    pub fn new(outbound: mpsc::Sender<Message>, event_capacity: usize) -> Arc<Self> {
        let (closed_tx, _) = watch::channel(false);
        Arc::new_cyclic(|me| Self {
            outbound,
            pending: PendingRequests::new(),
            callbacks: CallbackRegistry::new(),
            broker: EventBroker::new(event_capacity),
            state: Mutex::new(ChannelState::Open),
            closed_tx,
            me: me.clone(),
        })
    }

    fn strong(&self) -> Option<Arc<Self>> {
        self.me.upgrade()
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    pub fn begin_close(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == ChannelState::Open {
            *state = ChannelState::Closing;
        }
    }

    /// Marks the channel closed and rejects everything still outstanding.
    /// Idempotent; driven by the read task when the transport ends.
    pub fn shutdown(&self) {
        *self.state.lock().unwrap() = ChannelState::Closed;
        let aborted = self.pending.abort_all();
        if aborted > 0 {
            debug!(aborted, "rejected pending requests on channel close");
        }
        let _ = self.closed_tx.send(true);
    }

    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    pub async fn send(&self, msg: Message) -> Result<()> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }

    pub async fn request_eval(&self, code: String, args: Vec<Value>) -> Result<Vec<Value>> {
        self.request(args, |id, values, mask| Message::Eval {
            id,
            code,
            values,
            mask,
        })
        .await
    }

    pub async fn request_invoke(&self, target: String, args: Vec<Value>) -> Result<Vec<Value>> {
        self.request(args, |id, values, mask| Message::InvokeRequest {
            id,
            target,
            values,
            mask,
        })
        .await
    }

    /// One correlated round trip: pack, park a resolver, transmit, await,
    /// unpack. Failure responses reject with the first unpacked output.
    async fn request<F>(&self, args: Vec<Value>, build: F) -> Result<Vec<Value>>
    where
        F: FnOnce(String, Vec<serde_json::Value>, Vec<Mask>) -> Message,
    {
        if self.state() == ChannelState::Closed {
            return Err(BridgeError::ChannelClosed);
        }
        let (values, mask) = codec::pack_args(args, &self.callbacks);
        // Registration is refused once shutdown has swept the map, so a
        // request racing the close cannot park a resolver nothing will wake.
        let (id, rx) = self.pending.register().ok_or(BridgeError::ChannelClosed)?;
        if let Err(err) = self.send(build(id.clone(), values, mask)).await {
            self.pending.forget(&id);
            return Err(err);
        }
        let completion = rx.await.map_err(|_| BridgeError::ChannelClosed)?;
        let channel = self.strong().ok_or(BridgeError::ChannelClosed)?;
        let outputs = codec::unpack_args(completion.values, &completion.mask, &channel);
        if completion.success {
            Ok(outputs)
        } else {
            Err(BridgeError::Eval(
                outputs.into_iter().next().unwrap_or(Value::Null),
            ))
        }
    }

    /// Routes one inbound frame. Runs on the read task, one frame at a time.
    pub fn dispatch(&self, msg: Message) {
        match msg {
            Message::EvalResponse {
                id,
                success,
                values,
                mask,
            } => self.complete(&id, Completion {
                success,
                values,
                mask,
            }),
            Message::InvokeResponse { id, values, mask } => self.complete(&id, Completion {
                success: true,
                values,
                mask,
            }),
            Message::InvokeRequest {
                id,
                target,
                values,
                mask,
            } => self.handle_invoke(id, target, values, mask),
            Message::Event { name, values, mask } => {
                let Some(channel) = self.strong() else {
                    return;
                };
                let args = codec::unpack_args(values, &mask, &channel);
                self.broker.publish(&name, args);
            }
            Message::Eval { id, .. } => {
                debug!(%id, "dropping eval frame: this side does not execute code");
            }
        }
    }

    fn complete(&self, id: &str, completion: Completion) {
        if !self.pending.complete(id, completion) {
            debug!(%id, "response for unknown or already-completed request");
        }
    }

    fn handle_invoke(
        &self,
        id: String,
        target: String,
        values: Vec<serde_json::Value>,
        mask: Vec<Mask>,
    ) {
        let Some(handler) = self.callbacks.get(&target) else {
            debug!(%target, "invoke request for unregistered callback");
            return;
        };
        let Some(channel) = self.strong() else {
            return;
        };
        // Handlers may be slow or issue their own requests over this very
        // channel; run them off the dispatch path so inbound frames keep
        // draining.
        tokio::spawn(async move {
            let args = codec::unpack_args(values, &mask, &channel);
            let outputs = handler(args).await;
            let (values, mask) = codec::pack_args(outputs, &channel.callbacks);
            if channel
                .send(Message::InvokeResponse { id, values, mask })
                .await
                .is_err()
            {
                debug!("invoke response dropped: channel closed");
            }
        });
    }
}

/// Local proxy for a function owned by the remote side. Calling it is always
/// an explicit correlated round trip over the owning channel. Cheap to clone
/// and create; not tracked centrally.
#[derive(Clone)]
pub struct RemoteFunction {
    id: String,
    channel: Arc<ChannelShared>,
}

impl RemoteFunction {
    pub(crate) fn new(id: String, channel: &Arc<ChannelShared>) -> Self {
        Self {
            id,
            channel: Arc::clone(channel),
        }
    }

    /// The remote-owned function id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Invokes the remote function with `args`, resolving once the matching
    /// invoke response arrives.
    pub async fn call(&self, args: Vec<Value>) -> Result<Vec<Value>> {
        self.channel.request_invoke(self.id.clone(), args).await
    }

    pub(crate) fn same_channel(&self, other: &RemoteFunction) -> bool {
        Arc::ptr_eq(&self.channel, &other.channel)
    }
}

impl std::fmt::Debug for RemoteFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFunction").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::Receiver;

    fn test_channel() -> (Arc<ChannelShared>, Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        (ChannelShared::new(tx, 8), rx)
    }

    #[tokio::test]
    async fn invoke_request_runs_handler_and_replies() {
        let (channel, mut outbound) = test_channel();
        let id = channel
            .callbacks
            .register(Arc::new(|_| Box::pin(async { vec![Value::from("x")] })));

        channel.dispatch(Message::InvokeRequest {
            id: "r1".to_string(),
            target: id,
            values: vec![],
            mask: vec![],
        });

        let reply = outbound.recv().await.unwrap();
        assert_eq!(
            reply,
            Message::InvokeResponse {
                id: "r1".to_string(),
                values: vec![json!("x")],
                mask: vec![Mask::Leaf(false)],
            }
        );
    }

    #[tokio::test]
    async fn invoke_for_unknown_target_is_a_no_op() {
        let (channel, mut outbound) = test_channel();
        channel.dispatch(Message::InvokeRequest {
            id: "r1".to_string(),
            target: "missing".to_string(),
            values: vec![],
            mask: vec![],
        });
        tokio::task::yield_now().await;
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn invoke_handler_receives_unpacked_args() {
        let (channel, mut outbound) = test_channel();
        let id = channel.callbacks.register(Arc::new(|args: Vec<Value>| {
            Box::pin(async move {
                let n = args.first().and_then(Value::as_i64).unwrap_or(0);
                vec![Value::from(n * 2)]
            })
        }));

        channel.dispatch(Message::InvokeRequest {
            id: "r2".to_string(),
            target: id,
            values: vec![json!(21)],
            mask: vec![Mask::Leaf(false)],
        });

        let reply = outbound.recv().await.unwrap();
        match reply {
            Message::InvokeResponse { values, .. } => assert_eq!(values, vec![json!(42)]),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_resolves_when_response_dispatched() {
        let (channel, mut outbound) = test_channel();

        let requester = Arc::clone(&channel);
        let task =
            tokio::spawn(async move { requester.request_eval("return 1".to_string(), vec![]).await });

        let sent = outbound.recv().await.unwrap();
        let Message::Eval { id, .. } = sent else {
            panic!("expected eval frame");
        };
        channel.dispatch(Message::EvalResponse {
            id,
            success: true,
            values: vec![json!(1)],
            mask: vec![Mask::Leaf(false)],
        });

        assert_eq!(task.await.unwrap().unwrap(), vec![Value::from(1i64)]);
    }

    #[tokio::test]
    async fn failure_response_rejects_with_first_value() {
        let (channel, mut outbound) = test_channel();

        let requester = Arc::clone(&channel);
        let task =
            tokio::spawn(async move { requester.request_eval("return x".to_string(), vec![]).await });

        let Message::Eval { id, .. } = outbound.recv().await.unwrap() else {
            panic!("expected eval frame");
        };
        channel.dispatch(Message::EvalResponse {
            id,
            success: false,
            values: vec![json!("boom")],
            mask: vec![],
        });

        match task.await.unwrap() {
            Err(BridgeError::Eval(value)) => assert_eq!(value, Value::from("boom")),
            other => panic!("expected eval failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_and_unknown_responses_are_ignored() {
        let (channel, _outbound) = test_channel();
        channel.dispatch(Message::EvalResponse {
            id: "nobody".to_string(),
            success: true,
            values: vec![],
            mask: vec![],
        });
        // No pending entry was disturbed and nothing panicked.
        assert_eq!(channel.pending.len(), 0);
    }

    #[tokio::test]
    async fn shutdown_rejects_outstanding_and_flags_state() {
        let (channel, mut outbound) = test_channel();

        let requester = Arc::clone(&channel);
        let task =
            tokio::spawn(async move { requester.request_eval("return 1".to_string(), vec![]).await });
        let _ = outbound.recv().await.unwrap();

        channel.shutdown();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(matches!(
            task.await.unwrap(),
            Err(BridgeError::ChannelClosed)
        ));

        // New requests fail fast once closed.
        assert!(matches!(
            channel.request_eval("return 2".to_string(), vec![]).await,
            Err(BridgeError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn request_losing_race_with_shutdown_is_rejected() {
        let (channel, _outbound) = test_channel();
        // Sweep the pending map without flipping the state flag, the window
        // a concurrent shutdown leaves between the state check and the
        // registration.
        channel.pending.abort_all();
        assert_eq!(channel.state(), ChannelState::Open);

        assert!(matches!(
            channel.request_eval("return 1".to_string(), vec![]).await,
            Err(BridgeError::ChannelClosed)
        ));
        assert_eq!(channel.pending.len(), 0);
    }

    #[tokio::test]
    async fn event_frames_reach_the_broker() {
        let (channel, _outbound) = test_channel();
        let mut rx = channel.broker.subscribe("timer");
        channel.dispatch(Message::Event {
            name: "timer".to_string(),
            values: vec![json!(3)],
            mask: vec![Mask::Leaf(false)],
        });
        assert_eq!(rx.recv().await.unwrap(), vec![Value::from(3i64)]);
    }
}
