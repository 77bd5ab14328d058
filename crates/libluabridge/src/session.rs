//! Connection façade over a framed byte stream.
//!
//! [`Session::connect`] takes the read and write halves of any transport,
//! spawns one read/dispatch task and one write task, and exposes the
//! request, callback, and event surfaces of the channel underneath. Frames
//! are newline-delimited JSON documents.

use std::future::Future;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use luabridge_proto::{MAX_FRAME_BYTES, Message};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

use crate::channel::{ChannelShared, ChannelState};
use crate::error::Result;
use crate::value::{Callback, Value};

const OUTBOUND_QUEUE: usize = 64;

/// Tunables for a session. The defaults match a ComputerCraft-style remote
/// that shuts down via `os.shutdown()`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Expression sent as a fire-and-forget eval when closing.
    pub terminate_code: String,
    /// Buffered events per subscribed name before lagging subscribers drop.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            terminate_code: "os.shutdown()".to_string(),
            event_capacity: 64,
        }
    }
}

/// Registration receipt for a callback exposed to the remote side.
/// Dropping the handle keeps the callback registered; call
/// [`CallbackHandle::deregister`] to remove it.
pub struct CallbackHandle {
    id: String,
    channel: Arc<ChannelShared>,
}

impl CallbackHandle {
    /// The id the remote side addresses this callback by.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Removes the callback. Returns false when it was already gone.
    pub fn deregister(self) -> bool {
        self.channel.callbacks.remove(&self.id)
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}

/// One live connection to a remote interpreter.
pub struct Session {
    channel: Arc<ChannelShared>,
    terminate_code: String,
}

impl Session {
    /// Wraps the halves of a connected transport with default settings.
    pub fn connect<R, W>(read: R, write: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::connect_with(read, write, SessionConfig::default())
    }

    pub fn connect_with<R, W>(read: R, write: W, config: SessionConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
        let channel = ChannelShared::new(outbound_tx, config.event_capacity);

        tokio::spawn(async move {
            let mut writer =
                FramedWrite::new(write, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
            while let Some(msg) = outbound_rx.recv().await {
                let line = match msg.encode() {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(error = %err, "dropping unencodable frame");
                        continue;
                    }
                };
                if let Err(err) = writer.send(line).await {
                    debug!(error = %err, "write side closed");
                    break;
                }
            }
        });

        let dispatcher = Arc::clone(&channel);
        tokio::spawn(async move {
            let mut reader =
                FramedRead::new(read, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
            while let Some(line) = reader.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        debug!(error = %err, "read side closed");
                        break;
                    }
                };
                match Message::decode(&line) {
                    Ok(msg) => dispatcher.dispatch(msg),
                    Err(err) => warn!(error = %err, "dropping malformed frame"),
                }
            }
            dispatcher.shutdown();
        });

        Self {
            channel,
            terminate_code: config.terminate_code,
        }
    }

    /// Evaluates a single expression remotely. Packed arguments are bound
    /// as `...` on the remote side.
    pub async fn evaluate(&self, expr: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        self.channel
            .request_eval(format!("return {expr}"), args)
            .await
    }

    /// Runs a multi-line chunk verbatim. The chunk decides what to return.
    pub async fn execute(&self, chunk: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        self.channel.request_eval(chunk.to_string(), args).await
    }

    /// Reads a single remote value, such as a global or a field path.
    pub async fn get(&self, expr: &str) -> Result<Value> {
        let outputs = self.evaluate(expr, Vec::new()).await?;
        Ok(outputs.into_iter().next().unwrap_or(Value::Null))
    }

    /// Calls a named remote function with the given arguments.
    pub async fn run(&self, name: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        self.evaluate(&format!("{name}(...)"), args).await
    }

    /// Exposes a local async function to the remote side and returns its
    /// registration handle. To pass a function inside a value instead, use
    /// [`Value::callback`].
    pub fn register_callback<F, Fut>(&self, handler: F) -> CallbackHandle
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<Value>> + Send + 'static,
    {
        let handler: Callback = Arc::new(move |args| Box::pin(handler(args)));
        let id = self.channel.callbacks.register(handler);
        CallbackHandle {
            id,
            channel: Arc::clone(&self.channel),
        }
    }

    /// Subscribes to a named remote event.
    pub fn subscribe(&self, event: &str) -> broadcast::Receiver<Vec<Value>> {
        self.channel.broker.subscribe(event)
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Resolves once the transport has closed, however that happened.
    pub async fn closed(&self) {
        let mut rx = self.channel.closed_signal();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sends the terminate expression and waits for the remote side to drop
    /// the connection. The terminate eval gets no response leg: the remote
    /// typically powers off before it could answer.
    pub async fn close(&self) -> Result<()> {
        if self.channel.state() == ChannelState::Closed {
            return Ok(());
        }
        self.channel.begin_close();
        // The registration only reserves a collision-free id; the remote
        // powers off instead of answering, so the entry is dropped right
        // after the send rather than lingering until shutdown sweeps it.
        if let Some((id, _ack)) = self.channel.pending.register() {
            let sent = self
                .channel
                .send(Message::Eval {
                    id: id.clone(),
                    code: self.terminate_code.clone(),
                    values: Vec::new(),
                    mask: Vec::new(),
                })
                .await;
            self.channel.pending.forget(&id);
            if sent.is_err() {
                debug!("terminate directive not sent: transport already gone");
            }
        }
        self.closed().await;
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .finish()
    }
}
