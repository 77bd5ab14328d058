//! Recursive conversion between rich values and the wire form.
//!
//! Packing walks a [`Value`], splitting it into a JSON-safe wire value and a
//! structurally parallel [`Mask`]. Function leaves are registered as local
//! callbacks and travel as their id with a `true` mask. Unpacking reverses
//! the walk, materializing mask-`true` string leaves as [`RemoteFunction`]
//! stubs bound to the channel.
//!
//! Both directions are permissive about masks: a missing or ill-shaped mask
//! subtree means "no functions present" and the raw value passes through.

use std::sync::Arc;

use luabridge_proto::Mask;
use tracing::debug;

use crate::callbacks::CallbackRegistry;
use crate::channel::{ChannelShared, RemoteFunction};
use crate::value::{Callback, FunctionRef, Value};

const NO_MASK: Mask = Mask::Leaf(false);

pub(crate) fn pack(value: Value, callbacks: &CallbackRegistry) -> (serde_json::Value, Mask) {
    match value {
        Value::Null => (serde_json::Value::Null, Mask::Leaf(false)),
        Value::Bool(b) => (serde_json::Value::Bool(b), Mask::Leaf(false)),
        Value::Number(n) => (serde_json::Value::Number(n), Mask::Leaf(false)),
        Value::Str(s) => (serde_json::Value::String(s), Mask::Leaf(false)),
        Value::Array(items) => {
            let (values, masks) = items
                .into_iter()
                .map(|item| pack(item, callbacks))
                .unzip::<_, _, Vec<_>, Vec<_>>();
            (serde_json::Value::Array(values), Mask::Array(masks))
        }
        Value::Map(entries) => {
            let mut values = serde_json::Map::with_capacity(entries.len());
            let mut masks = std::collections::HashMap::with_capacity(entries.len());
            for (key, entry) in entries {
                let (value, mask) = pack(entry, callbacks);
                values.insert(key.clone(), value);
                masks.insert(key, mask);
            }
            (serde_json::Value::Object(values), Mask::Map(masks))
        }
        Value::Function(FunctionRef::Local(handler)) => {
            let id = callbacks.register(handler);
            (serde_json::Value::String(id), Mask::Leaf(true))
        }
        Value::Function(FunctionRef::Remote(remote)) => {
            // A stub crossing back over the wire gets a forwarding wrapper,
            // so every id we transmit resolves in our own registry.
            let handler: Callback = Arc::new(move |args| {
                let remote = remote.clone();
                Box::pin(async move {
                    match remote.call(args).await {
                        Ok(outputs) => outputs,
                        Err(err) => {
                            debug!(error = %err, "forwarded callback failed");
                            Vec::new()
                        }
                    }
                })
            });
            let id = callbacks.register(handler);
            (serde_json::Value::String(id), Mask::Leaf(true))
        }
    }
}

pub(crate) fn pack_args(
    args: Vec<Value>,
    callbacks: &CallbackRegistry,
) -> (Vec<serde_json::Value>, Vec<Mask>) {
    args.into_iter().map(|arg| pack(arg, callbacks)).unzip()
}

pub(crate) fn unpack(
    wire: serde_json::Value,
    mask: &Mask,
    channel: &Arc<ChannelShared>,
) -> Value {
    match (wire, mask) {
        (serde_json::Value::String(id), Mask::Leaf(true)) => {
            Value::Function(FunctionRef::Remote(RemoteFunction::new(id, channel)))
        }
        (wire, Mask::Leaf(true)) => {
            debug!("function mask over a non-string value; passing through raw");
            Value::from_wire(wire)
        }
        (serde_json::Value::Array(items), Mask::Array(masks)) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| unpack(item, masks.get(i).unwrap_or(&NO_MASK), channel))
                .collect(),
        ),
        (serde_json::Value::Object(entries), Mask::Map(masks)) => Value::Map(
            entries
                .into_iter()
                .map(|(key, entry)| {
                    let mask = masks.get(&key).unwrap_or(&NO_MASK);
                    let value = unpack(entry, mask, channel);
                    (key, value)
                })
                .collect(),
        ),
        (wire @ serde_json::Value::Array(_), Mask::Map(_))
        | (wire @ serde_json::Value::Object(_), Mask::Array(_)) => {
            debug!("mask shape mismatch; passing value through raw");
            Value::from_wire(wire)
        }
        (wire, _) => Value::from_wire(wire),
    }
}

/// Unpacks a value list against its mask list; missing trailing masks mean
/// "no functions present".
pub(crate) fn unpack_args(
    values: Vec<serde_json::Value>,
    mask: &[Mask],
    channel: &Arc<ChannelShared>,
) -> Vec<Value> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| unpack(value, mask.get(i).unwrap_or(&NO_MASK), channel))
        .collect()
}
