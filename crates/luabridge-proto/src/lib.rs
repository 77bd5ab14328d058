//! Wire protocol for host-to-interpreter bridge messages.
//!
//! Every frame is one JSON document: a positional array whose first element
//! is the message discriminator. Argument and result lists travel as a pair
//! of parallel arrays — the wire values themselves plus a structural [`Mask`]
//! marking which leaves are function references rather than literals.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Maximum allowed frame length in bytes. Frames are JSON-lines; anything
/// longer than this is treated as a transport error by the framing layer.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Frame-level decode failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON array")]
    NotAnArray,

    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    #[error("malformed {kind} frame: missing or invalid {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

/// Structural shadow of a wire value marking which leaves are function
/// reference ids. The mask mirrors the value's array/map topology; a `true`
/// leaf means "the corresponding wire value is a callback id string".
///
/// Masks are advisory: senders may omit or truncate them for pure-data
/// payloads, and receivers treat any missing or mismatched subtree as
/// "no functions present".
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Mask {
    Leaf(bool),
    Array(Vec<Mask>),
    Map(HashMap<String, Mask>),
}

impl Default for Mask {
    fn default() -> Self {
        Mask::Leaf(false)
    }
}

impl Mask {
    /// True when this leaf marks a function reference.
    pub fn is_function_ref(&self) -> bool {
        matches!(self, Mask::Leaf(true))
    }
}

/// A single protocol frame.
///
/// `Eval` flows host → interpreter; `EvalResponse` flows back under the same
/// correlation id. `Invoke` frames flow in either direction: whichever side
/// holds a callback id can be asked to invoke it. `Event` frames are
/// fire-and-forget notifications with no response leg.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `["eval", id, code, values, mask]`
    Eval {
        id: String,
        code: String,
        values: Vec<serde_json::Value>,
        mask: Vec<Mask>,
    },
    /// `["eval-response", id, success, values, mask]`
    EvalResponse {
        id: String,
        success: bool,
        values: Vec<serde_json::Value>,
        mask: Vec<Mask>,
    },
    /// `["invoke", "req", id, target, values, mask]`
    InvokeRequest {
        id: String,
        target: String,
        values: Vec<serde_json::Value>,
        mask: Vec<Mask>,
    },
    /// `["invoke", "res", id, values, mask]`
    InvokeResponse {
        id: String,
        values: Vec<serde_json::Value>,
        mask: Vec<Mask>,
    },
    /// `["event", name, values, mask]`
    Event {
        name: String,
        values: Vec<serde_json::Value>,
        mask: Vec<Mask>,
    },
}

impl Message {
    /// Discriminator string as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Eval { .. } => "eval",
            Message::EvalResponse { .. } => "eval-response",
            Message::InvokeRequest { .. } | Message::InvokeResponse { .. } => "invoke",
            Message::Event { .. } => "event",
        }
    }

    /// Serializes the frame to its one-line JSON document.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_frame())
    }

    /// Parses a frame from a JSON document.
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        Self::from_frame(value)
    }

    fn to_frame(&self) -> serde_json::Value {
        match self {
            Message::Eval {
                id,
                code,
                values,
                mask,
            } => serde_json::json!(["eval", id, code, values, mask]),
            Message::EvalResponse {
                id,
                success,
                values,
                mask,
            } => serde_json::json!(["eval-response", id, success, values, mask]),
            Message::InvokeRequest {
                id,
                target,
                values,
                mask,
            } => serde_json::json!(["invoke", "req", id, target, values, mask]),
            Message::InvokeResponse { id, values, mask } => {
                serde_json::json!(["invoke", "res", id, values, mask])
            }
            Message::Event { name, values, mask } => {
                serde_json::json!(["event", name, values, mask])
            }
        }
    }

    fn from_frame(value: serde_json::Value) -> Result<Self, ProtocolError> {
        let serde_json::Value::Array(elements) = value else {
            return Err(ProtocolError::NotAnArray);
        };
        let mut elements = elements.into_iter();

        let kind = match elements.next() {
            Some(serde_json::Value::String(kind)) => kind,
            _ => return Err(ProtocolError::NotAnArray),
        };

        match kind.as_str() {
            "eval" => Ok(Message::Eval {
                id: field_str(elements.next(), "eval", "id")?,
                code: field_str(elements.next(), "eval", "code")?,
                values: field_values(elements.next(), "eval")?,
                mask: field_masks(elements.next()),
            }),
            "eval-response" => Ok(Message::EvalResponse {
                id: field_str(elements.next(), "eval-response", "id")?,
                success: field_bool(elements.next(), "eval-response", "success")?,
                values: field_values(elements.next(), "eval-response")?,
                mask: field_masks(elements.next()),
            }),
            "invoke" => {
                let direction = field_str(elements.next(), "invoke", "direction")?;
                match direction.as_str() {
                    "req" => Ok(Message::InvokeRequest {
                        id: field_str(elements.next(), "invoke", "id")?,
                        target: field_str(elements.next(), "invoke", "target")?,
                        values: field_values(elements.next(), "invoke")?,
                        mask: field_masks(elements.next()),
                    }),
                    "res" => Ok(Message::InvokeResponse {
                        id: field_str(elements.next(), "invoke", "id")?,
                        values: field_values(elements.next(), "invoke")?,
                        mask: field_masks(elements.next()),
                    }),
                    _ => Err(ProtocolError::MissingField {
                        kind: "invoke",
                        field: "direction",
                    }),
                }
            }
            "event" => Ok(Message::Event {
                name: field_str(elements.next(), "event", "name")?,
                values: field_values(elements.next(), "event")?,
                mask: field_masks(elements.next()),
            }),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

impl Serialize for Message {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_frame().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Message::from_frame(value).map_err(serde::de::Error::custom)
    }
}

fn field_str(
    value: Option<serde_json::Value>,
    kind: &'static str,
    field: &'static str,
) -> Result<String, ProtocolError> {
    match value {
        Some(serde_json::Value::String(s)) => Ok(s),
        _ => Err(ProtocolError::MissingField { kind, field }),
    }
}

fn field_bool(
    value: Option<serde_json::Value>,
    kind: &'static str,
    field: &'static str,
) -> Result<bool, ProtocolError> {
    match value {
        Some(serde_json::Value::Bool(b)) => Ok(b),
        _ => Err(ProtocolError::MissingField { kind, field }),
    }
}

/// Values default to an empty list when the element is absent, but a present
/// non-array element is a hard error.
fn field_values(
    value: Option<serde_json::Value>,
    kind: &'static str,
) -> Result<Vec<serde_json::Value>, ProtocolError> {
    match value {
        Some(serde_json::Value::Array(values)) => Ok(values),
        None => Ok(Vec::new()),
        Some(_) => Err(ProtocolError::MissingField {
            kind,
            field: "values",
        }),
    }
}

/// Masks are best-effort: an absent or ill-shaped mask element degrades to
/// "no functions present" instead of failing the frame.
fn field_masks(value: Option<serde_json::Value>) -> Vec<Mask> {
    match value {
        Some(serde_json::Value::Array(masks)) => masks
            .into_iter()
            .map(|m| serde_json::from_value(m).unwrap_or_default())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eval_frame_format() {
        let msg = Message::Eval {
            id: "a".to_string(),
            code: "return 1 + 2".to_string(),
            values: vec![],
            mask: vec![],
        };
        assert_eq!(msg.encode().unwrap(), r#"["eval","a","return 1 + 2",[],[]]"#);
    }

    #[test]
    fn eval_response_roundtrip() {
        let line = r#"["eval-response","a",true,[3],[false]]"#;
        let msg = Message::decode(line).unwrap();
        match &msg {
            Message::EvalResponse {
                id,
                success,
                values,
                mask,
            } => {
                assert_eq!(id, "a");
                assert!(*success);
                assert_eq!(values, &vec![json!(3)]);
                assert_eq!(mask, &vec![Mask::Leaf(false)]);
            }
            _ => panic!("wrong variant"),
        }
        assert_eq!(msg.encode().unwrap(), line);
    }

    #[test]
    fn invoke_request_roundtrip() {
        let line = r#"["invoke","req","r1","cb1",[],[]]"#;
        let msg = Message::decode(line).unwrap();
        match &msg {
            Message::InvokeRequest { id, target, .. } => {
                assert_eq!(id, "r1");
                assert_eq!(target, "cb1");
            }
            _ => panic!("wrong variant"),
        }
        assert_eq!(msg.encode().unwrap(), line);
    }

    #[test]
    fn invoke_response_roundtrip() {
        let line = r#"["invoke","res","r1",["x"],[false]]"#;
        let msg = Message::decode(line).unwrap();
        match &msg {
            Message::InvokeResponse { id, values, .. } => {
                assert_eq!(id, "r1");
                assert_eq!(values, &vec![json!("x")]);
            }
            _ => panic!("wrong variant"),
        }
        assert_eq!(msg.encode().unwrap(), line);
    }

    #[test]
    fn event_roundtrip() {
        let line = r#"["event","timer",[7],[false]]"#;
        let msg = Message::decode(line).unwrap();
        match &msg {
            Message::Event { name, values, .. } => {
                assert_eq!(name, "timer");
                assert_eq!(values, &vec![json!(7)]);
            }
            _ => panic!("wrong variant"),
        }
        assert_eq!(msg.encode().unwrap(), line);
    }

    #[test]
    fn omitted_mask_defaults_to_empty() {
        let msg = Message::decode(r#"["eval-response","a",true,[3]]"#).unwrap();
        match msg {
            Message::EvalResponse { mask, .. } => assert!(mask.is_empty()),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn omitted_values_default_to_empty() {
        let msg = Message::decode(r#"["event","redstone"]"#).unwrap();
        match msg {
            Message::Event { values, mask, .. } => {
                assert!(values.is_empty());
                assert!(mask.is_empty());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn nested_mask_shapes_decode() {
        let msg = Message::decode(r#"["event","e",[1,[2,"f"],{"cb":"g"}],[false,[false,true],{"cb":true}]]"#)
            .unwrap();
        match msg {
            Message::Event { mask, .. } => {
                assert_eq!(mask[0], Mask::Leaf(false));
                assert_eq!(mask[1], Mask::Array(vec![Mask::Leaf(false), Mask::Leaf(true)]));
                match &mask[2] {
                    Mask::Map(m) => assert!(m["cb"].is_function_ref()),
                    _ => panic!("expected map mask"),
                }
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn ill_shaped_mask_element_degrades_to_false() {
        let msg = Message::decode(r#"["event","e",[1],[42]]"#).unwrap();
        match msg {
            Message::Event { mask, .. } => assert_eq!(mask, vec![Mask::Leaf(false)]),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = Message::decode(r#"["ping","a"]"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownKind(k) if k == "ping"));
    }

    #[test]
    fn rejects_non_array_frame() {
        assert!(matches!(
            Message::decode(r#"{"cmd":"eval"}"#).unwrap_err(),
            ProtocolError::NotAnArray
        ));
    }

    #[test]
    fn rejects_missing_id() {
        let err = Message::decode(r#"["eval"]"#).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MissingField { kind: "eval", field: "id" }
        ));
    }

    #[test]
    fn rejects_unknown_invoke_direction() {
        let err = Message::decode(r#"["invoke","ack","r1"]"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField { .. }));
    }

    #[test]
    fn serde_trait_impls_match_encode() {
        let msg = Message::Event {
            name: "disk".to_string(),
            values: vec![json!("left")],
            mask: vec![Mask::Leaf(false)],
        };
        let via_serde = serde_json::to_string(&msg).unwrap();
        assert_eq!(via_serde, msg.encode().unwrap());
        let parsed: Message = serde_json::from_str(&via_serde).unwrap();
        assert_eq!(parsed, msg);
    }
}
