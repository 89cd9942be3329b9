//! Wire model and message classification.
//!
//! Inbound lines are decoded into a loose [`RawMessage`] first and then
//! classified into an explicit [`Inbound`] variant. Classification branches
//! on field presence with a fixed precedence: a `method` field makes the
//! message a notification even when an id is also present; otherwise a
//! `result` field makes it a success response; otherwise an `error` field
//! makes it a failure response. This precedence is part of the protocol
//! contract and must not be reordered.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::Job;
use crate::u256::U256;

/// An outbound request.
///
/// Ids are transmitted as decimal strings; params are always strings for
/// the requests this client issues.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    /// Request id, unique and strictly increasing within one session.
    pub id: String,

    /// Method name (e.g. "mining.subscribe").
    pub method: String,

    /// Positional string parameters.
    pub params: Vec<String>,
}

impl Request {
    /// Create a request with the given numeric id.
    pub fn new(id: u64, method: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A decoded but not yet classified inbound message.
///
/// All fields are optional; classification decides what the message is.
/// JSON `null` counts as absent, so a response carrying `"error": null`
/// alongside a result classifies as a success.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    /// Message id, if any (string or number on the wire).
    #[serde(default)]
    pub id: Option<Value>,

    /// Method name; presence marks a notification.
    #[serde(default)]
    pub method: Option<String>,

    /// Notification parameters.
    #[serde(default)]
    pub params: Option<Value>,

    /// Success payload.
    #[serde(default)]
    pub result: Option<Value>,

    /// Failure payload.
    #[serde(default)]
    pub error: Option<Value>,
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Unsolicited server-to-client message.
    Notification {
        /// Method name.
        method: String,
        /// Raw parameters.
        params: Value,
    },

    /// Success response to an outstanding request.
    Success {
        /// Echoed request id.
        id: String,
        /// Result payload.
        result: Value,
    },

    /// Failure response to an outstanding request.
    Failure {
        /// Echoed request id.
        id: String,
        /// Error payload.
        error: Value,
    },
}

/// Classify a raw message by field presence.
///
/// Returns `Err` with a description when the message matches none of the
/// three shapes; the caller logs and drops the line.
pub fn classify(raw: RawMessage) -> Result<Inbound, String> {
    // Method presence wins, id or not.
    if let Some(method) = raw.method {
        return Ok(Inbound::Notification {
            method,
            params: raw.params.unwrap_or(Value::Null),
        });
    }

    if let Some(result) = raw.result {
        let id = response_id(raw.id)?;
        return Ok(Inbound::Success { id, result });
    }

    if let Some(error) = raw.error {
        let id = response_id(raw.id)?;
        return Ok(Inbound::Failure { id, error });
    }

    Err("message has neither method, result, nor error".to_string())
}

fn response_id(id: Option<Value>) -> Result<String, String> {
    match id {
        Some(Value::String(s)) => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(format!("response id has unexpected type: {other}")),
        None => Err("response carries no id".to_string()),
    }
}

/// Events emitted by the session toward its owner.
///
/// Sinks are supplied at construction so a partially wired client is never
/// reachable.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// Subscribe handshake acknowledged.
    Subscribed {
        /// Base extraNonce assigned by the pool (hex on the wire, ≤64 bits).
        extra_nonce: u64,
        /// Advertised extraNonce size in bytes.
        extra_nonce_size: usize,
    },

    /// New work assignment. Replaces any previous job wholesale.
    NewJob(Job),

    /// New share target. Replaces any previous target wholesale.
    DifficultyChanged(U256),

    /// The session ended; the client must be discarded.
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_method_presence_wins_over_id_and_result() {
        // A message carrying method, id, and result must still dispatch as
        // a notification.
        let msg = raw(json!({
            "id": "7",
            "method": "mining.notify",
            "params": [],
            "result": true
        }));

        match classify(msg).unwrap() {
            Inbound::Notification { method, .. } => assert_eq!(method, "mining.notify"),
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_success_response() {
        let msg = raw(json!({"id": "3", "result": [[], "10", 4], "error": null}));
        match classify(msg).unwrap() {
            Inbound::Success { id, result } => {
                assert_eq!(id, "3");
                assert_eq!(result[1], "10");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_failure_response() {
        let msg = raw(json!({"id": "4", "result": null, "error": [20, "stale", null]}));
        match classify(msg).unwrap() {
            Inbound::Failure { id, error } => {
                assert_eq!(id, "4");
                assert_eq!(error[1], "stale");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_numeric_id_is_coerced() {
        let msg = raw(json!({"id": 12, "result": true}));
        match classify(msg).unwrap() {
            Inbound::Success { id, .. } => assert_eq!(id, "12"),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_rejects_shapeless_message() {
        assert!(classify(raw(json!({"id": "1"}))).is_err());
        assert!(classify(raw(json!({}))).is_err());
        // A response without an id is also unusable.
        assert!(classify(raw(json!({"result": true}))).is_err());
    }

    #[test]
    fn test_request_serialization() {
        let req = Request::new(1, "mining.subscribe", vec![]);
        let encoded = serde_json::to_value(&req).unwrap();
        assert_eq!(
            encoded,
            json!({"id": "1", "method": "mining.subscribe", "params": []})
        );
    }

    #[test]
    fn test_request_ids_are_strings_on_the_wire() {
        let req = Request::new(42, "mining.submit", vec!["user".into()]);
        let text = serde_json::to_string(&req).unwrap();
        assert!(text.contains("\"id\":\"42\""));
    }
}
