//! Envelopes exchanged across execution contexts.
//!
//! Every wire value carries a protocol marker so traffic from
//! unrelated machinery sharing the same transport can be rejected
//! before classification. Within the protocol, a message is a tagged
//! union: classification is a total match on the tag, never a
//! structural guess.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::BusResult;

/// Wire marker identifying envelopes that belong to this protocol.
pub const PROTOCOL_MARKER: &str = "crossbus/1";

/// Operations a page may request from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Connect,
    GetAccounts,
    GetSelectedAccount,
    SignPayload,
    SendOperation,
}

/// Notifications the backend may broadcast to pages unsolicited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AccountsChanged,
    SelectedAccountChanged,
    NetworkChanged,
    PermissionRevoked,
}

/// A protocol message.
///
/// `Response` and `Error` are the two mutually exclusive terminal
/// answers to exactly one `Request`, linked by its correlation id.
/// `Event` is unsolicited and never correlated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    Request {
        #[serde(rename = "type")]
        request_type: RequestType,
        payload: Value,
        correlation_id: Uuid,
    },
    Response {
        payload: Value,
        correlation_id: Uuid,
    },
    Error {
        error: String,
        correlation_id: Uuid,
    },
    Event {
        #[serde(rename = "type")]
        event_type: EventType,
        payload: Value,
    },
}

/// Wire form: the marker plus the flattened message body.
#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    marker: String,
    #[serde(flatten)]
    message: Message,
}

impl Message {
    /// Build a request, minting a fresh correlation id.
    pub fn request(request_type: RequestType, payload: Value) -> Self {
        Message::Request {
            request_type,
            payload,
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Build the successful answer to the request with `correlation_id`.
    pub fn response(correlation_id: Uuid, payload: Value) -> Self {
        Message::Response {
            payload,
            correlation_id,
        }
    }

    /// Build the failed answer to the request with `correlation_id`.
    pub fn error(correlation_id: Uuid, error: impl Into<String>) -> Self {
        Message::Error {
            error: error.into(),
            correlation_id,
        }
    }

    /// Build an unsolicited event.
    pub fn event(event_type: EventType, payload: Value) -> Self {
        Message::Event {
            event_type,
            payload,
        }
    }

    /// The correlation id, present on everything but events.
    pub fn correlation_id(&self) -> Option<Uuid> {
        match self {
            Message::Request { correlation_id, .. }
            | Message::Response { correlation_id, .. }
            | Message::Error { correlation_id, .. } => Some(*correlation_id),
            Message::Event { .. } => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request { .. })
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Message::Error { .. })
    }

    pub fn is_event(&self) -> bool {
        matches!(self, Message::Event { .. })
    }

    /// Seal into the wire form shared with unrelated transport traffic.
    pub fn to_wire(&self) -> BusResult<Value> {
        let envelope = WireEnvelope {
            marker: PROTOCOL_MARKER.to_string(),
            message: self.clone(),
        };
        Ok(serde_json::to_value(envelope)?)
    }

    /// Decode a raw transport value.
    ///
    /// Returns `None` when the value does not carry the protocol
    /// marker or does not decode as an envelope; such values belong to
    /// other machinery on the shared transport and are not errors.
    pub fn from_wire(raw: &Value) -> Option<Message> {
        let envelope: WireEnvelope = serde_json::from_value(raw.clone()).ok()?;
        (envelope.marker == PROTOCOL_MARKER).then_some(envelope.message)
    }
}
