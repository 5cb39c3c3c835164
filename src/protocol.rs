//! Envelope protocol: the transport-agnostic unit carried over the message
//! channel. An envelope wraps a business message with routing and
//! correlation metadata; replies echo that metadata unchanged so callers can
//! match responses to requests across process boundaries.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ACTION_CREATE: &str = "create";
pub const ACTION_UPDATE: &str = "update";
pub const ACTION_DELETE: &str = "delete";

pub const EVENT_SUCCESS: &str = "success";
pub const EVENT_ERROR: &str = "error";

/// Direction/disposition of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Kind {
    Request,
    Response,
    Error,
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Kind::Request => write!(f, "REQUEST"),
            Kind::Response => write!(f, "RESPONSE"),
            Kind::Error => write!(f, "ERROR"),
        }
    }
}

/// Business payload: a domain, an action within it, and an open data object
/// interpreted per action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: String,
    pub action: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Message {
    pub fn new(message_type: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            action: action.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Error payload carried in the `data` of an ERROR envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub error: String,
    pub retriable: bool,
}

/// The protocol unit: message plus correlation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub message: Message,
    pub kind: Kind,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub idempotency_key: String,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub event_name: String,
}

impl Envelope {
    /// Build a REQUEST envelope with a fresh correlation id.
    pub fn request(message: Message) -> Self {
        Self {
            message,
            kind: Kind::Request,
            correlation_id: Uuid::new_v4().to_string(),
            idempotency_key: String::new(),
            trace_id: String::new(),
            event_name: String::new(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_idempotency_key(mut self, idempotency_key: impl Into<String>) -> Self {
        self.idempotency_key = idempotency_key.into();
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// Build the RESPONSE envelope for this request, carrying the given
    /// message and echoing correlation metadata unchanged.
    pub fn success_reply(&self, message: Message) -> Self {
        Self {
            message,
            kind: Kind::Response,
            correlation_id: self.correlation_id.clone(),
            idempotency_key: self.idempotency_key.clone(),
            trace_id: self.trace_id.clone(),
            event_name: EVENT_SUCCESS.to_string(),
        }
    }

    /// Build the ERROR envelope for this request: status, message, and
    /// retriable flag in the data payload, correlation metadata echoed.
    pub fn error_reply(&self, status: u16, error: impl Into<String>, retriable: bool) -> Self {
        let body = ErrorBody {
            status,
            error: error.into(),
            retriable,
        };
        Self {
            message: Message {
                message_type: self.message.message_type.clone(),
                action: self.message.action.clone(),
                data: serde_json::to_value(&body).unwrap_or(serde_json::Value::Null),
            },
            kind: Kind::Error,
            correlation_id: self.correlation_id.clone(),
            idempotency_key: self.idempotency_key.clone(),
            trace_id: self.trace_id.clone(),
            event_name: EVENT_ERROR.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn request() -> Envelope {
        Envelope::request(
            Message::new("context", ACTION_CREATE).with_data(serde_json::json!({"name": "a"})),
        )
        .with_correlation_id("corr-1")
        .with_idempotency_key("idem-1")
        .with_trace_id("trace-1")
    }

    #[test]
    fn kind_serializes_screaming() {
        assert_eq!(
            serde_json::to_value(Kind::Request).unwrap(),
            serde_json::json!("REQUEST")
        );
        assert_eq!(
            serde_json::from_value::<Kind>(serde_json::json!("ERROR")).unwrap(),
            Kind::Error
        );
    }

    #[test]
    fn success_reply_echoes_correlation_metadata() {
        let req = request();
        let reply = req.success_reply(
            Message::new("context", ACTION_CREATE).with_data(serde_json::json!({"id": "x"})),
        );

        assert_eq!(reply.kind, Kind::Response);
        assert_eq!(reply.correlation_id, req.correlation_id);
        assert_eq!(reply.idempotency_key, req.idempotency_key);
        assert_eq!(reply.trace_id, req.trace_id);
        assert_eq!(reply.event_name, EVENT_SUCCESS);
    }

    #[test]
    fn error_reply_carries_status_and_retriable_flag() {
        let req = request();
        let reply = req.error_reply(409, "version conflict", true);

        assert_eq!(reply.kind, Kind::Error);
        assert_eq!(reply.correlation_id, req.correlation_id);
        assert_eq!(reply.trace_id, req.trace_id);
        assert_eq!(reply.event_name, EVENT_ERROR);

        let body: ErrorBody = serde_json::from_value(reply.message.data).unwrap();
        assert_eq!(body.status, 409);
        assert!(body.retriable);
        assert_eq!(body.error, "version conflict");
    }

    #[test]
    fn envelope_wire_field_names() {
        let req = request();
        let wire = serde_json::to_value(&req).unwrap();

        assert_eq!(wire["kind"], "REQUEST");
        assert_eq!(wire["correlationId"], "corr-1");
        assert_eq!(wire["idempotencyKey"], "idem-1");
        assert_eq!(wire["traceId"], "trace-1");
        assert_eq!(wire["message"]["type"], "context");
        assert_eq!(wire["message"]["action"], "create");

        let back: Envelope = serde_json::from_value(wire).unwrap();
        assert_eq!(back, req);
    }
}
