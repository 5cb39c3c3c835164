//! Envelope router: validates inbound envelopes and dispatches them to the
//! orchestration service by action.
//!
//! The router is a pure translation step — no retries, no offset handling,
//! no side effects beyond the service call itself. All concurrency and
//! history guarantees stay inside the service/store update path.

use uuid::Uuid;

use crate::error::{ProtocolError, ServiceError};
use crate::model::{ContextUpdate, NewContext};
use crate::protocol::{ACTION_CREATE, ACTION_DELETE, ACTION_UPDATE, Envelope, Kind, Message};
use crate::service::ContextService;

/// Payload for a delete-action request.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest {
    id: Uuid,
}

/// Action-keyed dispatcher for one business domain.
pub struct EnvelopeRouter {
    domain: String,
    service: ContextService,
}

impl EnvelopeRouter {
    pub fn new(domain: impl Into<String>, service: ContextService) -> Self {
        Self {
            domain: domain.into(),
            service,
        }
    }

    /// Process one inbound envelope and produce the outbound reply.
    ///
    /// Every failure mode maps to an ERROR envelope echoing the request's
    /// correlation metadata; only a lost optimistic-lock race is flagged
    /// retriable.
    pub async fn route(&self, envelope: &Envelope) -> Envelope {
        if envelope.kind != Kind::Request {
            let err = ProtocolError::UnexpectedKind {
                kind: envelope.kind.to_string(),
            };
            tracing::error!(kind = %envelope.kind, "rejected envelope: {err}");
            return envelope.error_reply(400, err.to_string(), false);
        }

        // Dispatch only when the message type matches this router's domain.
        if envelope.message.message_type != self.domain {
            let err = ProtocolError::UnexpectedType {
                message_type: envelope.message.message_type.clone(),
                expected: self.domain.clone(),
            };
            tracing::error!(
                message_type = %envelope.message.message_type,
                "rejected envelope: {err}"
            );
            return envelope.error_reply(400, err.to_string(), false);
        }

        let action = envelope.message.action.as_str();
        let result = match action {
            ACTION_CREATE => self.handle_create(&envelope.message).await,
            ACTION_UPDATE => self.handle_update(&envelope.message).await,
            ACTION_DELETE => self.handle_delete(&envelope.message).await,
            _ => {
                let err = ProtocolError::InvalidAction {
                    action: action.to_string(),
                };
                tracing::error!(action, "rejected envelope: {err}");
                return envelope.error_reply(400, err.to_string(), false);
            }
        };

        match result {
            Ok(data) => envelope.success_reply(
                Message::new(self.domain.clone(), action.to_string()).with_data(data),
            ),
            Err(RouteError::Protocol(err)) => {
                tracing::error!(action, "invalid payload: {err}");
                envelope.error_reply(400, err.to_string(), false)
            }
            Err(RouteError::Service(err)) => {
                tracing::error!(action, error = %err, "context handler error");
                envelope.error_reply(err.status_code(), err.to_string(), err.is_retriable())
            }
        }
    }

    async fn handle_create(&self, message: &Message) -> Result<serde_json::Value, RouteError> {
        let candidate: NewContext = decode(ACTION_CREATE, &message.data)?;
        let created = self.service.create_context(candidate).await?;
        encode(ACTION_CREATE, &created)
    }

    async fn handle_update(&self, message: &Message) -> Result<serde_json::Value, RouteError> {
        let update: ContextUpdate = decode(ACTION_UPDATE, &message.data)?;
        let updated = self.service.update_context(update).await?;
        encode(ACTION_UPDATE, &updated)
    }

    async fn handle_delete(&self, message: &Message) -> Result<serde_json::Value, RouteError> {
        let request: DeleteRequest = decode(ACTION_DELETE, &message.data)?;
        let deleted = self.service.delete_context(request.id).await?;
        encode(ACTION_DELETE, &deleted)
    }
}

enum RouteError {
    Protocol(ProtocolError),
    Service(ServiceError),
}

impl From<ServiceError> for RouteError {
    fn from(err: ServiceError) -> Self {
        RouteError::Service(err)
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    action: &str,
    data: &serde_json::Value,
) -> Result<T, RouteError> {
    serde_json::from_value(data.clone()).map_err(|e| {
        RouteError::Protocol(ProtocolError::InvalidPayload {
            action: action.to_string(),
            reason: e.to_string(),
        })
    })
}

fn encode<T: serde::Serialize>(action: &str, value: &T) -> Result<serde_json::Value, RouteError> {
    serde_json::to_value(value).map_err(|e| {
        RouteError::Protocol(ProtocolError::InvalidPayload {
            action: action.to_string(),
            reason: e.to_string(),
        })
    })
}
