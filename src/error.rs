//! Error types for contextd.

use uuid::Uuid;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the backing document store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Version conflict for context {id}: expected version {expected} is no longer current")]
    VersionConflict { id: Uuid, expected: i64 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Pool build error: {0}")]
    PoolBuild(#[from] deadpool_postgres::BuildError),

    #[error("Pool runtime error: {0}")]
    PoolRuntime(#[from] deadpool_postgres::PoolError),
}

/// Business-level errors surfaced by the orchestration service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Context not found: {id}")]
    NotFound { id: Uuid },

    #[error("Version conflict for context {id}: expected version {expected}")]
    VersionConflict { id: Uuid, expected: i64 },

    #[error("Storage failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    /// Classify store errors into the service taxonomy. NotFound and
    /// VersionConflict surface verbatim; everything else is an
    /// unclassified storage failure.
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id, .. } => ServiceError::NotFound { id },
            StoreError::VersionConflict { id, expected } => {
                ServiceError::VersionConflict { id, expected }
            }
            other => ServiceError::Store(other),
        }
    }
}

impl ServiceError {
    /// Numeric status carried in ERROR envelopes (and mirrored by the HTTP layer).
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::InvalidInput { .. } => 400,
            ServiceError::NotFound { .. } => 404,
            ServiceError::VersionConflict { .. } => 409,
            ServiceError::Store(_) => 500,
        }
    }

    /// A lost optimistic-lock race is the only condition worth retrying:
    /// the caller re-reads the current version and resubmits.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ServiceError::VersionConflict { .. })
    }
}

/// Malformed or mis-addressed envelopes.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unexpected envelope kind {kind}, expected REQUEST")]
    UnexpectedKind { kind: String },

    #[error("Unexpected message type {message_type}, expected {expected}")]
    UnexpectedType {
        message_type: String,
        expected: String,
    },

    #[error("Invalid action: {action}")]
    InvalidAction { action: String },

    #[error("Invalid payload for action {action}: {reason}")]
    InvalidPayload { action: String, reason: String },
}

/// Message-channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Offset commit failed: {0}")]
    Commit(String),

    #[error("Channel closed")]
    Closed,
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let id = Uuid::new_v4();
        let err = StoreError::NotFound {
            entity: "context",
            id,
        };
        let msg = err.to_string();
        assert!(msg.contains("context"), "Should mention entity: {msg}");
        assert!(msg.contains(&id.to_string()), "Should mention id: {msg}");

        let err = StoreError::VersionConflict { id, expected: 4 };
        let msg = err.to_string();
        assert!(msg.contains("4"), "Should mention expected version: {msg}");
    }

    #[test]
    fn service_error_classification() {
        let id = Uuid::new_v4();

        let err: ServiceError = StoreError::NotFound {
            entity: "context",
            id,
        }
        .into();
        assert!(matches!(err, ServiceError::NotFound { .. }));
        assert_eq!(err.status_code(), 404);
        assert!(!err.is_retriable());

        let err: ServiceError = StoreError::VersionConflict { id, expected: 2 }.into();
        assert!(matches!(err, ServiceError::VersionConflict { .. }));
        assert_eq!(err.status_code(), 409);
        assert!(err.is_retriable());

        let err: ServiceError = StoreError::Query("bad".to_string()).into();
        assert!(matches!(err, ServiceError::Store(_)));
        assert_eq!(err.status_code(), 500);
        assert!(!err.is_retriable());
    }

    #[test]
    fn protocol_error_display() {
        let err = ProtocolError::UnexpectedKind {
            kind: "RESPONSE".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("RESPONSE"), "Should mention kind: {msg}");

        let err = ProtocolError::InvalidAction {
            action: "upsert".to_string(),
        };
        assert!(err.to_string().contains("upsert"));
    }

    #[test]
    fn top_level_error_from_conversions() {
        let config_err = ConfigError::MissingRequired {
            key: "database_url".to_string(),
            hint: "Set DATABASE_URL".to_string(),
        };
        let err: Error = config_err.into();
        assert!(matches!(err, Error::Config(_)));

        let store_err = StoreError::Query("test".to_string());
        let err: Error = store_err.into();
        assert!(matches!(err, Error::Store(_)));

        let channel_err = ChannelError::Closed;
        let err: Error = channel_err.into();
        assert!(matches!(err, Error::Channel(_)));
    }
}
