//! Error types for the SMS core.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Messaging provider errors (outbound REST calls).
#[derive(Debug, thiserror::Error)]
pub enum SmsError {
    #[error("Failed to send SMS to {to}: {reason}")]
    SendFailed { to: String, reason: String },

    #[error("Invalid response from SMS provider: {0}")]
    InvalidResponse(String),
}

/// Errors raised while processing an inbound message or composing an outbound one.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Estimate approval failed: {0}")]
    Approval(String),

    #[error("Notification failed: {0}")]
    Notify(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("SMS error: {0}")]
    Sms(#[from] SmsError),
}
