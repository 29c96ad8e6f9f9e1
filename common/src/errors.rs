// Error handling framework
// Taxonomy for schedule lifecycle, placement validation and persistence

use thiserror::Error;

/// Schedule lifecycle and placement errors
///
/// Every variant except `Internal` is request-local and carries a reason that is
/// safe to hand back to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    RuleViolation(String),

    #[error("{0}")]
    State(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Reasoning service unavailable: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScheduleError {
    /// Machine-readable reason code
    pub fn code(&self) -> &'static str {
        match self {
            ScheduleError::Validation(_) => "validation_error",
            ScheduleError::Conflict(_) => "conflict",
            ScheduleError::RuleViolation(_) => "rule_violation",
            ScheduleError::State(_) => "state_error",
            ScheduleError::NotFound(_) => "not_found",
            ScheduleError::Upstream(_) => "upstream_error",
            ScheduleError::Internal(_) => "internal_error",
        }
    }

    pub fn finalized() -> Self {
        ScheduleError::State("Finalized schedules cannot be edited".to_string())
    }

    pub fn schedule_not_found(id: uuid::Uuid) -> Self {
        ScheduleError::NotFound(format!("Schedule not found: {}", id))
    }
}

/// Parse failures for weekday and time-of-day values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeParseError {
    #[error("Invalid weekday '{0}': expected one of Sunday, Monday, Tuesday, Wednesday, Thursday")]
    InvalidWeekday(String),

    #[error("Invalid time '{0}': expected HH:MM")]
    InvalidTime(String),

    #[error("Invalid time range {start}-{end}: start must be before end")]
    EmptyRange { start: String, end: String },
}

impl From<TimeParseError> for ScheduleError {
    fn from(err: TimeParseError) -> Self {
        ScheduleError::Validation(err.to_string())
    }
}

/// Reasons a stored rule row cannot be compiled into a predicate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleParseError {
    #[error("Rule has neither a day set nor a time window")]
    Vacuous,

    #[error("Invalid day token '{0}'")]
    InvalidDay(String),

    #[error("Invalid time window '{0}'")]
    InvalidWindow(String),

    #[error("Unknown course kind filter '{0}'")]
    InvalidKind(String),
}

/// Failures talking to the external reasoning service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReasoningError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("service returned HTTP {0}")]
    Status(u16),

    #[error("unusable response: {0}")]
    Malformed(String),
}

impl ReasoningError {
    /// Metric label
    pub fn kind(&self) -> &'static str {
        match self {
            ReasoningError::Timeout(_) => "timeout",
            ReasoningError::Transport(_) => "transport",
            ReasoningError::Status(_) => "status",
            ReasoningError::Malformed(_) => "malformed",
        }
    }
}

impl From<ReasoningError> for ScheduleError {
    fn from(err: ReasoningError) -> Self {
        ScheduleError::Upstream(err.to_string())
    }
}

/// Authentication and authorization errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Missing bearer credential")]
    MissingCredential,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Stored value could not be decoded: {0}")]
    Decode(String),
}

/// API response error type for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        match err {
            // Persistence detail stays in the server log
            ScheduleError::Internal(_) => {
                ApiError::new("internal_error", "An internal error occurred")
            }
            other => ApiError::new(other.code(), other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::new("unauthorized", err.to_string())
    }
}

impl From<DatabaseError> for ScheduleError {
    fn from(err: DatabaseError) -> Self {
        tracing::error!(error = %err, "Persistence failure");
        ScheduleError::Internal(err.to_string())
    }
}

// Implement From for common external errors
impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                // Check for specific database error codes
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => DatabaseError::DuplicateKey(db_err.message().to_string()),
                        "23503" => DatabaseError::ForeignKeyViolation(db_err.message().to_string()),
                        _ => DatabaseError::QueryFailed(db_err.message().to_string()),
                    }
                } else {
                    DatabaseError::QueryFailed(db_err.message().to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::Decode(err.to_string())
    }
}
