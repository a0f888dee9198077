//! Production-grade error handling for StaffX Core.
//!
//! This module provides:
//! - Comprehensive error types with context and chaining
//! - HTTP status code mapping for the thin transport callers
//! - Machine-readable error codes for API responses
//! - User-friendly messages vs detailed internal messages
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use staffx_core::error::{StaffError, Result, ErrorContext};
//!
//! fn my_function() -> Result<()> {
//!     some_operation()
//!         .context("Failed to perform operation")?;
//!     Ok(())
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for StaffX operations.
pub type Result<T> = std::result::Result<T, StaffError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Kinds
// ═══════════════════════════════════════════════════════════════════════════════

/// The coarse error taxonomy exposed to callers.
///
/// Every [`ErrorCode`] collapses onto exactly one kind; transports and retry
/// loops branch on the kind, diagnostics use the full code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed id or payload failing structural checks; rejected before any mutation.
    InvalidInput,
    /// A referenced thread/run/document/system is absent.
    NotFound,
    /// Role insufficient, or no access to the aggregate's thread.
    Forbidden,
    /// Optimistic-concurrency loss: double-claim, double-complete, duplicate name.
    Conflict,
    /// Invariant violated; a correctness bug, never silently retried.
    Internal,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Project/Thread Errors (1000-1099)
    ProjectNotFound,
    ThreadNotFound,
    DuplicateProjectName,
    ThreadClosed,
    ThreadCommitted,

    // Graph/Content Errors (1100-1199)
    SystemNotFound,
    NodeNotFound,
    ConcernNotFound,
    DocumentNotFound,
    ArtifactNotFound,
    ActionNotFound,
    RootNodeWithParent,

    // Run Queue Errors (1200-1299)
    RunNotFound,
    RunAlreadyFinalized,
    RunClaimConflict,
    EmptyRunResult,

    // Pagination Errors (1300-1399)
    InvalidCursor,

    // Database Errors (2000-2099)
    DatabaseError,
    DatabaseConnectionFailed,
    DatabaseQueryFailed,
    DatabaseTransactionFailed,
    DuplicateRecord,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Authorization Errors (4000-4099)
    Unauthorized,
    Forbidden,

    // Validation Errors (4100-4199)
    ValidationError,
    InvalidInput,
    MissingRequiredField,

    // Configuration Errors (5000-5099)
    ConfigurationError,

    // Internal Errors (9000-9099)
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            // Project/Thread Errors
            Self::ProjectNotFound => 1000,
            Self::ThreadNotFound => 1001,
            Self::DuplicateProjectName => 1002,
            Self::ThreadClosed => 1003,
            Self::ThreadCommitted => 1004,

            // Graph/Content Errors
            Self::SystemNotFound => 1100,
            Self::NodeNotFound => 1101,
            Self::ConcernNotFound => 1102,
            Self::DocumentNotFound => 1103,
            Self::ArtifactNotFound => 1104,
            Self::ActionNotFound => 1105,
            Self::RootNodeWithParent => 1106,

            // Run Queue Errors
            Self::RunNotFound => 1200,
            Self::RunAlreadyFinalized => 1201,
            Self::RunClaimConflict => 1202,
            Self::EmptyRunResult => 1203,

            // Pagination Errors
            Self::InvalidCursor => 1300,

            // Database Errors
            Self::DatabaseError => 2000,
            Self::DatabaseConnectionFailed => 2001,
            Self::DatabaseQueryFailed => 2002,
            Self::DatabaseTransactionFailed => 2003,
            Self::DuplicateRecord => 2004,

            // Serialization Errors
            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            // Authorization Errors
            Self::Unauthorized => 4000,
            Self::Forbidden => 4001,

            // Validation Errors
            Self::ValidationError => 4100,
            Self::InvalidInput => 4101,
            Self::MissingRequiredField => 4102,

            // Configuration Errors
            Self::ConfigurationError => 5000,

            // Internal Errors
            Self::InternalError => 9000,
            Self::UnknownError => 9099,
        }
    }

    /// Collapse the code onto the coarse taxonomy.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ProjectNotFound
            | Self::ThreadNotFound
            | Self::SystemNotFound
            | Self::NodeNotFound
            | Self::ConcernNotFound
            | Self::DocumentNotFound
            | Self::ArtifactNotFound
            | Self::ActionNotFound
            | Self::RunNotFound => ErrorKind::NotFound,

            Self::DuplicateProjectName
            | Self::ThreadClosed
            | Self::ThreadCommitted
            | Self::RunAlreadyFinalized
            | Self::RunClaimConflict
            | Self::DuplicateRecord => ErrorKind::Conflict,

            Self::Unauthorized | Self::Forbidden => ErrorKind::Forbidden,

            Self::RootNodeWithParent
            | Self::EmptyRunResult
            | Self::InvalidCursor
            | Self::ValidationError
            | Self::InvalidInput
            | Self::MissingRequiredField => ErrorKind::InvalidInput,

            Self::DatabaseError
            | Self::DatabaseConnectionFailed
            | Self::DatabaseQueryFailed
            | Self::DatabaseTransactionFailed
            | Self::SerializationError
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::InternalError
            | Self::UnknownError => ErrorKind::Internal,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Forbidden => match self {
                Self::Unauthorized => StatusCode::UNAUTHORIZED,
                _ => StatusCode::FORBIDDEN,
            },
            ErrorKind::Internal => match self {
                Self::DatabaseConnectionFailed => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Check if this error is retryable.
    ///
    /// Conflicts are expected under optimistic concurrency and resolve by
    /// re-fetching current state; transient database failures may also be
    /// retried. Internal errors must not be.
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict)
            || matches!(
                self,
                Self::DatabaseConnectionFailed | Self::DatabaseQueryFailed
            )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "thread",
            1100..=1199 => "graph",
            1200..=1299 => "run",
            1300..=1399 => "pagination",
            2000..=2099 => "database",
            2200..=2299 => "serialization",
            4000..=4099 => "authorization",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging and alerting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// User errors (bad input, validation failures, expected conflicts)
    Low,
    /// Operational issues (authorization denials)
    Medium,
    /// System errors (database failures)
    High,
    /// Critical errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code.kind() {
            ErrorKind::InvalidInput | ErrorKind::NotFound | ErrorKind::Conflict => Self::Low,
            ErrorKind::Forbidden => Self::Medium,
            ErrorKind::Internal => match code {
                ErrorCode::DatabaseConnectionFailed
                | ErrorCode::InternalError
                | ErrorCode::UnknownError => Self::Critical,
                _ => Self::High,
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (thread, run, document, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for StaffX Core.
///
/// This error type supports:
/// - Structured error codes for API responses
/// - Error chaining with context
/// - User-friendly vs internal messages
/// - HTTP status code mapping
/// - Metrics integration
#[derive(Error, Debug)]
pub struct StaffError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for StaffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl StaffError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500). Indicates a violated invariant.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create a not found error for a specific entity.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        let code = match entity_type.as_str() {
            "project" => ErrorCode::ProjectNotFound,
            "thread" => ErrorCode::ThreadNotFound,
            "system" => ErrorCode::SystemNotFound,
            "node" => ErrorCode::NodeNotFound,
            "concern" => ErrorCode::ConcernNotFound,
            "document" => ErrorCode::DocumentNotFound,
            "artifact" => ErrorCode::ArtifactNotFound,
            "action" => ErrorCode::ActionNotFound,
            "run" => ErrorCode::RunNotFound,
            _ => ErrorCode::InvalidInput,
        };
        Self::new(code, format!("{} not found: {}", entity_type, entity_id))
            .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    /// Create a conflict error.
    pub fn conflict(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        debug_assert!(matches!(code.kind(), ErrorKind::Conflict));
        Self::new(code, message)
    }

    /// Create a validation error.
    pub fn invalid_input(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create a forbidden error.
    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the coarse error kind.
    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    /// Record error metrics.
    fn record_metrics(&self) {
        counter!(
            "staffx_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Whether the request was successful (always false for errors)
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Coarse error kind
    pub kind: ErrorKind,

    /// Numeric error code
    pub numeric_code: u32,

    /// User-friendly error message
    pub message: String,

    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&StaffError> for ErrorResponse {
    fn from(error: &StaffError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                kind: error.kind(),
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.context.is_empty() && error.details.entity_id.is_none() {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for StaffError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| StaffError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| StaffError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| StaffError::new(ErrorCode::InvalidInput, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| StaffError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for StaffError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::RowNotFound => (
                ErrorCode::InvalidInput,
                "The requested record was not found",
            ),
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    return Self::with_internal(
                        ErrorCode::DuplicateRecord,
                        "A record with this identifier already exists",
                        format!("Constraint violation: {}", constraint),
                    )
                    .with_source(error);
                }
                (ErrorCode::DatabaseQueryFailed, "A database error occurred")
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
            ),
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for StaffError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ErrorCode::ThreadNotFound.kind(), ErrorKind::NotFound);
        assert_eq!(ErrorCode::RunClaimConflict.kind(), ErrorKind::Conflict);
        assert_eq!(ErrorCode::Forbidden.kind(), ErrorKind::Forbidden);
        assert_eq!(ErrorCode::InvalidCursor.kind(), ErrorKind::InvalidInput);
        assert_eq!(ErrorCode::InternalError.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            ErrorCode::RunAlreadyFinalized.http_status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ErrorCode::ThreadNotFound.http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ErrorCode::InvalidInput.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ErrorCode::Forbidden.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ErrorCode::InternalError.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_conflicts_are_retryable() {
        assert!(ErrorCode::RunClaimConflict.is_retryable());
        assert!(ErrorCode::DuplicateProjectName.is_retryable());
        assert!(!ErrorCode::InternalError.is_retryable());
        assert!(!ErrorCode::InvalidInput.is_retryable());
    }

    #[test]
    fn test_not_found_picks_entity_code() {
        let err = StaffError::not_found("run", "abc");
        assert_eq!(err.code(), ErrorCode::RunNotFound);
        assert_eq!(err.details().entity_type.as_deref(), Some("run"));
    }

    #[test]
    fn test_error_display_includes_internal() {
        let err = StaffError::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            "fork creation failed",
        );
        let rendered = err.to_string();
        assert!(rendered.contains("INTERNAL_ERROR"));
        assert!(rendered.contains("fork creation failed"));
    }

    #[test]
    fn test_error_response_shape() {
        let err = StaffError::conflict(ErrorCode::RunAlreadyFinalized, "Run already finalized");
        let response = ErrorResponse::from(&err);
        assert!(!response.success);
        assert_eq!(response.error.kind, ErrorKind::Conflict);
        assert_eq!(response.error.numeric_code, 1201);
    }
}
