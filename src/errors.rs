use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

use crate::authz::types::PolicyStatus;

#[derive(Debug, Error, Diagnostic)]
pub enum ArbiterError {
    #[error("{entity} `{id}` not found")]
    #[diagnostic(code(arbiter::not_found))]
    NotFound { entity: &'static str, id: String },

    #[error("policy number {0} is already in use")]
    #[diagnostic(
        code(arbiter::duplicate_number),
        help("Policy numbers are unique labels; pick an unused number")
    )]
    DuplicateNumber(i32),

    #[error("policy `{policy_id}` is already bound to {subject_type} `{subject_id}`")]
    #[diagnostic(code(arbiter::duplicate_binding))]
    DuplicateBinding {
        policy_id: String,
        subject_type: String,
        subject_id: String,
    },

    #[error("policy `{id}` is {actual}, expected {expected}")]
    #[diagnostic(
        code(arbiter::invalid_state),
        help("Policies move draft -> active -> archived; only drafts can be deleted")
    )]
    InvalidState {
        id: String,
        actual: PolicyStatus,
        expected: PolicyStatus,
    },

    #[error("policy `{id}` is {status}; its rules can no longer change")]
    #[diagnostic(
        code(arbiter::immutable_policy),
        help("Rules can only be added or removed while the policy is a draft")
    )]
    ImmutablePolicy { id: String, status: PolicyStatus },

    #[error("unknown subject: {0}")]
    #[diagnostic(code(arbiter::invalid_subject))]
    InvalidSubject(String),

    #[error("invalid request: {0}")]
    #[diagnostic(code(arbiter::invalid_request))]
    InvalidRequest(String),

    #[error("invalid condition expression: {0}")]
    #[diagnostic(
        code(arbiter::invalid_condition),
        help("Supported operators: ==, !=, >, <, >=, <=, &&, ||, !, in. Paths use dot notation (e.g. request.hour)")
    )]
    InvalidCondition(String),

    #[error("authentication required")]
    #[diagnostic(code(arbiter::unauthenticated))]
    Unauthenticated,

    #[error("forbidden: {0}")]
    #[diagnostic(code(arbiter::forbidden))]
    Forbidden(String),

    #[error("storage unavailable: {0}")]
    #[diagnostic(
        code(arbiter::unavailable),
        help("The database could not be reached after retrying")
    )]
    Unavailable(String),

    #[error("Database error: {0}")]
    #[diagnostic(code(arbiter::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(arbiter::serde))]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    #[diagnostic(code(arbiter::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(arbiter::config))]
    Config(#[from] config::ConfigError),
}

impl ArbiterError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ArbiterError::NotFound { .. } => "not_found",
            ArbiterError::DuplicateNumber(_) => "duplicate_number",
            ArbiterError::DuplicateBinding { .. } => "duplicate_binding",
            ArbiterError::InvalidState { .. } => "invalid_state",
            ArbiterError::ImmutablePolicy { .. } => "immutable_policy",
            ArbiterError::InvalidSubject(_) => "invalid_subject",
            ArbiterError::InvalidRequest(_) | ArbiterError::InvalidCondition(_) => {
                "invalid_request"
            }
            ArbiterError::Unauthenticated => "unauthenticated",
            ArbiterError::Forbidden(_) => "forbidden",
            ArbiterError::Unavailable(_) => "unavailable",
            ArbiterError::Db(_)
            | ArbiterError::Serde(_)
            | ArbiterError::Io(_)
            | ArbiterError::Config(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ArbiterError::NotFound { .. } => StatusCode::NOT_FOUND,
            ArbiterError::DuplicateNumber(_)
            | ArbiterError::DuplicateBinding { .. }
            | ArbiterError::InvalidState { .. }
            | ArbiterError::ImmutablePolicy { .. } => StatusCode::CONFLICT,
            ArbiterError::InvalidSubject(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ArbiterError::InvalidRequest(_) | ArbiterError::InvalidCondition(_) => {
                StatusCode::BAD_REQUEST
            }
            ArbiterError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ArbiterError::Forbidden(_) => StatusCode::FORBIDDEN,
            ArbiterError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ArbiterError::Db(_)
            | ArbiterError::Serde(_)
            | ArbiterError::Io(_)
            | ArbiterError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Connection-level failures worth retrying on read paths.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ArbiterError::Db(sea_orm::DbErr::Conn(_))
                | ArbiterError::Db(sea_orm::DbErr::ConnectionAcquire(_))
        )
    }
}

impl IntoResponse for ArbiterError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        // Internal details stay in the log
        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "internal error".to_string(),
            _ => self.to_string(),
        };
        let body = json!({ "error": self.code(), "message": message });
        (status, Json(body)).into_response()
    }
}
