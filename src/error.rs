//! Typed errors and HTTP mapping.

use crate::response::{wrap_error, Info};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Raised while generating the API surface from a schema module. Never seen by clients at request time.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "computed property {model}.{property} requires instance-level attribute access, but does not \
         implement a query-level expression. Consider removing this field from the API, or adding an \
         expression that returns a scalar query result."
    )]
    ComputedNeedsExpression { model: String, property: String },
    #[error("API sub-model `{target}` (field {model}.{field}) must be defined in the same schema module")]
    ForeignSubModel {
        model: String,
        field: String,
        target: String,
    },
    #[error("API sub-model `{target}` (field {model}.{field}) must be a storage model")]
    NotStorageModel {
        model: String,
        field: String,
        target: String,
    },
    #[error("`{0}` must be exposed to the API")]
    NotExposed(String),
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("duplicate endpoint alias: {0}")]
    DuplicateEndpoint(String),
    #[error("model field {model}.{field} failed type conversion to an API field")]
    UntypedField { model: String, field: String },
    #[error("validation: {0}")]
    Validation(String),
}

/// Failures reported by a storage backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unique constraint violated")]
    UniqueViolation { detail: Option<String> },
    #[error("transaction is no longer available")]
    NoTransaction,
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("{0}")]
    Backend(String),
    #[error("database: {0}")]
    Db(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.is_unique_violation() {
                let detail = db_err
                    .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                    .and_then(|pg| pg.detail())
                    .map(str::to_string);
                return StoreError::UniqueViolation { detail };
            }
        }
        StoreError::Db(e)
    }
}

/// Why a hyperlink could not be built. Rendered into the link itself, never raised to clients.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LinkError {
    #[error("UnknownEndpoint `{0}`")]
    UnknownEndpoint(String),
    #[error("MissingParameter `{param}` for endpoint `{endpoint}`")]
    MissingParameter { endpoint: String, param: String },
    #[error("UnresolvedPlaceholder `{0}`")]
    UnresolvedPlaceholder(String),
    #[error("InvalidQuery {0}")]
    InvalidQuery(String),
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(vec![message.into()])
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) | ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Validation, authorization, not-found and conflict errors pass through the mutation pipeline untouched.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            ApiError::Validation(_) | ApiError::Unauthorized(_) | ApiError::NotFound(_) | ApiError::Conflict(_)
        )
    }

    fn message(&self) -> serde_json::Value {
        match self {
            ApiError::Validation(messages) if messages.len() > 1 => serde_json::json!(messages),
            other => serde_json::Value::String(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation { detail } => ApiError::Conflict(conflict_message(detail.as_deref())),
            StoreError::UnknownModel(name) => ApiError::Internal(format!("Unexpected error occurred: UnknownModel {}", name)),
            StoreError::NoTransaction => ApiError::Internal("Unexpected error occurred: NoTransaction".into()),
            StoreError::Backend(msg) => ApiError::Internal(format!("Unexpected error occurred: Backend {}", msg)),
            StoreError::Db(e) => ApiError::Internal(format!("Unexpected error occurred: Database {}", e)),
        }
    }
}

fn unique_detail_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^Key \((.*?)\)=\((.*?)\) already exists\.$").ok())
        .as_ref()
}

/// Human-readable conflict message from the driver's unique-violation detail, when its format is recognised.
pub fn conflict_message(detail: Option<&str>) -> String {
    match detail {
        Some(detail) => match unique_detail_pattern().and_then(|re| re.captures(detail)) {
            Some(caps) => {
                let key = caps.get(1).map_or("", |m| m.as_str());
                let value = caps.get(2).map_or("", |m| m.as_str());
                format!(
                    "The \"{key}\" value must be unique, and another record with \"{key}\" = \"{value}\" already exists."
                )
            }
            None => detail.to_string(),
        },
        None => "A record with conflicting unique values already exists.".into(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = wrap_error(Info {
            code: status.as_u16(),
            message: self.message(),
            session: None,
            pagination: None,
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_postgres_unique_detail() {
        let msg = conflict_message(Some("Key (name)=(alpha) already exists."));
        assert_eq!(
            msg,
            "The \"name\" value must be unique, and another record with \"name\" = \"alpha\" already exists."
        );
    }

    #[test]
    fn unrecognised_detail_is_reported_verbatim() {
        assert_eq!(conflict_message(Some("duplicate entry")), "duplicate entry");
        assert!(conflict_message(None).contains("conflicting unique values"));
    }

    #[test]
    fn unique_violation_becomes_conflict() {
        let err: ApiError = StoreError::UniqueViolation { detail: None }.into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(err.is_expected());
    }

    #[test]
    fn several_validation_messages_render_as_list() {
        let err = ApiError::Validation(vec!["a".into(), "b".into()]);
        assert_eq!(err.message(), serde_json::json!(["a", "b"]));
        assert_eq!(ApiError::validation("a").message(), serde_json::json!("a"));
    }
}
