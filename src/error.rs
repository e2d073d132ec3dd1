use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("Expected a {expected} to activate, got something else")]
    TypeKind { expected: &'static str },

    #[error("Could not resolve schemas: {message}")]
    Resolution {
        message: String,
        missing: Vec<String>,
    },

    #[error("Migration failed in schema {schema}: {migration} - {cause}")]
    MigrationFailed {
        schema: String,
        migration: String,
        cause: String,
    },

    #[error("Activation subscriber failed for schema {schema}: {cause}")]
    Subscriber { schema: String, cause: String },

    #[error("Invalid schema name '{name}': {reason}")]
    InvalidSchemaName { name: String, reason: String },

    #[error("Improperly configured: {message}")]
    ImproperlyConfigured { message: String },

    #[error("No tenant for hostname '{hostname}'")]
    TenantNotFound { hostname: String },

    #[error("Schema already exists: {schema}")]
    SchemaAlreadyExists { schema: String },

    #[error("Connection failed to {database}: {cause}")]
    ConnectionFailed { database: String, cause: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TenancyError {
    pub fn resolution(missing: Vec<String>) -> Self {
        TenancyError::Resolution {
            message: format!("unknown schema(s): {}", missing.join(", ")),
            missing,
        }
    }

    pub fn improperly_configured(message: impl Into<String>) -> Self {
        TenancyError::ImproperlyConfigured {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ErrorResponse {
    fn new(error: &str, message: String) -> Self {
        Self {
            error: error.to_string(),
            message,
            schema: None,
            cause: None,
        }
    }
}

impl IntoResponse for TenancyError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, error_response) = match self {
            TenancyError::TypeKind { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("type_kind", message),
            ),
            TenancyError::Resolution { .. } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("resolution_error", message),
            ),
            TenancyError::MigrationFailed {
                schema,
                migration,
                cause,
            } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    schema: Some(schema),
                    cause: Some(cause),
                    ..ErrorResponse::new("migration_failed", format!("Migration {} failed", migration))
                },
            ),
            TenancyError::Subscriber { schema, cause } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    schema: Some(schema),
                    cause: Some(cause),
                    ..ErrorResponse::new("subscriber_failed", "Schema activation subscriber failed".to_string())
                },
            ),
            TenancyError::InvalidSchemaName { name, .. } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    schema: Some(name),
                    ..ErrorResponse::new("invalid_schema_name", message)
                },
            ),
            TenancyError::ImproperlyConfigured { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("improperly_configured", message),
            ),
            TenancyError::TenantNotFound { .. } => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new("tenant_not_found", message),
            ),
            TenancyError::SchemaAlreadyExists { schema } => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    schema: Some(schema),
                    ..ErrorResponse::new("schema_already_exists", message)
                },
            ),
            TenancyError::ConnectionFailed { database, cause } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    cause: Some(cause),
                    ..ErrorResponse::new(
                        "connection_failed",
                        format!("Failed to connect to database '{}'", database),
                    )
                },
            ),
            TenancyError::InvalidRequest { message } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("invalid_request", message),
            ),
            TenancyError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("internal_error", msg),
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<tokio_postgres::Error> for TenancyError {
    fn from(err: tokio_postgres::Error) -> Self {
        TenancyError::Internal(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for TenancyError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        TenancyError::Internal(format!("Pool error: {}", err))
    }
}

impl From<std::io::Error> for TenancyError {
    fn from(err: std::io::Error) -> Self {
        TenancyError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for TenancyError {
    fn from(err: serde_json::Error) -> Self {
        TenancyError::Internal(format!("JSON error: {}", err))
    }
}

impl From<anyhow::Error> for TenancyError {
    fn from(err: anyhow::Error) -> Self {
        TenancyError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TenancyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_lists_missing_names() {
        let err = TenancyError::resolution(vec!["ghost".to_string(), "phantom".to_string()]);
        assert_eq!(
            err.to_string(),
            "Could not resolve schemas: unknown schema(s): ghost, phantom"
        );
    }

    #[test]
    fn test_status_codes() {
        let not_found = TenancyError::TenantNotFound {
            hostname: "nowhere.test".to_string(),
        }
        .into_response();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let resolution = TenancyError::resolution(vec!["ghost".to_string()]).into_response();
        assert_eq!(resolution.status(), StatusCode::BAD_REQUEST);

        let exists = TenancyError::SchemaAlreadyExists {
            schema: "tenant1".to_string(),
        }
        .into_response();
        assert_eq!(exists.status(), StatusCode::CONFLICT);
    }
}
