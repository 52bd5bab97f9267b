use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::models::LeadStatus;
use crate::validation::ValidationError;

/// Application-specific error types.
///
/// Client-fixable outcomes (validation, duplicates, throttling) carry enough
/// detail for the response body; dependency failures are logged and answered
/// with a generic 500 so no internal detail leaks to the caller.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed or out-of-range input, one message per field.
    #[error("Validation failed: {0}")]
    Validation(ValidationError),
    /// Bad request error that is not tied to a specific field.
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// Business-rule conflict, e.g. an email that was already captured.
    #[error("Duplicate ({code}): {message}")]
    Duplicate { code: &'static str, message: String },
    /// The lead left the `pending` status before the requested operation.
    #[error("Lead already processed (current status: {current_status})")]
    LeadAlreadyProcessed { current_status: LeadStatus },
    /// A status update that would move a lead backwards or skip a stage.
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: LeadStatus, to: LeadStatus },
    /// Too many attempts inside the current window.
    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64, message: String },
    /// Resource not found error.
    #[error("Not found ({code}): {message}")]
    NotFound { code: &'static str, message: String },
    /// Unauthorized access error.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// Database-related errors.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    /// The lead store rejected a write.
    #[error("Persistence error: {0}")]
    Persistence(String),
    /// Error interacting with an external API (CMS, email, identity store).
    #[error("External API error: {0}")]
    ExternalApiError(String),
    /// Clock sanity or signing failure while issuing a sign-up token.
    #[error("Token error: {0}")]
    Token(String),
    /// Internal server error.
    #[error("Internal error: {0}")]
    InternalError(String),
    /// Error with context chain for better debugging.
    #[error("{context}: {source}")]
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Shortcut for the 409 returned when an email is already known.
    pub fn email_exists() -> Self {
        AppError::Duplicate {
            code: "EMAIL_EXISTS",
            message: "Este email já foi cadastrado. Use outro email ou faça login.".to_string(),
        }
    }

    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Duplicate { .. }
            | AppError::LeadAlreadyProcessed { .. }
            | AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::DatabaseError(_)
            | AppError::Persistence(_)
            | AppError::ExternalApiError(_)
            | AppError::Token(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::WithContext { source, .. } => source.status_code(),
        }
    }
}

fn error_body(message: &str, code: &str) -> Value {
    json!({
        "ok": false,
        "error": message,
        "code": code,
    })
}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error variant to an appropriate HTTP status code and JSON body.
    /// Logs errors appropriately based on their severity.
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match self {
            AppError::Validation(err) => {
                let mut body = error_body(
                    "Dados inválidos. Verifique os campos e tente novamente.",
                    "VALIDATION_ERROR",
                );
                body["details"] = json!(err.errors);
                body
            }
            AppError::BadRequest(msg) => error_body(&msg, "BAD_REQUEST"),
            AppError::Duplicate { code, message } => error_body(&message, code),
            AppError::LeadAlreadyProcessed { current_status } => {
                let mut body = error_body(
                    "Este lead já foi processado anteriormente.",
                    "LEAD_ALREADY_PROCESSED",
                );
                body["currentStatus"] = json!(current_status);
                body
            }
            AppError::InvalidTransition { from, to } => {
                tracing::warn!("Rejected lead status transition {} -> {}", from, to);
                error_body(
                    "Transição de status não permitida.",
                    "INVALID_STATUS_TRANSITION",
                )
            }
            AppError::RateLimited {
                retry_after,
                message,
            } => {
                let mut body = error_body(&message, "RATE_LIMITED");
                body["retryAfter"] = json!(retry_after);
                let mut response = (status, Json(body)).into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                return response;
            }
            AppError::NotFound { code, message } => error_body(&message, code),
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized access: {}", msg);
                error_body("Não autorizado", "UNAUTHORIZED")
            }
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                error_body("Erro interno do servidor. Tente novamente.", "INTERNAL_ERROR")
            }
            AppError::Persistence(msg) => {
                tracing::error!("Persistence error: {}", msg);
                error_body(
                    "Erro interno. Tente novamente em alguns minutos.",
                    "INTERNAL_ERROR",
                )
            }
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                error_body("Erro interno do servidor. Tente novamente.", "INTERNAL_ERROR")
            }
            AppError::Token(msg) => {
                tracing::error!("Token error: {}", msg);
                error_body("Erro interno do servidor. Tente novamente.", "INTERNAL_ERROR")
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                error_body("Erro interno do servidor. Tente novamente.", "INTERNAL_ERROR")
            }
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                // Delegate to underlying error's response
                return source.into_response();
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err)
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AppError::Token(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }
}

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::FieldError;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_validation_error_lists_fields() {
        let err = AppError::Validation(ValidationError {
            errors: vec![FieldError::new("name", "Nome deve ter pelo menos 2 caracteres")],
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["details"][0]["field"], "name");
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let err = AppError::RateLimited {
            retry_after: 120,
            message: "Muitas tentativas.".to_string(),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "120");

        let body = body_json(response).await;
        assert_eq!(body["retryAfter"], 120);
    }

    #[tokio::test]
    async fn test_upstream_errors_do_not_leak_detail() {
        let err = AppError::ExternalApiError("connection refused to 10.0.0.3".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert!(!body["error"].as_str().unwrap().contains("10.0.0.3"));
    }

    #[tokio::test]
    async fn test_context_delegates_status() {
        let result: Result<(), AppError> = Err(AppError::email_exists());
        let err = result.context("capturing lead").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let body = body_json(err.into_response()).await;
        assert_eq!(body["code"], "EMAIL_EXISTS");
    }

    #[tokio::test]
    async fn test_database_context_is_internal_error() {
        let result: Result<(), sqlx::Error> = Err(sqlx::Error::RowNotFound);
        let err = result.context("Failed to get lead").unwrap_err();
        assert!(err.to_string().starts_with("Failed to get lead"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(err.into_response()).await;
        assert_eq!(body["code"], "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn test_already_processed_reports_status() {
        let err = AppError::LeadAlreadyProcessed {
            current_status: LeadStatus::EmailValidated,
        };
        let body = body_json(err.into_response()).await;
        assert_eq!(body["currentStatus"], "email_validated");
    }
}
