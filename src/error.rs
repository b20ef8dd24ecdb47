use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Request, State,
    },
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::state::AppState;
use crate::users::repo::StoreError;

/// One unmet rule, keyed by the request field it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    Validation {
        message: String,
        errors: Vec<FieldError>,
    },

    #[error("{0}")]
    Unauthorized(String),

    /// Domain rule violation such as self-deletion. Reported as 400.
    #[error("{0}")]
    Forbidden(String),

    #[error("Password change required")]
    PasswordChangeRequired,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::Forbidden(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::PasswordChangeRequired => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(reason = %rejection.body_text(), "rejected request body");
        Self::validation("Invalid request body")
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        debug!(reason = %rejection.body_text(), "rejected query string");
        Self::validation("Invalid query parameters")
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { .. } => {
                Self::Conflict("A user with this email already exists".into())
            }
            StoreError::NotFound => Self::NotFound("User not found".into()),
            StoreError::Backend(e) => Self::Internal(e),
        }
    }
}

/// Full error chain of a 500, carried on the response for `expose_internal_detail`.
#[derive(Debug, Clone)]
struct InternalDetail(String);

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<FieldError>,
}

impl ErrorBody {
    fn internal(message: Option<String>) -> Self {
        Self {
            success: false,
            error: "Internal server error".into(),
            message,
            errors: Vec::new(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::Internal(e) => {
                error!(error = ?e, "internal error");
                let mut res = (status, Json(ErrorBody::internal(None))).into_response();
                res.extensions_mut().insert(InternalDetail(format!("{e:#}")));
                return res;
            }
            Self::Validation { message, errors } => ErrorBody {
                success: false,
                error: message,
                message: None,
                errors,
            },
            other => {
                if status == StatusCode::UNAUTHORIZED {
                    warn!(error = %other, "request not authenticated");
                }
                ErrorBody {
                    success: false,
                    error: other.to_string(),
                    message: None,
                    errors: Vec::new(),
                }
            }
        };
        (status, Json(body)).into_response()
    }
}

/// Adds the error chain to 500 bodies when running in development mode.
pub async fn expose_internal_detail(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let mut res = next.run(req).await;
    if !state.config.development {
        return res;
    }
    match res.extensions_mut().remove::<InternalDetail>() {
        Some(InternalDetail(detail)) => {
            (res.status(), Json(ErrorBody::internal(Some(detail)))).into_response()
        }
        None => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(AppError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::PasswordChangeRequired.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Conflict("x".into()).status(), StatusCode::CONFLICT);
    }

    #[test]
    fn store_errors_translate() {
        let conflict: AppError = StoreError::Conflict {
            email: "a@b.com".into(),
        }
        .into();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        let missing: AppError = StoreError::NotFound.into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn validation_body_lists_every_violation() {
        let err = AppError::Validation {
            message: "Password does not meet requirements".into(),
            errors: vec![
                FieldError::new("newPassword", "one"),
                FieldError::new("newPassword", "two"),
            ],
        };
        let json = body_json(err.into_response()).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Password does not meet requirements");
        assert_eq!(json["errors"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn internal_detail_is_hidden_by_default() {
        let err = AppError::Internal(anyhow::anyhow!("connection refused at 10.0.0.3"));
        let json = body_json(err.into_response()).await;
        assert_eq!(json["error"], "Internal server error");
        assert!(json.get("message").is_none());
        assert!(!json.to_string().contains("10.0.0.3"));
    }

    fn failing_app(development: bool) -> axum::Router {
        let mut state = AppState::fake();
        let mut config = (*state.config).clone();
        config.development = development;
        state.config = std::sync::Arc::new(config);

        axum::Router::new()
            .route(
                "/boom",
                axum::routing::get(|| async {
                    Err::<(), AppError>(anyhow::anyhow!("connection refused at 10.0.0.3").into())
                }),
            )
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                expose_internal_detail,
            ))
            .with_state(state)
    }

    async fn get_boom(app: axum::Router) -> (StatusCode, serde_json::Value) {
        use tower::ServiceExt;

        let res = app
            .oneshot(
                axum::http::Request::get("/boom")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        (res.status(), body_json(res).await)
    }

    #[tokio::test]
    async fn development_mode_exposes_error_chain() {
        let (status, json) = get_boom(failing_app(true)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Internal server error");
        assert!(json["message"].as_str().unwrap().contains("10.0.0.3"));
    }

    #[tokio::test]
    async fn production_mode_keeps_error_chain_private() {
        let (status, json) = get_boom(failing_app(false)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json.get("message").is_none());
        assert!(!json.to_string().contains("10.0.0.3"));
    }
}
