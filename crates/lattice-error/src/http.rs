use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::CoreError;

/// JSON error envelope (consistent across all endpoints).
///
/// ```json
/// {"error": {"code": "not_found", "message": "Workflow not found"}}
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code:    String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path:    Option<String>,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code:    code.into(),
                message: message.into(),
                path:    None,
            },
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Cache errors are an internal discipline violation if they reach a
        // response; surface a generic message rather than store internals.
        let message = match &self {
            Self::Cache { .. } | Self::Internal { .. } => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let mut body = ErrorBody::new(self.error_code(), message);
        if let Self::Validation { path: Some(p), .. } = &self {
            body.error.path = Some(p.clone());
        }

        if let Self::RateLimited { retry_after_secs } = &self {
            return (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                Json(body),
            )
                .into_response();
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let body = ErrorBody::new("not_found", "Workflow not found");
        let json = serde_json::to_string(&body).expect("serializable");
        assert!(json.contains("\"code\":\"not_found\""));
        assert!(json.contains("\"message\":\"Workflow not found\""));
        assert!(!json.contains("path"));
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = CoreError::RateLimited {
            retry_after_secs: 3,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("3")
        );
    }

    #[test]
    fn test_internal_detail_is_not_leaked() {
        let response = CoreError::internal("pool exhausted on 10.0.0.3").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
