//! Error-to-HTTP response conversion.
//!
//! [`AppError`] wraps [`mb_core::Error`] so route handlers can return
//! `Result<T, AppError>` and use `?` on engine calls. Failures are rendered as
//! `{"error", "code", "request_id"}` JSON.

use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::middleware::request_id::RequestId;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: mb_core::Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: mb_core::Error) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: &RequestId) -> Self {
        self.request_id = Some(id.0.clone());
        self
    }

    pub fn inner(&self) -> &mb_core::Error {
        &self.inner
    }
}

impl From<mb_core::Error> for AppError {
    fn from(e: mb_core::Error) -> Self {
        Self::new(e)
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(mb_core::Error::Validation(rejection.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.inner, "Server error in handler");
        } else if self.inner.is_benign() {
            tracing::trace!(error = %self.inner, "Client went away");
        } else {
            tracing::debug!(status = %status, error = %self.inner, "Request rejected");
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
            "request_id": self.request_id,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn not_found_produces_404() {
        let err = AppError::new(mb_core::Error::not_found("base path", 3));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unsupported_codec_produces_415() {
        let err = AppError::new(mb_core::Error::UnsupportedCodec {
            codec: Some("prores".into()),
        });
        assert_eq!(err.into_response().status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn body_carries_code_and_request_id() {
        let err = AppError::new(mb_core::Error::path_traversal("../x"))
            .with_request_id(&RequestId("req-123".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = body_json(response).await;
        assert_eq!(body["code"], "path_traversal");
        assert_eq!(body["request_id"], "req-123");
        assert!(body["error"].as_str().unwrap().contains("../x"));
    }
}
