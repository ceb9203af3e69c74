//! Service-wide error type and its HTTP surfacing.
//!
//! Each variant corresponds to one failure kind from the request/response contract:
//! validation errors surface immediately with a descriptive message, numerical failures
//! are caught and re-surfaced as `InternalError`, and a missing backend (never expected
//! once this binary is linked, but checked at the `/health` probe) surfaces as 503.

use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("no vectors provided")]
    EmptyInput,

    #[error("{0}")]
    ShapeInvalid(String),

    #[error("at least 2 vectors required for learning, got {n}")]
    NotEnoughSamples { n: usize },

    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    #[error("method 'linear_transformation' is disabled")]
    DisabledMethod,

    #[error("required library unavailable: {0}")]
    LibraryUnavailable(String),

    #[error("object serialization unavailable: {0}")]
    SerializationUnavailable(String),

    #[error("{0}")]
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::EmptyInput
            | AppError::ShapeInvalid(_)
            | AppError::NotEnoughSamples { .. }
            | AppError::UnknownMethod(_)
            | AppError::DisabledMethod => StatusCode::BAD_REQUEST,
            AppError::LibraryUnavailable(_) | AppError::SerializationUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Drop-in replacement for `axum::Json` that turns a malformed body (missing fields,
/// wrong types, invalid UTF-8/JSON) into a `ShapeInvalid` 400 instead of axum's default
/// 422, keeping every `/reduce` and `/create-matrix` failure inside the documented
/// status codes.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => Err(AppError::ShapeInvalid(rejection.body_text())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_kinds() {
        assert_eq!(
            AppError::EmptyInput.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::UnknownMethod("bogus".into())
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::DisabledMethod.into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn service_unavailable_kinds() {
        assert_eq!(
            AppError::LibraryUnavailable("umap".into())
                .into_response()
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::SerializationUnavailable("bincode".into())
                .into_response()
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn internal_error_kind() {
        assert_eq!(
            AppError::InternalError("boom".into())
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn validated_json_maps_malformed_body_to_shape_invalid() {
        use axum::body::Body;
        use serde::Deserialize;

        #[derive(Debug, Deserialize)]
        struct Probe {
            #[allow(dead_code)]
            required: u32,
        }

        let request = Request::builder()
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let err = ValidatedJson::<Probe>::from_request(request, &())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ShapeInvalid(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
