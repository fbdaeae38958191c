//! `Json` and `Query` extractors whose rejections go through [`ApiError`],
//! so malformed input gets the same JSON error body as every other failure.

use axum::{
    Json,
    extract::{
        FromRequest, FromRequestParts, Query, Request,
        rejection::{JsonRejection, QueryRejection},
    },
    http::request::Parts,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ApiError, ValidationError};

const JSON_DATA_PREFIX: &str = "Failed to deserialize the JSON body into the target type: ";
const QUERY_PREFIX: &str = "Failed to deserialize query string: ";

/// JSON request body.
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

/// Query string parameters.
#[derive(Debug)]
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(query_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    let text = rejection.body_text();
    debug!(reason = %text, "Rejected JSON body");
    match rejection {
        JsonRejection::JsonDataError(_) => {
            let detail = text.strip_prefix(JSON_DATA_PREFIX).unwrap_or(&text);
            ApiError::ValidationFailed(split_field(detail, "body"))
        }
        _ => ApiError::BadRequest(text),
    }
}

fn query_rejection(rejection: QueryRejection) -> ApiError {
    let text = rejection.body_text();
    debug!(reason = %text, "Rejected query string");
    let detail = text.strip_prefix(QUERY_PREFIX).unwrap_or(&text);
    ApiError::ValidationFailed(split_field(detail, "query"))
}

/// Split a `path: message` deserializer error into field and message.
fn split_field(detail: &str, fallback: &str) -> ValidationError {
    if let Some((path, message)) = detail.split_once(": ") {
        let is_path = !path.is_empty()
            && path != "."
            && path
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'));
        if is_path {
            return ValidationError::new(path, message);
        }
    }
    ValidationError::new(fallback, detail)
}
