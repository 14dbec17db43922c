//! Token authentication module.
//!
//! Accepts the token as a bearer `Authorization` header or as a `token` query
//! parameter (browser `EventSource` clients cannot set headers). Comparison is
//! constant-time to mitigate timing attacks.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, Request},
    http::{header, HeaderMap, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::errors::AppError;

/// Query parameter carrying the token.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Token authentication layer function that takes the expected token as a parameter.
pub async fn token_auth_layer(expected: Arc<str>, request: Request, next: Next) -> Response {
    let provided = bearer_token(request.headers())
        .or_else(|| query_token(request.uri()));

    match provided {
        Some(token) if constant_time_compare(&token, &expected) => next.run(request).await,
        Some(_) => {
            tracing::debug!(path = %request.uri().path(), "Rejected request with invalid token");
            AppError::Unauthorized("Invalid token".to_string()).into_response()
        }
        None => AppError::Unauthorized("Missing token".to_string()).into_response(),
    }
}

/// Extract a non-empty bearer token from the `Authorization` header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract a non-empty `token` query parameter.
fn query_token(uri: &Uri) -> Option<String> {
    let Query(mut params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
    params
        .remove(TOKEN_QUERY_PARAM)
        .filter(|s| !s.is_empty())
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
