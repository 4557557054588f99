//! Caller identity.
//!
//! Authentication happens upstream (a gateway or auth proxy validates the
//! session or token) and forwards the verified user id in `x-user-id`.
//! Handlers receive it as an [`Owner`] and pass it explicitly to every
//! service call.

use crate::errors::AppError;
use axum::{extract::FromRequestParts, http::request::Parts};

pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated user id of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl Owner {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Owner(v.to_string()))
            .ok_or_else(|| AppError::unauthorized("missing authenticated user"))
    }
}
