//! Authentication middleware.
//!
//! Bearer token check for endpoints that start runs. When no `AUTH_SECRET`
//! is configured every caller is accepted.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::AppState;

/// Caller that presented the configured bearer token (or any caller when
/// authentication is disabled).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Authenticated,
    Anonymous,
}

/// Authenticated caller extracted from the request.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Caller);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(secret) = state.config.auth_secret.as_deref() else {
            return Ok(AuthUser(Caller::Anonymous));
        };

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|header| header.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        if constant_time_eq(token.as_bytes(), secret.as_bytes()) {
            Ok(AuthUser(Caller::Authenticated))
        } else {
            tracing::warn!("Rejected trigger with invalid bearer token");
            Err(AppError::Unauthorized)
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
