//! Extract the caller's access level from the configured auth header (default `X-API-KEY`).

use crate::config::ApiSettings;
use crate::error::ApiError;
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use std::sync::Arc;

/// Privilege levels; numerically lower is more privileged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i64)]
pub enum AccessLevel {
    Super = 0,
    Editor = 1,
    Viewer = 2,
}

/// Numeric access level sent by the caller; `None` when the header is missing or not a number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Credential(pub Option<i64>);

impl Credential {
    /// Granted when the caller's level is at most `required`.
    pub fn require(&self, required: AccessLevel) -> Result<(), ApiError> {
        match self.0 {
            Some(level) if level <= required as i64 => Ok(()),
            _ => Err(ApiError::Unauthorized("Access level insufficient".into())),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Credential
where
    Arc<ApiSettings>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let settings = Arc::<ApiSettings>::from_ref(state);
        let level = parts
            .headers
            .get(settings.auth_header.as_str())
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<i64>().ok());
        Ok(Credential(level))
    }
}
