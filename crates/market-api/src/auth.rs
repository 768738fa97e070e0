//! Caller identity from gateway-set headers.

use crate::handlers::{market_error_to_response, ApiError};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use market_core::MarketError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Authenticated caller. Missing `X-User-Id` rejects with 401.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role
            .as_deref()
            .map(|r| r.eq_ignore_ascii_case("admin"))
            .unwrap_or(false)
    }
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header_value(parts, USER_ID_HEADER)
            .ok_or_else(|| market_error_to_response(MarketError::Unauthenticated))?;

        Ok(Self {
            id,
            email: header_value(parts, USER_EMAIL_HEADER),
            role: header_value(parts, USER_ROLE_HEADER),
        })
    }
}

/// Caller with the admin role. Non-admins get 403.
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(market_error_to_response(MarketError::Forbidden(
                "Admin access required".to_string(),
            )));
        }
        Ok(Self(user))
    }
}
