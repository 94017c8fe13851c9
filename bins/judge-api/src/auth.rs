// Caller identity as forwarded by the upstream auth layer

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use judge_common::RateLimitSubject;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USERNAME_HEADER: &str = "x-username";
pub const ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub username: String,
    pub is_admin: bool,
}

impl Caller {
    pub fn subject(&self) -> RateLimitSubject<'_> {
        RateLimitSubject {
            user_id: &self.user_id,
            username: &self.username,
            is_admin: self.is_admin,
        }
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER).ok_or(ApiError::Unauthorized)?;
        let username = header(parts, USERNAME_HEADER).unwrap_or(user_id);
        let is_admin = header(parts, ROLE_HEADER)
            .map(|role| role.eq_ignore_ascii_case("admin"))
            .unwrap_or(false);

        Ok(Caller {
            user_id: user_id.to_string(),
            username: username.to_string(),
            is_admin,
        })
    }
}
