use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::CookieJar;
use tracing::warn;

use super::{claims::AccessClaims, cookies::ACCESS_COOKIE};
use crate::{error::AppError, state::AppState, users::repo_types::User};

/// Authenticated caller, resolved from the access token.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub claims: AccessClaims,
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(|t| t.trim().to_string())
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Cookie first, then "Authorization: Bearer <token>"
        let token = CookieJar::from_headers(&parts.headers)
            .get(ACCESS_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| bearer_token(parts))
            .ok_or_else(|| AppError::Auth("Unauthorized request".into()))?;

        let claims = state.tokens.verify_access(&token).map_err(|e| {
            warn!(error = %e, "invalid or expired access token");
            AppError::from(e)
        })?;

        let user = state
            .users
            .find_by_id(claims.sub)
            .await
            .map_err(|e| AppError::upstream("Failed to load user", e))?
            .ok_or_else(|| {
                warn!(user_id = %claims.sub, "access token for unknown user");
                AppError::Auth("Invalid access token".into())
            })?;

        Ok(CurrentUser { user, claims })
    }
}
