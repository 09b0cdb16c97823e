use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::CookieJar;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use crate::{
    auth::{
        cookies::{clear_session, with_session, REFRESH_COOKIE},
        dto::{LoginRequest, LoginResponse, RefreshRequest, TokenPairResponse, UpdatePasswordRequest},
        extractors::CurrentUser,
        services,
    },
    error::{AppError, AppResult},
    response::ApiResponse,
    state::AppState,
    users::repo_types::PublicUser,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh-token", post(refresh_token))
        .route("/update-password", post(update_password))
        .route("/current-user", get(current_user))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<(CookieJar, ApiResponse<LoginResponse>)> {
    let Json(payload) = payload?;
    let issued = services::login(&state, payload).await?;

    let jar = with_session(jar, &state.tokens, &issued, state.config.cookies.secure);
    Ok((
        jar,
        ApiResponse::ok(
            LoginResponse {
                user: issued.user,
                access_token: issued.access_token,
                refresh_token: issued.refresh_token,
            },
            "User logged in successfully",
        ),
    ))
}

#[instrument(skip(state, jar, current), fields(user_id = %current.user.id))]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    current: CurrentUser,
) -> AppResult<(CookieJar, ApiResponse<Value>)> {
    state.tokens.revoke(state.users.as_ref(), current.user.id).await?;
    info!(user_id = %current.user.id, "user logged out");

    let jar = clear_session(jar, state.config.cookies.secure);
    Ok((jar, ApiResponse::ok(json!({}), "User logged out successfully")))
}

#[instrument(skip(state, jar, body))]
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> AppResult<(CookieJar, ApiResponse<TokenPairResponse>)> {
    let incoming = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| body.and_then(|Json(b)| b.refresh_token).filter(|t| !t.is_empty()))
        .ok_or_else(|| AppError::Auth("Unauthorized request".into()))?;

    let issued = state
        .tokens
        .verify_and_rotate_refresh(state.users.as_ref(), &incoming)
        .await?;
    info!(user_id = %issued.user.id, "tokens refreshed");

    let jar = with_session(jar, &state.tokens, &issued, state.config.cookies.secure);
    Ok((
        jar,
        ApiResponse::ok(
            TokenPairResponse {
                access_token: issued.access_token,
                refresh_token: issued.refresh_token,
            },
            "Access token refreshed",
        ),
    ))
}

#[instrument(skip(state, current, payload), fields(user_id = %current.user.id))]
pub async fn update_password(
    State(state): State<AppState>,
    current: CurrentUser,
    payload: Result<Json<UpdatePasswordRequest>, JsonRejection>,
) -> AppResult<ApiResponse<Value>> {
    let Json(payload) = payload?;
    services::update_password(&state, &current.user, payload).await?;
    Ok(ApiResponse::ok(json!({}), "Password changed successfully"))
}

#[instrument(skip(current), fields(user_id = %current.user.id))]
pub async fn current_user(current: CurrentUser) -> ApiResponse<PublicUser> {
    debug!(jti = %current.claims.jti, "current user resolved");
    ApiResponse::ok(
        PublicUser::from(&current.user),
        "Current user fetched successfully",
    )
}
