use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    routing::post,
    Router,
};
use tracing::instrument;

use crate::{
    auth::extractors::CurrentUser,
    error::AppResult,
    response::ApiResponse,
    state::AppState,
    users::{
        repo_types::PublicUser,
        services::{self, RegisterForm},
        upload::MultipartForm,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/update-avatar", post(update_avatar))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

/// POST /register (multipart)
/// Fields: username, email, fullName, password, avatar (file), coverImage (file, optional)
#[instrument(skip(state, mp))]
pub async fn register(
    State(state): State<AppState>,
    mp: Result<Multipart, MultipartRejection>,
) -> AppResult<ApiResponse<PublicUser>> {
    let form = MultipartForm::collect(mp?).await?;
    let user = services::register(&state, RegisterForm::from(form)).await?;
    Ok(ApiResponse::created(
        PublicUser::from(&user),
        "User created successfully",
    ))
}

/// POST /update-avatar (multipart, field: avatar)
#[instrument(skip(state, current, mp), fields(user_id = %current.user.id))]
pub async fn update_avatar(
    State(state): State<AppState>,
    current: CurrentUser,
    mp: Result<Multipart, MultipartRejection>,
) -> AppResult<ApiResponse<PublicUser>> {
    let mut form = MultipartForm::collect(mp?).await?;
    let user = services::update_avatar(&state, &current.user, form.take_file("avatar")).await?;
    Ok(ApiResponse::ok(
        PublicUser::from(&user),
        "Avatar updated successfully",
    ))
}
